// ========================================================================================
//
//                               THE SCORING HARNESS
//
// ========================================================================================
//
// Turns a subset into one number. The dataset is restricted to the subset's columns,
// each column is scaled by its maximum absolute value, samples are split into a
// training part and a held-out part, a fresh classifier is fitted on the former and
// its accuracy on the latter is the score. Nothing is shared between calls except
// the read-only dataset.

use crate::data::{Dataset, Labels};
use crate::types::Subset;
use crossbeam_channel::RecvTimeoutError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Fraction of samples held out for scoring.
pub const DEFAULT_TEST_FRACTION: f64 = 0.3;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("training matrix has {rows} rows but {labels} labels were supplied")]
    ShapeMismatch { rows: usize, labels: usize },
    #[error("cannot fit or score on zero samples")]
    NoSamples,
    #[error("label {label} is outside the {n_classes} known classes")]
    UnsupportedLabel { label: usize, n_classes: usize },
    #[error("at least two classes are required, found {0}")]
    TooFewClasses(usize),
    #[error("classifier was fitted on {expected} features but received {found}")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("predict called before fit")]
    NotFitted,
    #[error("training diverged after epoch {epoch}: parameters are no longer finite")]
    Diverged { epoch: usize },
}

/// A trainable classifier. Instances are single-use: one `fit`, then any number
/// of `predict`/`score` calls.
pub trait Classifier: Send {
    fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        n_classes: usize,
        rng: &mut StdRng,
    ) -> Result<(), ClassifierError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>, ClassifierError>;

    /// Classification accuracy on `(x, y)`, in `[0, 1]`.
    fn score(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<f64, ClassifierError> {
        if x.nrows() != y.len() {
            return Err(ClassifierError::ShapeMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }
        if y.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        let predicted = self.predict(x)?;
        let correct = predicted
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| p == t)
            .count();
        Ok(correct as f64 / y.len() as f64)
    }
}

/// Builds fresh, independent classifier instances.
pub trait ClassifierFactory: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self) -> Box<dyn Classifier>;
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("feature '{0}' is not a column of the dataset")]
    UnknownFeature(String),
    #[error("dataset has {samples} samples but {labels} labels")]
    ShapeMismatch { samples: usize, labels: usize },
    #[error(
        "a held-out fraction of {test_fraction} leaves {train} training and {test} test samples"
    )]
    DegenerateSplit {
        test_fraction: f64,
        train: usize,
        test: usize,
    },
    #[error("classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("classifier reported a non-finite score ({0})")]
    NonFiniteScore(f64),
    #[error("evaluation did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("could not start an evaluation worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("evaluation worker terminated without reporting a score")]
    WorkerPanicked,
}

/// The scoring capability the search controller consumes.
pub trait SubsetScorer: Sync {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError>;
}

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Scores subsets of one dataset with one classifier family.
pub struct Evaluator {
    dataset: Arc<Dataset>,
    labels: Arc<Labels>,
    factory: Arc<dyn ClassifierFactory>,
    test_fraction: f64,
    timeout: Option<Duration>,
    workers: Arc<AtomicUsize>,
}

/// Decrements the live worker count when a deadline worker exits, panics included.
struct WorkerGuard(Arc<AtomicUsize>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Evaluator {
    pub fn new(
        dataset: Arc<Dataset>,
        labels: Arc<Labels>,
        factory: Arc<dyn ClassifierFactory>,
    ) -> Result<Self, EvaluationError> {
        if dataset.n_samples() != labels.len() {
            return Err(EvaluationError::ShapeMismatch {
                samples: dataset.n_samples(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            dataset,
            labels,
            factory,
            test_fraction: DEFAULT_TEST_FRACTION,
            timeout: None,
            workers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn with_test_fraction(mut self, test_fraction: f64) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    /// Bounds every call to `evaluate`. Expired candidates yield
    /// [`EvaluationError::TimedOut`].
    ///
    /// A worker that misses its deadline cannot be cancelled: it is detached and
    /// keeps a CPU busy outside the scoring pool until its classifier finishes.
    /// Many timeouts in a row can therefore pile up threads; see
    /// [`Evaluator::running_workers`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline workers that are still computing, abandoned ones included.
    pub fn running_workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub fn classifier_name(&self) -> &str {
        self.factory.name()
    }

    pub fn evaluate(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        match self.timeout {
            None => evaluate_subset(
                &self.dataset,
                &self.labels,
                self.factory.as_ref(),
                subset,
                self.test_fraction,
                rng,
            ),
            Some(limit) => self.evaluate_with_deadline(subset, rng, limit),
        }
    }

    fn evaluate_with_deadline(
        &self,
        subset: &Subset,
        rng: &mut StdRng,
        limit: Duration,
    ) -> Result<f64, EvaluationError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let dataset = Arc::clone(&self.dataset);
        let labels = Arc::clone(&self.labels);
        let factory = Arc::clone(&self.factory);
        let subset_label = subset.join();
        let subset = subset.clone();
        let test_fraction = self.test_fraction;
        let mut worker_rng = rng.clone();

        self.workers.fetch_add(1, Ordering::SeqCst);
        let guard = WorkerGuard(Arc::clone(&self.workers));
        let spawned = thread::Builder::new()
            .name("gsdecomp-eval".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = evaluate_subset(
                    &dataset,
                    &labels,
                    factory.as_ref(),
                    &subset,
                    test_fraction,
                    &mut worker_rng,
                );
                // The receiver is gone once the deadline has passed.
                let _ = tx.send(result);
            });
        // A failed spawn drops the closure, and the guard with it.
        spawned?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "abandoning the worker scoring {} after {limit:?}; {} deadline workers still running",
                    subset_label,
                    self.running_workers()
                );
                Err(EvaluationError::TimedOut(limit))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvaluationError::WorkerPanicked),
        }
    }
}

impl SubsetScorer for Evaluator {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        self.evaluate(subset, rng)
    }
}

/// One complete evaluation: restrict, normalize, split, fit, score.
pub fn evaluate_subset(
    dataset: &Dataset,
    labels: &Labels,
    factory: &dyn ClassifierFactory,
    subset: &Subset,
    test_fraction: f64,
    rng: &mut StdRng,
) -> Result<f64, EvaluationError> {
    let columns = subset
        .iter()
        .map(|gene| {
            dataset
                .column_index(gene)
                .ok_or_else(|| EvaluationError::UnknownFeature(gene.to_string()))
        })
        .collect::<Result<Vec<usize>, EvaluationError>>()?;

    let mut x = dataset.values().select(Axis(1), &columns);
    max_abs_scale(&mut x);

    let split = train_test_split(x.nrows(), test_fraction, rng)?;
    let y = labels.encoded();
    let x_train = x.select(Axis(0), &split.train);
    let y_train = y.select(Axis(0), &split.train);
    let x_test = x.select(Axis(0), &split.test);
    let y_test = y.select(Axis(0), &split.test);

    let mut classifier = factory.build();
    classifier.fit(x_train.view(), y_train.view(), labels.n_classes(), rng)?;
    let score = classifier.score(x_test.view(), y_test.view())?;

    if !score.is_finite() {
        return Err(EvaluationError::NonFiniteScore(score));
    }
    log::debug!("{subset}: {score:.3}");
    Ok(score)
}

/// Divides every column by its maximum absolute value. All-zero columns are left as is.
pub fn max_abs_scale(x: &mut Array2<f64>) {
    for mut column in x.columns_mut() {
        let max_abs = column.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if max_abs > 0.0 {
            column.mapv_inplace(|v| v / max_abs);
        }
    }
}

/// Shuffles `0..n` and holds out `ceil(test_fraction * n)` rows.
pub fn train_test_split<R>(
    n: usize,
    test_fraction: f64,
    rng: &mut R,
) -> Result<Split, EvaluationError>
where
    R: Rng + ?Sized,
{
    let n_test = (test_fraction * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(EvaluationError::DegenerateSplit {
            test_fraction,
            train: n_train,
            test: n_test.min(n),
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let train = order.split_off(n_test);
    Ok(Split { train, test: order })
}
