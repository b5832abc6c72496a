// Each test binary uses a different part of these fixtures.
#![allow(dead_code)]

use gsdecomp::data::{Dataset, Labels};
use gsdecomp::evaluate::{ClassifierError, EvaluationError, SubsetScorer};
use gsdecomp::types::Subset;
use ndarray::Array2;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use std::sync::Mutex;

/// `G00`, `G01`, ... so that lexicographic and numeric order agree.
pub fn gene_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("G{i:02}")).collect()
}

/// A fixed, arbitrary fitness per feature in `[0, 1]`.
pub fn weight(feature: &str) -> f64 {
    let sum: u64 = feature.bytes().map(u64::from).sum();
    (sum * 7 % 17) as f64 / 16.0
}

/// Mean feature weight. Ignores its random stream.
pub struct WeightScorer;

impl SubsetScorer for WeightScorer {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        let _ = rng;
        Ok(subset.iter().map(weight).sum::<f64>() / subset.len() as f64)
    }
}

/// Mean feature weight plus noise drawn from the candidate's own stream.
pub struct NoisyScorer;

impl SubsetScorer for NoisyScorer {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        let base = subset.iter().map(weight).sum::<f64>() / subset.len() as f64;
        Ok(base + rng.gen_range(0.0..0.05))
    }
}

/// Records the size of every subset it is asked to score.
pub struct CountingScorer<S> {
    inner: S,
    sizes: Mutex<Vec<usize>>,
}

impl<S> CountingScorer<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.sizes.lock().unwrap().len()
    }

    pub fn calls_for_size(&self, k: usize) -> usize {
        self.sizes.lock().unwrap().iter().filter(|&&s| s == k).count()
    }
}

impl<S: SubsetScorer> SubsetScorer for CountingScorer<S> {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        self.sizes.lock().unwrap().push(subset.len());
        self.inner.score(subset, rng)
    }
}

/// Fails every subset matching `fails`, scores the rest with `inner`.
pub struct FailingScorer<S> {
    pub inner: S,
    pub fails: fn(&Subset) -> bool,
}

impl<S: SubsetScorer> SubsetScorer for FailingScorer<S> {
    fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
        if (self.fails)(subset) {
            return Err(EvaluationError::Classifier(ClassifierError::Diverged { epoch: 0 }));
        }
        self.inner.score(subset, rng)
    }
}

/// Two balanced classes. `signal` separates them by a wide margin; every
/// `noise<i>` column is pure standard-normal noise.
pub fn synthetic_dataset(n_samples: usize, n_noise: usize, seed: u64) -> (Dataset, Labels) {
    let mut rng = StdRng::seed_from_u64(seed);
    let classes: Vec<usize> = (0..n_samples).map(|i| i % 2).collect();

    let mut genes = vec!["signal".to_string()];
    genes.extend((0..n_noise).map(|i| format!("noise{i}")));

    let values = Array2::from_shape_fn((n_samples, genes.len()), |(row, col)| {
        let noise: f64 = rng.sample(StandardNormal);
        if col == 0 {
            let centre = if classes[row] == 0 { -3.0 } else { 3.0 };
            centre + 0.5 * noise
        } else {
            noise
        }
    });

    let samples: Vec<String> = (0..n_samples).map(|i| format!("sample{i}")).collect();
    let raw: Vec<&str> = classes
        .iter()
        .map(|&c| if c == 0 { "normal" } else { "tumor" })
        .collect();

    (
        Dataset::new(samples, genes, values).unwrap(),
        Labels::encode(&raw).unwrap(),
    )
}
