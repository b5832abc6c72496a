// ========================================================================================
//
//                               THE SEARCH CONTROLLER
//
// ========================================================================================
//
// Drives one named run from subset size 1 up to the last size. Iterations are strictly
// sequential; candidates within an iteration are scored in parallel. The record of
// iteration k is written once every candidate has been scored, so an interrupted run
// resumes at the first iteration without a record. Iteration k-1 is always read back
// from disk before generating iteration k, so a resumed run and an uninterrupted one
// see exactly the same inputs.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::{ConfigError, EvaluationPolicy, SearchConfig};
use crate::decide::{GenerationMode, choose_mode};
use crate::evaluate::{EvaluationError, SubsetScorer};
use crate::generate::{GenerateError, SelectionParams, generate_candidates};
use crate::seed::{SeedStream, derive_rng, resolve_base_seed};
use crate::types::{FeatureUniverse, IterationRecord, ScoredSubset, Subset, UniverseError};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use thiserror::Error;

// ========================================================================================
//                                  Errors & summaries
// ========================================================================================

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("run '{run}': the feature universe is empty")]
    EmptyUniverse { run: String },
    #[error("run '{run}': {source}")]
    InvalidFeature {
        run: String,
        #[source]
        source: UniverseError,
    },
    #[error("invalid search configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("run '{run}': iteration {iteration} has no checkpoint, but the next iteration needs it")]
    MissingCheckpoint { run: String, iteration: usize },
    #[error("run '{run}': the checkpoint of iteration {iteration} cannot be used: {source}")]
    CorruptCheckpoint {
        run: String,
        iteration: usize,
        #[source]
        source: CheckpointError,
    },
    #[error("run '{run}', iteration {iteration}: scoring subset '{subset}' failed: {source}")]
    Evaluation {
        run: String,
        iteration: usize,
        subset: String,
        #[source]
        source: EvaluationError,
    },
    #[error("run '{run}', iteration {iteration}: all {skipped} candidates failed to score")]
    EmptyIteration {
        run: String,
        iteration: usize,
        skipped: usize,
    },
    #[error("run '{run}': {source}")]
    UniverseMismatch {
        run: String,
        #[source]
        source: CheckpointError,
    },
    #[error("run '{run}': {source}")]
    Checkpoint {
        run: String,
        #[source]
        source: CheckpointError,
    },
    #[error("run '{run}', iteration {iteration}: {source}")]
    Generate {
        run: String,
        iteration: usize,
        #[source]
        source: GenerateError,
    },
    #[error("failed to build the scoring thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    pub iteration: usize,
    pub mode: GenerationMode,
    /// Subsets in the record (for a resumed iteration) or candidates generated.
    pub candidates: usize,
    pub skipped: usize,
    /// True when the record was already on disk and nothing was scored.
    pub resumed: bool,
    pub best: Option<ScoredSubset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub name: String,
    pub seed: u64,
    pub iterations: Vec<IterationSummary>,
}

impl RunSummary {
    /// Number of iterations that were scored in this invocation.
    pub fn scored_iterations(&self) -> usize {
        self.iterations.iter().filter(|it| !it.resumed).count()
    }
}

// ========================================================================================
//                                     The controller
// ========================================================================================

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// One named search over one feature universe, checkpointed under `run_dir`.
#[derive(Debug, Clone)]
pub struct SearchRun {
    name: String,
    universe: FeatureUniverse,
    run_dir: PathBuf,
}

/// Everything an iteration needs that stays fixed for the whole run.
struct RunContext<'a, S: ?Sized> {
    store: CheckpointStore,
    scorer: &'a S,
    pool: ThreadPool,
    params: SelectionParams,
    policy: EvaluationPolicy,
    seed: u64,
    last: usize,
}

impl SearchRun {
    pub fn new<I, S>(name: impl Into<String>, features: I, run_dir: impl Into<PathBuf>) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let universe = FeatureUniverse::new(features).map_err(|e| match e {
            UniverseError::Empty => SearchError::EmptyUniverse { run: name.clone() },
            source => SearchError::InvalidFeature {
                run: name.clone(),
                source,
            },
        })?;
        Ok(Self {
            name,
            universe,
            run_dir: run_dir.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn universe(&self) -> &FeatureUniverse {
        &self.universe
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Runs (or resumes) the search to its last iteration.
    pub fn execute<S>(&self, scorer: &S, config: &SearchConfig) -> Result<RunSummary, SearchError>
    where
        S: SubsetScorer + ?Sized,
    {
        config.validate()?;

        let store = CheckpointStore::open(&self.run_dir).map_err(|e| self.checkpoint_error(e))?;
        store
            .clear_stale_temp_files()
            .map_err(|e| self.checkpoint_error(e))?;
        store.ensure_universe(&self.universe).map_err(|e| match e {
            e @ CheckpointError::UniverseMismatch { .. } => SearchError::UniverseMismatch {
                run: self.name.clone(),
                source: e,
            },
            e => self.checkpoint_error(e),
        })?;

        let seed = resolve_base_seed(config.seed);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .build()?;
        let ctx = RunContext {
            store,
            scorer,
            pool,
            params: config.selection(),
            policy: config.on_evaluation_error,
            seed,
            last: config.last_iteration(self.universe.len()),
        };

        log::info!(
            "run '{}': {} features, sizes 1..={}, seed {}, {} worker threads, on error: {}",
            self.name,
            self.universe.len(),
            ctx.last,
            seed,
            ctx.pool.current_num_threads(),
            ctx.policy
        );

        let mut iterations = Vec::with_capacity(ctx.last);
        for k in 1..=ctx.last {
            iterations.push(self.run_iteration(k, &ctx)?);
        }

        log::info!("run '{}' finished after {} iterations", self.name, ctx.last);
        Ok(RunSummary {
            name: self.name.clone(),
            seed,
            iterations,
        })
    }

    fn run_iteration<S>(&self, k: usize, ctx: &RunContext<'_, S>) -> Result<IterationSummary, SearchError>
    where
        S: SubsetScorer + ?Sized,
    {
        let mode = choose_mode(k, self.universe.len());

        if let Some(record) = self.load_record(&ctx.store, k)? {
            log::info!(
                "run '{}' iteration {k}/{}: resuming from the existing record ({} subsets)",
                self.name,
                ctx.last,
                record.len()
            );
            return Ok(IterationSummary {
                iteration: k,
                mode,
                candidates: record.len(),
                skipped: 0,
                resumed: true,
                best: record.best().cloned(),
            });
        }

        let previous = match mode {
            GenerationMode::Exhaustive => None,
            GenerationMode::Heuristic => Some(self.load_record(&ctx.store, k - 1)?.ok_or_else(
                || SearchError::MissingCheckpoint {
                    run: self.name.clone(),
                    iteration: k - 1,
                },
            )?),
        };

        let mut rng = derive_rng(ctx.seed, SeedStream::Generate, k, 0);
        let candidates =
            generate_candidates(k, &self.universe, previous.as_ref(), &ctx.params, &mut rng)
                .map_err(|source| SearchError::Generate {
                    run: self.name.clone(),
                    iteration: k,
                    source,
                })?;
        log::info!(
            "run '{}' iteration {k}/{} ({}): scoring {} candidates",
            self.name,
            ctx.last,
            mode,
            candidates.len()
        );

        let (entries, skipped) = self.score_candidates(k, &candidates, ctx)?;
        if entries.is_empty() {
            return Err(SearchError::EmptyIteration {
                run: self.name.clone(),
                iteration: k,
                skipped: skipped.len(),
            });
        }
        if !skipped.is_empty() {
            let path = ctx
                .store
                .write_skipped(k, &skipped)
                .map_err(|e| self.checkpoint_error(e))?;
            log::warn!(
                "run '{}' iteration {k}: {} of {} candidates skipped, listed in '{}'",
                self.name,
                skipped.len(),
                candidates.len(),
                path.display()
            );
        }

        let record = IterationRecord::new(k, entries);
        ctx.store
            .write_record(&record)
            .map_err(|e| self.checkpoint_error(e))?;

        let best = record.best().cloned();
        if let Some(best) = &best {
            log::info!(
                "run '{}' iteration {k}: best subset {} with score {:.3}",
                self.name,
                best.subset,
                best.score
            );
        }

        Ok(IterationSummary {
            iteration: k,
            mode,
            candidates: candidates.len(),
            skipped: skipped.len(),
            resumed: false,
            best,
        })
    }

    /// Scores every candidate on the run's pool. Under `Abort` the first failure
    /// (in candidate order) is returned and candidates after a known failure are
    /// not scored; under `Skip` failures are collected.
    #[allow(clippy::type_complexity)]
    fn score_candidates<S>(
        &self,
        k: usize,
        candidates: &[Subset],
        ctx: &RunContext<'_, S>,
    ) -> Result<(Vec<ScoredSubset>, Vec<(Subset, String)>), SearchError>
    where
        S: SubsetScorer + ?Sized,
    {
        let pb = create_progress_bar(candidates.len() as u64, &format!("{} k={k}", self.name));
        let scorer = ctx.scorer;
        let seed = ctx.seed;
        let abort = ctx.policy == EvaluationPolicy::Abort;
        // Lowest candidate index that has failed so far. Every index below it is
        // still scored, so the reported failure does not depend on scheduling.
        let first_failure = AtomicUsize::new(usize::MAX);

        let outcomes: Vec<Option<Result<f64, EvaluationError>>> = ctx.pool.install(|| {
            candidates
                .par_iter()
                .enumerate()
                .map(|(index, subset)| {
                    if abort && index > first_failure.load(AtomicOrdering::Relaxed) {
                        return None;
                    }
                    let mut rng = derive_rng(seed, SeedStream::Evaluate, k, index);
                    let outcome = scorer.score(subset, &mut rng);
                    if outcome.is_err() {
                        first_failure.fetch_min(index, AtomicOrdering::Relaxed);
                    }
                    pb.inc(1);
                    Some(outcome)
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut entries = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();
        for (subset, outcome) in candidates.iter().zip(outcomes) {
            let Some(outcome) = outcome else {
                continue;
            };
            match (outcome, ctx.policy) {
                (Ok(score), _) => entries.push(ScoredSubset {
                    subset: subset.clone(),
                    score,
                }),
                (Err(source), EvaluationPolicy::Abort) => {
                    return Err(SearchError::Evaluation {
                        run: self.name.clone(),
                        iteration: k,
                        subset: subset.join(),
                        source,
                    });
                }
                (Err(e), EvaluationPolicy::Skip) => {
                    log::warn!("run '{}' iteration {k}: skipping {subset}: {e}", self.name);
                    skipped.push((subset.clone(), e.to_string()));
                }
            }
        }
        Ok((entries, skipped))
    }

    fn load_record(
        &self,
        store: &CheckpointStore,
        k: usize,
    ) -> Result<Option<IterationRecord>, SearchError> {
        store
            .read_record(k, &self.universe)
            .map_err(|source| SearchError::CorruptCheckpoint {
                run: self.name.clone(),
                iteration: k,
                source,
            })
    }

    fn checkpoint_error(&self, source: CheckpointError) -> SearchError {
        SearchError::Checkpoint {
            run: self.name.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use std::fs;
    use tempfile::tempdir;

    /// Scores a subset by how many of its features sort before "C".
    struct Prefix;

    impl SubsetScorer for Prefix {
        fn score(&self, subset: &Subset, rng: &mut StdRng) -> Result<f64, EvaluationError> {
            let _ = rng;
            Ok(subset.iter().filter(|f| *f < "C").count() as f64 / subset.len() as f64)
        }
    }

    fn config() -> SearchConfig {
        SearchConfig {
            seed: Some(1),
            threads: Some(2),
            ..SearchConfig::default()
        }
    }

    #[test]
    fn empty_universe_is_rejected() {
        let dir = tempdir().unwrap();
        let empty: [&str; 0] = [];
        assert!(matches!(
            SearchRun::new("empty", empty, dir.path()),
            Err(SearchError::EmptyUniverse { run }) if run == "empty"
        ));
    }

    #[test]
    fn separator_in_a_feature_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SearchRun::new("sep", ["A,B", "C"], dir.path()),
            Err(SearchError::InvalidFeature { run, .. }) if run == "sep"
        ));
    }

    #[test]
    fn invalid_config_fails_before_touching_disk() {
        let dir = tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let run = SearchRun::new("r", ["A", "B"], &run_dir).unwrap();
        let bad = SearchConfig {
            n_subsets: 0,
            ..config()
        };
        assert!(matches!(run.execute(&Prefix, &bad), Err(SearchError::Config(_))));
        assert!(!run_dir.exists());
    }

    #[test]
    fn small_universe_runs_to_completion() {
        let dir = tempdir().unwrap();
        let run = SearchRun::new("abc", ["C", "A", "B"], dir.path()).unwrap();
        let summary = run.execute(&Prefix, &config()).unwrap();

        let counts: Vec<usize> = summary.iterations.iter().map(|it| it.candidates).collect();
        assert_eq!(counts, vec![3, 3, 1]);
        assert_eq!(summary.iterations[0].best.as_ref().unwrap().subset.join(), "A");
        assert_eq!(summary.iterations[1].best.as_ref().unwrap().subset.join(), "A,B");
        assert_eq!(
            fs::read_to_string(dir.path().join("genes.txt")).unwrap(),
            "A\nB\nC\n"
        );
    }

    #[test]
    fn max_iterations_stops_early() {
        let dir = tempdir().unwrap();
        let run = SearchRun::new("abc", ["A", "B", "C", "D"], dir.path()).unwrap();
        let summary = run
            .execute(
                &Prefix,
                &SearchConfig {
                    max_iterations: Some(2),
                    ..config()
                },
            )
            .unwrap();
        assert_eq!(summary.iterations.len(), 2);
        assert!(!dir.path().join("scores_003.txt").exists());
    }

    #[test]
    fn a_different_universe_cannot_reuse_a_run_directory() {
        let dir = tempdir().unwrap();
        SearchRun::new("r", ["A", "B"], dir.path())
            .unwrap()
            .execute(&Prefix, &config())
            .unwrap();
        let err = SearchRun::new("r", ["A", "B", "C"], dir.path())
            .unwrap()
            .execute(&Prefix, &config())
            .unwrap_err();
        assert!(matches!(err, SearchError::UniverseMismatch { .. }));
    }
}
