// ========================================================================================
//
//                               THE SUBSET GENERATOR
//
// ========================================================================================
//
// Produces the de-duplicated candidate subsets of size k for one iteration. Small and
// near-full sizes are enumerated exhaustively. Everything else grows the best subsets
// of iteration k-1 (plus a random sample of the rest, for diversity) by one feature.
// The generator holds no state of its own: randomness is injected by the caller.

use crate::decide::{GenerationMode, choose_mode};
use crate::types::{FeatureUniverse, IterationRecord, Subset};
use ahash::AHashSet;
use itertools::Itertools;
use rand::Rng;
use rand::seq::index;
use thiserror::Error;

/// Number of top-scoring subsets carried forward unconditionally.
pub const DEFAULT_N_SUBSETS: usize = 50;

/// Size of the exploration sample relative to `n_subsets`.
pub const DEFAULT_EXPLORATION_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionParams {
    pub n_subsets: usize,
    pub exploration_ratio: f64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            n_subsets: DEFAULT_N_SUBSETS,
            exploration_ratio: DEFAULT_EXPLORATION_RATIO,
        }
    }
}

impl SelectionParams {
    /// `floor(r * n_subsets)`, before clamping to what is actually available.
    pub fn exploration_quota(&self) -> usize {
        (self.exploration_ratio * self.n_subsets as f64).floor() as usize
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("iteration {iteration} is outside the valid range 1..={universe_size}")]
    InvalidIteration {
        iteration: usize,
        universe_size: usize,
    },
    #[error(
        "heuristic generation for iteration {iteration} needs the record of iteration {previous}, which is unavailable"
    )]
    MissingCheckpoint { iteration: usize, previous: usize },
    #[error("the record of iteration {expected} contains a subset of size {found}")]
    RecordSizeMismatch { expected: usize, found: usize },
}

/// The subsets of iteration k-1 that will be grown into iteration k's candidates.
#[derive(Debug, Clone, Default)]
pub struct BaseSelection {
    /// The elites, highest score first.
    pub seeds: Vec<Subset>,
    /// Uniform sample of the non-elite remainder, in sampling order.
    pub exploration: Vec<Subset>,
}

impl BaseSelection {
    pub fn len(&self) -> usize {
        self.seeds.len() + self.exploration.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty() && self.exploration.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subset> {
        self.seeds.iter().chain(self.exploration.iter())
    }
}

/// Produces the candidate subsets of size `k`.
///
/// `previous` is only consulted in heuristic mode, where its absence is an error
/// rather than a reason to fall back to exhaustive enumeration.
pub fn generate_candidates<R>(
    k: usize,
    universe: &FeatureUniverse,
    previous: Option<&IterationRecord>,
    params: &SelectionParams,
    rng: &mut R,
) -> Result<Vec<Subset>, GenerateError>
where
    R: Rng + ?Sized,
{
    let n = universe.len();
    if k == 0 || k > n {
        return Err(GenerateError::InvalidIteration {
            iteration: k,
            universe_size: n,
        });
    }

    match choose_mode(k, n) {
        GenerationMode::Exhaustive => Ok(exhaustive_candidates(universe, k)),
        GenerationMode::Heuristic => {
            let previous = previous.ok_or(GenerateError::MissingCheckpoint {
                iteration: k,
                previous: k - 1,
            })?;

            if let Some(bad) = previous
                .entries()
                .iter()
                .find(|entry| entry.subset.len() != k - 1)
            {
                return Err(GenerateError::RecordSizeMismatch {
                    expected: k - 1,
                    found: bad.subset.len(),
                });
            }

            let base = select_base_subsets(previous, params, rng);
            log::debug!(
                "iteration {k}: expanding {} elites and {} exploration subsets",
                base.seeds.len(),
                base.exploration.len()
            );
            Ok(expand(base.iter(), universe))
        }
    }
}

/// Every combination of size `k`, in lexicographic order.
pub fn exhaustive_candidates(universe: &FeatureUniverse, k: usize) -> Vec<Subset> {
    universe
        .iter()
        .combinations(k)
        .map(Subset::canonical)
        .collect()
}

/// Picks the elites and the exploration sample from the previous iteration.
pub fn select_base_subsets<R>(
    previous: &IterationRecord,
    params: &SelectionParams,
    rng: &mut R,
) -> BaseSelection
where
    R: Rng + ?Sized,
{
    let ranked = previous.ranked();
    let (elites, remainder) = ranked.split_at(params.n_subsets.min(ranked.len()));

    let quota = params.exploration_quota().min(remainder.len());
    let exploration = index::sample(rng, remainder.len(), quota)
        .into_iter()
        .map(|i| remainder[i].subset.clone())
        .collect();

    BaseSelection {
        seeds: elites.iter().map(|entry| entry.subset.clone()).collect(),
        exploration,
    }
}

/// Grows every base subset by each feature of the universe it does not contain.
///
/// Output is canonical and de-duplicated, in first-seen order.
pub fn expand<'a, I>(bases: I, universe: &FeatureUniverse) -> Vec<Subset>
where
    I: IntoIterator<Item = &'a Subset>,
{
    let mut seen: AHashSet<Subset> = AHashSet::new();
    let mut candidates = Vec::new();

    for base in bases {
        for feature in universe.iter().filter(|feature| !base.contains(feature)) {
            let candidate = base.with_feature(feature);
            if !seen.contains(&candidate) {
                seen.insert(candidate.clone());
                candidates.push(candidate);
            }
        }
    }

    candidates
}
