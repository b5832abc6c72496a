// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Returned when a feature universe cannot be built from the given identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniverseError {
    #[error("the feature universe is empty")]
    Empty,
    #[error("feature identifier '{feature}' {reason}")]
    InvalidFeature { feature: String, reason: &'static str },
}

/// Identifiers are written verbatim into comma- and tab-separated checkpoint
/// lines, so anything that would not read back as the same identifier is refused.
fn check_feature(feature: &str) -> Result<(), UniverseError> {
    let reason = if feature.is_empty() {
        "is empty"
    } else if feature.contains(',') {
        "contains a comma"
    } else if feature.contains(['\t', '\n', '\r']) {
        "contains a tab or line break"
    } else if feature.trim() != feature {
        "has leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(UniverseError::InvalidFeature {
        feature: feature.to_string(),
        reason,
    })
}

/// The immutable set of feature identifiers a search run draws its subsets from.
///
/// Identifiers are stored de-duplicated and in canonical (lexicographic) order, so
/// enumeration order never depends on how the caller listed the genes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureUniverse {
    features: Vec<String>,
}

impl FeatureUniverse {
    pub fn new<I, S>(features: I) -> Result<Self, UniverseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut features: Vec<String> = features.into_iter().map(Into::into).collect();
        features.sort_unstable();
        features.dedup();
        if features.is_empty() {
            return Err(UniverseError::Empty);
        }
        for feature in &features {
            check_feature(feature)?;
        }
        Ok(Self { features })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(String::as_str)
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features
            .binary_search_by(|probe| probe.as_str().cmp(feature))
            .is_ok()
    }
}

/// A canonicalized, duplicate-free collection of feature identifiers.
///
/// Equality, ordering and hashing all operate on the canonical form, so two
/// subsets reached through different expansion paths compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subset(Vec<String>);

impl Subset {
    /// Sorts and de-duplicates the given identifiers.
    pub fn canonical<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut features: Vec<String> = features.into_iter().map(Into::into).collect();
        features.sort_unstable();
        features.dedup();
        Self(features)
    }

    /// Re-applies canonicalization. A no-op on any value built through this type.
    pub fn canonicalize(self) -> Self {
        Self::canonical(self.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn features(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.0
            .binary_search_by(|probe| probe.as_str().cmp(feature))
            .is_ok()
    }

    /// Returns a new subset with `feature` inserted at its canonical position.
    /// Adding a feature that is already present returns an unchanged copy.
    pub fn with_feature(&self, feature: &str) -> Self {
        let mut features = self.0.clone();
        if let Err(pos) = features.binary_search_by(|probe| probe.as_str().cmp(feature)) {
            features.insert(pos, feature.to_string());
        }
        Self(features)
    }

    /// The comma-joined canonical form used on disk.
    pub fn join(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

/// A subset together with the fitness the scoring function assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSubset {
    pub subset: Subset,
    pub score: f64,
}

/// The complete, immutable result of one iteration of a search run.
///
/// Entries are held in canonical subset order, which is what score ties fall
/// back to in [`IterationRecord::ranked`]. Ranking therefore never depends on
/// the line order of a checkpoint file.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    iteration: usize,
    entries: Vec<ScoredSubset>,
}

impl IterationRecord {
    pub fn new(iteration: usize, mut entries: Vec<ScoredSubset>) -> Self {
        entries.sort_by(|a, b| a.subset.cmp(&b.subset));
        Self { iteration, entries }
    }

    #[inline]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn entries(&self) -> &[ScoredSubset] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by score, highest first. The sort is stable, so equal
    /// scores keep their canonical subset order.
    pub fn ranked(&self) -> Vec<&ScoredSubset> {
        let mut ranked: Vec<&ScoredSubset> = self.entries.iter().collect();
        ranked.sort_by(|a, b| descending(a.score, b.score));
        ranked
    }

    pub fn best(&self) -> Option<&ScoredSubset> {
        self.entries
            .iter()
            .reduce(|best, next| if next.score > best.score { next } else { best })
    }
}

#[inline]
fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}
