//! Named gene sets: the seeds of independent search runs.
//!
//! A gene-set file holds one set per line, `name<TAB>gene1<TAB>gene2...`.
//! Genes the dataset does not measure are filtered out before a run starts and
//! the loss is reported. Random gene sets of chosen sizes can be drawn from the
//! dataset's own columns to act as a baseline.

use super::Dataset;
use ahash::AHashSet;
use rand::Rng;
use rand::seq::index;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneSet {
    pub name: String,
    pub genes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GeneSetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {0} of the gene-set file has an empty set name.")]
    EmptyName(usize),
    #[error("Line {line}: the gene set name '{name}' cannot be used as a run directory name.")]
    UnsafeName { line: usize, name: String },
    #[error("The gene set '{0}' is defined more than once.")]
    DuplicateName(String),
    #[error("Random set size {size} is invalid; it must lie in 1..={available}.")]
    InvalidSize { size: usize, available: usize },
    #[error("Random range {low}..={high} is invalid for a dataset with {available} genes.")]
    InvalidRange {
        low: usize,
        high: usize,
        available: usize,
    },
    #[error("Random set sizes need either an explicit range or a gene-set file to copy sizes from.")]
    NoSizeSource,
}

/// How many distinct gene-set identifiers were not found in the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterReport {
    pub missing: usize,
    pub total: usize,
}

impl FilterReport {
    pub fn percent_missing(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.missing as f64 / self.total as f64 * 100.0
        }
    }
}

impl fmt::Display for FilterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({:.1}%) genes from gene sets were not found in the input dataset",
            self.missing,
            self.total,
            self.percent_missing()
        )
    }
}

/// Each set is searched under `<logdir>/<name>`, so a name must stay one path component.
fn is_directory_safe(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

pub fn load_gene_sets(path: &Path) -> Result<Vec<GeneSet>, GeneSetError> {
    let reader = BufReader::new(File::open(path)?);
    let mut names = AHashSet::new();
    let mut sets = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(GeneSetError::EmptyName(i + 1));
        }
        if !is_directory_safe(name) {
            return Err(GeneSetError::UnsafeName {
                line: i + 1,
                name: name.to_string(),
            });
        }
        if !names.insert(name.to_string()) {
            return Err(GeneSetError::DuplicateName(name.to_string()));
        }

        let genes = fields
            .map(str::trim)
            .filter(|gene| !gene.is_empty())
            .map(str::to_string)
            .collect();
        sets.push(GeneSet {
            name: name.to_string(),
            genes,
        });
    }

    log::info!("loaded {} gene sets from '{}'", sets.len(), path.display());
    Ok(sets)
}

/// Restricts every set to genes measured by the dataset.
///
/// Genes keep their original order, repeats within a set are dropped, and
/// sets left without any gene are removed with a warning.
pub fn filter_to_dataset(sets: Vec<GeneSet>, dataset: &Dataset) -> (Vec<GeneSet>, FilterReport) {
    let mut all_genes: AHashSet<&str> = AHashSet::new();
    for set in &sets {
        all_genes.extend(set.genes.iter().map(String::as_str));
    }
    let report = FilterReport {
        missing: all_genes
            .iter()
            .filter(|gene| !dataset.contains_gene(gene))
            .count(),
        total: all_genes.len(),
    };

    let filtered = sets
        .iter()
        .filter_map(|set| {
            let mut seen = AHashSet::new();
            let genes: Vec<String> = set
                .genes
                .iter()
                .filter(|gene| dataset.contains_gene(gene) && seen.insert(gene.as_str()))
                .cloned()
                .collect();
            if genes.is_empty() {
                log::warn!(
                    "gene set '{}' has no genes in the dataset and will be skipped",
                    set.name
                );
                return None;
            }
            Some(GeneSet {
                name: set.name.clone(),
                genes,
            })
        })
        .collect();

    (filtered, report)
}

/// Decides which random set sizes to draw.
///
/// An explicit inclusive range wins; otherwise the distinct sizes of `sets` are used.
pub fn random_set_sizes(
    range: Option<(usize, usize)>,
    sets: &[GeneSet],
    available: usize,
) -> Result<Vec<usize>, GeneSetError> {
    match range {
        Some((low, high)) => {
            if low == 0 || low > high || high > available {
                return Err(GeneSetError::InvalidRange {
                    low,
                    high,
                    available,
                });
            }
            Ok((low..=high).collect())
        }
        None if sets.is_empty() => Err(GeneSetError::NoSizeSource),
        None => {
            let mut sizes: Vec<usize> = sets.iter().map(|set| set.genes.len()).collect();
            sizes.sort_unstable();
            sizes.dedup();
            Ok(sizes)
        }
    }
}

/// Draws one set named `random-<n>` per requested size, sampling genes without replacement.
pub fn random_gene_sets<R>(
    sizes: &[usize],
    genes: &[String],
    rng: &mut R,
) -> Result<Vec<GeneSet>, GeneSetError>
where
    R: Rng + ?Sized,
{
    sizes
        .iter()
        .map(|&size| {
            if size == 0 || size > genes.len() {
                return Err(GeneSetError::InvalidSize {
                    size,
                    available: genes.len(),
                });
            }
            let picked = index::sample(rng, genes.len(), size)
                .into_iter()
                .map(|i| genes[i].clone())
                .collect();
            Ok(GeneSet {
                name: format!("random-{size}"),
                genes: picked,
            })
        })
        .collect()
}
