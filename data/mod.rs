//! # Dataset and Label Loading
//!
//! This module is the entry point for user-provided expression data. It reads
//! a samples × genes TSV matrix and a per-sample label file, validates both,
//! and turns them into the `ndarray` structures the scoring harness works on.
//!
//! - Layout: the first dataset column holds sample identifiers; every other
//!   column is one gene and must be numeric, complete and finite.
//! - Labels are aligned to the dataset by sample identifier and encoded to
//!   `0..n_classes` in sorted label order.

pub mod genesets;

use ahash::{AHashMap, AHashSet};
use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A validated expression matrix, shape `[n_samples, n_genes]`.
#[derive(Debug)]
pub struct Dataset {
    samples: Vec<String>,
    genes: Vec<String>,
    column_of: AHashMap<String, usize>,
    values: Array2<f64>,
}

/// Per-sample class labels, aligned to a [`Dataset`].
#[derive(Debug, Clone)]
pub struct Labels {
    classes: Vec<String>,
    encoded: Array1<usize>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error reading the label file: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The dataset has no gene columns. Expected a sample column followed by one column per gene.")]
    NoGeneColumns,
    #[error("The dataset contains no samples.")]
    EmptyDataset,
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("The gene '{0}' appears more than once in the dataset header.")]
    DuplicateGene(String),
    #[error("The sample '{0}' appears more than once in the dataset.")]
    DuplicateSample(String),
    #[error("Value matrix is {rows}x{cols}, but {samples} samples and {genes} genes were named.")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        samples: usize,
        genes: usize,
    },
    #[error("Line {line} of the label file has {fields} field(s); expected 'sample<TAB>label'.")]
    MalformedLabelLine { line: usize, fields: usize },
    #[error("The sample '{0}' is listed more than once in the label file.")]
    DuplicateLabel(String),
    #[error("The sample '{0}' has no entry in the label file.")]
    MissingLabel(String),
    #[error("At least two distinct labels are required to train a classifier, found {0}.")]
    TooFewClasses(usize),
}

impl Dataset {
    pub fn new(
        samples: Vec<String>,
        genes: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, DataError> {
        let (rows, cols) = values.dim();
        if rows != samples.len() || cols != genes.len() {
            return Err(DataError::ShapeMismatch {
                rows,
                cols,
                samples: samples.len(),
                genes: genes.len(),
            });
        }
        if genes.is_empty() {
            return Err(DataError::NoGeneColumns);
        }
        if samples.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        let mut seen_samples = AHashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen_samples.insert(sample.as_str()) {
                return Err(DataError::DuplicateSample(sample.clone()));
            }
        }

        let mut column_of = AHashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            if column_of.insert(gene.clone(), i).is_some() {
                return Err(DataError::DuplicateGene(gene.clone()));
            }
            if values.column(i).iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(gene.clone()));
            }
        }

        Ok(Self {
            samples,
            genes,
            column_of,
            values,
        })
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn column_index(&self, gene: &str) -> Option<usize> {
        self.column_of.get(gene).copied()
    }

    pub fn contains_gene(&self, gene: &str) -> bool {
        self.column_of.contains_key(gene)
    }
}

impl Labels {
    /// Encodes raw labels, one per sample, to `0..n_classes` in sorted label order.
    pub fn encode<S: AsRef<str>>(raw: &[S]) -> Result<Self, DataError> {
        let mut classes: Vec<String> = raw.iter().map(|s| s.as_ref().to_string()).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(DataError::TooFewClasses(classes.len()));
        }

        let encoded = raw
            .iter()
            .map(|label| {
                classes
                    .binary_search_by(|probe| probe.as_str().cmp(label.as_ref()))
                    .unwrap_or_default()
            })
            .collect::<Array1<usize>>();

        Ok(Self { classes, encoded })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encoded(&self) -> &Array1<usize> {
        &self.encoded
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

/// Loads and validates a samples × genes TSV matrix.
pub fn load_dataset(path: &Path) -> Result<Dataset, DataError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let (sample_column, gene_columns) = names.split_first().ok_or(DataError::NoGeneColumns)?;
    if gene_columns.is_empty() {
        return Err(DataError::NoGeneColumns);
    }
    if df.height() == 0 {
        return Err(DataError::EmptyDataset);
    }

    let samples = internal::extract_string_column(&df, sample_column)?;
    let n_samples = samples.len();

    // Column-major buffer: each gene column is appended whole.
    let mut buffer = Vec::with_capacity(n_samples * gene_columns.len());
    for gene in gene_columns {
        let mut column = internal::extract_numeric_column(&df, gene)?;
        buffer.append(&mut column);
    }

    let values = Array2::from_shape_vec((n_samples, gene_columns.len()).f(), buffer).map_err(
        |_| DataError::ShapeMismatch {
            rows: n_samples,
            cols: gene_columns.len(),
            samples: n_samples,
            genes: gene_columns.len(),
        },
    )?;

    log::info!(
        "loaded dataset '{}' ({} genes, {} samples)",
        path.display(),
        gene_columns.len(),
        n_samples
    );

    Dataset::new(samples, gene_columns.to_vec(), values)
}

/// Loads a headerless `sample<TAB>label` file and aligns it to `samples`.
///
/// Entries for samples that are not in the dataset are ignored.
pub fn load_labels(path: &Path, samples: &[String]) -> Result<Labels, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut by_sample: AHashMap<String, String> = AHashMap::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 2 {
            return Err(DataError::MalformedLabelLine {
                line: i + 1,
                fields: record.len(),
            });
        }
        let sample = record[0].trim().to_string();
        let label = record[1].trim().to_string();
        if by_sample.insert(sample.clone(), label).is_some() {
            return Err(DataError::DuplicateLabel(sample));
        }
    }

    let aligned = samples
        .iter()
        .map(|sample| {
            by_sample
                .get(sample)
                .map(String::as_str)
                .ok_or_else(|| DataError::MissingLabel(sample.clone()))
        })
        .collect::<Result<Vec<&str>, DataError>>()?;

    let ignored = by_sample.len() - aligned.len();
    if ignored > 0 {
        log::debug!("{ignored} labelled samples are not present in the dataset");
    }

    Labels::encode(&aligned)
}

/// Internal helpers shared by the loaders.
mod internal {
    use super::*;

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    pub(super) fn extract_string_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<String>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = series.cast(&DataType::String)?;
        let mut values = Vec::with_capacity(casted.len());
        for value in casted.str()?.into_iter() {
            match value {
                Some(text) => values.push(text.to_string()),
                None => return Err(DataError::MissingValuesFound(column_name.to_string())),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn dataset_rejects_mismatched_shapes() {
        let err = Dataset::new(names("s", 2), names("g", 3), Array2::zeros((2, 2))).unwrap_err();
        assert!(matches!(err, DataError::ShapeMismatch { .. }));
    }

    #[test]
    fn dataset_rejects_duplicate_genes_and_non_finite_values() {
        let genes = vec!["A".to_string(), "A".to_string()];
        let err = Dataset::new(names("s", 1), genes, Array2::zeros((1, 2))).unwrap_err();
        assert!(matches!(err, DataError::DuplicateGene(g) if g == "A"));

        let values = array![[1.0, f64::NAN]];
        let err = Dataset::new(names("s", 1), names("g", 2), values).unwrap_err();
        assert!(matches!(err, DataError::NonFiniteValuesFound(g) if g == "g1"));
    }

    #[test]
    fn dataset_indexes_columns_by_gene() {
        let dataset =
            Dataset::new(names("s", 2), names("g", 3), array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
                .unwrap();
        assert_eq!(dataset.column_index("g2"), Some(2));
        assert_eq!(dataset.column_index("zz"), None);
        assert_eq!(dataset.n_samples(), 2);
        assert_eq!(dataset.n_genes(), 3);
    }

    #[test]
    fn labels_encode_in_sorted_order() {
        let labels = Labels::encode(&["tumor", "normal", "tumor", "metastasis"]).unwrap();
        assert_eq!(labels.classes(), &["metastasis", "normal", "tumor"]);
        assert_eq!(labels.encoded().to_vec(), vec![2, 1, 2, 0]);
        assert_eq!(labels.n_classes(), 3);
    }

    #[test]
    fn single_class_is_rejected() {
        let err = Labels::encode(&["a", "a"]).unwrap_err();
        assert!(matches!(err, DataError::TooFewClasses(1)));
    }
}
