//! Built-in classifiers used to score gene subsets, and the model
//! configuration that selects one of them.

pub mod logistic;
pub mod mlp;
pub mod model;

pub use model::{ModelConfig, ModelConfigError, ModelKind, load_classifier};

use crate::evaluate::ClassifierError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Validates the arguments shared by every `fit` implementation.
pub(crate) fn check_training_inputs(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    n_classes: usize,
) -> Result<(), ClassifierError> {
    if x.nrows() != y.len() {
        return Err(ClassifierError::ShapeMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    if y.is_empty() {
        return Err(ClassifierError::NoSamples);
    }
    if n_classes < 2 {
        return Err(ClassifierError::TooFewClasses(n_classes));
    }
    if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
        return Err(ClassifierError::UnsupportedLabel { label, n_classes });
    }
    Ok(())
}

pub(crate) fn one_hot(y: ArrayView1<usize>, n_classes: usize) -> Array2<f64> {
    let mut encoded = Array2::zeros((y.len(), n_classes));
    for (row, &label) in y.iter().enumerate() {
        encoded[[row, label]] = 1.0;
    }
    encoded
}

/// Numerically stable row-wise softmax, in place.
pub(crate) fn softmax_rows(logits: &mut Array2<f64>) {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

/// Index of the largest entry of every row. Ties resolve to the lowest index.
pub(crate) fn argmax_rows(scores: &Array2<f64>) -> Array1<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 { (i, v) } else { best }
                })
                .0
        })
        .collect()
}

/// Mean cross-entropy of `probabilities` against one-hot `targets`.
pub(crate) fn cross_entropy(probabilities: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    let n = probabilities.nrows().max(1) as f64;
    -probabilities
        .iter()
        .zip(targets.iter())
        .filter(|(_, t)| **t > 0.0)
        .map(|(p, _)| p.max(1e-12).ln())
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut logits = array![[1.0, 2.0, 3.0], [1000.0, 1000.0, -1000.0]];
        softmax_rows(&mut logits);
        for row in logits.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(logits[[1, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        let scores = array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0]];
        assert_eq!(argmax_rows(&scores).to_vec(), vec![1, 0]);
    }

    #[test]
    fn labels_outside_the_class_range_are_rejected() {
        let x = Array2::<f64>::zeros((2, 1));
        let y = array![0usize, 3];
        let err = check_training_inputs(x.view(), y.view(), 2).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::UnsupportedLabel {
                label: 3,
                n_classes: 2
            }
        ));
    }

    #[test]
    fn one_hot_marks_a_single_column() {
        let y = array![2usize, 0];
        assert_eq!(one_hot(y.view(), 3), array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
    }
}
