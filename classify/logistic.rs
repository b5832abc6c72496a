//! Multinomial (softmax) logistic regression fitted by full-batch gradient
//! descent with an L2 penalty on the weights.

use super::model::LogisticConfig;
use super::{argmax_rows, check_training_inputs, one_hot, softmax_rows};
use crate::evaluate::{Classifier, ClassifierError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
struct Parameters {
    /// Shape `[n_features, n_classes]`.
    weights: Array2<f64>,
    bias: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    config: LogisticConfig,
    parameters: Option<Parameters>,
}

impl LogisticRegression {
    pub fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            parameters: None,
        }
    }

    fn logits(parameters: &Parameters, x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&parameters.weights) + &parameters.bias
    }
}

impl Classifier for LogisticRegression {
    fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        n_classes: usize,
        rng: &mut StdRng,
    ) -> Result<(), ClassifierError> {
        // Zero initialisation; the optimum of a convex loss needs no randomness.
        let _ = rng;
        check_training_inputs(x, y, n_classes)?;

        let (n, d) = x.dim();
        let targets = one_hot(y, n_classes);
        let mut parameters = Parameters {
            weights: Array2::zeros((d, n_classes)),
            bias: Array1::zeros(n_classes),
        };
        let scale = 1.0 / n as f64;

        for epoch in 0..self.config.epochs {
            let mut residual = Self::logits(&parameters, x);
            softmax_rows(&mut residual);
            residual -= &targets;

            let grad_w = x.t().dot(&residual) * scale + &parameters.weights * self.config.l2;
            let grad_b = residual.sum_axis(Axis(0)) * scale;

            parameters.weights.scaled_add(-self.config.lr, &grad_w);
            parameters.bias.scaled_add(-self.config.lr, &grad_b);

            if !parameters.weights.iter().all(|w| w.is_finite()) {
                return Err(ClassifierError::Diverged { epoch });
            }
        }

        self.parameters = Some(parameters);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>, ClassifierError> {
        let parameters = self.parameters.as_ref().ok_or(ClassifierError::NotFitted)?;
        if x.ncols() != parameters.weights.nrows() {
            return Err(ClassifierError::FeatureCountMismatch {
                expected: parameters.weights.nrows(),
                found: x.ncols(),
            });
        }
        Ok(argmax_rows(&Self::logits(parameters, x)))
    }
}
