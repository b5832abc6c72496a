//! A small feed-forward neural network classifier.
//!
//! Hidden layers use the configured activations and inverted dropout; the
//! output layer is a softmax trained with cross-entropy by mini-batch SGD.
//! All randomness (initialisation, shuffling, dropout masks) comes from the
//! generator handed to `fit`.

use super::model::{Activation, MlpConfig};
use super::{argmax_rows, check_training_inputs, cross_entropy, one_hot, softmax_rows};
use crate::evaluate::{Classifier, ClassifierError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| v.max(0.0)),
            Self::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Self::Tanh => z.mapv(f64::tanh),
            Self::Linear => z.clone(),
        }
    }

    /// Derivative with respect to the pre-activation, given pre-activation `z`
    /// and the activation output `a`.
    fn derivative(self, z: &Array2<f64>, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Self::Sigmoid => a.mapv(|s| s * (1.0 - s)),
            Self::Tanh => a.mapv(|t| 1.0 - t * t),
            Self::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

#[derive(Debug, Clone)]
struct Layer {
    /// Shape `[fan_in, fan_out]`.
    weights: Array2<f64>,
    bias: Array1<f64>,
    /// `None` marks the softmax output layer.
    activation: Option<Activation>,
}

impl Layer {
    /// Glorot-uniform initialisation.
    fn new(fan_in: usize, fan_out: usize, activation: Option<Activation>, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(fan_out),
            activation,
        }
    }

    fn pre_activation(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

/// What the forward pass keeps for backpropagation, per hidden layer.
struct Trace {
    pre_activation: Array2<f64>,
    activation: Array2<f64>,
    mask: Option<Array2<f64>>,
}

#[derive(Debug, Clone)]
pub struct Mlp {
    config: MlpConfig,
    layers: Vec<Layer>,
}

impl Mlp {
    pub fn new(config: MlpConfig) -> Self {
        Self {
            config,
            layers: Vec::new(),
        }
    }

    fn build_layers(&mut self, n_features: usize, n_classes: usize, rng: &mut StdRng) {
        let mut widths = Vec::with_capacity(self.config.layers.len() + 2);
        widths.push(n_features);
        widths.extend_from_slice(&self.config.layers);
        widths.push(n_classes);

        self.layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = self.config.activations.get(i).copied();
                Layer::new(pair[0], pair[1], activation, rng)
            })
            .collect();
    }

    /// Inference-mode forward pass: no dropout, softmax probabilities out.
    fn forward(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut current = x.to_owned();
        for layer in &self.layers {
            let z = layer.pre_activation(&current);
            current = match layer.activation {
                Some(activation) => activation.apply(&z),
                None => z,
            };
        }
        softmax_rows(&mut current);
        current
    }

    /// One SGD step on a mini-batch. Returns the batch loss.
    fn train_batch(&mut self, xb: &Array2<f64>, yb: &Array2<f64>, rng: &mut StdRng) -> f64 {
        let keep = 1.0 - self.config.dropout;
        let hidden = self.layers.len() - 1;

        let mut inputs: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len());
        let mut traces: Vec<Trace> = Vec::with_capacity(hidden);
        let mut current = xb.clone();

        for layer in &self.layers[..hidden] {
            inputs.push(current.clone());
            let pre_activation = layer.pre_activation(&current);
            let activation = layer
                .activation
                .unwrap_or(Activation::Linear)
                .apply(&pre_activation);
            let mask = (self.config.dropout > 0.0).then(|| {
                Array2::from_shape_fn(activation.raw_dim(), |_| {
                    if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 }
                })
            });
            current = match &mask {
                Some(mask) => &activation * mask,
                None => activation.clone(),
            };
            traces.push(Trace {
                pre_activation,
                activation,
                mask,
            });
        }
        inputs.push(current.clone());

        let mut probabilities = self.layers[hidden].pre_activation(&current);
        softmax_rows(&mut probabilities);
        let loss = cross_entropy(&probabilities, yb);

        let batch = xb.nrows() as f64;
        let mut delta = (&probabilities - yb) / batch;

        for index in (0..self.layers.len()).rev() {
            let grad_w = inputs[index].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));

            if index > 0 {
                let trace = &traces[index - 1];
                let mut upstream = delta.dot(&self.layers[index].weights.t());
                if let Some(mask) = &trace.mask {
                    upstream *= mask;
                }
                let activation = self.layers[index - 1]
                    .activation
                    .unwrap_or(Activation::Linear);
                upstream *= &activation.derivative(&trace.pre_activation, &trace.activation);
                delta = upstream;
            }

            let layer = &mut self.layers[index];
            layer.weights.scaled_add(-self.config.lr, &grad_w);
            layer.bias.scaled_add(-self.config.lr, &grad_b);
        }

        loss
    }

    fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .all(|layer| layer.weights.iter().all(|w| w.is_finite()))
    }
}

impl Classifier for Mlp {
    fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        n_classes: usize,
        rng: &mut StdRng,
    ) -> Result<(), ClassifierError> {
        check_training_inputs(x, y, n_classes)?;
        self.build_layers(x.ncols(), n_classes, rng);

        let targets = one_hot(y, n_classes);
        let mut order: Vec<usize> = (0..x.nrows()).collect();

        for epoch in 0..self.config.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            let mut batches = 0usize;

            for chunk in order.chunks(self.config.batch_size) {
                let xb = x.select(Axis(0), chunk);
                let yb = targets.select(Axis(0), chunk);
                epoch_loss += self.train_batch(&xb, &yb, rng);
                batches += 1;
            }

            if !self.is_finite() {
                return Err(ClassifierError::Diverged { epoch });
            }
            if self.config.verbose {
                log::debug!(
                    "mlp epoch {}/{}: loss {:.4}",
                    epoch + 1,
                    self.config.epochs,
                    epoch_loss / batches.max(1) as f64
                );
            }
        }

        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>, ClassifierError> {
        let first = self.layers.first().ok_or(ClassifierError::NotFitted)?;
        if x.ncols() != first.weights.nrows() {
            return Err(ClassifierError::FeatureCountMismatch {
                expected: first.weights.nrows(),
                found: x.ncols(),
            });
        }
        Ok(argmax_rows(&self.forward(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn config(dropout: f64) -> MlpConfig {
        MlpConfig {
            layers: vec![8],
            activations: vec![Activation::Tanh],
            dropout,
            lr: 0.5,
            epochs: 2000,
            batch_size: 4,
            verbose: false,
        }
    }

    fn xor() -> (Array2<f64>, Array1<usize>) {
        (
            array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
            array![0usize, 1, 1, 0],
        )
    }

    #[test]
    fn learns_xor() {
        let (x, y) = xor();
        let mut model = Mlp::new(config(0.0));
        model
            .fit(x.view(), y.view(), 2, &mut StdRng::seed_from_u64(17))
            .unwrap();
        assert_eq!(model.predict(x.view()).unwrap().to_vec(), y.to_vec());
    }

    #[test]
    fn same_seed_same_model() {
        let (x, y) = xor();
        let mut a = Mlp::new(config(0.2));
        let mut b = Mlp::new(config(0.2));
        a.fit(x.view(), y.view(), 2, &mut StdRng::seed_from_u64(5)).unwrap();
        b.fit(x.view(), y.view(), 2, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a.forward(x.view()), b.forward(x.view()));
    }

    #[test]
    fn probabilities_are_normalised() {
        let (x, y) = xor();
        let mut model = Mlp::new(MlpConfig {
            epochs: 3,
            ..config(0.0)
        });
        model
            .fit(x.view(), y.view(), 2, &mut StdRng::seed_from_u64(1))
            .unwrap();
        for row in model.forward(x.view()).axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unfitted_model_refuses_to_predict() {
        let model = Mlp::new(config(0.0));
        let (x, _) = xor();
        assert!(matches!(model.predict(x.view()), Err(ClassifierError::NotFitted)));
    }
}
