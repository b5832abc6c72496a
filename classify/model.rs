//! Model configuration: which classifier scores the subsets, and how it trains.
//!
//! The configuration is a TOML file with one optional table per classifier
//! family:
//!
//! ```toml
//! [mlp]
//! layers = [64, 32]
//! activations = ["relu", "relu"]
//! dropout = 0.1
//! lr = 0.01
//! epochs = 50
//! batch_size = 32
//!
//! [logistic]
//! lr = 0.5
//! epochs = 300
//! l2 = 1e-4
//! ```

use super::logistic::LogisticRegression;
use super::mlp::Mlp;
use crate::evaluate::{Classifier, ClassifierFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelConfigError {
    #[error("I/O error while reading the model configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the model configuration from TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("The model configuration has no [{0}] table.")]
    MissingSection(&'static str),
    #[error("Unknown model '{0}'. Expected 'mlp' or 'logistic'.")]
    UnknownModel(String),
    #[error("Invalid [{section}] configuration: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Mlp,
    Logistic,
}

impl ModelKind {
    pub fn section(self) -> &'static str {
        match self {
            Self::Mlp => "mlp",
            Self::Logistic => "logistic",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

impl FromStr for ModelKind {
    type Err = ModelConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mlp" => Ok(Self::Mlp),
            "logistic" | "logreg" => Ok(Self::Logistic),
            other => Err(ModelConfigError::UnknownModel(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MlpConfig {
    /// Width of every hidden layer.
    pub layers: Vec<usize>,
    /// Activation of every hidden layer; the output layer is always softmax.
    pub activations: Vec<Activation>,
    #[serde(default)]
    pub dropout: f64,
    pub lr: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Log the training loss of every epoch at debug level.
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticConfig {
    pub lr: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            lr: 0.5,
            epochs: 300,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub mlp: Option<MlpConfig>,
    pub logistic: Option<LogisticConfig>,
}

impl MlpConfig {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        let invalid = |reason: String| ModelConfigError::Invalid {
            section: "mlp",
            reason,
        };
        if self.layers.len() != self.activations.len() {
            return Err(invalid(format!(
                "{} layer widths but {} activations",
                self.layers.len(),
                self.activations.len()
            )));
        }
        if self.layers.contains(&0) {
            return Err(invalid("layer widths must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid(format!("dropout {} is outside [0, 1)", self.dropout)));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(invalid(format!("learning rate {} must be positive", self.lr)));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(invalid("epochs and batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

impl LogisticConfig {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        let invalid = |reason: String| ModelConfigError::Invalid {
            section: "logistic",
            reason,
        };
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(invalid(format!("learning rate {} must be positive", self.lr)));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs must be positive".to_string()));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(invalid(format!("l2 penalty {} must be non-negative", self.l2)));
        }
        Ok(())
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ModelConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml(&toml_string)
    }

    pub fn from_toml(toml_string: &str) -> Result<Self, ModelConfigError> {
        Ok(toml::from_str(toml_string)?)
    }

    /// A factory for the requested classifier family, validated up front.
    pub fn factory(&self, kind: ModelKind) -> Result<Arc<dyn ClassifierFactory>, ModelConfigError> {
        match kind {
            ModelKind::Mlp => {
                let config = self
                    .mlp
                    .clone()
                    .ok_or(ModelConfigError::MissingSection("mlp"))?;
                config.validate()?;
                Ok(Arc::new(MlpFactory { config }))
            }
            ModelKind::Logistic => {
                let config = self
                    .logistic
                    .clone()
                    .ok_or(ModelConfigError::MissingSection("logistic"))?;
                config.validate()?;
                Ok(Arc::new(LogisticFactory { config }))
            }
        }
    }
}

/// Reads a model configuration file and builds the factory for `kind`.
pub fn load_classifier(
    path: &Path,
    kind: ModelKind,
) -> Result<Arc<dyn ClassifierFactory>, ModelConfigError> {
    ModelConfig::load(path)?.factory(kind)
}

pub struct MlpFactory {
    config: MlpConfig,
}

impl ClassifierFactory for MlpFactory {
    fn name(&self) -> &str {
        "mlp"
    }

    fn build(&self) -> Box<dyn Classifier> {
        Box::new(Mlp::new(self.config.clone()))
    }
}

pub struct LogisticFactory {
    config: LogisticConfig,
}

impl ClassifierFactory for LogisticFactory {
    fn name(&self) -> &str {
        "logistic"
    }

    fn build(&self) -> Box<dyn Classifier> {
        Box::new(LogisticRegression::new(self.config.clone()))
    }
}
