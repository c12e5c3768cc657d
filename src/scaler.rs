//! Pre-fit per-feature standardisation, `(x - mean) / scale`.

use serde::Deserialize;
use thiserror::Error;

use crate::features::{FeatureVector, FEATURES, FEATURE_COUNT};

#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("failed to parse scaler artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scaler {what} has {got} entries, expected 32")]
    Width { what: &'static str, got: usize },
    #[error("scaler feature {index} is {got:?}, expected {expected:?}")]
    FeatureOrder {
        index: usize,
        expected: &'static str,
        got: String,
    },
    #[error("scaler has zero scale for feature {feature}; the artifact was not fit correctly")]
    ZeroScale { feature: &'static str },
    #[error("scaler has a non-finite {what} for feature {feature}")]
    NonFinite {
        what: &'static str,
        feature: &'static str,
    },
}

/// On-disk shape of a `StandardScaler` export.
#[derive(Debug, Deserialize)]
struct ScalerJson {
    #[serde(default)]
    feature_names: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Immutable once built; construction is the only place it is validated.
#[derive(Debug, Clone)]
pub struct ScalingParameters {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl ScalingParameters {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ScalerError> {
        if mean.len() != FEATURE_COUNT {
            return Err(ScalerError::Width { what: "mean", got: mean.len() });
        }
        if scale.len() != FEATURE_COUNT {
            return Err(ScalerError::Width { what: "scale", got: scale.len() });
        }
        for (i, spec) in FEATURES.iter().enumerate() {
            if !mean[i].is_finite() {
                return Err(ScalerError::NonFinite { what: "mean", feature: spec.name });
            }
            if !scale[i].is_finite() {
                return Err(ScalerError::NonFinite { what: "scale", feature: spec.name });
            }
            if scale[i] == 0.0 {
                return Err(ScalerError::ZeroScale { feature: spec.name });
            }
        }
        Ok(Self { mean, scale })
    }

    pub fn from_json(json: &str) -> Result<Self, ScalerError> {
        let raw: ScalerJson = serde_json::from_str(json)?;
        if !raw.feature_names.is_empty() {
            if raw.feature_names.len() != FEATURE_COUNT {
                return Err(ScalerError::Width {
                    what: "feature_names",
                    got: raw.feature_names.len(),
                });
            }
            for (index, (got, spec)) in raw.feature_names.iter().zip(FEATURES.iter()).enumerate() {
                if got != spec.name {
                    return Err(ScalerError::FeatureOrder {
                        index,
                        expected: spec.name,
                        got: got.clone(),
                    });
                }
            }
        }
        Self::new(raw.mean, raw.scale)
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &FeatureVector) -> Vec<f64> {
        x.as_slice()
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}
