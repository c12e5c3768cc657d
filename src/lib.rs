//! Alzheimer's stage prediction service.
//!
//! A JSON-over-HTTP backend that validates a 32-field clinical record,
//! standardises it with a pre-fit scaler and runs a pre-trained multiclass
//! classifier to produce a stage with advice. Alongside it sit a rule-based
//! symptom matcher, a vitals score, username/password accounts and a
//! statistics endpoint.

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod error;
pub mod features;
pub mod insights;
pub mod model;
pub mod routes;
pub mod scaler;
pub mod stage;
pub mod stats;
pub mod symptoms;

pub use config::ServiceConfig;
pub use features::{FeatureVector, FEATURES, FEATURE_COUNT};
pub use routes::{app, router, AppState};
pub use stage::{derive_stage, InferenceHandle, StageLabel, StagePipeline, StageResult};
