//! Stage Inference Pipeline: rescale, classify, label, advise.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, enabled, error, info, Level};

use crate::artifacts::{load_model, load_scaler, ArtifactStore, ModelFormat};
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::model::{ClassifierModel, ModelError};
use crate::scaler::ScalingParameters;

pub const STAGE_COUNT: usize = 4;

/// Ordinal Alzheimer's stage. The discriminant is the class index the
/// classifier emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageLabel {
    None = 0,
    Low = 1,
    Mild = 2,
    High = 3,
}

impl StageLabel {
    pub const ALL: [StageLabel; STAGE_COUNT] =
        [StageLabel::None, StageLabel::Low, StageLabel::Mild, StageLabel::High];

    pub fn from_code(code: usize) -> Option<Self> {
        Self::ALL.get(code).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn title(self) -> &'static str {
        match self {
            StageLabel::None => "No Alzheimer's",
            StageLabel::Low => "Low Level Alzheimer's",
            StageLabel::Mild => "Mild Alzheimer's",
            StageLabel::High => "High Stage Alzheimer's",
        }
    }

    pub fn advice(self) -> &'static [&'static str] {
        match self {
            StageLabel::None => &[
                "Keep up the healthy lifestyle!",
                "Regular checkups are recommended.",
            ],
            StageLabel::Low => &[
                "Early signs detected. Consult a doctor for preventive measures.",
                "Focus on cognitive exercises and diet.",
            ],
            StageLabel::Mild => &[
                "Mild symptoms detected. Medical intervention is recommended.",
                "Ensure safety in daily activities.",
            ],
            StageLabel::High => &[
                "High stage detected. Immediate specialist consultation required.",
                "Full-time care or supervision may be needed.",
            ],
        }
    }
}

// ---------- Offline label derivation ----------

pub const LOW_STAGE_MIN_MMSE: f64 = 21.0;
pub const MILD_STAGE_MIN_MMSE: f64 = 10.0;

/// Ground-truth stage used when building a training set.
///
/// Undiagnosed rows are stage 0 whatever their MMSE. Diagnosed rows split on
/// MMSE: `>= 21` low, `[10, 21)` mild, `< 10` high.
///
/// Because MMSE is also one of the 32 inputs, a model fit on these labels can
/// recover the cutpoints from that one column alone. Evaluate with MMSE
/// ablated before trusting the other features.
pub fn derive_stage(diagnosed: bool, mmse: f64) -> StageLabel {
    if !diagnosed {
        StageLabel::None
    } else if mmse >= LOW_STAGE_MIN_MMSE {
        StageLabel::Low
    } else if mmse >= MILD_STAGE_MIN_MMSE {
        StageLabel::Mild
    } else {
        StageLabel::High
    }
}

/// Class tally over derived labels, used to size oversampling before a fit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub counts: [usize; STAGE_COUNT],
}

impl StageCounts {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (bool, f64)>,
    {
        let mut out = Self::default();
        for (diagnosed, mmse) in rows {
            out.counts[derive_stage(diagnosed, mmse).code() as usize] += 1;
        }
        out
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn majority(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Synthetic rows each class needs to match the majority class.
    pub fn oversampling_deficit(&self) -> [usize; STAGE_COUNT] {
        let m = self.majority();
        self.counts.map(|c| m - c)
    }
}

// ---------- Pipeline ----------

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage model is unavailable: {0}")]
    Unavailable(String),
    #[error("scaler width {scaler} does not match model input width {model}")]
    WidthMismatch { scaler: usize, model: usize },
    #[error("model emits {0} classes, expected 4")]
    ClassCount(usize),
    #[error("model predicted unknown class index {0}")]
    UnknownClass(usize),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    #[serde(rename = "prediction")]
    pub title: &'static str,
    #[serde(rename = "probability")]
    pub confidence: f64,
    #[serde(rename = "suggestions")]
    pub advice: Vec<&'static str>,
    pub stage_code: u8,
    #[serde(skip)]
    pub stage: StageLabel,
    pub probabilities: Vec<f64>,
}

pub struct StagePipeline {
    scaler: Arc<ScalingParameters>,
    model: Arc<dyn ClassifierModel>,
    /// Log every input vector at `info` (`LOG_PRED=1`).
    log_inputs: bool,
}

fn log_pred_enabled(raw: Option<&str>) -> bool {
    raw.map(str::trim) == Some("1")
}

impl StagePipeline {
    pub fn new(
        scaler: Arc<ScalingParameters>,
        model: Arc<dyn ClassifierModel>,
    ) -> Result<Self, PipelineError> {
        if scaler.width() != FEATURE_COUNT || model.n_features() != scaler.width() {
            return Err(PipelineError::WidthMismatch {
                scaler: scaler.width(),
                model: model.n_features(),
            });
        }
        if model.n_classes() != STAGE_COUNT {
            return Err(PipelineError::ClassCount(model.n_classes()));
        }
        let log_inputs = log_pred_enabled(std::env::var("LOG_PRED").ok().as_deref());
        Ok(Self {
            scaler,
            model,
            log_inputs,
        })
    }

    pub fn with_input_logging(mut self, on: bool) -> Self {
        self.log_inputs = on;
        self
    }

    pub fn logs_inputs(&self) -> bool {
        self.log_inputs
    }

    pub fn infer(&self, x: &FeatureVector) -> Result<StageResult, PipelineError> {
        if self.log_inputs {
            info!("stage input {}", x.summary());
        } else if enabled!(Level::DEBUG) {
            debug!("stage input {}", x.summary());
        }
        let scaled = self.scaler.transform(x);
        let (idx, probs) = self.model.predict(&scaled)?;
        let stage = StageLabel::from_code(idx).ok_or(PipelineError::UnknownClass(idx))?;
        let confidence = probs[idx].clamp(0.0, 1.0);
        debug!("stage={} confidence={:.3}", stage.code(), confidence);
        Ok(StageResult {
            title: stage.title(),
            confidence,
            advice: stage.advice().to_vec(),
            stage_code: stage.code(),
            stage,
            probabilities: probs,
        })
    }
}

/// Built once at start-up. When artifacts failed to load, every request is
/// refused with the recorded reason instead of computing partially.
#[derive(Clone)]
pub enum InferenceHandle {
    Ready(Arc<StagePipeline>),
    Unavailable(Arc<str>),
}

impl InferenceHandle {
    pub fn ready(pipeline: StagePipeline) -> Self {
        InferenceHandle::Ready(Arc::new(pipeline))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        InferenceHandle::Unavailable(Arc::from(reason.into()))
    }

    /// Loads scaler and model from `store`. Any failure is logged and kept
    /// as the reason; the process keeps serving the other endpoints.
    pub fn load(
        store: &dyn ArtifactStore,
        scaler_id: &str,
        model_id: &str,
        format: ModelFormat,
    ) -> Self {
        let built = load_scaler(store, scaler_id)
            .map_err(|e| e.to_string())
            .and_then(|scaler| {
                let model = load_model(store, model_id, format).map_err(|e| e.to_string())?;
                StagePipeline::new(Arc::new(scaler), model).map_err(|e| e.to_string())
            });
        match built {
            Ok(p) => {
                info!("stage pipeline ready (scaler={scaler_id}, model={model_id}, format={format})");
                Self::ready(p)
            }
            Err(reason) => {
                error!("stage pipeline unavailable: {reason}");
                Self::unavailable(reason)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, InferenceHandle::Ready(_))
    }

    pub fn pipeline(&self) -> Result<&StagePipeline, PipelineError> {
        match self {
            InferenceHandle::Ready(p) => Ok(p.as_ref()),
            InferenceHandle::Unavailable(reason) => {
                Err(PipelineError::Unavailable(reason.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifactStore;
    use crate::model::tests::mmse_forest_json;
    use crate::model::RandomForest;

    fn identity_pipeline() -> StagePipeline {
        let scaler = ScalingParameters::new(vec![0.0; 32], vec![1.0; 32]).unwrap();
        let forest = RandomForest::from_json(&mmse_forest_json()).unwrap();
        StagePipeline::new(Arc::new(scaler), Arc::new(forest)).unwrap()
    }

    fn vector_with_mmse(mmse: f64) -> FeatureVector {
        let mut v = vec![0.0; 32];
        v[22] = mmse;
        FeatureVector::from_ordered(v).unwrap()
    }

    #[test]
    fn derive_stage_respects_cutpoints() {
        assert_eq!(derive_stage(false, 3.0), StageLabel::None);
        assert_eq!(derive_stage(false, 29.0), StageLabel::None);
        assert_eq!(derive_stage(true, 21.0), StageLabel::Low);
        assert_eq!(derive_stage(true, 30.0), StageLabel::Low);
        assert_eq!(derive_stage(true, 20.99), StageLabel::Mild);
        assert_eq!(derive_stage(true, 10.0), StageLabel::Mild);
        assert_eq!(derive_stage(true, 9.99), StageLabel::High);
        assert_eq!(derive_stage(true, 0.0), StageLabel::High);
    }

    #[test]
    fn stage_counts_report_skew() {
        let rows = [(false, 25.0), (false, 5.0), (false, 12.0), (true, 22.0), (true, 4.0)];
        let c = StageCounts::from_rows(rows);
        assert_eq!(c.counts, [3, 1, 0, 1]);
        assert_eq!(c.total(), 5);
        assert_eq!(c.oversampling_deficit(), [0, 2, 3, 2]);
    }

    #[test]
    fn labels_round_trip_through_codes() {
        for s in StageLabel::ALL {
            assert_eq!(StageLabel::from_code(s.code() as usize), Some(s));
            assert_eq!(s.advice().len(), 2);
        }
        assert_eq!(StageLabel::from_code(4), None);
    }

    #[test]
    fn infer_reports_confidence_at_predicted_class() {
        let p = identity_pipeline();
        let r = p.infer(&vector_with_mmse(15.0)).unwrap();
        assert_eq!(r.stage, StageLabel::Mild);
        assert_eq!(r.stage_code, 2);
        assert_eq!(r.title, "Mild Alzheimer's");
        assert_eq!(r.confidence, r.probabilities[2]);
        assert!((0.0..=1.0).contains(&r.confidence));
        assert_eq!(r.advice, StageLabel::Mild.advice().to_vec());

        let r = p.infer(&vector_with_mmse(3.0)).unwrap();
        assert_eq!(r.stage, StageLabel::High);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn input_logging_follows_log_pred() {
        assert!(log_pred_enabled(Some("1")));
        assert!(log_pred_enabled(Some(" 1 ")));
        assert!(!log_pred_enabled(Some("0")));
        assert!(!log_pred_enabled(Some("")));
        assert!(!log_pred_enabled(None));

        let p = identity_pipeline().with_input_logging(true);
        assert!(p.logs_inputs());
        assert_eq!(p.infer(&vector_with_mmse(15.0)).unwrap().stage_code, 2);
        assert!(!p.with_input_logging(false).logs_inputs());
    }

    #[test]
    fn pipeline_rejects_mismatched_model() {
        let scaler = ScalingParameters::new(vec![0.0; 32], vec![1.0; 32]).unwrap();
        let doc = serde_json::json!({
            "n_features": 32, "n_classes": 2,
            "trees": [{
                "children_left": [-1], "children_right": [-1],
                "feature": [-2], "threshold": [-2.0], "value": [[1.0, 1.0]]
            }]
        });
        let forest = RandomForest::from_json(&doc.to_string()).unwrap();
        assert!(matches!(
            StagePipeline::new(Arc::new(scaler), Arc::new(forest)),
            Err(PipelineError::ClassCount(2))
        ));
    }

    #[test]
    fn load_from_store_or_record_why_not() {
        let names: Vec<&str> = crate::features::feature_names().collect();
        let scaler = serde_json::json!({
            "feature_names": names, "mean": vec![0.0; 32], "scale": vec![1.0; 32]
        });
        let store = MemoryArtifactStore::new()
            .with("scaler.json", scaler.to_string())
            .with("model.json", mmse_forest_json());

        let h = InferenceHandle::load(&store, "scaler.json", "model.json", ModelFormat::Forest);
        assert!(h.is_ready());

        let h = InferenceHandle::load(&store, "scaler.json", "missing.json", ModelFormat::Forest);
        match h {
            InferenceHandle::Unavailable(reason) => assert!(reason.contains("missing.json")),
            InferenceHandle::Ready(_) => panic!("expected unavailable"),
        }
    }

    #[test]
    fn unavailable_handle_fails_fast() {
        let h = InferenceHandle::unavailable("model file missing");
        assert!(!h.is_ready());
        match h.pipeline() {
            Err(PipelineError::Unavailable(reason)) => assert_eq!(reason, "model file missing"),
            _ => panic!("expected unavailable"),
        }
        assert!(InferenceHandle::ready(identity_pipeline()).is_ready());
    }
}
