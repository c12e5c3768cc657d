//! Feature Vector Builder.
//!
//! Turns a loosely-typed JSON record into the fixed 32-wide numeric vector the
//! scaler and classifier were fit on. Every field is required; there is no
//! zero-fill for absent keys.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const FEATURE_COUNT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub kind: FeatureKind,
}

const fn int(name: &'static str) -> FeatureSpec {
    FeatureSpec { name, kind: FeatureKind::Integer }
}

const fn float(name: &'static str) -> FeatureSpec {
    FeatureSpec { name, kind: FeatureKind::Float }
}

/// Authoritative input order. Must match the column order used at fit time.
pub const FEATURES: [FeatureSpec; FEATURE_COUNT] = [
    int("Age"),
    int("Gender"),
    int("Ethnicity"),
    int("EducationLevel"),
    float("BMI"),
    int("Smoking"),
    float("AlcoholConsumption"),
    float("PhysicalActivity"),
    float("DietQuality"),
    float("SleepQuality"),
    int("FamilyHistoryAlzheimers"),
    int("CardiovascularDisease"),
    int("Diabetes"),
    int("Depression"),
    int("HeadInjury"),
    int("Hypertension"),
    int("SystolicBP"),
    int("DiastolicBP"),
    float("CholesterolTotal"),
    float("CholesterolLDL"),
    float("CholesterolHDL"),
    float("CholesterolTriglycerides"),
    float("MMSE"),
    float("FunctionalAssessment"),
    int("MemoryComplaints"),
    int("BehavioralProblems"),
    float("ADL"),
    int("Confusion"),
    int("Disorientation"),
    int("PersonalityChanges"),
    int("DifficultyCompletingTasks"),
    int("Forgetfulness"),
];

pub fn feature_names() -> impl Iterator<Item = &'static str> {
    FEATURES.iter().map(|f| f.name)
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURES.iter().position(|f| f.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    Blank,
    NotNumeric,
    NotInteger,
    NonFinite,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::Missing => "field required",
            IssueKind::Blank => "value is blank",
            IssueKind::NotNumeric => "value is not a number",
            IssueKind::NotInteger => "value is not a whole number",
            IssueKind::NonFinite => "value is not finite",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub reason: IssueKind,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("expected a JSON object with 32 named fields")]
    NotAnObject,
    #[error("invalid fields: {}", describe(.0))]
    Invalid(Vec<FieldIssue>),
    #[error("expected 32 values, got {0}")]
    WrongWidth(usize),
}

impl FeatureError {
    pub fn issues(&self) -> Vec<FieldIssue> {
        match self {
            FeatureError::Invalid(issues) => issues.clone(),
            FeatureError::NotAnObject | FeatureError::WrongWidth(_) => Vec::new(),
        }
    }
}

fn describe(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} ({})", i.field, i.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordered, validated input vector. Only constructible through validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn from_json(value: &Value) -> Result<Self, FeatureError> {
        match value {
            Value::Object(map) => Self::from_record(map),
            _ => Err(FeatureError::NotAnObject),
        }
    }

    /// Validates every declared field, collecting all offending fields
    /// rather than stopping at the first.
    pub fn from_record(map: &Map<String, Value>) -> Result<Self, FeatureError> {
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        let mut issues = Vec::new();
        for spec in &FEATURES {
            match coerce(spec, map.get(spec.name)) {
                Ok(v) => values.push(v),
                Err(reason) => issues.push(FieldIssue {
                    field: spec.name.to_string(),
                    reason,
                }),
            }
        }
        if !issues.is_empty() {
            return Err(FeatureError::Invalid(issues));
        }
        Ok(Self(values))
    }

    /// Wraps an already-ordered vector (e.g. a row from a training export).
    pub fn from_ordered(values: Vec<f64>) -> Result<Self, FeatureError> {
        if values.len() != FEATURE_COUNT {
            return Err(FeatureError::WrongWidth(values.len()));
        }
        let issues: Vec<FieldIssue> = values
            .iter()
            .zip(FEATURES.iter())
            .filter(|(v, _)| !v.is_finite())
            .map(|(_, spec)| FieldIssue {
                field: spec.name.to_string(),
                reason: IssueKind::NonFinite,
            })
            .collect();
        if !issues.is_empty() {
            return Err(FeatureError::Invalid(issues));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.0[i])
    }

    /// Cheap shape/statistics line for debug logging, so an all-zero or
    /// mis-ordered vector is visible in the logs.
    pub fn summary(&self) -> String {
        let v = &self.0;
        let n = v.len() as f64;
        let nz = v.iter().filter(|x| **x != 0.0).count();
        let mean = if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / n };
        let std = if v.len() < 2 {
            0.0
        } else {
            (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt()
        };
        let sample: Vec<String> = FEATURES
            .iter()
            .zip(v.iter())
            .take(6)
            .map(|(spec, x)| format!("{}={:.3}", spec.name, x))
            .collect();
        format!(
            "in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}]",
            v.len(),
            nz,
            mean,
            std,
            sample.join(", ")
        )
    }
}

fn coerce(spec: &FeatureSpec, value: Option<&Value>) -> Result<f64, IssueKind> {
    let raw = match value {
        None => return Err(IssueKind::Missing),
        Some(Value::Null) => return Err(IssueKind::Blank),
        Some(Value::Number(n)) => n.as_f64().ok_or(IssueKind::NotNumeric)?,
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Err(IssueKind::Blank);
            }
            t.parse::<f64>().map_err(|_| IssueKind::NotNumeric)?
        }
        Some(_) => return Err(IssueKind::NotNumeric),
    };
    if !raw.is_finite() {
        return Err(IssueKind::NonFinite);
    }
    if spec.kind == FeatureKind::Integer && raw.fract() != 0.0 {
        return Err(IssueKind::NotInteger);
    }
    Ok(raw)
}
