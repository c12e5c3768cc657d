//! Classifier backends.
//!
//! The stage pipeline only sees [`ClassifierModel`]: a rescaled vector in, a
//! per-class probability distribution out. Two backends implement it:
//!
//! - [`RandomForest`]: a decision-tree ensemble exported to JSON in the usual
//!   parallel-array layout (`children_left`, `children_right`, `feature`,
//!   `threshold`, `value`). This is the default artifact format.
//! - `TorchModel` (cargo feature `torch`): a TorchScript module producing
//!   `[1, C]` logits.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model has no trees")]
    EmptyForest,
    #[error("tree {tree}: {reason}")]
    TreeShape { tree: usize, reason: String },
    #[error("feature length mismatch: got {got}, expected {expected}")]
    InputWidth { got: usize, expected: usize },
    #[error("unexpected model output shape: {0:?}")]
    OutputShape(Vec<i64>),
    #[error("model produced no usable probabilities")]
    EmptyOutput,
    #[error("model backend error: {0}")]
    Backend(String),
}

/// Shared, read-only decision procedure. Implementations must be safe to call
/// from many request tasks at once without locking.
pub trait ClassifierModel: Send + Sync {
    fn n_features(&self) -> usize;

    fn n_classes(&self) -> usize;

    /// Probability per class, summing to 1.
    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError>;

    /// Arg-max class with its full distribution. The lowest index wins ties.
    fn predict(&self, x: &[f64]) -> Result<(usize, Vec<f64>), ModelError> {
        let probs = self.predict_proba(x)?;
        let idx = argmax(&probs).ok_or(ModelError::EmptyOutput)?;
        Ok((idx, probs))
    }
}

pub fn argmax(xs: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in xs.iter().enumerate() {
        if !p.is_finite() {
            return None;
        }
        match best {
            Some((_, bp)) if p <= bp => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

// ---------- Random forest ----------

const LEAF: i64 = -1;

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    /// Per-node class weights; only leaf rows are read at inference.
    value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn validate(&self, tree: usize, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        let bad = |reason: String| ModelError::TreeShape { tree, reason };
        let n = self.children_left.len();
        if n == 0 {
            return Err(bad("no nodes".into()));
        }
        if self.children_right.len() != n
            || self.feature.len() != n
            || self.threshold.len() != n
            || self.value.len() != n
        {
            return Err(bad("node arrays differ in length".into()));
        }
        for node in 0..n {
            let (l, r) = (self.children_left[node], self.children_right[node]);
            let row = &self.value[node];
            if row.len() != n_classes {
                return Err(bad(format!("node {node} has {} class weights", row.len())));
            }
            if row.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(bad(format!("node {node} has an invalid class weight")));
            }
            if l == LEAF && r == LEAF {
                if row.iter().sum::<f64>() <= 0.0 {
                    return Err(bad(format!("leaf {node} carries no weight")));
                }
                continue;
            }
            // Children always come after their parent, which also rules out cycles.
            for child in [l, r] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(bad(format!("node {node} has child {child} out of order")));
                }
            }
            let f = self.feature[node];
            if f < 0 || f as usize >= n_features {
                return Err(bad(format!("node {node} splits on feature {f}")));
            }
            if !self.threshold[node].is_finite() {
                return Err(bad(format!("node {node} has a non-finite threshold")));
            }
        }
        Ok(())
    }

    fn leaf_weights(&self, x: &[f64]) -> &[f64] {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            let f = self.feature[node] as usize;
            node = if x[f] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        &self.value[node]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let forest: Self = serde_json::from_str(json)?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::EmptyForest);
        }
        for (i, t) in self.trees.iter().enumerate() {
            t.validate(i, self.n_features, self.n_classes)?;
        }
        Ok(())
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ClassifierModel for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.n_features {
            return Err(ModelError::InputWidth {
                got: x.len(),
                expected: self.n_features,
            });
        }
        let mut acc = vec![0.0; self.n_classes];
        for tree in &self.trees {
            let w = tree.leaf_weights(x);
            let total: f64 = w.iter().sum();
            for (a, v) in acc.iter_mut().zip(w) {
                *a += v / total;
            }
        }
        let n = self.trees.len() as f64;
        acc.iter_mut().for_each(|a| *a /= n);
        Ok(acc)
    }
}

// ---------- TorchScript ----------

#[cfg(feature = "torch")]
pub use torch::TorchModel;

#[cfg(feature = "torch")]
mod torch {
    use super::{ClassifierModel, ModelError};
    use std::io::Cursor;
    use tch::{kind::Kind, CModule, Device, Tensor};

    impl From<tch::TchError> for ModelError {
        fn from(e: tch::TchError) -> Self {
            ModelError::Backend(e.to_string())
        }
    }

    pub struct TorchModel {
        model: CModule,
        device: Device,
        n_features: usize,
        n_classes: usize,
    }

    impl TorchModel {
        pub fn from_bytes(bytes: &[u8], n_features: usize) -> Result<Self, ModelError> {
            let device = Device::Cpu;
            let model = CModule::load_data_on_device(&mut Cursor::new(bytes), device)?;

            // Probe output shape with a dummy forward, expect [B=1, C]
            let dummy = Tensor::zeros([1, n_features as i64], (Kind::Float, device));
            let t = model.forward_ts(&[dummy])?;
            let sz = t.size();
            if sz.len() != 2 || sz[0] != 1 || sz[1] < 1 {
                return Err(ModelError::OutputShape(sz));
            }
            Ok(Self {
                model,
                device,
                n_features,
                n_classes: sz[1] as usize,
            })
        }
    }

    impl ClassifierModel for TorchModel {
        fn n_features(&self) -> usize {
            self.n_features
        }

        fn n_classes(&self) -> usize {
            self.n_classes
        }

        fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
            if x.len() != self.n_features {
                return Err(ModelError::InputWidth {
                    got: x.len(),
                    expected: self.n_features,
                });
            }
            let xs: Vec<f32> = x.iter().map(|v| *v as f32).collect();
            let input = Tensor::from_slice(&xs)
                .reshape([1, self.n_features as i64])
                .to_device(self.device);

            // Forward: [1, C] logits
            let logits = self.model.forward_ts(&[input])?;
            let probs = logits.softmax(-1, Kind::Float);
            Ok((0..self.n_classes)
                .map(|c| probs.double_value(&[0, c as i64]))
                .collect())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};

    /// One tree splitting raw MMSE (feature 22) at the stage cutpoints.
    pub(crate) fn mmse_tree() -> Value {
        json!({
            "children_left":  [1, -1, 3, -1, -1],
            "children_right": [2, -1, 4, -1, -1],
            "feature":        [22, -2, 22, -2, -2],
            "threshold":      [9.995, -2.0, 20.995, -2.0, -2.0],
            "value": [
                [8.0, 2.0, 9.0, 10.0],
                [0.0, 0.0, 0.0, 10.0],
                [8.0, 2.0, 9.0, 0.0],
                [0.0, 1.0, 9.0, 0.0],
                [8.0, 2.0, 0.0, 0.0]
            ]
        })
    }

    pub(crate) fn mmse_forest_json() -> String {
        json!({ "n_features": 32, "n_classes": 4, "trees": [mmse_tree()] }).to_string()
    }

    fn with_mmse(mmse: f64) -> Vec<f64> {
        let mut x = vec![0.0; 32];
        x[22] = mmse;
        x
    }

    #[test]
    fn single_tree_routes_on_threshold() {
        let f = RandomForest::from_json(&mmse_forest_json()).unwrap();
        let (idx, p) = f.predict(&with_mmse(5.0)).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(p, vec![0.0, 0.0, 0.0, 1.0]);

        let (idx, p) = f.predict(&with_mmse(15.0)).unwrap();
        assert_eq!(idx, 2);
        assert!((p[2] - 0.9).abs() < 1e-12);

        let (idx, p) = f.predict(&with_mmse(28.0)).unwrap();
        assert_eq!(idx, 0);
        assert!((p[0] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn forest_averages_normalised_leaves() {
        let flat = json!({
            "children_left": [-1], "children_right": [-1],
            "feature": [-2], "threshold": [-2.0],
            "value": [[1.0, 1.0, 1.0, 1.0]]
        });
        let doc = json!({ "n_features": 32, "n_classes": 4, "trees": [mmse_tree(), flat] });
        let f = RandomForest::from_json(&doc.to_string()).unwrap();
        assert_eq!(f.n_trees(), 2);
        let p = f.predict_proba(&with_mmse(5.0)).unwrap();
        assert!((p[3] - 0.625).abs() < 1e-12);
        assert!((p[0] - 0.125).abs() < 1e-12);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_trees() {
        let mut cyclic = mmse_tree();
        cyclic["children_left"][2] = json!(0);
        let doc = json!({ "n_features": 32, "n_classes": 4, "trees": [cyclic] });
        assert!(matches!(
            RandomForest::from_json(&doc.to_string()),
            Err(ModelError::TreeShape { tree: 0, .. })
        ));

        let mut wide = mmse_tree();
        wide["feature"][0] = json!(40);
        let doc = json!({ "n_features": 32, "n_classes": 4, "trees": [wide] });
        assert!(RandomForest::from_json(&doc.to_string()).is_err());

        let doc = json!({ "n_features": 32, "n_classes": 4, "trees": [] });
        assert!(matches!(
            RandomForest::from_json(&doc.to_string()),
            Err(ModelError::EmptyForest)
        ));
    }

    #[test]
    fn input_width_is_checked() {
        let f = RandomForest::from_json(&mmse_forest_json()).unwrap();
        assert!(matches!(
            f.predict_proba(&[0.0; 3]),
            Err(ModelError::InputWidth { got: 3, expected: 32 })
        ));
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some(0));
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), Some(2));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f64::NAN]), None);
    }
}
