//! Where model and scaler artifacts come from.
//!
//! Loading goes through an [`ArtifactStore`] keyed by identifier, so nothing
//! in the pipeline knows about filesystem locations.

use serde::Deserialize;
use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Component, Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tracing::info;

#[cfg(feature = "torch")]
use crate::features::FEATURE_COUNT;
use crate::model::{ClassifierModel, ModelError, RandomForest};
use crate::scaler::{ScalerError, ScalingParameters};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {id:?} not found")]
    NotFound { id: String },
    #[error("artifact id {id:?} escapes the store root")]
    InvalidId { id: String },
    #[error("failed to read artifact {id:?}: {source}")]
    Io {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("artifact {id:?} is not valid UTF-8")]
    NotUtf8 { id: String },
    #[error("invalid scaler artifact {id:?}: {source}")]
    Scaler {
        id: String,
        #[source]
        source: ScalerError,
    },
    #[error("invalid model artifact {id:?}: {source}")]
    Model {
        id: String,
        #[source]
        source: ModelError,
    },
    #[error("model format {0} is not supported by this build")]
    UnsupportedFormat(ModelFormat),
}

pub trait ArtifactStore: Send + Sync {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, ArtifactError>;

    fn fetch_text(&self, id: &str) -> Result<String, ArtifactError> {
        String::from_utf8(self.fetch(id)?).map_err(|_| ArtifactError::NotUtf8 { id: id.to_string() })
    }
}

/// Artifacts stored as files under one root directory.
#[derive(Debug, Clone)]
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, ArtifactError> {
        let rel = Path::new(id);
        let escapes = id.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ArtifactError::InvalidId { id: id.to_string() });
        }
        Ok(self.root.join(rel))
    }
}

impl ArtifactStore for DirArtifactStore {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(id)?;
        fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ArtifactError::NotFound { id: id.to_string() },
            _ => ArtifactError::Io {
                id: id.to_string(),
                source,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    items: HashMap<String, Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.items.insert(id.into(), bytes.into());
    }

    pub fn with(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(id, bytes);
        self
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, ArtifactError> {
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound { id: id.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Forest,
    Torchscript,
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Forest => f.write_str("forest"),
            ModelFormat::Torchscript => f.write_str("torchscript"),
        }
    }
}

impl FromStr for ModelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forest" | "random_forest" => Ok(ModelFormat::Forest),
            "torchscript" | "torch" => Ok(ModelFormat::Torchscript),
            other => Err(format!("unknown model format {other:?}")),
        }
    }
}

pub fn load_scaler(store: &dyn ArtifactStore, id: &str) -> Result<ScalingParameters, ArtifactError> {
    let text = store.fetch_text(id)?;
    let scaler = ScalingParameters::from_json(&text).map_err(|source| ArtifactError::Scaler {
        id: id.to_string(),
        source,
    })?;
    info!("loaded scaler {id}: width={}", scaler.width());
    Ok(scaler)
}

pub fn load_model(
    store: &dyn ArtifactStore,
    id: &str,
    format: ModelFormat,
) -> Result<Arc<dyn ClassifierModel>, ArtifactError> {
    let wrap = |source: ModelError| ArtifactError::Model {
        id: id.to_string(),
        source,
    };
    match format {
        ModelFormat::Forest => {
            let text = store.fetch_text(id)?;
            let forest = RandomForest::from_json(&text).map_err(wrap)?;
            info!(
                "loaded forest {id}: trees={} n_features={} n_classes={}",
                forest.n_trees(),
                forest.n_features(),
                forest.n_classes()
            );
            Ok(Arc::new(forest))
        }
        #[cfg(feature = "torch")]
        ModelFormat::Torchscript => {
            let bytes = store.fetch(id)?;
            let m = crate::model::TorchModel::from_bytes(&bytes, FEATURE_COUNT).map_err(wrap)?;
            info!(
                "loaded torchscript {id}: n_features={} n_classes={}",
                m.n_features(),
                m.n_classes()
            );
            Ok(Arc::new(m))
        }
        #[cfg(not(feature = "torch"))]
        ModelFormat::Torchscript => Err(ArtifactError::UnsupportedFormat(format)),
    }
}
