//! Precomputed descriptive statistics, served as-is.

use serde_json::Value;
use std::{io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Stats not found")]
    NotFound,
    #[error("failed to read stats: {0}")]
    Io(#[from] io::Error),
    #[error("stats file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Re-read on every call so a retrained export shows up without a restart.
pub async fn load_stats(path: &Path) -> Result<Value, StatsError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StatsError::NotFound),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn returns_file_contents_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let doc = json!({
            "total_patients": 2149,
            "diagnosed_count": 760,
            "age_distribution": { "60": 31, "61": 30 },
            "diagnosis_rate": 0.3537
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        assert_eq!(load_stats(&path).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        assert!(matches!(load_stats(&path).await, Err(StatsError::NotFound)));
        std::fs::write(&path, "{oops").unwrap();
        assert!(matches!(load_stats(&path).await, Err(StatsError::Parse(_))));
    }
}
