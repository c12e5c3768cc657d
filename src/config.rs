use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use crate::artifacts::ModelFormat;
use crate::auth::DEFAULT_PBKDF2_ROUNDS;

/// Runtime settings: compiled defaults, then an optional JSON file named by
/// `ALZ_CONFIG`, then individual environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Root of the artifact store; model and scaler ids resolve under it.
    pub artifact_dir: PathBuf,
    pub model_artifact: String,
    pub scaler_artifact: String,
    pub model_format: ModelFormat,
    pub stats_path: PathBuf,
    pub database_path: String,
    pub cors_origins: Vec<String>,
    pub pbkdf2_rounds: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            artifact_dir: PathBuf::from("ml"),
            model_artifact: "model_multiclass.json".to_string(),
            scaler_artifact: "scaler_multiclass.json".to_string(),
            model_format: ModelFormat::Forest,
            stats_path: PathBuf::from("ml/stats.json"),
            database_path: "alzheimers.db".to_string(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            pbkdf2_rounds: DEFAULT_PBKDF2_ROUNDS,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("config file not found at {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let mut cfg = match get("ALZ_CONFIG") {
            Some(p) => Self::load(Path::new(&p))?,
            None => Self::default(),
        };

        if let Some(v) = get("PORT") {
            cfg.port = parse_var("PORT", &v)?;
        }
        // A full host:port wins over PORT.
        if let Some(v) = get("BIND_ADDR") {
            let addr: SocketAddr = parse_var("BIND_ADDR", &v)?;
            cfg.host = addr.ip();
            cfg.port = addr.port();
        }
        if let Some(v) = get("ALZ_ARTIFACT_DIR") {
            cfg.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ALZ_MODEL_ARTIFACT") {
            cfg.model_artifact = v;
        }
        if let Some(v) = get("ALZ_SCALER_ARTIFACT") {
            cfg.scaler_artifact = v;
        }
        if let Some(v) = get("ALZ_MODEL_FORMAT") {
            cfg.model_format = v
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("invalid ALZ_MODEL_FORMAT")?;
        }
        if let Some(v) = get("ALZ_STATS_PATH") {
            cfg.stats_path = PathBuf::from(v);
        }
        if let Some(v) = get("ALZ_DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Some(v) = get("ALZ_CORS_ORIGINS") {
            cfg.cors_origins = split_csv(&v);
        }
        if let Some(v) = get("ALZ_PBKDF2_ROUNDS") {
            cfg.pbkdf2_rounds = parse_var("ALZ_PBKDF2_ROUNDS", &v)?;
        }
        Ok(cfg)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("invalid {name}={raw:?}: {e}"))
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
        assert_eq!(cfg.socket_addr().to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn env_overrides_apply_and_blanks_are_ignored() {
        let cfg = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("ALZ_MODEL_FORMAT", "torchscript"),
            ("ALZ_CORS_ORIGINS", "https://a.example, ,https://b.example"),
            ("ALZ_DATABASE_PATH", "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.model_format, ModelFormat::Torchscript);
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.database_path, "alzheimers.db");

        let cfg = ServiceConfig::from_lookup(lookup(&[("BIND_ADDR", "127.0.0.1:9000")])).unwrap();
        assert_eq!(cfg.socket_addr().to_string(), "127.0.0.1:9000");
        let cfg =
            ServiceConfig::from_lookup(lookup(&[("PORT", "9090"), ("BIND_ADDR", "0.0.0.0:9001")]))
                .unwrap();
        assert_eq!(cfg.port, 9001);
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(ServiceConfig::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("BIND_ADDR", "0.0.0.0")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("ALZ_MODEL_FORMAT", "onnx")])).is_err());
    }

    #[test]
    fn file_layer_is_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, r#"{"port": 7000, "artifact_dir": "/srv/ml", "pbkdf2_rounds": 5000}"#)
            .unwrap();
        let p = path.to_str().unwrap();
        let cfg =
            ServiceConfig::from_lookup(lookup(&[("ALZ_CONFIG", p), ("ALZ_PBKDF2_ROUNDS", "6000")]))
                .unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.artifact_dir, PathBuf::from("/srv/ml"));
        assert_eq!(cfg.pbkdf2_rounds, 6000);
        assert_eq!(cfg.model_artifact, "model_multiclass.json");
    }
}
