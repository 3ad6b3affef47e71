use anyhow::{Context, Result};
use facegroup_core::cluster::{DEFAULT_EPS, DEFAULT_MIN_SAMPLES};
use facegroup_core::matching::{
    DEFAULT_MATCH_LIMIT, DEFAULT_SIMILAR_LIMIT, DEFAULT_SIMILAR_THRESHOLD, PROFILE_SCAN_CAP,
};
use facegroup_core::quality::{MAX_BRIGHTNESS, MIN_BRIGHTNESS, MIN_FACE_RATIO, MIN_SHARPNESS};
use facegroup_core::{ClusterParams, QualityThresholds, ServiceConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file named by
/// `FACEGROUP_CONFIG`, then `FACEGROUP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// DBSCAN neighborhood radius (cosine distance).
    pub eps: f32,
    pub min_samples: usize,
    /// Default cosine similarity cut-off for `similar`.
    pub similarity_threshold: f32,
    pub similar_limit: usize,
    pub match_limit: usize,
    /// Embeddings examined per profile match.
    pub scan_cap: usize,
    pub min_sharpness: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
    pub min_face_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("faces.db"),
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
            similarity_threshold: DEFAULT_SIMILAR_THRESHOLD,
            similar_limit: DEFAULT_SIMILAR_LIMIT,
            match_limit: DEFAULT_MATCH_LIMIT,
            scan_cap: PROFILE_SCAN_CAP,
            min_sharpness: MIN_SHARPNESS,
            min_brightness: MIN_BRIGHTNESS,
            max_brightness: MAX_BRIGHTNESS,
            min_face_ratio: MIN_FACE_RATIO,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEGROUP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `FACEGROUP_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FACEGROUP_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.eps = env_f32(&lookup, "FACEGROUP_EPS", self.eps);
        self.min_samples = env_usize(&lookup, "FACEGROUP_MIN_SAMPLES", self.min_samples);
        self.similarity_threshold = env_f32(&lookup, "FACEGROUP_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.similar_limit = env_usize(&lookup, "FACEGROUP_SIMILAR_LIMIT", self.similar_limit);
        self.match_limit = env_usize(&lookup, "FACEGROUP_MATCH_LIMIT", self.match_limit);
        self.scan_cap = env_usize(&lookup, "FACEGROUP_SCAN_CAP", self.scan_cap);
        self.min_sharpness = env_f32(&lookup, "FACEGROUP_MIN_SHARPNESS", self.min_sharpness);
        self.min_brightness = env_f32(&lookup, "FACEGROUP_MIN_BRIGHTNESS", self.min_brightness);
        self.max_brightness = env_f32(&lookup, "FACEGROUP_MAX_BRIGHTNESS", self.max_brightness);
        self.min_face_ratio = env_f32(&lookup, "FACEGROUP_MIN_FACE_RATIO", self.min_face_ratio);
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            eps: self.eps,
            min_samples: self.min_samples,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            quality: QualityThresholds {
                min_sharpness: self.min_sharpness,
                min_brightness: self.min_brightness,
                max_brightness: self.max_brightness,
                min_face_ratio: self.min_face_ratio,
            },
            scan_cap: self.scan_cap,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegroup")
}

fn env_f32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cluster_params(), ClusterParams::default());
        assert_eq!(config.service_config(), ServiceConfig::default());
        assert!(config.db_path.ends_with("facegroup/faces.db"));
        assert_eq!(config.similar_limit, 10);
        assert_eq!(config.match_limit, 200);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/var/lib/facegroup/faces.db"
            eps = 0.25
            scan_cap = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/facegroup/faces.db"));
        assert!((config.eps - 0.25).abs() < 1e-6);
        assert_eq!(config.scan_cap, 1000);
        assert_eq!(config.min_samples, DEFAULT_MIN_SAMPLES);
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(toml::from_str::<Config>("epsilon = 0.2").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FACEGROUP_MIN_SAMPLES", "4"),
            ("FACEGROUP_MIN_SHARPNESS", "80.5"),
            ("FACEGROUP_EPS", "not-a-number"),
            ("FACEGROUP_DB_PATH", "/tmp/x.db"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.min_samples, 4);
        assert!((config.min_sharpness - 80.5).abs() < 1e-6);
        assert!((config.eps - DEFAULT_EPS).abs() < 1e-6);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert!((config.service_config().quality.min_sharpness - 80.5).abs() < 1e-6);
    }
}
