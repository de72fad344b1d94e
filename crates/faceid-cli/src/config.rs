use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory or http(s) base URL holding the ONNX model bundles.
    pub model_base: String,
    /// Path to the SQLite database holding the profile slot.
    pub db_path: PathBuf,
    /// Optional TTF/OTF font used to write names into label boxes.
    pub label_font: Option<PathBuf>,
    /// How long a toast stays active.
    pub toast_duration: Duration,
}

impl Config {
    /// Load configuration from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let model_base = get("FACEID_MODEL_BASE").unwrap_or_else(|| {
            faceid_core::default_model_dir()
                .to_string_lossy()
                .into_owned()
        });

        let db_path = get("FACEID_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| faceid_core::data_dir().join("faceid.db"));

        let toast_ms = get("FACEID_TOAST_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);

        Self {
            model_base,
            db_path,
            label_font: get("FACEID_LABEL_FONT")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            toast_duration: Duration::from_millis(toast_ms),
        }
    }
}
