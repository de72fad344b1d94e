//! faceid-core: face profiles, matching, and the face-analysis engine.
//!
//! Detection uses SCRFD and recognition uses ArcFace, both running via
//! ONNX Runtime. Named profiles hold face embeddings and persist to a
//! durable key-value slot; new faces are matched against them by
//! Euclidean distance.

pub mod alignment;
pub mod analyzer;
pub mod canvas;
pub mod detector;
pub mod matcher;
pub mod models;
pub mod recognizer;
pub mod storage;
pub mod store;
pub mod toast;
pub mod types;
pub mod upload;
pub mod views;

pub use analyzer::{AnalyzeError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use detector::FaceDetector;
pub use matcher::{match_faces, EuclideanMatcher, Matcher, MATCH_THRESHOLD};
pub use models::{ModelLoader, ModelSource, ModelState};
pub use recognizer::FaceRecognizer;
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use store::ProfileStore;
pub use toast::{Notifier, Severity, Toast, ToastEvent};
pub use types::{
    BoundingBox, DetectedFace, Embedding, MatchResult, Profile, ProfileUpdate, UNKNOWN_NAME,
};
pub use upload::{ImageHandle, ImageUploader, UploadFile, ValidationError};

/// Default location for model bundles when no base is configured.
pub fn default_model_dir() -> std::path::PathBuf {
    data_dir().join("models")
}

/// Per-user data directory (`$XDG_DATA_HOME/faceid` or `~/.local/share/faceid`).
pub fn data_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("faceid")
}
