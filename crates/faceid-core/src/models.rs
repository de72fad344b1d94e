//! Model bundle resolution and the one-shot asynchronous model loader.
//!
//! Bundles come from a local directory or a remote base URL. Remote bundles
//! are downloaded once into a cache directory and reused afterwards.

use crate::analyzer::OnnxFaceAnalyzer;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

/// SCRFD detection bundle (also yields the five facial landmarks).
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition bundle.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to create model cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("model loading already failed this session: {0}")]
    PreviouslyFailed(String),
    #[error("model loading task aborted: {0}")]
    Aborted(String),
}

/// Where model bundles are fetched from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Local(PathBuf),
    Remote { base_url: String, cache_dir: PathBuf },
}

impl ModelSource {
    /// Interpret `base` as a URL if it has an http(s) scheme, else as a directory.
    pub fn parse(base: &str) -> Self {
        if base.starts_with("http://") || base.starts_with("https://") {
            ModelSource::Remote {
                base_url: base.trim_end_matches('/').to_string(),
                cache_dir: model_cache_dir(),
            }
        } else {
            ModelSource::Local(PathBuf::from(base))
        }
    }

    /// Local path of a bundle, downloading it first if it is remote and not cached.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ModelLoadError> {
        match self {
            ModelSource::Local(dir) => Ok(dir.join(name)),
            ModelSource::Remote {
                base_url,
                cache_dir,
            } => {
                let cached_path = cache_dir.join(name);
                if cached_path.exists() {
                    tracing::debug!(path = %cached_path.display(), "using cached model");
                    return Ok(cached_path);
                }

                fs::create_dir_all(cache_dir).map_err(ModelLoadError::CacheDir)?;
                let url = format!("{base_url}/{name}");
                tracing::info!(url = %url, "downloading model");
                download(&url, &cached_path)?;
                Ok(cached_path)
            }
        }
    }
}

impl ModelSource {
    /// Bundles not yet on local disk. Checking never downloads.
    pub fn missing_bundles(&self) -> Vec<&'static str> {
        let dir = match self {
            ModelSource::Local(dir) => dir,
            ModelSource::Remote { cache_dir, .. } => cache_dir,
        };
        [DETECTOR_MODEL, RECOGNIZER_MODEL]
            .into_iter()
            .filter(|name| !dir.join(name).exists())
            .collect()
    }
}

/// Platform cache directory for downloaded bundles.
pub fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("faceid").join("models"))
        .unwrap_or_else(|| crate::data_dir().join("cache"))
}

fn download(url: &str, dest: &Path) -> Result<(), ModelLoadError> {
    let download_err = |source: reqwest::Error| ModelLoadError::Download {
        url: url.to_string(),
        source,
    };

    // The default blocking client gives up after 30 s, too short for large bundles.
    let client = reqwest::blocking::Client::builder()
        .timeout(None)
        .build()
        .map_err(download_err)?;
    let bytes = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(download_err)?;

    write_atomically(dest, &bytes)?;
    tracing::info!(path = %dest.display(), bytes = bytes.len(), "model downloaded");
    Ok(())
}

/// Write through a `.part` file renamed into place, so `dest` is either
/// complete or absent. The `.part` file is removed on failure.
fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), ModelLoadError> {
    let temp_path = dest.with_extension("part");
    let result = fs::File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.flush()
        })
        .map_err(|source| ModelLoadError::Write {
            path: temp_path.clone(),
            source,
        })
        .and_then(|()| {
            fs::rename(&temp_path, dest).map_err(|source| ModelLoadError::Write {
                path: dest.to_path_buf(),
                source,
            })
        });

    if result.is_err() && temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            tracing::warn!(
                path = %temp_path.display(),
                error = %e,
                "could not remove partial download"
            );
        }
    }
    result
}

/// Loader readiness as observed by views.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState {
    Loading,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready)
    }
}

/// Successfully loaded models.
pub struct Ready {
    pub analyzer: OnnxFaceAnalyzer,
}

/// Loads both bundles once, publishing progress on a watch channel.
///
/// There is no retry: after a failure the state stays `Failed` and further
/// `load` calls return [`ModelLoadError::PreviouslyFailed`].
pub struct ModelLoader {
    source: ModelSource,
    state: watch::Sender<ModelState>,
}

impl ModelLoader {
    pub fn new(source: ModelSource) -> Self {
        let (state, _) = watch::channel(ModelState::Loading);
        Self { source, state }
    }

    pub fn state(&self) -> ModelState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.state.subscribe()
    }

    pub async fn load(&self) -> Result<Ready, ModelLoadError> {
        if let ModelState::Failed(reason) = self.state() {
            return Err(ModelLoadError::PreviouslyFailed(reason));
        }

        let source = self.source.clone();
        let result = tokio::task::spawn_blocking(move || load_blocking(&source))
            .await
            .map_err(|e| ModelLoadError::Aborted(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(analyzer) => {
                self.state.send_replace(ModelState::Ready);
                tracing::info!("face models ready");
                Ok(Ready { analyzer })
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load face models");
                self.state.send_replace(ModelState::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

fn load_blocking(source: &ModelSource) -> Result<OnnxFaceAnalyzer, ModelLoadError> {
    let detector_path = source.resolve(DETECTOR_MODEL)?;
    let recognizer_path = source.resolve(RECOGNIZER_MODEL)?;

    let detector = FaceDetector::load(&detector_path)?;
    let recognizer = FaceRecognizer::load(&recognizer_path)?;
    Ok(OnnxFaceAnalyzer::new(detector, recognizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_local_and_remote() {
        assert_eq!(
            ModelSource::parse("/opt/models"),
            ModelSource::Local(PathBuf::from("/opt/models"))
        );
        match ModelSource::parse("https://example.com/models/") {
            ModelSource::Remote { base_url, cache_dir } => {
                assert_eq!(base_url, "https://example.com/models");
                assert!(cache_dir.to_string_lossy().contains("faceid"));
            }
            other => panic!("expected remote, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_local_joins_name() {
        let source = ModelSource::Local(PathBuf::from("/opt/models"));
        assert_eq!(
            source.resolve(DETECTOR_MODEL).unwrap(),
            PathBuf::from("/opt/models/det_10g.onnx")
        );
    }

    #[test]
    fn test_resolve_remote_prefers_cache() {
        let tmp = TempDir::new().unwrap();
        let cached = tmp.path().join(RECOGNIZER_MODEL);
        fs::write(&cached, b"cached model").unwrap();

        let source = ModelSource::Remote {
            base_url: "http://invalid.example.invalid".into(),
            cache_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(source.resolve(RECOGNIZER_MODEL).unwrap(), cached);
    }

    #[test]
    fn test_missing_bundles_checks_disk_only() {
        let tmp = TempDir::new().unwrap();
        let source = ModelSource::Remote {
            base_url: "http://127.0.0.1:9".into(),
            cache_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(source.missing_bundles(), [DETECTOR_MODEL, RECOGNIZER_MODEL]);

        fs::write(tmp.path().join(DETECTOR_MODEL), b"det").unwrap();
        assert_eq!(source.missing_bundles(), [RECOGNIZER_MODEL]);

        let local = ModelSource::Local(tmp.path().to_path_buf());
        assert_eq!(local.missing_bundles(), [RECOGNIZER_MODEL]);
    }

    #[test]
    fn test_write_atomically_leaves_no_part_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join(DETECTOR_MODEL);
        write_atomically(&dest, b"weights").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"weights");
        assert!(!dest.with_extension("part").exists());
    }

    #[test]
    fn test_failed_rename_removes_part_file() {
        let tmp = TempDir::new().unwrap();
        // A non-empty directory in the way makes the final rename fail.
        let dest = tmp.path().join(RECOGNIZER_MODEL);
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("keep"), b"x").unwrap();

        let err = write_atomically(&dest, b"weights").unwrap_err();
        assert!(matches!(err, ModelLoadError::Write { ref path, .. } if path == &dest));
        assert!(!dest.with_extension("part").exists());
    }

    #[test]
    fn test_download_error_leaves_cache_clean() {
        let tmp = TempDir::new().unwrap();
        let source = ModelSource::Remote {
            // Nothing listens on port 9 locally; the connection is refused.
            base_url: "http://127.0.0.1:9".into(),
            cache_dir: tmp.path().to_path_buf(),
        };
        let err = source.resolve(DETECTOR_MODEL).unwrap_err();
        assert!(matches!(err, ModelLoadError::Download { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_models_fail_for_the_session() {
        let tmp = TempDir::new().unwrap();
        let loader = ModelLoader::new(ModelSource::Local(tmp.path().to_path_buf()));
        let mut rx = loader.subscribe();
        assert_eq!(loader.state(), ModelState::Loading);

        let err = loader.load().await.err().unwrap();
        assert!(matches!(err, ModelLoadError::Detector(DetectorError::ModelNotFound(_))));
        assert!(rx.has_changed().unwrap());
        assert!(matches!(*rx.borrow_and_update(), ModelState::Failed(_)));

        let again = loader.load().await.err().unwrap();
        assert!(matches!(again, ModelLoadError::PreviouslyFailed(_)));
        assert!(!loader.state().is_ready());
    }
}
