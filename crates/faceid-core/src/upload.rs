//! Image intake: type and size validation, then decoding.

use crate::toast::{Notifier, Severity};
use image::{ImageFormat, RgbImage};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("not an image file (type {mime})")]
    NotAnImage { mime: String },
    /// `size` is the number of bytes held, which for files read from disk
    /// stops one past the limit.
    #[error("image of {size}+ bytes exceeds the {MAX_UPLOAD_BYTES} byte limit")]
    TooLarge { size: usize },
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

impl ValidationError {
    /// Message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ValidationError::NotAnImage { .. } => "Please upload an image file",
            ValidationError::TooLarge { .. } => "Image size should be less than 5MB",
            ValidationError::Decode(_) => "Error uploading image",
        }
    }
}

/// A file offered for upload, before validation.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Read a file from disk. The MIME type is sniffed from the content,
    /// falling back to the extension.
    ///
    /// At most one byte past [`MAX_UPLOAD_BYTES`] is read, which is enough for
    /// [`validate`] to reject an oversized file.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?
            .take(MAX_UPLOAD_BYTES as u64 + 1)
            .read_to_end(&mut bytes)?;
        let mime = image::guess_format(&bytes)
            .or_else(|_| ImageFormat::from_path(path))
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| FALLBACK_MIME.to_string());
        Ok(Self {
            name: path.display().to_string(),
            mime,
            bytes,
        })
    }
}

/// A decoded, displayable image and the reference it came from.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub source: String,
    pub image: RgbImage,
}

/// Check type then size, without decoding.
pub fn validate(file: &UploadFile) -> Result<(), ValidationError> {
    if !file.mime.starts_with("image/") {
        return Err(ValidationError::NotAnImage {
            mime: file.mime.clone(),
        });
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge {
            size: file.bytes.len(),
        });
    }
    Ok(())
}

/// Validate and decode one file.
pub fn accept(file: UploadFile) -> Result<ImageHandle, ValidationError> {
    validate(&file)?;
    let image = image::load_from_memory(&file.bytes)?.to_rgb8();
    Ok(ImageHandle {
        source: file.name,
        image,
    })
}

/// Accept the first file of a batch; the rest are ignored.
/// Returns `None` for an empty batch.
pub fn accept_first(
    files: impl IntoIterator<Item = UploadFile>,
) -> Option<Result<ImageHandle, ValidationError>> {
    files.into_iter().next().map(accept)
}

/// Upload entry point for views: reports the outcome through the notifier.
pub struct ImageUploader {
    notifier: Notifier,
}

impl ImageUploader {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    pub fn upload(&self, file: UploadFile) -> Result<ImageHandle, ValidationError> {
        match accept(file) {
            Ok(handle) => {
                tracing::info!(
                    source = %handle.source,
                    width = handle.image.width(),
                    height = handle.image.height(),
                    "image uploaded"
                );
                self.notifier.show("Image uploaded successfully", Severity::Success);
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "upload rejected");
                self.notifier.show(e.user_message(), Severity::Error);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([10, 20, 30]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn file(name: &str, mime: &str, bytes: Vec<u8>) -> UploadFile {
        UploadFile {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    #[test]
    fn test_accepts_small_png() {
        let handle = accept(file("a.png", "image/png", png_bytes(8, 4))).unwrap();
        assert_eq!(handle.source, "a.png");
        assert_eq!(handle.image.dimensions(), (8, 4));
    }

    #[test]
    fn test_rejects_six_megabytes() {
        let notifier = Notifier::default();
        let uploader = ImageUploader::new(notifier.clone());
        let err = uploader
            .upload(file("big.jpg", "image/jpeg", vec![0u8; 6 * 1024 * 1024]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { size } if size == 6 * 1024 * 1024));

        let toasts = notifier.active();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].severity, Severity::Error);
        assert_eq!(toasts[0].message, "Image size should be less than 5MB");
    }

    #[test]
    fn test_rejects_non_image_before_size() {
        let notifier = Notifier::default();
        let uploader = ImageUploader::new(notifier.clone());
        let err = uploader
            .upload(file("notes.txt", "text/plain", vec![0u8; 6 * 1024 * 1024]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotAnImage { .. }));
        assert_eq!(notifier.active()[0].message, "Please upload an image file");
    }

    #[test]
    fn test_exact_limit_passes_size_check() {
        let f = file("edge.png", "image/png", vec![0u8; MAX_UPLOAD_BYTES]);
        assert!(validate(&f).is_ok());
    }

    #[test]
    fn test_corrupt_image_reports_upload_error() {
        let notifier = Notifier::default();
        let uploader = ImageUploader::new(notifier.clone());
        let err = uploader.upload(file("bad.png", "image/png", vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, ValidationError::Decode(_)));
        assert_eq!(notifier.active()[0].message, "Error uploading image");
    }

    #[test]
    fn test_success_toast() {
        let notifier = Notifier::default();
        let uploader = ImageUploader::new(notifier.clone());
        uploader.upload(file("a.png", "image/png", png_bytes(2, 2))).unwrap();
        let toasts = notifier.active();
        assert_eq!(toasts[0].severity, Severity::Success);
        assert_eq!(toasts[0].message, "Image uploaded successfully");
    }

    #[test]
    fn test_only_first_file_of_batch() {
        let batch = vec![
            file("first.png", "image/png", png_bytes(3, 3)),
            file("second.txt", "text/plain", vec![]),
        ];
        let handle = accept_first(batch).unwrap().unwrap();
        assert_eq!(handle.source, "first.png");
        assert!(accept_first(Vec::new()).is_none());
    }

    #[test]
    fn test_from_path_stops_reading_past_limit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("huge.png");
        let mut contents = png_bytes(2, 2);
        contents.resize(8 * 1024 * 1024, 0);
        std::fs::write(&path, contents).unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.bytes.len(), MAX_UPLOAD_BYTES + 1);
        assert_eq!(file.mime, "image/png");
        assert!(matches!(validate(&file), Err(ValidationError::TooLarge { .. })));
    }

    #[test]
    fn test_from_path_sniffs_mime() {
        let tmp = tempfile::TempDir::new().unwrap();
        let png = tmp.path().join("photo.bin");
        std::fs::write(&png, png_bytes(2, 2)).unwrap();
        assert_eq!(UploadFile::from_path(&png).unwrap().mime, "image/png");

        let txt = tmp.path().join("readme.txt");
        std::fs::write(&txt, b"hello").unwrap();
        assert_eq!(UploadFile::from_path(&txt).unwrap().mime, FALLBACK_MIME);
    }
}
