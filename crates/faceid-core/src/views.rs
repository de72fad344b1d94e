//! Page-level views: Home, Recognize, Profiles, Gallery.
//!
//! Views own only transient page state. The profile store, model state and
//! notifier are owned by the caller and passed in by reference.

use crate::analyzer::{AnalyzeError, FaceAnalyzer};
use crate::canvas::DetectionCanvas;
use crate::matcher::match_faces;
use crate::models::ModelState;
use crate::storage::KeyValueStore;
use crate::store::ProfileStore;
use crate::toast::{Notifier, Severity};
use crate::types::{DetectedFace, Embedding, MatchResult, Profile, ProfileUpdate, UNKNOWN_NAME};
use crate::upload::{ImageUploader, UploadFile, ValidationError};
use ab_glyph::FontArc;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("face recognition models are not loaded")]
    ModelsNotReady,
    #[error("no image uploaded")]
    NoImage,
    #[error("no faces detected to add as profile")]
    NoFaces,
    #[error("profile name is empty")]
    EmptyName,
    #[error(transparent)]
    Upload(#[from] ValidationError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

/// Landing page numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeSummary {
    pub profile_count: usize,
    pub descriptor_count: usize,
    pub models: ModelState,
}

pub struct HomeView;

impl HomeView {
    pub fn summary<S: KeyValueStore>(store: &ProfileStore<S>, models: &ModelState) -> HomeSummary {
        HomeSummary {
            profile_count: store.len(),
            descriptor_count: store.descriptor_count(),
            models: models.clone(),
        }
    }
}

/// A detected face waiting to be saved under a name.
#[derive(Debug, Clone)]
pub struct PendingProfile {
    pub descriptor: Embedding,
    pub image_url: String,
}

/// Upload → detect → identify flow for a single image.
pub struct RecognizeView {
    notifier: Notifier,
    uploader: ImageUploader,
    label_font: Option<FontArc>,
    canvas: Option<DetectionCanvas>,
    detected: Option<Vec<DetectedFace>>,
    results: Option<Vec<MatchResult>>,
}

impl RecognizeView {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            uploader: ImageUploader::new(notifier.clone()),
            notifier,
            label_font: None,
            canvas: None,
            detected: None,
            results: None,
        }
    }

    pub fn with_label_font(mut self, font: FontArc) -> Self {
        self.label_font = Some(font);
        self
    }

    /// Load a new image, discarding detections and results from the previous one.
    ///
    /// A rejected file leaves the current state untouched.
    pub fn upload(&mut self, file: UploadFile) -> Result<(), ViewError> {
        let handle = self.uploader.upload(file)?;
        let canvas = DetectionCanvas::new(handle);
        self.canvas = Some(match &self.label_font {
            Some(font) => canvas.with_label_font(font.clone()),
            None => canvas,
        });
        self.detected = None;
        self.results = None;
        Ok(())
    }

    /// Run face detection on the uploaded image.
    pub fn detect<A, S>(
        &mut self,
        analyzer: &mut A,
        models: &ModelState,
        store: &ProfileStore<S>,
    ) -> Result<&[DetectedFace], ViewError>
    where
        A: FaceAnalyzer + ?Sized,
        S: KeyValueStore,
    {
        if !models.is_ready() {
            self.notifier.show("Error loading face detection models", Severity::Error);
            return Err(ViewError::ModelsNotReady);
        }
        let canvas = self.canvas.as_mut().ok_or(ViewError::NoImage)?;

        self.detected = None;
        self.results = None;
        let faces = canvas.process(analyzer, &self.notifier)?.to_vec();

        if !faces.is_empty() && store.is_empty() {
            self.notifier.show(
                "You have no profiles created. Create profiles to recognize faces.",
                Severity::Info,
            );
        }

        Ok(self.detected.insert(faces).as_slice())
    }

    /// Label the detected faces against the stored profiles.
    ///
    /// Without detections this does nothing. Without profiles it warns and
    /// produces no results.
    pub fn identify<S: KeyValueStore>(
        &mut self,
        models: &ModelState,
        store: &ProfileStore<S>,
    ) -> Result<&[MatchResult], ViewError> {
        let Some(detected) = self.detected.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(&[]);
        };
        if !models.is_ready() {
            return Err(ViewError::ModelsNotReady);
        }
        if store.is_empty() {
            self.notifier.show(
                "You need to create facial profiles before identifying people",
                Severity::Warning,
            );
            return Ok(&[]);
        }

        let results = match_faces(detected, store.list());
        // Counted by label, so a profile literally named "Unknown" counts as unknown.
        let known = results.iter().filter(|r| r.name != UNKNOWN_NAME).count();
        tracing::info!(faces = results.len(), known, "faces identified");

        if known == 0 {
            self.notifier.show("No known faces were recognized", Severity::Info);
        } else {
            self.notifier
                .show(format!("{known} face(s) recognized successfully"), Severity::Success);
        }

        Ok(self.results.insert(results).as_slice())
    }

    /// The first detected face, ready to be saved as a new profile.
    pub fn pending_profile(&self) -> Result<PendingProfile, ViewError> {
        let (Some(canvas), Some(face)) = (
            self.canvas.as_ref(),
            self.detected.as_ref().and_then(|d| d.first()),
        ) else {
            self.notifier.show("No faces detected to add as profile", Severity::Error);
            return Err(ViewError::NoFaces);
        };

        Ok(PendingProfile {
            descriptor: face.embedding.clone(),
            image_url: canvas.source().source.clone(),
        })
    }

    /// Render the current image with boxes, and labels once identified.
    pub fn render(&self) -> Option<RgbImage> {
        self.canvas
            .as_ref()
            .map(|canvas| canvas.draw(self.results.as_deref()))
    }

    pub fn reset(&mut self) {
        self.canvas = None;
        self.detected = None;
        self.results = None;
    }

    pub fn has_image(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn detected(&self) -> Option<&[DetectedFace]> {
        self.detected.as_deref()
    }

    pub fn results(&self) -> Option<&[MatchResult]> {
        self.results.as_deref()
    }
}

/// Profile management page.
pub struct ProfilesView {
    notifier: Notifier,
}

impl ProfilesView {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    pub fn list<'a, S: KeyValueStore>(&self, store: &'a ProfileStore<S>) -> &'a [Profile] {
        store.list()
    }

    /// Save a pending face under `name`. Returns the new profile id.
    pub fn create<S: KeyValueStore>(
        &self,
        store: &mut ProfileStore<S>,
        name: &str,
        pending: PendingProfile,
    ) -> Result<String, ViewError> {
        let name = name.trim();
        if name.is_empty() {
            self.notifier.show("Please enter a name for the profile", Severity::Error);
            return Err(ViewError::EmptyName);
        }
        let id = store.add(name, pending.descriptor, &pending.image_url);
        self.notifier.show("Profile created successfully", Severity::Success);
        Ok(id)
    }

    /// Rename a profile. An unknown id is ignored silently.
    pub fn rename<S: KeyValueStore>(
        &self,
        store: &mut ProfileStore<S>,
        id: &str,
        name: &str,
    ) -> Result<(), ViewError> {
        let name = name.trim();
        if name.is_empty() {
            self.notifier.show("Please enter a name for the profile", Severity::Error);
            return Err(ViewError::EmptyName);
        }
        if store.update(id, ProfileUpdate::name(name)) {
            self.notifier.show("Profile updated successfully", Severity::Success);
        }
        Ok(())
    }

    /// Add another face sample to a profile. An unknown id is ignored silently.
    pub fn add_descriptor<S: KeyValueStore>(
        &self,
        store: &mut ProfileStore<S>,
        id: &str,
        pending: PendingProfile,
    ) {
        if store.append_descriptor(id, pending.descriptor) {
            self.notifier.show("Face added to profile", Severity::Success);
        }
    }

    /// Delete a profile. The confirmation is shown whether or not the id existed.
    pub fn delete<S: KeyValueStore>(&self, store: &mut ProfileStore<S>, id: &str) {
        store.delete(id);
        self.notifier.show("Profile deleted successfully", Severity::Success);
    }
}

/// What the gallery page shows for the current search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryStatus {
    NoProfiles,
    NoMatches,
    Showing(usize),
}

/// Browse profiles, filtered by a case-insensitive name search.
#[derive(Default)]
pub struct GalleryView {
    search: String,
}

impl GalleryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    pub fn visible<'a, S: KeyValueStore>(&self, store: &'a ProfileStore<S>) -> Vec<&'a Profile> {
        let needle = self.search.to_lowercase();
        store
            .list()
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn status<S: KeyValueStore>(&self, store: &ProfileStore<S>) -> GalleryStatus {
        if store.is_empty() {
            return GalleryStatus::NoProfiles;
        }
        match self.visible(store).len() {
            0 => GalleryStatus::NoMatches,
            n => GalleryStatus::Showing(n),
        }
    }
}
