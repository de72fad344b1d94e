//! Profile store: the single owner of every named face profile.
//!
//! The whole collection is written as one JSON array under [`PROFILES_KEY`]
//! after each mutation, and read back once when the store is opened.

use crate::storage::KeyValueStore;
use crate::types::{Embedding, Profile, ProfileUpdate};
use chrono::{SubsecRound, Utc};
use tokio::sync::watch;

/// Slot name holding the serialized profile collection.
pub const PROFILES_KEY: &str = "faceProfiles";

/// Owns the profile collection and mirrors it to a key-value slot.
///
/// Views hold a reference to the store and call [`subscribe`](Self::subscribe)
/// to learn when the collection changed; the receiver carries a revision
/// counter bumped on every mutation.
pub struct ProfileStore<S: KeyValueStore> {
    storage: S,
    profiles: Vec<Profile>,
    revision: watch::Sender<u64>,
}

impl<S: KeyValueStore> ProfileStore<S> {
    /// Open the store, loading any previously saved profiles.
    ///
    /// Absent, unreadable, or malformed data yields an empty store. The
    /// failure is logged and otherwise ignored.
    pub fn open(storage: S) -> Self {
        let profiles = load_profiles(&storage);
        tracing::info!(count = profiles.len(), "profile store opened");
        let (revision, _) = watch::channel(0);
        Self {
            storage,
            profiles,
            revision,
        }
    }

    /// Create a profile holding a single embedding. Returns the new id.
    pub fn add(&mut self, name: &str, embedding: Embedding, image_url: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.profiles.push(Profile {
            id: id.clone(),
            name: name.to_string(),
            descriptors: vec![embedding],
            image_url: image_url.to_string(),
            created_at: Utc::now().trunc_subsecs(3),
        });
        tracing::info!(id = %id, name, "profile added");
        self.changed();
        id
    }

    /// Merge the provided fields into an existing profile.
    ///
    /// An unknown id is ignored. Returns whether a profile was updated.
    pub fn update(&mut self, id: &str, update: ProfileUpdate) -> bool {
        let Some(profile) = self.profiles.iter_mut().find(|p| p.id == id) else {
            tracing::debug!(id, "update: no such profile, ignored");
            return false;
        };
        if update.is_empty() {
            tracing::debug!(id, "update: no fields given, nothing saved");
            return true;
        }

        if let Some(name) = update.name {
            profile.name = name;
        }
        if let Some(image_url) = update.image_url {
            profile.image_url = image_url;
        }
        if let Some(descriptors) = update.descriptors {
            profile.descriptors = descriptors;
        }

        tracing::info!(id, "profile updated");
        self.changed();
        true
    }

    /// Append one more embedding to an existing profile.
    ///
    /// An unknown id is ignored. Returns whether a profile was updated.
    pub fn append_descriptor(&mut self, id: &str, embedding: Embedding) -> bool {
        let Some(profile) = self.profiles.iter_mut().find(|p| p.id == id) else {
            tracing::debug!(id, "append_descriptor: no such profile, ignored");
            return false;
        };
        profile.descriptors.push(embedding);
        tracing::info!(id, count = profile.descriptors.len(), "descriptor appended");
        self.changed();
        true
    }

    /// Remove a profile. An unknown id is ignored. Returns whether one was removed.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != id);
        if self.profiles.len() == before {
            tracing::debug!(id, "delete: no such profile, ignored");
            return false;
        }
        tracing::info!(id, "profile deleted");
        self.changed();
        true
    }

    /// All profiles in insertion order.
    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Total number of embeddings across all profiles.
    pub fn descriptor_count(&self) -> usize {
        self.profiles.iter().map(|p| p.descriptors.len()).sum()
    }

    /// Receive a revision counter bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn changed(&mut self) {
        self.persist();
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Write the collection to storage.
    ///
    /// An empty collection is not written, so removing the last profile
    /// leaves the previous contents in the slot and they reload on the next
    /// open.
    fn persist(&mut self) {
        if self.profiles.is_empty() {
            tracing::debug!("profile collection empty, skipping save");
            return;
        }

        let json = match serde_json::to_string(&self.profiles) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize profiles");
                return;
            }
        };

        if let Err(e) = self.storage.set(PROFILES_KEY, &json) {
            tracing::error!(error = %e, "failed to save profiles");
        }
    }
}

fn load_profiles<S: KeyValueStore>(storage: &S) -> Vec<Profile> {
    let raw = match storage.get(PROFILES_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read saved profiles");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Profile>>(&raw) {
        Ok(profiles) => profiles,
        Err(e) => {
            tracing::error!(error = %e, "saved profiles are malformed, starting empty");
            Vec::new()
        }
    }
}
