//! Nearest-profile lookup by Euclidean distance.

use crate::types::{DetectedFace, Embedding, MatchResult, Profile, UNKNOWN_NAME};

/// Maximum Euclidean distance (exclusive) for two embeddings to be the same person.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// Best gallery hit for a single probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeMatch {
    /// Index into the gallery of the winning profile (if under threshold).
    pub profile_index: Option<usize>,
    /// Distance to the winning embedding (if under threshold).
    pub distance: Option<f32>,
    /// Cosine similarity to the winning embedding, reported in logs only.
    pub similarity: Option<f32>,
}

/// Strategy for comparing a probe embedding against a gallery of profiles.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Profile], threshold: f32) -> ProbeMatch;
}

/// Linear nearest-neighbour scan over every descriptor of every profile.
///
/// Only a strictly smaller distance replaces the current best, so on ties the
/// first candidate in gallery order (then descriptor order) wins.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Profile], threshold: f32) -> ProbeMatch {
        let mut best: Option<(usize, f32, &Embedding)> = None;

        for (i, profile) in gallery.iter().enumerate() {
            for descriptor in &profile.descriptors {
                let distance = descriptor.euclidean_distance(probe);
                if distance < threshold && best.map_or(true, |(_, d, _)| distance < d) {
                    best = Some((i, distance, descriptor));
                }
            }
        }

        ProbeMatch {
            profile_index: best.map(|(i, _, _)| i),
            distance: best.map(|(_, d, _)| d),
            similarity: best.map(|(_, _, descriptor)| descriptor.similarity(probe)),
        }
    }
}

/// Label every detected face with its nearest profile, or [`UNKNOWN_NAME`].
///
/// Returns one result per face in input order. An empty face list or an
/// empty profile list yields an empty result.
pub fn match_faces(faces: &[DetectedFace], profiles: &[Profile]) -> Vec<MatchResult> {
    if faces.is_empty() || profiles.is_empty() {
        return Vec::new();
    }

    let matcher = EuclideanMatcher;
    faces
        .iter()
        .map(|face| {
            let hit = matcher.compare(&face.embedding, profiles, MATCH_THRESHOLD);
            if let (Some(i), Some(distance)) = (hit.profile_index, hit.distance) {
                tracing::debug!(
                    profile = %profiles[i].id,
                    distance,
                    similarity = hit.similarity.unwrap_or_default(),
                    "face matched"
                );
            }
            let name = hit
                .profile_index
                .map(|i| profiles[i].name.clone())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());
            MatchResult {
                bbox: face.bbox.clone(),
                name,
                distance: hit.distance,
            }
        })
        .collect()
}
