//! Detection canvas: runs analysis on an uploaded image and renders boxes
//! and name labels onto a width-capped copy of it.

use crate::analyzer::{AnalyzeError, FaceAnalyzer};
use crate::toast::{Notifier, Severity};
use crate::types::{BoundingBox, DetectedFace, MatchResult};
use crate::upload::ImageHandle;
use ab_glyph::FontArc;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

/// Widest rendered output; larger images are scaled down to this width.
pub const MAX_DISPLAY_WIDTH: u32 = 640;

const BOX_COLOR: Rgb<u8> = Rgb([0x3B, 0x82, 0xF6]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_LINE_WIDTH: i32 = 2;
const LABEL_HEIGHT: u32 = 30;
const LABEL_CHAR_WIDTH: u32 = 9;
const LABEL_PADDING: u32 = 20;
const LABEL_FONT_SIZE: f32 = 16.0;

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("failed to read font {path}: {source}")]
    FontRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    InvalidFont(String),
}

/// Load a TTF/OTF font for name labels.
pub fn load_label_font(path: &Path) -> Result<FontArc, CanvasError> {
    let bytes = std::fs::read(path).map_err(|e| CanvasError::FontRead {
        path: path.display().to_string(),
        source: e,
    })?;
    FontArc::try_from_vec(bytes).map_err(|_| CanvasError::InvalidFont(path.display().to_string()))
}

/// Output size for an image, capping the width and keeping the aspect ratio.
pub fn display_size(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DISPLAY_WIDTH {
        return (width, height);
    }
    let ratio = MAX_DISPLAY_WIDTH as f32 / width as f32;
    let scaled_height = ((height as f32 * ratio).round() as u32).max(1);
    (MAX_DISPLAY_WIDTH, scaled_height)
}

pub struct DetectionCanvas {
    source: ImageHandle,
    display: RgbImage,
    scale: f32,
    faces: Vec<DetectedFace>,
    font: Option<FontArc>,
}

impl DetectionCanvas {
    pub fn new(source: ImageHandle) -> Self {
        let (width, height) = source.image.dimensions();
        let (display_w, display_h) = display_size(width, height);
        let display = if (display_w, display_h) == (width, height) {
            source.image.clone()
        } else {
            imageops::resize(&source.image, display_w, display_h, FilterType::Triangle)
        };
        let scale = if width > 0 { display_w as f32 / width as f32 } else { 1.0 };

        Self {
            source,
            display,
            scale,
            faces: Vec::new(),
            font: None,
        }
    }

    /// Render name text inside label boxes with this font.
    pub fn with_label_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn source(&self) -> &ImageHandle {
        &self.source
    }

    pub fn display_dimensions(&self) -> (u32, u32) {
        self.display.dimensions()
    }

    /// Faces from the last successful [`process`](Self::process), in display coordinates.
    pub fn faces(&self) -> &[DetectedFace] {
        &self.faces
    }

    /// Run the analyzer over the full-resolution image and keep the results
    /// scaled to display size. Outcomes are reported through the notifier.
    pub fn process<A: FaceAnalyzer + ?Sized>(
        &mut self,
        analyzer: &mut A,
        notifier: &Notifier,
    ) -> Result<&[DetectedFace], AnalyzeError> {
        let detected = match analyzer.analyze(&self.source.image) {
            Ok(detected) => detected,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    source = %self.source.source,
                    "image processing failed"
                );
                notifier.show("Error processing image", Severity::Error);
                self.faces.clear();
                return Err(e);
            }
        };

        self.faces = detected
            .into_iter()
            .map(|face| DetectedFace {
                bbox: face.bbox.scaled(self.scale),
                embedding: face.embedding,
            })
            .collect();

        if self.faces.is_empty() {
            notifier.show("No faces detected in the image", Severity::Warning);
        } else {
            notifier.show(format!("{} face(s) detected", self.faces.len()), Severity::Success);
        }

        Ok(&self.faces)
    }

    /// Render a fresh frame: the display image, a box per face, and, when
    /// `matches` is given, a name label above each matched box.
    ///
    /// Every call starts from the clean display image.
    pub fn draw(&self, matches: Option<&[MatchResult]>) -> RgbImage {
        let mut frame = self.display.clone();

        match matches {
            Some(matches) => {
                for m in matches {
                    stroke_box(&mut frame, &m.bbox);
                    self.draw_label(&mut frame, &m.bbox, &m.name);
                }
            }
            None => {
                for face in &self.faces {
                    stroke_box(&mut frame, &face.bbox);
                }
            }
        }

        frame
    }

    fn draw_label(&self, frame: &mut RgbImage, bbox: &BoundingBox, name: &str) {
        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32 - LABEL_HEIGHT as i32;
        let width = name.chars().count() as u32 * LABEL_CHAR_WIDTH + LABEL_PADDING;

        draw_filled_rect_mut(frame, Rect::at(x, y).of_size(width, LABEL_HEIGHT), BOX_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(frame, TEXT_COLOR, x + 10, y + 6, LABEL_FONT_SIZE, font, name);
        }
    }
}

fn stroke_box(frame: &mut RgbImage, bbox: &BoundingBox) {
    let x = bbox.x.round() as i32;
    let y = bbox.y.round() as i32;
    let width = bbox.width.round().max(1.0) as u32;
    let height = bbox.height.round().max(1.0) as u32;

    for inset in 0..BOX_LINE_WIDTH {
        let w = width.saturating_sub(2 * inset as u32).max(1);
        let h = height.saturating_sub(2 * inset as u32).max(1);
        draw_hollow_rect_mut(frame, Rect::at(x + inset, y + inset).of_size(w, h), BOX_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::{face_at, StaticAnalyzer};
    use crate::types::UNKNOWN_NAME;

    const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

    fn handle(width: u32, height: u32) -> ImageHandle {
        ImageHandle {
            source: "photo.png".into(),
            image: RgbImage::from_pixel(width, height, BACKGROUND),
        }
    }

    #[test]
    fn test_display_size_caps_width() {
        assert_eq!(display_size(1280, 720), (640, 360));
        assert_eq!(display_size(640, 480), (640, 480));
        assert_eq!(display_size(300, 900), (300, 900));
        assert_eq!(display_size(6400, 5), (640, 1));
    }

    #[test]
    fn test_process_scales_to_display() {
        let mut canvas = DetectionCanvas::new(handle(1280, 720));
        let mut analyzer = StaticAnalyzer::new(vec![face_at(200.0, 100.0, 80.0, &[1.0])]);
        let notifier = Notifier::default();

        let faces = canvas.process(&mut analyzer, &notifier).unwrap();
        assert_eq!(faces.len(), 1);
        let b = &faces[0].bbox;
        assert_eq!((b.x, b.y, b.width, b.height), (100.0, 50.0, 40.0, 40.0));
        assert_eq!(canvas.display_dimensions(), (640, 360));
        assert_eq!(notifier.active()[0].message, "1 face(s) detected");
    }

    #[test]
    fn test_process_reports_no_faces() {
        let mut canvas = DetectionCanvas::new(handle(100, 100));
        let notifier = Notifier::default();
        let faces = canvas.process(&mut StaticAnalyzer::new(vec![]), &notifier).unwrap();
        assert!(faces.is_empty());
        let toast = &notifier.active()[0];
        assert_eq!(toast.severity, Severity::Warning);
        assert_eq!(toast.message, "No faces detected in the image");
    }

    #[test]
    fn test_process_error_toasts() {
        let mut canvas = DetectionCanvas::new(handle(100, 100));
        let notifier = Notifier::default();
        assert!(canvas.process(&mut StaticAnalyzer::failing(), &notifier).is_err());
        assert_eq!(notifier.active()[0].message, "Error processing image");
        assert!(canvas.faces().is_empty());
    }

    #[test]
    fn test_draw_strokes_boxes() {
        let mut canvas = DetectionCanvas::new(handle(100, 100));
        let mut analyzer = StaticAnalyzer::new(vec![face_at(20.0, 40.0, 30.0, &[1.0])]);
        canvas.process(&mut analyzer, &Notifier::default()).unwrap();

        let frame = canvas.draw(None);
        assert_eq!(*frame.get_pixel(20, 40), BOX_COLOR);
        assert_eq!(*frame.get_pixel(21, 41), BOX_COLOR);
        assert_eq!(*frame.get_pixel(35, 55), BACKGROUND);
    }

    #[test]
    fn test_labels_drawn_above_box_and_redraw_clears() {
        let mut canvas = DetectionCanvas::new(handle(200, 200));
        let mut analyzer = StaticAnalyzer::new(vec![face_at(50.0, 100.0, 40.0, &[1.0])]);
        canvas.process(&mut analyzer, &Notifier::default()).unwrap();

        let matches = vec![MatchResult {
            bbox: canvas.faces()[0].bbox.clone(),
            name: UNKNOWN_NAME.into(),
            distance: None,
        }];

        let labelled = canvas.draw(Some(&matches));
        // Label box spans 30 px above the face box.
        assert_eq!(*labelled.get_pixel(55, 80), BOX_COLOR);
        assert_eq!(*labelled.get_pixel(55, 71), BOX_COLOR);

        let plain = canvas.draw(None);
        assert_eq!(*plain.get_pixel(55, 80), BACKGROUND);
        assert_eq!(canvas.draw(None), plain);
    }
}
