//! Five-point face alignment.
//!
//! Fits a similarity transform (uniform scale, rotation, translation) from the
//! detected landmarks onto the ArcFace reference layout, then warps the face
//! into a square crop.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Side of the aligned crop, in pixels.
pub const ALIGNED_SIZE: usize = 112;

/// Reference landmark positions in a 112x112 crop:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Returns `None` when the source points are all coincident.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = centroid(src);
        let (dmx, dmy) = centroid(dst);

        let (mut dot, mut cross, mut spread) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - smx, sy - smy);
            let (dx, dy) = (dx - dmx, dy - dmy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-12 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    #[rustfmt::skip]
    fn projection(&self) -> Option<Projection> {
        Projection::from_matrix([
            self.a, -self.b, self.tx,
            self.b, self.a, self.ty,
            0.0, 0.0, 1.0,
        ])
    }
}

/// Warp `image` through `transform` into a black `out_size` square.
fn warp(image: &RgbImage, transform: &Similarity, out_size: usize) -> RgbImage {
    let black = Rgb([0, 0, 0]);
    let mut output = RgbImage::from_pixel(out_size as u32, out_size as u32, black);
    match transform.projection() {
        Some(projection) => {
            warp_into(image, &projection, Interpolation::Bilinear, black, &mut output)
        }
        None => tracing::warn!(?transform, "singular alignment transform"),
    }
    output
}

/// Crop and align a face to the `ALIGNED_SIZE` square ArcFace expects.
///
/// Degenerate landmarks yield an all-black crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    match Similarity::fit(landmarks, &REFERENCE_LANDMARKS) {
        Some(transform) => warp(image, &transform, ALIGNED_SIZE),
        None => RgbImage::new(ALIGNED_SIZE as u32, ALIGNED_SIZE as u32),
    }
}
