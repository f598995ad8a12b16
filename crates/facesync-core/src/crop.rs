//! Face snapshot cropping.
//!
//! Cuts the detected face rectangle (plus a margin for hair and chin) out of
//! the original image and re-encodes it as JPEG.

use crate::types::BoundingBox;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Margin added on every side, as a fraction of the box size (1/4).
const CROP_MARGIN_DIVISOR: u32 = 4;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot encode snapshot: {0}")]
    Encode(#[source] image::ImageError),
    #[error("face region {0:?} lies outside the {1}x{2} image")]
    EmptyRegion(BoundingBox, u32, u32),
}

/// A decoded source image that any number of face snapshots can be cut from.
pub struct SourceImage {
    img: DynamicImage,
}

impl SourceImage {
    pub fn decode(image: &[u8]) -> Result<Self, CropError> {
        let img = image::load_from_memory(image).map_err(CropError::Decode)?;
        Ok(Self { img })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.img.width(), self.img.height())
    }

    /// Crop `face` (with margin) and return JPEG bytes.
    pub fn crop_face(&self, face: &BoundingBox) -> Result<Vec<u8>, CropError> {
        let (img_w, img_h) = self.dimensions();
        let (x, y, w, h) =
            padded_region(face, img_w, img_h).ok_or(CropError::EmptyRegion(*face, img_w, img_h))?;

        let cropped = DynamicImage::ImageRgb8(self.img.crop_imm(x, y, w, h).to_rgb8());
        let mut out = Cursor::new(Vec::new());
        cropped
            .write_to(&mut out, ImageFormat::Jpeg)
            .map_err(CropError::Encode)?;
        Ok(out.into_inner())
    }
}

/// Decode `image` and crop a single face out of it.
pub fn crop_face(image: &[u8], face: &BoundingBox) -> Result<Vec<u8>, CropError> {
    SourceImage::decode(image)?.crop_face(face)
}

/// Grow the box by the margin and clamp it to the image bounds.
/// Returns `None` when nothing of the box is inside the image.
fn padded_region(face: &BoundingBox, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    if face.width == 0 || face.height == 0 || face.left >= img_w || face.top >= img_h {
        return None;
    }
    let mx = face.width / CROP_MARGIN_DIVISOR;
    let my = face.height / CROP_MARGIN_DIVISOR;

    let x0 = face.left.saturating_sub(mx);
    let y0 = face.top.saturating_sub(my);
    let x1 = face.left.saturating_add(face.width).saturating_add(mx).min(img_w);
    let y1 = face.top.saturating_add(face.height).saturating_add(my).min(img_h);

    Some((x0, y0, x1 - x0, y1 - y0))
}
