use std::path::{Path, PathBuf};

use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use logging_timer::time;

use crate::config::NormalizeSettings;
use crate::image_utils::{equalize_adaptive, size_image_to_fit};
use crate::types::Size;

#[derive(Debug, thiserror::Error)]
pub enum ImageLoadError {
    #[error("unable to open image {0}: {1}")]
    Open(PathBuf, #[source] image::ImageError),
    #[error("unable to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Loads an image from disk as grayscale.
#[time]
pub fn load_sheet_image(image_path: &Path) -> Result<GrayImage, ImageLoadError> {
    match image::open(image_path) {
        Ok(img) => Ok(img.into_luma8()),
        Err(e) => Err(ImageLoadError::Open(image_path.to_path_buf(), e)),
    }
}

/// Decodes an in-memory JPEG/PNG as grayscale.
pub fn decode_sheet_image(bytes: &[u8]) -> Result<GrayImage, ImageLoadError> {
    Ok(image::load_from_memory(bytes)?.into_luma8())
}

/// Brings a raw grayscale photo to the working resolution and evens out its
/// lighting: resize, local contrast equalization, then a light blur to
/// suppress sensor noise and paper texture.
#[time]
pub fn normalize_image(
    img: &GrayImage,
    working_size: Size<u32>,
    settings: &NormalizeSettings,
) -> GrayImage {
    let resized = size_image_to_fit(img, working_size.width, working_size.height);
    let equalized = equalize_adaptive(&resized, settings.clahe_clip_limit, settings.clahe_tiles);
    if settings.blur_sigma > 0.0 {
        gaussian_blur_f32(&equalized, settings.blur_sigma)
    } else {
        equalized
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image_utils::WHITE;

    #[test]
    fn test_normalize_resizes_to_working_size() {
        let img = GrayImage::from_pixel(300, 500, WHITE);
        let normalized = normalize_image(
            &img,
            Size {
                width: 120,
                height: 160,
            },
            &NormalizeSettings::default(),
        );
        assert_eq!(normalized.dimensions(), (120, 160));
    }

    #[test]
    fn test_load_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_sheet_image(&dir.path().join("missing.png"));
        assert!(matches!(result, Err(ImageLoadError::Open(..))));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_sheet_image(b"definitely not an image"),
            Err(ImageLoadError::Decode(_))
        ));
    }

    #[test]
    fn test_load_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.png");
        GrayImage::from_pixel(20, 30, WHITE).save(&path).unwrap();
        let loaded = load_sheet_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (20, 30));
    }
}
