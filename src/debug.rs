use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use log::{debug, warn};

use crate::decide::Answer;
use crate::geometry::{inset_rect, Quadrilateral};
use crate::image_utils::{BLUE, CYAN, GREEN, PINK, RAINBOW, RED};
use crate::layout::CellGrid;

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    result.set_file_name(format!("{}_debug_{}.png", stem, label));
    result
}

/// Writes annotated copies of intermediate images next to the input image.
/// A disabled writer does nothing, so stages can call it unconditionally.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path: Some(input_path),
        }
    }

    pub fn disabled() -> Self {
        Self { input_path: None }
    }

    /// Draws on a color copy of `base` and saves it as `<stem>_debug_<label>.png`.
    /// Returns the written path, or `None` when disabled or saving failed.
    pub fn write(
        &self,
        label: &str,
        base: &GrayImage,
        draw: impl FnOnce(&mut RgbImage),
    ) -> Option<PathBuf> {
        let input_path = self.input_path.as_ref()?;
        let mut canvas = DynamicImage::ImageLuma8(base.clone()).into_rgb8();
        draw(&mut canvas);

        let path = debug_image_path(input_path, label);
        match canvas.save(&path) {
            Ok(()) => {
                debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("unable to write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Draws the located sheet boundary, one color per edge.
pub fn draw_sheet_outline_debug_image_mut(canvas: &mut RgbImage, corners: &Quadrilateral) {
    draw_line_segment_mut(canvas, corners.top_left, corners.top_right, GREEN);
    draw_line_segment_mut(canvas, corners.bottom_left, corners.bottom_right, BLUE);
    draw_line_segment_mut(canvas, corners.top_left, corners.bottom_left, RED);
    draw_line_segment_mut(canvas, corners.top_right, corners.bottom_right, CYAN);

    for (x, y) in corners.corners() {
        draw_cross_mut(canvas, PINK, x.round() as i32, y.round() as i32);
    }
}

/// Outlines every cell in its question's color and double-outlines the
/// chosen cell of each answered question.
pub fn draw_cells_debug_image_mut(canvas: &mut RgbImage, grid: &CellGrid, answers: &[Answer]) {
    for (question, cells) in grid.questions.iter().enumerate() {
        let chosen = answers
            .get(question)
            .and_then(|answer| answer.choice)
            .map(|choice| choice.index());

        for cell in cells {
            if chosen == Some(cell.choice) {
                draw_hollow_rect_mut(canvas, cell.bounds, GREEN);
                draw_hollow_rect_mut(canvas, inset_rect(&cell.bounds, 0.1), GREEN);
            } else {
                draw_hollow_rect_mut(canvas, cell.bounds, RAINBOW[question % RAINBOW.len()]);
            }
        }
    }
}
