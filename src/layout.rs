use image::GrayImage;
use imageproc::rect::Rect;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::bubbles::{find_bubbles, group_bubbles_into_questions, BubbleError};
use crate::config::BubbleFilter;
use crate::types::SheetShape;

/// One answer bubble region on the rectified sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub question: usize,
    pub choice: usize,
    pub bounds: Rect,
}

/// Cells grouped by question. `questions[q]` holds the cells of question `q`
/// in choice order; it is empty when the question could not be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    pub shape: SheetShape,
    pub questions: Vec<Vec<Cell>>,
}

impl CellGrid {
    fn empty(shape: SheetShape) -> Self {
        Self {
            shape,
            questions: vec![Vec::new(); shape.questions],
        }
    }

    /// Adds a cell unless it falls outside the declared shape.
    fn push(&mut self, question: usize, choice: usize, bounds: Rect) {
        if question < self.shape.questions && choice < self.shape.choices {
            self.questions[question].push(Cell {
                question,
                choice,
                bounds,
            });
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.questions.iter().flatten()
    }

    pub fn located_questions(&self) -> usize {
        self.questions.iter().filter(|cells| !cells.is_empty()).count()
    }
}

/// How a rectified sheet is cut into cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum Layout {
    /// One row per question over the full height, one column per choice.
    #[serde(rename = "uniform")]
    Uniform,

    /// `sections` side-by-side columns of questions, numbered down each
    /// column first. The top `header_fraction` of the sheet is skipped.
    #[serde(rename_all = "camelCase", rename = "column-blocks")]
    ColumnBlocks { sections: usize, header_fraction: f32 },

    /// Questions assembled from detected bubble contours.
    #[serde(rename = "contour-clusters")]
    ContourClusters,
}

impl Layout {
    pub fn partition(
        &self,
        img: &GrayImage,
        shape: SheetShape,
        filter: &BubbleFilter,
    ) -> Result<CellGrid, BubbleError> {
        let grid = match *self {
            Layout::Uniform => uniform_grid(img.width(), img.height(), shape),
            Layout::ColumnBlocks {
                sections,
                header_fraction,
            } => column_block_grid(img.width(), img.height(), shape, sections, header_fraction),
            Layout::ContourClusters => contour_cluster_grid(img, shape, filter)?,
        };
        debug!(
            "{:?} located {}/{} questions",
            self,
            grid.located_questions(),
            shape.questions
        );
        Ok(grid)
    }
}

/// Splits `length` pixels into `parts` spans whose sizes differ by at most
/// one and which together cover the whole length.
fn spans(start: u32, length: u32, parts: usize) -> impl Iterator<Item = (u32, u32)> {
    let parts = parts.max(1) as u64;
    (0..parts).map(move |i| {
        let from = start + (i * length as u64 / parts) as u32;
        let to = start + ((i + 1) * length as u64 / parts) as u32;
        (from, to)
    })
}

fn span_rect(x: (u32, u32), y: (u32, u32)) -> Option<Rect> {
    let (width, height) = (x.1 - x.0, y.1 - y.0);
    if width == 0 || height == 0 {
        return None;
    }
    Some(Rect::at(x.0 as i32, y.0 as i32).of_size(width, height))
}

pub fn uniform_grid(width: u32, height: u32, shape: SheetShape) -> CellGrid {
    let mut grid = CellGrid::empty(shape);
    for (question, rows) in spans(0, height, shape.questions).enumerate() {
        for (choice, columns) in spans(0, width, shape.choices).enumerate() {
            if let Some(bounds) = span_rect(columns, rows) {
                grid.push(question, choice, bounds);
            }
        }
    }
    grid
}

pub fn column_block_grid(
    width: u32,
    height: u32,
    shape: SheetShape,
    sections: usize,
    header_fraction: f32,
) -> CellGrid {
    let mut grid = CellGrid::empty(shape);
    let sections = sections.clamp(1, shape.questions.max(1));
    let rows_per_section = (shape.questions + sections - 1) / sections;
    let header = (height as f32 * header_fraction.clamp(0.0, 0.9)).floor() as u32;

    for (section, section_columns) in spans(0, width, sections).enumerate() {
        for (row, rows) in spans(header, height - header, rows_per_section).enumerate() {
            let question = section * rows_per_section + row;
            if question >= shape.questions {
                break;
            }
            let section_width = section_columns.1 - section_columns.0;
            for (choice, columns) in spans(section_columns.0, section_width, shape.choices).enumerate() {
                if let Some(bounds) = span_rect(columns, rows) {
                    grid.push(question, choice, bounds);
                }
            }
        }
    }
    grid
}

fn contour_cluster_grid(
    img: &GrayImage,
    shape: SheetShape,
    filter: &BubbleFilter,
) -> Result<CellGrid, BubbleError> {
    let bubbles = find_bubbles(img, filter);
    let required = filter.min_bubbles.max(shape.choices);
    if bubbles.len() < required {
        return Err(BubbleError::TooFewBubbles {
            found: bubbles.len(),
            required,
        });
    }

    let questions = group_bubbles_into_questions(&bubbles, img.height(), shape.choices, filter.gap_factor);
    let mut grid = CellGrid::empty(shape);
    for (question, group) in questions.iter().enumerate() {
        for (choice, bubble) in group {
            grid.push(question, *choice, bubble.bounds);
        }
    }
    Ok(grid)
}
