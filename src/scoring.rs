use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::geometry::inset_rect;
use crate::image_utils::{image_percentile, percentile_of_sorted, region_values};
use crate::layout::{Cell, CellGrid};

/// Baseline assumed for a choice position that no question could sample.
const DEFAULT_BASELINE: f32 = 200.0;
/// Questions sampled to build per-position baselines.
const BASELINE_SAMPLE_QUESTIONS: usize = 50;
/// Luma difference below the sheet background that counts as a dark pixel.
const COMPOSITE_DARK_OFFSET: f32 = 40.0;
/// Luma difference below a position's baseline that counts as a mark pixel.
const NORMALIZED_MARK_OFFSET: f32 = 20.0;

/// How a cell's pixels become a markedness score. Every variant returns
/// higher values for darker cells and roughly `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum FillScorer {
    /// Fraction of pixels darker than a fixed luma level.
    #[serde(rename = "dark-pixel-ratio")]
    DarkPixelRatio { threshold: u8 },

    /// Weighted mix of mean darkness, darkest-quintile darkness, dark pixel
    /// fraction and texture, all measured against the sheet's 90th
    /// percentile luma as the paper background.
    #[serde(rename = "composite")]
    Composite,

    /// Darkening relative to what the same choice position looks like on
    /// most questions, which cancels out printed letters or outlines that
    /// differ between choice columns. The minimum and 10th-percentile shifts
    /// only count as far as the median moved, so a thin printed outline
    /// crossing a cell never registers as a mark on its own.
    #[serde(rename = "background-normalized")]
    BackgroundNormalized,
}

/// Luma statistics of one cell's interior.
#[derive(Debug, Clone, PartialEq)]
struct CellStats {
    sorted: Vec<u8>,
    mean: f32,
    std_dev: f32,
}

impl CellStats {
    fn sample(img: &GrayImage, cell: &Cell, inset: f32) -> Option<Self> {
        let mut sorted = region_values(img, &inset_rect(&cell.bounds, inset));
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        let n = sorted.len() as f32;
        let mean = sorted.iter().map(|&v| v as f32).sum::<f32>() / n;
        let variance = sorted
            .iter()
            .map(|&v| (v as f32 - mean).powi(2))
            .sum::<f32>()
            / n;
        Some(Self {
            sorted,
            mean,
            std_dev: variance.sqrt(),
        })
    }

    fn percentile(&self, p: f32) -> f32 {
        percentile_of_sorted(&self.sorted, p).unwrap_or(255.0)
    }

    fn fraction_below(&self, level: f32) -> f32 {
        let below = self.sorted.partition_point(|&v| (v as f32) < level);
        below as f32 / self.sorted.len() as f32
    }
}

/// Expected clean-paper statistics for one choice position.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PositionBaseline {
    median: f32,
    darkest: f32,
    low: f32,
}

enum Reference {
    Fixed,
    Sheet(f32),
    PerPosition(Vec<PositionBaseline>),
}

impl FillScorer {
    /// Scores every located cell. The result holds one vector per question:
    /// `choices` scores indexed by choice, or an empty vector when the
    /// question has no cells.
    pub fn score_grid(&self, img: &GrayImage, grid: &CellGrid, inset: f32) -> Vec<Vec<f32>> {
        let reference = self.reference(img, grid, inset);
        grid.questions
            .iter()
            .map(|cells| {
                if cells.is_empty() {
                    return Vec::new();
                }
                let mut scores = vec![0.0; grid.shape.choices];
                for cell in cells {
                    if let Some(stats) = CellStats::sample(img, cell, inset) {
                        scores[cell.choice] = self.score(&stats, cell.choice, &reference);
                    }
                }
                scores
            })
            .collect()
    }

    fn reference(&self, img: &GrayImage, grid: &CellGrid, inset: f32) -> Reference {
        match self {
            FillScorer::DarkPixelRatio { .. } => Reference::Fixed,
            FillScorer::Composite => {
                Reference::Sheet(image_percentile(img, 90.0).unwrap_or(255.0))
            }
            FillScorer::BackgroundNormalized => {
                Reference::PerPosition(position_baselines(img, grid, inset))
            }
        }
    }

    fn score(&self, stats: &CellStats, choice: usize, reference: &Reference) -> f32 {
        match (self, reference) {
            (FillScorer::DarkPixelRatio { threshold }, _) => stats.fraction_below(*threshold as f32),

            (FillScorer::Composite, Reference::Sheet(background)) if *background > 0.0 => {
                let background = *background;
                let mean_darkness = ((background - stats.mean) / background).clamp(0.0, 1.0);
                let low_darkness = ((background - stats.percentile(20.0)) / background).clamp(0.0, 1.0);
                let dark_fraction = stats.fraction_below(background - COMPOSITE_DARK_OFFSET);
                let texture = (stats.std_dev / 50.0).clamp(0.0, 1.0);
                mean_darkness * 0.3 + low_darkness * 0.3 + dark_fraction * 0.3 + texture * 0.1
            }

            (FillScorer::BackgroundNormalized, Reference::PerPosition(baselines)) => {
                let baseline = baselines.get(choice).copied().unwrap_or(PositionBaseline {
                    median: DEFAULT_BASELINE,
                    darkest: DEFAULT_BASELINE,
                    low: DEFAULT_BASELINE,
                });
                let median_shift = ((baseline.median - stats.percentile(50.0)) / 50.0).clamp(0.0, 1.0);
                let darkest_shift = ((baseline.darkest - stats.percentile(0.0)) / 60.0).clamp(0.0, 1.0);
                let low_shift = ((baseline.low - stats.percentile(10.0)) / 60.0).clamp(0.0, 1.0);
                let mark_fraction = stats.fraction_below(baseline.median - NORMALIZED_MARK_OFFSET);
                let extremes = low_shift * 0.6 + darkest_shift * 0.4;
                median_shift * 0.4 + mark_fraction * 0.4 + extremes * median_shift * 0.2
            }

            _ => 0.0,
        }
    }
}

/// Samples up to [`BASELINE_SAMPLE_QUESTIONS`] located questions and takes,
/// per choice position, the 75th percentile of the cells' median, minimum and
/// 10th-percentile luma. Using the upper quartile keeps the baseline on clean
/// paper even when most sampled questions were answered with the same
/// choice.
fn position_baselines(img: &GrayImage, grid: &CellGrid, inset: f32) -> Vec<PositionBaseline> {
    let mut medians = vec![Vec::new(); grid.shape.choices];
    let mut darkest = vec![Vec::new(); grid.shape.choices];
    let mut lows = vec![Vec::new(); grid.shape.choices];

    for cells in grid
        .questions
        .iter()
        .filter(|cells| !cells.is_empty())
        .take(BASELINE_SAMPLE_QUESTIONS)
    {
        for cell in cells {
            if let Some(stats) = CellStats::sample(img, cell, inset) {
                medians[cell.choice].push(stats.percentile(50.0));
                darkest[cell.choice].push(stats.percentile(0.0));
                lows[cell.choice].push(stats.percentile(10.0));
            }
        }
    }

    medians
        .into_iter()
        .zip(darkest)
        .zip(lows)
        .map(|((medians, darkest), lows)| PositionBaseline {
            median: upper_quartile(medians).unwrap_or(DEFAULT_BASELINE),
            darkest: upper_quartile(darkest).unwrap_or(DEFAULT_BASELINE),
            low: upper_quartile(lows).unwrap_or(DEFAULT_BASELINE),
        })
        .collect()
}

fn upper_quartile(mut values: Vec<f32>) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (0.75 * (values.len() - 1) as f32).round() as usize;
    values.get(rank).copied()
}
