use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::decide::DecisionThresholds;
use crate::layout::Layout;
use crate::scoring::FillScorer;
use crate::types::Size;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read detector params {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("unable to parse detector params: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("detector params define no methods")]
    NoMethods,
    #[error("selection weights must both be positive, got {0:?}")]
    InvalidSelectionWeights(SelectionWeights),
    #[error("size {0:?} must be non-zero")]
    EmptySize(Size<u32>),
}

/// Tunable detector parameters. Loaded once per batch and shared read-only
/// between sheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorParams {
    /// Resolution every input image is resized to before anything else.
    pub working_size: Size<u32>,
    /// Resolution of the perspective-corrected sheet.
    pub rectified_size: Size<u32>,
    pub sheet_location: SheetLocation,
    pub normalize: NormalizeSettings,
    pub locator: LocatorSettings,
    pub bubble_filter: BubbleFilter,
    /// Fraction of each cell's size trimmed from every side before sampling,
    /// which keeps printed grid lines out of the fill metrics.
    pub cell_inset: f32,
    pub selection: SelectionWeights,
    pub methods: Vec<MethodConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SheetLocation {
    /// Find the largest quadrilateral contour and warp it.
    Contour,
    /// Treat the whole image as the sheet.
    FullFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizeSettings {
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub blur_sigma: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocatorSettings {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Polygon approximation tolerance as a fraction of contour perimeter.
    pub approx_epsilon: f64,
    /// Quadrilaterals smaller than this fraction of the image are ignored.
    pub min_area_fraction: f32,
}

/// Shape filter for bubble contours, in rectified-sheet pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BubbleFilter {
    pub min_area: f32,
    pub max_area: f32,
    pub min_circularity: f32,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    pub min_size: u32,
    pub max_size: u32,
    pub min_extent: f32,
    pub min_bubbles: usize,
    /// A horizontal gap this many times the row's mean gap separates two
    /// questions.
    pub gap_factor: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionWeights {
    pub detection: f32,
    pub diversity: f32,
}

/// One competing detection method: how to cut the sheet into cells, how to
/// score each cell, and how to turn scores into an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodConfig {
    pub name: String,
    pub layout: Layout,
    pub scorer: FillScorer,
    pub thresholds: DecisionThresholds,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            blur_sigma: 1.0,
        }
    }
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            canny_low: 10.0,
            canny_high: 70.0,
            approx_epsilon: 0.02,
            min_area_fraction: 0.02,
        }
    }
}

impl Default for BubbleFilter {
    fn default() -> Self {
        Self {
            min_area: 80.0,
            max_area: 800.0,
            min_circularity: 0.4,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 2.0,
            min_size: 5,
            max_size: 50,
            min_extent: 0.3,
            min_bubbles: 20,
            gap_factor: 1.8,
        }
    }
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            detection: 0.7,
            diversity: 0.3,
        }
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            working_size: Size {
                width: 600,
                height: 800,
            },
            rectified_size: Size {
                width: 600,
                height: 800,
            },
            sheet_location: SheetLocation::Contour,
            normalize: NormalizeSettings::default(),
            locator: LocatorSettings::default(),
            bubble_filter: BubbleFilter::default(),
            cell_inset: 0.15,
            selection: SelectionWeights::default(),
            methods: default_methods(),
        }
    }
}

/// The built-in ensemble.
pub fn default_methods() -> Vec<MethodConfig> {
    vec![
        MethodConfig {
            name: "uniform-dark-ratio".to_string(),
            layout: Layout::Uniform,
            scorer: FillScorer::DarkPixelRatio { threshold: 130 },
            thresholds: DecisionThresholds {
                min_score: 0.15,
                min_confidence: 0.1,
                definite_score: 0.5,
            },
        },
        MethodConfig {
            name: "blocks-dark-ratio".to_string(),
            layout: Layout::ColumnBlocks {
                sections: 4,
                header_fraction: 0.1,
            },
            scorer: FillScorer::DarkPixelRatio { threshold: 130 },
            thresholds: DecisionThresholds {
                min_score: 0.15,
                min_confidence: 0.1,
                definite_score: 0.5,
            },
        },
        MethodConfig {
            name: "blocks-composite".to_string(),
            layout: Layout::ColumnBlocks {
                sections: 5,
                header_fraction: 0.15,
            },
            scorer: FillScorer::Composite,
            thresholds: DecisionThresholds {
                min_score: 0.15,
                min_confidence: 0.05,
                definite_score: 0.3,
            },
        },
        MethodConfig {
            name: "blocks-background-normalized".to_string(),
            layout: Layout::ColumnBlocks {
                sections: 5,
                header_fraction: 0.15,
            },
            scorer: FillScorer::BackgroundNormalized,
            thresholds: DecisionThresholds {
                min_score: 0.15,
                min_confidence: 0.05,
                definite_score: 0.25,
            },
        },
        MethodConfig {
            name: "contour-composite".to_string(),
            layout: Layout::ContourClusters,
            scorer: FillScorer::Composite,
            thresholds: DecisionThresholds {
                min_score: 0.15,
                min_confidence: 0.05,
                definite_score: 0.3,
            },
        },
    ]
}

impl DetectorParams {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let params: DetectorParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.methods.is_empty() {
            return Err(ConfigError::NoMethods);
        }
        if !(self.selection.detection > 0.0 && self.selection.diversity > 0.0) {
            return Err(ConfigError::InvalidSelectionWeights(self.selection));
        }
        for size in [self.working_size, self.rectified_size] {
            if size.width == 0 || size.height == 0 {
                return Err(ConfigError::EmptySize(size));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = DetectorParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.methods.len(), 5);
    }

    #[test]
    fn test_params_json_round_trip() {
        let params = DetectorParams::default();
        let json = params.to_json().unwrap();
        assert_eq!(DetectorParams::from_json(&json).unwrap(), params);
    }

    #[test]
    fn test_partial_params_fill_defaults() {
        let params = DetectorParams::from_json(
            r#"{
                "sheetLocation": "full-frame",
                "bubbleFilter": { "minArea": 40 },
                "methods": [{
                    "name": "only",
                    "layout": { "type": "column-blocks", "sections": 5, "headerFraction": 0.15 },
                    "scorer": { "type": "background-normalized" },
                    "thresholds": { "minScore": 0.1, "minConfidence": 0.05, "definiteScore": 0.3 }
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(params.sheet_location, SheetLocation::FullFrame);
        assert_eq!(params.bubble_filter.min_area, 40.0);
        assert_eq!(params.bubble_filter.max_area, 800.0);
        assert_eq!(params.methods.len(), 1);
        assert_eq!(params.methods[0].scorer, FillScorer::BackgroundNormalized);
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            DetectorParams::from_json(r#"{ "methods": [] }"#),
            Err(ConfigError::NoMethods)
        ));
        assert!(matches!(
            DetectorParams::from_json(r#"{ "selection": { "detection": 1.0, "diversity": 0.0 } }"#),
            Err(ConfigError::InvalidSelectionWeights(_))
        ));
        assert!(matches!(
            DetectorParams::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_params_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, DetectorParams::default().to_json().unwrap()).unwrap();
        assert_eq!(
            DetectorParams::from_json_file(&path).unwrap(),
            DetectorParams::default()
        );
        assert!(matches!(
            DetectorParams::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Read(..))
        ));
    }
}
