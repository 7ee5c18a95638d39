use std::path::Path;

use image::GrayImage;
use log::{debug, info};
use logging_timer::time;
use serde::Serialize;

use crate::answer_key::AnswerKey;
use crate::config::DetectorParams;
use crate::debug::ImageDebugWriter;
use crate::decide::DecisionThresholds;
use crate::interpret::{prepare_sheet, read_answers, InterpretSheetError};
use crate::normalize::load_sheet_image;
use crate::score::score_answers;
use crate::types::SheetShape;

/// Multipliers tried for each decision threshold.
const THRESHOLD_MULTIPLIERS: [f32; 4] = [0.5, 0.75, 1.25, 1.5];
const MIN_AREA_CANDIDATES: [f32; 4] = [40.0, 50.0, 60.0, 80.0];
const MIN_CIRCULARITY_CANDIDATES: [f32; 3] = [0.3, 0.4, 0.5];

/// Tuned parameters and how much they improved on the starting point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationOutcome {
    pub params: DetectorParams,
    pub initial_objective: f64,
    pub objective: f64,
    /// Candidate parameter sets evaluated.
    pub trials: usize,
}

/// How well a parameter set reads a sheet with known answers: the graded
/// percentage plus up to 10 points for the share of questions detected.
fn objective(
    rectified: &GrayImage,
    shape: SheetShape,
    params: &DetectorParams,
    key: &AnswerKey,
) -> Result<f64, InterpretSheetError> {
    let (best, _) = read_answers(rectified, shape, params, &ImageDebugWriter::disabled())?;
    let report = score_answers(&best.answers, key);
    let detected = best.detected_count() as f64 / shape.questions.max(1) as f64;
    Ok(report.percentage + detected * 10.0)
}

#[derive(Debug, Clone, Copy)]
enum ThresholdField {
    MinScore,
    MinConfidence,
    DefiniteScore,
}

impl ThresholdField {
    const ALL: [ThresholdField; 3] = [
        ThresholdField::MinScore,
        ThresholdField::MinConfidence,
        ThresholdField::DefiniteScore,
    ];

    fn get(self, thresholds: &DecisionThresholds) -> f32 {
        match self {
            ThresholdField::MinScore => thresholds.min_score,
            ThresholdField::MinConfidence => thresholds.min_confidence,
            ThresholdField::DefiniteScore => thresholds.definite_score,
        }
    }

    fn get_mut(self, thresholds: &mut DecisionThresholds) -> &mut f32 {
        match self {
            ThresholdField::MinScore => &mut thresholds.min_score,
            ThresholdField::MinConfidence => &mut thresholds.min_confidence,
            ThresholdField::DefiniteScore => &mut thresholds.definite_score,
        }
    }
}

/// Sweeps decision thresholds of every method, then the bubble filter's
/// minimum area and circularity, one value at a time against a rectified
/// sheet whose answers are known. A candidate is kept only when it strictly
/// improves the objective. The input parameters are left untouched.
#[time]
pub fn calibrate(
    rectified: &GrayImage,
    shape: SheetShape,
    params: &DetectorParams,
    key: &AnswerKey,
) -> Result<CalibrationOutcome, InterpretSheetError> {
    let initial_objective = objective(rectified, shape, params, key)?;
    let mut best = params.clone();
    let mut best_objective = initial_objective;
    let mut trials = 0;

    let mut consider = |candidate: DetectorParams, best: &mut DetectorParams, best_objective: &mut f64| {
        trials += 1;
        match objective(rectified, shape, &candidate, key) {
            Ok(score) if score > *best_objective => {
                debug!("calibration improved objective {:.2} -> {:.2}", best_objective, score);
                *best = candidate;
                *best_objective = score;
            }
            Ok(_) => {}
            Err(e) => debug!("calibration candidate failed: {}", e),
        }
    };

    for method_index in 0..params.methods.len() {
        for field in ThresholdField::ALL {
            let base = field.get(&best.methods[method_index].thresholds);
            for multiplier in THRESHOLD_MULTIPLIERS {
                let mut candidate = best.clone();
                *field.get_mut(&mut candidate.methods[method_index].thresholds) = base * multiplier;
                consider(candidate, &mut best, &mut best_objective);
            }
        }
    }

    for min_area in MIN_AREA_CANDIDATES {
        let mut candidate = best.clone();
        candidate.bubble_filter.min_area = min_area;
        consider(candidate, &mut best, &mut best_objective);
    }
    for min_circularity in MIN_CIRCULARITY_CANDIDATES {
        let mut candidate = best.clone();
        candidate.bubble_filter.min_circularity = min_circularity;
        consider(candidate, &mut best, &mut best_objective);
    }

    info!(
        "calibration objective {:.2} -> {:.2} after {} trials",
        initial_objective, best_objective, trials
    );
    Ok(CalibrationOutcome {
        params: best,
        initial_objective,
        objective: best_objective,
        trials,
    })
}

/// Loads the sheet at `path` and calibrates against its known answers.
pub fn calibrate_sheet(
    path: &Path,
    shape: SheetShape,
    params: &DetectorParams,
    key: &AnswerKey,
) -> Result<CalibrationOutcome, InterpretSheetError> {
    if !shape.is_valid() {
        return Err(InterpretSheetError::InvalidShape(shape));
    }
    params.validate()?;
    let img = load_sheet_image(path)?;
    let sheet = prepare_sheet(&img, params, &ImageDebugWriter::disabled())?;
    calibrate(&sheet.image, shape, params, key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MethodConfig;
    use crate::image_utils::WHITE;
    use crate::layout::Layout;
    use crate::scoring::FillScorer;
    use crate::types::Choice;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    /// 4 questions x 4 choices on a 400x400 rectified sheet. Question `q`
    /// marks choice `q` with a faint fill covering about a third of the
    /// sampled cell.
    fn faint_sheet() -> GrayImage {
        let mut img = GrayImage::from_pixel(400, 400, WHITE);
        for q in 0..4 {
            let x = q * 100 + 30;
            let y = q * 100 + 30;
            draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(40, 40), Luma([60]));
        }
        img
    }

    fn single_method_params(min_score: f32) -> DetectorParams {
        DetectorParams {
            methods: vec![MethodConfig {
                name: "uniform".to_string(),
                layout: Layout::Uniform,
                scorer: FillScorer::DarkPixelRatio { threshold: 130 },
                thresholds: DecisionThresholds {
                    min_score,
                    min_confidence: 0.1,
                    definite_score: 0.5,
                },
            }],
            ..DetectorParams::default()
        }
    }

    fn diagonal_key() -> AnswerKey {
        AnswerKey::from_choices((0..4).map(|i| Choice::from_index(i).unwrap()))
    }

    #[test]
    fn test_calibration_lowers_a_too_strict_threshold() {
        // marks cover 1600 of 4900 sampled pixels, about 0.33
        let params = single_method_params(0.4);
        let outcome = calibrate(&faint_sheet(), SheetShape::new(4, 4), &params, &diagonal_key()).unwrap();

        assert_eq!(outcome.initial_objective, 0.0);
        assert_eq!(outcome.objective, 110.0);
        assert!(outcome.params.methods[0].thresholds.min_score < 0.33);
        assert_eq!(params.methods[0].thresholds.min_score, 0.4);
        assert_eq!(outcome.trials, 3 * 4 + 4 + 3);
    }

    #[test]
    fn test_calibration_keeps_good_params() {
        let params = single_method_params(0.15);
        let outcome = calibrate(&faint_sheet(), SheetShape::new(4, 4), &params, &diagonal_key()).unwrap();
        assert_eq!(outcome.initial_objective, 110.0);
        assert_eq!(outcome.params, params);
    }
}
