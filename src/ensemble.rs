use image::GrayImage;
use log::{debug, warn};
use logging_timer::time;
use rayon::prelude::*;
use serde::Serialize;

use crate::bubbles::BubbleError;
use crate::config::{DetectorParams, MethodConfig, SelectionWeights};
use crate::debug::{draw_cells_debug_image_mut, ImageDebugWriter};
use crate::decide::{decide_answers, Answer};
use crate::types::SheetShape;

/// The answers one method read from a sheet, with the figures the selector
/// ranks methods by.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResult {
    pub method: String,
    /// One answer per question, in question order.
    pub answers: Vec<Answer>,
    /// Fraction of questions with a detected choice.
    pub detection_rate: f32,
    /// How evenly detected answers spread over the choices; 0 when every
    /// detected answer is the same choice or nothing was detected.
    pub diversity: f32,
    pub selection_score: f32,
}

/// A method that could not produce answers for a sheet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{method}: {error}")]
pub struct MethodFailure {
    pub method: String,
    pub error: BubbleError,
}

impl MethodResult {
    pub fn new(method: String, answers: Vec<Answer>, weights: &SelectionWeights) -> Self {
        let detection_rate = detection_rate(&answers);
        let diversity = diversity(&answers);
        Self {
            method,
            answers,
            detection_rate,
            diversity,
            selection_score: weights.detection * detection_rate + weights.diversity * diversity,
        }
    }

    pub fn detected_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_detected()).count()
    }
}

pub fn detection_rate(answers: &[Answer]) -> f32 {
    if answers.is_empty() {
        return 0.0;
    }
    let detected = answers.iter().filter(|a| a.is_detected()).count();
    detected as f32 / answers.len() as f32
}

pub fn diversity(answers: &[Answer]) -> f32 {
    let mut counts = [0usize; crate::types::Choice::MAX_CHOICES];
    let mut detected = 0;
    for choice in answers.iter().filter_map(|a| a.choice) {
        counts[choice.index()] += 1;
        detected += 1;
    }
    if detected == 0 {
        return 0.0;
    }
    let most_common = counts.iter().copied().max().unwrap_or(0);
    1.0 - most_common as f32 / detected as f32
}

/// Runs one method over a rectified sheet.
#[time]
pub fn run_method(
    img: &GrayImage,
    shape: SheetShape,
    method: &MethodConfig,
    params: &DetectorParams,
    debug: &ImageDebugWriter,
) -> Result<MethodResult, MethodFailure> {
    let grid = method
        .layout
        .partition(img, shape, &params.bubble_filter)
        .map_err(|error| MethodFailure {
            method: method.name.clone(),
            error,
        })?;
    let scores = method.scorer.score_grid(img, &grid, params.cell_inset);
    let answers = decide_answers(scores, &method.thresholds);

    debug.write(&method.name, img, |canvas| {
        draw_cells_debug_image_mut(canvas, &grid, &answers)
    });

    let result = MethodResult::new(method.name.clone(), answers, &params.selection);
    debug!(
        "{}: detected {}/{}, diversity {:.2}, selection score {:.3}",
        result.method,
        result.detected_count(),
        shape.questions,
        result.diversity,
        result.selection_score
    );
    Ok(result)
}

/// Runs every configured method in parallel. Results keep the configured
/// order; failed methods are logged and returned separately.
pub fn run_methods(
    img: &GrayImage,
    shape: SheetShape,
    params: &DetectorParams,
    debug: &ImageDebugWriter,
) -> (Vec<MethodResult>, Vec<MethodFailure>) {
    let outcomes: Vec<_> = params
        .methods
        .par_iter()
        .map(|method| run_method(img, shape, method, params, debug))
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(failure) => {
                warn!("method {} failed: {}", failure.method, failure.error);
                failures.push(failure);
            }
        }
    }
    (results, failures)
}

/// Picks the method with the highest selection score. Only a strictly higher
/// score replaces the current pick, so ties go to the earlier method.
pub fn select_best(results: &[MethodResult]) -> Option<&MethodResult> {
    let mut best: Option<&MethodResult> = None;
    for result in results {
        if best.map_or(true, |b| result.selection_score > b.selection_score) {
            best = Some(result);
        }
    }
    best
}
