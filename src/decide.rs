use serde::{Deserialize, Serialize};

use crate::types::Choice;

/// Limits that turn a question's fill scores into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionThresholds {
    /// The best score must reach this to count as a mark at all.
    pub min_score: f32,
    /// Required lead of the best score over the runner-up.
    pub min_confidence: f32,
    /// A best score above this is accepted regardless of the lead.
    pub definite_score: f32,
}

/// The decision for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Zero-based question index.
    pub question: usize,
    /// The chosen option, or `None` for blank or ambiguous questions.
    pub choice: Option<Choice>,
    /// Lead of the best score over the runner-up.
    pub confidence: f32,
    pub scores: Vec<f32>,
}

impl Answer {
    pub fn is_detected(&self) -> bool {
        self.choice.is_some()
    }
}

/// Picks the marked choice from a question's scores.
///
/// The highest score wins, with the earliest choice winning ties. It is
/// rejected when below `min_score`. Otherwise it is accepted when it leads the
/// runner-up by more than `min_confidence` or is itself above
/// `definite_score`; the latter also covers questions with a single score,
/// which have no runner-up to lead.
pub fn decide_answer(question: usize, scores: Vec<f32>, thresholds: &DecisionThresholds) -> Answer {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((i, score));
        }
    }

    let Some((best_index, best_score)) = best else {
        return Answer {
            question,
            choice: None,
            confidence: 0.0,
            scores,
        };
    };

    let runner_up = scores
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best_index)
        .map(|(_, score)| *score)
        .reduce(f32::max);
    let confidence = runner_up.map_or(0.0, |second| best_score - second);

    let accepted = best_score >= thresholds.min_score
        && ((runner_up.is_some() && confidence > thresholds.min_confidence)
            || best_score > thresholds.definite_score);

    let choice = if accepted {
        Choice::from_index(best_index).ok()
    } else {
        None
    };

    Answer {
        question,
        choice,
        confidence,
        scores,
    }
}

/// Decides every question of a scored sheet.
pub fn decide_answers(scores: Vec<Vec<f32>>, thresholds: &DecisionThresholds) -> Vec<Answer> {
    scores
        .into_iter()
        .enumerate()
        .map(|(question, scores)| decide_answer(question, scores, thresholds))
        .collect()
}
