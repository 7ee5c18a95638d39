use log::debug;
use serde::Serialize;

use crate::answer_key::{AnswerKey, AnswerKeyStore, KeySetName, KeyStoreError};
use crate::decide::Answer;
use crate::types::Choice;

/// How one keyed question was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question: usize,
    pub expected: Choice,
    pub answered: Option<Choice>,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub correct_count: usize,
    pub total_questions: usize,
    pub per_question: Vec<QuestionOutcome>,
    pub percentage: f64,
}

/// Which answer key set a sheet is graded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelection {
    Named(KeySetName),
    /// Grade against every set and keep the best match.
    Auto,
}

/// Grades answers against a key. Every key entry counts towards the total; a
/// question is correct only when a choice was detected and matches the key.
pub fn score_answers(answers: &[Answer], key: &AnswerKey) -> ScoreReport {
    let per_question: Vec<_> = key
        .iter()
        .map(|(question, expected)| {
            let answered = answers.get(question).and_then(|answer| answer.choice);
            QuestionOutcome {
                question,
                expected,
                answered,
                correct: answered == Some(expected),
            }
        })
        .collect();

    let correct_count = per_question.iter().filter(|o| o.correct).count();
    let total_questions = key.len();
    let percentage = if total_questions == 0 {
        0.0
    } else {
        correct_count as f64 / total_questions as f64 * 100.0
    };

    ScoreReport {
        correct_count,
        total_questions,
        per_question,
        percentage,
    }
}

/// Grades against every set and returns the one with the highest percentage.
/// Only a strictly higher percentage replaces the current pick, so ties go to
/// the set loaded first.
pub fn detect_key_set<'a>(
    answers: &[Answer],
    store: &'a AnswerKeyStore,
) -> Result<(&'a KeySetName, ScoreReport), KeyStoreError> {
    let mut best: Option<(&KeySetName, ScoreReport)> = None;
    for (name, key) in store.iter() {
        let report = score_answers(answers, key);
        debug!("key set {} scores {:.1}%", name, report.percentage);
        if best
            .as_ref()
            .map_or(true, |(_, best_report)| report.percentage > best_report.percentage)
        {
            best = Some((name, report));
        }
    }
    best.ok_or(KeyStoreError::NoKeySets)
}

/// Grades against the selected key set.
pub fn grade(
    answers: &[Answer],
    store: &AnswerKeyStore,
    selection: &KeySelection,
) -> Result<(KeySetName, ScoreReport), KeyStoreError> {
    match selection {
        KeySelection::Named(name) => {
            let key = store.get(name)?;
            Ok((name.clone(), score_answers(answers, key)))
        }
        KeySelection::Auto => {
            let (name, report) = detect_key_set(answers, store)?;
            Ok((name.clone(), report))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn answers(letters: &str) -> Vec<Answer> {
        letters
            .chars()
            .enumerate()
            .map(|(question, letter)| Answer {
                question,
                choice: Choice::from_letter(letter).ok(),
                confidence: 0.0,
                scores: Vec::new(),
            })
            .collect()
    }

    fn key(letters: &str) -> AnswerKey {
        AnswerKey::from_choices(letters.chars().filter_map(|c| Choice::from_letter(c).ok()))
    }

    fn name(s: &str) -> KeySetName {
        KeySetName::from(s.to_string())
    }

    #[test]
    fn test_blank_answer_is_wrong() {
        let report = score_answers(&answers("AB-D"), &key("ABCD"));
        assert_eq!(report.correct_count, 3);
        assert_eq!(report.total_questions, 4);
        assert_eq!(report.percentage, 75.0);
        assert!(!report.per_question[2].correct);
        assert_eq!(report.per_question[2].answered, None);
    }

    #[test]
    fn test_total_follows_key_length() {
        // answers beyond the key are ignored, key entries without answers are wrong
        let report = score_answers(&answers("ABCDA"), &key("ABC"));
        assert_eq!((report.correct_count, report.total_questions), (3, 3));
        let report = score_answers(&answers("AB"), &key("ABCD"));
        assert_eq!((report.correct_count, report.total_questions), (2, 4));
        assert_eq!(report.percentage, 50.0);
    }

    #[test]
    fn test_empty_key_scores_zero() {
        let report = score_answers(&answers("ABCD"), &AnswerKey::new());
        assert_eq!(report.total_questions, 0);
        assert_eq!(report.percentage, 0.0);
    }

    #[test]
    fn test_detect_key_set() {
        let mut store = AnswerKeyStore::new();
        store.insert(name("first"), key("AAAA"));
        store.insert(name("second"), key("ABCD"));
        store.insert(name("third"), key("ABCD"));

        let (detected, report) = detect_key_set(&answers("ABCA"), &store).unwrap();
        assert_eq!(detected, &name("second"));
        assert_eq!(report.correct_count, 3);
    }

    #[test]
    fn test_detect_key_set_ties_go_to_first() {
        let mut store = AnswerKeyStore::new();
        store.insert(name("x"), key("AB"));
        store.insert(name("y"), key("BA"));
        let (detected, _) = detect_key_set(&answers("--"), &store).unwrap();
        assert_eq!(detected, &name("x"));
    }

    #[test]
    fn test_grade_errors() {
        let store = AnswerKeyStore::new();
        assert!(matches!(
            grade(&answers("A"), &store, &KeySelection::Auto),
            Err(KeyStoreError::NoKeySets)
        ));
        assert!(matches!(
            grade(&answers("A"), &store, &KeySelection::Named(name("nope"))),
            Err(KeyStoreError::UnknownKeySet(_))
        ));
    }
}
