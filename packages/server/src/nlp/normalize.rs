//! Normalization of generated questions.
//!
//! The NLP service has been observed answering in two option shapes (a 4-key
//! object or an array of `{id, text}` pairs) and two field casings (camelCase
//! and snake_case). Each observed variant is modelled explicitly and mapped
//! to one canonical record; an unrecognized shape is an error, never a record
//! with silently-defaulted fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Difficulty;

pub const OPTION_IDS: [&str; 4] = ["A", "B", "C", "D"];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("question {index} has an unrecognized shape: {source}")]
    UnrecognizedShape {
        index: usize,
        source: serde_json::Error,
    },
    #[error("question {index} has {count} options, expected 4")]
    WrongOptionCount { index: usize, count: usize },
    #[error("question {index} options must be lettered A-D, got {ids:?}")]
    BadOptionIds { index: usize, ids: Vec<String> },
    #[error("question {index} correct answer {answer:?} is not one of A-D")]
    BadCorrectAnswer { index: usize, answer: String },
    #[error("question {index} has empty question text")]
    EmptyText { index: usize },
}

/// A single answer option in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// Canonical question record, the only shape that reaches persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub quality_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page: Option<i32>,
}

// ============================================================================
// Observed wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(rename = "questionText", alias = "question_text")]
    question_text: String,
    options: RawOptions,
    #[serde(rename = "correctAnswer", alias = "correct_answer")]
    correct_answer: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    difficulty: Difficulty,
    #[serde(rename = "qualityScore", alias = "quality_score", default)]
    quality_score: f64,
    #[serde(rename = "sourcePage", alias = "source_page", default)]
    source_page: Option<i32>,
}

/// The two option shapes the service emits.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOptions {
    Keyed {
        #[serde(rename = "A", alias = "a")]
        a: String,
        #[serde(rename = "B", alias = "b")]
        b: String,
        #[serde(rename = "C", alias = "c")]
        c: String,
        #[serde(rename = "D", alias = "d")]
        d: String,
    },
    Listed(Vec<RawOption>),
}

#[derive(Debug, Deserialize)]
struct RawOption {
    id: String,
    text: String,
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize every generated question or fail on the first bad one.
pub fn normalize_questions(
    raw: &[serde_json::Value],
) -> Result<Vec<QuizQuestion>, NormalizeError> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| normalize_one(index, value))
        .collect()
}

fn normalize_one(index: usize, value: &serde_json::Value) -> Result<QuizQuestion, NormalizeError> {
    let raw: RawQuestion = serde_json::from_value(value.clone())
        .map_err(|source| NormalizeError::UnrecognizedShape { index, source })?;

    if raw.question_text.trim().is_empty() {
        return Err(NormalizeError::EmptyText { index });
    }

    let options = match raw.options {
        RawOptions::Keyed { a, b, c, d } => [a, b, c, d]
            .into_iter()
            .zip(OPTION_IDS)
            .map(|(text, id)| QuestionOption {
                id: id.to_string(),
                text: text.trim().to_string(),
            })
            .collect::<Vec<_>>(),
        RawOptions::Listed(listed) => {
            if listed.len() != 4 {
                return Err(NormalizeError::WrongOptionCount {
                    index,
                    count: listed.len(),
                });
            }
            let mut options: Vec<QuestionOption> = listed
                .into_iter()
                .map(|o| QuestionOption {
                    id: o.id.trim().to_uppercase(),
                    text: o.text.trim().to_string(),
                })
                .collect();
            options.sort_by(|a, b| a.id.cmp(&b.id));
            let ids: Vec<&str> = options.iter().map(|o| o.id.as_str()).collect();
            if ids != OPTION_IDS {
                return Err(NormalizeError::BadOptionIds {
                    index,
                    ids: ids.into_iter().map(String::from).collect(),
                });
            }
            options
        }
    };

    let correct_answer = raw.correct_answer.trim().to_uppercase();
    if !OPTION_IDS.contains(&correct_answer.as_str()) {
        return Err(NormalizeError::BadCorrectAnswer {
            index,
            answer: raw.correct_answer,
        });
    }

    Ok(QuizQuestion {
        question_text: raw.question_text.trim().to_string(),
        options,
        correct_answer,
        explanation: raw.explanation.trim().to_string(),
        difficulty: raw.difficulty,
        quality_score: raw.quality_score.clamp(0.0, 1.0),
        source_page: raw.source_page,
    })
}
