use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::models::{BreakdownEntry, Difficulty, QuizAttempt, QuizResult};

/// Bucket for questions without a category in the category breakdown.
pub const UNCATEGORIZED: &str = "uncategorized";

/// The parts of a question the aggregator needs.
#[derive(Debug, Clone, Copy)]
pub struct QuestionMeta {
    pub id: Uuid,
    pub difficulty: Difficulty,
    pub category_id: Option<Uuid>,
}

/// Latest attempt per question. `attempts` must be in submission order.
pub fn latest_attempts(attempts: &[QuizAttempt]) -> HashMap<Uuid, &QuizAttempt> {
    let mut latest = HashMap::with_capacity(attempts.len());
    for attempt in attempts {
        latest.insert(attempt.question_id, attempt);
    }
    latest
}

/// `round(100 * correct / total)`, 0 for an empty quiz.
pub fn score(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(correct) / f64::from(total)).round() as u32
}

/// Summarise a session. `questions` is the session's question list in order;
/// attempts for questions outside it are ignored.
pub fn aggregate(
    session_id: Uuid,
    questions: &[QuestionMeta],
    attempts: &[QuizAttempt],
    completed_at: DateTime<Utc>,
) -> QuizResult {
    let latest = latest_attempts(attempts);
    let total_questions = questions.len() as u32;

    let mut difficulty_breakdown: BTreeMap<Difficulty, BreakdownEntry> = Difficulty::ALL
        .iter()
        .map(|d| (*d, BreakdownEntry::default()))
        .collect();
    let mut category_breakdown: BTreeMap<String, BreakdownEntry> = BTreeMap::new();

    let mut correct_answers = 0u32;
    let mut total_time_spent = 0u32;

    for question in questions {
        let attempt = latest.get(&question.id);
        let is_correct = attempt.is_some_and(|a| a.is_correct);
        if let Some(attempt) = attempt {
            total_time_spent = total_time_spent.saturating_add(attempt.time_spent_seconds);
        }
        if is_correct {
            correct_answers += 1;
        }

        let category_key = question
            .category_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());

        for entry in [
            difficulty_breakdown.entry(question.difficulty).or_default(),
            category_breakdown.entry(category_key).or_default(),
        ] {
            entry.total += 1;
            if is_correct {
                entry.correct += 1;
            }
        }
    }

    let average_time_per_question = if total_questions == 0 {
        0
    } else {
        (f64::from(total_time_spent) / f64::from(total_questions)).round() as u32
    };

    QuizResult {
        session_id,
        score: score(correct_answers, total_questions),
        correct_answers,
        total_questions,
        total_time_spent,
        average_time_per_question,
        difficulty_breakdown,
        category_breakdown,
        completed_at,
    }
}
