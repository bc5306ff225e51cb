use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a snake_case text enum
/// stored as TEXT in the database.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(anyhow::anyhow!(
                        "invalid {} value '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

text_enum!(Difficulty { Easy => "easy", Medium => "medium", Hard => "hard" });

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];
}

/// Difficulty selection used when building a session. `Mixed` matches every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyFilter {
    Easy,
    Medium,
    Hard,
    #[default]
    Mixed,
}

impl DifficultyFilter {
    pub fn as_difficulty(&self) -> Option<Difficulty> {
        match self {
            DifficultyFilter::Easy => Some(Difficulty::Easy),
            DifficultyFilter::Medium => Some(Difficulty::Medium),
            DifficultyFilter::Hard => Some(Difficulty::Hard),
            DifficultyFilter::Mixed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Draft,
    PendingReview,
    Published,
    Approved,
    Rejected,
}

text_enum!(QuestionStatus {
    Draft => "draft",
    PendingReview => "pending_review",
    Published => "published",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSection {
    Stem,
    Explanation,
}

text_enum!(ImageSection { Stem => "stem", Explanation => "explanation" });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionImage {
    pub id: Uuid,
    pub question_id: Uuid,
    pub url: String,
    pub alt_text: Option<String>,
    pub section: ImageSection,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub stem: String,
    pub teaching_point: Option<String>,
    pub references: Vec<String>,
    pub difficulty: Difficulty,
    pub category_id: Option<Uuid>,
    pub status: QuestionStatus,
    pub options: Vec<QuestionOption>,
    pub images: Vec<QuestionImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    pub fn correct_option_id(&self) -> Option<Uuid> {
        self.options.iter().find(|o| o.is_correct).map(|o| o.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSet {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub question_ids: Vec<Uuid>,
}

/// Audit trail entry for status changes on a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReview {
    pub id: Uuid,
    pub question_id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Quiz sessions

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    #[default]
    Tutor,
    Practice,
    Exam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    #[default]
    Untimed,
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Completed,
}

text_enum!(SessionStatus {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Completed => "completed",
});

fn default_true() -> bool {
    true
}

/// Selection criteria and display options captured when a session is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: QuizMode,
    #[serde(default)]
    pub timing: TimingMode,
    #[serde(default)]
    pub seconds_per_question: Option<u32>,
    pub question_count: u32,
    #[serde(default)]
    pub difficulty: DifficultyFilter,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    #[serde(default)]
    pub question_set_ids: Vec<Uuid>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_answers: bool,
    #[serde(default = "default_true")]
    pub show_explanations: bool,
    #[serde(default = "default_true")]
    pub allow_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub config: SessionConfig,
    pub question_ids: Vec<Uuid>,
    pub current_index: usize,
    pub status: SessionStatus,
    pub score: Option<u32>,
    pub correct_answers: Option<u32>,
    pub total_time_spent: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn total_questions(&self) -> usize {
        self.question_ids.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub selected_option_id: Option<Uuid>,
    pub is_correct: bool,
    pub time_spent_seconds: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub correct: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResult {
    pub session_id: Uuid,
    pub score: u32,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub total_time_spent: u32,
    pub average_time_per_question: u32,
    pub difficulty_breakdown: BTreeMap<Difficulty, BreakdownEntry>,
    pub category_breakdown: BTreeMap<String, BreakdownEntry>,
    pub completed_at: DateTime<Utc>,
}

// Flags

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    IncorrectAnswer,
    UnclearQuestion,
    OutdatedContent,
    ImageIssue,
    Typo,
    Other,
}

text_enum!(FlagType {
    IncorrectAnswer => "incorrect_answer",
    UnclearQuestion => "unclear_question",
    OutdatedContent => "outdated_content",
    ImageIssue => "image_issue",
    Typo => "typo",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Open,
    Closed,
}

text_enum!(FlagStatus { Open => "open", Closed => "closed" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagResolution {
    Fixed,
    Dismissed,
    Duplicate,
}

text_enum!(FlagResolution { Fixed => "fixed", Dismissed => "dismissed", Duplicate => "duplicate" });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFlag {
    pub id: Uuid,
    pub question_id: Uuid,
    pub user_id: Uuid,
    pub flag_type: FlagType,
    pub description: Option<String>,
    pub status: FlagStatus,
    pub resolution: Option<FlagResolution>,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagResult {
    pub flag: QuestionFlag,
    pub open_flag_count: i64,
    pub question_demoted: bool,
}

// Stats

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: Uuid,
    pub completed_sessions: u32,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub average_score: f64,
    pub last_session_update: Option<DateTime<Utc>>,
}

// Requests

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestionOption {
    pub text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestionImage {
    pub url: String,
    pub alt_text: Option<String>,
    pub section: ImageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestionRequest {
    pub stem: String,
    pub teaching_point: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub difficulty: Difficulty,
    pub category_id: Option<Uuid>,
    pub status: Option<QuestionStatus>,
    pub options: Vec<NewQuestionOption>,
    #[serde(default)]
    pub images: Vec<NewQuestionImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionFilter {
    pub status: Option<QuestionStatus>,
    pub difficulty: Option<Difficulty>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateQuestionStatusRequest {
    pub status: QuestionStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestionSetRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub question_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    pub selected_option_id: Option<Uuid>,
    #[serde(default)]
    pub time_spent_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmitRequest {
    pub attempts: Vec<SubmitAnswerRequest>,
}

/// Cursor and lifecycle operations accepted by `PATCH /api/quiz/sessions/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Next,
    Previous,
    GoTo { index: usize },
    MarkReviewed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagQuestionRequest {
    pub question_id: Uuid,
    pub flag_type: FlagType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveFlagRequest {
    pub resolution: FlagResolution,
    pub note: Option<String>,
}

// Responses

/// A question as presented inside a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionQuestionView {
    pub id: Uuid,
    pub stem: String,
    pub difficulty: Difficulty,
    pub category_id: Option<Uuid>,
    pub teaching_point: Option<String>,
    pub references: Vec<String>,
    pub options: Vec<QuestionOption>,
    pub images: Vec<QuestionImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: QuizSession,
    pub questions: Vec<SessionQuestionView>,
}
