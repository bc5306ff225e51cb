use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        parent_id TEXT REFERENCES categories(id),
        UNIQUE (name, parent_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS questions (
        id TEXT PRIMARY KEY,
        stem TEXT NOT NULL,
        teaching_point TEXT,
        reference_list TEXT NOT NULL DEFAULT '[]',
        difficulty TEXT NOT NULL,
        category_id TEXT REFERENCES categories(id),
        status TEXT NOT NULL DEFAULT 'draft',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS question_options (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        is_correct INTEGER NOT NULL DEFAULT 0,
        explanation TEXT,
        position INTEGER NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS question_images (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        alt_text TEXT,
        section TEXT NOT NULL,
        position INTEGER NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS question_sets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS question_set_items (
        set_id TEXT NOT NULL REFERENCES question_sets(id) ON DELETE CASCADE,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        PRIMARY KEY (set_id, question_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        config TEXT NOT NULL,
        question_ids TEXT NOT NULL,
        current_index INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'not_started',
        score INTEGER,
        correct_answers INTEGER,
        total_time_spent INTEGER,
        started_at TEXT,
        completed_at TEXT,
        reviewed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quiz_sessions_user ON quiz_sessions(user_id, updated_at);",
    r#"
    CREATE TABLE IF NOT EXISTS quiz_attempts (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES quiz_sessions(id) ON DELETE CASCADE,
        question_id TEXT NOT NULL REFERENCES questions(id),
        selected_option_id TEXT,
        is_correct INTEGER NOT NULL,
        time_spent_seconds INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_session ON quiz_attempts(session_id);",
    r#"
    CREATE TABLE IF NOT EXISTS question_flags (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        flag_type TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'open',
        resolution TEXT,
        resolution_note TEXT,
        resolved_by TEXT,
        resolved_at TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_question_flags_question ON question_flags(question_id, status);",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_question_flags_open_per_user ON question_flags(question_id, user_id) WHERE status = 'open';",
    r#"
    CREATE TABLE IF NOT EXISTS question_reviews (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        action TEXT NOT NULL,
        actor_id TEXT,
        note TEXT,
        created_at TEXT NOT NULL
    );
    "#,
];

/// Timestamps are stored as fixed-width RFC 3339 so text ordering matches time ordering.
fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_dt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_dt).transpose()
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid '{}'", raw))
}

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is a separate database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        log_db_operation!(info, "migrate", "schema up to date");
        Ok(())
    }

    // Category operations

    pub async fn create_category(&self, category: &Category) -> Result<()> {
        sqlx::query("INSERT INTO categories (id, name, parent_id) VALUES (?1, ?2, ?3)")
            .bind(category.id.to_string())
            .bind(&category.name)
            .bind(category.parent_id.map(|id| id.to_string()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_category(&self, id: Uuid) -> Result<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_category(&row)).transpose()
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query("SELECT * FROM categories ORDER BY parent_id IS NOT NULL, name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_category).collect()
    }

    // Question operations

    /// Insert a question with its options and images atomically.
    pub async fn create_question(&self, question: &Question) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO questions (id, stem, teaching_point, reference_list, difficulty,
                                   category_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(question.id.to_string())
        .bind(&question.stem)
        .bind(&question.teaching_point)
        .bind(serde_json::to_string(&question.references)?)
        .bind(question.difficulty.as_str())
        .bind(question.category_id.map(|id| id.to_string()))
        .bind(question.status.as_str())
        .bind(fmt_dt(question.created_at))
        .bind(fmt_dt(question.updated_at))
        .execute(&mut *tx)
        .await?;

        for option in &question.options {
            sqlx::query(
                r#"
                INSERT INTO question_options (id, question_id, text, is_correct, explanation, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(option.id.to_string())
            .bind(question.id.to_string())
            .bind(&option.text)
            .bind(option.is_correct)
            .bind(&option.explanation)
            .bind(option.position)
            .execute(&mut *tx)
            .await?;
        }

        for image in &question.images {
            sqlx::query(
                r#"
                INSERT INTO question_images (id, question_id, url, alt_text, section, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(image.id.to_string())
            .bind(question.id.to_string())
            .bind(&image.url)
            .bind(&image.alt_text)
            .bind(image.section.as_str())
            .bind(image.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        let mut questions = self.get_questions_by_ids(&[id]).await?;
        Ok(questions.pop())
    }

    /// Fetch questions with options and images. Order of the result is unspecified.
    pub async fn get_questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT * FROM questions WHERE id IN (");
            push_id_list(&mut builder, chunk);
            builder.push(")");
            rows.extend(builder.build().fetch_all(&self.pool).await?);
        }
        self.rows_to_questions(rows).await
    }

    pub async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM questions WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(difficulty) = filter.difficulty {
            builder.push(" AND difficulty = ").push_bind(difficulty.as_str());
        }
        if let Some(category_id) = filter.category_id {
            builder.push(" AND category_id = ").push_bind(category_id.to_string());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let questions = self.rows_to_questions(rows).await?;
        log_db_operation!(debug, "list_questions", count = questions.len());
        Ok(questions)
    }

    /// Published question ids (with category) matching the server-side filters,
    /// in creation order. An empty `set_ids` means no question-set restriction.
    pub async fn find_published_question_ids(
        &self,
        difficulty: Option<Difficulty>,
        set_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, Option<Uuid>)>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, category_id FROM questions WHERE status = ");
        builder.push_bind(QuestionStatus::Published.as_str());
        if let Some(difficulty) = difficulty {
            builder.push(" AND difficulty = ").push_bind(difficulty.as_str());
        }
        if !set_ids.is_empty() {
            builder.push(" AND id IN (SELECT question_id FROM question_set_items WHERE set_id IN (");
            push_id_list(&mut builder, set_ids);
            builder.push("))");
        }
        builder.push(" ORDER BY created_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push((
                parse_uuid(&row.get::<String, _>("id"))?,
                parse_opt_uuid(row.get("category_id"))?,
            ));
        }
        log_db_operation!(debug, "find_published_question_ids", count = ids.len());
        Ok(ids)
    }

    pub async fn update_question_status(&self, id: Uuid, status: QuestionStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE questions SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(fmt_dt(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move a question from `from` to `to` only if it is still in `from`.
    /// Returns whether this call performed the transition.
    pub async fn transition_question_status(
        &self,
        id: Uuid,
        from: QuestionStatus,
        to: QuestionStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE questions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(to.as_str())
        .bind(fmt_dt(Utc::now()))
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn create_question_review(&self, review: &QuestionReview) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO question_reviews (id, question_id, action, actor_id, note, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(review.id.to_string())
        .bind(review.question_id.to_string())
        .bind(&review.action)
        .bind(review.actor_id.map(|id| id.to_string()))
        .bind(&review.note)
        .bind(fmt_dt(review.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_question_reviews(&self, question_id: Uuid) -> Result<Vec<QuestionReview>> {
        let rows = sqlx::query(
            "SELECT * FROM question_reviews WHERE question_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(question_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut reviews = Vec::with_capacity(rows.len());
        for row in rows {
            reviews.push(QuestionReview {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                question_id: parse_uuid(&row.get::<String, _>("question_id"))?,
                action: row.get("action"),
                actor_id: parse_opt_uuid(row.get("actor_id"))?,
                note: row.get("note"),
                created_at: parse_dt(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(reviews)
    }

    async fn rows_to_questions(&self, rows: Vec<SqliteRow>) -> Result<Vec<Question>> {
        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            questions.push(Question {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                stem: row.get("stem"),
                teaching_point: row.get("teaching_point"),
                references: serde_json::from_str(&row.get::<String, _>("reference_list"))?,
                difficulty: row.get::<String, _>("difficulty").parse()?,
                category_id: parse_opt_uuid(row.get("category_id"))?,
                status: row.get::<String, _>("status").parse()?,
                options: Vec::new(),
                images: Vec::new(),
                created_at: parse_dt(&row.get::<String, _>("created_at"))?,
                updated_at: parse_dt(&row.get::<String, _>("updated_at"))?,
            });
        }

        if questions.is_empty() {
            return Ok(questions);
        }

        let ids: Vec<Uuid> = questions.iter().map(|q| q.id).collect();
        let mut options = self.options_for(&ids).await?;
        let mut images = self.images_for(&ids).await?;
        for question in &mut questions {
            question.options = options.remove(&question.id).unwrap_or_default();
            question.images = images.remove(&question.id).unwrap_or_default();
        }

        Ok(questions)
    }

    async fn options_for(&self, question_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<QuestionOption>>> {
        let mut rows = Vec::new();
        for chunk in question_ids.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT * FROM question_options WHERE question_id IN (");
            push_id_list(&mut builder, chunk);
            builder.push(") ORDER BY question_id, position");
            rows.extend(builder.build().fetch_all(&self.pool).await?);
        }

        let mut grouped: HashMap<Uuid, Vec<QuestionOption>> = HashMap::new();
        for row in rows {
            let option = QuestionOption {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                question_id: parse_uuid(&row.get::<String, _>("question_id"))?,
                text: row.get("text"),
                is_correct: row.get("is_correct"),
                explanation: row.get("explanation"),
                position: row.get("position"),
            };
            grouped.entry(option.question_id).or_default().push(option);
        }
        Ok(grouped)
    }

    async fn images_for(&self, question_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<QuestionImage>>> {
        let mut rows = Vec::new();
        for chunk in question_ids.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT * FROM question_images WHERE question_id IN (");
            push_id_list(&mut builder, chunk);
            builder.push(") ORDER BY question_id, section, position");
            rows.extend(builder.build().fetch_all(&self.pool).await?);
        }

        let mut grouped: HashMap<Uuid, Vec<QuestionImage>> = HashMap::new();
        for row in rows {
            let image = QuestionImage {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                question_id: parse_uuid(&row.get::<String, _>("question_id"))?,
                url: row.get("url"),
                alt_text: row.get("alt_text"),
                section: row.get::<String, _>("section").parse()?,
                position: row.get("position"),
            };
            grouped.entry(image.question_id).or_default().push(image);
        }
        Ok(grouped)
    }

    // Question set operations

    pub async fn create_question_set(&self, set: &QuestionSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO question_sets (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(set.id.to_string())
            .bind(&set.name)
            .bind(&set.description)
            .bind(fmt_dt(Utc::now()))
            .execute(&mut *tx)
            .await?;

        for (position, question_id) in set.question_ids.iter().enumerate() {
            sqlx::query("INSERT INTO question_set_items (set_id, question_id, position) VALUES (?1, ?2, ?3)")
                .bind(set.id.to_string())
                .bind(question_id.to_string())
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_question_sets(&self) -> Result<Vec<QuestionSet>> {
        let rows = sqlx::query("SELECT * FROM question_sets ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let items = sqlx::query("SELECT set_id, question_id FROM question_set_items ORDER BY set_id, position")
            .fetch_all(&self.pool)
            .await?;

        let mut members: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for item in items {
            members
                .entry(parse_uuid(&item.get::<String, _>("set_id"))?)
                .or_default()
                .push(parse_uuid(&item.get::<String, _>("question_id"))?);
        }

        let mut sets = Vec::with_capacity(rows.len());
        for row in rows {
            let id = parse_uuid(&row.get::<String, _>("id"))?;
            sets.push(QuestionSet {
                id,
                name: row.get("name"),
                description: row.get("description"),
                question_ids: members.remove(&id).unwrap_or_default(),
            });
        }
        Ok(sets)
    }

    // Session operations

    pub async fn create_session(&self, session: &QuizSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quiz_sessions (id, user_id, config, question_ids, current_index, status,
                                       score, correct_answers, total_time_spent, started_at,
                                       completed_at, reviewed_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(serde_json::to_string(&session.config)?)
        .bind(serde_json::to_string(&session.question_ids)?)
        .bind(session.current_index as i64)
        .bind(session.status.as_str())
        .bind(session.score.map(i64::from))
        .bind(session.correct_answers.map(i64::from))
        .bind(session.total_time_spent.map(i64::from))
        .bind(session.started_at.map(fmt_dt))
        .bind(session.completed_at.map(fmt_dt))
        .bind(session.reviewed_at.map(fmt_dt))
        .bind(fmt_dt(session.created_at))
        .bind(fmt_dt(session.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<QuizSession>> {
        let row = sqlx::query("SELECT * FROM quiz_sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_session(&row)).transpose()
    }

    pub async fn list_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<QuizSession>> {
        let rows = sqlx::query("SELECT * FROM quiz_sessions WHERE user_id = ?1 ORDER BY created_at DESC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// Persist cursor and lifecycle fields of a session that is not yet completed.
    /// Returns false when the row is missing or already completed.
    pub async fn update_session_progress(&self, session: &QuizSession) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_sessions
            SET current_index = ?1, status = ?2, started_at = ?3, updated_at = ?4
            WHERE id = ?5 AND status != 'completed'
            "#,
        )
        .bind(session.current_index as i64)
        .bind(session.status.as_str())
        .bind(session.started_at.map(fmt_dt))
        .bind(fmt_dt(session.updated_at))
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_session_reviewed(&self, id: Uuid, reviewed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE quiz_sessions SET reviewed_at = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(fmt_dt(reviewed_at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the final score. Only the first completion wins.
    /// Store the result and mark the session completed, provided it is still
    /// open and holds exactly `attempts_seen` attempts, i.e. the ones `result`
    /// was computed from. Returns false otherwise.
    pub async fn complete_session(&self, id: Uuid, result: &QuizResult, attempts_seen: usize) -> Result<bool> {
        let completed_at = fmt_dt(result.completed_at);
        let outcome = sqlx::query(
            r#"
            UPDATE quiz_sessions
            SET status = 'completed', completed_at = ?1, updated_at = ?1, score = ?2,
                correct_answers = ?3, total_time_spent = ?4
            WHERE id = ?5 AND status != 'completed'
              AND (SELECT COUNT(*) FROM quiz_attempts WHERE session_id = ?5) = ?6
            "#,
        )
        .bind(&completed_at)
        .bind(i64::from(result.score))
        .bind(i64::from(result.correct_answers))
        .bind(i64::from(result.total_time_spent))
        .bind(id.to_string())
        .bind(i64::try_from(attempts_seen)?)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() == 1)
    }

    pub async fn latest_session_update(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(updated_at) FROM quiz_sessions WHERE user_id = ?1")
                .bind(user_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        parse_opt_dt(latest)
    }

    // Attempt operations

    /// Save the session's progress and its new attempts in one transaction.
    /// Nothing is written and false is returned when the session is already
    /// completed.
    pub async fn record_attempts(&self, session: &QuizSession, attempts: &[QuizAttempt]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE quiz_sessions
            SET current_index = ?1, status = ?2, started_at = ?3, updated_at = ?4
            WHERE id = ?5 AND status != 'completed'
            "#,
        )
        .bind(session.current_index as i64)
        .bind(session.status.as_str())
        .bind(session.started_at.map(fmt_dt))
        .bind(fmt_dt(session.updated_at))
        .bind(session.id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        for attempt in attempts {
            sqlx::query(
                r#"
                INSERT INTO quiz_attempts (id, session_id, question_id, selected_option_id,
                                           is_correct, time_spent_seconds, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(attempt.id.to_string())
            .bind(attempt.session_id.to_string())
            .bind(attempt.question_id.to_string())
            .bind(attempt.selected_option_id.map(|id| id.to_string()))
            .bind(attempt.is_correct)
            .bind(i64::from(attempt.time_spent_seconds))
            .bind(fmt_dt(attempt.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        log_db_operation!(debug, "record_attempts", count = attempts.len());
        Ok(true)
    }

    /// All attempts of a session in submission order.
    pub async fn get_attempts_for_session(&self, session_id: Uuid) -> Result<Vec<QuizAttempt>> {
        let rows = sqlx::query("SELECT * FROM quiz_attempts WHERE session_id = ?1 ORDER BY created_at, rowid")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut attempts = Vec::with_capacity(rows.len());
        for row in rows {
            attempts.push(QuizAttempt {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                session_id: parse_uuid(&row.get::<String, _>("session_id"))?,
                question_id: parse_uuid(&row.get::<String, _>("question_id"))?,
                selected_option_id: parse_opt_uuid(row.get("selected_option_id"))?,
                is_correct: row.get("is_correct"),
                time_spent_seconds: u32::try_from(row.get::<i64, _>("time_spent_seconds"))?,
                created_at: parse_dt(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(attempts)
    }

    /// `(attempts, correct attempts)` across all of a user's sessions.
    pub async fn attempt_totals_for_user(&self, user_id: Uuid) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(a.id) AS answered, COALESCE(SUM(a.is_correct), 0) AS correct
            FROM quiz_attempts a
            JOIN quiz_sessions s ON s.id = a.session_id
            WHERE s.user_id = ?1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("answered"), row.get("correct")))
    }

    // Flag operations

    pub async fn create_flag(&self, flag: &QuestionFlag) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO question_flags (id, question_id, user_id, flag_type, description, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(flag.id.to_string())
        .bind(flag.question_id.to_string())
        .bind(flag.user_id.to_string())
        .bind(flag.flag_type.as_str())
        .bind(&flag.description)
        .bind(flag.status.as_str())
        .bind(fmt_dt(flag.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_open_flag(&self, user_id: Uuid, question_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM question_flags WHERE user_id = ?1 AND question_id = ?2 AND status = 'open')",
        )
        .bind(user_id.to_string())
        .bind(question_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn count_open_flags(&self, question_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM question_flags WHERE question_id = ?1 AND status = 'open'",
        )
        .bind(question_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn get_flag(&self, id: Uuid) -> Result<Option<QuestionFlag>> {
        let row = sqlx::query("SELECT * FROM question_flags WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_flag(&row)).transpose()
    }

    pub async fn list_flags(&self, status: Option<FlagStatus>) -> Result<Vec<QuestionFlag>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM question_flags");
        if let Some(status) = status {
            builder.push(" WHERE status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_flag).collect()
    }

    /// Close an open flag. Returns false when it was not open.
    pub async fn resolve_flag(
        &self,
        id: Uuid,
        resolution: FlagResolution,
        note: Option<&str>,
        resolved_by: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE question_flags
            SET status = 'closed', resolution = ?1, resolution_note = ?2, resolved_by = ?3, resolved_at = ?4
            WHERE id = ?5 AND status = 'open'
            "#,
        )
        .bind(resolution.as_str())
        .bind(note)
        .bind(resolved_by.to_string())
        .bind(fmt_dt(resolved_at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Keeps `IN (...)` lists well below SQLite's bound-parameter limit.
const MAX_IDS_PER_QUERY: usize = 500;

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
}

fn row_to_category(row: &SqliteRow) -> Result<Category> {
    Ok(Category {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        parent_id: parse_opt_uuid(row.get("parent_id"))?,
    })
}

fn opt_u32(value: Option<i64>) -> Result<Option<u32>> {
    Ok(value.map(u32::try_from).transpose()?)
}

fn row_to_session(row: &SqliteRow) -> Result<QuizSession> {
    Ok(QuizSession {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
        config: serde_json::from_str(&row.get::<String, _>("config"))?,
        question_ids: serde_json::from_str(&row.get::<String, _>("question_ids"))?,
        current_index: usize::try_from(row.get::<i64, _>("current_index"))?,
        status: row.get::<String, _>("status").parse()?,
        score: opt_u32(row.get("score"))?,
        correct_answers: opt_u32(row.get("correct_answers"))?,
        total_time_spent: opt_u32(row.get("total_time_spent"))?,
        started_at: parse_opt_dt(row.get("started_at"))?,
        completed_at: parse_opt_dt(row.get("completed_at"))?,
        reviewed_at: parse_opt_dt(row.get("reviewed_at"))?,
        created_at: parse_dt(&row.get::<String, _>("created_at"))?,
        updated_at: parse_dt(&row.get::<String, _>("updated_at"))?,
    })
}

fn row_to_flag(row: &SqliteRow) -> Result<QuestionFlag> {
    Ok(QuestionFlag {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        question_id: parse_uuid(&row.get::<String, _>("question_id"))?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
        flag_type: row.get::<String, _>("flag_type").parse()?,
        description: row.get("description"),
        status: row.get::<String, _>("status").parse()?,
        resolution: row
            .get::<Option<String>, _>("resolution")
            .map(|r| r.parse::<FlagResolution>())
            .transpose()?,
        resolution_note: row.get("resolution_note"),
        resolved_by: parse_opt_uuid(row.get("resolved_by"))?,
        resolved_at: parse_opt_dt(row.get("resolved_at"))?,
        created_at: parse_dt(&row.get::<String, _>("created_at"))?,
    })
}
