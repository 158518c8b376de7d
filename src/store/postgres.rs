// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, types::Json};

use crate::{
    error::AppError,
    models::{
        attempt::AttemptRecord,
        question::{Question, QuestionOption, QuestionType},
        quiz::QuizDefinition,
        snapshot::{PersistedSnapshot, Selection, StoredSnapshot},
    },
    store::{QuizCatalog, RemoteStore, SessionKey},
};

/// Remote store and quiz catalog backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Helper struct for fetching quiz settings.
#[derive(sqlx::FromRow)]
struct QuizRow {
    id: i64,
    title: String,
    duration_minutes: Option<i64>,
    max_attempts: Option<i64>,
    passing_score: Option<f64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

/// Helper struct for fetching questions with their answer keys.
#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: i64,
    section_id: Option<i64>,
    question_type: String,
    content: String,
    options: Json<Vec<QuestionOption>>,
    marks: Option<f64>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        let question_type = QuestionType::parse(&row.question_type).unwrap_or_else(|| {
            tracing::warn!(
                "Question {} has unknown type '{}', treating as single choice",
                row.id,
                row.question_type
            );
            QuestionType::Single
        });

        Question {
            id: row.id,
            section_id: row.section_id,
            question_type,
            content: row.content,
            options: row.options.0,
            marks: row.marks,
        }
    }
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn upsert_snapshot(
        &self,
        key: SessionKey,
        snapshot: &PersistedSnapshot,
    ) -> Result<(), AppError> {
        // Stale revisions leave the stored row untouched.
        sqlx::query(
            r#"
            INSERT INTO quiz_progress (quiz_id, user_id, revision, snapshot, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (quiz_id, user_id) DO UPDATE SET
                revision = EXCLUDED.revision,
                snapshot = EXCLUDED.snapshot,
                updated_at = NOW()
            WHERE quiz_progress.revision <= EXCLUDED.revision
            "#,
        )
        .bind(key.quiz_id)
        .bind(key.user_id)
        .bind(snapshot.revision as i64)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert progress for {:?}: {:?}", key, e);
            AppError::from(e)
        })?;

        Ok(())
    }

    async fn upsert_answer(
        &self,
        key: SessionKey,
        question_id: i64,
        selection: &Selection,
        revision: u64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO quiz_progress (quiz_id, user_id, revision, snapshot, updated_at)
            VALUES (
                $1, $2, $3::BIGINT,
                jsonb_build_object('revision', $3::BIGINT, 'answers', jsonb_build_object($4::TEXT, $5::JSONB)),
                NOW()
            )
            ON CONFLICT (quiz_id, user_id) DO UPDATE SET
                revision = GREATEST(quiz_progress.revision, EXCLUDED.revision),
                snapshot = jsonb_set(
                    jsonb_set(
                        quiz_progress.snapshot,
                        '{answers}',
                        COALESCE(quiz_progress.snapshot->'answers', '{}'::JSONB)
                            || jsonb_build_object($4::TEXT, $5::JSONB)
                    ),
                    '{revision}',
                    to_jsonb(GREATEST(quiz_progress.revision, EXCLUDED.revision))
                ),
                updated_at = NOW()
            "#,
        )
        .bind(key.quiz_id)
        .bind(key.user_id)
        .bind(revision as i64)
        .bind(question_id.to_string())
        .bind(Json(selection))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert answer {} for {:?}: {:?}", question_id, key, e);
            AppError::from(e)
        })?;

        Ok(())
    }

    async fn read_snapshot(&self, key: SessionKey) -> Result<Option<StoredSnapshot>, AppError> {
        let doc: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT snapshot FROM quiz_progress WHERE quiz_id = $1 AND user_id = $2",
        )
        .bind(key.quiz_id)
        .bind(key.user_id)
        .fetch_optional(&self.pool)
        .await?;

        match doc {
            Some(Json(doc)) => Ok(Some(StoredSnapshot::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn delete_snapshot(&self, key: SessionKey) -> Result<(), AppError> {
        sqlx::query("DELETE FROM quiz_progress WHERE quiz_id = $1 AND user_id = $2")
            .bind(key.quiz_id)
            .bind(key.user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_attempt(&self, record: &AttemptRecord) -> Result<i64, AppError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO attempts (
                quiz_id, user_id, user_name, answers, obtained_marks, total_marks,
                percentage, correct_count, total_questions, passed, breakdown,
                violation_count, flagged, marked_for_review, trigger,
                time_taken_secs, submitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING id
            "#,
        )
        .bind(record.quiz_id)
        .bind(record.user_id)
        .bind(&record.user_name)
        .bind(Json(&record.answers))
        .bind(record.obtained_marks)
        .bind(record.total_marks)
        .bind(record.percentage)
        .bind(record.correct_count as i64)
        .bind(record.total_questions as i64)
        .bind(record.passed)
        .bind(Json(&record.breakdown))
        .bind(record.violation_count as i32)
        .bind(Json(&record.flagged))
        .bind(Json(&record.marked_for_review))
        .bind(record.trigger.as_str())
        .bind(record.time_taken_secs)
        .bind(record.submitted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert attempt record: {:?}", e);
            AppError::from(e)
        })?;

        Ok(id)
    }

    async fn count_attempts(&self, key: SessionKey) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts WHERE quiz_id = $1 AND user_id = $2",
        )
        .bind(key.quiz_id)
        .bind(key.user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl QuizCatalog for PgStore {
    async fn quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>, AppError> {
        let quiz = sqlx::query_as::<_, QuizRow>(
            r#"
            SELECT id, title, duration_minutes, max_attempts, passing_score, start_time, end_time
            FROM quizzes
            WHERE id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch quiz {}: {:?}", quiz_id, e);
            AppError::from(e)
        })?;

        let Some(quiz) = quiz else {
            return Ok(None);
        };

        let questions = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, section_id, type AS question_type, content, options, marks
            FROM questions
            WHERE quiz_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch questions for quiz {}: {:?}", quiz_id, e);
            AppError::from(e)
        })?;

        Ok(Some(QuizDefinition {
            id: quiz.id,
            title: quiz.title,
            duration_minutes: quiz.duration_minutes,
            max_attempts: quiz.max_attempts,
            passing_score: quiz.passing_score,
            start_time: quiz.start_time,
            end_time: quiz.end_time,
            questions: questions.into_iter().map(Question::from).collect(),
        }))
    }
}
