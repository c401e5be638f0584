use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{FeedbackError, FeedbackResult};
use crate::models::{
    FeedbackSubmission, FormDefinition, FormDetails, NewForm, NewSubmission, RatingMatrix,
};
use crate::ratings::ScoreRange;
use crate::store::{check_submission, FeedbackStore, FormRegistry};

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgStore> {
    let database_url = config.require_database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(PgStore::new(pool, config.score_range))
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed form registry and submission store. The
/// `(form_id, student_id)` unique constraint lives in the schema.
pub struct PgStore {
    pool: PgPool,
    score_range: ScoreRange,
}

impl PgStore {
    pub fn new(pool: PgPool, score_range: ScoreRange) -> Self {
        Self { pool, score_range }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn score_range(&self) -> ScoreRange {
        self.score_range
    }

    /// Inserts only while the form is active and the student has no row
    /// yet. The form row is share-locked so a concurrent deactivation
    /// waits for this insert. `None` means nothing was written.
    async fn insert_submission(
        &self,
        id: Uuid,
        submission: &NewSubmission,
    ) -> FeedbackResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            INSERT INTO student_feedback.submissions
            (id, form_id, student_id, student_name, ratings, comments)
            SELECT $1::uuid, $2::uuid, $3::text, $4::text, $5::jsonb, $6::text
            WHERE EXISTS (
                SELECT 1 FROM student_feedback.forms
                WHERE id = $2 AND is_active
                FOR SHARE
            )
            ON CONFLICT (form_id, student_id) DO NOTHING
            RETURNING submitted_at
            "#,
        )
        .bind(id)
        .bind(submission.form_id)
        .bind(&submission.student_id)
        .bind(&submission.student_name)
        .bind(Json(&submission.ratings))
        .bind(&submission.comments)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.try_get("submitted_at")).transpose()?)
    }
}

const FORM_COLUMNS: &str =
    "id, title, year, section, department, subjects, criteria, created_at, is_active";

const SUBMISSION_COLUMNS: &str =
    "id, form_id, student_id, student_name, ratings, comments, submitted_at";

fn form_from_row(row: &PgRow) -> FeedbackResult<FormDefinition> {
    Ok(FormDefinition {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        section: row.try_get("section")?,
        department: row.try_get("department")?,
        subjects: row.try_get("subjects")?,
        criteria: row.try_get("criteria")?,
        created_at: row.try_get("created_at")?,
        is_active: row.try_get("is_active")?,
    })
}

fn submission_from_row(row: &PgRow) -> FeedbackResult<FeedbackSubmission> {
    let Json(ratings): Json<RatingMatrix> = row.try_get("ratings")?;
    Ok(FeedbackSubmission {
        id: row.try_get("id")?,
        form_id: row.try_get("form_id")?,
        student_id: row.try_get("student_id")?,
        student_name: row.try_get("student_name")?,
        ratings,
        comments: row.try_get("comments")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

impl FormRegistry for PgStore {
    async fn create_form(&self, form: NewForm) -> FeedbackResult<FormDefinition> {
        let form = form.normalized()?;
        let query = format!(
            r#"
            INSERT INTO student_feedback.forms
            (id, title, year, section, department, subjects, criteria)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {FORM_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&form.title)
            .bind(&form.year)
            .bind(&form.section)
            .bind(&form.department)
            .bind(&form.subjects)
            .bind(&form.criteria)
            .fetch_one(&self.pool)
            .await?;

        let created = form_from_row(&row)?;
        tracing::info!(form_id = %created.id, title = %created.title, "created feedback form");
        Ok(created)
    }

    async fn get_form(&self, form_id: Uuid) -> FeedbackResult<FormDefinition> {
        let query = format!(
            "SELECT {FORM_COLUMNS} FROM student_feedback.forms WHERE id = $1 AND is_active"
        );

        let row = sqlx::query(&query)
            .bind(form_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(FeedbackError::NotFound(form_id))?;

        form_from_row(&row)
    }

    async fn list_active_forms(&self) -> FeedbackResult<Vec<FormDefinition>> {
        let query = format!(
            "SELECT {FORM_COLUMNS} FROM student_feedback.forms \
             WHERE is_active ORDER BY created_at DESC, id"
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(form_from_row).collect()
    }

    async fn update_form_details(
        &self,
        form_id: Uuid,
        details: FormDetails,
    ) -> FeedbackResult<FormDefinition> {
        let mut form = self.get_form(form_id).await?;
        details.apply_to(&mut form)?;

        let query = format!(
            r#"
            UPDATE student_feedback.forms
            SET title = $2, year = $3, section = $4, department = $5
            WHERE id = $1 AND is_active
            RETURNING {FORM_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(form_id)
            .bind(&form.title)
            .bind(&form.year)
            .bind(&form.section)
            .bind(&form.department)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(FeedbackError::NotFound(form_id))?;

        tracing::info!(%form_id, "updated feedback form details");
        form_from_row(&row)
    }

    async fn deactivate_form(&self, form_id: Uuid) -> FeedbackResult<()> {
        let result = sqlx::query(
            "UPDATE student_feedback.forms SET is_active = FALSE WHERE id = $1 AND is_active",
        )
        .bind(form_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FeedbackError::NotFound(form_id));
        }

        tracing::info!(%form_id, "deactivated feedback form");
        Ok(())
    }
}

impl FeedbackStore for PgStore {
    async fn submit(&self, submission: NewSubmission) -> FeedbackResult<FeedbackSubmission> {
        let submission = submission.normalized()?;
        check_submission(self, &submission, self.score_range).await?;

        let id = Uuid::new_v4();
        let Some(submitted_at) = self.insert_submission(id, &submission).await? else {
            let already_submitted = self
                .has_submitted(submission.form_id, &submission.student_id)
                .await?;
            let err = rejection(&submission, already_submitted);
            tracing::warn!(
                form_id = %submission.form_id,
                student_id = %submission.student_id,
                error = %err,
                "rejected submission"
            );
            return Err(err);
        };

        tracing::info!(
            form_id = %submission.form_id,
            submission_id = %id,
            "stored feedback submission"
        );

        Ok(FeedbackSubmission {
            id,
            form_id: submission.form_id,
            student_id: submission.student_id,
            student_name: submission.student_name,
            ratings: submission.ratings,
            comments: submission.comments,
            submitted_at,
        })
    }

    async fn list_for_form(&self, form_id: Uuid) -> FeedbackResult<Vec<FeedbackSubmission>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM student_feedback.submissions \
             WHERE form_id = $1 ORDER BY submitted_at ASC, id ASC"
        );

        let rows = sqlx::query(&query).bind(form_id).fetch_all(&self.pool).await?;
        tracing::debug!(%form_id, count = rows.len(), "loaded submissions");
        rows.iter().map(submission_from_row).collect()
    }

    async fn count_for_form(&self, form_id: Uuid) -> FeedbackResult<i64> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM student_feedback.submissions WHERE form_id = $1",
        )
        .bind(form_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        Ok(count)
    }

    async fn has_submitted(&self, form_id: Uuid, student_id: &str) -> FeedbackResult<bool> {
        let exists: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM student_feedback.submissions
                WHERE form_id = $1 AND student_id = $2
            ) AS submitted
            "#,
        )
        .bind(form_id)
        .bind(student_id.trim())
        .fetch_one(&self.pool)
        .await?
        .try_get("submitted")?;

        Ok(exists)
    }
}

/// Why an insert wrote nothing: an existing row for the student wins,
/// otherwise the form stopped accepting responses.
fn rejection(submission: &NewSubmission, already_submitted: bool) -> FeedbackError {
    if already_submitted {
        FeedbackError::DuplicateSubmission {
            form_id: submission.form_id,
            student_id: submission.student_id.clone(),
        }
    } else {
        FeedbackError::InvalidForm(submission.form_id)
    }
}

const SEED_FORM_ID: &str = "6f1c2b8e-4d7a-4f0e-9a51-2c3d4e5f6a7b";

/// Inserts a demo form and a handful of responses. Safe to run repeatedly.
pub async fn seed(store: &PgStore) -> anyhow::Result<Uuid> {
    let form_id = Uuid::parse_str(SEED_FORM_ID)?;
    let form = crate::demo::sample_form();

    sqlx::query(
        r#"
        INSERT INTO student_feedback.forms
        (id, title, year, section, department, subjects, criteria)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET title = EXCLUDED.title, is_active = TRUE
        "#,
    )
    .bind(form_id)
    .bind(&form.title)
    .bind(&form.year)
    .bind(&form.section)
    .bind(&form.department)
    .bind(&form.subjects)
    .bind(&form.criteria)
    .execute(store.pool())
    .await?;

    // Rows are only seeded once; later runs hit the uniqueness constraint.
    for submission in crate::demo::sample_submissions(form_id, store.score_range()) {
        match store.submit(submission).await {
            Ok(_) | Err(FeedbackError::DuplicateSubmission { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(form_id)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn new_submission() -> NewSubmission {
        NewSubmission {
            form_id: Uuid::new_v4(),
            student_id: "21EC001".into(),
            student_name: None,
            ratings: BTreeMap::new(),
            comments: None,
        }
    }

    #[test]
    fn rejection_prefers_duplicate_when_a_row_exists() {
        let submission = new_submission();
        match rejection(&submission, true) {
            FeedbackError::DuplicateSubmission { form_id, student_id } => {
                assert_eq!(form_id, submission.form_id);
                assert_eq!(student_id, "21EC001");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejection_without_a_row_means_the_form_closed() {
        let submission = new_submission();
        assert!(matches!(
            rejection(&submission, false),
            FeedbackError::InvalidForm(id) if id == submission.form_id
        ));
    }

    /// Needs `DATABASE_URL` pointing at a disposable Postgres database.
    #[tokio::test]
    #[ignore]
    async fn insert_after_deactivation_writes_nothing() {
        let config = AppConfig::from_env().unwrap();
        let store = connect(&config).await.unwrap();
        init_db(store.pool()).await.unwrap();

        let form = store.create_form(crate::demo::sample_form()).await.unwrap();
        store.deactivate_form(form.id).await.unwrap();

        let mut submission = new_submission();
        submission.form_id = form.id;
        let inserted = store
            .insert_submission(Uuid::new_v4(), &submission)
            .await
            .unwrap();
        assert!(inserted.is_none());
        assert_eq!(store.count_for_form(form.id).await.unwrap(), 0);

        store.close().await;
    }
}
