//! Storage contracts for forms and submissions, plus an in-memory store.
//!
//! `db::PgStore` is the production implementation. `MemoryStore` keeps the
//! same guarantees behind a single lock and backs the `demo` command and
//! the tests.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{FeedbackError, FeedbackResult};
use crate::models::{
    FeedbackSubmission, FormDefinition, FormDetails, FormSummary, NewForm, NewSubmission,
};
use crate::ratings::{validate_ratings, ScoreRange};

pub trait FormRegistry {
    async fn create_form(&self, form: NewForm) -> FeedbackResult<FormDefinition>;

    /// Resolves an active form; inactive or unknown ids are `NotFound`.
    async fn get_form(&self, form_id: Uuid) -> FeedbackResult<FormDefinition>;

    /// Active forms, newest first.
    async fn list_active_forms(&self) -> FeedbackResult<Vec<FormDefinition>>;

    async fn update_form_details(
        &self,
        form_id: Uuid,
        details: FormDetails,
    ) -> FeedbackResult<FormDefinition>;

    async fn deactivate_form(&self, form_id: Uuid) -> FeedbackResult<()>;
}

pub trait FeedbackStore: FormRegistry {
    /// Stores a submission. Duplicate `(form_id, student_id)` pairs are
    /// rejected by the storage layer itself.
    async fn submit(&self, submission: NewSubmission) -> FeedbackResult<FeedbackSubmission>;

    /// Submissions for a form ordered by `submitted_at` ascending.
    async fn list_for_form(&self, form_id: Uuid) -> FeedbackResult<Vec<FeedbackSubmission>>;

    async fn count_for_form(&self, form_id: Uuid) -> FeedbackResult<i64>;

    /// Advisory pre-check for the student UI. `submit` stays authoritative.
    async fn has_submitted(&self, form_id: Uuid, student_id: &str) -> FeedbackResult<bool>;

    async fn list_form_summaries(&self) -> FeedbackResult<Vec<FormSummary>> {
        let forms = self.list_active_forms().await?;
        let mut summaries = Vec::with_capacity(forms.len());
        for form in forms {
            let response_count = self.count_for_form(form.id).await?;
            summaries.push(FormSummary {
                form,
                response_count,
            });
        }
        Ok(summaries)
    }
}

/// Resolves the form a submission targets, mapping `NotFound` to
/// `InvalidForm`, then validates the ratings against it.
pub async fn check_submission<R: FormRegistry>(
    registry: &R,
    submission: &NewSubmission,
    range: ScoreRange,
) -> FeedbackResult<FormDefinition> {
    let form = match registry.get_form(submission.form_id).await {
        Ok(form) => form,
        Err(FeedbackError::NotFound(id)) => return Err(FeedbackError::InvalidForm(id)),
        Err(err) => return Err(err),
    };
    validate_ratings(&form, &submission.ratings, range)?;
    Ok(form)
}

#[derive(Default)]
struct MemoryState {
    forms: HashMap<Uuid, FormDefinition>,
    submissions: Vec<FeedbackSubmission>,
    by_student: HashMap<(Uuid, String), usize>,
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    score_range: ScoreRange,
}

impl MemoryStore {
    pub fn new(score_range: ScoreRange) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            score_range,
        }
    }

    pub fn score_range(&self) -> ScoreRange {
        self.score_range
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FormRegistry for MemoryStore {
    async fn create_form(&self, form: NewForm) -> FeedbackResult<FormDefinition> {
        let form = form.normalized()?;
        let definition = FormDefinition {
            id: Uuid::new_v4(),
            title: form.title,
            year: form.year,
            section: form.section,
            department: form.department,
            subjects: form.subjects,
            criteria: form.criteria,
            created_at: Utc::now(),
            is_active: true,
        };
        self.write().forms.insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn get_form(&self, form_id: Uuid) -> FeedbackResult<FormDefinition> {
        self.read()
            .forms
            .get(&form_id)
            .filter(|form| form.is_active)
            .cloned()
            .ok_or(FeedbackError::NotFound(form_id))
    }

    async fn list_active_forms(&self) -> FeedbackResult<Vec<FormDefinition>> {
        let mut forms: Vec<FormDefinition> = self
            .read()
            .forms
            .values()
            .filter(|form| form.is_active)
            .cloned()
            .collect();
        forms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(forms)
    }

    async fn update_form_details(
        &self,
        form_id: Uuid,
        details: FormDetails,
    ) -> FeedbackResult<FormDefinition> {
        let mut state = self.write();
        let form = state
            .forms
            .get_mut(&form_id)
            .filter(|form| form.is_active)
            .ok_or(FeedbackError::NotFound(form_id))?;
        let mut updated = form.clone();
        details.apply_to(&mut updated)?;
        *form = updated.clone();
        Ok(updated)
    }

    async fn deactivate_form(&self, form_id: Uuid) -> FeedbackResult<()> {
        let mut state = self.write();
        match state.forms.get_mut(&form_id) {
            Some(form) if form.is_active => {
                form.is_active = false;
                Ok(())
            }
            _ => Err(FeedbackError::NotFound(form_id)),
        }
    }
}

impl FeedbackStore for MemoryStore {
    async fn submit(&self, submission: NewSubmission) -> FeedbackResult<FeedbackSubmission> {
        let submission = submission.normalized()?;
        check_submission(self, &submission, self.score_range).await?;

        // Lookup and insert happen under one write guard.
        let mut state = self.write();
        let key = (submission.form_id, submission.student_id.clone());
        if state.by_student.contains_key(&key) {
            tracing::warn!(
                form_id = %submission.form_id,
                student_id = %submission.student_id,
                "rejected duplicate submission"
            );
            return Err(FeedbackError::DuplicateSubmission {
                form_id: submission.form_id,
                student_id: submission.student_id,
            });
        }
        // The form may have been deactivated since the check above.
        if !state
            .forms
            .get(&submission.form_id)
            .is_some_and(|form| form.is_active)
        {
            return Err(FeedbackError::InvalidForm(submission.form_id));
        }

        let record = FeedbackSubmission {
            id: Uuid::new_v4(),
            form_id: submission.form_id,
            student_id: submission.student_id,
            student_name: submission.student_name,
            ratings: submission.ratings,
            comments: submission.comments,
            submitted_at: Utc::now(),
        };
        let index = state.submissions.len();
        state.submissions.push(record.clone());
        state.by_student.insert(key, index);
        Ok(record)
    }

    async fn list_for_form(&self, form_id: Uuid) -> FeedbackResult<Vec<FeedbackSubmission>> {
        let mut submissions: Vec<FeedbackSubmission> = self
            .read()
            .submissions
            .iter()
            .filter(|s| s.form_id == form_id)
            .cloned()
            .collect();
        submissions.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(submissions)
    }

    async fn count_for_form(&self, form_id: Uuid) -> FeedbackResult<i64> {
        let count = self
            .read()
            .by_student
            .keys()
            .filter(|(id, _)| *id == form_id)
            .count();
        Ok(count as i64)
    }

    async fn has_submitted(&self, form_id: Uuid, student_id: &str) -> FeedbackResult<bool> {
        Ok(self
            .read()
            .by_student
            .contains_key(&(form_id, student_id.trim().to_string())))
    }
}
