use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Feedback form not found: {0}")]
    NotFound(Uuid),

    #[error("Feedback form {0} does not exist or is no longer accepting responses")]
    InvalidForm(Uuid),

    #[error("Student {student_id} has already submitted feedback for form {form_id}")]
    DuplicateSubmission { form_id: Uuid, student_id: String },

    #[error("Invalid ratings: {0}")]
    InvalidRatingShape(String),

    #[error("Invalid form definition: {0}")]
    InvalidFormDefinition(String),

    #[error("No feedback has been submitted for form {0}")]
    NoSubmissions(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedbackError {
    /// Outcomes that happen during normal use and should be shown to the
    /// user as a plain message rather than reported as a failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FeedbackError::DuplicateSubmission { .. } | FeedbackError::NoSubmissions(_)
        )
    }

    /// Message for the person submitting or exporting.
    pub fn user_message(&self) -> String {
        match self {
            FeedbackError::DuplicateSubmission { .. } => {
                "You have already submitted feedback for this form.".to_string()
            }
            FeedbackError::NoSubmissions(_) => {
                "No feedback data to export for this form.".to_string()
            }
            FeedbackError::NotFound(_) | FeedbackError::InvalidForm(_) => {
                "Feedback form not found.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type FeedbackResult<T> = Result<T, FeedbackError>;
