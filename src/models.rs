use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeedbackError, FeedbackResult};

/// subject -> criterion -> score
pub type RatingMatrix = BTreeMap<String, BTreeMap<String, f64>>;

/// Parses a `{"Subject": {"Criterion": score}}` document.
pub fn parse_ratings(raw: &str) -> FeedbackResult<RatingMatrix> {
    let ratings = serde_json::from_str(raw)?;
    Ok(ratings)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    pub id: Uuid,
    pub title: String,
    pub year: String,
    pub section: String,
    pub department: String,
    pub subjects: Vec<String>,
    pub criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl FormDefinition {
    /// Link handed to students; the front end routes `#/student/{id}` to the form.
    pub fn share_link(&self, base_url: &str) -> String {
        format!("{}/#/student/{}", base_url.trim_end_matches('/'), self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewForm {
    pub title: String,
    pub year: String,
    pub section: String,
    pub department: String,
    pub subjects: Vec<String>,
    #[serde(alias = "evaluation_criteria")]
    pub criteria: Vec<String>,
}

impl NewForm {
    /// Trims every field, drops blank subject/criterion entries and rejects
    /// what is left if it cannot describe a usable form.
    pub fn normalized(self) -> FeedbackResult<NewForm> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(FeedbackError::InvalidFormDefinition(
                "title must not be blank".to_string(),
            ));
        }

        Ok(NewForm {
            title,
            year: self.year.trim().to_string(),
            section: self.section.trim().to_string(),
            department: self.department.trim().to_string(),
            subjects: clean_names("subject", self.subjects)?,
            criteria: clean_names("criterion", self.criteria)?,
        })
    }
}

fn clean_names(kind: &str, names: Vec<String>) -> FeedbackResult<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(names.len());

    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if cleaned.iter().any(|existing| existing == name) {
            return Err(FeedbackError::InvalidFormDefinition(format!(
                "duplicate {kind} '{name}'"
            )));
        }
        cleaned.push(name.to_string());
    }

    if cleaned.is_empty() {
        return Err(FeedbackError::InvalidFormDefinition(format!(
            "at least one {kind} is required"
        )));
    }

    Ok(cleaned)
}

/// Descriptive fields an administrator may edit after creation.
#[derive(Debug, Clone, Default)]
pub struct FormDetails {
    pub title: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub department: Option<String>,
}

impl FormDetails {
    pub fn apply_to(&self, form: &mut FormDefinition) -> FeedbackResult<()> {
        if let Some(title) = &self.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(FeedbackError::InvalidFormDefinition(
                    "title must not be blank".to_string(),
                ));
            }
            form.title = title.to_string();
        }
        if let Some(year) = &self.year {
            form.year = year.trim().to_string();
        }
        if let Some(section) = &self.section {
            form.section = section.trim().to_string();
        }
        if let Some(department) = &self.department {
            form.department = department.trim().to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FormSummary {
    pub form: FormDefinition,
    pub response_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub id: Uuid,
    pub form_id: Uuid,
    pub student_id: String,
    pub student_name: Option<String>,
    pub ratings: RatingMatrix,
    pub comments: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubmission {
    pub form_id: Uuid,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub ratings: RatingMatrix,
    #[serde(default)]
    pub comments: Option<String>,
}

impl NewSubmission {
    pub fn normalized(self) -> FeedbackResult<NewSubmission> {
        let student_id = self.student_id.trim().to_string();
        if student_id.is_empty() {
            return Err(FeedbackError::InvalidRatingShape(
                "student id must not be blank".to_string(),
            ));
        }

        Ok(NewSubmission {
            form_id: self.form_id,
            student_id,
            student_name: non_blank(self.student_name),
            ratings: self.ratings,
            comments: non_blank(self.comments),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
