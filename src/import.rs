use std::collections::BTreeMap;
use std::path::Path;

use uuid::Uuid;

use crate::error::FeedbackError;
use crate::models::{NewSubmission, RatingMatrix};
use crate::store::FeedbackStore;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(serde::Deserialize)]
struct CsvRow {
    student_id: String,
    student_name: Option<String>,
    subject: String,
    criterion: String,
    score: f64,
    comments: Option<String>,
}

/// Groups long-format rows (one score per line) into one submission per
/// student, in the order students first appear.
fn group_rows(form_id: Uuid, rows: Vec<CsvRow>) -> Vec<NewSubmission> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, NewSubmission> = BTreeMap::new();

    for row in rows {
        let key = row.student_id.trim().to_string();
        let entry = grouped.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            NewSubmission {
                form_id,
                student_id: key,
                student_name: None,
                ratings: RatingMatrix::new(),
                comments: None,
            }
        });

        if entry.student_name.is_none() {
            entry.student_name = row.student_name.filter(|n| !n.trim().is_empty());
        }
        if entry.comments.is_none() {
            entry.comments = row.comments.filter(|c| !c.trim().is_empty());
        }
        entry
            .ratings
            .entry(row.subject.trim().to_string())
            .or_default()
            .insert(row.criterion.trim().to_string(), row.score);
    }

    order
        .into_iter()
        .filter_map(|student| grouped.remove(&student))
        .collect()
}

/// Imports paper responses. Students who already submitted are counted and
/// skipped; any other rejection aborts the import.
pub async fn import_csv<S: FeedbackStore>(
    store: &S,
    form_id: Uuid,
    csv_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        rows.push(result?);
    }

    let mut summary = ImportSummary::default();
    for submission in group_rows(form_id, rows) {
        let student_id = submission.student_id.clone();
        match store.submit(submission).await {
            Ok(_) => summary.inserted += 1,
            Err(FeedbackError::DuplicateSubmission { .. }) => {
                tracing::warn!(%form_id, %student_id, "skipping student with existing feedback");
                summary.duplicates += 1;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to import feedback for {student_id}")))
            }
        }
    }

    Ok(summary)
}
