use serde::Serialize;
use uuid::Uuid;

use crate::error::{FeedbackError, FeedbackResult};
use crate::models::{FeedbackSubmission, FormDefinition};
use crate::store::FeedbackStore;

/// Running mean over the cells that are actually present.
#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, score: f64) {
        self.sum += score;
        self.count += 1;
    }

    /// `None` means no score was recorded.
    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectAverage {
    pub subject: String,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionAverage {
    pub subject: String,
    pub criterion: String,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionAverages {
    pub submission_id: Uuid,
    pub student_id: String,
    pub subjects: Vec<SubjectAverage>,
}

impl SubmissionAverages {
    pub fn get(&self, subject: &str) -> Option<f64> {
        lookup(&self.subjects, subject)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub form_id: Uuid,
    pub total_responses: usize,
    /// One entry per form subject, in declared order.
    pub average_per_subject: Vec<SubjectAverage>,
    /// One entry per subject × criterion pair, in declared order.
    pub average_per_criterion: Vec<CriterionAverage>,
    /// One entry per submission, in the order the submissions were given.
    pub per_submission_average: Vec<SubmissionAverages>,
}

impl AggregateResult {
    pub fn subject_average(&self, subject: &str) -> Option<f64> {
        lookup(&self.average_per_subject, subject)
    }

    pub fn criterion_average(&self, subject: &str, criterion: &str) -> Option<f64> {
        self.average_per_criterion
            .iter()
            .find(|entry| entry.subject == subject && entry.criterion == criterion)
            .and_then(|entry| entry.average)
    }

    pub fn for_submission(&self, submission_id: Uuid) -> Option<&SubmissionAverages> {
        self.per_submission_average
            .iter()
            .find(|entry| entry.submission_id == submission_id)
    }
}

fn lookup(averages: &[SubjectAverage], subject: &str) -> Option<f64> {
    averages
        .iter()
        .find(|entry| entry.subject == subject)
        .and_then(|entry| entry.average)
}

/// A form, the submissions read for it and the aggregate computed from
/// exactly that list.
#[derive(Debug, Clone)]
pub struct FeedbackSnapshot {
    pub form: FormDefinition,
    pub submissions: Vec<FeedbackSubmission>,
    pub result: AggregateResult,
}

/// Reads the form and its submissions once and aggregates them. Exports
/// and reports should use this so their rows match the averages.
pub async fn snapshot<S: FeedbackStore>(
    store: &S,
    form_id: Uuid,
) -> FeedbackResult<FeedbackSnapshot> {
    let form = match store.get_form(form_id).await {
        Ok(form) => form,
        Err(FeedbackError::NotFound(id)) => return Err(FeedbackError::InvalidForm(id)),
        Err(err) => return Err(err),
    };

    let submissions = store.list_for_form(form_id).await?;
    if submissions.is_empty() {
        return Err(FeedbackError::NoSubmissions(form_id));
    }

    tracing::debug!(%form_id, responses = submissions.len(), "aggregating feedback");
    let result = compute(&form, &submissions);
    Ok(FeedbackSnapshot {
        form,
        submissions,
        result,
    })
}

/// Loads the form and its submissions, then computes the aggregate.
pub async fn aggregate<S: FeedbackStore>(
    store: &S,
    form_id: Uuid,
) -> FeedbackResult<AggregateResult> {
    Ok(snapshot(store, form_id).await?.result)
}

/// Pure aggregation over an already loaded form and its submissions.
///
/// Averages only count present cells: a criterion left out of a submission
/// is ignored rather than treated as zero. Subjects with no scores at all
/// keep their slot with `average: None`, so column layout never depends on
/// how complete the data is.
pub fn compute(form: &FormDefinition, submissions: &[FeedbackSubmission]) -> AggregateResult {
    let criteria_count = form.criteria.len();
    let mut subject_means = vec![Mean::default(); form.subjects.len()];
    let mut cell_means = vec![Mean::default(); form.subjects.len() * criteria_count];
    let mut per_submission_average = Vec::with_capacity(submissions.len());

    for submission in submissions {
        let mut subjects = Vec::with_capacity(form.subjects.len());

        for (s_idx, subject) in form.subjects.iter().enumerate() {
            let mut own = Mean::default();

            if let Some(scores) = submission.ratings.get(subject) {
                for (c_idx, criterion) in form.criteria.iter().enumerate() {
                    if let Some(score) = scores.get(criterion) {
                        own.push(*score);
                        subject_means[s_idx].push(*score);
                        cell_means[s_idx * criteria_count + c_idx].push(*score);
                    }
                }
            }

            subjects.push(SubjectAverage {
                subject: subject.clone(),
                average: own.value(),
            });
        }

        per_submission_average.push(SubmissionAverages {
            submission_id: submission.id,
            student_id: submission.student_id.clone(),
            subjects,
        });
    }

    let average_per_subject = form
        .subjects
        .iter()
        .zip(subject_means.iter())
        .map(|(subject, mean)| SubjectAverage {
            subject: subject.clone(),
            average: mean.value(),
        })
        .collect();

    let criteria = &form.criteria;
    let cells = &cell_means;
    let average_per_criterion = form
        .subjects
        .iter()
        .enumerate()
        .flat_map(move |(s_idx, subject)| {
            criteria
                .iter()
                .enumerate()
                .map(move |(c_idx, criterion)| CriterionAverage {
                    subject: subject.clone(),
                    criterion: criterion.clone(),
                    average: cells[s_idx * criteria_count + c_idx].value(),
                })
        })
        .collect();

    AggregateResult {
        form_id: form.id,
        total_responses: submissions.len(),
        average_per_subject,
        average_per_criterion,
        per_submission_average,
    }
}
