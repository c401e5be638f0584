use std::fmt::Write;

use crate::aggregate::{AggregateResult, CriterionAverage};
use crate::models::{FeedbackSubmission, FormDefinition};

fn format_average(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}"),
        None => "no data".to_string(),
    }
}

/// Criteria with data, lowest average first.
pub fn lowest_rated(aggregate: &AggregateResult, limit: usize) -> Vec<&CriterionAverage> {
    let mut rated: Vec<&CriterionAverage> = aggregate
        .average_per_criterion
        .iter()
        .filter(|entry| entry.average.is_some())
        .collect();

    rated.sort_by(|a, b| {
        a.average
            .partial_cmp(&b.average)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rated.truncate(limit);
    rated
}

pub fn build_report(
    form: &FormDefinition,
    aggregate: &AggregateResult,
    submissions: &[FeedbackSubmission],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Feedback Report: {}", form.title);
    let _ = writeln!(
        output,
        "{} {} - Section {} ({} responses)",
        form.year, form.department, form.section, aggregate.total_responses
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Averages");

    for entry in &aggregate.average_per_subject {
        let _ = writeln!(
            output,
            "- {}: {}",
            entry.subject,
            format_average(entry.average)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Rated Criteria");

    let lowest = lowest_rated(aggregate, 5);
    if lowest.is_empty() {
        let _ = writeln!(output, "No criterion scores recorded.");
    } else {
        for entry in lowest {
            let _ = writeln!(
                output,
                "- {} / {}: {}",
                entry.subject,
                entry.criterion,
                format_average(entry.average)
            );
        }
    }

    let mut commented: Vec<&FeedbackSubmission> = submissions
        .iter()
        .filter(|s| s.comments.is_some())
        .collect();
    commented.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Comments");

    if commented.is_empty() {
        let _ = writeln!(output, "No comments left on this form.");
    } else {
        for submission in commented.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} on {}: {}",
                submission.student_name.as_deref().unwrap_or(&submission.student_id),
                submission.submitted_at.date_naive(),
                submission.comments.as_deref().unwrap_or_default()
            );
        }
    }

    output
}
