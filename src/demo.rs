use std::collections::BTreeMap;

use uuid::Uuid;

use crate::aggregate;
use crate::error::FeedbackError;
use crate::models::{NewForm, NewSubmission, RatingMatrix};
use crate::ratings::ScoreRange;
use crate::report;
use crate::store::{FeedbackStore, FormRegistry, MemoryStore};

pub fn sample_form() -> NewForm {
    NewForm {
        title: "Student Feedback Form - Odd Semester".to_string(),
        year: "2024-25".to_string(),
        section: "A".to_string(),
        department: "Electronics & Communication Engineering".to_string(),
        subjects: [
            "Digital Signal Processing",
            "Microprocessors",
            "Control Systems",
            "Communication Systems",
            "VLSI Design",
        ]
        .map(String::from)
        .to_vec(),
        criteria: [
            "Teaching Effectiveness",
            "Subject Knowledge",
            "Communication Skills",
            "Course Material Quality",
            "Student Interaction",
            "Assignment & Assessment",
            "Punctuality",
            "Overall Rating",
        ]
        .map(String::from)
        .to_vec(),
    }
}

/// Deterministic responses for the sample form, spread over five levels of
/// `range`. The last student skips "VLSI Design" and half the criteria
/// elsewhere.
pub fn sample_submissions(form_id: Uuid, range: ScoreRange) -> Vec<NewSubmission> {
    let form = sample_form();
    let students = [
        ("21EC001", Some("Avery Lee"), Some("Clear lectures, more lab time please")),
        ("21EC002", Some("Jules Moreno"), None),
        ("21EC003", None, Some("Assignments were returned late")),
        ("21EC004", Some("Kiara Patel"), None),
    ];

    students
        .iter()
        .enumerate()
        .map(|(n, (student_id, name, comments))| {
            let partial = n == students.len() - 1;
            let mut ratings: RatingMatrix = BTreeMap::new();

            for (s, subject) in form.subjects.iter().enumerate() {
                if partial && subject == "VLSI Design" {
                    continue;
                }
                let scores = ratings.entry(subject.clone()).or_default();
                for (c, criterion) in form.criteria.iter().enumerate() {
                    if partial && c % 2 == 1 {
                        continue;
                    }
                    let level = (n + s * 2 + c) % 5;
                    scores.insert(criterion.clone(), range.at(level as f64 / 4.0));
                }
            }

            NewSubmission {
                form_id,
                student_id: student_id.to_string(),
                student_name: name.map(str::to_string),
                ratings,
                comments: comments.map(str::to_string),
            }
        })
        .collect()
}

/// Runs the whole flow against an in-memory store and prints the report.
pub async fn run(store: &MemoryStore, share_base_url: &str) -> anyhow::Result<()> {
    let form = store.create_form(sample_form()).await?;
    println!("Created form {}.", form.id);
    println!("Share this link: {}", form.share_link(share_base_url));

    let range = store.score_range();
    for submission in sample_submissions(form.id, range) {
        let stored = store.submit(submission).await?;
        println!("Stored feedback from {}.", stored.student_id);
    }

    let mut retry = sample_submissions(form.id, range);
    if let Some(again) = retry.pop() {
        match store.submit(again).await {
            Err(err @ FeedbackError::DuplicateSubmission { .. }) => {
                println!("Resubmission rejected: {}", err.user_message());
            }
            Err(err) => return Err(err.into()),
            Ok(_) => anyhow::bail!("duplicate submission was accepted"),
        }
    }

    let snapshot = aggregate::snapshot(store, form.id).await?;
    println!();
    print!(
        "{}",
        report::build_report(&snapshot.form, &snapshot.result, &snapshot.submissions)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::validate_ratings;

    #[tokio::test]
    async fn sample_data_fits_sample_form() {
        let store = MemoryStore::new(ScoreRange::default());
        let form = store.create_form(sample_form()).await.unwrap();

        for submission in sample_submissions(form.id, ScoreRange::default()) {
            validate_ratings(&form, &submission.ratings, ScoreRange::default()).unwrap();
        }
    }

    #[tokio::test]
    async fn demo_runs_with_a_narrow_score_range() {
        let range = ScoreRange::new(0.0, 3.0).unwrap();
        let store = MemoryStore::new(range);
        run(&store, "http://localhost:3000").await.unwrap();

        let form = store.list_active_forms().await.unwrap().remove(0);
        let submissions = store.list_for_form(form.id).await.unwrap();
        assert_eq!(submissions.len(), 4);
        for submission in &submissions {
            validate_ratings(&form, &submission.ratings, range).unwrap();
        }
    }

    #[tokio::test]
    async fn demo_runs_end_to_end() {
        let store = MemoryStore::new(ScoreRange::default());
        run(&store, "http://localhost:3000").await.unwrap();

        let forms = store.list_active_forms().await.unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(store.count_for_form(forms[0].id).await.unwrap(), 4);
    }
}
