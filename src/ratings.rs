use crate::error::{FeedbackError, FeedbackResult};
use crate::models::{FormDefinition, RatingMatrix};

/// Inclusive bounds accepted for a single score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    min: f64,
    max: f64,
}

impl ScoreRange {
    pub fn new(min: f64, max: f64) -> Option<Self> {
        if min.is_finite() && max.is_finite() && min <= max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }

    /// The score `fraction` of the way from `min` to `max`, clamped to the range.
    pub fn at(&self, fraction: f64) -> f64 {
        let score = self.min + (self.max - self.min) * fraction;
        score.clamp(self.min, self.max)
    }
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: 1.0, max: 5.0 }
    }
}

/// Checks that every subject and criterion in `ratings` belongs to `form`
/// and that every score falls inside `range`. Missing cells are fine.
pub fn validate_ratings(
    form: &FormDefinition,
    ratings: &RatingMatrix,
    range: ScoreRange,
) -> FeedbackResult<()> {
    for (subject, scores) in ratings {
        if !form.subjects.iter().any(|s| s == subject) {
            return Err(FeedbackError::InvalidRatingShape(format!(
                "unknown subject '{subject}'"
            )));
        }

        for (criterion, score) in scores {
            if !form.criteria.iter().any(|c| c == criterion) {
                return Err(FeedbackError::InvalidRatingShape(format!(
                    "unknown criterion '{criterion}' under subject '{subject}'"
                )));
            }
            if !range.contains(*score) {
                return Err(FeedbackError::InvalidRatingShape(format!(
                    "score {score} for '{subject} - {criterion}' is outside {}..={}",
                    range.min, range.max
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn form() -> FormDefinition {
        FormDefinition {
            id: Uuid::new_v4(),
            title: "Feedback".into(),
            year: "2024-25".into(),
            section: "A".into(),
            department: "ECE".into(),
            subjects: vec!["Math".into(), "Physics".into()],
            criteria: vec!["Teaching".into(), "Content".into()],
            created_at: Utc::now(),
            is_active: true,
        }
    }

    fn matrix(entries: &[(&str, &str, f64)]) -> RatingMatrix {
        let mut ratings: RatingMatrix = BTreeMap::new();
        for (subject, criterion, score) in entries {
            ratings
                .entry(subject.to_string())
                .or_default()
                .insert(criterion.to_string(), *score);
        }
        ratings
    }

    #[test]
    fn at_spans_the_range() {
        let range = ScoreRange::new(0.0, 3.0).unwrap();
        assert_eq!(range.at(0.0), 0.0);
        assert_eq!(range.at(0.5), 1.5);
        assert_eq!(range.at(1.0), 3.0);
        assert_eq!(range.at(2.0), 3.0);
        assert_eq!(ScoreRange::default().at(0.25), 2.0);
    }

    #[test]
    fn partial_ratings_are_accepted() {
        let ratings = matrix(&[("Math", "Teaching", 4.0)]);
        assert!(validate_ratings(&form(), &ratings, ScoreRange::default()).is_ok());
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let ratings = matrix(&[("Chemistry", "Teaching", 4.0)]);
        let err = validate_ratings(&form(), &ratings, ScoreRange::default()).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidRatingShape(_)));
    }

    #[test]
    fn unknown_criterion_is_rejected() {
        let ratings = matrix(&[("Math", "Punctuality", 4.0)]);
        let err = validate_ratings(&form(), &ratings, ScoreRange::default()).unwrap_err();
        assert!(err.to_string().contains("Punctuality"));
    }

    #[test]
    fn scores_outside_range_are_rejected() {
        let range = ScoreRange::default();
        assert!(validate_ratings(&form(), &matrix(&[("Math", "Teaching", 6.0)]), range).is_err());
        assert!(validate_ratings(&form(), &matrix(&[("Math", "Teaching", 0.0)]), range).is_err());
        assert!(
            validate_ratings(&form(), &matrix(&[("Math", "Teaching", f64::NAN)]), range).is_err()
        );
    }

    #[test]
    fn custom_range_is_respected() {
        let range = ScoreRange::new(0.0, 10.0).unwrap();
        let ratings = matrix(&[("Physics", "Content", 9.5)]);
        assert!(validate_ratings(&form(), &ratings, range).is_ok());
        assert!(ScoreRange::new(5.0, 1.0).is_none());
    }
}
