//! Spreadsheet export of a form's aggregated feedback.
//!
//! The tables are built once and then encoded as CSV files or as a single
//! XLSX workbook. Column order always follows the form's declared subjects
//! and criteria.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;

use crate::aggregate::AggregateResult;
use crate::models::{FeedbackSubmission, FormDefinition};

const MISSING: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    /// Derived average, shown with two decimals.
    Average(f64),
    /// Raw score as the student entered it.
    Score(f64),
    Missing,
    Blank,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn average(value: Option<f64>) -> Self {
        value.map(Cell::Average).unwrap_or(Cell::Missing)
    }

    fn score(value: Option<f64>) -> Self {
        value.map(Cell::Score).unwrap_or(Cell::Missing)
    }

    pub fn display(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Average(value) => format!("{value:.2}"),
            Cell::Score(value) => format!("{value}"),
            Cell::Missing => MISSING.to_string(),
            Cell::Blank => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: &'static str,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    fn blank_line(&mut self) {
        self.rows.push(vec![Cell::Blank]);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportTables {
    pub summary: Table,
    pub criteria: Table,
    pub detail: Table,
}

fn scope_line(form: &FormDefinition) -> String {
    format!("{} {} - Section {}", form.year, form.department, form.section)
}

fn submitted_on(submission: &FeedbackSubmission) -> String {
    submission
        .submitted_at
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

impl ExportTables {
    /// Summary rows take their averages from the aggregate entry with the
    /// same submission id; a row without one shows `N/A`.
    pub fn build(
        form: &FormDefinition,
        aggregate: &AggregateResult,
        submissions: &[FeedbackSubmission],
    ) -> Self {
        ExportTables {
            summary: summary_table(form, aggregate, submissions),
            criteria: criteria_table(form, aggregate),
            detail: detail_table(form, submissions),
        }
    }

    pub fn tables(&self) -> [&Table; 3] {
        [&self.summary, &self.criteria, &self.detail]
    }

    /// Writes one CSV file per table into `dir` and returns their paths.
    pub fn write_csv(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut written = Vec::new();
        for table in self.tables() {
            let path = dir.join(format!("{}.csv", table.name.to_lowercase()));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_table_csv(table, file)?;
            written.push(path);
        }

        tracing::info!(dir = %dir.display(), files = written.len(), "wrote CSV export");
        Ok(written)
    }

    pub fn write_xlsx(&self, path: &Path) -> anyhow::Result<()> {
        use rust_xlsxwriter::{Workbook, Worksheet};

        let mut workbook = Workbook::new();

        for table in self.tables() {
            let mut worksheet = Worksheet::new();
            worksheet.set_name(table.name)?;

            for (r, row) in table.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let (r, c) = (r as u32, c as u16);
                    match cell {
                        Cell::Average(value) => {
                            worksheet.write_number(r, c, round2(*value))?;
                        }
                        Cell::Score(value) => {
                            worksheet.write_number(r, c, *value)?;
                        }
                        Cell::Blank => {}
                        other => {
                            worksheet.write_string(r, c, other.display().as_str())?;
                        }
                    }
                }
            }

            workbook.push_worksheet(worksheet);
        }

        workbook
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote XLSX export");
        Ok(())
    }
}

pub fn write_table_csv<W: std::io::Write>(table: &Table, writer: W) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::display))?;
    }
    writer.flush()?;
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn summary_table(
    form: &FormDefinition,
    aggregate: &AggregateResult,
    submissions: &[FeedbackSubmission],
) -> Table {
    let mut table = Table::new("Summary");

    table.push(vec![Cell::text(format!("Feedback Summary - {}", form.title))]);
    table.push(vec![Cell::text(scope_line(form))]);
    table.push(vec![Cell::text(format!(
        "Total Responses: {}",
        aggregate.total_responses
    ))]);
    table.blank_line();

    table.push(vec![Cell::text("Subject-wise Average Ratings:")]);
    for entry in &aggregate.average_per_subject {
        table.push(vec![Cell::text(&entry.subject), Cell::average(entry.average)]);
    }
    table.blank_line();

    table.push(vec![Cell::text("Individual Student Responses:")]);
    let mut header = vec![
        Cell::text("Student ID"),
        Cell::text("Student Name"),
        Cell::text("Submitted On"),
        Cell::text("Comments"),
    ];
    header.extend(form.subjects.iter().map(Cell::text));
    table.push(header);

    for submission in submissions {
        let averages = aggregate.for_submission(submission.id);
        let mut row = vec![
            Cell::text(&submission.student_id),
            Cell::text(
                submission
                    .student_name
                    .as_deref()
                    .unwrap_or("Not provided"),
            ),
            Cell::text(submitted_on(submission)),
            Cell::text(submission.comments.as_deref().unwrap_or("No comments")),
        ];
        row.extend(
            form.subjects
                .iter()
                .map(|subject| Cell::average(averages.and_then(|own| own.get(subject)))),
        );
        table.push(row);
    }

    table
}

fn criteria_table(form: &FormDefinition, aggregate: &AggregateResult) -> Table {
    let mut table = Table::new("Criteria");

    table.push(vec![Cell::text(format!("Criterion Averages - {}", form.title))]);
    table.push(vec![Cell::text(scope_line(form))]);
    table.blank_line();

    let mut header = vec![Cell::text("Subject")];
    header.extend(form.criteria.iter().map(Cell::text));
    table.push(header);

    for subject in &form.subjects {
        let mut row = vec![Cell::text(subject)];
        row.extend(
            form.criteria
                .iter()
                .map(|criterion| Cell::average(aggregate.criterion_average(subject, criterion))),
        );
        table.push(row);
    }

    table
}

fn detail_table(form: &FormDefinition, submissions: &[FeedbackSubmission]) -> Table {
    let mut table = Table::new("Detailed");

    table.push(vec![Cell::text(format!("Detailed Feedback - {}", form.title))]);
    table.push(vec![Cell::text(scope_line(form))]);
    table.blank_line();

    let mut header = vec![
        Cell::text("Student ID"),
        Cell::text("Student Name"),
        Cell::text("Submitted On"),
    ];
    for subject in &form.subjects {
        for criterion in &form.criteria {
            header.push(Cell::text(format!("{subject} - {criterion}")));
        }
    }
    header.push(Cell::text("Comments"));
    table.push(header);

    for submission in submissions {
        let mut row = vec![
            Cell::text(&submission.student_id),
            Cell::text(
                submission
                    .student_name
                    .as_deref()
                    .unwrap_or("Not provided"),
            ),
            Cell::text(submitted_on(submission)),
        ];
        for subject in &form.subjects {
            let scores = submission.ratings.get(subject);
            for criterion in &form.criteria {
                let score = scores.and_then(|scores| scores.get(criterion)).copied();
                row.push(Cell::score(score));
            }
        }
        row.push(Cell::text(
            submission.comments.as_deref().unwrap_or("No comments"),
        ));
        table.push(row);
    }

    table
}

/// `Feedback_{year}_{department}_{section}_{date}.xlsx`
pub fn default_file_name(form: &FormDefinition, date: NaiveDate) -> String {
    let part = |value: &str| value.trim().replace(['/', '\\', ' '], "_");
    format!(
        "Feedback_{}_{}_{}_{}.xlsx",
        part(&form.year),
        part(&form.department),
        part(&form.section),
        date.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::aggregate::compute;
    use crate::models::RatingMatrix;

    fn form() -> FormDefinition {
        FormDefinition {
            id: Uuid::new_v4(),
            title: "Odd Semester".into(),
            year: "2024-25".into(),
            section: "A".into(),
            department: "ECE".into(),
            subjects: vec!["VLSI Design".into(), "Control Systems".into()],
            criteria: vec!["Punctuality".into(), "Subject Knowledge".into()],
            created_at: Utc::now(),
            is_active: true,
        }
    }

    fn submission(
        form: &FormDefinition,
        student: &str,
        entries: &[(&str, &str, f64)],
    ) -> FeedbackSubmission {
        let mut ratings: RatingMatrix = BTreeMap::new();
        for (subject, criterion, score) in entries {
            ratings
                .entry(subject.to_string())
                .or_default()
                .insert(criterion.to_string(), *score);
        }
        FeedbackSubmission {
            id: Uuid::new_v4(),
            form_id: form.id,
            student_id: student.into(),
            student_name: None,
            ratings,
            comments: Some("Great course".into()),
            submitted_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    fn header_row(table: &Table) -> Vec<String> {
        table.rows[3].iter().map(Cell::display).collect()
    }

    #[test]
    fn detail_columns_follow_declared_order() {
        let form = form();
        let subs = vec![submission(
            &form,
            "S1",
            &[("Control Systems", "Subject Knowledge", 4.0), ("VLSI Design", "Punctuality", 5.0)],
        )];
        let aggregate = compute(&form, &subs);
        let tables = ExportTables::build(&form, &aggregate, &subs);

        assert_eq!(
            header_row(&tables.detail),
            vec![
                "Student ID",
                "Student Name",
                "Submitted On",
                "VLSI Design - Punctuality",
                "VLSI Design - Subject Knowledge",
                "Control Systems - Punctuality",
                "Control Systems - Subject Knowledge",
                "Comments",
            ]
        );

        let row: Vec<String> = tables.detail.rows[4].iter().map(Cell::display).collect();
        assert_eq!(
            row,
            vec![
                "S1",
                "Not provided",
                "2025-03-01 09:30:00 UTC",
                "5",
                "N/A",
                "N/A",
                "4",
                "Great course",
            ]
        );
    }

    #[test]
    fn summary_lists_every_subject_even_without_data() {
        let form = form();
        let subs = vec![
            submission(&form, "S1", &[("VLSI Design", "Punctuality", 4.0)]),
            submission(
                &form,
                "S2",
                &[
                    ("VLSI Design", "Punctuality", 5.0),
                    ("VLSI Design", "Subject Knowledge", 5.0),
                ],
            ),
        ];
        let aggregate = compute(&form, &subs);
        let tables = ExportTables::build(&form, &aggregate, &subs);

        let lines: Vec<Vec<String>> = tables
            .summary
            .rows
            .iter()
            .map(|row| row.iter().map(Cell::display).collect())
            .collect();

        assert_eq!(lines[2], vec!["Total Responses: 2"]);
        assert_eq!(lines[5], vec!["VLSI Design", "4.67"]);
        assert_eq!(lines[6], vec!["Control Systems", "N/A"]);
        assert_eq!(lines[10][4..], ["4.00".to_string(), "N/A".to_string()]);
        assert_eq!(lines[11][4..], ["5.00".to_string(), "N/A".to_string()]);
    }

    #[test]
    fn summary_rows_match_averages_by_submission_id() {
        let form = form();
        let low = submission(&form, "A", &[("VLSI Design", "Punctuality", 1.0)]);
        let high = submission(&form, "B", &[("VLSI Design", "Punctuality", 5.0)]);
        let aggregate = compute(&form, &[low.clone(), high.clone()]);

        // A submission that arrived after the aggregate was computed.
        let late = submission(&form, "X", &[("VLSI Design", "Punctuality", 3.0)]);
        let tables = ExportTables::build(&form, &aggregate, &[late, low, high]);

        let rows: Vec<Vec<String>> = tables.summary.rows[10..]
            .iter()
            .map(|row| row.iter().map(Cell::display).collect())
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0][0].as_str(), rows[0][4].as_str()), ("X", "N/A"));
        assert_eq!((rows[1][0].as_str(), rows[1][4].as_str()), ("A", "1.00"));
        assert_eq!((rows[2][0].as_str(), rows[2][4].as_str()), ("B", "5.00"));
    }

    #[test]
    fn build_is_stable_across_calls() {
        let form = form();
        let subs = vec![submission(&form, "S1", &[("Control Systems", "Punctuality", 3.0)])];
        let aggregate = compute(&form, &subs);
        assert_eq!(
            ExportTables::build(&form, &aggregate, &subs),
            ExportTables::build(&form, &aggregate, &subs)
        );
    }

    #[test]
    fn csv_quotes_cells_with_commas() {
        let mut table = Table::new("Summary");
        table.push(vec![Cell::text("Comments"), Cell::text("clear, well paced")]);
        let mut buffer = Vec::new();
        write_table_csv(&table, &mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "Comments,\"clear, well paced\"\n"
        );
    }

    #[test]
    fn writes_csv_and_xlsx_files() {
        let form = form();
        let subs = vec![submission(&form, "S1", &[("VLSI Design", "Punctuality", 4.0)])];
        let aggregate = compute(&form, &subs);
        let tables = ExportTables::build(&form, &aggregate, &subs);
        let dir = tempfile::tempdir().unwrap();

        let written = tables.write_csv(dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("detailed.csv").exists());

        let xlsx = dir.path().join("feedback.xlsx");
        tables.write_xlsx(&xlsx).unwrap();
        assert!(std::fs::metadata(&xlsx).unwrap().len() > 0);
    }

    #[test]
    fn file_name_uses_form_scope() {
        let form = form();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(
            default_file_name(&form, date),
            "Feedback_2024-25_ECE_A_2025-03-01.xlsx"
        );
    }
}
