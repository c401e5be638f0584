use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod demo;
mod error;
mod export;
mod import;
mod models;
mod ratings;
mod report;
mod store;

use config::AppConfig;
use error::FeedbackError;
use models::{FormDetails, NewForm, NewSubmission, RatingMatrix};
use store::{FeedbackStore, FormRegistry, MemoryStore};

#[derive(Parser)]
#[command(name = "student-feedback")]
#[command(
    about = "Collect student feedback on courses and export aggregated results",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Xlsx,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full flow against an in-memory store (no database needed)
    Demo,
    #[command(flatten)]
    Db(DbCommand),
}

/// Subcommands that need a Postgres connection.
#[derive(Subcommand)]
enum DbCommand {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample form with realistic responses
    Seed,
    /// Create a feedback form
    CreateForm {
        #[arg(long)]
        title: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        section: String,
        #[arg(long)]
        department: String,
        /// Subject name; repeat for each subject, in display order
        #[arg(long = "subject", required = true)]
        subjects: Vec<String>,
        /// Evaluation criterion; repeat for each criterion, in display order
        #[arg(long = "criterion", required = true)]
        criteria: Vec<String>,
    },
    /// List active forms with their response counts
    Forms,
    /// Show a single form
    ShowForm {
        #[arg(long)]
        form: Uuid,
    },
    /// Edit a form's title, year, section or department
    UpdateForm {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// Stop accepting responses for a form and hide it from listings
    DeactivateForm {
        #[arg(long)]
        form: Uuid,
    },
    /// Submit one student's ratings
    Submit {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        student: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        comments: Option<String>,
        /// JSON file shaped as {"Subject": {"Criterion": score}}
        #[arg(long)]
        ratings: PathBuf,
    },
    /// Check whether a student has already submitted feedback
    Check {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        student: String,
    },
    /// Import paper responses from a CSV file
    Import {
        #[arg(long)]
        form: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print subject and criterion averages
    Aggregate {
        #[arg(long)]
        form: Uuid,
        /// Print the raw aggregate as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export summary and detail sheets
    Export {
        #[arg(long)]
        form: Uuid,
        #[arg(long, value_enum, default_value_t = ExportFormat::Xlsx)]
        format: ExportFormat,
        /// Output file for xlsx, output directory for csv
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        form: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("student_feedback=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

/// Expected outcomes become a plain message; everything else keeps its chain.
fn user_facing(err: FeedbackError) -> anyhow::Error {
    if err.is_expected() {
        anyhow::anyhow!(err.user_message())
    } else {
        err.into()
    }
}

fn format_average(value: Option<f64>) -> String {
    value.map_or_else(|| "no data".to_string(), |avg| format!("{avg:.2}"))
}

fn read_ratings(path: &Path) -> anyhow::Result<RatingMatrix> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let ratings = models::parse_ratings(&raw)
        .with_context(|| format!("{} is not a valid ratings file", path.display()))?;
    Ok(ratings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    init_logging(&config);

    match cli.command {
        Commands::Demo => {
            let store = MemoryStore::new(config.score_range);
            demo::run(&store, &config.share_base_url).await
        }
        Commands::Db(command) => {
            let store = db::connect(&config).await?;
            let outcome = run(command, &store, &config).await;
            store.close().await;
            outcome
        }
    }
}

async fn run(command: DbCommand, store: &db::PgStore, config: &AppConfig) -> anyhow::Result<()> {
    match command {
        DbCommand::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        DbCommand::Seed => {
            let form_id = db::seed(store).await?;
            println!("Seed data inserted for form {form_id}.");
        }
        DbCommand::CreateForm {
            title,
            year,
            section,
            department,
            subjects,
            criteria,
        } => {
            let form = store
                .create_form(NewForm {
                    title,
                    year,
                    section,
                    department,
                    subjects,
                    criteria,
                })
                .await?;
            println!("Form created: {}", form.id);
            println!("Share this link: {}", form.share_link(&config.share_base_url));
        }
        DbCommand::Forms => {
            let summaries = store.list_form_summaries().await?;
            if summaries.is_empty() {
                println!("No active feedback forms.");
                return Ok(());
            }

            println!("Active feedback forms:");
            for summary in summaries {
                let form = &summary.form;
                println!(
                    "- {} ({} {} - Section {}) {} responses [{}]",
                    form.title,
                    form.year,
                    form.department,
                    form.section,
                    summary.response_count,
                    form.id
                );
            }
        }
        DbCommand::ShowForm { form } => {
            let form = store.get_form(form).await?;
            println!("{}", form.title);
            println!("{} {} - Section {}", form.year, form.department, form.section);
            println!("Created {}", form.created_at.format("%Y-%m-%d %H:%M UTC"));
            println!("Subjects: {}", form.subjects.join(", "));
            println!("Criteria: {}", form.criteria.join(", "));
            println!("Share this link: {}", form.share_link(&config.share_base_url));
        }
        DbCommand::UpdateForm {
            form,
            title,
            year,
            section,
            department,
        } => {
            let details = FormDetails {
                title,
                year,
                section,
                department,
            };
            let form = store.update_form_details(form, details).await?;
            println!("Form {} updated.", form.id);
        }
        DbCommand::DeactivateForm { form } => {
            store.deactivate_form(form).await?;
            println!("Form {form} deactivated.");
        }
        DbCommand::Submit {
            form,
            student,
            name,
            comments,
            ratings,
        } => {
            let ratings = read_ratings(&ratings)?;
            let submission = store
                .submit(NewSubmission {
                    form_id: form,
                    student_id: student,
                    student_name: name,
                    ratings,
                    comments,
                })
                .await
                .map_err(user_facing)?;
            println!("Thank you! Feedback recorded as {}.", submission.id);
        }
        DbCommand::Check { form, student } => {
            store.get_form(form).await?;
            if store.has_submitted(form, &student).await? {
                let duplicate = FeedbackError::DuplicateSubmission {
                    form_id: form,
                    student_id: student,
                };
                println!("{}", duplicate.user_message());
            } else {
                println!("No feedback recorded yet for {student}.");
            }
        }
        DbCommand::Import { form, csv } => {
            let summary = import::import_csv(store, form, &csv).await?;
            println!(
                "Inserted {} submissions from {} ({} already submitted).",
                summary.inserted,
                csv.display(),
                summary.duplicates
            );
        }
        DbCommand::Aggregate { form, json } => {
            let result = match aggregate::aggregate(store, form).await {
                Err(FeedbackError::NoSubmissions(_)) => {
                    println!("No responses yet.");
                    return Ok(());
                }
                other => other?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("Total responses: {}", result.total_responses);
            for entry in &result.average_per_subject {
                println!("- {}: {}", entry.subject, format_average(entry.average));
                for cell in result
                    .average_per_criterion
                    .iter()
                    .filter(|cell| cell.subject == entry.subject)
                {
                    println!("    {}: {}", cell.criterion, format_average(cell.average));
                }
            }
        }
        DbCommand::Export { form, format, out } => {
            let snapshot = aggregate::snapshot(store, form)
                .await
                .map_err(user_facing)?;
            let definition = &snapshot.form;
            let tables =
                export::ExportTables::build(definition, &snapshot.result, &snapshot.submissions);

            match format {
                ExportFormat::Xlsx => {
                    let path = out.unwrap_or_else(|| {
                        PathBuf::from(export::default_file_name(
                            definition,
                            chrono::Utc::now().date_naive(),
                        ))
                    });
                    tables.write_xlsx(&path)?;
                    println!("Export written to {}.", path.display());
                }
                ExportFormat::Csv => {
                    let dir = out.unwrap_or_else(|| PathBuf::from("."));
                    for path in tables.write_csv(&dir)? {
                        println!("Export written to {}.", path.display());
                    }
                }
            }
        }
        DbCommand::Report { form, out } => {
            let snapshot = aggregate::snapshot(store, form)
                .await
                .map_err(user_facing)?;
            let report =
                report::build_report(&snapshot.form, &snapshot.result, &snapshot.submissions);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_repeated_subjects() {
        let cli = Cli::try_parse_from([
            "student-feedback",
            "create-form",
            "--title",
            "Odd Semester",
            "--year",
            "2024-25",
            "--section",
            "A",
            "--department",
            "ECE",
            "--subject",
            "Math",
            "--subject",
            "Physics",
            "--criterion",
            "Teaching",
        ])
        .unwrap();

        match cli.command {
            Commands::Db(DbCommand::CreateForm { subjects, criteria, .. }) => {
                assert_eq!(subjects, vec!["Math", "Physics"]);
                assert_eq!(criteria, vec!["Teaching"]);
            }
            _ => panic!("expected create-form"),
        }
    }

    #[test]
    fn demo_is_not_a_database_command() {
        let cli = Cli::try_parse_from(["student-feedback", "demo"]).unwrap();
        assert!(matches!(cli.command, Commands::Demo));

        let cli = Cli::try_parse_from(["student-feedback", "init-db"]).unwrap();
        assert!(matches!(cli.command, Commands::Db(DbCommand::InitDb)));
    }

    #[test]
    fn ratings_file_with_bad_json_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");
        std::fs::write(&path, r#"{"Math": {"Teaching": "five"}}"#).unwrap();

        let err = read_ratings(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FeedbackError>(),
            Some(FeedbackError::Json(_))
        ));
    }

    #[test]
    fn duplicate_maps_to_plain_message() {
        let err = user_facing(FeedbackError::DuplicateSubmission {
            form_id: Uuid::nil(),
            student_id: "S1".into(),
        });
        assert_eq!(
            err.to_string(),
            "You have already submitted feedback for this form."
        );
    }
}
