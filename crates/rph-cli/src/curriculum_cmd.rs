//! `rph curriculum ...`: load reference curriculum data from JSON files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::de::DeserializeOwned;
use sqlx::PgPool;

use rph_core::linker;
use rph_db::models::{DskpFormEntry, Grade, SowLesson, Subject};

#[derive(Subcommand)]
pub enum CurriculumCommands {
    /// Merge scheme-of-work lessons for a grade (JSON array of lessons)
    ImportSow {
        /// Grade the lessons belong to (e.g. "Form 5")
        #[arg(long)]
        form: String,
        /// JSON file: [{"lessonNo": 1, "focus": "...", "theme": "...", "topic": "..."}]
        file: PathBuf,
    },
    /// Replace the textbook topic list for a grade (JSON array of strings)
    ImportTextbook {
        #[arg(long)]
        form: String,
        file: PathBuf,
    },
    /// Create or replace a subject's DSKP document (JSON array of form entries)
    ImportDskp {
        #[arg(long)]
        subject: String,
        file: PathBuf,
    },
}

pub async fn run_curriculum_command(command: CurriculumCommands, pool: &PgPool) -> Result<()> {
    match command {
        CurriculumCommands::ImportSow { form, file } => {
            let grade: Grade = form.parse()?;
            let lessons: Vec<SowLesson> = read_json(&file)?;
            let stored = linker::upload_sow(pool, grade, &lessons).await?;
            println!(
                "Imported {} lesson(s) for {grade}; scheme of work now has {}.",
                lessons.len(),
                stored.len()
            );
        }
        CurriculumCommands::ImportTextbook { form, file } => {
            let grade: Grade = form.parse()?;
            let topics: Vec<String> = read_json(&file)?;
            let row = linker::replace_textbook_topics(pool, grade, &topics).await?;
            println!("Stored {} textbook topic(s) for {grade}.", row.topics.len());
        }
        CurriculumCommands::ImportDskp { subject, file } => {
            let subject: Subject = subject.parse()?;
            let forms: Vec<DskpFormEntry> = read_json(&file)?;
            let doc = linker::upsert_dskp(pool, subject, &forms).await?;
            println!("Stored DSKP for {subject} covering {} form(s).", doc.forms.0.len());
        }
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {}", path.display()))
}
