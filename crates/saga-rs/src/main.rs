//! Inspect saga session archives and replay transcripts offline.
//!
//! # Examples
//!
//! ```sh
//! # Feed a JSONL transcript through a full session with the deterministic
//! # summarizer and print the assembled window.
//! saga replay --session story-1 --transcript transcript.jsonl
//!
//! # With a custom ceiling and starting location
//! saga replay --session story-1 --transcript transcript.jsonl \
//!   --ceiling 8000 --aggregate Greyhollow --unit "The Drowned Inn"
//!
//! # List what a session has archived
//! saga inspect --session story-1
//! ```
//!
//! Transcript lines are either `{"role": "user", "content": "..."}` JSON
//! objects or plain text (treated as user turns). Transition markers use the
//! upstream protocol text, e.g. `Unit transition: Inn to Road`.

use clap::{Parser, Subcommand};
use saga_rs::archive::ArchiveStore;
use saga_rs::prelude::*;
use saga_rs::session::SessionManifest;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// Inspect saga session archives and replay transcripts offline.
#[derive(Parser)]
#[command(name = "saga", version)]
struct Cli {
    /// Enable debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Root directory holding session directories
    #[arg(long, global = true, default_value = ".saga")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a session's manifest and archived records
    Inspect {
        /// Session identifier (directory name under the root)
        #[arg(long)]
        session: String,
    },
    /// Replay a transcript through a full session pipeline
    Replay {
        /// Session identifier (directory name under the root)
        #[arg(long)]
        session: String,

        /// Path to a JSONL transcript
        #[arg(long)]
        transcript: PathBuf,

        /// System framing message for a fresh session
        #[arg(long, default_value = "You are the narrator of an endless tale.")]
        framing: String,

        /// Token ceiling for the assembled window
        #[arg(long, default_value_t = 16_000)]
        ceiling: usize,

        /// Starting aggregate for a fresh session
        #[arg(long, default_value = "Prologue")]
        aggregate: String,

        /// Starting unit for a fresh session
        #[arg(long, default_value = "Opening Scene")]
        unit: String,
    },
}

/// One transcript line in JSON form.
#[derive(Deserialize)]
struct TranscriptLine {
    role: MessageRole,
    content: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let result = match cli.command {
        Command::Inspect { ref session } => inspect(&cli.root, session),
        Command::Replay {
            ref session,
            ref transcript,
            ref framing,
            ceiling,
            ref aggregate,
            ref unit,
        } => replay(&cli.root, session, transcript, framing, ceiling, aggregate, unit).await,
    };

    if let Err(e) = result {
        eprintln!("saga: {e}");
        process::exit(1);
    }
}

fn inspect(root: &Path, session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = root.join(session);
    if !dir.exists() {
        return Err(format!("no session at {}", dir.display()).into());
    }

    match SessionManifest::load(&dir)? {
        Some(m) => {
            println!("session:    {}", m.session_id);
            println!("location:   {} / {}", m.current_aggregate, m.current_unit);
            println!("watermark:  {}", m.watermark);
            println!("turns:      {}", m.turns);
        }
        None => println!("session:    {session} (no manifest)"),
    }

    let archive = ArchiveStore::open(dir.join("archive"))?;
    let slugs = archive.container_slugs()?;
    if slugs.is_empty() {
        println!("archive:    empty");
        return Ok(());
    }

    println!("archive:");
    for slug in slugs {
        let records = archive.list(&ContainerId::new(slug.as_str()))?;
        println!("  {slug} ({} record(s))", records.len());
        for record in records {
            match &record.payload {
                saga_rs::archive::RecordPayload::Segment(seg) => {
                    println!(
                        "    #{:04} segment    ordinals {}..={}, {} message(s)",
                        record.sequence,
                        seg.range.start,
                        seg.range.end,
                        seg.messages.len(),
                    );
                }
                saga_rs::archive::RecordPayload::Summary(s) => {
                    let tier = match s.tier {
                        SummaryTier::Unit => "unit      ",
                        SummaryTier::Aggregate => "chronicle ",
                    };
                    let degraded = if s.degraded { " [degraded]" } else { "" };
                    println!(
                        "    #{:04} {tier} ordinals {}..={}, {} chars{degraded}",
                        record.sequence,
                        s.source_range.start,
                        s.source_range.end,
                        s.text.chars().count(),
                    );
                }
            }
        }
    }
    Ok(())
}

async fn replay(
    root: &Path,
    session_id: &str,
    transcript: &Path,
    framing: &str,
    ceiling: usize,
    aggregate: &str,
    unit: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(transcript)
        .map_err(|e| format!("cannot read {}: {e}", transcript.display()))?;

    let config = SagaConfig::new(session_id, framing)
        .with_root_dir(root)
        .with_token_ceiling(ceiling);
    let summarizer: Arc<dyn Summarizer> = Arc::new(TruncatingSummarizer);
    let mut session = Session::open(config, summarizer, aggregate, unit).await?;

    let mut recorded = 0usize;
    let mut compressions = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let message = match serde_json::from_str::<TranscriptLine>(line) {
            Ok(parsed) => Message::new(parsed.role, parsed.content),
            Err(_) => Message::user(line),
        };
        let report = session.record(message).await?;
        recorded += 1;
        compressions += report.compression.unit_summaries + report.compression.chronicles;
    }

    let window = session.window().await?;

    println!("replayed {recorded} message(s), {compressions} compression(s)");
    println!(
        "memory: {} chronicle(s), {} active unit summary(ies), location {} / {}",
        session.state().chronicles.len(),
        session.state().unit_summaries.len(),
        session.state().current_aggregate,
        session.state().current_unit,
    );
    println!(
        "window: {} message(s), ~{} tokens (ceiling {}){}",
        window.messages.len(),
        window.estimated_tokens,
        ceiling,
        if window.starved { ", context-starved" } else { "" },
    );
    println!("──");
    for msg in &window.messages {
        println!("[{}] {}", msg.role, msg.content);
    }
    Ok(())
}
