//! Fennec CLI
//!
//! Command-line tool for moving CSV data in and out of fennec databases.
//!
//! ## Usage
//!
//! ```bash
//! # Import rows from a file (or stdin with `-`)
//! fennec import metrics.db cpu.load samples.csv
//!
//! # Export a stream to stdout
//! fennec export metrics.db cpu.load
//! ```
//!
//! Rows are `timestamp,value` with an RFC3339 timestamp at nanosecond
//! precision and a signed 64-bit integer value:
//!
//! ```text
//! 2024-01-01T00:00:00.000000000Z,42
//! ```
//!
//! An import runs inside a single stream transaction: a malformed row
//! aborts with a line-numbered error and nothing is committed. Exit code
//! is 0 on success, non-zero with a message on any error.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use clap::{Parser, Subcommand};
use fennec::Database;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "fennec")]
#[command(about = "Fennec time-series database tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import CSV rows into a stream
    Import {
        /// Database file (created if absent)
        db: PathBuf,
        /// Stream name
        stream: String,
        /// CSV file to read, or `-` for stdin
        #[arg(default_value = "-")]
        path: String,
    },
    /// Export a stream as CSV rows
    Export {
        /// Database file
        db: PathBuf,
        /// Stream name
        stream: String,
        /// CSV file to write, or `-` for stdout
        #[arg(default_value = "-")]
        path: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Import { db, stream, path } => import(&db, &stream, &path),
        Command::Export { db, stream, path } => export(&db, &stream, &path),
    }
}

fn import(db_path: &Path, name: &str, path: &str) -> Result<()> {
    let input: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(path).with_context(|| format!("opening {path}"))?;
        Box::new(BufReader::new(file))
    };

    let db = Database::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let stream = db.stream(name.as_bytes())?;

    let mut tx = stream.begin()?;
    let mut rows = 0usize;
    for (index, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading {path}"))?;
        if line.is_empty() {
            continue;
        }

        let (time, value) = parse_row(&line).with_context(|| format!("line {}", index + 1))?;
        tx.add(time, value)?;
        rows += 1;
    }
    tx.commit()?;
    db.close()?;

    eprintln!("imported {rows} samples into `{name}'");

    Ok(())
}

fn export(db_path: &Path, name: &str, path: &str) -> Result<()> {
    let mut output: Box<dyn Write> = if path == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        let file = File::create(path).with_context(|| format!("creating {path}"))?;
        Box::new(BufWriter::new(file))
    };

    let db = Database::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let stream = db.stream(name.as_bytes())?;

    for sample in stream.iter()? {
        let sample = sample?;
        let time = DateTime::from_timestamp_nanos(sample.time);
        writeln!(
            output,
            "{},{}",
            time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            sample.value
        )?;
    }

    output.flush()?;
    db.close()?;

    Ok(())
}

/// Parses one `timestamp,value` row.
///
/// The two fields carry no quoting or escaping, so a plain comma split is
/// the whole grammar.
fn parse_row(line: &str) -> Result<(i64, i64)> {
    let (time, value) = line
        .split_once(',')
        .context("expected `timestamp,value`")?;

    let time = DateTime::parse_from_rfc3339(time.trim())
        .with_context(|| format!("invalid timestamp `{}'", time.trim()))?
        .timestamp_nanos_opt()
        .context("timestamp outside the nanosecond-representable range")?;

    let value: i64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid value `{}'", value.trim()))?;

    Ok((time, value))
}
