use std::path::PathBuf;

use anyhow::Context;
use chrono::DateTime;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkbuf::{BufferConfig, BufferRoot, Chunk, ChunkState, PathRegistry};

/// Chunk Buffer Inspection Tool
///
/// Lists the chunk files under a buffer root together with their restored
/// descriptor fields.  The tool never modifies the buffer: broken files are
/// reported, not deleted.
#[derive(Parser, Debug)]
#[command(name = "chunkbuf-inspect", version, about)]
struct Args {
    /// Buffer root directory.
    #[arg(long)]
    root: PathBuf,

    /// Stream name under the root.
    #[arg(long, default_value = "buffer")]
    stream_name: String,

    /// Suffix of chunk files.
    #[arg(long, default_value = "buf")]
    file_suffix: String,

    /// Total number of workers sharing the root.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Worker index to inspect.
    #[arg(long, default_value_t = 0)]
    worker_id: usize,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let config = BufferConfig {
        root: Some(args.root),
        stream_name: args.stream_name,
        file_suffix: args.file_suffix,
        workers: args.workers,
        worker_id: args.worker_id,
        ..BufferConfig::default()
    };
    let buffer = BufferRoot::configure(config, &PathRegistry::new())
        .context("invalid buffer configuration")?;

    let mut table = vec![row(&[
        "ID", "STATE", "RECORDS", "BYTES", "CREATED", "MODIFIED", "PATH",
    ])];
    let mut broken: Vec<(PathBuf, chunkbuf::BufferError)> = Vec::new();
    let mut staged = 0usize;
    let mut queued = 0usize;
    let mut unstaged = 0usize;

    for location in buffer.resume_locations() {
        for path in location.chunk_files() {
            // Assume restores the descriptor without taking the chunk over.
            let mut chunk = match Chunk::assume(&path) {
                Ok(chunk) => chunk,
                Err(e) => {
                    broken.push((path, e));
                    continue;
                }
            };
            match chunk.state() {
                ChunkState::Staged => staged += 1,
                ChunkState::Queued => queued += 1,
                _ => unstaged += 1,
            }
            table.push(row(&[
                &chunk.unique_id().to_hex(),
                state_name(chunk.state()),
                &chunk.size().to_string(),
                &chunk.bytesize().to_string(),
                &format_time(chunk.created_at()),
                &format_time(chunk.modified_at()),
                &chunk.path().display().to_string(),
            ]));
            chunk.close()?;
        }
    }

    print_aligned(&table);
    for (path, err) in &broken {
        println!("broken: {}: {}", path.display(), err);
    }
    println!(
        "{} chunks ({} staged, {} queued, {} unstaged), {} broken",
        staged + queued + unstaged,
        staged,
        queued,
        unstaged,
        broken.len()
    );

    Ok(())
}

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

fn state_name(state: ChunkState) -> &'static str {
    match state {
        ChunkState::Unstaged => "unstaged",
        ChunkState::Staged => "staged",
        ChunkState::Queued => "queued",
        ChunkState::Closed => "closed",
        ChunkState::Purged => "purged",
    }
}

fn format_time(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => secs.to_string(),
    }
}

/// Column-aligned table output with a two-space separator.
fn print_aligned(table: &[Vec<String>]) {
    let mut widths: Vec<usize> = Vec::new();
    for row in table {
        if widths.len() < row.len() {
            widths.resize(row.len(), 0);
        }
        for (col, cell) in row.iter().enumerate() {
            if cell.len() > widths[col] {
                widths[col] = cell.len();
            }
        }
    }
    for row in table {
        let mut line = String::new();
        for (col, cell) in row.iter().enumerate() {
            line.push_str(cell);
            if col + 1 < row.len() {
                for _ in 0..widths[col].saturating_sub(cell.len()) + 2 {
                    line.push(' ');
                }
            }
        }
        println!("{}", line);
    }
}
