//! magic-classify CLI
//!
//! Command-line tool for classifying files against a `magic(5)`-dialect
//! rule database.

use clap::{Parser, ValueEnum};
use magic_rules::{classify_with_options, Database, MatchOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

/// Classify files against a `magic(5)`-style rule database.
#[derive(Parser, Debug)]
#[command(name = "magic-classify")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rule database file, in `magic(5)` text dialect.
    #[arg(short = 'm', long)]
    database: PathBuf,

    /// Input file(s) to classify.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Per-file match deadline, in milliseconds. Unbounded if omitted.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Print rejected database lines before classifying.
    #[arg(long)]
    show_rejects: bool,

    /// Verbose tracing output.
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: print only the classification, no file name prefix.
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output.
    Human,
    /// JSON output.
    Json,
    /// Compact single-line output, like `file(1) -b`.
    Short,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("magic_rules=debug")
            .init();
    }

    let text = match std::fs::read_to_string(&args.database) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error reading database {}: {e}", args.database.display());
            return ExitCode::FAILURE;
        }
    };

    let lines: Vec<(usize, &str)> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let (db, report) = Database::load(lines, None);

    if args.show_rejects {
        for rule in &report.rejected {
            eprintln!("rejected: {rule}");
        }
    }

    let options = MatchOptions {
        deadline: args.deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
    };

    let mut success = true;
    for path in &args.files {
        match classify_one(&db, path, &options, &args) {
            Ok(()) => {}
            Err(e) => {
                if !args.quiet {
                    eprintln!("error analyzing {}: {e}", path.display());
                }
                success = false;
            }
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn classify_one(
    db: &Database,
    path: &PathBuf,
    options: &MatchOptions,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    let result = classify_with_options(db, &data, options);

    match args.format {
        OutputFormat::Human => print_human(&result, path, args),
        OutputFormat::Json => print_json(&result, path)?,
        OutputFormat::Short => print_short(&result, path),
    }

    Ok(())
}

fn print_human(result: &magic_rules::ClassifyResult, path: &PathBuf, args: &Args) {
    if args.quiet {
        println!("{}: {}", path.display(), describe(result));
        return;
    }

    println!("File: {}", path.display());
    println!("  Type:    {}", describe(result));
    if let Some(mime) = &result.mime {
        println!("  MIME:    {mime}");
    }
    println!("  Partial: {}", result.partial_only);

    if args.verbose && !result.notes.is_empty() {
        println!("  Notes:");
        for note in &result.notes {
            println!("    - {note}");
        }
    }
    println!();
}

fn print_json(result: &magic_rules::ClassifyResult, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    #[derive(serde::Serialize)]
    struct JsonOutput<'a> {
        file: String,
        description: String,
        mime: Option<String>,
        partial: bool,
        notes: &'a [String],
    }

    let output = JsonOutput {
        file: path.display().to_string(),
        description: describe(result),
        mime: result.mime.clone(),
        partial: result.partial_only,
        notes: &result.notes,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_short(result: &magic_rules::ClassifyResult, path: &PathBuf) {
    println!("{}: {}", path.display(), describe(result));
}

fn describe(result: &magic_rules::ClassifyResult) -> String {
    if result.formatted_message.is_empty() {
        "data".to_string()
    } else {
        result.formatted_message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["magic-classify", "-m", "rules.txt", "test.bin"]).unwrap();
        assert_eq!(args.files.len(), 1);
        assert!(!args.verbose);
    }

    #[test]
    fn test_multiple_files() {
        let args = Args::try_parse_from(["magic-classify", "-m", "rules.txt", "a.bin", "b.bin"]).unwrap();
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_format_options() {
        let args = Args::try_parse_from(["magic-classify", "-m", "rules.txt", "-f", "json", "test.bin"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
    }
}
