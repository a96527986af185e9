use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gpth_datefix_core::{CancellationToken, FileReport, ProcessControl, RunOptions, TimeBasis};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(
    name = "gpth-datefix",
    version,
    about = "Fix capture dates of Google Photos Takeout exports using sidecar JSON, filenames and folder years"
)]
struct Cli {
    /// Takeout folder (prompted for when omitted)
    root: Option<PathBuf>,

    /// Leave the filesystem modification time untouched
    #[arg(long)]
    keep_file_time: bool,

    /// Disable date guessing from filenames
    #[arg(long)]
    no_guess: bool,

    /// Also read dates from screenshot and messenger style names (signal-2020-10-26-163832.jpg)
    #[arg(long, conflicts_with = "no_guess")]
    extended_names: bool,

    /// Interpret sidecar timestamps in local time instead of UTC
    #[arg(long)]
    local_time: bool,

    /// exiftool executable
    #[arg(long, default_value = "exiftool")]
    exiftool: PathBuf,

    /// Seconds before a single exiftool call is abandoned
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Files processed in parallel
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Write a JSON report of every file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn prompt_root() -> anyhow::Result<PathBuf> {
    eprint!("Enter path to Takeout folder: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(PathBuf::from(line.trim()))
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => prompt_root()?,
    };
    let root = expand_home(root);

    which::which(&cli.exiftool).with_context(|| {
        format!(
            "{} not found; install exiftool (https://exiftool.org) or pass --exiftool",
            cli.exiftool.display()
        )
    })?;

    let mut options = RunOptions::new(root);
    options.set_file_time = !cli.keep_file_time;
    options.allow_guess = !cli.no_guess;
    options.extended_names = cli.extended_names;
    options.time_basis = if cli.local_time { TimeBasis::Local } else { TimeBasis::Utc };
    options.exiftool = cli.exiftool;
    options.timeout_secs = cli.timeout;
    options.jobs = cli.jobs.max(1);
    options.report = cli.report;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling after the files in progress...");
            token.cancel();
        })
        .context("installing Ctrl-C handler")?;
    }
    let control = ProcessControl::new().with_cancel_token(token);

    let t_total = std::time::Instant::now();
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let on_scan = |stage: &str, current: u64, _total: u64, message: &str| {
        pb.set_message(format!("{} {} ({})", stage, message, current));
    };
    let on_file = |report: &FileReport, _index: u64, total: u64| {
        pb.set_length(total);
        pb.println(report.log_line());
        pb.inc(1);
    };

    let result = gpth_datefix_core::process(&options, &control, &on_scan, &on_file)?;
    pb.finish_and_clear();

    let s = result.summary;
    if result.cancelled {
        eprintln!("Cancelled: {}/{} files processed", s.total, result.discovered);
    } else {
        eprintln!("Done! ({:.2}s)", t_total.elapsed().as_secs_f64());
    }
    eprintln!("Updated: {}", s.updated);
    eprintln!("Skipped: {}", s.skipped);
    eprintln!("Failed:  {}", s.failed);
    eprintln!("Total:   {}", s.total);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Problems are reported on the console; the exit status is always 0.
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {:#}", e);
    }
}
