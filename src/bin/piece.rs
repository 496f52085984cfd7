//! `piece`: resolve, plan and verify Filecoin piece downloads
//!
//! Manifests and JSON go to stdout; logs and progress bars go to stderr.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use url::Url;

use piece_dl::error::{EXIT_MISMATCH, EXIT_NOT_FOUND, EXIT_RESOLUTION};
use piece_dl::piece::height_from_log2_size;
use piece_dl::{
    BatchVerifier, CarDirectory, Config, Error, Event, LocationResolver, MissingArtifact, Offer,
    PieceCid, PlanBuilder, Result, ToExitCode,
};

const BYTES_STYLE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const COUNT_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len}";

/// Resolve, plan and verify Filecoin piece downloads
#[derive(Parser)]
#[command(name = "piece", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Location lookup service URL
    #[arg(long, global = true)]
    endpoint: Option<Url>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an aria2 download plan for a piece or an aggregate offer
    Plan {
        /// Piece CID to plan
        piece: Option<PieceCid>,

        /// Offer JSON listing the aggregate and its pieces
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write the plan here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Lookups in flight at once
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Check that CAR files hash to their piece CIDs
    Verify {
        /// CAR file to check
        car: Option<PathBuf>,

        /// Expected piece CID (default: inferred from the CAR file name)
        piece: Option<PieceCid>,

        /// Offer JSON; checks the aggregate and every piece
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory holding `<piece>.car` files for --input
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Hashing threads
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print the download location of pieces as JSON lines (reads stdin when none given)
    Find {
        /// Piece CIDs
        pieces: Vec<String>,
    },

    /// Convert a PieceCIDv1 to a PieceCIDv2
    V2 {
        /// PieceCIDv1
        piece: PieceCid,

        /// Tree height of the piece
        #[arg(long, conflicts_with = "log_size", required_unless_present = "log_size")]
        height: Option<u8>,

        /// log2 of the padded piece size in bytes
        #[arg(long)]
        log_size: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error_code = e.error_code(), "run failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.resolver.endpoint = endpoint;
    }

    match cli.command {
        Command::Plan {
            piece,
            input,
            output,
            concurrency,
        } => {
            if let Some(concurrency) = concurrency {
                config.plan.concurrency = concurrency;
            }
            config.validate()?;
            plan(&config, piece, input, output).await
        }
        Command::Verify {
            car,
            piece,
            input,
            dir,
            workers,
        } => {
            if let Some(workers) = workers {
                config.verify.workers = workers;
            }
            config.validate()?;
            verify(&config, car, piece, input, dir).await
        }
        Command::Find { pieces } => {
            config.validate()?;
            find(&config, pieces).await
        }
        Command::V2 {
            piece,
            height,
            log_size,
        } => v2(piece, height, log_size),
    }
}

async fn plan(
    config: &Config,
    piece: Option<PieceCid>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let (aggregate, pieces) = match (input, piece) {
        (Some(path), _) => {
            let offer = Offer::from_path(path)?;
            (Some(offer.aggregate), offer.pieces)
        }
        (None, Some(piece)) => (None, vec![piece]),
        (None, None) => {
            return Err(Error::InvalidInput(
                "need a piece CID or --input <offer json>".to_string(),
            ));
        }
    };

    let resolver = LocationResolver::new(&config.resolver)?;
    let (tx, events) = broadcast::channel(1024);
    let progress = spawn_count_progress(events, pieces.len());

    let builder = PlanBuilder::new(&config.plan).with_events(tx);
    let built = builder.build(aggregate.as_ref(), &pieces, &resolver).await;
    drop(builder);
    progress.await.ok();
    let mut plan = built?;

    if aggregate.is_none()
        && let Some(failure) = plan.failures.pop()
    {
        return Err(failure.error);
    }

    let text = plan.render();
    match output {
        Some(path) => std::fs::write(&path, text)?,
        None => print!("{text}"),
    }

    if plan.is_complete() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &plan.failures {
        eprintln!("{}: {}", failure.piece, failure.error);
    }
    eprintln!("{}", resolution_summary(plan.failures.len()));
    Ok(ExitCode::from(EXIT_RESOLUTION))
}

async fn verify(
    config: &Config,
    car: Option<PathBuf>,
    piece: Option<PieceCid>,
    input: Option<PathBuf>,
    dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let verifier = BatchVerifier::new(&config.verify);
    let progress = spawn_bytes_progress(verifier.subscribe());

    let Some(input) = input else {
        let car = car.ok_or_else(|| {
            Error::InvalidInput("need a CAR file or --input <offer json>".to_string())
        })?;
        let outcome = verifier.verify_one(&car, piece).await;
        drop(verifier);
        progress.await.ok();

        return match outcome {
            Ok(result) => {
                println!("{} ok", result.target);
                Ok(ExitCode::SUCCESS)
            }
            Err(Error::PieceMismatch { expected, actual }) => {
                println!("expected {expected}");
                println!("actual   {actual}");
                Ok(ExitCode::from(EXIT_MISMATCH))
            }
            Err(e) => Err(e),
        };
    };

    let offer = Offer::from_path(input)?;
    let artifacts = CarDirectory::new(dir.unwrap_or_else(|| PathBuf::from(".")));
    let outcome = verifier.verify_offer(&offer, &artifacts).await;
    drop(verifier);
    progress.await.ok();

    let report = match outcome {
        Err(Error::AggregateMismatch { expected, actual }) => {
            println!("aggregate cid mismatch");
            println!("expected {expected}");
            println!("actual   {actual}");
            return Ok(ExitCode::from(EXIT_MISMATCH));
        }
        Err(Error::MissingArtifacts(missing)) => {
            for line in missing_report(&missing) {
                println!("{line}");
            }
            return Ok(ExitCode::from(EXIT_NOT_FOUND));
        }
        other => other?,
    };

    println!("aggregate cid {} ok", report.aggregate);
    let mut failed = 0usize;
    for failure in report.failures() {
        println!("{}", serde_json::to_string(failure)?);
        failed += 1;
    }
    if failed == 0 {
        println!("verified {} pieces", report.results.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("failed to verify {failed}");
        Ok(ExitCode::from(EXIT_MISMATCH))
    }
}

async fn find(config: &Config, args: Vec<String>) -> Result<ExitCode> {
    let inputs = if args.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut inputs = Vec::new();
        while let Some(line) = lines.next_line().await? {
            inputs.push(line);
        }
        inputs
    } else {
        args
    };

    let pieces = inputs
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(PieceCid::parse)
        .collect::<Result<Vec<_>>>()?;
    if pieces.is_empty() {
        return Err(Error::EmptyInput);
    }

    let resolver = LocationResolver::new(&config.resolver)?;
    let mut outcomes = PlanBuilder::new(&config.plan)
        .resolve_all(&pieces, &resolver)
        .await;

    if outcomes.len() == 1 && outcomes[0].is_err() {
        return outcomes.remove(0).map(|_| ExitCode::SUCCESS);
    }

    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(location) => println!("{}", serde_json::to_string(&location)?),
            Err(e) => {
                eprintln!("{e}");
                failed += 1;
            }
        }
    }
    if failed == 0 {
        return Ok(ExitCode::SUCCESS);
    }
    eprintln!("{}", resolution_summary(failed));
    Ok(ExitCode::from(EXIT_RESOLUTION))
}

fn v2(piece: PieceCid, height: Option<u8>, log_size: Option<u32>) -> Result<ExitCode> {
    let height = match (height, log_size) {
        (Some(height), _) => height,
        (None, Some(log_size)) => height_from_log2_size(log_size)?,
        (None, None) => {
            return Err(Error::InvalidInput(
                "need --height or --log-size".to_string(),
            ));
        }
    };
    println!("{}", piece.to_v2(height)?);
    Ok(ExitCode::SUCCESS)
}

/// One line per absent artifact, then the count
fn missing_report(missing: &[MissingArtifact]) -> Vec<String> {
    let mut lines: Vec<String> = missing.iter().map(ToString::to_string).collect();
    lines.push(format!("missing {} artifact(s)", missing.len()));
    lines
}

fn resolution_summary(failed: usize) -> String {
    format!("failed to resolve {failed}")
}

fn styled(bar: ProgressBar, template: &str) -> ProgressBar {
    match ProgressStyle::with_template(template) {
        Ok(style) => bar.with_style(style),
        Err(_) => bar,
    }
}

/// Byte progress for hashing, driven by verifier events
fn spawn_bytes_progress(mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        loop {
            match events.recv().await {
                Ok(Event::HashingStarted { total_bytes, .. }) => {
                    bar = Some(styled(ProgressBar::new(total_bytes), BYTES_STYLE));
                }
                Ok(Event::PieceHashed {
                    processed_bytes, ..
                }) => {
                    if let Some(bar) = &bar {
                        bar.set_position(processed_bytes);
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    })
}

/// Piece count progress for lookups
fn spawn_count_progress(mut events: broadcast::Receiver<Event>, total: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = styled(ProgressBar::new(total as u64), COUNT_STYLE);
        loop {
            match events.recv().await {
                Ok(Event::PieceResolved { .. }) => bar.inc(1),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        bar.finish_and_clear();
    })
}
