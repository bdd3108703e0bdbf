use clap::Parser;
use color_eyre::eyre::Result;
use std::process::ExitCode;

use stackprobe::{DetectionReport, cli};

/// At least one target detected.
const EXIT_DETECTED: u8 = 0;
/// Nothing cleared the confidence threshold.
const EXIT_NOT_DETECTED: u8 = 1;
/// Catalog or invocation error.
const EXIT_ERROR: u8 = 2;

fn initialize_logger(debug: bool) -> Result<()> {
    let filter = if debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let config = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("stackprobe")
        .build();

    // stdout carries the JSON report, so logs stay on stderr.
    simplelog::TermLogger::init(
        filter,
        config,
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    Ok(())
}

fn render(report: &DetectionReport, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    Ok(json)
}

/// Detect, then render the report.
async fn run(args: &cli::Args) -> Result<(DetectionReport, String)> {
    initialize_logger(args.debug)?;

    let report = cli::execute(args).await?;
    let json = render(&report, args.pretty)?;

    Ok((report, json))
}

/// Print the outcome and pick the exit code. Every failure, including
/// logger setup, exits with [`EXIT_ERROR`].
fn finish(outcome: Result<(DetectionReport, String)>) -> u8 {
    match outcome {
        Ok((report, json)) => {
            println!("{json}");
            if report.detected {
                EXIT_DETECTED
            } else {
                EXIT_NOT_DETECTED
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_ERROR
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();

    let outcome = match color_eyre::install() {
        Ok(()) => run(&args).await,
        Err(e) => Err(e.into()),
    };

    ExitCode::from(finish(outcome))
}
