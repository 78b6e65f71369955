use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use audiolivre::progress::{RunEvent, RunReport, percent};
use audiolivre::session::Session;

const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> anyhow::Result<ExitCode> {
    let cli = audiolivre::cli::Cli::parse();
    audiolivre::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        audiolivre::cli::Command::Convert(args) => {
            let session = audiolivre::session::spawn_conversion(
                args.input.clone(),
                args.options(),
                args.synthesizer().context("configure speech engine")?,
            )?;
            drive(session).await.context("convert")
        }
        audiolivre::cli::Command::Translate(args) => {
            let session = audiolivre::session::spawn_translation(
                args.input.clone(),
                args.options(),
                args.translator().context("configure translation engine")?,
            )?;
            drive(session).await.context("translate")
        }
        audiolivre::cli::Command::Scan(args) => {
            let chapters = audiolivre::extract::extract_chapters(&args.input).context("scan")?;
            if args.json {
                let report = audiolivre::formats::ScanReport::new(&chapters);
                let json = serde_json::to_string_pretty(&report).context("encode scan report")?;
                println!("{json}");
            } else {
                let words = audiolivre::synth::total_words(&chapters);
                println!("chapters={} words={words}", chapters.len());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Prints session events until the run reports its end. Ctrl-C requests
/// cancellation once; in-flight work is then allowed to wind down.
async fn drive(mut session: Session) -> anyhow::Result<ExitCode> {
    let mut report = None;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            event = session.events.recv() => match event {
                Some(RunEvent::Progress { current, total, message }) => {
                    eprintln!("[{:>3}%] {message}", percent(current, total));
                }
                Some(RunEvent::Status(status)) => tracing::debug!(%status, "status"),
                Some(RunEvent::Finished(finished)) => report = Some(finished),
                None => break,
            },
            _ = &mut ctrl_c, if !session.cancel.is_cancelled() => {
                tracing::warn!("cancellation requested; waiting for in-flight work");
                session.cancel();
            }
        }
    }
    session.join();

    match report {
        Some(RunReport::Success { output, message }) => {
            eprintln!("{message}");
            println!("{}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(RunReport::Failure { message }) => Err(anyhow::anyhow!(message)),
        Some(RunReport::Cancelled) => {
            eprintln!("Cancelled by user.");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        None => anyhow::bail!("pipeline ended without a report"),
    }
}
