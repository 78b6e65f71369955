//! Runs a pipeline on its own OS thread and hands events back over a channel.
//!
//! The worker thread owns a current-thread tokio runtime, so every task of a
//! run shares one cooperative event loop. The caller only ever sees
//! [`RunEvent`]s; it never touches pipeline state directly.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::convert::{self, ConvertOptions};
use crate::progress::{EventSink, RunEvent, RunOutcome, RunReport};
use crate::translate::{self, TranslateOptions};
use crate::translator::TextTranslator;
use crate::tts::SpeechSynthesizer;

pub struct Session {
    pub events: mpsc::UnboundedReceiver<RunEvent>,
    pub cancel: CancellationToken,
    worker: std::thread::JoinHandle<()>,
}

impl Session {
    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains events until the worker finishes, then joins it.
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        self.join();
        events
    }

    /// Waits for the worker thread. Call after the event channel closed.
    pub fn join(self) {
        if self.worker.join().is_err() {
            tracing::error!("pipeline worker panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

pub fn spawn_conversion(
    source: PathBuf,
    options: ConvertOptions,
    synthesizer: Arc<dyn SpeechSynthesizer>,
) -> anyhow::Result<Session> {
    spawn_worker(
        "audiolivre-convert",
        |_| "Conversion completed successfully!".to_string(),
        move |events, cancel| async move {
            convert::run_conversion(&source, &options, synthesizer, events, cancel).await
        },
    )
}

pub fn spawn_translation(
    source: PathBuf,
    options: TranslateOptions,
    translator: Box<dyn TextTranslator>,
) -> anyhow::Result<Session> {
    spawn_worker(
        "audiolivre-translate",
        |output| format!("Translation complete: {}", output.display()),
        move |events, cancel| async move {
            translate::run_translation(&source, &options, translator.as_ref(), events, cancel)
                .await
        },
    )
}

fn spawn_worker<F, Fut>(
    name: &str,
    success_message: fn(&Path) -> String,
    run: F,
) -> anyhow::Result<Session>
where
    F: FnOnce(EventSink, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<RunOutcome>>,
{
    let (sink, events) = EventSink::channel();
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();

    let worker = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let report = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => {
                    let outcome = runtime.block_on(run(sink.clone(), worker_cancel));
                    report_for(outcome, success_message)
                }
                Err(err) => RunReport::Failure {
                    message: format!("build pipeline runtime: {err}"),
                },
            };
            sink.finished(report);
        })
        .with_context(|| format!("spawn worker thread: {name}"))?;

    Ok(Session {
        events,
        cancel,
        worker,
    })
}

fn report_for(
    outcome: anyhow::Result<RunOutcome>,
    success_message: fn(&Path) -> String,
) -> RunReport {
    match outcome {
        Ok(RunOutcome::Completed(output)) => {
            let message = success_message(&output);
            tracing::info!(output = %output.display(), "{message}");
            RunReport::Success { output, message }
        }
        Ok(RunOutcome::Cancelled) => {
            tracing::info!("cancelled by user");
            RunReport::Cancelled
        }
        Err(err) => {
            tracing::error!(error = ?err, "run failed");
            RunReport::Failure {
                message: format!("{err:#}"),
            }
        }
    }
}
