use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::assemble;
use crate::error::PipelineError;
use crate::extract;
use crate::formats::Chapter;
use crate::progress::{EventSink, RunOutcome};
use crate::synth::{self, BatchOutcome, DEFAULT_PARALLEL};
use crate::tts::{SpeechSynthesizer, SynthesisSettings};

const TEMP_DIR_PREFIX: &str = "audiolivre_";

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Encoder executable. `None` searches `PATH`.
    pub encoder: Option<PathBuf>,
    pub settings: SynthesisSettings,
    pub parallel: usize,
    /// Copy the numbered segments to `<base>_MP3s/` beside the source.
    pub keep_segments: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            encoder: None,
            settings: SynthesisSettings::default(),
            parallel: DEFAULT_PARALLEL,
            keep_segments: false,
        }
    }
}

/// Output locations derived from the source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertPaths {
    pub audiobook: PathBuf,
    pub transcript: PathBuf,
    pub segment_export: PathBuf,
}

impl ConvertPaths {
    pub fn for_source(source: &Path) -> Result<Self, PipelineError> {
        let base = source
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::InvalidSourcePath(source.to_path_buf()))?;
        let dir = source.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self {
            audiobook: dir.join(format!("{base}.m4b")),
            transcript: dir.join(format!("{base}_debug.txt")),
            segment_export: dir.join(format!("{base}_MP3s")),
        })
    }
}

/// Document to `.m4b`: extract, synthesize every chunk, merge.
pub async fn run_conversion(
    source: &Path,
    options: &ConvertOptions,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: EventSink,
    cancel: CancellationToken,
) -> anyhow::Result<RunOutcome> {
    tracing::info!(
        source = %source.display(),
        voice = %options.settings.voice,
        rate = options.settings.rate,
        volume = options.settings.volume,
        parallel = options.parallel,
        "start conversion"
    );

    let encoder = assemble::resolve_encoder(options.encoder.as_deref())?;
    let paths = ConvertPaths::for_source(source)?;

    events.progress(0, 100, "Extracting text...");
    let chapters = extract::extract_chapters(source)?;
    tracing::info!(chapters = chapters.len(), "extraction complete");
    if chapters.is_empty() {
        return Err(PipelineError::NoText.into());
    }

    write_transcript(&paths.transcript, &chapters);

    if cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }

    let temp = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .context("create temp dir")?;
    tracing::info!(dir = %temp.path().display(), "temp directory");

    let result = synthesize_and_merge(
        &chapters, &encoder, &paths, options, synthesizer, events, cancel, temp.path(),
    )
    .await;

    let temp_path = temp.path().to_path_buf();
    match temp.close() {
        Ok(()) => tracing::debug!(dir = %temp_path.display(), "cleaned up temp dir"),
        Err(err) => {
            tracing::warn!(dir = %temp_path.display(), error = %err, "failed to clean up temp dir");
        }
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn synthesize_and_merge(
    chapters: &[Chapter],
    encoder: &Path,
    paths: &ConvertPaths,
    options: &ConvertOptions,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: EventSink,
    cancel: CancellationToken,
    work_dir: &Path,
) -> anyhow::Result<RunOutcome> {
    let total_words = synth::total_words(chapters);
    let items = synth::plan_work_items(chapters, work_dir);
    tracing::info!(total_words, items = items.len(), "work items planned");

    let outcome = synth::synthesize_all(
        items,
        total_words,
        synthesizer,
        options.settings.clone(),
        options.parallel,
        events.clone(),
        cancel,
    )
    .await?;
    let segments = match outcome {
        BatchOutcome::Completed(segments) => segments,
        BatchOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
    };

    events.progress(total_words, total_words, "Merging to M4B...");
    assemble::assemble(encoder, &segments, work_dir, &paths.audiobook).await?;
    tracing::info!(output = %paths.audiobook.display(), "created audiobook");

    if options.keep_segments {
        assemble::export_segments(&segments, &paths.segment_export)?;
    }

    Ok(RunOutcome::Completed(paths.audiobook.clone()))
}

/// Dumps the extracted chapters beside the source. Failure only warns.
fn write_transcript(path: &Path, chapters: &[Chapter]) {
    let mut out = String::new();
    for chapter in chapters {
        let _ = write!(out, "=== {} ===\n\n{}\n\n", chapter.title, chapter.text);
    }
    match std::fs::write(path, out) {
        Ok(()) => tracing::debug!(path = %path.display(), "saved extracted text"),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not save extracted text");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_sit_beside_the_source() -> anyhow::Result<()> {
        let paths = ConvertPaths::for_source(Path::new("/books/My Book.epub"))?;
        assert_eq!(paths.audiobook, PathBuf::from("/books/My Book.m4b"));
        assert_eq!(paths.transcript, PathBuf::from("/books/My Book_debug.txt"));
        assert_eq!(paths.segment_export, PathBuf::from("/books/My Book_MP3s"));
        Ok(())
    }

    #[test]
    fn transcript_lists_every_chapter() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("b_debug.txt");
        write_transcript(
            &path,
            &[Chapter::new("One", "alpha"), Chapter::new("Two", "beta")],
        );
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "=== One ===\n\nalpha\n\n=== Two ===\n\nbeta\n\n"
        );
        Ok(())
    }
}
