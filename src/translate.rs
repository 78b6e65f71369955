use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chunk::{self, TRANSLATION_MAX_CHARS};
use crate::epub::{self, BookPackage};
use crate::error::PipelineError;
use crate::extract;
use crate::formats::{Chapter, DocumentMetadata, TranslationUnit};
use crate::progress::{EventSink, RunOutcome};
use crate::translator::{self, TextTranslator};

/// Share of the progress range used by chunk translation; the rest is
/// packaging.
const TRANSLATION_PROGRESS_SPAN: usize = 90;

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// Target language tag; only the primary subtag is sent to the service.
    pub target_lang: String,
    pub max_attempts: usize,
    /// Pause between two attempts on the same chunk.
    pub retry_delay: Duration,
    /// Pause after every chunk, successful or not.
    pub chunk_delay: Duration,
}

impl TranslateOptions {
    pub fn new(target_lang: impl Into<String>) -> Self {
        Self {
            target_lang: target_lang.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            chunk_delay: Duration::from_millis(100),
        }
    }
}

/// `<dir>/<base>_<lang>.epub`.
pub fn translated_output_path(source: &Path, lang: &str) -> Result<PathBuf, PipelineError> {
    let base = source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::InvalidSourcePath(source.to_path_buf()))?;
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("{base}_{lang}.epub")))
}

/// EPUB to translated EPUB. Chapters and chunks are processed one at a time.
pub async fn run_translation(
    source: &Path,
    options: &TranslateOptions,
    translator: &dyn TextTranslator,
    events: EventSink,
    cancel: CancellationToken,
) -> anyhow::Result<RunOutcome> {
    let lang = translator::target_code(&options.target_lang).to_string();
    tracing::info!(
        source = %source.display(),
        target = %options.target_lang,
        lang = %lang,
        "start translation"
    );
    let output = translated_output_path(source, &lang)?;

    events.progress(0, 100, "Extracting text and metadata...");
    let (chapters, mut metadata) = extract::extract_with_metadata(source)?;
    if chapters.is_empty() {
        return Err(PipelineError::NoText.into());
    }
    let total_chars = chapters
        .iter()
        .map(|chapter| chapter.text.chars().count())
        .sum::<usize>();
    tracing::info!(chapters = chapters.len(), total_chars, "extraction complete");

    match translator.translate(&metadata.title, &lang).await {
        Ok(title) => {
            tracing::debug!(title = %title, "translated book title");
            metadata.title = title;
        }
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "failed to translate book title"),
    }

    let chapter_count = chapters.len();
    let mut translated = Vec::with_capacity(chapter_count);
    let mut chars_done = 0usize;

    for (idx, chapter) in chapters.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        tracing::info!(
            chapter = idx + 1,
            chapters = chapter_count,
            title = %chapter.title,
            "translating chapter"
        );

        let chunks = chunk::split_text_smart(&chapter.text, TRANSLATION_MAX_CHARS);
        let mut unit = TranslationUnit::new(chapter, chunks);
        unit.translated_title = match translator.translate(&unit.title, &lang).await {
            Ok(title) => Some(title),
            Err(err) => {
                tracing::warn!(title = %unit.title, error = %format!("{err:#}"), "failed to translate chapter title; keeping original");
                None
            }
        };

        for (chunk_idx, chunk) in unit.chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let text = match translate_with_retry(translator, chunk, &lang, options).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(
                        chapter = idx + 1,
                        chunk = chunk_idx + 1,
                        error = %err,
                        "chunk translation failed; using original text"
                    );
                    chunk.clone()
                }
            };
            unit.translated_chunks.push(text);

            chars_done += chunk.chars().count();
            let pct = scaled_percent(chars_done, total_chars);
            events.progress(pct, 100, format!("Translating... ({pct}%)"));

            tokio::time::sleep(options.chunk_delay).await;
        }

        translated.push(unit.into_chapter());
    }

    events.progress(95, 100, "Saving file...");
    save(&output, &metadata, &translated, &lang, source)?;

    events.progress(100, 100, "Done!");
    tracing::info!(output = %output.display(), "translation complete");
    Ok(RunOutcome::Completed(output))
}

/// Calls the service up to `max_attempts` times, sleeping between attempts.
async fn translate_with_retry(
    translator: &dyn TextTranslator,
    text: &str,
    lang: &str,
    options: &TranslateOptions,
) -> Result<String, PipelineError> {
    let attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        tracing::debug!(attempt, attempts, chars = text.chars().count(), "translate chunk");
        match translator.translate(text, lang).await {
            Ok(translated) => return Ok(translated),
            Err(err) if attempt >= attempts => {
                return Err(PipelineError::ChunkTranslationFailure {
                    attempts,
                    message: format!("{err:#}"),
                });
            }
            Err(err) => {
                tracing::debug!(attempt, error = %format!("{err:#}"), "chunk translation attempt failed; retrying");
                tokio::time::sleep(options.retry_delay).await;
                attempt += 1;
            }
        }
    }
}

fn scaled_percent(done: usize, total: usize) -> usize {
    if total == 0 {
        return TRANSLATION_PROGRESS_SPAN;
    }
    ((done as u128 * TRANSLATION_PROGRESS_SPAN as u128) / total as u128)
        .min(TRANSLATION_PROGRESS_SPAN as u128) as usize
}

fn save(
    output: &Path,
    metadata: &DocumentMetadata,
    chapters: &[Chapter],
    lang: &str,
    source: &Path,
) -> anyhow::Result<()> {
    let identifier = output
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::InvalidSourcePath(source.to_path_buf()))?;

    epub::write_epub(
        output,
        &BookPackage {
            identifier,
            title: metadata.title.clone(),
            creator: metadata.creator.clone(),
            lang: lang.to_string(),
            cover: metadata.cover.as_ref(),
            chapters,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextTranslator for Flaky {
        async fn translate(&self, text: &str, _target: &str) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("service unavailable (call {call})");
            }
            Ok(text.to_uppercase())
        }
    }

    #[test]
    fn output_uses_primary_language_code() -> anyhow::Result<()> {
        let lang = translator::target_code("pt-BR");
        assert_eq!(
            translated_output_path(Path::new("/b/Roman.epub"), lang)?,
            PathBuf::from("/b/Roman_pt.epub")
        );
        Ok(())
    }

    #[test]
    fn translation_progress_stops_at_ninety() {
        assert_eq!(scaled_percent(0, 1000), 0);
        assert_eq!(scaled_percent(500, 1000), 45);
        assert_eq!(scaled_percent(1000, 1000), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_success_is_used() -> anyhow::Result<()> {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let started = tokio::time::Instant::now();
        let out = translate_with_retry(&flaky, "salut", "en", &TranslateOptions::new("en")).await?;
        assert_eq!(out, "SALUT");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_attempts() {
        let flaky = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = translate_with_retry(&flaky, "salut", "en", &TranslateOptions::new("en"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ChunkTranslationFailure { attempts: 3, .. }
        ));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
