use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::chunk::{self, SYNTHESIS_MAX_CHARS};
use crate::formats::{Chapter, Segment, WorkItem};
use crate::progress::{EventSink, percent};
use crate::tts::{SpeechEvent, SpeechSynthesizer, SynthesisSettings};

pub const DEFAULT_PARALLEL: usize = 3;
/// Intermediate progress is emitted once per this many word boundaries.
const WORD_BOUNDARY_STRIDE: usize = 50;

/// Turns chapters into work items whose target file names sort in creation
/// order. Chapters longer than the synthesis budget are split.
///
/// Chapter numbers are zero-padded to at least 3 digits and sub-chunk
/// numbers to at least 2, widened when the counts need more.
pub fn plan_work_items(chapters: &[Chapter], segment_dir: &Path) -> Vec<WorkItem> {
    let mut items = Vec::new();
    let cw = pad_width(chapters.len(), 3);

    for (i, chapter) in chapters.iter().enumerate() {
        let safe = safe_title(&chapter.title, i);

        if chapter.text.chars().count() <= SYNTHESIS_MAX_CHARS {
            items.push(WorkItem {
                title: chapter.title.clone(),
                text: chapter.text.clone(),
                target: segment_dir.join(format!("{:0cw$}_{safe}.mp3", i + 1)),
                chapter_index: i,
                word_count: chapter.word_count(),
            });
            continue;
        }

        let chunks = chunk::split_text_smart(&chapter.text, SYNTHESIS_MAX_CHARS);
        let n = chunks.len();
        let sw = pad_width(n, 2);
        for (j, text) in chunks.into_iter().enumerate() {
            let sub = j + 1;
            items.push(WorkItem {
                title: format!("{} ({sub}/{n})", chapter.title),
                target: segment_dir.join(format!(
                    "{:0cw$}_{sub:0sw$}_{safe}_{sub:0sw$}.mp3",
                    i + 1
                )),
                chapter_index: i,
                word_count: text.split_whitespace().count(),
                text,
            });
        }
    }

    items
}

fn pad_width(count: usize, min: usize) -> usize {
    count.max(1).to_string().len().max(min)
}

/// Denominator for progress: whitespace words of the unsplit chapters.
pub fn total_words(chapters: &[Chapter]) -> usize {
    chapters.iter().map(Chapter::word_count).sum()
}

/// File-name-safe form of a chapter title.
fn safe_title(title: &str, index: usize) -> String {
    let kept = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>();
    let kept = kept.trim();
    if kept.is_empty() {
        format!("Chapter_{}", index + 1)
    } else {
        kept.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Segments sorted by target path.
    Completed(Vec<Segment>),
    Cancelled,
}

#[derive(Debug, Default)]
struct ProgressState {
    words_done: usize,
    completed: usize,
    /// Highest word count emitted so far.
    reported: usize,
}

impl ProgressState {
    /// Raises the emitted high-water mark and returns it, so concurrent items
    /// never make reported progress go backwards.
    fn report(&mut self, candidate: usize, total: usize) -> usize {
        self.reported = self.reported.max(candidate.min(total));
        self.reported
    }
}

/// Shared, read-only context for every task of one batch.
struct BatchContext {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: SynthesisSettings,
    total_words: usize,
    progress: Mutex<ProgressState>,
    events: EventSink,
    cancel: CancellationToken,
}

/// Synthesizes every item with at most `parallel` in flight.
///
/// All items are submitted up front and queue on the admission gate. An item
/// admitted after cancellation does nothing; in-flight items drop their
/// result once cancellation is observed. The first failing item aborts the
/// remaining ones and its error is returned.
pub async fn synthesize_all(
    items: Vec<WorkItem>,
    total_words: usize,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: SynthesisSettings,
    parallel: usize,
    events: EventSink,
    cancel: CancellationToken,
) -> anyhow::Result<BatchOutcome> {
    let parallel = parallel.max(1);
    let total_items = items.len();
    tracing::info!(
        items = total_items,
        total_words,
        parallel,
        "synthesize segments"
    );

    let gate = Arc::new(Semaphore::new(parallel));
    let ctx = Arc::new(BatchContext {
        synthesizer,
        settings,
        total_words,
        progress: Mutex::new(ProgressState::default()),
        events,
        cancel,
    });

    let mut join_set = tokio::task::JoinSet::new();
    for item in items {
        let gate = Arc::clone(&gate);
        let ctx = Arc::clone(&ctx);
        join_set.spawn(async move {
            let _permit = gate
                .acquire_owned()
                .await
                .context("synthesis admission gate closed")?;
            if ctx.cancel.is_cancelled() {
                return anyhow::Ok(None);
            }
            process_item(&ctx, item).await
        });
    }

    let mut segments = Vec::with_capacity(total_items);
    while let Some(joined) = join_set.join_next().await {
        let result = joined
            .context("join synthesis task")
            .and_then(|result| result);
        match result {
            Ok(Some(segment)) => segments.push(segment),
            Ok(None) => {}
            Err(err) => {
                join_set.abort_all();
                while join_set.join_next().await.is_some() {}
                return Err(err);
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        tracing::info!(
            finished = segments.len(),
            items = total_items,
            "synthesis cancelled"
        );
        return Ok(BatchOutcome::Cancelled);
    }

    segments.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(BatchOutcome::Completed(segments))
}

async fn process_item(ctx: &BatchContext, item: WorkItem) -> anyhow::Result<Option<Segment>> {
    tracing::info!(title = %item.title, words = item.word_count, "generating segment");
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            tracing::debug!(title = %item.title, "discarding in-flight segment");
            return Ok(None);
        }
        result = synthesize_item(ctx, &item) => {
            result.with_context(|| format!("synthesize {}", item.title))?;
        }
    }

    // Counter update and emission happen under one lock so events leave in
    // counter order.
    let mut state = ctx.progress.lock();
    state.words_done += item.word_count;
    state.completed += 1;
    let words_done = state.words_done;
    let done = state.report(words_done, ctx.total_words);
    let pct = percent(done, ctx.total_words);
    ctx.events
        .progress(done, ctx.total_words, format!("TTS: {} ({pct}%)", item.title));
    ctx.events
        .status(format!("{done}/{} mots", ctx.total_words));
    tracing::debug!(
        title = %item.title,
        completed = state.completed,
        words_done,
        "segment done"
    );
    drop(state);

    Ok(Some(Segment {
        label: item.title,
        path: item.target,
    }))
}

async fn synthesize_item(ctx: &BatchContext, item: &WorkItem) -> anyhow::Result<()> {
    let mut stream = ctx.synthesizer.stream(&item.text, &ctx.settings).await?;
    let mut file = tokio::fs::File::create(&item.target)
        .await
        .with_context(|| format!("create segment: {}", item.target.display()))?;

    let mut boundaries = 0usize;
    while let Some(event) = stream.recv().await {
        match event? {
            SpeechEvent::Audio(bytes) => {
                file.write_all(&bytes)
                    .await
                    .with_context(|| format!("write segment: {}", item.target.display()))?;
            }
            SpeechEvent::WordBoundary => {
                boundaries += 1;
                if boundaries % WORD_BOUNDARY_STRIDE == 0 {
                    let mut state = ctx.progress.lock();
                    // Local words are capped at the item's own count.
                    let local = boundaries.min(item.word_count);
                    let candidate = state.words_done + local;
                    let current = state.report(candidate, ctx.total_words);
                    let pct = percent(current, ctx.total_words);
                    ctx.events.status(format!("{current}/{} mots", ctx.total_words));
                    ctx.events.progress(
                        current,
                        ctx.total_words,
                        format!("TTS: {} ({pct}%)", item.title),
                    );
                }
            }
        }
    }

    file.flush()
        .await
        .with_context(|| format!("flush segment: {}", item.target.display()))?;
    Ok(())
}
