use std::path::PathBuf;

use serde::Serialize;

/// One logical section of a source document, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub text: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Machine-readable result of `scan --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub chapters: Vec<ChapterSummary>,
    pub words: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterSummary {
    pub title: String,
    pub words: usize,
    pub chars: usize,
}

impl ScanReport {
    pub fn new(chapters: &[Chapter]) -> Self {
        let chapters = chapters
            .iter()
            .map(|chapter| ChapterSummary {
                title: chapter.title.clone(),
                words: chapter.word_count(),
                chars: chapter.text.chars().count(),
            })
            .collect::<Vec<_>>();
        let words = chapters.iter().map(|c| c.words).sum();
        Self { chapters, words }
    }
}

/// A chunk-sized unit of text handed to speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub title: String,
    pub text: String,
    /// Segment file; its name encodes (chapter, sub-chunk) so a lexical sort
    /// restores creation order.
    pub target: PathBuf,
    pub chapter_index: usize,
    pub word_count: usize,
}

/// A finished audio segment, ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// File name of the image inside the source archive (e.g. `cover.jpg`).
    pub name: String,
    pub content: Vec<u8>,
    pub media_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub creator: String,
    pub cover: Option<CoverImage>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            title: "Unknown Title".to_string(),
            creator: "Unknown Author".to_string(),
            cover: None,
        }
    }
}

/// A chapter going through translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub title: String,
    pub text: String,
    pub chunks: Vec<String>,
    pub translated_title: Option<String>,
    pub translated_chunks: Vec<String>,
}

impl TranslationUnit {
    pub fn new(chapter: Chapter, chunks: Vec<String>) -> Self {
        Self {
            title: chapter.title,
            text: chapter.text,
            translated_chunks: Vec::with_capacity(chunks.len()),
            chunks,
            translated_title: None,
        }
    }

    pub fn into_chapter(self) -> Chapter {
        Chapter {
            title: self.translated_title.unwrap_or(self.title),
            text: self.translated_chunks.join("\n"),
        }
    }
}
