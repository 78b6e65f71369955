use std::path::Path;

use docx_rust::DocxFile;
use docx_rust::document::{BodyContent, ParagraphContent, RunContent};

use crate::epub_reader::EpubArchive;
use crate::error::PipelineError;
use crate::formats::{Chapter, DocumentMetadata};
use crate::markup::{self, Heading};

/// Title used for single-chapter formats.
pub const DOCUMENT_TITLE: &str = "Document";
const FALLBACK_CHAPTER_TITLE: &str = "Chapter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFormat {
    Epub,
    Pdf,
    Docx,
    PlainText,
    /// MOBI/AZW3: recognised but not readable without external tools.
    Legacy,
    Unsupported(String),
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        match ext.as_str() {
            ".epub" => Self::Epub,
            ".pdf" => Self::Pdf,
            ".docx" => Self::Docx,
            ".txt" | ".md" => Self::PlainText,
            ".mobi" | ".azw3" => Self::Legacy,
            _ => Self::Unsupported(ext),
        }
    }

    fn reader(&self) -> Result<&'static dyn ChapterReader, PipelineError> {
        match self {
            Self::Epub => Ok(&SPEECH_EPUB),
            Self::Pdf => Ok(&PdfReader),
            Self::Docx => Ok(&DocxReader),
            Self::PlainText => Ok(&PlainTextReader),
            Self::Legacy => Ok(&LegacyReader),
            Self::Unsupported(ext) => Err(PipelineError::UnsupportedFormat {
                extension: ext.clone(),
            }),
        }
    }
}

/// Format-specific chapter extraction.
pub trait ChapterReader: Sync {
    fn read_chapters(&self, path: &Path) -> Result<Vec<Chapter>, PipelineError>;
}

/// How content documents are flattened into chapter text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLayout {
    /// Joins adjacent text nodes.
    pub separator: &'static str,
    /// Documents whose stripped text is not longer than this are dropped.
    pub min_chars: usize,
}

impl TextLayout {
    pub const SPEECH: Self = Self {
        separator: " ",
        min_chars: 100,
    };
    /// Line-preserving so that repackaging can rebuild paragraphs.
    pub const TRANSLATION: Self = Self {
        separator: "\n",
        min_chars: 50,
    };
}

/// Extracts ordered chapters from any supported document.
pub fn extract_chapters(path: &Path) -> Result<Vec<Chapter>, PipelineError> {
    let format = DocumentFormat::from_path(path);
    tracing::debug!(path = %path.display(), ?format, "extract text");
    let chapters = format.reader()?.read_chapters(path)?;
    tracing::debug!(chapters = chapters.len(), "extraction complete");
    Ok(chapters)
}

/// EPUB-only extraction that also captures title, creator and cover.
pub fn extract_with_metadata(
    path: &Path,
) -> Result<(Vec<Chapter>, DocumentMetadata), PipelineError> {
    match DocumentFormat::from_path(path) {
        DocumentFormat::Epub => {}
        DocumentFormat::Unsupported(extension) => {
            return Err(PipelineError::UnsupportedFormat { extension });
        }
        other => {
            return Err(PipelineError::UnsupportedFormat {
                extension: format!("{other:?} (only EPUB can be translated)"),
            });
        }
    }

    let mut archive = EpubArchive::open(path).map_err(|err| epub_failure(&err))?;
    let metadata = archive.metadata().map_err(|err| epub_failure(&err))?;
    let chapters = epub_chapters(&mut archive, TextLayout::TRANSLATION)?;
    Ok((chapters, metadata))
}

struct EpubReader {
    layout: TextLayout,
}

const SPEECH_EPUB: EpubReader = EpubReader {
    layout: TextLayout::SPEECH,
};

impl ChapterReader for EpubReader {
    fn read_chapters(&self, path: &Path) -> Result<Vec<Chapter>, PipelineError> {
        let mut archive = EpubArchive::open(path).map_err(|err| epub_failure(&err))?;
        epub_chapters(&mut archive, self.layout)
    }
}

fn epub_chapters(
    archive: &mut EpubArchive,
    layout: TextLayout,
) -> Result<Vec<Chapter>, PipelineError> {
    let documents = archive.documents().map_err(|err| epub_failure(&err))?;

    let mut chapters = Vec::new();
    for document in documents {
        let text = markup::html_to_text(&document.html, layout.separator);
        let text = text.trim();
        if text.chars().count() <= layout.min_chars {
            tracing::debug!(item = %document.path, chars = text.chars().count(), "skip short document");
            continue;
        }
        chapters.push(Chapter::new(chapter_title(&document.html), text));
    }
    Ok(chapters)
}

/// First `h1`, else first `h2`, else a fixed label.
fn chapter_title(html: &str) -> String {
    markup::heading_text(html, Heading::H1)
        .or_else(|| markup::heading_text(html, Heading::H2))
        .unwrap_or_else(|| FALLBACK_CHAPTER_TITLE.to_string())
}

fn epub_failure(err: &anyhow::Error) -> PipelineError {
    PipelineError::extraction("EPUB", format!("{err:#}"))
}

/// Overrides the `pdftotext` executable used for PDF sources.
pub const PDFTOTEXT_ENV: &str = "AUDIOLIVRE_PDFTOTEXT";

/// PDF text comes from poppler's `pdftotext`, run as an external program.
struct PdfReader;

impl ChapterReader for PdfReader {
    fn read_chapters(&self, path: &Path) -> Result<Vec<Chapter>, PipelineError> {
        let program = std::env::var_os(PDFTOTEXT_ENV).unwrap_or_else(|| "pdftotext".into());
        let text = pdf_text(Path::new(&program), path)?;
        // No chapter detection: the chunker breaks the document up later.
        Ok(vec![Chapter::new(DOCUMENT_TITLE, text)])
    }
}

fn pdf_text(program: &Path, path: &Path) -> Result<String, PipelineError> {
    tracing::debug!(program = %program.display(), path = %path.display(), "run pdftotext");
    let output = std::process::Command::new(program)
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|err| {
            PipelineError::extraction("PDF", format!("run {}: {err}", program.display()))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::extraction(
            "PDF",
            format!("{} exited with {}: {}", program.display(), output.status, stderr.trim()),
        ));
    }
    // Form feeds separate pages.
    Ok(String::from_utf8_lossy(&output.stdout).replace('\x0c', "\n"))
}

struct DocxReader;

impl ChapterReader for DocxReader {
    fn read_chapters(&self, path: &Path) -> Result<Vec<Chapter>, PipelineError> {
        let file = DocxFile::from_file(path).map_err(|err| PipelineError::extraction("DOCX", err))?;
        let docx = file
            .parse()
            .map_err(|err| PipelineError::extraction("DOCX", err))?;

        let paragraphs = docx
            .document
            .body
            .content
            .iter()
            .filter_map(|content| match content {
                BodyContent::Paragraph(para) => Some(paragraph_text(para)),
                _ => None,
            })
            .collect::<Vec<_>>();

        Ok(vec![Chapter::new(DOCUMENT_TITLE, paragraphs.join("\n"))])
    }
}

fn paragraph_text(para: &docx_rust::document::Paragraph) -> String {
    let mut text = String::new();
    for content in &para.content {
        let ParagraphContent::Run(run) = content else {
            continue;
        };
        for rc in &run.content {
            match rc {
                RunContent::Text(t) => text.push_str(&t.text),
                RunContent::Break(_) => text.push('\n'),
                RunContent::Tab(_) => text.push('\t'),
                _ => {}
            }
        }
    }
    text
}

struct PlainTextReader;

impl ChapterReader for PlainTextReader {
    fn read_chapters(&self, path: &Path) -> Result<Vec<Chapter>, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| PipelineError::extraction("text", format!("{}: {err}", path.display())))?;
        Ok(vec![Chapter::new(DOCUMENT_TITLE, text)])
    }
}

struct LegacyReader;

impl ChapterReader for LegacyReader {
    fn read_chapters(&self, _path: &Path) -> Result<Vec<Chapter>, PipelineError> {
        Err(PipelineError::extraction(
            "MOBI/AZW3",
            "MOBI/AZW3 extraction requires external tools not yet integrated.",
        ))
    }
}
