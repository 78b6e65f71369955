use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context as _;
use epub::doc::EpubDoc;

use crate::formats::{CoverImage, DocumentMetadata};
use crate::markup;

/// An opened EPUB, read through the `epub` crate.
pub struct EpubArchive {
    doc: EpubDoc<BufReader<File>>,
}

/// One XHTML content document, in reading order.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    /// Archive path of the document.
    pub path: String,
    pub html: String,
}

impl EpubArchive {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let doc = EpubDoc::new(path).with_context(|| format!("open epub: {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            spine = doc.spine.len(),
            resources = doc.resources.len(),
            "opened epub"
        );
        Ok(Self { doc })
    }

    /// XHTML documents in spine order. Navigation documents and spine
    /// entries without a manifest item are skipped.
    pub fn documents(&mut self) -> anyhow::Result<Vec<ContentDocument>> {
        let ids = self
            .doc
            .spine
            .iter()
            .cloned()
            .collect::<Vec<_>>();

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((path, media_type)) = self.doc.resources.get(&id).cloned() else {
                tracing::warn!(idref = %id, "spine entry has no manifest item");
                continue;
            };
            if !is_html(&media_type) {
                continue;
            }
            let (bytes, _) = self
                .doc
                .get_resource(&id)
                .with_context(|| format!("read epub document: {}", path.display()))?;
            let html = String::from_utf8_lossy(&bytes).into_owned();
            if markup::is_navigation_document(&html) {
                tracing::debug!(path = %path.display(), "skip navigation document");
                continue;
            }
            documents.push(ContentDocument {
                path: path.display().to_string(),
                html,
            });
        }
        Ok(documents)
    }

    /// Title, creator and cover. The cover is the item named by the package
    /// metadata when present, else the first image whose path contains
    /// "cover".
    pub fn metadata(&mut self) -> anyhow::Result<DocumentMetadata> {
        let defaults = DocumentMetadata::default();

        let cover_id = self
            .doc
            .get_cover_id()
            .filter(|id| self.doc.resources.contains_key(id))
            .or_else(|| self.cover_by_name());
        let cover = match cover_id {
            Some(id) => {
                let path = self
                    .doc
                    .resources
                    .get(&id)
                    .map(|(path, _)| path.clone())
                    .unwrap_or_default();
                let (content, media_type) = self
                    .doc
                    .get_resource(&id)
                    .with_context(|| format!("read cover image: {}", path.display()))?;
                Some(CoverImage {
                    name: file_name(&path, &id),
                    content,
                    media_type,
                })
            }
            None => None,
        };

        Ok(DocumentMetadata {
            title: self.text_metadata("title").unwrap_or(defaults.title),
            creator: self.text_metadata("creator").unwrap_or(defaults.creator),
            cover,
        })
    }

    fn text_metadata(&self, name: &str) -> Option<String> {
        self.doc
            .mdata(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn cover_by_name(&self) -> Option<String> {
        self.doc
            .resources
            .iter()
            .filter(|(_, (path, media_type))| {
                media_type.starts_with("image/")
                    && path
                        .to_string_lossy()
                        .to_ascii_lowercase()
                        .contains("cover")
            })
            .min_by(|(_, (a, _)), (_, (b, _))| a.cmp(b))
            .map(|(id, _)| id.clone())
    }
}

fn is_html(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}
