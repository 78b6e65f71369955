#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use audiolivre::tts::{SpeechEvent, SpeechStream, SpeechSynthesizer, SynthesisSettings};
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;

/// In-process speech service. Audio is the UTF-8 text itself, so segment
/// contents can be asserted directly.
#[derive(Default)]
pub struct ScriptedSpeech {
    /// Per-text latency; texts not listed answer immediately.
    pub delays: HashMap<String, Duration>,
    /// Emit one word boundary per whitespace word before the audio.
    pub word_boundaries: bool,
    /// Requests whose text contains this marker fail.
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedSpeech {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    async fn stream(
        &self,
        text: &str,
        _settings: &SynthesisSettings,
    ) -> anyhow::Result<SpeechStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker
            && text.contains(marker.as_str())
        {
            anyhow::bail!("synthesis refused");
        }

        let delay = self.delays.get(text).copied().unwrap_or_default();
        let words = if self.word_boundaries {
            text.split_whitespace().count()
        } else {
            0
        };
        let audio = text.as_bytes().to_vec();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for _ in 0..words {
                if tx.send(Ok(SpeechEvent::WordBoundary)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(SpeechEvent::Audio(audio))).await;
        });
        Ok(rx)
    }
}

/// `n` whitespace-separated words.
pub fn words(n: usize, word: &str) -> String {
    vec![word; n].join(" ")
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Encoder stand-in: copies the concat manifest to the output path
/// (argument 12 of the fixed command line).
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path) -> anyhow::Result<PathBuf> {
    write_script(
        dir,
        "ffmpeg",
        r#"[ "$1" = "-f" ] && [ "$2" = "concat" ] && [ "$8" = "aac" ] && [ "${10}" = "128k" ] || exit 9
cp "$6" "${12}""#,
    )
}

/// Encoder stand-in that writes a partial file and fails.
#[cfg(unix)]
pub fn failing_ffmpeg(dir: &Path) -> anyhow::Result<PathBuf> {
    write_script(
        dir,
        "ffmpeg-broken",
        r#"echo "files.txt: Invalid data found when processing input" >&2
printf 'partial' > "${12}"
exit 1"#,
    )
}

pub struct FixtureCover<'a> {
    pub name: &'a str,
    pub media_type: &'a str,
    pub content: &'a [u8],
}

/// Writes a minimal EPUB 2 package: documents go to `OEBPS/text/<id>.xhtml`
/// in the given manifest order, the cover (if any) is referenced through
/// `<meta name="cover">`.
pub fn write_epub_fixture(
    path: &Path,
    title: Option<&str>,
    creator: Option<&str>,
    cover: Option<&FixtureCover<'_>>,
    documents: &[(&str, &str)],
) -> anyhow::Result<()> {
    let mut opf = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
    );
    if let Some(title) = title {
        opf.push_str(&format!("    <dc:title>{title}</dc:title>\n"));
    }
    if let Some(creator) = creator {
        opf.push_str(&format!("    <dc:creator opf:role=\"aut\">{creator}</dc:creator>\n"));
    }
    if cover.is_some() {
        opf.push_str("    <meta name=\"cover\" content=\"cover-img\"/>\n");
    }
    opf.push_str("  </metadata>\n  <manifest>\n");
    for (id, _) in documents {
        opf.push_str(&format!(
            "    <item id=\"{id}\" href=\"text/{id}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
        ));
    }
    if let Some(cover) = cover {
        opf.push_str(&format!(
            "    <item id=\"cover-img\" href=\"images/{}\" media-type=\"{}\"/>\n",
            cover.name, cover.media_type
        ));
    }
    opf.push_str("  </manifest>\n  <spine>\n");
    for (id, _) in documents {
        opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
    }
    opf.push_str("  </spine>\n</package>\n");

    let mut zip = zip::ZipWriter::new(File::create(path)?);
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default();

    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;
    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
    )?;
    zip.start_file("OEBPS/content.opf", deflated)?;
    zip.write_all(opf.as_bytes())?;
    for (id, body) in documents {
        zip.start_file(format!("OEBPS/text/{id}.xhtml"), deflated)?;
        let doc = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{id}</title></head><body>{body}</body></html>"
        );
        zip.write_all(doc.as_bytes())?;
    }
    if let Some(cover) = cover {
        zip.start_file(format!("OEBPS/images/{}", cover.name), stored)?;
        zip.write_all(cover.content)?;
    }
    zip.finish()?;
    Ok(())
}

/// Stand-in for the `translate_a/single` endpoint. Replies with the query
/// text prefixed by `[<tl>] `; texts containing `refuse_marker` get a 503.
pub struct GoogleStub {
    pub base_url: String,
    pub refused: Arc<AtomicUsize>,
    pub hits: Arc<AtomicUsize>,
    shutdown_tx: Option<std::sync::mpsc::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl GoogleStub {
    pub fn spawn(refuse_marker: &str) -> anyhow::Result<Self> {
        let server = tiny_http::Server::http("127.0.0.1:0")
            .map_err(|err| anyhow::anyhow!("start translation stub: {err}"))?;
        let base_url = format!("http://{}", server.server_addr());
        let refuse_marker = refuse_marker.to_string();
        let refused = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let handle = {
            let refused = refused.clone();
            let hits = hits.clone();
            std::thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };
                    hits.fetch_add(1, Ordering::SeqCst);

                    let Ok(url) = reqwest::Url::parse(&format!("http://stub{}", request.url()))
                    else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("bad url").with_status_code(400),
                        );
                        continue;
                    };
                    if url.path() != "/translate_a/single" {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }
                    let param = |key: &str| {
                        url.query_pairs()
                            .find(|(k, _)| k == key)
                            .map(|(_, v)| v.into_owned())
                            .unwrap_or_default()
                    };
                    let q = param("q");
                    let tl = param("tl");

                    if q.contains(refuse_marker.as_str()) {
                        refused.fetch_add(1, Ordering::SeqCst);
                        let _ = request.respond(
                            tiny_http::Response::from_string("busy").with_status_code(503),
                        );
                        continue;
                    }

                    let body = serde_json::json!([
                        [[format!("[{tl}] {q}"), q, null, null, 1]],
                        null,
                        "en"
                    ]);
                    let _ = request.respond(
                        tiny_http::Response::from_string(body.to_string()).with_header(
                            tiny_http::Header::from_bytes("Content-Type", "application/json")
                                .expect("content-type header"),
                        ),
                    );
                }
            })
        };

        Ok(Self {
            base_url,
            refused,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for GoogleStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
