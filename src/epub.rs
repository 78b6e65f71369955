use std::fs::{self, File};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::formats::{Chapter, CoverImage};
use crate::markup::xml_escape;

/// Everything needed to package a book.
#[derive(Debug, Clone)]
pub struct BookPackage<'a> {
    pub identifier: String,
    pub title: String,
    pub creator: String,
    /// Language tag written to metadata and every XHTML document.
    pub lang: String,
    pub cover: Option<&'a CoverImage>,
    pub chapters: &'a [Chapter],
}

/// Writes an EPUB 3 package (with an NCX for EPUB 2 readers), replacing
/// `out_path` if it exists.
pub fn write_epub(out_path: &Path, book: &BookPackage<'_>) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create epub parent dir: {}", parent.display()))?;
    }

    let lang = book.lang.trim();
    let lang = if lang.is_empty() { "und" } else { lang };

    let chapters = book
        .chapters
        .iter()
        .enumerate()
        .map(|(idx, chapter)| ChapterDoc {
            stem: format!("chap_{}", idx + 1),
            title: chapter.title.clone(),
            body: render_chapter_body(chapter),
        })
        .collect::<Vec<_>>();
    let cover = book.cover.map(|cover| CoverDoc {
        href: cover_href(cover),
        media_type: cover.media_type.as_str(),
        content: cover.content.as_slice(),
    });

    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let nav_xhtml = render_nav_xhtml(&book.title, lang, &chapters);
    let toc_ncx = render_toc_ncx(&book.title, &book.identifier, &chapters);
    let content_opf = render_content_opf(book, lang, &modified, &chapters, cover.as_ref());

    let out_file = File::create(out_path)
        .with_context(|| format!("open epub output: {}", out_path.display()))?;
    let mut zip = zip::ZipWriter::new(out_file);

    // `mimetype` must be the first entry and must be stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(b"application/epub+zip")
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let entries = [
        ("META-INF/container.xml", CONTAINER_XML),
        ("OEBPS/content.opf", content_opf.as_str()),
        ("OEBPS/nav.xhtml", nav_xhtml.as_str()),
        ("OEBPS/toc.ncx", toc_ncx.as_str()),
        ("OEBPS/style.css", STYLE_CSS),
    ];
    for (name, body) in entries {
        zip.start_file(name, deflated_options)
            .with_context(|| format!("epub start_file {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("epub write {name}"))?;
    }

    for chapter in &chapters {
        let xhtml = chapter_xhtml(chapter, lang);
        zip.start_file(format!("OEBPS/{}.xhtml", chapter.stem), deflated_options)
            .with_context(|| format!("epub start_file chapter: {}", chapter.stem))?;
        zip.write_all(xhtml.as_bytes())
            .with_context(|| format!("epub write chapter: {}", chapter.stem))?;
    }

    if let Some(cover) = &cover {
        zip.start_file(format!("OEBPS/{}", cover.href), deflated_options)
            .with_context(|| format!("epub start_file cover: {}", cover.href))?;
        zip.write_all(cover.content)
            .with_context(|| format!("epub write cover: {}", cover.href))?;
    }

    zip.finish().context("epub finish zip")?;
    Ok(())
}

/// The cover is stored as `images/cover.<ext>` whatever its source name, so
/// the href never needs escaping.
fn cover_href(cover: &CoverImage) -> String {
    let from_name = Path::new(&cover.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    let ext = from_name.unwrap_or_else(|| {
        match cover.media_type.as_str() {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            _ => "img",
        }
        .to_string()
    });
    format!("images/cover.{ext}")
}

#[derive(Debug)]
struct ChapterDoc {
    stem: String,
    title: String,
    body: String,
}

#[derive(Debug)]
struct CoverDoc<'a> {
    href: String,
    media_type: &'a str,
    content: &'a [u8],
}

/// `<h1>` with the title, then one `<p>` per non-empty line.
fn render_chapter_body(chapter: &Chapter) -> String {
    let mut out = format!("<h1>{}</h1>\n", xml_escape(&chapter.title));
    for line in chapter.text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let _ = writeln!(out, "<p>{}</p>", xml_escape(line));
    }
    out
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLE_CSS: &str = r#"@charset "utf-8";

body { font-family: Georgia, serif; margin: 0 1em; line-height: 1.5; }
h1 { font-size: 1.4em; margin: 1.5em 0 1em; }
p { margin: 0 0 0.8em; text-align: justify; }
"#;

/// Opens an XHTML document up to and including `<body>`.
fn open_xhtml(out: &mut String, title: &str, lang: &str, with_epub_ns: bool) {
    let lang = xml_escape(lang);
    let epub_ns = if with_epub_ns {
        r#" xmlns:epub="http://www.idpf.org/2007/ops""#
    } else {
        ""
    };
    let _ = write!(
        out,
        concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n",
            "<html xmlns=\"http://www.w3.org/1999/xhtml\"{ns} lang=\"{lang}\" xml:lang=\"{lang}\">\n",
            "<head>\n  <title>{title}</title>\n  <meta charset=\"utf-8\" />\n",
            "  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n</head>\n<body>\n",
        ),
        ns = epub_ns,
        lang = lang,
        title = xml_escape(title),
    );
}

fn close_xhtml(out: &mut String) {
    out.push_str("</body>\n</html>\n");
}

fn chapter_xhtml(chapter: &ChapterDoc, lang: &str) -> String {
    let mut out = String::new();
    open_xhtml(&mut out, &chapter.title, lang, false);
    out.push_str(&chapter.body);
    close_xhtml(&mut out);
    out
}

fn render_nav_xhtml(title: &str, lang: &str, chapters: &[ChapterDoc]) -> String {
    let mut out = String::new();
    open_xhtml(&mut out, title, lang, true);
    let _ = writeln!(out, "  <h1>{}</h1>", xml_escape(title));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n    <ol>\n");
    for chapter in chapters {
        let _ = writeln!(
            out,
            "      <li><a href=\"{}.xhtml\">{}</a></li>",
            chapter.stem,
            xml_escape(&chapter.title)
        );
    }
    out.push_str("    </ol>\n  </nav>\n");
    close_xhtml(&mut out);
    out
}

/// NCX navigation for EPUB 2 reading systems.
fn render_toc_ncx(title: &str, identifier: &str, chapters: &[ChapterDoc]) -> String {
    let mut out = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
        "<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n",
    ));
    let _ = write!(
        out,
        "  <head>\n    <meta name=\"dtb:uid\" content=\"{}\" />\n    <meta name=\"dtb:depth\" content=\"1\" />\n  </head>\n",
        xml_escape(identifier)
    );
    let _ = writeln!(out, "  <docTitle><text>{}</text></docTitle>", xml_escape(title));
    out.push_str("  <navMap>\n");
    for (order, chapter) in (1..).zip(chapters) {
        let _ = write!(
            out,
            concat!(
                "    <navPoint id=\"np-{order}\" playOrder=\"{order}\">\n",
                "      <navLabel><text>{label}</text></navLabel>\n",
                "      <content src=\"{stem}.xhtml\" />\n",
                "    </navPoint>\n",
            ),
            order = order,
            label = xml_escape(&chapter.title),
            stem = chapter.stem,
        );
    }
    out.push_str("  </navMap>\n</ncx>\n");
    out
}

/// Package document. The cover is referenced both ways: EPUB 2
/// `<meta name="cover">` and EPUB 3 `properties="cover-image"`.
fn render_content_opf(
    book: &BookPackage<'_>,
    lang: &str,
    modified: &str,
    chapters: &[ChapterDoc],
    cover: Option<&CoverDoc<'_>>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">",
        xml_escape(lang)
    );

    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    let dc = [
        ("identifier id=\"bookid\"", "identifier", book.identifier.as_str()),
        ("title", "title", book.title.as_str()),
        ("creator", "creator", book.creator.as_str()),
        ("language", "language", lang),
    ];
    for (open, close, value) in dc {
        let _ = writeln!(out, "    <dc:{open}>{}</dc:{close}>", xml_escape(value));
    }
    let _ = writeln!(out, "    <meta property=\"dcterms:modified\">{modified}</meta>");
    if cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str("  </metadata>\n");

    out.push_str(concat!(
        "  <manifest>\n",
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
        "    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n",
    ));
    for chapter in chapters {
        let _ = writeln!(
            out,
            "    <item id=\"{0}\" href=\"{0}.xhtml\" media-type=\"application/xhtml+xml\" />",
            chapter.stem
        );
    }
    if let Some(cover) = cover {
        let _ = writeln!(
            out,
            "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\" />",
            xml_escape(&cover.href),
            xml_escape(cover.media_type)
        );
    }
    out.push_str("  </manifest>\n");

    out.push_str("  <spine toc=\"ncx\">\n    <itemref idref=\"nav\" />\n");
    for chapter in chapters {
        let _ = writeln!(out, "    <itemref idref=\"{}\" />", chapter.stem);
    }
    out.push_str("  </spine>\n</package>\n");
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use super::*;

    #[test]
    fn chapter_body_has_one_paragraph_per_line() {
        let chapter = Chapter::new("A & B", "first line\n\n   \n second <line> \n");
        assert_eq!(
            render_chapter_body(&chapter),
            "<h1>A &amp; B</h1>\n<p>first line</p>\n<p>second &lt;line&gt;</p>\n"
        );
    }

    #[test]
    fn written_package_starts_with_stored_mimetype_and_keeps_cover() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let out = temp.path().join("book_fr.epub");
        let cover = CoverImage {
            name: "Front Cover (1).JPG".to_string(),
            content: vec![0xff, 0xd8, 0xff],
            media_type: "image/jpeg".to_string(),
        };
        let chapters = vec![Chapter::new("Un", "Bonjour.\nÇa va ?")];
        write_epub(
            &out,
            &BookPackage {
                identifier: "book_fr".to_string(),
                title: "Le Livre".to_string(),
                creator: "Ann".to_string(),
                lang: "fr".to_string(),
                cover: Some(&cover),
                chapters: &chapters,
            },
        )?;

        let mut zip = zip::ZipArchive::new(File::open(&out)?)?;
        {
            let first = zip.by_index(0)?;
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), zip::CompressionMethod::Stored);
        }

        let mut opf = String::new();
        zip.by_name("OEBPS/content.opf")?.read_to_string(&mut opf)?;
        assert!(opf.contains("<dc:identifier id=\"bookid\">book_fr</dc:identifier>"));
        assert!(opf.contains("<dc:creator>Ann</dc:creator>"));
        assert!(opf.contains("href=\"images/cover.jpg\""));
        assert!(opf.contains("properties=\"cover-image\""));

        let mut image = Vec::new();
        zip.by_name("OEBPS/images/cover.jpg")?.read_to_end(&mut image)?;
        assert_eq!(image, cover.content);

        let mut chapter = String::new();
        zip.by_name("OEBPS/chap_1.xhtml")?.read_to_string(&mut chapter)?;
        assert!(chapter.contains("<p>Ça va ?</p>"));
        Ok(())
    }

    #[test]
    fn cover_href_falls_back_to_the_media_type() {
        let cover = |name: &str, media_type: &str| CoverImage {
            name: name.to_string(),
            content: Vec::new(),
            media_type: media_type.to_string(),
        };
        assert_eq!(cover_href(&cover("Cover", "image/png")), "images/cover.png");
        assert_eq!(cover_href(&cover("a.b%20c", "image/gif")), "images/cover.gif");
        assert_eq!(cover_href(&cover("", "application/octet-stream")), "images/cover.img");
    }
}
