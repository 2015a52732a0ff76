//! Media extraction from terminal assistant strings.
//!
//! `extract_and_store` persists embedded blobs into the chat's file
//! directory and rewrites the markers to `[STORED_FILE](<name>)` before the
//! response is saved; `split_media` pulls blobs out for chat-platform
//! delivery (photo/audio/document uploads).

use std::sync::OnceLock;

use base64::Engine;
use regex::{Captures, Regex};
use tracing::warn;

use guenther_store::FileStore;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
static AUDIO_RE: OnceLock<Regex> = OnceLock::new();
static HTML_RE: OnceLock<Regex> = OnceLock::new();
static PDF_RE: OnceLock<Regex> = OnceLock::new();
static PPTX_RE: OnceLock<Regex> = OnceLock::new();
static LOCAL_RE: OnceLock<Regex> = OnceLock::new();

fn image_re() -> &'static Regex {
    re(&IMAGE_RE, r"!\[[^\]]*\]\((data:image/[^)]+)\)")
}
fn audio_re() -> &'static Regex {
    re(&AUDIO_RE, r"!\[audio\]\((data:audio/[^)]+)\)")
}
fn html_re() -> &'static Regex {
    re(&HTML_RE, r"\[HTML_REPORT\]\((data:text/html;base64,[^)]+)\)")
}
fn pdf_re() -> &'static Regex {
    re(&PDF_RE, r"\[PDF_REPORT\]\((data:text/html;base64,[^)]+)\)")
}
fn pptx_re() -> &'static Regex {
    re(&PPTX_RE, r"\[PPTX_DOWNLOAD\]\(([^:)]+)::([A-Za-z0-9+/=\n]+)\)")
}
fn local_re() -> &'static Regex {
    re(&LOCAL_RE, r"\[LOCAL_FILE\]\(([^)]+)\)")
}

fn decode_data_uri(uri: &str) -> Option<(Vec<u8>, String)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("").to_string();
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned).ok()?;
    Some((bytes, mime))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" => "wav",
        "text/html" => "html",
        _ => "bin",
    }
}

/// Persist every embedded blob of `response` into the chat's file
/// directory and replace the markers with `[STORED_FILE](<name>)`.
/// Undecodable markers are left untouched.
pub fn extract_and_store(response: &str, chat_id: i64, files: &FileStore) -> String {
    let mut counter = 0usize;

    // ![alt](data:image/…) and ![audio](data:audio/…) — inline media.
    let response = image_re()
        .replace_all(response, |caps: &Captures| {
            store_blob(files, chat_id, caps, "image", true, &mut counter)
        })
        .to_string();
    let response = audio_re()
        .replace_all(&response, |caps: &Captures| {
            store_blob(files, chat_id, caps, "audio", true, &mut counter)
        })
        .to_string();

    // [HTML_REPORT] / [PDF_REPORT] — inline HTML documents. The PDF variant
    // keeps its HTML source; conversion happens out-of-band at delivery.
    let response = html_re()
        .replace_all(&response, |caps: &Captures| {
            store_blob(files, chat_id, caps, "report", false, &mut counter)
        })
        .to_string();
    let response = pdf_re()
        .replace_all(&response, |caps: &Captures| {
            store_blob(files, chat_id, caps, "report_pdf", false, &mut counter)
        })
        .to_string();

    // [PPTX_DOWNLOAD](filename::base64)
    let response = pptx_re()
        .replace_all(&response, |caps: &Captures| {
            let filename = caps[1].to_string();
            let cleaned: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
            match base64::engine::general_purpose::STANDARD.decode(cleaned) {
                Ok(bytes) => match files.save_file(chat_id, &filename, &bytes) {
                    Ok(()) => format!("[STORED_FILE]({filename})"),
                    Err(_) => caps[0].to_string(),
                },
                Err(e) => {
                    warn!(chat_id, error = %e, "could not decode PPTX marker");
                    caps[0].to_string()
                }
            }
        })
        .to_string();

    // [LOCAL_FILE](/abs/path) — file already on disk, e.g. from a tool.
    let response = local_re()
        .replace_all(&response, |caps: &Captures| {
            let path = caps[1].to_string();
            let filename = path
                .rsplit('/')
                .next()
                .unwrap_or(&path)
                .to_string();
            match std::fs::read(&path) {
                Ok(bytes) => match files.save_file(chat_id, &filename, &bytes) {
                    Ok(()) => format!("[STORED_FILE]({filename})"),
                    Err(_) => caps[0].to_string(),
                },
                Err(e) => {
                    warn!(chat_id, %path, error = %e, "local file unreadable");
                    caps[0].to_string()
                }
            }
        })
        .to_string();

    response
}

/// Persist one data-URI capture into the chat's file directory and return
/// the replacement marker. `mime_extension` picks the file suffix from the
/// URI's MIME type; reports are always stored as `.html`.
fn store_blob(
    files: &FileStore,
    chat_id: i64,
    caps: &Captures,
    prefix: &str,
    mime_extension: bool,
    counter: &mut usize,
) -> String {
    let Some((bytes, mime)) = decode_data_uri(&caps[1]) else {
        warn!(chat_id, "could not decode media marker");
        return caps[0].to_string();
    };
    *counter += 1;
    let ext = if mime_extension { extension_for(&mime) } else { "html" };
    let name = format!("{prefix}_{counter}.{ext}");
    match files.save_file(chat_id, &name, &bytes) {
        Ok(()) => format!("[STORED_FILE]({name})"),
        Err(e) => {
            warn!(chat_id, error = %e, "artifact write failed");
            caps[0].to_string()
        }
    }
}

/// Everything the gateway needs to fan a reply out as typed uploads.
#[derive(Debug, Default)]
pub struct MediaParts {
    pub text: String,
    pub images: Vec<Vec<u8>>,
    pub audio: Vec<Vec<u8>>,
    /// Decoded HTML sources for out-of-band PDF conversion.
    pub pdf_html: Vec<String>,
    pub pptx: Vec<(String, Vec<u8>)>,
}

/// Split the terminal assistant string into plain text plus media blobs.
/// `[HTML_REPORT]` markers are stripped (the web UI renders them; chat
/// platforms get the PDF variant instead).
pub fn split_media(response: &str) -> MediaParts {
    let mut parts = MediaParts::default();

    let text = image_re()
        .replace_all(response, |caps: &Captures| {
            if let Some((bytes, _)) = decode_data_uri(&caps[1]) {
                parts.images.push(bytes);
            } else {
                warn!("could not decode base64 image");
            }
            ""
        })
        .to_string();

    let text = audio_re()
        .replace_all(&text, |caps: &Captures| {
            if let Some((bytes, _)) = decode_data_uri(&caps[1]) {
                parts.audio.push(bytes);
            } else {
                warn!("could not decode base64 audio");
            }
            ""
        })
        .to_string();

    let text = pdf_re()
        .replace_all(&text, |caps: &Captures| {
            if let Some((bytes, _)) = decode_data_uri(&caps[1]) {
                match String::from_utf8(bytes) {
                    Ok(html) => parts.pdf_html.push(html),
                    Err(_) => warn!("PDF report source is not UTF-8"),
                }
            }
            ""
        })
        .to_string();

    let text = html_re().replace_all(&text, "").to_string();

    let text = pptx_re()
        .replace_all(&text, |caps: &Captures| {
            let cleaned: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
            match base64::engine::general_purpose::STANDARD.decode(cleaned) {
                Ok(bytes) => parts.pptx.push((caps[1].to_string(), bytes)),
                Err(e) => warn!(error = %e, "could not decode base64 PPTX"),
            }
            ""
        })
        .to_string();

    parts.text = text.trim().to_string();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn split_pulls_all_media_kinds() {
        let response = format!(
            "Bitteschön!\n\n![Generiertes Bild](data:image/png;base64,{})\n\n![audio](data:audio/mpeg;base64,{})\n\n[PPTX_DOWNLOAD](deck.pptx::{})\n\n[HTML_REPORT](data:text/html;base64,{})",
            b64(b"img"),
            b64(b"snd"),
            b64(b"ppt"),
            b64(b"<h1>r</h1>"),
        );
        let parts = split_media(&response);
        assert_eq!(parts.text, "Bitteschön!");
        assert_eq!(parts.images, vec![b"img".to_vec()]);
        assert_eq!(parts.audio, vec![b"snd".to_vec()]);
        assert_eq!(parts.pptx, vec![("deck.pptx".to_string(), b"ppt".to_vec())]);
        assert!(parts.pdf_html.is_empty());
    }

    #[test]
    fn split_decodes_pdf_source_html() {
        let response = format!(
            "Report:\n\n[PDF_REPORT](data:text/html;base64,{})",
            b64(b"<h1>pdf me</h1>")
        );
        let parts = split_media(&response);
        assert_eq!(parts.pdf_html, vec!["<h1>pdf me</h1>".to_string()]);
        assert_eq!(parts.text, "Report:");
    }

    #[test]
    fn extract_and_store_rewrites_to_stored_file() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());

        let response = format!(
            "Fertig.\n\n![Generiertes Bild](data:image/png;base64,{})\n\n[PPTX_DOWNLOAD](deck.pptx::{})",
            b64(b"imagebytes"),
            b64(b"pptxbytes"),
        );
        let rewritten = extract_and_store(&response, 5, &files);

        assert!(rewritten.contains("[STORED_FILE](image_1.png)"));
        assert!(rewritten.contains("[STORED_FILE](deck.pptx)"));
        assert!(!rewritten.contains("data:image/png"));
        assert_eq!(files.get_file(5, "image_1.png").unwrap(), b"imagebytes");
        assert_eq!(files.get_file(5, "deck.pptx").unwrap(), b"pptxbytes");
    }

    #[test]
    fn extract_and_store_keeps_undecodable_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());

        let response = "kaputt: ![x](data:image/png;base64,!!notbase64!!)";
        let rewritten = extract_and_store(response, 1, &files);
        assert_eq!(rewritten, response);
        assert!(files.list_chat_files(1).is_empty());
    }

    #[test]
    fn extract_and_store_handles_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());

        let src = tmp.path().join("bericht.pdf");
        std::fs::write(&src, b"pdfbytes").unwrap();

        let response = format!("Hier: [LOCAL_FILE]({})", src.display());
        let rewritten = extract_and_store(&response, 2, &files);
        assert_eq!(rewritten, "Hier: [STORED_FILE](bericht.pdf)");
        assert_eq!(files.get_file(2, "bericht.pdf").unwrap(), b"pdfbytes");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());
        assert_eq!(extract_and_store("Hi!", 3, &files), "Hi!");

        let parts = split_media("nur Text");
        assert_eq!(parts.text, "nur Text");
        assert!(parts.images.is_empty() && parts.audio.is_empty() && parts.pptx.is_empty());
    }
}
