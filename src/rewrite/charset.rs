//! Character encodings of rewritten documents.
//!
//! Textual bodies are decoded before rewriting and encoded back afterwards, so
//! a page served in a legacy charset is rewritten like any UTF-8 page.
//!
//! Detection order: byte order mark, `Content-Type` charset, an in-document
//! declaration (`<meta charset>`, `@charset`), then UTF-8 if the bytes are valid
//! UTF-8 and windows-1252 otherwise.

use std::sync::LazyLock;

use encoding_rs::{Encoding, REPLACEMENT, UTF_8, WINDOWS_1252};
use regex::bytes::Regex;

use super::handler::ContentKind;

/// How far into a document an inline declaration is looked for.
const PRESCAN_BYTES: usize = 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*charset\s*=\s*["']?\s*([A-Za-z0-9_:.\-]+)"#)
        .expect("meta charset pattern is valid")
});

static CSS_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\A@charset\s+"([A-Za-z0-9_:.\-]+)"\s*;"#).expect("css charset pattern is valid")
});

/// A decoded document and the encoding it was read with.
#[derive(Debug)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static Encoding,
}

/// Encoding named by the `charset` parameter of a `Content-Type` value.
pub fn declared(content_type: Option<&str>) -> Option<&'static Encoding> {
    content_type?
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
        })
        .and_then(|label| Encoding::for_label(label.as_bytes()))
}

/// Encoding `body` should be read with.
pub fn detect(kind: ContentKind, declared: Option<&'static Encoding>, body: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    if let Some(encoding) = declared {
        return encoding;
    }

    let prescan = &body[..body.len().min(PRESCAN_BYTES)];
    let inline = match kind {
        ContentKind::Html => META_CHARSET.captures(prescan),
        ContentKind::Css => CSS_CHARSET.captures(prescan),
        ContentKind::Script | ContentKind::Other => None,
    }
    .and_then(|caps| Encoding::for_label(&caps[1]));
    if let Some(encoding) = inline {
        // A document claiming UTF-16 from inside is ASCII-compatible, so really UTF-8.
        return encoding.output_encoding();
    }

    if std::str::from_utf8(body).is_ok() {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

/// Decode `body`. `None` when its encoding cannot be decoded meaningfully
/// (the `replacement` encoding), in which case it must pass through untouched.
pub fn decode(kind: ContentKind, content_type: Option<&str>, body: &[u8]) -> Option<Decoded> {
    let encoding = detect(kind, declared(content_type), body);
    if encoding == REPLACEMENT {
        return None;
    }
    let (text, encoding, malformed) = encoding.decode(body);
    if malformed {
        tracing::debug!(encoding = encoding.name(), "Document has malformed sequences, decoded lossily");
    }
    Some(Decoded {
        text: text.into_owned(),
        encoding,
    })
}

/// Encode rewritten text back into `encoding`. Encodings that cannot be
/// written (UTF-16) fall back to UTF-8; the encoding actually used is returned.
pub fn encode(text: &str, encoding: &'static Encoding) -> (Vec<u8>, &'static Encoding) {
    let (bytes, used, _) = encoding.encode(text);
    (bytes.into_owned(), used)
}

/// `content_type` with its charset parameter replaced by `encoding`.
pub fn with_charset(content_type: &str, encoding: &'static Encoding) -> String {
    let mut parts = content_type.split(';');
    let mut out = parts.next().unwrap_or("").trim().to_string();
    for param in parts.map(str::trim) {
        let is_charset = param
            .split_once('=')
            .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case("charset"));
        if !param.is_empty() && !is_charset {
            out.push_str("; ");
            out.push_str(param);
        }
    }
    out.push_str("; charset=");
    out.push_str(encoding.name());
    out
}
