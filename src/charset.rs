//! Response body decoding. The parser only ever sees UTF-8.
//!
//! Order: byte-order mark, `Content-Type` charset, `<meta>` charset within
//! the first few KiB, then UTF-8 if the body is valid UTF-8, else the
//! configured fallback.

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::sync::LazyLock;

/// How far into the body a `<meta>` declaration is looked for.
const SNIFF_BYTES: usize = 4096;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).expect("static regex")
});

pub fn encoding_for(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, v)| encoding_for(v.trim().trim_matches('"')))
}

fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(SNIFF_BYTES)];
    let label = META_CHARSET.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Pick the body's encoding without decoding it.
pub fn sniff(
    content_type: Option<&str>,
    body: &[u8],
    fallback: &'static Encoding,
) -> &'static Encoding {
    if let Some((enc, _)) = Encoding::for_bom(body) {
        return enc;
    }
    if let Some(enc) = content_type.and_then(header_charset) {
        return enc;
    }
    if let Some(enc) = meta_charset(body) {
        return enc;
    }
    if std::str::from_utf8(body).is_ok() {
        UTF_8
    } else {
        fallback
    }
}
