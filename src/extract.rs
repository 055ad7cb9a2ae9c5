//! Candidate extraction from search-result markup.
//!
//! The origin encodes result links two ways on the same page (inline event
//! handlers and plain anchors), so extraction is a table of independent
//! strategies whose results are unioned. A new markup pattern is one more
//! entry in `STRATEGIES`.

use crate::config::SiteConfig;
use crate::model::{IdField, PropertyIdentifier};
use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use url::Url;

static ANY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("*").expect("static selector"));
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// What a detail-page reference looks like on this site.
pub struct LinkPattern {
    base: Url,
    detail: Url,
    number_field: String,
    lot_number_field: String,
    handler_ref: Regex,
}

impl LinkPattern {
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let base = Url::parse(&site.base_url).context("site.base_url")?;
        let detail = base.join(&site.detail_path).context("site.detail_path")?;
        let detail_file = detail.path().rsplit('/').next().unwrap_or_default();
        // whole reference token, quotes and call parens excluded
        let handler_ref = Regex::new(&format!(
            r#"[^'"\s()=,]*{}\?[^'"\s)]+"#,
            regex::escape(detail_file)
        ))
        .context("event handler pattern")?;
        Ok(Self {
            base,
            detail,
            number_field: site.number_field.clone(),
            lot_number_field: site.lot_number_field.clone(),
            handler_ref,
        })
    }

    fn field(&self, name: &str) -> Option<IdField> {
        if name == self.number_field {
            Some(IdField::Number)
        } else if name == self.lot_number_field {
            Some(IdField::LotNumber)
        } else {
            None
        }
    }

    /// Identifier carried by a reference that resolves to the detail page
    /// itself; other paths that merely end in the same file name do not count.
    fn identifier_in_reference(&self, reference: &str) -> Option<PropertyIdentifier> {
        let url = self.base.join(reference.trim()).ok()?;
        if url.host_str() != self.detail.host_str() || url.path() != self.detail.path() {
            return None;
        }
        self.identifier_in_query(url.query()?, reference)
    }

    /// First recognised `field=token` pair of a query string.
    fn identifier_in_query(&self, query: &str, reference: &str) -> Option<PropertyIdentifier> {
        url::form_urlencoded::parse(query.as_bytes()).find_map(|(k, v)| {
            let field = self.field(&k)?;
            let token = v.trim();
            (!token.is_empty()).then(|| PropertyIdentifier::new(token, field, reference))
        })
    }
}

pub type Strategy = fn(&Html, &LinkPattern) -> BTreeSet<PropertyIdentifier>;

pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("event_handler", from_event_handlers),
    ("anchor", from_anchors),
];

/// Union of every strategy's identifiers; a token found twice counts once.
pub fn extract_candidates(doc: &Html, pattern: &LinkPattern) -> BTreeSet<PropertyIdentifier> {
    let mut out = BTreeSet::new();
    for (_, strategy) in STRATEGIES {
        out.extend(strategy(doc, pattern));
    }
    out
}

/// `onclick="location.href='d.php?hpno=12345'"` and friends.
pub fn from_event_handlers(doc: &Html, pattern: &LinkPattern) -> BTreeSet<PropertyIdentifier> {
    let mut out = BTreeSet::new();
    for el in doc.select(&ANY) {
        for (name, value) in el.value().attrs() {
            if !name.to_ascii_lowercase().starts_with("on") {
                continue;
            }
            for m in pattern.handler_ref.find_iter(value) {
                let reference = m.as_str().replace("&amp;", "&");
                if let Some(id) = pattern.identifier_in_reference(&reference) {
                    out.insert(id);
                }
            }
        }
    }
    out
}

/// `<a href="d.php?hpno=SMB240H">`, relative or absolute.
pub fn from_anchors(doc: &Html, pattern: &LinkPattern) -> BTreeSet<PropertyIdentifier> {
    let mut out = BTreeSet::new();
    for a in doc.select(&ANCHORS) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if let Some(id) = pattern.identifier_in_reference(href) {
            out.insert(id);
        }
    }
    out
}
