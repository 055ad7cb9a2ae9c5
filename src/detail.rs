//! Detail-page parsing: one fetched page in, one `PropertyDetail` out.
//!
//! Nothing here rejects a listing. Missing title or price is recorded as
//! absent and left for the filter stages.

use crate::config::{Config, PriceRules};
use crate::markup::{self, clean_text, prefix_chars, squash, to_ascii_digits, visible_text};
use crate::model::{PropertyDetail, PropertyKind};
use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use url::Url;

static BODY: LazyLock<Selector> = LazyLock::new(|| sel("body"));
static H1: LazyLock<Selector> = LazyLock::new(|| sel("h1"));
static H2: LazyLock<Selector> = LazyLock::new(|| sel("h2"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static LABEL_CELLS: LazyLock<Selector> = LazyLock::new(|| sel("th, td, dt, dd, div, span"));
static STATUS_BADGES: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"[class*="status"], [class*="sold"], [class*="label"]"#));
static OG_IMAGE: LazyLock<Selector> = LazyLock::new(|| sel(r#"meta[property="og:image"]"#));
static MAIN_IMAGES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["#main_img", ".main_img", ".wp-post-image", ".item_img img", ".swiper-slide img"]
        .into_iter()
        .map(sel)
        .collect()
});
static IMG: LazyLock<Selector> = LazyLock::new(|| sel("img[src]"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

const LOCATION_LABELS: &[&str] = &["所在地", "住所", "物件所在地", "エリア", "Location"];
const STATUS_LABELS: &[&str] = &["取引状況", "現況", "状況", "ステータス", "Status"];
const TYPE_LABELS: &[&str] = &["物件種別", "物件種目", "種別", "種目", "Type"];
const YEAR_LABELS: &[&str] = &["築年月", "建築年", "築年"];

/// A label cell is short; longer cells are content that merely mentions the word.
const MAX_LABEL_CHARS: usize = 12;

/// Era name and the Gregorian year of its year 0.
const ERAS: &[(&str, i32)] = &[("昭和", 1925), ("平成", 1988), ("令和", 2018)];

pub struct DetailParser {
    price: PriceParser,
    era_year: Regex,
    western_year: Regex,
    year_in_text: Regex,
}

impl DetailParser {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            price: PriceParser::new(&cfg.price)?,
            era_year: Regex::new(r"(昭和|平成|令和)(\d{1,2}|元)年")?,
            western_year: Regex::new(r"(\d{4})年")?,
            year_in_text: Regex::new(r"築[年月\s:：]*(?:(昭和|平成|令和)(\d{1,2}|元)年|(\d{4})年)")?,
        })
    }

    pub fn parse(&self, identifier: &str, source_url: &str, doc: &Html) -> PropertyDetail {
        let body = doc.select(&BODY).next().unwrap_or_else(|| doc.root_element());
        let body_text = visible_text(body);

        let raw_title = doc
            .select(&H1)
            .map(visible_text)
            .find(|t| !t.is_empty())
            .or_else(|| {
                doc.select(&TITLE)
                    .next()
                    .map(|t| clean_text(t.text().collect::<String>().split('|').next().unwrap_or("")))
                    .filter(|t| !t.is_empty())
            });

        let raw_location_text = location_text(doc, &body_text);

        let mut status_parts: Vec<String> = raw_title.iter().cloned().collect();
        status_parts.extend(labelled_values(doc, STATUS_LABELS));
        status_parts.extend(
            doc.select(&STATUS_BADGES)
                .map(visible_text)
                .filter(|t| !t.is_empty() && t.chars().count() <= 40),
        );
        status_parts.push(prefix_chars(&body_text, 200).to_string());

        let type_markers: BTreeSet<String> =
            labelled_values(doc, TYPE_LABELS).into_iter().collect();

        let price = labelled_values(doc, &self.price.labels())
            .iter()
            .find_map(|v| self.price.parse(v))
            .or_else(|| self.price.parse(&body_text));

        let year_built = self.year_built(doc, &body_text);
        let image_url = best_image(doc, source_url);

        PropertyDetail {
            identifier: identifier.to_string(),
            source_url: source_url.to_string(),
            raw_title,
            raw_location_text,
            status_text: status_parts.join("\n"),
            price,
            type_markers,
            sea_view_signals: markup::text_fragments(body),
            image_url,
            year_built,
        }
    }

    fn year_built(&self, doc: &Html, body_text: &str) -> Option<i32> {
        let latest = time::OffsetDateTime::now_utc().year();
        let plausible = |y: i32| (1950..=latest).contains(&y).then_some(y);

        for value in labelled_values(doc, YEAR_LABELS) {
            let value = to_ascii_digits(&value);
            if let Some(c) = self.era_year.captures(&value) {
                if let Some(y) = era_to_year(&c[1], &c[2]) {
                    return Some(y);
                }
            }
            if let Some(y) = self
                .western_year
                .captures(&value)
                .and_then(|c| c[1].parse().ok())
                .and_then(plausible)
            {
                return Some(y);
            }
        }

        let text = to_ascii_digits(body_text);
        for c in self.year_in_text.captures_iter(&text) {
            if let Some(y) = c.get(3).and_then(|m| m.as_str().parse().ok()).and_then(plausible) {
                return Some(y);
            }
            if let (Some(era), Some(n)) = (c.get(1), c.get(2)) {
                if let Some(y) = era_to_year(era.as_str(), n.as_str()) {
                    return Some(y);
                }
            }
        }
        None
    }
}

fn era_to_year(era: &str, n: &str) -> Option<i32> {
    let offset = ERAS.iter().find(|(name, _)| *name == era)?.1;
    let n: i32 = if n == "元" { 1 } else { n.parse().ok()? };
    Some(offset + n)
}

fn names_label(cell: ElementRef<'_>, labels: &[&str]) -> bool {
    let text = squash(&visible_text(cell));
    text.chars().count() <= MAX_LABEL_CHARS && labels.iter().any(|l| text.contains(&squash(l)))
}

/// The innermost cell naming a label. A div row wrapping both label and value
/// names the label too, but its sibling is the next row, not the value.
fn is_label(cell: ElementRef<'_>, labels: &[&str]) -> bool {
    names_label(cell, labels) && !cell.select(&LABEL_CELLS).any(|inner| names_label(inner, labels))
}

fn next_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

/// Values of `label: value` pairs laid out as th/td, dt/dd or sibling cells.
fn labelled_values(doc: &Html, labels: &[&str]) -> Vec<String> {
    doc.select(&LABEL_CELLS)
        .filter(|cell| is_label(*cell, labels))
        .filter_map(next_element)
        .map(visible_text)
        .filter(|v| !v.is_empty())
        .collect()
}

/// Address rows (label, value and the whole row) when the page has them;
/// otherwise headings plus the start of the visible text.
fn location_text(doc: &Html, body_text: &str) -> String {
    let mut parts = Vec::new();
    for cell in doc.select(&LABEL_CELLS).filter(|c| is_label(*c, LOCATION_LABELS)) {
        if let Some(value) = next_element(cell) {
            parts.push(visible_text(value));
        }
        if let Some(row) = cell
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "tr")
        {
            parts.push(visible_text(row));
        }
    }
    parts.retain(|p| !p.is_empty());
    if !parts.is_empty() {
        return parts.join("\n");
    }

    parts.extend(doc.select(&H1).chain(doc.select(&H2)).map(visible_text));
    parts.push(prefix_chars(body_text, 1000).to_string());
    parts.retain(|p| !p.is_empty());
    parts.join("\n")
}

fn best_image(doc: &Html, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    let resolve = |src: &str| base.join(src).ok().map(|u| u.to_string());

    if let Some(url) = doc
        .select(&OG_IMAGE)
        .find_map(|m| m.value().attr("content"))
        .and_then(resolve)
    {
        return Some(url);
    }
    for s in MAIN_IMAGES.iter() {
        if let Some(url) = doc.select(s).find_map(|e| e.value().attr("src")).and_then(resolve) {
            return Some(url);
        }
    }
    doc.select(&IMG)
        .filter_map(|img| img.value().attr("src"))
        .find(|src| {
            let lower = src.to_lowercase();
            !["logo", "icon", "map"].iter().any(|k| lower.contains(k))
                && [".jpg", ".jpeg", ".png"].iter().any(|k| lower.contains(k))
        })
        .and_then(resolve)
}

pub fn property_kind(title: &str) -> PropertyKind {
    if title.contains("売地") || title.contains("土地") {
        PropertyKind::Land
    } else {
        PropertyKind::House
    }
}

// -------------------------
// Price
// -------------------------

/// Yen amounts written as `1億2800万`, `3,500万円` or `12,000,000円`.
pub struct PriceParser {
    rules: PriceRules,
    oku: Regex,
    man: Regex,
    yen: Regex,
}

impl PriceParser {
    pub fn new(rules: &PriceRules) -> Result<Self> {
        let oku = regex::escape(&rules.oku_unit);
        let man = regex::escape(&rules.man_unit);
        let yen = regex::escape(&rules.currency_suffix);
        Ok(Self {
            rules: rules.clone(),
            oku: Regex::new(&format!(r"(\d+(?:\.\d+)?){oku}(?:(\d+){man})?"))
                .context("price oku pattern")?,
            man: Regex::new(&format!(r"(\d+(?:\.\d+)?){man}")).context("price man pattern")?,
            yen: Regex::new(&format!(r"(\d+){yen}")).context("price yen pattern")?,
        })
    }

    fn labels(&self) -> Vec<&str> {
        self.rules.row_labels.iter().map(String::as_str).collect()
    }

    pub fn parse(&self, text: &str) -> Option<u64> {
        let t: String = squash(&to_ascii_digits(text))
            .chars()
            .filter(|c| *c != self.rules.thousands_separator)
            .collect();

        let yen = if let Some(c) = self.oku.captures(&t) {
            let oku: f64 = c[1].parse().ok()?;
            let man: f64 = c.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
            oku * 100_000_000.0 + man * 10_000.0
        } else if let Some(c) = self.man.captures(&t) {
            c[1].parse::<f64>().ok()? * 10_000.0
        } else if let Some(c) = self.yen.captures(&t) {
            c[1].parse::<f64>().ok()?
        } else {
            return None;
        };

        let yen = yen.round();
        (yen >= 1.0).then_some(yen as u64)
    }
}
