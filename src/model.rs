use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

// -------------------------
// Search space
// -------------------------

/// One search against the origin's parameterized listing endpoint.
/// `property_type == None` means the type parameter is omitted entirely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    pub city_code: String,
    pub property_type: Option<String>,
}

impl SearchQuery {
    pub fn new(city_code: impl Into<String>, property_type: Option<&str>) -> Self {
        Self {
            city_code: city_code.into(),
            property_type: property_type.map(str::to_string),
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_type {
            Some(t) => write!(f, "city={} type={}", self.city_code, t),
            None => write!(f, "city={} type=*", self.city_code),
        }
    }
}

// -------------------------
// Identifiers
// -------------------------

/// Which query-string field carried the identifier. Both share one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdField {
    /// Primary property number, e.g. `hpno=SMB392H`.
    Number,
    /// Secondary lot number, e.g. `hpbunno=...`.
    LotNumber,
}

/// A property token pulled out of markup.
///
/// Equality, ordering and hashing only look at `key` (the case-normalized
/// token), so the same property seen through either id field, or with a
/// different letter case, collapses to one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyIdentifier {
    pub key: String,
    /// Token exactly as it appeared, used when building the detail URL.
    pub value: String,
    pub field: IdField,
    /// Raw reference the token was parsed from (`d.php?hpno=SMB392H`).
    pub reference: String,
}

impl PropertyIdentifier {
    pub fn new(value: &str, field: IdField, reference: impl Into<String>) -> Self {
        let value = value.trim();
        Self {
            key: normalize_key(value),
            value: value.to_string(),
            field,
            reference: reference.into(),
        }
    }
}

pub fn normalize_key(token: &str) -> String {
    token.trim().to_uppercase()
}

impl PartialEq for PropertyIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PropertyIdentifier {}

impl Hash for PropertyIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for PropertyIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for PropertyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

// -------------------------
// Candidates and details
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub identifier: PropertyIdentifier,
    pub discovered_via: BTreeSet<SearchQuery>,
    /// Came from the configured direct-check list rather than (only) a search.
    pub direct_check: bool,
}

/// Everything the filter stages look at, parsed once from a detail page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyDetail {
    pub identifier: String,
    pub source_url: String,
    pub raw_title: Option<String>,
    pub raw_location_text: String,
    pub status_text: String,
    pub price: Option<u64>,
    pub type_markers: BTreeSet<String>,
    /// Visible text fragments of the page, one per element.
    pub sea_view_signals: BTreeSet<String>,
    pub image_url: Option<String>,
    pub year_built: Option<i32>,
}

impl PropertyDetail {
    pub fn title(&self) -> &str {
        self.raw_title.as_deref().unwrap_or_default()
    }

    pub fn scoring_text(&self) -> String {
        let mut out = String::from(self.title());
        for fragment in &self.sea_view_signals {
            out.push('\n');
            out.push_str(fragment);
        }
        out
    }
}

// -------------------------
// Decisions and output
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    Fetch,
    Location,
    Status,
    Category,
    SeaView,
    Price,
    AllStages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    FetchFailure,
    Cancelled,
    WrongLocation,
    UnavailableStatus,
    ExcludedCategory,
    InsufficientSeaViewScore,
    InvalidPrice,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::FetchFailure => "fetch_failure",
            RejectReason::Cancelled => "cancelled",
            RejectReason::WrongLocation => "wrong_location",
            RejectReason::UnavailableStatus => "unavailable_status",
            RejectReason::ExcludedCategory => "excluded_category",
            RejectReason::InsufficientSeaViewScore => "insufficient_sea_view_score",
            RejectReason::InvalidPrice => "invalid_price",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterDecision {
    pub identifier: String,
    pub stage_reached: FilterStage,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub sea_view_score: Option<u32>,
    pub discovered_via: Vec<SearchQuery>,
}

impl FilterDecision {
    pub fn accepted(&self) -> bool {
        self.outcome == Outcome::Accept
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self.outcome {
            Outcome::Accept => None,
            Outcome::Reject(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    House,
    Land,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRecord {
    pub identifier: String,
    pub title: String,
    pub title_en: String,
    pub property_kind: PropertyKind,
    pub location: String,
    pub location_en: String,
    pub price: u64,
    pub sea_view_score: u32,
    pub source_url: String,
    pub image_url: Option<String>,
    pub year_built: Option<i32>,
}
