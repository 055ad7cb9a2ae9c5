//! Result assembly: the ordered listing set, the decision log and the run
//! summary.

use crate::model::{FilterDecision, ListingRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub queries_attempted: usize,
    pub queries_succeeded: usize,
    pub queries_failed: usize,
    pub candidates: usize,
    pub direct_checks: usize,
    pub scanned: usize,
    pub accepted: usize,
    pub rejected: BTreeMap<String, usize>,
    /// The run deadline passed before every fetch finished.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub listings: Vec<ListingRecord>,
    pub decisions: Vec<FilterDecision>,
    pub stats: RunStats,
}

/// Collects records and decisions as candidates finish, in any order.
#[derive(Debug, Default)]
pub struct Assembler {
    records: BTreeMap<String, ListingRecord>,
    decisions: BTreeMap<String, FilterDecision>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// First decision per identifier wins; a record is only kept alongside an
    /// accepting decision for the same identifier.
    pub fn push(&mut self, decision: FilterDecision, record: Option<ListingRecord>) {
        let Entry::Vacant(slot) = self.decisions.entry(decision.identifier.clone()) else {
            return;
        };
        let matching = |r: &ListingRecord| decision.accepted() && r.identifier == decision.identifier;
        if let Some(record) = record.filter(matching) {
            self.records.insert(record.identifier.clone(), record);
        }
        slot.insert(decision);
    }

    /// Listings and decisions sorted by identifier; `stats` carries the
    /// query-phase counters and gets the decision tallies filled in.
    pub fn finish(self, mut stats: RunStats) -> RunReport {
        stats.scanned = self.decisions.len();
        stats.accepted = self.records.len();
        stats.rejected.clear();
        for reason in self.decisions.values().filter_map(FilterDecision::reason) {
            *stats.rejected.entry(reason.as_str().to_string()).or_default() += 1;
        }
        RunReport {
            generated_at: rfc3339_now(),
            listings: self.records.into_values().collect(),
            decisions: self.decisions.into_values().collect(),
            stats,
        }
    }
}

pub fn rfc3339_now() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
