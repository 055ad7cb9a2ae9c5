//! Acceptance filter: location → status → category → sea view → price.
//!
//! The chain short-circuits; every candidate ends with exactly one
//! `FilterDecision`, accepted or not.

use crate::config::{Config, ExcludedCategory, Place};
use crate::detail::property_kind;
use crate::markup::{contains_phrase, squash};
use crate::model::{
    Candidate, FilterDecision, FilterStage, ListingRecord, Outcome, PropertyDetail, RejectReason,
};
use crate::scorer::SeaViewScorer;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FilterRules {
    pub target_places: Vec<Place>,
    pub status_markers: Vec<String>,
    pub excluded_category: ExcludedCategory,
    pub sea_view_threshold: u32,
}

impl From<&Config> for FilterRules {
    fn from(cfg: &Config) -> Self {
        Self {
            target_places: cfg.target_places.clone(),
            status_markers: cfg.status_markers.clone(),
            excluded_category: cfg.excluded_category.clone(),
            sea_view_threshold: cfg.sea_view.threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: FilterDecision,
    pub record: Option<ListingRecord>,
}

pub struct FilterPipeline<S> {
    rules: FilterRules,
    scorer: S,
}

impl<S: SeaViewScorer> FilterPipeline<S> {
    pub fn new(rules: FilterRules, scorer: S) -> Self {
        Self { rules, scorer }
    }

    pub fn evaluate(&self, candidate: &Candidate, detail: &PropertyDetail) -> Evaluation {
        let reject = |stage, reason, score| {
            debug!(id = %candidate.identifier, ?stage, %reason, "rejected");
            Evaluation {
                decision: decision(candidate, stage, Outcome::Reject(reason), score),
                record: None,
            }
        };

        let Some(place) = self.location(detail) else {
            return reject(FilterStage::Location, RejectReason::WrongLocation, None);
        };
        if self.unavailable(detail) {
            return reject(FilterStage::Status, RejectReason::UnavailableStatus, None);
        }
        if self.excluded_category(detail) {
            return reject(FilterStage::Category, RejectReason::ExcludedCategory, None);
        }
        let score = self.scorer.score(&detail.scoring_text());
        if score.total < self.rules.sea_view_threshold {
            return reject(
                FilterStage::SeaView,
                RejectReason::InsufficientSeaViewScore,
                Some(score.total),
            );
        }
        let Some(price) = detail.price.filter(|p| *p > 0) else {
            return reject(FilterStage::Price, RejectReason::InvalidPrice, Some(score.total));
        };

        let title = detail
            .raw_title
            .clone()
            .unwrap_or_else(|| candidate.identifier.key.clone());
        let record = ListingRecord {
            identifier: candidate.identifier.key.clone(),
            title_en: format!("{} Property", place.name_en),
            property_kind: property_kind(&title),
            title,
            location: place.name.clone(),
            location_en: place.name_en.clone(),
            price,
            sea_view_score: score.total,
            source_url: detail.source_url.clone(),
            image_url: detail.image_url.clone(),
            year_built: detail.year_built,
        };
        Evaluation {
            decision: decision(candidate, FilterStage::AllStages, Outcome::Accept, Some(score.total)),
            record: Some(record),
        }
    }

    /// First configured place named in the location text.
    fn location(&self, detail: &PropertyDetail) -> Option<&Place> {
        let text = squash(&detail.raw_location_text);
        self.rules
            .target_places
            .iter()
            .find(|p| contains_phrase(&text, &p.name))
    }

    fn unavailable(&self, detail: &PropertyDetail) -> bool {
        let text = squash(&detail.status_text);
        self.rules
            .status_markers
            .iter()
            .any(|m| contains_phrase(&text, m))
    }

    fn excluded_category(&self, detail: &PropertyDetail) -> bool {
        let ex = &self.rules.excluded_category;
        let title = squash(detail.title());
        if ex.title_phrases.iter().any(|p| contains_phrase(&title, p)) {
            return true;
        }
        detail.type_markers.iter().any(|marker| {
            let marker = squash(marker);
            ex.type_markers.iter().any(|m| contains_phrase(&marker, m))
        })
    }
}

fn decision(
    candidate: &Candidate,
    stage: FilterStage,
    outcome: Outcome,
    sea_view_score: Option<u32>,
) -> FilterDecision {
    FilterDecision {
        identifier: candidate.identifier.key.clone(),
        stage_reached: stage,
        outcome,
        sea_view_score,
        discovered_via: candidate.discovered_via.iter().cloned().collect(),
    }
}

/// Decision for a candidate whose detail page never made it to the filter.
pub fn unfetched(candidate: &Candidate, reason: RejectReason) -> FilterDecision {
    decision(candidate, FilterStage::Fetch, Outcome::Reject(reason), None)
}
