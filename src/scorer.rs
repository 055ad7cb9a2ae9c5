use crate::config::SeaViewConfig;
use crate::markup::squash;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

const VIEW_WEIGHT: u32 = 2;
const PROXIMITY_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeaViewScore {
    pub total: u32,
    /// Which signals fired, for the decision log.
    pub signals: Vec<String>,
}

pub trait SeaViewScorer: Send + Sync {
    fn score(&self, text: &str) -> SeaViewScore;
}

impl<S: SeaViewScorer + ?Sized> SeaViewScorer for Box<S> {
    fn score(&self, text: &str) -> SeaViewScore {
        (**self).score(text)
    }
}

impl<S: SeaViewScorer + ?Sized> SeaViewScorer for std::sync::Arc<S> {
    fn score(&self, text: &str) -> SeaViewScore {
        (**self).score(text)
    }
}

/// Phrase-list scorer: +2 once for an explicit view phrase, +1 for each
/// distinct proximity phrase, +1 once for a distance-to-the-sea mention.
/// Negated phrases are cut out of the text before matching.
pub struct KeywordScorer {
    view: Vec<String>,
    proximity: Vec<String>,
    negations: Vec<String>,
    distance: Regex,
}

fn squashed_unique(phrases: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in phrases.iter().map(|p| squash(p)).filter(|p| !p.is_empty()) {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

impl KeywordScorer {
    pub fn new(cfg: &SeaViewConfig) -> Result<Self> {
        Ok(Self {
            view: squashed_unique(&cfg.view_phrases),
            proximity: squashed_unique(&cfg.proximity_phrases),
            negations: squashed_unique(&cfg.negations),
            distance: Regex::new(&cfg.distance_pattern).context("sea_view.distance_pattern")?,
        })
    }
}

impl SeaViewScorer for KeywordScorer {
    fn score(&self, text: &str) -> SeaViewScore {
        let mut t = squash(text);
        for n in &self.negations {
            t = t.replace(n.as_str(), "|");
        }

        let mut score = SeaViewScore::default();
        if let Some(p) = self.view.iter().find(|p| t.contains(p.as_str())) {
            score.total += VIEW_WEIGHT;
            score.signals.push(format!("view:{p}"));
        }
        for p in self.proximity.iter().filter(|p| t.contains(p.as_str())) {
            score.total += PROXIMITY_WEIGHT;
            score.signals.push(format!("near:{p}"));
        }
        if let Some(m) = self.distance.find(&t) {
            score.total += PROXIMITY_WEIGHT;
            score.signals.push(format!("distance:{}", m.as_str()));
        }
        score
    }
}
