//! One end-to-end run: robots gate, search phase, aggregation, detail phase,
//! filtering and assembly.
//!
//! Fetches run as tasks in a `JoinSet` behind the shared `FetchPool`; the
//! driving task is the only writer of the candidate map and the assembler.
//! Parsed documents never live across an await point.

use crate::aggregate::Aggregator;
use crate::assemble::{Assembler, RunReport, RunStats};
use crate::config::Config;
use crate::detail::DetailParser;
use crate::enumerator::{detail_url, direct_check_identifiers, enumerate, search_url};
use crate::error::{FetchError, ParseError, RunError};
use crate::extract::{LinkPattern, extract_candidates};
use crate::fetch::{FetchPool, PageFetcher};
use crate::filter::{Evaluation, FilterPipeline, FilterRules, unfetched};
use crate::markup::parse_document;
use crate::model::{
    Candidate, FilterDecision, PropertyDetail, PropertyIdentifier, RejectReason, SearchQuery,
};
use crate::robots;
use crate::scorer::{KeywordScorer, SeaViewScorer};
use anyhow::Context;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use url::Url;

/// Progress published while a run is in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        queries: usize,
    },
    Query {
        query: SearchQuery,
        found: Option<usize>,
        error: Option<String>,
    },
    Candidates {
        total: usize,
        direct: usize,
    },
    Decision {
        decision: FilterDecision,
    },
    Finished {
        stats: RunStats,
    },
    Failed {
        error: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Started { .. } => "started",
            PipelineEvent::Query { .. } => "query",
            PipelineEvent::Candidates { .. } => "candidates",
            PipelineEvent::Decision { .. } => "decision",
            PipelineEvent::Finished { .. } => "finished",
            PipelineEvent::Failed { .. } => "failed",
        }
    }
}

pub struct Pipeline {
    cfg: Config,
    fetcher: Arc<dyn PageFetcher>,
    links: LinkPattern,
    parser: DetailParser,
    filter: FilterPipeline<Box<dyn SeaViewScorer>>,
}

impl Pipeline {
    pub fn new(cfg: Config, fetcher: Arc<dyn PageFetcher>) -> anyhow::Result<Self> {
        let scorer = KeywordScorer::new(&cfg.sea_view)?;
        Self::with_scorer(cfg, fetcher, Box::new(scorer))
    }

    pub fn with_scorer(
        cfg: Config,
        fetcher: Arc<dyn PageFetcher>,
        scorer: Box<dyn SeaViewScorer>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let links = LinkPattern::new(&cfg.site).context("link pattern")?;
        let parser = DetailParser::new(&cfg).context("detail parser")?;
        let filter = FilterPipeline::new(FilterRules::from(&cfg), scorer);
        Ok(Self {
            cfg,
            fetcher,
            links,
            parser,
            filter,
        })
    }

    pub async fn run(
        &self,
        events: Option<mpsc::Sender<PipelineEvent>>,
    ) -> Result<RunReport, RunError> {
        let events = Events(events);
        let result = self.run_inner(&events).await;
        match &result {
            Ok(report) => {
                events
                    .send(PipelineEvent::Finished {
                        stats: report.stats.clone(),
                    })
                    .await
            }
            Err(e) => events.send(PipelineEvent::Failed { error: e.to_string() }).await,
        }
        result
    }

    async fn run_inner(&self, events: &Events) -> Result<RunReport, RunError> {
        let deadline = Instant::now() + self.cfg.fetch.run_timeout();
        let pool = FetchPool::new(self.fetcher.clone(), &self.cfg.fetch);

        self.check_robots(&pool).await?;

        let queries = enumerate(&self.cfg);
        info!(queries = queries.len(), "run started");
        events
            .send(PipelineEvent::Started {
                queries: queries.len(),
            })
            .await;

        let mut stats = RunStats {
            queries_attempted: queries.len(),
            ..RunStats::default()
        };
        let mut candidates = self
            .search_phase(&pool, queries, deadline, &mut stats, events)
            .await?;

        let direct = direct_check_identifiers(&self.cfg);
        stats.direct_checks = direct.len();
        let added = candidates.fold_direct(direct);
        stats.candidates = candidates.len();
        info!(
            candidates = candidates.len(),
            direct_only = added,
            "candidates aggregated"
        );
        events
            .send(PipelineEvent::Candidates {
                total: candidates.len(),
                direct: stats.direct_checks,
            })
            .await;

        let assembler = self
            .detail_phase(&pool, candidates.into_candidates(), deadline, &mut stats, events)
            .await;
        let report = assembler.finish(stats);
        info!(
            scanned = report.stats.scanned,
            accepted = report.stats.accepted,
            rejected = ?report.stats.rejected,
            timed_out = report.stats.timed_out,
            "run finished"
        );
        Ok(report)
    }

    async fn check_robots(&self, pool: &FetchPool) -> Result<(), RunError> {
        let site = &self.cfg.site;
        let paths: Vec<Url> = Url::parse(&site.base_url)
            .ok()
            .map(|base| {
                [&site.search_path, &site.detail_path]
                    .into_iter()
                    .filter_map(|p| base.join(p).ok())
                    .collect()
            })
            .unwrap_or_default();
        robots::check(pool.fetcher().as_ref(), &paths, pool.request_timeout()).await
    }

    /// Fetch every query and fold the identifiers found. Fails only when not a
    /// single search page came back.
    async fn search_phase(
        &self,
        pool: &FetchPool,
        queries: Vec<SearchQuery>,
        deadline: Instant,
        stats: &mut RunStats,
        events: &Events,
    ) -> Result<Aggregator, RunError> {
        if Instant::now() >= deadline {
            warn!("run deadline passed before the search phase");
            stats.timed_out = true;
            stats.queries_failed = stats.queries_attempted;
            return Err(RunError::Cancelled);
        }
        let mut set: JoinSet<(SearchQuery, Result<Bytes, FetchError>)> = JoinSet::new();
        for query in queries {
            let url = match search_url(&self.cfg.site, &query) {
                Ok(u) => u,
                Err(e) => {
                    warn!(%query, error = %e, "cannot build search url");
                    stats.queries_failed += 1;
                    continue;
                }
            };
            let pool = pool.clone();
            set.spawn(async move {
                let res = pool.get(&url).await;
                (query, res)
            });
        }

        let mut candidates = Aggregator::new();
        loop {
            let joined = match timeout_at(deadline, set.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    warn!(outstanding = set.len(), "run deadline hit during search phase");
                    set.abort_all();
                    stats.timed_out = true;
                    stats.queries_failed += set.len();
                    break;
                }
            };
            let (query, res) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "search task failed");
                    stats.queries_failed += 1;
                    continue;
                }
            };
            let event = match res {
                Ok(body) => {
                    stats.queries_succeeded += 1;
                    let ids = match self.extract(&body) {
                        Ok(ids) => ids,
                        Err(e) => {
                            warn!(%query, error = %e, "search page unparseable");
                            BTreeSet::new()
                        }
                    };
                    let found = ids.len();
                    let new = candidates.fold(&query, ids);
                    let city = self.cfg.city_name(&query.city_code).unwrap_or("?");
                    debug!(%query, city, found, new, "search page folded");
                    PipelineEvent::Query {
                        query,
                        found: Some(found),
                        error: None,
                    }
                }
                Err(e) => {
                    stats.queries_failed += 1;
                    warn!(%query, error = %e, "search query failed");
                    PipelineEvent::Query {
                        query,
                        found: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            events.send(event).await;
        }

        if stats.queries_succeeded == 0 {
            if stats.timed_out {
                return Err(RunError::Cancelled);
            }
            return Err(RunError::OriginUnreachable {
                attempted: stats.queries_attempted,
            });
        }
        Ok(candidates)
    }

    fn extract(&self, body: &[u8]) -> Result<BTreeSet<PropertyIdentifier>, ParseError> {
        let doc = parse_document(body)?;
        Ok(extract_candidates(&doc, &self.links))
    }

    /// Fetch, parse and judge every candidate. Candidates still pending at the
    /// deadline are recorded as cancelled.
    async fn detail_phase(
        &self,
        pool: &FetchPool,
        candidates: Vec<Candidate>,
        deadline: Instant,
        stats: &mut RunStats,
        events: &Events,
    ) -> Assembler {
        let mut assembler = Assembler::new();
        let mut pending: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut set: JoinSet<(String, String, Result<Bytes, FetchError>)> = JoinSet::new();
        if Instant::now() >= deadline {
            warn!("run deadline passed before the detail phase");
            stats.timed_out = true;
        }

        for candidate in candidates {
            let key = candidate.identifier.key.clone();
            let url = match detail_url(&self.cfg.site, &candidate.identifier) {
                Ok(u) => u,
                Err(e) => {
                    warn!(id = %key, error = %e, "cannot build detail url");
                    let decision = unfetched(&candidate, RejectReason::FetchFailure);
                    events
                        .send(PipelineEvent::Decision {
                            decision: decision.clone(),
                        })
                        .await;
                    assembler.push(decision, None);
                    continue;
                }
            };
            if stats.timed_out {
                pending.insert(key, candidate);
                continue;
            }
            let pool = pool.clone();
            let task_key = key.clone();
            set.spawn(async move {
                let res = pool.get(&url).await;
                (task_key, url.to_string(), res)
            });
            pending.insert(key, candidate);
        }

        while !stats.timed_out {
            let joined = match timeout_at(deadline, set.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    warn!(outstanding = set.len(), "run deadline hit during detail phase");
                    set.abort_all();
                    stats.timed_out = true;
                    break;
                }
            };
            let (key, source_url, res) = match joined {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "detail task failed");
                    continue;
                }
            };
            let Some(candidate) = pending.remove(&key) else {
                continue;
            };
            let evaluation = match res {
                Ok(body) => self.judge(&candidate, &source_url, &body),
                Err(e) => {
                    warn!(id = %key, error = %e, "detail fetch failed");
                    Evaluation {
                        decision: unfetched(&candidate, RejectReason::FetchFailure),
                        record: None,
                    }
                }
            };
            events
                .send(PipelineEvent::Decision {
                    decision: evaluation.decision.clone(),
                })
                .await;
            assembler.push(evaluation.decision, evaluation.record);
        }

        let leftover = if stats.timed_out {
            RejectReason::Cancelled
        } else {
            RejectReason::FetchFailure
        };
        for candidate in pending.into_values() {
            let decision = unfetched(&candidate, leftover);
            events
                .send(PipelineEvent::Decision {
                    decision: decision.clone(),
                })
                .await;
            assembler.push(decision, None);
        }
        assembler
    }

    /// Parse one detail page and run it through the filter. A page that does
    /// not parse becomes an empty detail and is rejected by the stages.
    fn judge(&self, candidate: &Candidate, source_url: &str, body: &[u8]) -> Evaluation {
        let key = &candidate.identifier.key;
        let detail = match parse_document(body) {
            Ok(doc) => self.parser.parse(key, source_url, &doc),
            Err(e) => {
                warn!(id = %key, error = %e, "detail page unparseable");
                PropertyDetail {
                    identifier: key.clone(),
                    source_url: source_url.to_string(),
                    ..PropertyDetail::default()
                }
            }
        };
        self.filter.evaluate(candidate, &detail)
    }
}

/// Optional event sink; a dropped receiver is not an error.
struct Events(Option<mpsc::Sender<PipelineEvent>>);

impl Events {
    async fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}
