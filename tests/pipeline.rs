use async_trait::async_trait;
use bytes::Bytes;
use izu_radar::enumerator::{detail_url, search_url};
use izu_radar::model::{FilterStage, IdField, PropertyIdentifier, RejectReason, SearchQuery};
use izu_radar::scorer::{KeywordScorer, SeaViewScore, SeaViewScorer};
use izu_radar::{Config, FetchError, PageFetcher, Pipeline, PipelineEvent, RunError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

// -------------------------
// Fixture fetcher
// -------------------------

#[derive(Clone)]
struct Page {
    body: Result<String, FetchError>,
    delay: Duration,
}

#[derive(Default)]
struct Fixtures {
    pages: HashMap<String, Page>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Fixtures {
    fn html(mut self, url: Url, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                body: Ok(html.to_string()),
                delay: Duration::ZERO,
            },
        );
        self
    }

    fn failing(mut self, url: Url, err: FetchError) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                body: Err(err),
                delay: Duration::ZERO,
            },
        );
        self
    }

    fn slow(mut self, url: Url, html: &str, delay: Duration) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                body: Ok(html.to_string()),
                delay,
            },
        );
        self
    }

    fn calls(&self, url: &Url) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(url.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for Fixtures {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<Bytes, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        let Some(page) = self.pages.get(url.as_str()).cloned() else {
            return Err(FetchError::HttpStatus(404));
        };
        if !page.delay.is_zero() {
            tokio::time::sleep(page.delay).await;
        }
        page.body.map(Bytes::from)
    }
}

// -------------------------
// Config and URLs
// -------------------------

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.cities.truncate(1);
    cfg.direct_check_ids = vec!["SMB225H".into()];
    cfg.fetch.workers = 3;
    cfg.fetch.spacing_ms = 0;
    cfg.fetch.jitter_ms = 0;
    cfg.fetch.backoff_base_ms = 0;
    cfg.fetch.backoff_max_ms = 0;
    cfg.fetch.max_attempts = 2;
    cfg
}

fn search(kind: Option<&str>) -> Url {
    search_url(&config().site, &SearchQuery::new("22219", kind)).unwrap()
}

fn detail(token: &str) -> Url {
    let id = PropertyIdentifier::new(token, IdField::Number, "");
    detail_url(&config().site, &id).unwrap()
}

// -------------------------
// Markup fixtures
// -------------------------

const SEARCH_TYPE_1: &str = r#"<html><body><table class="result">
  <tr onclick="location.href='d.php?hpno=SMB392H'"><td>下田市白浜 中古戸建</td></tr>
  <tr onclick="location.href='d.php?hpno=SMB500H'"><td>下田市 中古戸建</td></tr>
</table>
<p><a href="d.php?hpno=SMB392H">SMB392H 詳細</a></p>
<div class="pickup"><a href="./d.php?hpno=SMB240H">吉佐美の家</a></div>
<a href="tokusen.php?hpcity%5B%5D=22219&amp;page=2">次へ</a>
</body></html>"#;

const SEARCH_TYPE_2: &str = r#"<html><body>
<ul>
  <li onclick="window.location='d.php?hpno=SMB600H'">下田市 中古マンション</li>
  <li><a href="https://www.izutaiyo.co.jp/d.php?hpno=SMB700H">富戸の家</a></li>
  <li><a href="d.php?hpno=SMB392H">白浜の家</a></li>
</ul></body></html>"#;

const SEARCH_ANY_TYPE: &str = r#"<html><body>
<table><tr onclick="location.href='d.php?hpno=SMB368H'"><td>南伊豆町湊</td></tr></table>
<a href="d.php?hpno=SMB392H">白浜の家</a>
</body></html>"#;

fn detail_page(title: &str, rows: &[(&str, &str)], body: &str) -> String {
    let rows: String = rows
        .iter()
        .map(|(k, v)| format!("<tr><th>{k}</th><td>{v}</td></tr>"))
        .collect();
    format!(
        r#"<html><head><title>{title} | 伊豆太陽</title></head><body>
<nav>熱海 伊東 ご成約物件 オーシャンビュー特集</nav>
<h1>{title}</h1>
<table>{rows}</table>
<p>{body}</p>
<footer>静岡県伊東市 本社</footer>
</body></html>"#
    )
}

fn shimoda_house() -> String {
    detail_page(
        "下田市白浜の家",
        &[
            ("所在地", "静岡県下田市白浜"),
            ("価格", "2,980万円"),
            ("物件種別", "中古戸建"),
            ("築年月", "平成5年3月"),
        ],
        "白浜と多々戸、二つの浜に挟まれた静かな住宅地です。",
    )
}

fn fixtures() -> Fixtures {
    Fixtures::default()
        .html(search(Some("1")), SEARCH_TYPE_1)
        .html(search(Some("2")), SEARCH_TYPE_2)
        .html(search(None), SEARCH_ANY_TYPE)
        .html(detail("SMB392H"), &shimoda_house())
        .html(
            detail("SMB240H"),
            &detail_page(
                "吉佐美の家",
                &[("所在地", "静岡県下田市吉佐美"), ("価格", "1億2800万円")],
                "リビングからオーシャンビュー。",
            ),
        )
        .html(
            detail("SMB500H"),
            &detail_page(
                "下田市の家",
                &[
                    ("所在地", "静岡県下田市柿崎"),
                    ("価格", "1,500万円"),
                    ("取引状況", "成約済"),
                ],
                "オーシャンビュー。海まで徒歩3分。",
            ),
        )
        .html(
            detail("SMB600H"),
            &detail_page(
                "下田市の住まい",
                &[
                    ("所在地", "静岡県下田市東本郷"),
                    ("価格", "980万円"),
                    ("物件種別", "中古マンション"),
                ],
                "海一望のリゾートマンション。",
            ),
        )
        .html(
            detail("SMB700H"),
            &detail_page(
                "富戸の家",
                &[("所在地", "静岡県伊東市富戸"), ("価格", "2,200万円")],
                "オーシャンビューの高台。",
            ),
        )
        .html(
            detail("SMB368H"),
            &detail_page(
                "南伊豆町湊の家",
                &[("所在地", "静岡県賀茂郡南伊豆町湊"), ("価格", "3,500万円")],
                "海一望の別荘。",
            ),
        )
}

async fn run(cfg: Config, fetcher: Arc<Fixtures>) -> Result<izu_radar::RunReport, RunError> {
    Pipeline::new(cfg, fetcher).unwrap().run(None).await
}

fn decision<'a>(
    report: &'a izu_radar::RunReport,
    id: &str,
) -> &'a izu_radar::model::FilterDecision {
    report
        .decisions
        .iter()
        .find(|d| d.identifier == id)
        .unwrap_or_else(|| panic!("no decision for {id}"))
}

// -------------------------
// Scenarios
// -------------------------

#[tokio::test]
async fn full_run_accepts_only_coastal_available_houses() {
    let fx = Arc::new(fixtures());
    let report = run(config(), fx.clone()).await.unwrap();

    let ids: Vec<_> = report.listings.iter().map(|l| l.identifier.as_str()).collect();
    assert_eq!(ids, vec!["SMB240H", "SMB368H", "SMB392H"]);

    // one decision per candidate, search-discovered and direct
    assert_eq!(report.decisions.len(), 7);
    assert_eq!(report.stats.candidates, 7);
    assert_eq!(report.stats.queries_succeeded, 3);
    assert_eq!(report.stats.accepted, 3);

    let shimoda = report
        .listings
        .iter()
        .find(|l| l.identifier == "SMB392H")
        .unwrap();
    assert_eq!(shimoda.location, "下田");
    assert_eq!(shimoda.location_en, "Shimoda");
    assert_eq!(shimoda.price, 29_800_000);
    assert_eq!(shimoda.sea_view_score, 2);
    assert_eq!(shimoda.year_built, Some(1993));
    assert_eq!(shimoda.source_url, detail("SMB392H").to_string());

    let minami = report
        .listings
        .iter()
        .find(|l| l.identifier == "SMB368H")
        .unwrap();
    assert_eq!(minami.location, "南伊豆");
    assert_eq!(minami.price, 35_000_000);

    // seen by all three queries, fetched once
    assert_eq!(decision(&report, "SMB392H").discovered_via.len(), 3);
    assert_eq!(fx.calls(&detail("SMB392H")), 1);
}

#[tokio::test]
async fn contracted_listing_is_rejected_at_status_despite_sea_view() {
    let report = run(config(), Arc::new(fixtures())).await.unwrap();
    let d = decision(&report, "SMB500H");
    assert_eq!(d.stage_reached, FilterStage::Status);
    assert_eq!(d.reason(), Some(RejectReason::UnavailableStatus));
    assert_eq!(d.sea_view_score, None);
}

#[tokio::test]
async fn anchor_only_listing_is_discovered() {
    let report = run(config(), Arc::new(fixtures())).await.unwrap();
    let d = decision(&report, "SMB240H");
    assert!(d.accepted());
    assert_eq!(d.discovered_via, vec![SearchQuery::new("22219", Some("1"))]);
}

#[tokio::test]
async fn untyped_query_covers_listings_missing_from_typed_ones() {
    let report = run(config(), Arc::new(fixtures())).await.unwrap();
    let d = decision(&report, "SMB368H");
    assert_eq!(d.discovered_via, vec![SearchQuery::new("22219", None)]);
    assert!(d.accepted());

    let mut typed_only = config();
    typed_only.property_types = vec![Some("1".into()), Some("2".into())];
    let report = run(typed_only, Arc::new(fixtures())).await.unwrap();
    assert!(report.decisions.iter().all(|d| d.identifier != "SMB368H"));
}

#[tokio::test]
async fn other_rejections_carry_their_stage() {
    let report = run(config(), Arc::new(fixtures())).await.unwrap();

    let condo = decision(&report, "SMB600H");
    assert_eq!(condo.reason(), Some(RejectReason::ExcludedCategory));

    let ito = decision(&report, "SMB700H");
    assert_eq!(ito.stage_reached, FilterStage::Location);
    assert_eq!(ito.reason(), Some(RejectReason::WrongLocation));

    assert_eq!(report.stats.rejected["wrong_location"], 1);
    assert_eq!(report.stats.rejected["unavailable_status"], 1);
    assert_eq!(report.stats.rejected["excluded_category"], 1);
}

#[tokio::test]
async fn missing_direct_check_page_is_a_fetch_failure_not_a_run_failure() {
    let fx = Arc::new(fixtures());
    let report = run(config(), fx.clone()).await.unwrap();

    let d = decision(&report, "SMB225H");
    assert_eq!(d.stage_reached, FilterStage::Fetch);
    assert_eq!(d.reason(), Some(RejectReason::FetchFailure));
    assert!(d.discovered_via.is_empty());
    // 404 is final on the first attempt
    assert_eq!(fx.calls(&detail("SMB225H")), 1);
}

#[tokio::test]
async fn transient_detail_errors_exhaust_attempts_then_skip() {
    let fx = Arc::new(fixtures().failing(detail("SMB392H"), FetchError::HttpStatus(503)));
    let report = run(config(), fx.clone()).await.unwrap();

    assert_eq!(
        decision(&report, "SMB392H").reason(),
        Some(RejectReason::FetchFailure)
    );
    assert_eq!(fx.calls(&detail("SMB392H")), 2);
    assert_eq!(report.listings.len(), 2);
}

#[tokio::test]
async fn one_failed_query_does_not_fail_the_run() {
    let fx = Arc::new(
        fixtures().failing(search(Some("2")), FetchError::Timeout(Duration::from_secs(15))),
    );
    let report = run(config(), fx).await.unwrap();
    assert_eq!(report.stats.queries_failed, 1);
    assert_eq!(report.stats.queries_succeeded, 2);
    assert!(report.decisions.iter().all(|d| d.identifier != "SMB700H"));
}

#[tokio::test]
async fn no_successful_search_is_fatal() {
    let fx = Arc::new(Fixtures::default().html(detail("SMB225H"), &shimoda_house()));
    match run(config(), fx).await {
        Err(RunError::OriginUnreachable { attempted }) => assert_eq!(attempted, 3),
        other => panic!("expected origin unreachable, got {other:?}"),
    }
}

#[tokio::test]
async fn robots_disallow_stops_the_run() {
    let robots = Url::parse("https://www.izutaiyo.co.jp/robots.txt").unwrap();
    let fx = Arc::new(fixtures().html(robots, "User-agent: *\nDisallow: /tokusen.php\n"));
    match run(config(), fx.clone()).await {
        Err(RunError::RobotsDisallowed(url)) => assert!(url.contains("tokusen.php")),
        other => panic!("expected robots disallow, got {other:?}"),
    }
    assert_eq!(fx.calls(&search(Some("1"))), 0);
}

#[tokio::test]
async fn repeated_runs_give_identical_results() {
    let fx = Arc::new(fixtures());
    let first = run(config(), fx.clone()).await.unwrap();
    let second = run(config(), fx).await.unwrap();
    assert_eq!(first.listings, second.listings);
    assert_eq!(first.decisions, second.decisions);
}

#[tokio::test]
async fn deadline_cancels_slow_details_and_keeps_the_rest() {
    let fx = Arc::new(fixtures().slow(
        detail("SMB392H"),
        &shimoda_house(),
        Duration::from_secs(30),
    ));
    let mut cfg = config();
    cfg.fetch.run_timeout_secs = 1;
    let report = run(cfg, fx).await.unwrap();

    assert!(report.stats.timed_out);
    let d = decision(&report, "SMB392H");
    assert_eq!(d.stage_reached, FilterStage::Fetch);
    assert_eq!(d.reason(), Some(RejectReason::Cancelled));
    let ids: Vec<_> = report.listings.iter().map(|l| l.identifier.as_str()).collect();
    assert_eq!(ids, vec!["SMB240H", "SMB368H"]);
}

#[tokio::test]
async fn deadline_before_any_search_is_cancelled() {
    let mut cfg = config();
    cfg.fetch.run_timeout_secs = 0;
    let fx = Arc::new(fixtures());
    match run(cfg, fx.clone()).await {
        Err(RunError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(fx.calls(&search(Some("1"))), 0);
    assert_eq!(fx.calls(&search(None)), 0);
}

// -------------------------
// Scorer is only consulted after the earlier stages pass
// -------------------------

struct Counting {
    inner: KeywordScorer,
    calls: AtomicUsize,
}

impl SeaViewScorer for Counting {
    fn score(&self, text: &str) -> SeaViewScore {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.score(text)
    }
}

#[tokio::test]
async fn scorer_runs_only_for_candidates_past_category() {
    let cfg = config();
    let counting = Arc::new(Counting {
        inner: KeywordScorer::new(&cfg.sea_view).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let pipeline =
        Pipeline::with_scorer(cfg, Arc::new(fixtures()), Box::new(counting.clone())).unwrap();
    let report = pipeline.run(None).await.unwrap();

    let past_category = report
        .decisions
        .iter()
        .filter(|d| d.sea_view_score.is_some())
        .count();
    assert_eq!(past_category, 3);
    assert_eq!(counting.calls.load(Ordering::SeqCst), past_category);
}

#[tokio::test]
async fn events_bracket_the_run() {
    let (tx, mut rx) = mpsc::channel(256);
    let pipeline = Pipeline::new(config(), Arc::new(fixtures())).unwrap();
    pipeline.run(Some(tx)).await.unwrap();

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert!(matches!(events.first(), Some(PipelineEvent::Started { queries: 3 })));
    assert!(matches!(events.last(), Some(PipelineEvent::Finished { .. })));
    let queries = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Query { .. }))
        .count();
    let decisions = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Decision { .. }))
        .count();
    assert_eq!(queries, 3);
    assert_eq!(decisions, 7);
}
