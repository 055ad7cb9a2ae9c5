use crate::error::RunError;
use crate::fetch::PageFetcher;
use robotstxt::DefaultMatcher;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const AGENT: &str = "Mozilla";

/// Check every URL against the origin's robots.txt. A robots.txt that cannot
/// be fetched is treated as allowing everything.
pub async fn check(
    fetcher: &dyn PageFetcher,
    urls: &[Url],
    timeout: Duration,
) -> Result<(), RunError> {
    let Some(first) = urls.first() else {
        return Ok(());
    };
    let robots_url = match first.join("/robots.txt") {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "cannot build robots.txt url");
            return Ok(());
        }
    };
    let robots_txt = match fetcher.fetch(&robots_url, timeout).await {
        Ok(body) => String::from_utf8_lossy(&body).into_owned(),
        Err(e) => {
            info!(url = %robots_url, error = %e, "robots.txt unavailable, assuming allowed");
            return Ok(());
        }
    };
    allowed(&robots_txt, urls)
}

pub fn allowed(robots_txt: &str, urls: &[Url]) -> Result<(), RunError> {
    for url in urls {
        let mut matcher = DefaultMatcher::default();
        if !matcher.one_agent_allowed_by_robots(robots_txt, AGENT, url.as_str()) {
            return Err(RunError::RobotsDisallowed(url.to_string()));
        }
    }
    Ok(())
}
