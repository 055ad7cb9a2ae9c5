use crate::assemble::{RunReport, RunStats};
use crate::model::{FilterDecision, ListingRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const LISTINGS_FILE: &str = "listings.json";
pub const BUILD_INFO_FILE: &str = "build_info.json";
pub const DECISIONS_FILE: &str = "decisions.json";

#[derive(Serialize)]
struct Listings<'a> {
    generated_at: &'a str,
    listings: &'a [ListingRecord],
}

#[derive(Serialize)]
struct BuildInfo<'a> {
    generated_at: &'a str,
    counts: BTreeMap<&'a str, usize>,
    stats: &'a RunStats,
}

#[derive(Serialize)]
struct Decisions<'a> {
    generated_at: &'a str,
    decisions: &'a [FilterDecision],
}

/// Write the listing set, the build summary and the decision log into `dir`.
/// Returns the paths written.
pub async fn write_report(dir: &Path, report: &RunReport) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let at = report.generated_at.as_str();
    let counts = BTreeMap::from([
        ("listings", report.listings.len()),
        ("scanned", report.stats.scanned),
        ("candidates", report.stats.candidates),
    ]);

    let files = [
        (
            LISTINGS_FILE,
            serde_json::to_vec_pretty(&Listings {
                generated_at: at,
                listings: &report.listings,
            })?,
        ),
        (
            BUILD_INFO_FILE,
            serde_json::to_vec_pretty(&BuildInfo {
                generated_at: at,
                counts,
                stats: &report.stats,
            })?,
        ),
        (
            DECISIONS_FILE,
            serde_json::to_vec_pretty(&Decisions {
                generated_at: at,
                decisions: &report.decisions,
            })?,
        ),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, body) in files {
        let path = dir.join(name);
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyKind;

    fn report() -> RunReport {
        RunReport {
            generated_at: "2026-10-17T09:00:00Z".into(),
            listings: vec![ListingRecord {
                identifier: "SMB392H".into(),
                title: "下田市白浜の家".into(),
                title_en: "Shimoda Property".into(),
                property_kind: PropertyKind::House,
                location: "下田".into(),
                location_en: "Shimoda".into(),
                price: 29_800_000,
                sea_view_score: 3,
                source_url: "https://www.izutaiyo.co.jp/d.php?hpno=SMB392H".into(),
                image_url: None,
                year_built: Some(1993),
            }],
            decisions: vec![],
            stats: RunStats {
                scanned: 1,
                accepted: 1,
                candidates: 1,
                ..RunStats::default()
            },
        }
    }

    #[tokio::test]
    async fn writes_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("public");
        let written = write_report(&out, &report()).await.unwrap();
        assert_eq!(written.len(), 3);

        let listings: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(LISTINGS_FILE)).unwrap()).unwrap();
        assert_eq!(listings["generated_at"], "2026-10-17T09:00:00Z");
        assert_eq!(listings["listings"][0]["identifier"], "SMB392H");
        assert_eq!(listings["listings"][0]["location"], "下田");
        assert_eq!(listings["listings"][0]["property_kind"], "house");

        let info: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(BUILD_INFO_FILE)).unwrap()).unwrap();
        assert_eq!(info["counts"]["listings"], 1);
        assert_eq!(info["stats"]["accepted"], 1);
    }
}
