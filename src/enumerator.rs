use crate::config::{Config, SiteConfig};
use crate::model::{IdField, PropertyIdentifier, SearchQuery};
use anyhow::{Context, Result};
use std::collections::HashSet;
use url::Url;

/// Cartesian product of configured cities and property types, in
/// configuration order, duplicates dropped.
pub fn enumerate(cfg: &Config) -> Vec<SearchQuery> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(cfg.cities.len() * cfg.property_types.len());
    for city in &cfg.cities {
        for kind in &cfg.property_types {
            let q = SearchQuery::new(city.code.trim(), kind.as_deref().map(str::trim));
            if seen.insert(q.clone()) {
                out.push(q);
            }
        }
    }
    out
}

/// Identifiers from the direct-check list, as if they had been extracted
/// from a primary-number reference.
pub fn direct_check_identifiers(cfg: &Config) -> Vec<PropertyIdentifier> {
    cfg.direct_check_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| {
            let reference = format!("{}?{}={}", cfg.site.detail_path, cfg.site.number_field, id);
            PropertyIdentifier::new(id, IdField::Number, reference)
        })
        .collect()
}

pub fn search_url(site: &SiteConfig, query: &SearchQuery) -> Result<Url> {
    let mut url = Url::parse(&site.base_url)
        .and_then(|base| base.join(&site.search_path))
        .context("build search url")?;
    {
        let mut qp = url.query_pairs_mut();
        qp.append_pair(&site.city_param, &query.city_code);
        if let Some(kind) = &query.property_type {
            qp.append_pair(&site.type_param, kind);
        }
    }
    Ok(url)
}

pub fn detail_url(site: &SiteConfig, id: &PropertyIdentifier) -> Result<Url> {
    let field = match id.field {
        IdField::Number => &site.number_field,
        IdField::LotNumber => &site.lot_number_field,
    };
    let mut url = Url::parse(&site.base_url)
        .and_then(|base| base.join(&site.detail_path))
        .context("build detail url")?;
    url.query_pairs_mut().append_pair(field, &id.value);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_is_ordered_and_deduplicated() {
        let mut cfg = Config::default();
        cfg.property_types = vec![Some("1".into()), None, Some("1".into())];
        let qs = enumerate(&cfg);
        assert_eq!(qs.len(), cfg.cities.len() * 2);
        assert_eq!(qs[0], SearchQuery::new("22219", Some("1")));
        assert_eq!(qs[1], SearchQuery::new("22219", None));
        assert_eq!(qs[2], SearchQuery::new("22301", Some("1")));
        assert_eq!(enumerate(&cfg), qs);
    }

    #[test]
    fn new_type_codes_extend_the_search_space() {
        let mut cfg = Config::default();
        let before = enumerate(&cfg).len();
        cfg.property_types.push(Some("5".into()));
        assert_eq!(enumerate(&cfg).len(), before + cfg.cities.len());
    }

    #[test]
    fn omitted_type_has_no_type_parameter() {
        let site = SiteConfig::default();
        let with = search_url(&site, &SearchQuery::new("22219", Some("1"))).unwrap();
        let without = search_url(&site, &SearchQuery::new("22219", None)).unwrap();

        let pairs: Vec<_> = with.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("hpcity[]".into(), "22219".into())));
        assert!(pairs.contains(&("hpkind".into(), "1".into())));
        assert!(without.query_pairs().all(|(k, _)| k != "hpkind"));
        assert_eq!(with.path(), "/tokusen.php");
    }

    #[test]
    fn detail_url_uses_the_field_the_id_came_from() {
        let site = SiteConfig::default();
        let lot = PropertyIdentifier::new("A-12", IdField::LotNumber, "d.php?hpbunno=A-12");
        let url = detail_url(&site, &lot).unwrap();
        assert_eq!(url.as_str(), "https://www.izutaiyo.co.jp/d.php?hpbunno=A-12");
    }

    #[test]
    fn direct_check_ids_skip_blanks() {
        let mut cfg = Config::default();
        cfg.direct_check_ids = vec!["SMB240H".into(), "  ".into(), "smb225h".into()];
        let ids = direct_check_identifiers(&cfg);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].key, "SMB225H");
        assert_eq!(ids[1].value, "smb225h");
    }
}
