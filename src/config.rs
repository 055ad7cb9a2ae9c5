use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Everything an operator can change without touching pipeline logic.
/// Every field has a default tuned for the Izu Taiyo site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub cities: Vec<City>,
    /// `null` entries mean "omit the type parameter".
    pub property_types: Vec<Option<String>>,
    pub target_places: Vec<Place>,
    pub status_markers: Vec<String>,
    pub excluded_category: ExcludedCategory,
    pub sea_view: SeaViewConfig,
    pub price: PriceRules,
    /// Identifiers fetched directly, whether or not any search surfaces them.
    pub direct_check_ids: Vec<String>,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub search_path: String,
    pub city_param: String,
    pub type_param: String,
    pub detail_path: String,
    pub number_field: String,
    pub lot_number_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub code: String,
    pub name: String,
    pub name_en: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub name_en: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludedCategory {
    pub title_phrases: Vec<String>,
    pub type_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeaViewConfig {
    pub threshold: u32,
    pub view_phrases: Vec<String>,
    pub proximity_phrases: Vec<String>,
    pub negations: Vec<String>,
    pub distance_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceRules {
    pub currency_suffix: String,
    pub thousands_separator: char,
    pub man_unit: String,
    pub oku_unit: String,
    pub row_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub workers: usize,
    pub spacing_ms: u64,
    pub jitter_ms: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub retry_budget: usize,
    pub run_timeout_secs: u64,
    pub accept_invalid_certs: bool,
    /// Charset for bodies that declare none and are not valid UTF-8.
    pub fallback_charset: String,
    pub user_agents: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        let city = |code: &str, name: &str, name_en: &str| City {
            code: code.into(),
            name: name.into(),
            name_en: name_en.into(),
        };
        let place = |name: &str, name_en: &str| Place {
            name: name.into(),
            name_en: name_en.into(),
        };
        Self {
            site: SiteConfig::default(),
            cities: vec![
                city("22219", "下田", "Shimoda"),
                city("22301", "河津", "Kawazu"),
                city("22302", "東伊豆", "Higashi-Izu"),
                city("22304", "南伊豆", "Minami-Izu"),
            ],
            property_types: vec![Some("1".into()), Some("2".into()), None],
            target_places: vec![
                place("下田", "Shimoda"),
                place("河津", "Kawazu"),
                place("東伊豆", "Higashi-Izu"),
                place("南伊豆", "Minami-Izu"),
                place("賀茂郡", "Minami-Izu"),
            ],
            status_markers: strings(&[
                "成約",
                "商談中",
                "予約",
                "契約済",
                "売約済",
                "Sold",
                "Contracted",
                "Reserved",
                "Under negotiation",
            ]),
            excluded_category: ExcludedCategory::default(),
            sea_view: SeaViewConfig::default(),
            price: PriceRules::default(),
            direct_check_ids: Vec::new(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.izutaiyo.co.jp/".into(),
            search_path: "tokusen.php".into(),
            city_param: "hpcity[]".into(),
            type_param: "hpkind".into(),
            detail_path: "d.php".into(),
            number_field: "hpno".into(),
            lot_number_field: "hpbunno".into(),
        }
    }
}

impl Default for ExcludedCategory {
    fn default() -> Self {
        Self {
            title_phrases: strings(&["マンション情報", "condo"]),
            type_markers: strings(&["マンション", "mansion", "condo"]),
        }
    }
}

impl Default for SeaViewConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            view_phrases: strings(&[
                "オーシャンビュー",
                "海一望",
                "海を一望",
                "海が一望",
                "海を望",
                "海望",
                "海が見え",
                "海見え",
                "海の見え",
                "海眺望",
                "シービュー",
                "ベイビュー",
                "オーシャンフロント",
                "sea view",
                "ocean view",
            ]),
            proximity_phrases: strings(&[
                "海近",
                "海まですぐ",
                "ビーチまですぐ",
                "海へ歩いて",
                "海沿い",
                "海側",
                "海前",
                "ウォーターフロント",
                "白浜",
                "吉佐美",
                "入田",
                "多々戸",
                "相模湾",
                "太平洋",
                "伊豆七島",
                "beach",
            ]),
            negations: strings(&[
                "海は見えません",
                "海は見えない",
                "海は見えず",
                "海が見えません",
                "海が見えない",
                "海が見えず",
                "海の見えない",
                "海見えない",
                "海見えず",
                "海は望めません",
                "海は望めない",
                "海眺望なし",
                "海の眺望なし",
            ]),
            distance_pattern: r"(海|ビーチ|海岸|浜)(まで|へ)?\s*(徒歩|歩いて)?\s*約?\s*[0-9０-９]+\s*(分|m|ｍ|メートル)".into(),
        }
    }
}

impl Default for PriceRules {
    fn default() -> Self {
        Self {
            currency_suffix: "円".into(),
            thousands_separator: ',',
            man_unit: "万".into(),
            oku_unit: "億".into(),
            row_labels: strings(&["価格", "販売価格", "売買価格", "Price"]),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            spacing_ms: 900,
            jitter_ms: 1300,
            request_timeout_secs: 15,
            max_attempts: 3,
            backoff_base_ms: 600,
            backoff_max_ms: 10_000,
            retry_budget: 40,
            run_timeout_secs: 900,
            accept_invalid_certs: false,
            fallback_charset: "Shift_JIS".into(),
            user_agents: strings(&[
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
            ]),
        }
    }
}

impl FetchConfig {
    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Config {
    /// `.env`, then the JSON file named by `RADAR_CONFIG` (if any), then
    /// individual `RADAR_*` overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = match env::var("RADAR_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(v) = env::var("RADAR_WORKERS") {
            cfg.fetch.workers = v.parse().context("RADAR_WORKERS must be an integer")?;
        }
        if let Ok(v) = env::var("RADAR_RUN_TIMEOUT_SECS") {
            cfg.fetch.run_timeout_secs = v
                .parse()
                .context("RADAR_RUN_TIMEOUT_SECS must be an integer")?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cities.is_empty() {
            bail!("config: at least one city is required");
        }
        if self.property_types.is_empty() {
            bail!("config: property_types is empty (use null to search without a type filter)");
        }
        if self.target_places.is_empty() {
            bail!("config: target_places is empty");
        }
        if self.fetch.workers == 0 {
            bail!("config: fetch.workers must be at least 1");
        }
        if self.fetch.max_attempts == 0 {
            bail!("config: fetch.max_attempts must be at least 1");
        }
        if crate::charset::encoding_for(&self.fetch.fallback_charset).is_none() {
            bail!("config: unknown fetch.fallback_charset {:?}", self.fetch.fallback_charset);
        }
        url::Url::parse(&self.site.base_url).context("config: site.base_url")?;
        regex::Regex::new(&self.sea_view.distance_pattern)
            .context("config: sea_view.distance_pattern")?;
        Ok(())
    }

    /// English label for a city code, for diagnostics.
    pub fn city_name(&self, code: &str) -> Option<&str> {
        self.cities
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.name_en.as_str())
    }
}
