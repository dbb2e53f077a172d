//! FRED (Federal Reserve Economic Data) series search and download.
//!
//! Needs an API key from `FRED_API_KEY` or `--api-key`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::acquisition::{FetchError, HttpClient};
use crate::storage;

pub const API_BASE: &str = "https://api.stlouisfed.org/fred";
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum FredError {
    #[error("no FRED API key; set FRED_API_KEY or pass --api-key")]
    MissingApiKey,
    #[error("search term is empty")]
    EmptySearchTerm,
    #[error("series {0} not found")]
    SeriesNotFound(String),
    #[error("no observation data found for {0}")]
    NoObservations(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One series as the API returns it. Fields are kept as-is so search
/// results can be written with every column the API sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series(pub Map<String, Value>);

impl Series {
    /// A field as display text, `N/A` when absent.
    pub fn field(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => "N/A".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn id(&self) -> String {
        self.field("id")
    }

    pub fn popularity(&self) -> Option<f64> {
        match self.0.get("popularity")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SeriesList {
    #[serde(default)]
    seriess: Vec<Series>,
}

/// A raw observation; `value` is `"."` when missing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawObservation {
    pub date: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct ObservationList {
    #[serde(default)]
    observations: Vec<RawObservation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: String,
    pub value: f64,
}

/// Keep observations whose value parses as a number.
pub fn clean_observations(raw: Vec<RawObservation>) -> Vec<Observation> {
    raw.into_iter()
        .filter_map(|o| {
            let value: f64 = o.value.trim().parse().ok()?;
            value.is_finite().then_some(Observation { date: o.date, value })
        })
        .collect()
}

/// Summary statistics of a cleaned series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub first_date: String,
    pub last_date: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; `None` below two observations.
    pub std_dev: Option<f64>,
}

pub fn series_stats(observations: &[Observation]) -> Option<SeriesStats> {
    if observations.is_empty() {
        return None;
    }
    let n = observations.len() as f64;
    let values = observations.iter().map(|o| o.value);
    let mean = values.clone().sum::<f64>() / n;
    let min = values.clone().fold(f64::INFINITY, f64::min);
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    let std_dev = (observations.len() > 1)
        .then(|| (values.map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt());
    let first_date = observations.iter().map(|o| o.date.as_str()).min().unwrap_or_default();
    let last_date = observations.iter().map(|o| o.date.as_str()).max().unwrap_or_default();
    Some(SeriesStats {
        count: observations.len(),
        first_date: first_date.to_string(),
        last_date: last_date.to_string(),
        mean,
        min,
        max,
        std_dev,
    })
}

/// FRED API client.
pub struct FredClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl FredClient {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Result<Self, FredError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(FredError::MissingApiKey)?;
        Ok(Self {
            http,
            api_key,
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn params(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("api_key", self.api_key.clone()),
            ("file_type", "json".to_string()),
        ];
        params.extend_from_slice(extra);
        params
    }

    /// Series matching `term`, most popular first.
    pub async fn search(&self, term: &str, limit: u32) -> Result<Vec<Series>, FredError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(FredError::EmptySearchTerm);
        }
        let url = format!("{}/series/search", self.base_url);
        let params = self.params(&[
            ("search_text", term.to_string()),
            ("limit", limit.to_string()),
            ("order_by", "popularity".to_string()),
            ("sort_order", "desc".to_string()),
        ]);
        let list: SeriesList = self.http.get_json(&url, &params).await?;
        debug!(term, results = list.seriess.len(), "FRED search");
        Ok(list.seriess)
    }

    /// Metadata of one series.
    pub async fn series(&self, id: &str) -> Result<Series, FredError> {
        let url = format!("{}/series", self.base_url);
        let params = self.params(&[("series_id", id.to_string())]);
        let list: SeriesList = match self.http.get_json(&url, &params).await {
            Ok(list) => list,
            // The API answers unknown ids with 400.
            Err(FetchError::Status { status: 400 | 404, .. }) => {
                return Err(FredError::SeriesNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        list.seriess
            .into_iter()
            .next()
            .ok_or_else(|| FredError::SeriesNotFound(id.to_string()))
    }

    /// All observations of a series, optionally bounded by date.
    pub async fn observations(
        &self,
        id: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<RawObservation>, FredError> {
        let url = format!("{}/series/observations", self.base_url);
        let mut extra = vec![("series_id", id.to_string())];
        if let Some(start) = start {
            extra.push(("observation_start", start.to_string()));
        }
        if let Some(end) = end {
            extra.push(("observation_end", end.to_string()));
        }
        let list: ObservationList = self.http.get_json(&url, &self.params(&extra)).await?;
        Ok(list.observations)
    }
}

/// Filename-safe search term: alphanumerics, space, `-`, `_`, at most 50 chars.
pub fn safe_term(term: &str) -> String {
    storage::safe_title(term).chars().take(50).collect()
}

/// Write search results sorted by popularity (unknown popularity last).
pub fn save_search_results(
    dir: &Path,
    results: &[Series],
    term: &str,
    now: &DateTime<Local>,
) -> Result<PathBuf> {
    storage::ensure_dir(dir)?;
    let ts = storage::file_timestamp(now);
    let safe = safe_term(term);
    let filename = if safe.is_empty() {
        format!("search_{ts}.csv")
    } else {
        format!("{safe}_{ts}.csv")
    };
    let path = dir.join(filename);

    let mut sorted: Vec<&Series> = results.iter().collect();
    sorted.sort_by(|a, b| match (a.popularity(), b.popularity()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut columns: Vec<&str> = Vec::new();
    for series in &sorted {
        for key in series.0.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(&columns)?;
    for series in sorted {
        writer.write_record(columns.iter().map(|c| match series.0.get(*c) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }))?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = results.len(), "saved search results");
    Ok(path)
}

const METADATA_FIELDS: [(&str, &str); 9] = [
    ("Title", "title"),
    ("Frequency", "frequency"),
    ("Units", "units"),
    ("Seasonal Adjustment", "seasonal_adjustment"),
    ("Observation Start", "observation_start"),
    ("Observation End", "observation_end"),
    ("Last Updated", "last_updated"),
    ("Notes", "notes"),
    ("Popularity", "popularity"),
];

/// Write the metadata-headed observation CSV.
pub fn save_series_csv(
    dir: &Path,
    id: &str,
    details: &Series,
    observations: &[Observation],
    now: &DateTime<Local>,
) -> Result<PathBuf> {
    storage::ensure_dir(dir)?;
    let safe_id = id.replace(['/', '\\'], "_");
    let path = dir.join(format!("{safe_id}_{}.csv", storage::file_timestamp(now)));

    let mut header = String::from("# Series Metadata\n");
    header.push_str(&format!("# Series ID: {id}\n"));
    for (label, key) in METADATA_FIELDS {
        let value = details.field(key).replace(['\r', '\n'], " ");
        header.push_str(&format!("# {label}: {value}\n"));
    }
    header.push_str("\n# Observations\n");

    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(header.as_bytes())?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["date", "value"])?;
    for o in observations {
        writer.write_record([o.date.clone(), format!("{:?}", o.value)])?;
    }
    writer.flush()?;
    Ok(path)
}

/// Outcome of [`download_series`].
#[derive(Debug, Clone)]
pub struct SeriesDownload {
    pub path: PathBuf,
    pub details: Series,
    pub stats: Option<SeriesStats>,
}

/// Fetch details and every observation of `id` and save them.
pub async fn download_series(client: &FredClient, dir: &Path, id: &str) -> Result<SeriesDownload> {
    let details = client.series(id).await?;
    let raw = client.observations(id, None, None).await?;
    if raw.is_empty() {
        return Err(FredError::NoObservations(id.to_string()).into());
    }
    let observations = clean_observations(raw);
    let path = save_series_csv(dir, id, &details, &observations, &Local::now())?;
    let stats = series_stats(&observations);
    info!(series = id, observations = observations.len(), path = %path.display(), "saved series");
    Ok(SeriesDownload {
        path,
        details,
        stats,
    })
}
