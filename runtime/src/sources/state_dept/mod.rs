//! State Department living quarters allowance (LQA) tables.
//!
//! `tables` downloads one CSV per effective date; every other stage works
//! offline from those CSVs.

pub mod reports;
pub mod table;

use anyhow::{bail, Context, Result};
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

pub use reports::{CountryReport, PostsByDate};
pub use table::{clean_value, parse_first_table, Table};

use super::ScrapeSummary;
use crate::acquisition::{links, pacing, HttpClient, PageSource};
use crate::storage;

pub const LQA_URL: &str = "https://allowances.state.gov/Web920/lqa_all.asp";
pub const DEFAULT_COUNTRY: &str = "GERMANY";
/// Pause after each form submission.
pub const SUBMIT_PAUSE: Duration = Duration::from_secs(1);

static DATE_OPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("select[name=EffectiveDate] option").unwrap());
static FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());
static INPUT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("input[name]").unwrap());
static DATE_SELECT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("select[name=EffectiveDate]").unwrap());

/// Files under the output root.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tables(&self) -> PathBuf {
        self.root.join("tables")
    }

    pub fn table_csv(&self, date: &str) -> PathBuf {
        self.tables().join(format!("{date}.csv"))
    }

    pub fn layer2(&self) -> PathBuf {
        self.root.join("layer_2")
    }

    pub fn posts_json(&self, today: &str) -> PathBuf {
        self.layer2()
            .join(format!("state_dep_tables_with_posts_to_{today}.json"))
    }

    pub fn country_csv(&self, country: &str) -> PathBuf {
        self.layer2().join(format!("{}_data.csv", country_slug(country)))
    }

    pub fn consolidated_csv(&self) -> PathBuf {
        self.layer2().join("consolidated_all_dates.csv")
    }

    pub fn summary_csv(&self, country: &str) -> PathBuf {
        self.root
            .join(format!("{}_summary_yearly.csv", country_slug(country)))
    }
}

fn country_slug(country: &str) -> String {
    storage::safe_title(country.trim())
        .to_lowercase()
        .replace(' ', "_")
}

/// The date picker form of the LQA page.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceForm {
    pub action: String,
    /// Hidden and submit inputs sent with every request.
    pub fields: Vec<(String, String)>,
    pub dates: Vec<String>,
}

impl AllowanceForm {
    /// Form body selecting `date`.
    pub fn body_for(&self, date: &str) -> Vec<(String, String)> {
        let mut body = self.fields.clone();
        body.push(("EffectiveDate".to_string(), date.to_string()));
        body
    }
}

/// Option values of the `EffectiveDate` select.
pub fn parse_effective_dates(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&DATE_OPTION)
        .filter_map(|o| o.value().attr("value"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Parse the form that holds the date picker; `base` resolves its action.
pub fn parse_form(html: &str, base: &str) -> AllowanceForm {
    let doc = Html::parse_document(html);
    let form = doc
        .select(&FORM)
        .find(|f| f.select(&DATE_SELECT).next().is_some())
        .or_else(|| doc.select(&FORM).next());

    let mut action = LQA_URL.to_string();
    let mut fields = Vec::new();
    if let Some(form) = form {
        if let Some(resolved) = form
            .value()
            .attr("action")
            .and_then(|a| links::resolve_href(base, a))
        {
            action = resolved;
        }
        for input in form.select(&INPUT) {
            let kind = input.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            if kind != "hidden" && kind != "submit" {
                continue;
            }
            let (Some(name), value) = (input.value().attr("name"), input.value().attr("value")) else {
                continue;
            };
            if name == "EffectiveDate" {
                continue;
            }
            fields.push((name.to_string(), value.unwrap_or("").to_string()));
        }
    }

    AllowanceForm {
        action,
        fields,
        dates: parse_effective_dates(html),
    }
}

/// Load the LQA page and read its form.
pub async fn load_form(source: &dyn PageSource) -> Result<AllowanceForm> {
    let page = source
        .fetch_html(LQA_URL)
        .await
        .with_context(|| format!("failed to load {LQA_URL}"))?;
    let form = parse_form(&page.html, &page.final_url);
    if form.dates.is_empty() {
        bail!("no effective dates found on {LQA_URL}");
    }
    Ok(form)
}

/// Submit the form for `date` and parse the first table of the response.
pub async fn fetch_table(client: &HttpClient, form: &AllowanceForm, date: &str) -> Result<Option<Table>> {
    let resp = client
        .post_form(&form.action, &form.body_for(date))
        .await
        .with_context(|| format!("form submission for {date} failed"))?;
    Ok(parse_first_table(&resp.body))
}

/// Download the table of every effective date without a CSV yet.
pub async fn scrape_tables<F>(
    client: &HttpClient,
    form: &AllowanceForm,
    layout: &StateLayout,
    pause: Duration,
    mut on_progress: F,
) -> Result<ScrapeSummary>
where
    F: FnMut(usize, usize),
{
    storage::ensure_dir(&layout.tables())?;
    let mut summary = ScrapeSummary::default();
    let total = form.dates.len();

    for (i, date) in form.dates.iter().enumerate() {
        on_progress(i + 1, total);
        let path = layout.table_csv(date);
        if path.exists() {
            info!(date = %date, "skipping, CSV already exists");
            summary.skipped += 1;
            continue;
        }

        let result = fetch_table(client, form, date).await;
        pacing::pause(pause).await;
        match result {
            Ok(Some(table)) => {
                table.write_csv(&path)?;
                info!(date = %date, rows = table.rows.len(), "saved table");
                summary.saved += 1;
            }
            Ok(None) => {
                warn!(date = %date, "response has no table");
                summary.failed += 1;
            }
            Err(e) => {
                warn!(date = %date, error = %format!("{e:#}"), "failed to fetch table");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
