//! `harvest state`: State Department living quarters allowance tables.

use anyhow::Result;
use chrono::Local;
use clap::Subcommand;

use crate::cli::output::{self, Styled};
use crate::cli::{http_client, journaled, page_source, progress};
use crate::config::Config;
use crate::sources::state_dept::{self, reports, StateLayout, DEFAULT_COUNTRY, SUBMIT_PAUSE};

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Download the allowance table of every effective date
    Tables,
    /// Build the date-keyed posts JSON from the table CSVs
    Posts,
    /// Rows of one country across all dates
    Country {
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,
    },
    /// Union of every table with a Date column
    Consolidate,
    /// Per-year means of a country's numeric columns
    Summary {
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,
    },
    /// Every stage in order
    Run {
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,
    },
}

async fn tables(config: &Config, layout: &StateLayout) -> Result<()> {
    let source = page_source(config).await?;
    let form = state_dept::load_form(source.as_ref()).await;
    source.shutdown().await;
    let form = form?;
    output::say(&format!("{} effective dates listed", form.dates.len()));

    let client = http_client(config)?;
    let bar = progress::create_bar(form.dates.len() as u64, "tables");
    let summary = journaled(config, "state", "tables", Some(state_dept::LQA_URL), async {
        let summary = state_dept::scrape_tables(&client, &form, layout, SUBMIT_PAUSE, |done, total| {
            progress::track(&bar, done, total)
        })
        .await?;
        let saved = summary.saved as u64;
        Ok((summary, Some(saved)))
    })
    .await?;
    progress::finish_done(&bar, "allowance tables");

    if output::is_json() {
        output::print_json_report(&summary);
    } else {
        output::say(&format!(
            "{} saved, {} already present, {} failed",
            summary.saved, summary.skipped, summary.failed
        ));
    }
    Ok(())
}

fn posts(layout: &StateLayout) -> Result<()> {
    let today = Local::now().format("%Y%m%d").to_string();
    let (path, posts) = reports::write_posts_json(layout, &today)?;
    let entries: usize = posts.values().map(|p| p.len()).sum();
    output::say(&format!("{} dates, {entries} post entries -> {}", posts.len(), path.display()));
    Ok(())
}

fn country(layout: &StateLayout, country: &str) -> Result<()> {
    let report = reports::write_country_csv(layout, country)?;
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": report.path.display().to_string(),
            "rows": report.table.rows.len(),
            "date_range": report.date_range(),
        }));
        return Ok(());
    }

    let s = Styled::new();
    output::say(&format!(
        "{} {} rows for {country} -> {}",
        s.ok_sym(),
        report.table.rows.len(),
        report.path.display()
    ));
    if let Some((first, last)) = report.date_range() {
        output::say(&format!("dates {first} to {last}"));
    }
    for (date, filled) in report.sample(5) {
        output::print_detail(&format!("{date}: {filled} values"));
    }
    Ok(())
}

fn consolidate(layout: &StateLayout) -> Result<()> {
    let (path, rows) = reports::write_consolidated_csv(layout)?;
    output::say(&format!("{rows} rows -> {}", path.display()));
    Ok(())
}

fn summary(layout: &StateLayout, country: &str) -> Result<()> {
    let (path, table) = reports::write_yearly_summary(layout, country)?;
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "headers": table.headers,
            "rows": table.rows,
        }));
    } else {
        output::say(&format!("{} years -> {}", table.rows.len(), path.display()));
    }
    Ok(())
}

pub async fn run(config: &Config, command: StateCommand) -> Result<()> {
    let layout = StateLayout::new(config.output_dir());
    match command {
        StateCommand::Tables => tables(config, &layout).await,
        StateCommand::Posts => posts(&layout),
        StateCommand::Country { country: name } => country(&layout, &name),
        StateCommand::Consolidate => consolidate(&layout),
        StateCommand::Summary { country } => summary(&layout, &country),
        StateCommand::Run { country: name } => {
            tables(config, &layout).await?;
            posts(&layout)?;
            country(&layout, &name)?;
            consolidate(&layout)?;
            summary(&layout, &name)
        }
    }
}
