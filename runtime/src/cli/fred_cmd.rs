//! `harvest fred`: FRED series search and download, with an interactive
//! search-pick-download loop.

use anyhow::Result;
use chrono::Local;
use clap::{Args, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};

use crate::cli::output::{self, Styled};
use crate::cli::{http_client, journaled};
use crate::config::Config;
use crate::sources::fred::{self, FredClient, FredError, Series, DEFAULT_SEARCH_LIMIT};

/// Rows shown after a search.
const LISTED: usize = 20;

#[derive(Args, Debug)]
pub struct FredArgs {
    /// FRED API key (default: FRED_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,
    #[command(subcommand)]
    pub command: Option<FredCommand>,
}

#[derive(Subcommand, Debug)]
pub enum FredCommand {
    /// Search series and save every result as CSV
    Search {
        term: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
    },
    /// Download every observation of a series
    Download { series_id: String },
    /// Search, pick a series, download; repeat (the default)
    Interactive,
}

fn search_dir(config: &Config) -> PathBuf {
    config.output_dir().join("search_results")
}

fn series_dir(config: &Config) -> PathBuf {
    config.output_dir().join("series_data")
}

/// One listing entry: id and title, then frequency, units and popularity.
pub fn format_listing(rank: usize, series: &Series) -> [String; 2] {
    let title = output::truncate(&series.field("title"), 60);
    let units: String = series.field("units").chars().take(20).collect();
    let popularity = series
        .popularity()
        .map(|p| format!("{p:3}"))
        .unwrap_or_else(|| "N/A".to_string());
    [
        format!("{rank:2}. {:15} | {title}", series.id()),
        format!("     Freq: {:10} | Units: {units:20} | Pop: {popularity}", series.field("frequency")),
    ]
}

fn print_listing(results: &[Series]) {
    let rule = "=".repeat(100);
    eprintln!("\nFound {} results. Displaying top {LISTED}:", results.len());
    eprintln!("{rule}");
    for (i, series) in results.iter().take(LISTED).enumerate() {
        for line in format_listing(i + 1, series) {
            eprintln!("{line}");
        }
    }
    if results.len() > LISTED {
        eprintln!("... and {} more results", results.len() - LISTED);
    }
    eprintln!("{rule}");
}

async fn search(config: &Config, client: &FredClient, term: &str, limit: u32) -> Result<Vec<Series>> {
    let results = journaled(config, "fred", "search", Some(term), async {
        let results = client.search(term, limit).await?;
        let n = results.len() as u64;
        Ok((results, Some(n)))
    })
    .await?;
    if results.is_empty() {
        output::say("No series found for that term.");
        return Ok(results);
    }
    let path = fred::save_search_results(&search_dir(config), &results, term, &Local::now())?;
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "results": results.len(),
        }));
    } else {
        output::say(&format!("{} Search results saved to: {}", Styled::new().ok_sym(), path.display()));
        print_listing(&results);
    }
    Ok(results)
}

async fn download(config: &Config, client: &FredClient, dir: &Path, id: &str) -> Result<()> {
    let done = journaled(config, "fred", "download", Some(id), async {
        let done = fred::download_series(client, dir, id).await?;
        let n = done.stats.as_ref().map(|s| s.count as u64);
        Ok((done, n))
    })
    .await?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "path": done.path.display().to_string(),
            "series": done.details.0,
            "stats": done.stats,
        }));
        return Ok(());
    }

    let s = Styled::new();
    eprintln!("Title: {}", done.details.field("title"));
    eprintln!("Units: {}", done.details.field("units"));
    eprintln!("Frequency: {}", done.details.field("frequency"));
    eprintln!("{} Saved to: {}", s.ok_sym(), done.path.display());
    match &done.stats {
        Some(stats) => {
            eprintln!("\nSUMMARY STATISTICS:");
            eprintln!("  Total observations: {}", stats.count);
            eprintln!("  Date range: {} to {}", stats.first_date, stats.last_date);
            eprintln!("  Mean value: {:.2}", stats.mean);
            eprintln!("  Min value: {:.2}", stats.min);
            eprintln!("  Max value: {:.2}", stats.max);
            if let Some(sd) = stats.std_dev {
                eprintln!("  Std deviation: {sd:.2}");
            }
        }
        None => eprintln!("{} no numeric observations", s.warn_sym()),
    }
    Ok(())
}

/// What the user typed at the series prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Exit,
    NewSearch,
    Series(String),
}

pub fn parse_choice(line: &str) -> Option<Choice> {
    let id = line.trim().to_uppercase();
    match id.as_str() {
        "" => None,
        "EXIT" => Some(Choice::Exit),
        "NEW" => Some(Choice::NewSearch),
        _ => Some(Choice::Series(id)),
    }
}

pub fn is_yes(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("y")
}

/// `None` on Ctrl-C / Ctrl-D.
fn prompt(rl: &mut DefaultEditor, text: &str) -> Result<Option<String>> {
    match rl.readline(text) {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn interactive(config: &Config, client: &FredClient) -> Result<()> {
    let rule = "=".repeat(80);
    eprintln!("{rule}");
    eprintln!("FRED DATA DOWNLOADER");
    eprintln!("{rule}");
    eprintln!("1. Enter a search term (e.g., 'gdp', 'population')");
    eprintln!("2. Review the matching series IDs");
    eprintln!("3. Enter the EXACT series ID to download");
    eprintln!("4. The full date range is downloaded");
    eprintln!("{rule}");

    let mut rl = DefaultEditor::new()?;
    let dir = series_dir(config);
    loop {
        let Some(term) = prompt(&mut rl, "\nEnter search term (e.g., 'gdp', 'unemployment', 'population'): ")? else {
            break;
        };
        let term = term.trim();
        if term.is_empty() {
            eprintln!("Error: Search term cannot be empty");
            continue;
        }
        eprintln!("\nSearching FRED for '{term}'...");
        let results = match search(config, client, term, DEFAULT_SEARCH_LIMIT).await {
            Ok(results) if !results.is_empty() => results,
            Ok(_) => {
                eprintln!("\nNo results found. Try another search term.");
                continue;
            }
            Err(e) => {
                eprintln!("  {} Search error: {e:#}", Styled::new().fail_sym());
                continue;
            }
        };

        eprintln!("\n{rule}");
        eprintln!("ENTER THE EXACT SERIES ID TO DOWNLOAD");
        eprintln!("{rule}");
        eprintln!("Enter 'NEW' to search for a different term");
        eprintln!("Enter 'EXIT' to quit");
        eprintln!("{rule}");

        let choice = loop {
            let Some(line) = prompt(&mut rl, "\nEnter exact series ID: ")? else {
                break Choice::Exit;
            };
            if let Some(choice) = parse_choice(&line) {
                break choice;
            }
        };
        let id = match choice {
            Choice::Exit => break,
            Choice::NewSearch => continue,
            Choice::Series(id) => id,
        };

        let valid: Vec<String> = results.iter().map(Series::id).collect();
        let go = if valid.contains(&id) {
            true
        } else {
            let shown: Vec<&str> = valid.iter().take(LISTED).map(String::as_str).collect();
            let more = if valid.len() > LISTED { "..." } else { "" };
            eprintln!("\n{} '{id}' not found in search results.", Styled::new().warn_sym());
            eprintln!("Valid IDs from search: {}{more}", shown.join(", "));
            prompt(&mut rl, &format!("Download '{id}' anyway? (y/n): "))?.is_some_and(|l| is_yes(&l))
        };
        if go {
            if let Err(e) = download(config, client, &dir, &id).await {
                match e.downcast_ref::<FredError>() {
                    Some(FredError::SeriesNotFound(_)) => eprintln!("Error: Could not find series with ID '{id}'"),
                    Some(FredError::NoObservations(_)) => eprintln!("No observation data found for '{id}'"),
                    _ => eprintln!("  {} {e:#}", Styled::new().fail_sym()),
                }
            }
        }

        eprintln!("\n{rule}");
        if !prompt(&mut rl, "Download another series? (y/n): ")?.is_some_and(|l| is_yes(&l)) {
            break;
        }
    }
    eprintln!("Goodbye!");
    Ok(())
}

pub async fn run(config: &Config, args: FredArgs) -> Result<()> {
    let api_key = args.api_key.or_else(|| config.fred_api_key.clone());
    let client = FredClient::new(http_client(config)?, api_key)?;
    match args.command.unwrap_or(FredCommand::Interactive) {
        FredCommand::Search { term, limit } => search(config, &client, &term, limit).await.map(|_| ()),
        FredCommand::Download { series_id } => {
            download(config, &client, &series_dir(config), &series_id.trim().to_uppercase()).await
        }
        FredCommand::Interactive => interactive(config, &client).await,
    }
}
