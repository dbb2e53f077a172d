//! `harvest cia`: the CIA reading room CIA-RDP96 collection.

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::acquisition::PageSource;
use crate::cli::output::{self, Styled};
use crate::cli::{journaled, page_source, progress};
use crate::config::Config;
use crate::sources::cia::{self, CiaLayout, DEFAULT_START_PAGE, PAGE_PAUSE};
use crate::sources::ScrapeSummary;

#[derive(Subcommand, Debug)]
pub enum CiaCommand {
    /// Save search result pages into layer_0
    Pages {
        #[arg(long, default_value_t = DEFAULT_START_PAGE)]
        start_page: u32,
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Collect document URLs from the saved search pages
    Urls,
    /// Save every document page not yet in layer_1
    Documents,
    /// Parse layer_1 into the date-keyed JSON index
    Build,
    /// Regex search over the index, written to results.json
    Search {
        pattern: String,
        /// Results file (default: <output>/results.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// pages, urls, documents and build in order
    Run {
        #[arg(long, default_value_t = DEFAULT_START_PAGE)]
        start_page: u32,
        #[arg(long)]
        max_pages: Option<u32>,
    },
}

fn print_summary(what: &str, summary: &ScrapeSummary) {
    let s = Styled::new();
    output::say(&format!(
        "{} {what}: {} saved, {} skipped, {} failed",
        s.ok_sym(),
        summary.saved,
        summary.skipped,
        summary.failed
    ));
}

async fn pages(config: &Config, layout: &CiaLayout, source: &dyn PageSource, start: u32, max: Option<u32>) -> Result<()> {
    let summary = journaled(config, "cia", "pages", Some(cia::SEARCH_URL), async {
        let summary = cia::scrape_search_pages(source, layout, start, max, PAGE_PAUSE).await?;
        let saved = summary.saved as u64;
        Ok((summary, Some(saved)))
    })
    .await?;
    print_summary("search pages", &summary);
    Ok(())
}

fn urls(config: &Config, layout: &CiaLayout) -> Result<Vec<String>> {
    let timer = crate::audit::StageTimer::start("cia", "urls");
    let urls = cia::extract_document_urls(layout)?;
    crate::cli::record_stage(config, &timer, None, "ok", Some(urls.len() as u64));
    output::say(&format!("{} unique document URLs -> {}", urls.len(), layout.urls_file().display()));
    Ok(urls)
}

async fn documents(config: &Config, layout: &CiaLayout, source: &dyn PageSource) -> Result<()> {
    let urls = cia::read_url_list(layout)?;
    let bar = progress::create_bar(urls.len() as u64, "documents");
    let summary = journaled(config, "cia", "documents", None, async {
        let summary =
            cia::scrape_document_pages(source, layout, &urls, PAGE_PAUSE, |done, total| progress::track(&bar, done, total))
                .await?;
        let saved = summary.saved as u64;
        Ok((summary, Some(saved)))
    })
    .await?;
    progress::finish_done(&bar, "document pages");
    print_summary("document pages", &summary);
    Ok(())
}

fn build(config: &Config, layout: &CiaLayout) -> Result<()> {
    let timer = crate::audit::StageTimer::start("cia", "build");
    let index = cia::build_index(layout)?;
    let docs: usize = index.values().map(|d| d.len()).sum();
    crate::cli::record_stage(config, &timer, None, "ok", Some(docs as u64));
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "index": layout.index_file().display().to_string(),
            "dates": index.len(),
            "documents": docs,
        }));
    } else {
        output::say(&format!(
            "{docs} documents under {} dates -> {}",
            index.len(),
            layout.index_file().display()
        ));
    }
    Ok(())
}

pub async fn run(config: &Config, command: CiaCommand) -> Result<()> {
    let layout = CiaLayout::new(config.output_dir());
    match command {
        CiaCommand::Pages { start_page, max_pages } => {
            let source = page_source(config).await?;
            let result = pages(config, &layout, source.as_ref(), start_page, max_pages).await;
            source.shutdown().await;
            result
        }
        CiaCommand::Urls => urls(config, &layout).map(|_| ()),
        CiaCommand::Documents => {
            let source = page_source(config).await?;
            let result = documents(config, &layout, source.as_ref()).await;
            source.shutdown().await;
            result
        }
        CiaCommand::Build => build(config, &layout),
        CiaCommand::Search { pattern, out } => {
            let out = out.map(|p| config.resolve(&p)).unwrap_or_else(|| layout.results_file());
            let hits = cia::search_index_file(&layout.index_file(), &pattern, &out)?;
            if output::is_json() {
                output::print_json_report(&hits);
            } else {
                output::say(&format!("{} matches for /{pattern}/ -> {}", hits.len(), out.display()));
            }
            Ok(())
        }
        CiaCommand::Run { start_page, max_pages } => {
            let source = page_source(config).await?;
            let result = async {
                pages(config, &layout, source.as_ref(), start_page, max_pages).await?;
                urls(config, &layout)?;
                documents(config, &layout, source.as_ref()).await?;
                build(config, &layout)
            }
            .await;
            source.shutdown().await;
            result
        }
    }
}
