//! Reports built from the per-date table CSVs.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::table::{clean_value, value_to_cell, Table};
use super::StateLayout;
use crate::storage;

/// `{ date: { "<country> - <post>": { column: value } } }`
pub type PostsByDate = BTreeMap<String, Map<String, Value>>;

/// Per-date table CSVs as `(date, path)`, sorted by date.
pub fn table_files(layout: &StateLayout) -> Result<Vec<(String, PathBuf)>> {
    let dir = layout.tables();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let files = storage::list_dir(&dir, |p| p.is_file() && storage::has_extension(p, "csv"))?;
    Ok(files
        .into_iter()
        .filter_map(|p| {
            let date = p.file_stem()?.to_str()?.to_string();
            Some((date, p))
        })
        .collect())
}

fn load_tables(layout: &StateLayout) -> Result<Vec<(String, Table)>> {
    let mut tables = Vec::new();
    for (date, path) in table_files(layout)? {
        match Table::read_csv(&path) {
            Ok(table) => tables.push((date, table)),
            Err(e) => warn!(path = %path.display(), error = %format!("{e:#}"), "skipping unreadable table"),
        }
    }
    Ok(tables)
}

/// Column holding the post name: the first whose header mentions "post",
/// else the second column.
pub fn post_column(headers: &[String]) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.to_lowercase().contains("post"))
        .or_else(|| (headers.len() > 1).then_some(1))
}

/// Index every table by date and `"<country> - <post>"`.
pub fn build_posts(tables: &[(String, Table)]) -> PostsByDate {
    let mut out = PostsByDate::new();
    for (date, table) in tables {
        let post_col = post_column(&table.headers);
        let mut entries = Map::new();
        for row in &table.rows {
            let country = row.first().map(|c| c.trim()).unwrap_or("");
            if country.is_empty() {
                continue;
            }
            let post = post_col
                .and_then(|i| row.get(i))
                .map(|p| p.trim())
                .filter(|p| !p.is_empty());
            let key = match post {
                Some(post) => format!("{country} - {post}"),
                None => country.to_string(),
            };

            let mut values = Map::new();
            for (i, header) in table.headers.iter().enumerate() {
                if i == 0 || Some(i) == post_col {
                    continue;
                }
                let raw = row.get(i).map(String::as_str).unwrap_or("");
                values.insert(header.clone(), clean_value(raw));
            }
            entries.insert(key, Value::Object(values));
        }
        out.insert(date.clone(), entries);
    }
    out
}

/// Write `state_dep_tables_with_posts_to_<today>.json`.
pub fn write_posts_json(layout: &StateLayout, today: &str) -> Result<(PathBuf, PostsByDate)> {
    let tables = load_tables(layout)?;
    let posts = build_posts(&tables);
    let path = layout.posts_json(today);
    storage::write_json_pretty(&path, &posts)?;
    info!(path = %path.display(), dates = posts.len(), "wrote posts JSON");
    Ok((path, posts))
}

/// Rows of one country across all dates.
#[derive(Debug, Clone)]
pub struct CountryReport {
    pub path: PathBuf,
    pub table: Table,
}

impl CountryReport {
    /// Oldest and newest dates present.
    pub fn date_range(&self) -> Option<(&str, &str)> {
        let dates = self.table.rows.iter().filter_map(|r| r.first()).map(String::as_str);
        let min = dates.clone().min()?;
        let max = dates.max()?;
        Some((min, max))
    }

    /// `(date, non-empty value count)` for the first `n` rows.
    pub fn sample(&self, n: usize) -> Vec<(String, usize)> {
        self.table
            .rows
            .iter()
            .take(n)
            .map(|r| {
                let filled = r.iter().skip(1).filter(|c| !c.is_empty()).count();
                (r.first().cloned().unwrap_or_default(), filled)
            })
            .collect()
    }
}

/// Select `country` (case-insensitive, first column) from `tables`:
/// a leading `Date` column, every other column but the country, cleaned
/// values, newest date first.
pub fn country_table(tables: &[(String, Table)], country: &str) -> Table {
    let wanted = country.trim().to_uppercase();
    let mut headers = vec!["Date".to_string()];
    let mut rows: Vec<BTreeMap<String, String>> = Vec::new();

    for (date, table) in tables {
        for row in &table.rows {
            if row.first().map(|c| c.trim().to_uppercase()) != Some(wanted.clone()) {
                continue;
            }
            let mut record = BTreeMap::new();
            record.insert("Date".to_string(), date.clone());
            for (i, header) in table.headers.iter().enumerate().skip(1) {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
                let raw = row.get(i).map(String::as_str).unwrap_or("");
                record.insert(header.clone(), value_to_cell(&clean_value(raw)));
            }
            rows.push(record);
        }
    }

    // Stable: rows of one date keep their table order.
    rows.sort_by(|a, b| b.get("Date").cmp(&a.get("Date")));
    let rows = rows
        .into_iter()
        .map(|record| {
            headers
                .iter()
                .map(|h| record.get(h).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    Table { headers, rows }
}

/// Write `<country>_data.csv`.
pub fn write_country_csv(layout: &StateLayout, country: &str) -> Result<CountryReport> {
    let tables = load_tables(layout)?;
    if tables.is_empty() {
        bail!("no table CSVs in {}", layout.tables().display());
    }
    let table = country_table(&tables, country);
    if table.rows.is_empty() {
        bail!("no rows for {country} in any table");
    }
    let path = layout.country_csv(country);
    table.write_csv(&path)?;
    info!(path = %path.display(), rows = table.rows.len(), "wrote country CSV");
    Ok(CountryReport { path, table })
}

/// Union of every table with a trailing `Date` column. Columns keep their
/// first-seen order.
pub fn consolidated_table(tables: &[(String, Table)]) -> Table {
    let mut headers: Vec<String> = Vec::new();
    for (_, table) in tables {
        for h in &table.headers {
            if h != "Date" && !headers.contains(h) {
                headers.push(h.clone());
            }
        }
    }
    let mut rows = Vec::new();
    for (date, table) in tables {
        for row in &table.rows {
            let mut out: Vec<String> = headers
                .iter()
                .map(|h| {
                    table
                        .column_index(h)
                        .and_then(|i| row.get(i))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            out.push(date.clone());
            rows.push(out);
        }
    }
    headers.push("Date".to_string());
    Table { headers, rows }
}

/// Write `consolidated_all_dates.csv`.
pub fn write_consolidated_csv(layout: &StateLayout) -> Result<(PathBuf, usize)> {
    let tables = load_tables(layout)?;
    if tables.is_empty() {
        bail!("no table CSVs in {}", layout.tables().display());
    }
    let table = consolidated_table(&tables);
    let path = layout.consolidated_csv();
    table.write_csv(&path)?;
    info!(path = %path.display(), rows = table.rows.len(), "wrote consolidated CSV");
    Ok((path, table.rows.len()))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Per-year means of the numeric columns of a country table, plus `count`.
///
/// The year is the first four characters of `Date`. A column is numeric
/// when at least one of its values parses; cells that do not parse are
/// left out of the mean.
pub fn yearly_summary(country: &Table) -> Table {
    let Some(date_col) = country.column_index("Date") else {
        return Table::default();
    };
    let numeric: Vec<usize> = (0..country.headers.len())
        .filter(|&i| i != date_col)
        .filter(|&i| country.rows.iter().any(|r| r[i].trim().parse::<f64>().is_ok()))
        .collect();

    // year -> (row count, per-column (sum, n))
    let mut years: BTreeMap<String, (usize, Vec<(f64, usize)>)> = BTreeMap::new();
    for row in &country.rows {
        let year: String = row[date_col].chars().take(4).collect();
        let entry = years
            .entry(year)
            .or_insert_with(|| (0, vec![(0.0, 0); numeric.len()]));
        entry.0 += 1;
        for (slot, &col) in numeric.iter().enumerate() {
            if let Ok(v) = row[col].trim().parse::<f64>() {
                entry.1[slot].0 += v;
                entry.1[slot].1 += 1;
            }
        }
    }

    let mut headers = vec!["year".to_string()];
    headers.extend(numeric.iter().map(|&i| country.headers[i].clone()));
    headers.push("count".to_string());
    let rows = years
        .into_iter()
        .map(|(year, (count, sums))| {
            let mut row = vec![year];
            row.extend(sums.into_iter().map(|(sum, n)| {
                if n == 0 {
                    String::new()
                } else {
                    round2(sum / n as f64).to_string()
                }
            }));
            row.push(count.to_string());
            row
        })
        .collect();
    Table { headers, rows }
}

/// Summarize `<country>_data.csv` into `<country>_summary_yearly.csv`.
pub fn write_yearly_summary(layout: &StateLayout, country: &str) -> Result<(PathBuf, Table)> {
    let source = layout.country_csv(country);
    if !source.exists() {
        bail!("{} not found; run `harvest state country` first", source.display());
    }
    let summary = yearly_summary(&Table::read_csv(&source)?);
    let path = layout.summary_csv(country);
    summary.write_csv(&path)?;
    info!(path = %path.display(), years = summary.rows.len(), "wrote yearly summary");
    Ok((path, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn sample_tables() -> Vec<(String, Table)> {
        vec![
            (
                "2023-06-04".to_string(),
                table(
                    &["Country", "Post Name", "LQA_Family of 1"],
                    &[&["GERMANY", "Berlin", "40,000"], &["France", "Paris", "50,000"]],
                ),
            ),
            (
                "2024-01-07".to_string(),
                table(
                    &["Country", "Post Name", "LQA_Family of 1", "Note"],
                    &[
                        &["Germany", "Berlin", "45,100", "x"],
                        &["GERMANY", "Bonn", "41,000.5", ""],
                        &["", "", "", ""],
                    ],
                ),
            ),
        ]
    }

    #[test]
    fn test_post_column() {
        let h = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(post_column(&h(&["Country", "Foreign Post", "X"])), Some(1));
        assert_eq!(post_column(&h(&["Country", "X", "Post"])), Some(2));
        assert_eq!(post_column(&h(&["Country", "City"])), Some(1));
        assert_eq!(post_column(&h(&["Country"])), None);
    }

    #[test]
    fn test_build_posts() {
        let posts = build_posts(&sample_tables());
        assert_json_eq!(
            serde_json::to_value(&posts).unwrap(),
            json!({
                "2023-06-04": {
                    "GERMANY - Berlin": {"LQA_Family of 1": 40000},
                    "France - Paris": {"LQA_Family of 1": 50000}
                },
                "2024-01-07": {
                    "Germany - Berlin": {"LQA_Family of 1": 45100, "Note": "x"},
                    "GERMANY - Bonn": {"LQA_Family of 1": 41000.5, "Note": null}
                }
            })
        );
    }

    #[test]
    fn test_country_table_newest_first() {
        let t = country_table(&sample_tables(), "germany");
        assert_eq!(t.headers, vec!["Date", "Post Name", "LQA_Family of 1", "Note"]);
        assert_eq!(
            t.rows,
            vec![
                vec!["2024-01-07", "Berlin", "45100", "x"],
                vec!["2024-01-07", "Bonn", "41000.5", ""],
                vec!["2023-06-04", "Berlin", "40000", ""],
            ]
        );
        let report = CountryReport { path: PathBuf::new(), table: t };
        assert_eq!(report.date_range(), Some(("2023-06-04", "2024-01-07")));
        assert_eq!(report.sample(1), vec![("2024-01-07".to_string(), 3)]);
    }

    #[test]
    fn test_consolidated_union_with_trailing_date() {
        let t = consolidated_table(&sample_tables());
        assert_eq!(t.headers, vec!["Country", "Post Name", "LQA_Family of 1", "Note", "Date"]);
        assert_eq!(t.rows.len(), 5);
        assert_eq!(t.rows[0], vec!["GERMANY", "Berlin", "40,000", "", "2023-06-04"]);
        assert_eq!(t.rows[2][3], "x");
    }

    #[test]
    fn test_yearly_summary() {
        let country = country_table(&sample_tables(), "GERMANY");
        let summary = yearly_summary(&country);
        assert_eq!(summary.headers, vec!["year", "LQA_Family of 1", "count"]);
        assert_eq!(
            summary.rows,
            vec![
                vec!["2023", "40000", "1"],
                vec!["2024", "43050.25", "2"],
            ]
        );
    }

    #[test]
    fn test_write_reports_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        for (date, t) in sample_tables() {
            t.write_csv(&layout.table_csv(&date)).unwrap();
        }
        assert!(layout.table_csv("2024-01-07").exists());

        let (json_path, posts) = write_posts_json(&layout, "20240301").unwrap();
        assert!(json_path.ends_with("layer_2/state_dep_tables_with_posts_to_20240301.json"));
        assert_eq!(posts.len(), 2);

        let report = write_country_csv(&layout, "Germany").unwrap();
        assert!(report.path.ends_with("layer_2/germany_data.csv"));
        let (summary_path, _) = write_yearly_summary(&layout, "Germany").unwrap();
        assert!(summary_path.ends_with("germany_summary_yearly.csv"));

        let (_, rows) = write_consolidated_csv(&layout).unwrap();
        assert_eq!(rows, 5);
        assert!(write_country_csv(&layout, "Atlantis").is_err());
    }
}
