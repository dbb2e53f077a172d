//! HTML table extraction and value cleaning.

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th, td").unwrap());

/// A rectangular table with flattened column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Write with the header row first.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::storage::ensure_dir(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a CSV written by [`Table::write_csv`]; short rows are padded.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("bad row in {}", path.display()))?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }
}

struct Cell {
    text: String,
    header: bool,
    colspan: usize,
    rowspan: usize,
}

fn cell_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn span(el: &ElementRef<'_>, attr: &str) -> usize {
    el.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
        .min(1000)
}

/// Lay out rows on a grid, repeating cells across their row and column spans.
fn expand_spans(rows: Vec<Vec<Cell>>) -> Vec<Vec<String>> {
    let mut grid: Vec<Vec<Option<String>>> = Vec::with_capacity(rows.len());
    // (rows left, text) carried down per column
    let mut carried: Vec<Option<(usize, String)>> = Vec::new();

    for cells in rows {
        let mut out: Vec<Option<String>> = Vec::new();
        let mut col = 0;
        let mut cells = cells.into_iter().peekable();
        loop {
            if let Some(Some((left, text))) = carried.get_mut(col) {
                let text = text.clone();
                *left -= 1;
                let finished = *left == 0;
                if finished {
                    carried[col] = None;
                }
                if out.len() <= col {
                    out.resize(col + 1, None);
                }
                out[col] = Some(text);
                col += 1;
                continue;
            }
            let Some(cell) = cells.next() else {
                if carried.iter().skip(col).any(Option::is_some) {
                    col += 1;
                    continue;
                }
                break;
            };
            for _ in 0..cell.colspan {
                if out.len() <= col {
                    out.resize(col + 1, None);
                }
                out[col] = Some(cell.text.clone());
                if cell.rowspan > 1 {
                    if carried.len() <= col {
                        carried.resize(col + 1, None);
                    }
                    carried[col] = Some((cell.rowspan - 1, cell.text.clone()));
                }
                col += 1;
            }
        }
        grid.push(out);
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    grid.into_iter()
        .map(|row| {
            let mut row: Vec<String> = row.into_iter().map(Option::unwrap_or_default).collect();
            row.resize(width, String::new());
            row
        })
        .collect()
}

/// Join stacked header rows into one name per column.
fn flatten_headers(header_rows: &[Vec<String>], width: usize) -> Vec<String> {
    (0..width)
        .map(|col| {
            let mut parts: Vec<&str> = Vec::new();
            for row in header_rows {
                let part = row.get(col).map(String::as_str).unwrap_or("");
                if !part.is_empty() && parts.last() != Some(&part) {
                    parts.push(part);
                }
            }
            if parts.is_empty() {
                col.to_string()
            } else {
                parts.join("_")
            }
        })
        .collect()
}

/// Parse the first `<table>` of a page.
///
/// Header rows are the rows inside `<thead>`, or failing that the leading
/// rows made only of `<th>` cells. Two header rows become `top_bottom`
/// names (`top` alone when the bottom is empty or repeats it).
pub fn parse_first_table(html: &str) -> Option<Table> {
    let doc = Html::parse_document(html);
    let table = doc.select(&TABLE).next()?;

    let mut raw_rows = Vec::new();
    let mut in_thead = Vec::new();
    for tr in table.select(&ROW) {
        let cells: Vec<Cell> = tr
            .select(&CELL)
            .map(|c| Cell {
                text: cell_text(&c),
                header: c.value().name() == "th",
                colspan: span(&c, "colspan"),
                rowspan: span(&c, "rowspan"),
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        let thead = tr
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| a.value().name() == "thead");
        in_thead.push(thead);
        raw_rows.push(cells);
    }
    if raw_rows.is_empty() {
        return None;
    }

    let header_count = if in_thead.iter().any(|&t| t) {
        in_thead.iter().take_while(|&&t| t).count()
    } else {
        raw_rows
            .iter()
            .take_while(|cells| cells.iter().all(|c| c.header))
            .count()
    };

    let grid = expand_spans(raw_rows);
    let width = grid.first().map(Vec::len).unwrap_or(0);
    let (header_rows, body) = grid.split_at(header_count.min(grid.len()));
    let headers = flatten_headers(header_rows, width);

    let rows = body
        .iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .cloned()
        .collect();
    Some(Table { headers, rows })
}

/// Typed value of a table cell: commas and `&nbsp;` removed, integers and
/// decimals parsed, anything else kept as a trimmed string. Empty is null.
pub fn clean_value(raw: &str) -> Value {
    let clean = raw
        .replace(',', "")
        .replace("&nbsp;", "")
        .replace('\u{a0}', "");
    let clean = clean.trim();
    if clean.is_empty() {
        return Value::Null;
    }

    let digits = clean.strip_prefix('-').unwrap_or(clean);
    let dots = digits.matches('.').count();
    let numeric = !digits.is_empty()
        && dots <= 1
        && digits != "."
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
    if numeric {
        if dots == 0 {
            if let Ok(n) = clean.parse::<i64>() {
                return Value::from(n);
            }
        }
        if let Some(n) = clean.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(clean.to_string())
}

/// CSV rendering of a cleaned value.
pub fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALLOWANCES: &str = r#"
      <html><body>
        <form><select name="EffectiveDate"><option value="2024-01-07">x</option></select></form>
        <table border="1">
          <tr>
            <th rowspan="2">Country</th>
            <th rowspan="2">Post Name</th>
            <th colspan="2">LQA</th>
            <th rowspan="2">Footnote</th>
          </tr>
          <tr><th>Family of 1</th><th>Family of 2</th></tr>
          <tr><td>GERMANY</td><td>Berlin</td><td>45,100</td><td>&nbsp;</td><td>1</td></tr>
          <tr><td>FRANCE</td><td>Paris  (city)</td><td>51,000</td><td>55,500</td><td></td></tr>
          <tr><td></td><td></td><td></td><td></td><td></td></tr>
        </table>
        <table><tr><td>second</td></tr></table>
      </body></html>"#;

    #[test]
    fn test_two_row_header_flattened() {
        let table = parse_first_table(ALLOWANCES).unwrap();
        assert_eq!(
            table.headers,
            vec!["Country", "Post Name", "LQA_Family of 1", "LQA_Family of 2", "Footnote"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["GERMANY", "Berlin", "45,100", "", "1"]);
        assert_eq!(table.rows[1][1], "Paris (city)");
    }

    #[test]
    fn test_thead_header_and_single_row() {
        let html = r#"<table>
            <thead><tr><td>A</td><td>B</td></tr></thead>
            <tbody><tr><td>1</td><td>2</td></tr></tbody>
        </table>"#;
        let table = parse_first_table(html).unwrap();
        assert_eq!(table.headers, vec!["A", "B"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn test_no_table() {
        assert!(parse_first_table("<p>No data for this date</p>").is_none());
    }

    #[test]
    fn test_clean_value() {
        assert_eq!(clean_value("45,100"), json!(45100));
        assert_eq!(clean_value("-12"), json!(-12));
        assert_eq!(clean_value(" 3.5 "), json!(3.5));
        assert_eq!(clean_value("&nbsp;"), Value::Null);
        assert_eq!(clean_value(""), Value::Null);
        assert_eq!(clean_value("1.2.3"), json!("1.2.3"));
        assert_eq!(clean_value("See note"), json!("See note"));
        assert_eq!(clean_value("-"), json!("-"));
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables").join("2024-01-07.csv");
        let table = parse_first_table(ALLOWANCES).unwrap();
        table.write_csv(&path).unwrap();
        assert_eq!(Table::read_csv(&path).unwrap(), table);
    }
}
