//! Storage for user-uploaded ETF holdings files and parsers for each
//! supported format (§4.5 resolution step 1).
//!
//! Files are content-addressed by ETF ISIN with a sidecar timestamp (§6:
//! "an on-disk holdings cache directory for adapter-sourced artifacts,
//! content-addressed by ETF ISIN with a sidecar timestamp"), mirroring how
//! the Local Cache content-addresses the ETF-holdings table by `etf_isin`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use calamine::{Reader, open_workbook_auto};
use chrono::Utc;
use regex::Regex;

use crate::core::error::EngineError;

use super::HoldingRow;

/// On-disk store for manually uploaded ETF holdings files.
#[derive(Clone)]
pub struct ManualFileStore {
    dir: PathBuf,
}

impl ManualFileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, etf_isin: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{etf_isin}.{ext}"))
    }

    /// Persist `bytes` as the manual holdings file for `etf_isin`, writing a
    /// `.meta` sidecar with the upload timestamp. `ext` is the file's
    /// original extension (`xlsx`, `csv`, `pdf`), used to pick the right
    /// parser later. Callers are expected to have already rejected any other
    /// extension (see `ipc::Engine::upload_holdings_file`).
    pub fn store(&self, etf_isin: &str, ext: &str, bytes: &[u8]) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::Cache(format!("creating holdings cache dir: {e}")))?;
        let path = self.path_for(etf_isin, ext);
        std::fs::write(&path, bytes).map_err(|e| EngineError::Cache(format!("writing manual file: {e}")))?;
        let meta_path = path.with_extension(format!("{ext}.meta"));
        std::fs::write(&meta_path, Utc::now().to_rfc3339())
            .map_err(|e| EngineError::Cache(format!("writing manual file sidecar: {e}")))?;
        Ok(())
    }

    /// Returns the path to the manually uploaded file for `etf_isin`, if one
    /// exists, preferring `xlsx` over `csv` over `pdf` when more than one is
    /// present (most to least structured).
    #[must_use]
    pub fn lookup(&self, etf_isin: &str) -> Option<PathBuf> {
        for ext in ["xlsx", "csv", "pdf"] {
            let path = self.path_for(etf_isin, ext);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}

/// Parse an uploaded holdings file into the canonical adapter row shape.
/// Dispatches on extension: `.xlsx` via `calamine`, `.csv` via `csv`, `.pdf`
/// via `pdf-extract`.
pub fn parse_manual_file(path: &Path) -> Result<Vec<HoldingRow>, EngineError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => parse_csv(path),
        Some("xlsx") => parse_xlsx(path),
        Some("pdf") => parse_pdf(path),
        other => Err(EngineError::Data(format!("unsupported manual holdings file type: {other:?}"))),
    }
}

/// Matches a column gap in PDF-extracted text: two or more spaces, or a tab.
/// PDF extraction keeps characters in reading order but not true cell
/// boundaries, so this is a heuristic, not an exact table-grid parse.
static PDF_COLUMN_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}|\t").expect("static regex"));

fn tokenize_pdf_line(line: &str) -> Vec<String> {
    PDF_COLUMN_GAP.split(line.trim()).map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string).collect()
}

fn parse_pdf(path: &Path) -> Result<Vec<HoldingRow>, EngineError> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| EngineError::Data(format!("extracting manual PDF text: {e}")))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let header_line = lines
        .find(|line| tokenize_pdf_line(line).iter().any(|f| f.eq_ignore_ascii_case("ticker")))
        .ok_or_else(|| EngineError::Data("manual PDF has no recognizable holdings table header".to_string()))?;
    let headers = tokenize_pdf_line(header_line);

    let mut rows = Vec::new();
    for line in lines {
        let fields = tokenize_pdf_line(line);
        if fields.len() < 2 {
            continue;
        }
        rows.push(row_from_named_fields(&headers, &fields)?);
    }
    Ok(rows)
}

fn parse_csv(path: &Path) -> Result<Vec<HoldingRow>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| EngineError::Data(format!("opening manual CSV: {e}")))?;
    let headers = reader
        .headers()
        .map_err(|e| EngineError::Data(format!("reading CSV headers: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::Data(format!("reading CSV row: {e}")))?;
        rows.push(row_from_fields(&headers, &record)?);
    }
    Ok(rows)
}

fn parse_xlsx(path: &Path) -> Result<Vec<HoldingRow>, EngineError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| EngineError::Data(format!("opening manual XLSX: {e}")))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Data("manual XLSX has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| EngineError::Data(format!("reading manual XLSX sheet: {e}")))?;
    let mut rows_iter = range.rows();
    let header_row = rows_iter
        .next()
        .ok_or_else(|| EngineError::Data("manual XLSX has no header row".to_string()))?;
    let headers: Vec<String> = header_row.iter().map(calamine::DataType::to_string).collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let fields: Vec<String> = row.iter().map(calamine::DataType::to_string).collect();
        rows.push(row_from_named_fields(&headers, &fields)?);
    }
    Ok(rows)
}

fn row_from_fields(headers: &csv::StringRecord, record: &csv::StringRecord) -> Result<HoldingRow, EngineError> {
    let field = |name: &str| -> Option<String> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    build_row(field)
}

fn row_from_named_fields(headers: &[String], fields: &[String]) -> Result<HoldingRow, EngineError> {
    let field = |name: &str| -> Option<String> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|idx| fields.get(idx))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    build_row(field)
}

fn build_row(field: impl Fn(&str) -> Option<String>) -> Result<HoldingRow, EngineError> {
    let ticker = field("ticker").ok_or_else(|| EngineError::Data("manual row missing ticker".to_string()))?;
    let name = field("name").unwrap_or_else(|| ticker.clone());
    let weight_raw =
        field("weight").ok_or_else(|| EngineError::Data("manual row missing weight".to_string()))?;
    let weight: f64 = weight_raw
        .trim_end_matches('%')
        .parse()
        .map_err(|_| EngineError::Data(format!("manual row weight not numeric: {weight_raw}")))?;
    let weight = if weight > 1.0 { weight / 100.0 } else { weight };
    Ok(HoldingRow {
        ticker,
        name,
        weight,
        isin: field("isin"),
        sector: field("sector"),
        country: field("country"),
        currency: field("currency"),
    })
}
