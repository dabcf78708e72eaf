//! Curated image catalog: loading and cleaning
//!
//! The catalog is a JSON array exported from the curation spreadsheet. Each
//! record names a style, an image file and its generated description. Records
//! that cannot be indexed are skipped and counted, never fatal.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::IndexError;

/// One raw catalog row. Every field is optional until cleaning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogRecord {
    #[serde(rename = "Style", default)]
    pub style: Option<String>,
    #[serde(rename = "File Name", default)]
    pub file_name: Option<String>,
    #[serde(rename = "Generated Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Generated Description", default)]
    pub description: Option<String>,
}

/// A record that passed cleaning, with serving paths resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub style: String,
    pub title: Option<String>,
    pub description: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub total: usize,
    pub kept: usize,
    /// Rows that were not JSON objects of strings.
    pub malformed: usize,
    pub missing_fields: usize,
    pub missing_files: usize,
    pub duplicates: usize,
}

impl CleanReport {
    pub fn skipped(&self) -> usize {
        self.total - self.kept
    }
}

/// Read the catalog file. Rows are returned raw so one bad row does not sink
/// the whole file.
pub fn load_catalog(path: &Path) -> Result<Vec<serde_json::Value>, IndexError> {
    let text = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&text)
}

pub fn parse_catalog(text: &str) -> Result<Vec<serde_json::Value>, IndexError> {
    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(rows) => Ok(rows),
        _ => Err(IndexError::NotAnArray),
    }
}

fn non_blank(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Validate rows and resolve their paths under `image_root`.
///
/// `path` is `<image_root>/<style>/images/<file>` and `url` is
/// `/static/<style>/images/<file>`, with the style lowercased. The same
/// lowercased style and file name form the id; the first row with a given id
/// wins.
pub fn clean(
    rows: Vec<serde_json::Value>,
    image_root: &Path,
    require_files: bool,
) -> (Vec<CatalogEntry>, CleanReport) {
    let mut report = CleanReport {
        total: rows.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(rows.len());

    for (row, value) in rows.into_iter().enumerate() {
        let record: CatalogRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(row, error = %e, "Skipping malformed catalog row");
                report.malformed += 1;
                continue;
            }
        };

        let (Some(style), Some(file_name), Some(description)) = (
            non_blank(record.style),
            non_blank(record.file_name),
            non_blank(record.description),
        ) else {
            tracing::debug!(row, "Skipping catalog row with missing fields");
            report.missing_fields += 1;
            continue;
        };

        let style_dir = style.to_lowercase();
        let path = image_root.join(&style_dir).join("images").join(&file_name);
        if require_files && !path.is_file() {
            tracing::warn!(row, path = %path.display(), "Image file not found, skipping");
            report.missing_files += 1;
            continue;
        }

        let id = format!("{style_dir}/{file_name}");
        if !seen.insert(id.clone()) {
            tracing::warn!(row, id = %id, "Duplicate catalog entry, keeping the first");
            report.duplicates += 1;
            continue;
        }

        entries.push(CatalogEntry {
            url: format!("/static/{style_dir}/images/{file_name}"),
            path: path.to_string_lossy().into_owned(),
            id,
            style,
            title: non_blank(record.title),
            description,
        });
    }

    report.kept = entries.len();
    (entries, report)
}
