//! Per-source artifact files

use crate::config::StorageFormat;
use crate::extract::Item;
use crate::output::{write_json, OutputResult, SourceMeta};
use crate::pipeline::PipelineOutput;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column holding the full item as JSON in SQLite item files
const JSON_COLUMN: &str = "_json";

/// Artifact directory of one source within a run
#[derive(Debug, Clone)]
pub struct SourceArtifacts {
    dir: PathBuf,
    format: StorageFormat,
}

impl SourceArtifacts {
    /// Creates `<run_dir>/<source_id>/`
    pub fn create(run_dir: &Path, source_id: &str, format: StorageFormat) -> OutputResult<Self> {
        let dir = run_dir.join(source_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn items_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, self.format.extension()))
    }

    /// Writes raw dumps, links and item files; returns the number of valid
    /// items saved
    pub fn write_output(&self, output: &PipelineOutput) -> OutputResult<u64> {
        write_jsonl(&self.dir.join("raw_listing.jsonl"), &output.raw_listing)?;
        write_jsonl(&self.dir.join("raw_detail.jsonl"), &output.raw_detail)?;
        write_jsonl(&self.dir.join("links.jsonl"), &output.links)?;

        write_items(&self.items_path("items"), &output.items, self.format)?;
        let saved = write_items(&self.items_path("items_valid"), &output.valid, self.format)?;
        write_items(&self.items_path("items_dropped"), &output.dropped, self.format)?;

        tracing::debug!("Wrote artifacts to {}", self.dir.display());
        Ok(saved)
    }

    pub fn write_meta(&self, meta: &SourceMeta) -> OutputResult<()> {
        write_json(&self.dir.join("source_meta.json"), meta)
    }
}

/// Writes one JSON document per line; returns the record count
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> OutputResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(records.len() as u64)
}

/// Writes items in the requested format; returns the item count
pub fn write_items(path: &Path, items: &[Item], format: StorageFormat) -> OutputResult<u64> {
    match format {
        StorageFormat::Jsonl => write_jsonl(path, items),
        StorageFormat::Csv => write_csv(path, items),
        StorageFormat::Sqlite => write_sqlite(path, items),
    }
}

/// Union of item keys in first-seen order, `url` first
fn columns(items: &[Item]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        for key in item.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    if let Some(pos) = columns.iter().position(|c| c == "url") {
        let url = columns.remove(pos);
        columns.insert(0, url);
    }
    columns
}

/// Flattens a JSON value into a cell: strings as-is, null as empty
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_csv(path: &Path, items: &[Item]) -> OutputResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let columns = columns(items);

    if !columns.is_empty() {
        let header: Vec<String> = columns.iter().map(|c| csv_field(c)).collect();
        writeln!(writer, "{}", header.join(","))?;
    }

    for item in items {
        let row: Vec<String> = columns
            .iter()
            .map(|c| csv_field(&cell(item.get(c))))
            .collect();
        writeln!(writer, "{}", row.join(","))?;
    }

    writer.flush()?;
    Ok(items.len() as u64)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn write_sqlite(path: &Path, items: &[Item]) -> OutputResult<u64> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let mut conn = Connection::open(path)?;
    let columns: Vec<String> = columns(items)
        .into_iter()
        .filter(|c| c != JSON_COLUMN)
        .collect();

    let mut ddl = format!(
        "CREATE TABLE items (row_id INTEGER PRIMARY KEY, {} TEXT NOT NULL",
        quote_ident(JSON_COLUMN)
    );
    for column in &columns {
        ddl.push_str(&format!(", {} TEXT", quote_ident(column)));
    }
    ddl.push(')');
    conn.execute_batch(&ddl)?;

    let names: Vec<String> = std::iter::once(JSON_COLUMN.to_string())
        .chain(columns.iter().cloned())
        .map(|c| quote_ident(&c))
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    let insert = format!(
        "INSERT INTO items ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&insert)?;
        for item in items {
            let json = serde_json::to_string(item)?;
            let values: Vec<Option<String>> = std::iter::once(Some(json))
                .chain(columns.iter().map(|c| match item.get(c) {
                    None | Some(Value::Null) => None,
                    value => Some(cell(value)),
                }))
                .collect();
            stmt.execute(params_from_iter(values.iter()))?;
        }
    }
    tx.commit()?;

    Ok(items.len() as u64)
}
