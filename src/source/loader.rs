use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use crate::project::model::Incident;

/// File extensions understood by [`load_components`], in lookup order.
pub const EXTENSIONS: [&str; 3] = ["parquet", "json", "csv"];

/// Raw samples of one station recording, before they are typed as series.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentData {
    pub delta_t: f64,
    #[serde(default)]
    pub start_time: f64,
    pub h1: Vec<f64>,
    pub h2: Vec<f64>,
    pub vertical: Vec<f64>,
}

impl ComponentData {
    fn check(self) -> Result<Self> {
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            bail!("delta_t must be positive, got {}", self.delta_t);
        }
        if !self.start_time.is_finite() {
            bail!("start_time must be finite, got {}", self.start_time);
        }
        let n = self.h1.len();
        if self.h2.len() != n || self.vertical.len() != n {
            bail!(
                "component lengths differ: h1 {}, h2 {}, vertical {}",
                n,
                self.h2.len(),
                self.vertical.len()
            );
        }
        for (name, values) in [("h1", &self.h1), ("h2", &self.h2), ("vertical", &self.vertical)] {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                bail!("{name} sample {i} is not finite ({})", values[i]);
            }
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load one station recording from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – Float64 columns `h1`, `h2`, `vertical`, `delta_t`, `start_time`
/// * `.json`    – `{ "delta_t": .., "start_time": .., "h1": [...], "h2": [...], "vertical": [...] }`
/// * `.csv`     – one row per sample, same column names
pub fn load_components(path: &Path) -> Result<ComponentData> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let data = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;
    data.check()
}

/// Load an incident description (source, stations) from JSON.
pub fn load_incident(path: &Path) -> Result<Incident> {
    let text = std::fs::read_to_string(path).context("reading incident file")?;
    let incident: Incident = serde_json::from_str(&text).context("parsing incident JSON")?;
    incident
        .validate()
        .with_context(|| format!("validating incident '{}'", incident.name))?;
    Ok(incident)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<ComponentData> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    serde_json::from_str(&text).context("parsing JSON")
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row, then one row per sample.
/// `delta_t` and `start_time` are read from the first row.
///
/// ```text
/// delta_t,start_time,h1,h2,vertical
/// 0.01,0.0,0.12,-0.03,0.004
/// ,,0.13,-0.02,0.005
/// ```
fn load_csv(path: &Path) -> Result<ComponentData> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CSV missing '{name}' column"))
    };
    let h1_idx = column("h1")?;
    let h2_idx = column("h2")?;
    let v_idx = column("vertical")?;
    let dt_idx = column("delta_t")?;
    let t0_idx = headers.iter().position(|h| h == "start_time");

    let mut data = ComponentData {
        delta_t: f64::NAN,
        start_time: 0.0,
        h1: Vec::new(),
        h2: Vec::new(),
        vertical: Vec::new(),
    };

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let field = |idx: usize, col: &str| -> Result<f64> {
            let tok = record.get(idx).unwrap_or("").trim();
            tok.parse::<f64>()
                .with_context(|| format!("Row {row_no}, {col}: '{tok}' is not a number"))
        };

        if row_no == 0 {
            data.delta_t = field(dt_idx, "delta_t")?;
            if let Some(idx) = t0_idx {
                data.start_time = field(idx, "start_time")?;
            }
        }
        data.h1.push(field(h1_idx, "h1")?);
        data.h2.push(field(h2_idx, "h2")?);
        data.vertical.push(field(v_idx, "vertical")?);
    }

    if data.h1.is_empty() {
        bail!("CSV has no sample rows");
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file holding one recording.
///
/// Expected schema:
/// - `h1`, `h2`, `vertical`: Float64 (or Float32), one row per sample
/// - `delta_t`, `start_time`: numeric, read from the first row
fn load_parquet(path: &Path) -> Result<ComponentData> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut data = ComponentData {
        delta_t: f64::NAN,
        start_time: 0.0,
        h1: Vec::new(),
        h2: Vec::new(),
        vertical: Vec::new(),
    };
    let mut first = true;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
        };

        data.h1.extend(f64_values(column("h1")?).context("reading 'h1'")?);
        data.h2.extend(f64_values(column("h2")?).context("reading 'h2'")?);
        data.vertical
            .extend(f64_values(column("vertical")?).context("reading 'vertical'")?);

        if first && batch.num_rows() > 0 {
            data.delta_t = f64_values(column("delta_t")?).context("reading 'delta_t'")?[0];
            if let Ok(col) = column("start_time") {
                data.start_time = f64_values(col).context("reading 'start_time'")?[0];
            }
            first = false;
        }
    }

    if data.h1.is_empty() {
        bail!("Parquet file has no rows");
    }
    Ok(data)
}

// -- Parquet / Arrow helpers --

/// Every value of a numeric column as `f64`. Nulls are rejected.
fn f64_values(col: &Arc<dyn Array>) -> Result<Vec<f64>> {
    if col.null_count() > 0 {
        bail!("column contains {} null value(s)", col.null_count());
    }
    let any = col.as_any();
    let values = match col.data_type() {
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .context("expected Float64Array")?
            .values()
            .to_vec(),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .context("expected Float32Array")?
            .values()
            .iter()
            .map(|&v| v as f64)
            .collect(),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .context("expected Int64Array")?
            .values()
            .iter()
            .map(|&v| v as f64)
            .collect(),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .context("expected Int32Array")?
            .values()
            .iter()
            .map(|&v| v as f64)
            .collect(),
        other => bail!("Expected a numeric column, got {other:?}"),
    };
    Ok(values)
}
