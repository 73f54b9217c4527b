//! Read-only adapters over specific result artifacts: the featureCounts
//! assignment summary and the DESeq2 output set. These only parse what the
//! batch jobs wrote; the tools themselves are opaque to the orchestrator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::core::error::{PipelineError, PipelineResult};

// --- featureCounts ---------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCountsCategory {
    pub category: String,
    pub samples: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCountsSummary {
    pub summary: Vec<FeatureCountsCategory>,
    pub sample_names: Vec<String>,
    pub file_path: String,
}

/// Parse `featurecounts/counts.txt.summary`: a tab-separated table whose
/// header row is `Status` followed by one BAM path per sample.
pub fn featurecounts_summary(run_dir: &Path) -> PipelineResult<FeatureCountsSummary> {
    let path = run_dir.join("featurecounts").join("counts.txt.summary");
    let content = fs::read_to_string(&path).map_err(|_| {
        PipelineError::NotFound(
            "featureCounts summary not found; run the featurecounts stage first".to_string(),
        )
    })?;

    let mut lines = content.lines();
    let header = lines.next().unwrap_or_default();
    let sample_names: Vec<String> = header
        .split('\t')
        .skip(1)
        .map(sample_name_from_bam)
        .collect();

    let mut summary = Vec::new();
    for line in lines {
        let mut fields = line.split('\t');
        let Some(category) = fields.next().filter(|c| !c.is_empty()) else {
            continue;
        };
        let values: Vec<i64> = fields.map(|v| v.trim().parse().unwrap_or(0)).collect();
        let samples = sample_names
            .iter()
            .cloned()
            .zip(values)
            .collect::<BTreeMap<_, _>>();
        summary.push(FeatureCountsCategory {
            category: category.to_string(),
            samples,
        });
    }

    Ok(FeatureCountsSummary {
        summary,
        sample_names,
        file_path: path.to_string_lossy().to_string(),
    })
}

/// `star/s1_Aligned.sortedByCoord.out.bam` → `s1`.
fn sample_name_from_bam(column: &str) -> String {
    let stem = Path::new(column.trim())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| column.trim().to_string());
    stem.trim_end_matches(".bam")
        .trim_end_matches("_Aligned.sortedByCoord.out")
        .to_string()
}

// --- DESeq2 ----------------------------------------------------------------

pub const DESEQ2_FILE_TYPES: [&str; 5] = [
    "summary",
    "significant_degs",
    "full_results",
    "top_degs",
    "counts_matrix",
];

#[derive(Debug, Clone, Serialize)]
pub struct Deseq2Results {
    pub summary: BTreeMap<String, String>,
    pub significant_degs: Vec<serde_json::Map<String, Value>>,
    pub num_significant: usize,
    pub available_files: BTreeMap<String, Option<String>>,
}

fn deseq2_file_path(deseq2_dir: &Path, file_type: &str) -> Option<PathBuf> {
    match file_type {
        "summary" => Some(deseq2_dir.join("summary.txt")),
        "significant_degs" => Some(deseq2_dir.join("significant_degs.csv")),
        "full_results" => Some(deseq2_dir.join("full_results.csv")),
        "top_degs" => Some(deseq2_dir.join("top_degs.csv")),
        "counts_matrix" => Some(deseq2_dir.join("counts_matrix.csv")),
        _ => None,
    }
}

pub fn deseq2_results(run_dir: &Path) -> PipelineResult<Deseq2Results> {
    let deseq2_dir = run_dir.join("deseq2");
    if !deseq2_dir.is_dir() {
        return Err(PipelineError::NotFound(
            "DESeq2 results not found; run the deseq2 stage first".to_string(),
        ));
    }

    let summary_path = deseq2_dir.join("summary.txt");
    let degs_path = deseq2_dir.join("significant_degs.csv");
    if !summary_path.is_file() && !degs_path.is_file() {
        return Err(PipelineError::NotFound(
            "DESeq2 produced neither summary.txt nor significant_degs.csv".to_string(),
        ));
    }

    let mut summary = BTreeMap::new();
    if let Ok(content) = fs::read_to_string(&summary_path) {
        for line in content.lines() {
            // `key: value` lines only; R's `a = b` assignments are noise.
            if line.contains(':') && !line.contains('=') {
                if let Some((key, value)) = line.split_once(':') {
                    summary.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
    }

    let significant_degs = match fs::read_to_string(&degs_path) {
        Ok(content) => parse_deg_table(&content),
        Err(_) => Vec::new(),
    };

    let mut available_files = BTreeMap::new();
    for file_type in DESEQ2_FILE_TYPES {
        let path = deseq2_file_path(&deseq2_dir, file_type).unwrap();
        available_files.insert(
            file_type.to_string(),
            path.is_file().then(|| path.to_string_lossy().to_string()),
        );
    }

    Ok(Deseq2Results {
        num_significant: significant_degs.len(),
        summary,
        significant_degs,
        available_files,
    })
}

/// Resolve one downloadable DESeq2 file. Unknown `file_type` is a client
/// error; a known type whose file has not been produced yet is NotFound.
pub fn deseq2_download(run_dir: &Path, file_type: &str) -> PipelineResult<(PathBuf, &'static str)> {
    let deseq2_dir = run_dir.join("deseq2");
    if !deseq2_dir.is_dir() {
        return Err(PipelineError::NotFound("DESeq2 results not found".to_string()));
    }
    let path = deseq2_file_path(&deseq2_dir, file_type).ok_or_else(|| {
        PipelineError::InvalidRequest(format!(
            "invalid file type '{file_type}'; expected one of {}",
            DESEQ2_FILE_TYPES.join(", ")
        ))
    })?;
    if !path.is_file() {
        return Err(PipelineError::NotFound(format!(
            "DESeq2 file not found: {file_type}"
        )));
    }
    let content_type = if file_type == "summary" {
        "text/plain"
    } else {
        "text/csv"
    };
    Ok((path, content_type))
}

/// Parse the significant-DEGs CSV into display records: the four effect-size
/// columns are rounded to 4 decimals, p-values kept at full precision.
fn parse_deg_table(content: &str) -> Vec<serde_json::Map<String, Value>> {
    const ROUNDED: [&str; 4] = ["baseMean", "log2FoldChange", "lfcSE", "stat"];
    const FLOATS: [&str; 2] = ["pvalue", "padj"];

    let mut lines = content.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    let mut records = Vec::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let mut record = serde_json::Map::new();
        for (column, raw) in columns.iter().zip(line.split(',')) {
            let raw = raw.trim();
            let value = if ROUNDED.contains(column) {
                raw.parse::<f64>()
                    .ok()
                    .map(|v| (v * 10_000.0).round() / 10_000.0)
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else if FLOATS.contains(column) {
                raw.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            };
            record.insert(column.to_string(), value);
        }
        records.push(record);
    }
    records
}
