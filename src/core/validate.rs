//! Stage preflight checks against the run directory: inputs present,
//! dependencies satisfied, references resolvable. Validation never mutates
//! anything; the rerun guard lives in the controller.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::core::run::{Run, StageStatus};
use crate::core::stage::Stage;

#[derive(Debug, Clone, Serialize)]
pub struct StageValidation {
    pub run_id: String,
    pub stage: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate one stage for a reconciled run. Dependency state comes from the
/// run's stage map; file checks go straight to disk.
pub fn validate_stage(
    run: &Run,
    stage: Stage,
    run_dir: &Path,
    shared_reference_dir: &Path,
) -> StageValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for dep in stage.depends_on() {
        if run.stage(*dep).status != StageStatus::Completed {
            errors.push(format!("dependency {dep} not completed"));
        }
    }

    match stage {
        Stage::QcRaw => check_raw_fastq(run_dir, &mut errors, &mut warnings),
        Stage::Trim => {
            check_raw_fastq(run_dir, &mut errors, &mut warnings);
            if run
                .parameters
                .get("adapter_type")
                .map(|a| a.is_empty())
                .unwrap_or(true)
            {
                warnings.push(
                    "no adapter type set; the default (NexteraPE-PE) will be used".to_string(),
                );
            }
        }
        Stage::QcTrimmed => {
            let paired = files_matching(&run_dir.join("trimmed"), |n| n.ends_with("_paired.fq.gz"));
            if paired.is_empty() {
                errors.push("no trimmed paired FASTQ files found in trimmed/".to_string());
            }
        }
        Stage::Star => {
            let trimmed = run_dir.join("trimmed");
            let forward = files_matching(&trimmed, |n| n.ends_with("_forward_paired.fq.gz"));
            let reverse = files_matching(&trimmed, |n| n.ends_with("_reverse_paired.fq.gz"));
            if forward.is_empty() {
                errors.push("no forward paired FASTQ files found in trimmed/".to_string());
            }
            if reverse.is_empty() {
                errors.push("no reverse paired FASTQ files found in trimmed/".to_string());
            }
            if !forward.is_empty() && !reverse.is_empty() && forward.len() != reverse.len() {
                errors.push(format!(
                    "mismatch: {} forward vs {} reverse paired files in trimmed/",
                    forward.len(),
                    reverse.len()
                ));
            }
            if !reference_resolvable(run_dir, shared_reference_dir, &[".fa", ".fasta"]) {
                errors.push(
                    "no reference genome FASTA (.fa or .fasta) found in reference/ or mapping_in/"
                        .to_string(),
                );
            }
            if !reference_resolvable(run_dir, shared_reference_dir, &[".gtf"]) {
                errors.push(
                    "no gene annotation GTF (.gtf) found in reference/ or mapping_in/".to_string(),
                );
            }
        }
        Stage::FeatureCounts => {
            let bams = files_matching(&run_dir.join("star"), |n| n.ends_with(".bam"));
            if bams.is_empty() {
                errors.push("no alignment BAM files found in star/".to_string());
            }
            if !reference_resolvable(run_dir, shared_reference_dir, &[".gtf"]) {
                errors.push(
                    "no gene annotation GTF (.gtf) found in reference/ or mapping_in/".to_string(),
                );
            }
        }
        Stage::Deseq2 => {
            if !run_dir.join("featurecounts").join("counts.txt").is_file() {
                errors.push("featurecounts/counts.txt not found; run featurecounts first".into());
            }
            check_metadata(run_dir, &mut errors, &mut warnings);
        }
    }

    StageValidation {
        run_id: run.run_id.clone(),
        stage: stage.as_str().to_string(),
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_raw_fastq(run_dir: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let fastq = files_matching(&run_dir.join("raw"), is_fastq);
    if fastq.is_empty() {
        errors.push("no FASTQ files found in raw/; upload paired *_1/*_2 .fq.gz files".into());
    } else if fastq.len() % 2 != 0 {
        warnings.push(format!(
            "found {} FASTQ files; expected an even number of paired files",
            fastq.len()
        ));
    }
}

fn check_metadata(run_dir: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let path = run_dir.join("metadata").join("metadata.csv");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            errors.push("metadata/metadata.csv not found".to_string());
            return;
        }
    };

    let mut lines = content.lines();
    let Some(header) = lines.next() else {
        errors.push("metadata.csv is empty".to_string());
        return;
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();
    let condition_idx = match columns.iter().position(|c| c == "condition") {
        Some(idx) => idx,
        None => {
            errors.push("metadata.csv header must contain a 'condition' column".to_string());
            return;
        }
    };
    if !columns.iter().any(|c| c == "sample_name") {
        errors.push("metadata.csv header must contain a 'sample_name' column".to_string());
    }

    let mut replicates: BTreeMap<String, usize> = BTreeMap::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        if let Some(value) = line.split(',').nth(condition_idx) {
            *replicates.entry(value.trim().to_string()).or_default() += 1;
        }
    }
    if replicates.len() < 2 {
        errors.push(format!(
            "metadata.csv needs at least 2 distinct condition values, found {}",
            replicates.len()
        ));
    }
    for (condition, count) in &replicates {
        if *count < 2 {
            warnings.push(format!(
                "condition '{condition}' has only {count} replicate; DESeq2 needs 2 or more for \
                 dispersion estimates"
            ));
        }
    }
}

/// Run-local `reference/` wins over the shared `mapping_in/` location.
fn reference_resolvable(run_dir: &Path, shared: &Path, extensions: &[&str]) -> bool {
    let local = files_matching(&run_dir.join("reference"), |n| {
        extensions.iter().any(|ext| n.ends_with(ext))
    });
    if !local.is_empty() {
        return true;
    }
    !files_matching(shared, |n| extensions.iter().any(|ext| n.ends_with(ext))).is_empty()
}

fn is_fastq(name: &str) -> bool {
    name.ends_with(".fq.gz") || name.ends_with(".fastq.gz")
}

fn files_matching(dir: &Path, pred: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| pred(n))
        .collect();
    names.sort();
    names
}

// --- FASTQ pair validation -------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SamplePair {
    pub sample_name: String,
    pub forward_file: String,
    pub reverse_file: String,
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleValidation {
    pub total_files: usize,
    pub valid_pairs: Vec<SamplePair>,
    pub unpaired_files: Vec<String>,
    pub issues: Vec<String>,
}

/// Group `raw/` FASTQ files into forward/reverse pairs by `_1`/`_2` suffix.
pub fn validate_sample_pairs(run_dir: &Path) -> SampleValidation {
    let fastq = files_matching(&run_dir.join("raw"), is_fastq);

    let mut pairs: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    let mut unpaired = Vec::new();

    for name in &fastq {
        if let Some(sample) = strip_mate_suffix(name, "_1") {
            pairs.entry(sample).or_default().0 = Some(name.clone());
        } else if let Some(sample) = strip_mate_suffix(name, "_2") {
            pairs.entry(sample).or_default().1 = Some(name.clone());
        } else {
            unpaired.push(name.clone());
        }
    }

    let mut valid_pairs = Vec::new();
    let mut issues = Vec::new();
    for (sample_name, (forward, reverse)) in pairs {
        let mut missing = Vec::new();
        if forward.is_none() {
            missing.push("forward (_1)".to_string());
        }
        if reverse.is_none() {
            missing.push("reverse (_2)".to_string());
        }
        if !missing.is_empty() {
            issues.push(format!("sample {sample_name} missing: {}", missing.join(", ")));
        }
        valid_pairs.push(SamplePair {
            sample_name,
            forward_file: forward.unwrap_or_default(),
            reverse_file: reverse.unwrap_or_default(),
            valid: missing.is_empty(),
            issues: missing,
        });
    }

    SampleValidation {
        total_files: fastq.len(),
        valid_pairs,
        unpaired_files: unpaired,
        issues,
    }
}

fn strip_mate_suffix(name: &str, mate: &str) -> Option<String> {
    for ext in [".fq.gz", ".fastq.gz"] {
        if let Some(stem) = name.strip_suffix(ext) {
            if let Some(sample) = stem.strip_suffix(mate) {
                return Some(sample.to_string());
            }
        }
    }
    None
}
