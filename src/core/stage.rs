//! The closed set of pipeline stages and everything the controller needs to
//! know about each one: canonical order, dependencies, done-flag location,
//! template name, and which outputs a confirmed rerun wipes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "qc_raw")]
    QcRaw,
    #[serde(rename = "trim")]
    Trim,
    #[serde(rename = "qc_trimmed")]
    QcTrimmed,
    #[serde(rename = "star")]
    Star,
    #[serde(rename = "featurecounts")]
    FeatureCounts,
    #[serde(rename = "deseq2")]
    Deseq2,
}

impl Stage {
    /// Canonical pipeline order. Every run's stage map holds exactly these.
    pub const ALL: [Stage; 6] = [
        Stage::QcRaw,
        Stage::Trim,
        Stage::QcTrimmed,
        Stage::Star,
        Stage::FeatureCounts,
        Stage::Deseq2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::QcRaw => "qc_raw",
            Stage::Trim => "trim",
            Stage::QcTrimmed => "qc_trimmed",
            Stage::Star => "star",
            Stage::FeatureCounts => "featurecounts",
            Stage::Deseq2 => "deseq2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "qc_raw" => Some(Stage::QcRaw),
            "trim" => Some(Stage::Trim),
            "qc_trimmed" => Some(Stage::QcTrimmed),
            "star" => Some(Stage::Star),
            "featurecounts" => Some(Stage::FeatureCounts),
            "deseq2" => Some(Stage::Deseq2),
            _ => None,
        }
    }

    /// Direct prerequisites; transitive closure follows from the chain.
    pub fn depends_on(self) -> &'static [Stage] {
        match self {
            Stage::QcRaw => &[],
            Stage::Trim => &[Stage::QcRaw],
            Stage::QcTrimmed => &[Stage::Trim],
            Stage::Star => &[Stage::Trim],
            Stage::FeatureCounts => &[Stage::Star],
            Stage::Deseq2 => &[Stage::FeatureCounts],
        }
    }

    /// Completion flag, relative to the run directory. Its presence is the
    /// authoritative completion signal regardless of stored state.
    pub fn done_flag(self) -> &'static str {
        match self {
            Stage::QcRaw => "qc_raw/qc_raw_done.flag",
            Stage::Trim => "trimmed/trimming_done.flag",
            Stage::QcTrimmed => "qc_trimmed/qc_trimmed_done.flag",
            Stage::Star => "star/star_alignment_done.flag",
            Stage::FeatureCounts => "featurecounts/featurecounts_done.flag",
            Stage::Deseq2 => "logs/deseq2_done.flag",
        }
    }

    /// Template file under `install_dir/slurm_templates/`.
    pub fn template_name(self) -> String {
        format!("{}.template", self.as_str())
    }

    /// Primary output artifacts removed on a confirmed rerun, relative to the
    /// run directory. Only the final path segment may carry a `*` wildcard.
    /// `logs/` subdirectories and `star/genome_index/` are never listed here.
    pub fn cleanup_globs(self) -> &'static [&'static str] {
        match self {
            Stage::QcRaw => &["qc_raw/fastqc_out", "qc_raw/multiqc_out"],
            Stage::Trim => &["trimmed/*_paired.fq.gz", "trimmed/*_unpaired.fq.gz"],
            Stage::QcTrimmed => &["qc_trimmed/fastqc_out", "qc_trimmed/multiqc_out"],
            Stage::Star => &[
                "star/*.bam",
                "star/*.bam.bai",
                "star/*_Log.final.out",
                "star/*_Log.out",
                "star/*_Log.progress.out",
                "star/*_SJ.out.tab",
                "star/*_STARtmp",
            ],
            Stage::FeatureCounts => &[
                "featurecounts/counts.txt",
                "featurecounts/counts.txt.summary",
            ],
            Stage::Deseq2 => &["deseq2/*.csv", "deseq2/summary.txt"],
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_and_names_round_trip() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["qc_raw", "trim", "qc_trimmed", "star", "featurecounts", "deseq2"]
        );
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::from_name("bogus"), None);
    }

    #[test]
    fn dependencies_point_backwards() {
        for (idx, stage) in Stage::ALL.iter().enumerate() {
            for dep in stage.depends_on() {
                let dep_idx = Stage::ALL.iter().position(|s| s == dep).unwrap();
                assert!(dep_idx < idx, "{stage} depends on later stage {dep}");
            }
        }
    }

    #[test]
    fn done_flags_live_inside_stage_directories() {
        assert_eq!(Stage::Trim.done_flag(), "trimmed/trimming_done.flag");
        assert_eq!(Stage::Deseq2.done_flag(), "logs/deseq2_done.flag");
    }
}
