//! Run and stage state model persisted as `run_state.json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::stage::Stage;

pub const DEFAULT_ADAPTER_TYPE: &str = "NexteraPE-PE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl StageState {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Pending,
            job_id: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub account: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub status: RunStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageState>,
}

impl Run {
    pub fn new(
        run_id: String,
        name: Option<String>,
        description: Option<String>,
        account: String,
        adapter_type: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "adapter_type".to_string(),
            adapter_type.unwrap_or_else(|| DEFAULT_ADAPTER_TYPE.to_string()),
        );
        let stages = Stage::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), StageState::pending(now)))
            .collect();
        Self {
            run_id,
            name,
            description,
            account,
            parameters,
            status: RunStatus::Created,
            created_at: now,
            updated_at: now,
            stages,
        }
    }

    /// Placeholder surfaced in listings for directories whose state file is
    /// missing or unreadable. Never hidden, per the store contract.
    pub fn failed_placeholder(run_id: String, diagnostic: String, seen_at: DateTime<Utc>) -> Self {
        let mut run = Run::new(run_id, None, None, String::new(), None, seen_at);
        run.status = RunStatus::Failed;
        run.description = Some(diagnostic);
        run
    }

    pub fn adapter_type(&self) -> &str {
        self.parameters
            .get("adapter_type")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ADAPTER_TYPE)
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        &self.stages[stage.as_str()]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        self.stages
            .get_mut(stage.as_str())
            .expect("stage map holds every canonical stage")
    }

    /// Run status is derived from stage statuses: any failed wins, then all
    /// completed, then any running, otherwise created.
    pub fn derive_status(&mut self) {
        let states: Vec<StageStatus> = Stage::ALL
            .iter()
            .map(|s| self.stages[s.as_str()].status)
            .collect();
        self.status = if states.iter().any(|s| *s == StageStatus::Failed) {
            RunStatus::Failed
        } else if states.iter().all(|s| *s == StageStatus::Completed) {
            RunStatus::Completed
        } else if states.iter().any(|s| *s == StageStatus::Running) {
            RunStatus::Running
        } else {
            RunStatus::Created
        };
    }
}

/// Fixed-format timestamps (`2026-01-02T03:04:05Z`) so that load→save of a
/// state file is byte-stable.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
