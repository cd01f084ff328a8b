use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Tier;

/// Lifecycle status of a backup attempt as reported by the workflow backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Running,
    Available,
    Error,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Running => "running",
            BackupStatus::Available => "available",
            BackupStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(BackupStatus::Running),
            "available" => Ok(BackupStatus::Available),
            "error" => Ok(BackupStatus::Error),
            other => Err(format!("unknown backup status '{}'", other)),
        }
    }
}

/// Progress of a backup's removal through the deletion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionStatus {
    None,
    Deleting,
    Deleted,
    DeleteError,
}

impl DeletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStatus::None => "none",
            DeletionStatus::Deleting => "deleting",
            DeletionStatus::Deleted => "deleted",
            DeletionStatus::DeleteError => "delete-error",
        }
    }
}

impl std::fmt::Display for DeletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeletionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DeletionStatus::None),
            "deleting" => Ok(DeletionStatus::Deleting),
            "deleted" => Ok(DeletionStatus::Deleted),
            "delete-error" => Ok(DeletionStatus::DeleteError),
            other => Err(format!("unknown deletion status '{}'", other)),
        }
    }
}

/// Retention tags of a backup record: `reference` plus one flag per tier.
///
/// Written exclusively by the tagging engine, which clears and recomputes
/// every flag on each pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub reference: bool,
    pub minutely: bool,
    pub hourly: bool,
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
    pub yearly: bool,
}

impl TagSet {
    pub fn all() -> TagSet {
        TagSet {
            reference: true,
            minutely: true,
            hourly: true,
            daily: true,
            weekly: true,
            monthly: true,
            yearly: true,
        }
    }

    pub fn get(&self, tier: Tier) -> bool {
        match tier {
            Tier::Minutely => self.minutely,
            Tier::Hourly => self.hourly,
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
            Tier::Monthly => self.monthly,
            Tier::Yearly => self.yearly,
        }
    }

    pub fn is_untagged(&self) -> bool {
        Tier::ALL.iter().all(|t| !self.get(*t))
    }

    /// Tag names carried by this set, for API responses and logging.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.reference {
            names.push("reference");
        }
        for tier in Tier::ALL {
            if self.get(tier) {
                names.push(tier.as_str());
            }
        }
        names
    }
}

/// A recorded backup attempt. One row per finished create operation; the row
/// outlives the backup itself (deletion flips `deletion_status`, it never
/// removes the row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// External operation id of the create workflow.
    pub id: String,
    pub policy_name: String,
    /// External data reference used to request removal.
    pub data_ref: Option<String>,
    pub status: BackupStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub size_mb: Option<f64>,
    pub deletion_status: DeletionStatus,
    pub running_delete_operation: Option<String>,
    pub tags: TagSet,
}

/// Fields of a record being materialized from a finished create operation.
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub id: String,
    pub policy_name: String,
    pub data_ref: Option<String>,
    pub status: BackupStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub size_mb: Option<f64>,
}

/// Tag filter for ledger listings: either the `reference` flag or a tier flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    Reference,
    Tier(Tier),
}

impl std::str::FromStr for TagFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "reference" {
            return Ok(TagFilter::Reference);
        }
        s.parse::<Tier>().map(TagFilter::Tier)
    }
}

/// Filters for ledger listings. `None` fields are unconstrained; results are
/// most-recent-first unless `random_order` is set.
#[derive(Debug, Clone, Default)]
pub struct BackupQuery {
    pub limit: Option<u32>,
    pub tag: Option<TagFilter>,
    pub status: Option<BackupStatus>,
    pub deletion_status: Option<DeletionStatus>,
    pub random_order: bool,
}
