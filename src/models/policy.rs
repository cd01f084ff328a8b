use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The six retention granularities of the rotation scheme, ordered from
/// finest to coarsest. The ordering is load-bearing: eviction exclusivity is
/// defined over "coarser than" and the tagging cascade walks the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Minutely,
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Minutely => "minutely",
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Yearly => "yearly",
        }
    }

    /// All tiers coarser than this one, in order.
    pub fn coarser(&self) -> &'static [Tier] {
        let idx = Tier::ALL.iter().position(|t| t == self).unwrap_or(0);
        &Tier::ALL[idx + 1..]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutely" => Ok(Tier::Minutely),
            "hourly" => Ok(Tier::Hourly),
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            "yearly" => Ok(Tier::Yearly),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Reference value within a tier's bucket that nearest-match selection is
/// measured against. `Last` is the "last unit in range" sentinel: it resolves
/// to the tier's maximum legal unit (59s, 59min, 23h, weekday 7, month 12) at
/// load time, except for the monthly tier where the maximum varies per bucket
/// and is resolved to the actual last day of the month during tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierReference {
    Unit(u32),
    Last,
}

impl TierReference {
    /// The maximum legal unit for the tier, or `None` for the monthly tier
    /// whose maximum depends on the bucket.
    pub fn last_unit(tier: Tier) -> Option<u32> {
        match tier {
            Tier::Minutely | Tier::Hourly => Some(59),
            Tier::Daily => Some(23),
            Tier::Weekly => Some(7),
            Tier::Monthly => None,
            Tier::Yearly => Some(12),
        }
    }

    /// Resolve the sentinel for a fixed-maximum tier.
    pub fn resolve(&self, tier: Tier) -> Option<u32> {
        match self {
            TierReference::Unit(v) => Some(*v),
            TierReference::Last => Self::last_unit(tier),
        }
    }
}

impl std::fmt::Display for TierReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierReference::Unit(v) => write!(f, "{}", v),
            TierReference::Last => f.write_str("L"),
        }
    }
}

/// Per-tier retention configuration: how many backups to keep at this tier
/// and the reference value for nearest-match selection.
///
/// Serialized in the compact `"N@R"` form (`"4@L"`, `"2@59"`); a bare `"N"`
/// implies `@L`, and the empty string means the tier is disabled (`"0@L"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TierPolicy {
    pub retain: u32,
    pub reference: TierReference,
}

impl TierPolicy {
    pub const DISABLED: TierPolicy = TierPolicy {
        retain: 0,
        reference: TierReference::Last,
    };
}

impl std::str::FromStr for TierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(TierPolicy::DISABLED);
        }
        let (retain_part, ref_part) = match s.split_once('@') {
            Some((r, v)) => (r, Some(v)),
            None => (s, None),
        };
        let retain: u32 = retain_part
            .parse()
            .map_err(|_| format!("invalid retain count '{}'", retain_part))?;
        let reference = match ref_part {
            None | Some("") | Some("L") | Some("l") | Some("last") => TierReference::Last,
            Some(v) => TierReference::Unit(
                v.parse()
                    .map_err(|_| format!("invalid reference value '{}'", v))?,
            ),
        };
        Ok(TierPolicy { retain, reference })
    }
}

impl std::fmt::Display for TierPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.retain, self.reference)
    }
}

impl TryFrom<String> for TierPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TierPolicy> for String {
    fn from(p: TierPolicy) -> Self {
        p.to_string()
    }
}

/// A named backup policy: what workflow to launch, when the policy is
/// active, and the six-tier retention configuration.
///
/// `running_create_operation` carries the single-in-flight invariant: at most
/// one create operation may be outstanding per policy, and a new trigger is a
/// no-op while it is set and the operation is still running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub name: String,
    pub enabled: bool,
    pub workflow_name: String,
    pub workflow_version: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub minutely: TierPolicy,
    pub hourly: TierPolicy,
    pub daily: TierPolicy,
    pub weekly: TierPolicy,
    pub monthly: TierPolicy,
    pub yearly: TierPolicy,
    pub running_create_operation: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl BackupPolicy {
    pub fn tier(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Minutely => &self.minutely,
            Tier::Hourly => &self.hourly,
            Tier::Daily => &self.daily,
            Tier::Weekly => &self.weekly,
            Tier::Monthly => &self.monthly,
            Tier::Yearly => &self.yearly,
        }
    }

    /// Whether the policy may trigger backups at `now`: enabled and inside
    /// the `[from_date, to_date)` activation window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(from) = self.from_date
            && now < from
        {
            return false;
        }
        if let Some(to) = self.to_date
            && now >= to
        {
            return false;
        }
        true
    }

    /// Derive a 7-field cron expression (sec min hour dom month dow year)
    /// from the tier references when no explicit schedule is configured.
    /// The finest tier with a non-zero retain count drives the cadence.
    pub fn default_schedule(&self) -> String {
        let unit = |p: &TierPolicy, last: &str| match p.reference {
            TierReference::Unit(v) => v.to_string(),
            TierReference::Last => last.to_string(),
        };

        let m = unit(&self.minutely, "59");
        let h = unit(&self.hourly, "59");
        let d = unit(&self.daily, "23");
        let w = unit(&self.weekly, "SAT");
        let mo = self.monthly.reference.to_string();
        let y = unit(&self.yearly, "12");

        if self.minutely.retain != 0 {
            format!("{m} * * * * * *")
        } else if self.hourly.retain != 0 {
            format!("{m} {h} * * * * *")
        } else if self.daily.retain != 0 {
            format!("{m} {h} {d} * * * *")
        } else if self.weekly.retain != 0 {
            format!("{m} {h} {d} * * {w} *")
        } else if self.monthly.retain != 0 {
            format!("{m} {h} {d} {mo} * * *")
        } else {
            format!("{m} {h} {d} {mo} {y} * *")
        }
    }
}
