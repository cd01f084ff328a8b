//! Tagging cascade engine.
//!
//! After every successful backup completion, and immediately before every
//! retention pass, tier membership is recomputed for the policy's entire
//! backup history. Each tier selects, per time bucket, the single record
//! whose sub-unit value lies nearest the tier's reference value, and each
//! tier's candidate pool is the previous tier's winners, so a record promoted
//! to a coarse tier is by construction a locally-best candidate at every
//! finer tier. Weekly and monthly intentionally branch independently from
//! daily: a record may earn one without the other.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::{
    db::{BackupRepo, DbResult, DistanceFn, TagStep, TaggingPass, TaggingSummary},
    models::{BackupPolicy, Tier, TierReference},
    observability::metrics,
};

/// One entry of the cascade table: how a tier buckets timestamps, which
/// sub-unit it measures, and which tier feeds its candidate pool.
struct TierSpec {
    tier: Tier,
    prior: Option<Tier>,
    bucket_key: fn(DateTime<Utc>) -> String,
    unit: fn(DateTime<Utc>) -> i64,
}

const TIER_SPECS: [TierSpec; 6] = [
    TierSpec {
        tier: Tier::Minutely,
        prior: None,
        bucket_key: bucket_minute,
        unit: second_of_minute,
    },
    TierSpec {
        tier: Tier::Hourly,
        prior: Some(Tier::Minutely),
        bucket_key: bucket_hour,
        unit: minute_of_hour,
    },
    TierSpec {
        tier: Tier::Daily,
        prior: Some(Tier::Hourly),
        bucket_key: bucket_day,
        unit: hour_of_day,
    },
    TierSpec {
        tier: Tier::Weekly,
        prior: Some(Tier::Daily),
        bucket_key: bucket_week,
        unit: weekday,
    },
    TierSpec {
        tier: Tier::Monthly,
        prior: Some(Tier::Daily),
        bucket_key: bucket_month,
        unit: day_of_month,
    },
    TierSpec {
        tier: Tier::Yearly,
        prior: Some(Tier::Monthly),
        bucket_key: bucket_year,
        unit: month_of_year,
    },
];

fn bucket_minute(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M").to_string()
}

fn bucket_hour(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H").to_string()
}

fn bucket_day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// Monday-based week of year (week 1 starts at the first Monday; earlier
/// days fall into week 0), scoped inside year and month so a week spanning a
/// month boundary splits into two buckets.
fn bucket_week(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}-W{:02}", ts.year(), ts.month(), week_of_year(ts))
}

fn bucket_month(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

fn bucket_year(ts: DateTime<Utc>) -> String {
    ts.format("%Y").to_string()
}

fn week_of_year(ts: DateTime<Utc>) -> u32 {
    (ts.ordinal() + 6 - ts.weekday().num_days_from_monday()) / 7
}

fn second_of_minute(ts: DateTime<Utc>) -> i64 {
    ts.second() as i64
}

fn minute_of_hour(ts: DateTime<Utc>) -> i64 {
    ts.minute() as i64
}

fn hour_of_day(ts: DateTime<Utc>) -> i64 {
    ts.hour() as i64
}

/// Sunday = 0 … Saturday = 6; measured against the sentinel reference 7,
/// Saturday is the nearest weekday.
fn weekday(ts: DateTime<Utc>) -> i64 {
    ts.weekday().num_days_from_sunday() as i64
}

fn day_of_month(ts: DateTime<Utc>) -> i64 {
    ts.day() as i64
}

fn month_of_year(ts: DateTime<Utc>) -> i64 {
    ts.month() as i64
}

fn days_in_month(ts: DateTime<Utc>) -> i64 {
    let (year, month) = (ts.year(), ts.month());
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(first), Some(next)) => (next - first).num_days(),
        _ => 31,
    }
}

fn distance_fn(spec: &TierSpec, policy: &BackupPolicy) -> DistanceFn {
    let unit = spec.unit;
    match policy.tier(spec.tier).reference {
        // Monthly "last" tracks the actual end of each bucket's month.
        TierReference::Last if spec.tier == Tier::Monthly => {
            Box::new(move |ts| unit(ts) - days_in_month(ts))
        }
        reference => {
            let resolved = reference.resolve(spec.tier).unwrap_or(0) as i64;
            Box::new(move |ts| unit(ts) - resolved)
        }
    }
}

/// Build the generic tagging pass for a policy: one step per tier in cascade
/// order, with `reference` piggybacked on the base step, ending with the
/// forced all-flags record.
pub fn build_pass(policy: &BackupPolicy, force_all_on: String) -> TaggingPass {
    let steps = TIER_SPECS
        .iter()
        .map(|spec| TagStep {
            tier: spec.tier,
            set_reference: spec.tier == Tier::Minutely,
            prior: spec.prior,
            bucket_key: Box::new(spec.bucket_key),
            distance: distance_fn(spec, policy),
        })
        .collect();
    TaggingPass {
        steps,
        force_all_on,
    }
}

/// Run one tagging pass for the policy. Returns `None` when the policy has
/// no available backup to anchor the pass; the ledger is left untouched.
///
/// The pass executes as a single atomic unit: on any ledger failure the
/// prior tag state survives and the policy's retention is stale until the
/// next successful pass.
pub async fn run_tagging_pass(
    backups: &Arc<dyn BackupRepo>,
    policy: &BackupPolicy,
) -> DbResult<Option<TaggingSummary>> {
    let Some(latest) = backups.latest_available(&policy.name).await? else {
        tracing::debug!(policy = %policy.name, "No available backups, skipping tagging");
        return Ok(None);
    };

    let pass = build_pass(policy, latest.id.clone());
    let summary = backups.apply_tagging(&policy.name, &pass).await?;

    for (tier, rows) in &summary.tagged {
        tracing::debug!(policy = %policy.name, tier = %tier, rows = rows, "Tagged tier winners");
    }
    tracing::debug!(
        policy = %policy.name,
        newest = %latest.id,
        total = summary.total_tagged(),
        "Tagging pass complete"
    );
    metrics::record_tagging_pass(&policy.name, summary.total_tagged());

    Ok(Some(summary))
}
