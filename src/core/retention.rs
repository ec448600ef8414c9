//! Tiered retention planning.
//!
//! Snapshots are walked newest first. Each tier (daily, weekly, monthly,
//! yearly) keeps a snapshot when it is the first one seen in a new period and
//! the tier still has budget. A snapshot kept by any tier survives; every
//! other snapshot is forgotten. Periods are computed in UTC.

use crate::models::backup::{RetentionPolicy, Snapshot};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    const ALL: [Tier; 4] = [Tier::Daily, Tier::Weekly, Tier::Monthly, Tier::Yearly];

    fn budget(self, policy: &RetentionPolicy) -> usize {
        match self {
            Tier::Daily => policy.daily,
            Tier::Weekly => policy.weekly,
            Tier::Monthly => policy.monthly,
            Tier::Yearly => policy.yearly,
        }
    }

    fn period(self, time: &DateTime<Utc>) -> String {
        match self {
            Tier::Daily => time.format("%Y-%m-%d").to_string(),
            Tier::Weekly => {
                let week = time.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Tier::Monthly => time.format("%Y-%m").to_string(),
            Tier::Yearly => time.format("%Y").to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Kept {
    pub snapshot: Snapshot,
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionPlan {
    /// Newest first.
    pub keep: Vec<Kept>,
    /// Newest first.
    pub forget: Vec<Snapshot>,
}

impl RetentionPlan {
    pub fn forget_ids(&self) -> Vec<&str> {
        self.forget.iter().map(|s| s.id.as_str()).collect()
    }
}

pub fn plan(snapshots: &[Snapshot], policy: &RetentionPolicy) -> RetentionPlan {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    // ties broken by id so the plan does not depend on listing order
    ordered.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.id.cmp(&b.id)));

    let mut remaining: Vec<usize> = Tier::ALL.iter().map(|t| t.budget(policy)).collect();
    let mut last_period: Vec<Option<String>> = vec![None; Tier::ALL.len()];
    let mut result = RetentionPlan::default();

    for snapshot in ordered {
        let mut tiers = Vec::new();
        for (i, tier) in Tier::ALL.iter().enumerate() {
            if remaining[i] == 0 {
                continue;
            }
            let period = tier.period(&snapshot.time);
            if last_period[i].as_deref() != Some(period.as_str()) {
                last_period[i] = Some(period);
                remaining[i] -= 1;
                tiers.push(*tier);
            }
        }
        if tiers.is_empty() {
            result.forget.push(snapshot.clone());
        } else {
            result.keep.push(Kept {
                snapshot: snapshot.clone(),
                tiers,
            });
        }
    }
    result
}
