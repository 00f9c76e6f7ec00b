use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{Bucket, StatsTable};
use crate::model::{Identity, PricedLine, Redemption, UserId};
use crate::{Grams, Points};

/// Cumulative per-user recycling statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WasteStats {
    pub plastic_bottles: u64,
    pub glass_bottles: u64,
    pub aluminum_cans: u64,
    pub paper_grams: u64,
    pub e_waste: u64,
    pub total_weight: Grams,
    pub transactions_count: u64,
}

impl WasteStats {
    fn bucket_mut(&mut self, bucket: Bucket) -> &mut u64 {
        match bucket {
            Bucket::PlasticBottles => &mut self.plastic_bottles,
            Bucket::GlassBottles => &mut self.glass_bottles,
            Bucket::AluminumCans => &mut self.aluminum_cans,
            Bucket::PaperGrams => &mut self.paper_grams,
            Bucket::EWaste => &mut self.e_waste,
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::PlasticBottles => self.plastic_bottles,
            Bucket::GlassBottles => self.glass_bottles,
            Bucket::AluminumCans => self.aluminum_cans,
            Bucket::PaperGrams => self.paper_grams,
            Bucket::EWaste => self.e_waste,
        }
    }
}

/// A user's points balance, statistics and redemption history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAccount {
    pub id: UserId,
    pub name: String,
    pub points: Points,
    pub stats: WasteStats,
    pub redemptions: Vec<Redemption>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(identity: &Identity, now: DateTime<Utc>) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.display_name.clone(),
            points: Points::ZERO,
            stats: WasteStats::default(),
            redemptions: Vec::new(),
            created_at: now,
        }
    }

    /// Add `points` unless the balance would overflow; otherwise return the
    /// current balance and leave the account untouched.
    pub fn try_credit(&mut self, points: Points) -> Result<(), Points> {
        self.points = self.points.checked_add(points).ok_or(self.points)?;
        Ok(())
    }

    /// Deduct `cost` only if the balance covers it; otherwise return the
    /// current balance and leave the account untouched.
    pub fn try_debit(&mut self, cost: Points) -> Result<(), Points> {
        if self.points < cost {
            return Err(self.points);
        }
        self.points -= cost;
        Ok(())
    }
}

/// Apply one deposit to an account: route each line into its statistic
/// bucket, add its weight, count the transaction once and credit the points.
///
/// Lines whose waste type has no route in `table` are skipped for
/// statistics but their points are still part of `total_points`.
///
/// If crediting would overflow the balance nothing is applied and the
/// current balance is returned.
pub fn apply_deposit_to_account(
    account: &mut UserAccount,
    lines: &[PricedLine],
    total_points: Points,
    table: &StatsTable,
) -> Result<(), Points> {
    account.try_credit(total_points)?;
    for line in lines {
        let Some(route) = table.route(&line.waste_type_id) else {
            continue;
        };
        let bucket = account.stats.bucket_mut(route.bucket);
        *bucket = bucket.saturating_add(line.count);
        account.stats.total_weight += line.weight;
    }
    account.stats.transactions_count = account.stats.transactions_count.saturating_add(1);
    Ok(())
}
