//! Core domain types for the recycling ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Grams, Points};

/// User identifier (the identity provider's subject key).
pub type UserId = String;

/// Machine (kiosk) identifier.
pub type MachineId = String;

/// Waste-type identifier as used by the catalog, e.g. `"1"` for plastic bottles.
pub type WasteTypeId = String;

/// Transaction identifier, assigned sequentially by the ledger.
pub type TxId = u64;

/// Code a user presents to claim a kiosk transaction.
pub type ClaimCode = String;

/// The acting user of an account-facing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Identity known only by its key; the key doubles as display name.
    pub fn from_id(id: impl Into<UserId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}

/// One `{wasteTypeId, count}` entry of a deposit. `count` is expressed in the
/// waste type's unit (items, grams or kilograms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub waste_type_id: WasteTypeId,
    pub count: u64,
}

impl LineItem {
    pub fn new(waste_type_id: impl Into<WasteTypeId>, count: u64) -> Self {
        Self {
            waste_type_id: waste_type_id.into(),
            count,
        }
    }
}

/// A line item priced with the rule in force at deposit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub waste_type_id: WasteTypeId,
    pub count: u64,
    pub points_awarded: Points,
    pub weight: Grams,
}

/// Physical location of a machine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Recorded at a kiosk, waiting for a user to claim it.
    Pending,
    /// Entered directly by an authenticated user; applied on creation.
    Completed,
    /// Claimed by a user; terminal.
    Claimed,
}

/// A deposit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    /// Absent for direct deposits, which have no kiosk.
    pub machine_id: Option<MachineId>,
    pub user_id: Option<UserId>,
    /// Display name captured when the transaction was linked to a user.
    pub user_name: Option<String>,
    pub lines: Vec<PricedLine>,
    pub total_points: Points,
    pub total_weight: Grams,
    pub claim_code: Option<ClaimCode>,
    pub status: TransactionStatus,
    pub machine_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Number of units deposited across all lines.
    pub fn unit_count(&self) -> u64 {
        self.lines.iter().map(|l| l.count).sum()
    }
}

/// A minted reward-redemption code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub code: String,
    pub reward_name: String,
    pub cost: Points,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Redemption {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A command representing the possible inputs of the ledger's batch runner.
#[derive(Debug, Clone)]
pub enum Command {
    /// A kiosk deposit. `reference` is a batch-local label later claims use
    /// to find the generated claim code.
    Deposit {
        machine: MachineId,
        reference: String,
        items: Vec<LineItem>,
    },
    /// Claim the deposit recorded under `reference`.
    Claim { user: Identity, reference: String },
    /// A deposit entered by an authenticated user, applied immediately.
    DirectDeposit { user: Identity, items: Vec<LineItem> },
    /// Spend points on a reward.
    Redeem {
        user: UserId,
        reward: String,
        cost: Points,
    },
}
