//! Kiosk identity and fill state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{Location, MachineId};

/// Operational status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    Available,
    Full,
    Maintenance,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineStatus::Available => "available",
            MachineStatus::Full => "full",
            MachineStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// A physical deposit point.
///
/// Status is derived rather than stored, so a machine at or above its
/// maximum capacity always reports `Full` unless it is in maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    #[serde(default)]
    pub location: Location,
    /// Units currently held.
    #[serde(default)]
    pub capacity: u32,
    pub max_capacity: u32,
    #[serde(default)]
    pub maintenance: bool,
    /// Pending-approval gate; new machines start inactive.
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub secret: String,
}

impl Machine {
    /// A freshly registered, unapproved machine.
    pub fn new(
        id: impl Into<MachineId>,
        name: impl Into<String>,
        location: Location,
        max_capacity: u32,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location,
            capacity: 0,
            max_capacity,
            maintenance: false,
            active: false,
            secret: secret.into(),
        }
    }

    pub fn status(&self) -> MachineStatus {
        if self.maintenance {
            MachineStatus::Maintenance
        } else if self.capacity >= self.max_capacity {
            MachineStatus::Full
        } else {
            MachineStatus::Available
        }
    }

    pub fn accepts_deposits(&self) -> bool {
        self.status() == MachineStatus::Available
    }

    pub fn authenticate(&self, secret: &str) -> bool {
        !self.secret.is_empty() && self.secret == secret
    }

    /// Add deposited units, saturating at `max_capacity`.
    pub fn fill(&mut self, units: u64) {
        let units = u32::try_from(units).unwrap_or(u32::MAX);
        self.capacity = self.capacity.saturating_add(units).min(self.max_capacity);
    }

    /// Bin emptied by an operator.
    pub fn empty(&mut self) {
        self.capacity = 0;
    }
}
