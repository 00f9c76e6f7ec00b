//! Error types for ledger operations.

use std::time::Duration;
use thiserror::Error;

use crate::Points;
use crate::catalog::CatalogError;
use crate::machine::MachineStatus;
use crate::model::{ClaimCode, MachineId, UserId, WasteTypeId};

/// Stable error classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientPoints,
    UnknownWasteType,
    Inactive,
    InvalidInput,
    /// Retryable infrastructure failure, not a business-rule rejection.
    Transient,
}

/// Top-level error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("deposit failed: {0}")]
    Deposit(#[from] DepositError),

    #[error("claim failed: {0}")]
    Claim(#[from] ClaimError),

    #[error("redemption failed: {0}")]
    Redeem(#[from] RedeemError),

    #[error("admin operation failed: {0}")]
    Admin(#[from] AdminError),

    #[error("ledger store unavailable: {0}")]
    Transient(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Deposit(e) => match e {
                DepositError::MachineNotFound(_) => ErrorKind::NotFound,
                DepositError::MachineInactive(_) => ErrorKind::Inactive,
                DepositError::MachineUnavailable(..) => ErrorKind::InvalidState,
                DepositError::MachineUnauthorized(_) => ErrorKind::InvalidInput,
                DepositError::Catalog(CatalogError::UnknownWasteType(_)) => {
                    ErrorKind::UnknownWasteType
                }
                DepositError::Catalog(CatalogError::NegativeRate(_)) => ErrorKind::InvalidInput,
                DepositError::EmptyDeposit
                | DepositError::ZeroCount(_)
                | DepositError::PointsOverflow
                | DepositError::BalanceOverflow { .. } => ErrorKind::InvalidInput,
            },
            LedgerError::Claim(e) => match e {
                ClaimError::InvalidOrClaimedCode(_) => ErrorKind::InvalidState,
                ClaimError::BalanceOverflow { .. } => ErrorKind::InvalidInput,
            },
            LedgerError::Redeem(e) => match e {
                RedeemError::UserNotFound(_) => ErrorKind::NotFound,
                RedeemError::InsufficientPoints { .. } => ErrorKind::InsufficientPoints,
                RedeemError::InvalidCost(_) => ErrorKind::InvalidInput,
            },
            LedgerError::Admin(e) => match e {
                AdminError::MachineNotFound(_) => ErrorKind::NotFound,
                AdminError::MachineExists(_) => ErrorKind::InvalidState,
                AdminError::Catalog(_) => ErrorKind::InvalidInput,
            },
            LedgerError::Transient(_) => ErrorKind::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Error during kiosk or direct deposit processing.
#[derive(Debug, Error)]
pub enum DepositError {
    #[error("machine {0} not found")]
    MachineNotFound(MachineId),
    #[error("machine {0} is not approved")]
    MachineInactive(MachineId),
    #[error("machine {0} is {1}")]
    MachineUnavailable(MachineId, MachineStatus),
    #[error("machine {0} presented an invalid secret")]
    MachineUnauthorized(MachineId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("deposit has no line items")]
    EmptyDeposit,
    #[error("line item for waste type '{0}' has a zero count")]
    ZeroCount(WasteTypeId),
    #[error("deposit is worth more points than can be represented")]
    PointsOverflow,
    #[error("balance of user {user} ({balance}) cannot take {points} more points")]
    BalanceOverflow {
        user: UserId,
        balance: Points,
        points: Points,
    },
}

/// Error while claiming a kiosk transaction.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("code {0} is invalid or already claimed")]
    InvalidOrClaimedCode(ClaimCode),
    #[error("balance of user {user} ({balance}) cannot take {points} more points")]
    BalanceOverflow {
        user: UserId,
        balance: Points,
        points: Points,
    },
}

/// Error while redeeming points for a reward.
#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("insufficient points for user {user}: balance {balance}, cost {cost}")]
    InsufficientPoints {
        user: UserId,
        balance: Points,
        cost: Points,
    },
    #[error("reward cost must be positive, got {0}")]
    InvalidCost(Points),
}

/// Error from catalog, machine and account administration.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("machine {0} not found")]
    MachineNotFound(MachineId),
    #[error("machine {0} already exists")]
    MachineExists(MachineId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Infrastructure failure. Always retryable by the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out after {0:?} waiting for the ledger store")]
    Timeout(Duration),
    #[error("no unused redemption code after {0} attempts")]
    CodeCollision(u32),
}
