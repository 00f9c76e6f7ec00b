//! Transaction and points ledger.
//!
//! The ledger turns kiosk deposits into pending transactions, links them to
//! user accounts when a claim code is presented, applies direct deposits and
//! mints reward redemptions.
//!
//! All mutable state sits behind one async mutex. Every operation takes the
//! lock once, with a bounded wait, and performs its conditional update
//! (`Pending -> Claimed`, `balance >= cost`) together with the account
//! mutation in that single critical section, so an operation either applies
//! completely or not at all.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::catalog::{StatsTable, WasteCatalog, WasteTypeRule};
use crate::config::{ConfigError, LedgerConfig, LedgerSettings};
use crate::machine::Machine;
use crate::model::{
    ClaimCode, Command, Identity, LineItem, Location, MachineId, PricedLine, Redemption,
    Transaction, TransactionStatus, TxId, UserId,
};
use crate::{Grams, Points};

mod state;
pub use state::{UserAccount, WasteStats, apply_deposit_to_account};

mod error;
pub use error::{
    AdminError, ClaimError, DepositError, ErrorKind, LedgerError, RedeemError, StoreError,
};

/// Characters used in claim codes; excludes look-alikes (0/O, 1/I).
const CLAIM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Result of a kiosk deposit, shown on the kiosk screen.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositReceipt {
    pub tx: TxId,
    pub claim_code: ClaimCode,
    pub total_points: Points,
    pub total_weight: Grams,
    /// Payload for the scannable code artifact.
    pub scan_payload: String,
}

/// Result of a successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub tx: TxId,
    pub points_added: Points,
    pub new_balance: Points,
}

/// Result of a direct deposit.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectReceipt {
    pub transaction: Transaction,
    pub new_balance: Points,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionReceipt {
    pub redemption: Redemption,
    pub new_balance: Points,
}

/// Everything the ledger persists.
#[derive(Debug, Default)]
struct Books {
    catalog: WasteCatalog,
    machines: HashMap<MachineId, Machine>,
    transactions: HashMap<TxId, Transaction>,
    /// Every claim code ever issued, claimed or not.
    codes: HashMap<ClaimCode, TxId>,
    accounts: HashMap<UserId, UserAccount>,
    redemption_codes: HashSet<String>,
    next_tx: TxId,
}

/// Produces candidate redemption codes; uniqueness is checked by the ledger.
pub type RedemptionCodeSource = Box<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

/// The transaction and redemption ledger.
pub struct Ledger {
    books: Mutex<Books>,
    stats: StatsTable,
    settings: LedgerSettings,
    redemption_codes: RedemptionCodeSource,
}

/// Public API
impl Ledger {
    pub fn new(catalog: WasteCatalog, stats: StatsTable, settings: LedgerSettings) -> Self {
        Self {
            books: Mutex::new(Books {
                catalog,
                ..Books::default()
            }),
            stats,
            settings,
            redemption_codes: Box::new(generate_redemption_code),
        }
    }

    /// Build a ledger seeded with the configured waste types and machines.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, ConfigError> {
        let catalog = WasteCatalog::from_rules(config.waste_types.iter().cloned())?;
        let mut machines = HashMap::new();
        for machine in &config.machines {
            if machines.insert(machine.id.clone(), machine.clone()).is_some() {
                return Err(ConfigError::DuplicateMachine(machine.id.clone()));
            }
        }

        Ok(Self {
            books: Mutex::new(Books {
                catalog,
                machines,
                ..Books::default()
            }),
            stats: config.stats.clone(),
            settings: config.settings(),
            redemption_codes: Box::new(generate_redemption_code),
        })
    }

    /// Replace the redemption code generator. Candidates that collide with
    /// an issued code are retried up to `redemption_code_attempts` times.
    pub fn with_redemption_codes(
        mut self,
        source: impl Fn(DateTime<Utc>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.redemption_codes = Box::new(source);
        self
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Run the ledger over a stream of commands, in order.
    ///
    /// Claims refer to deposits by the batch-local reference given when the
    /// deposit was submitted.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        let mut references: HashMap<String, ClaimCode> = HashMap::new();

        while let Some(command) = stream.next().await {
            // a rejected command never stops the batch; outcomes are logged per operation
            match command {
                Command::Deposit {
                    machine,
                    reference,
                    items,
                } => {
                    if let Ok(receipt) = self.record_deposit(&machine, &items).await {
                        references.insert(reference, receipt.claim_code);
                    }
                }
                Command::Claim { user, reference } => match references.get(&reference) {
                    Some(code) => {
                        let _ = self.claim(&user, code).await;
                    }
                    None => {
                        warn!(user = %user.id, reference, "claim references an unknown deposit");
                    }
                },
                Command::DirectDeposit { user, items } => {
                    let _ = self.record_direct_deposit(&user, &items).await;
                }
                Command::Redeem { user, reward, cost } => {
                    let _ = self.redeem(&user, &reward, cost).await;
                }
            }
        }
    }

    /// Record a deposit made at a kiosk, producing a pending transaction
    /// and its claim code.
    pub async fn record_deposit(
        &self,
        machine: &str,
        items: &[LineItem],
    ) -> Result<DepositReceipt, LedgerError> {
        let result = self.apply_deposit(machine, None, items).await;
        match &result {
            Ok(receipt) => info!(
                machine,
                tx = receipt.tx,
                points = %receipt.total_points,
                weight = %receipt.total_weight,
                "deposit applied"
            ),
            Err(e) => Self::log_rejection("deposit", e),
        }
        result
    }

    /// Record a kiosk deposit after checking the machine's credential secret.
    pub async fn record_kiosk_deposit(
        &self,
        machine: &str,
        secret: &str,
        items: &[LineItem],
    ) -> Result<DepositReceipt, LedgerError> {
        let result = self.apply_deposit(machine, Some(secret), items).await;
        match &result {
            Ok(receipt) => info!(
                machine,
                tx = receipt.tx,
                points = %receipt.total_points,
                weight = %receipt.total_weight,
                "kiosk deposit applied"
            ),
            Err(e) => Self::log_rejection("kiosk deposit", e),
        }
        result
    }

    /// Record a deposit submitted by an authenticated user without a kiosk
    /// claim step. The transaction is stored as `Completed` and applied to
    /// the user's account immediately.
    pub async fn record_direct_deposit(
        &self,
        user: &Identity,
        items: &[LineItem],
    ) -> Result<DirectReceipt, LedgerError> {
        let result = self.apply_direct_deposit(user, items).await;
        match &result {
            Ok(receipt) => info!(
                user = %user.id,
                tx = receipt.transaction.id,
                points = %receipt.transaction.total_points,
                balance = %receipt.new_balance,
                "direct deposit applied"
            ),
            Err(e) => Self::log_rejection("direct deposit", e),
        }
        result
    }

    /// Claim the pending transaction behind `code` for `user`.
    pub async fn claim(&self, user: &Identity, code: &str) -> Result<ClaimReceipt, LedgerError> {
        let result = self.apply_claim(user, code).await;
        match &result {
            Ok(receipt) => info!(
                user = %user.id,
                tx = receipt.tx,
                points = %receipt.points_added,
                balance = %receipt.new_balance,
                "claim applied"
            ),
            Err(e) => Self::log_rejection("claim", e),
        }
        result
    }

    /// Spend `cost` points on `reward`, minting a redemption code.
    pub async fn redeem(
        &self,
        user: &str,
        reward: &str,
        cost: Points,
    ) -> Result<RedemptionReceipt, LedgerError> {
        let result = self.apply_redeem(user, reward, cost).await;
        match &result {
            Ok(receipt) => info!(
                user,
                reward,
                cost = %cost,
                code = %receipt.redemption.code,
                balance = %receipt.new_balance,
                "redemption applied"
            ),
            Err(e) => Self::log_rejection("redemption", e),
        }
        result
    }

    /// Return the state of one user account.
    pub async fn account(&self, user: &str) -> Result<Option<UserAccount>, LedgerError> {
        Ok(self.books().await?.accounts.get(user).cloned())
    }

    /// Return all accounts ordered by user id.
    pub async fn accounts(&self) -> Result<Vec<UserAccount>, LedgerError> {
        let books = self.books().await?;
        let mut accounts: Vec<_> = books.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    pub async fn transaction_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let books = self.books().await?;
        let code = normalize_code(code);
        Ok(books
            .codes
            .get(&code)
            .and_then(|id| books.transactions.get(id))
            .cloned())
    }

    /// Claimed and completed transactions of `user`, newest first.
    pub async fn transactions_for(&self, user: &str) -> Result<Vec<Transaction>, LedgerError> {
        let books = self.books().await?;
        let mut history: Vec<_> = books
            .transactions
            .values()
            .filter(|tx| tx.user_id.as_deref() == Some(user))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(history)
    }

    pub async fn machine(&self, id: &str) -> Result<Option<Machine>, LedgerError> {
        Ok(self.books().await?.machines.get(id).cloned())
    }
}

/// Administrative API, used for seeding and by admin collaborators.
impl Ledger {
    pub async fn upsert_waste_type(&self, rule: WasteTypeRule) -> Result<(), LedgerError> {
        let mut books = self.books().await?;
        books.catalog.upsert(rule).map_err(AdminError::from)?;
        Ok(())
    }

    pub async fn deactivate_waste_type(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(self.books().await?.catalog.deactivate(id))
    }

    /// Register a machine. It stays inactive until approved.
    pub async fn register_machine(&self, mut machine: Machine) -> Result<(), LedgerError> {
        let mut books = self.books().await?;
        if books.machines.contains_key(&machine.id) {
            return Err(AdminError::MachineExists(machine.id).into());
        }
        machine.active = false;
        info!(machine = %machine.id, "machine registered");
        books.machines.insert(machine.id.clone(), machine);
        Ok(())
    }

    pub async fn approve_machine(&self, id: &str) -> Result<(), LedgerError> {
        self.update_machine(id, |m| m.active = true).await
    }

    pub async fn deactivate_machine(&self, id: &str) -> Result<(), LedgerError> {
        self.update_machine(id, |m| m.active = false).await
    }

    pub async fn set_machine_maintenance(
        &self,
        id: &str,
        maintenance: bool,
    ) -> Result<(), LedgerError> {
        self.update_machine(id, |m| m.maintenance = maintenance)
            .await
    }

    pub async fn empty_machine(&self, id: &str) -> Result<(), LedgerError> {
        self.update_machine(id, Machine::empty).await
    }

    /// Move a machine. Pending transactions pick up the new address when
    /// they are claimed.
    pub async fn relocate_machine(&self, id: &str, location: Location) -> Result<(), LedgerError> {
        self.update_machine(id, |m| m.location = location).await
    }

    pub async fn remove_machine(&self, id: &str) -> Result<Machine, LedgerError> {
        let mut books = self.books().await?;
        let machine = books
            .machines
            .remove(id)
            .ok_or_else(|| AdminError::MachineNotFound(id.to_string()))?;
        info!(machine = id, "machine removed");
        Ok(machine)
    }

    /// Create the account for `user` on its first identity event. Existing
    /// accounts are returned unchanged.
    pub async fn register_user(&self, user: &Identity) -> Result<UserAccount, LedgerError> {
        let now = Utc::now();
        let mut books = self.books().await?;
        let account = books
            .accounts
            .entry(user.id.clone())
            .or_insert_with(|| UserAccount::new(user, now));
        Ok(account.clone())
    }
}

/// Private API
impl Ledger {
    /// Acquire the books, giving up after the configured store timeout.
    async fn books(&self) -> Result<MutexGuard<'_, Books>, StoreError> {
        let timeout = self.settings.store_timeout;
        tokio::time::timeout(timeout, self.books.lock())
            .await
            .map_err(|_| StoreError::Timeout(timeout))
    }

    fn log_rejection(op: &str, err: &LedgerError) {
        if err.is_transient() {
            warn!(reason = %err, "{op} failed");
        } else {
            info!(reason = %err, kind = ?err.kind(), "{op} rejected");
        }
    }

    async fn update_machine(
        &self,
        id: &str,
        update: impl FnOnce(&mut Machine),
    ) -> Result<(), LedgerError> {
        let mut books = self.books().await?;
        let machine = books
            .machines
            .get_mut(id)
            .ok_or_else(|| AdminError::MachineNotFound(id.to_string()))?;
        update(machine);
        info!(
            machine = id,
            active = machine.active,
            status = %machine.status(),
            "machine updated"
        );
        Ok(())
    }

    /// Kiosk deposit:
    /// - Ensure the machine exists, is approved, accepts deposits and, when a
    ///   secret is given, authenticates
    /// - Price every line with the current catalog
    /// - Store a pending transaction with a fresh claim code
    /// - Add the deposited units to the machine's fill level
    async fn apply_deposit(
        &self,
        machine_id: &str,
        secret: Option<&str>,
        items: &[LineItem],
    ) -> Result<DepositReceipt, LedgerError> {
        let now = Utc::now();
        let mut books = self.books().await?;
        let books = &mut *books;

        let machine = books
            .machines
            .get_mut(machine_id)
            .ok_or_else(|| DepositError::MachineNotFound(machine_id.to_string()))?;
        if secret.is_some_and(|s| !machine.authenticate(s)) {
            return Err(DepositError::MachineUnauthorized(machine_id.to_string()).into());
        }
        if !machine.active {
            return Err(DepositError::MachineInactive(machine_id.to_string()).into());
        }
        if !machine.accepts_deposits() {
            return Err(
                DepositError::MachineUnavailable(machine_id.to_string(), machine.status()).into(),
            );
        }

        let (lines, total_points, total_weight) = price(&books.catalog, &self.stats, items)?;

        let code = loop {
            let candidate = generate_claim_code(self.settings.claim_code_length);
            if !books.codes.contains_key(&candidate) {
                break candidate;
            }
        };

        books.next_tx += 1;
        let id = books.next_tx;
        let tx = Transaction {
            id,
            machine_id: Some(machine.id.clone()),
            user_id: None,
            user_name: None,
            lines,
            total_points,
            total_weight,
            claim_code: Some(code.clone()),
            status: TransactionStatus::Pending,
            machine_location: Some(machine.location.address.clone()),
            created_at: now,
            claimed_at: None,
        };
        machine.fill(tx.unit_count());

        books.codes.insert(code.clone(), id);
        books.transactions.insert(id, tx);

        Ok(DepositReceipt {
            tx: id,
            scan_payload: format!("{}{}", self.settings.claim_uri_prefix, code),
            claim_code: code,
            total_points,
            total_weight,
        })
    }

    /// Direct deposit:
    /// - Price every line with the current catalog
    /// - Resolve or provision the account
    /// - Store a completed transaction and apply it to the account
    async fn apply_direct_deposit(
        &self,
        user: &Identity,
        items: &[LineItem],
    ) -> Result<DirectReceipt, LedgerError> {
        let now = Utc::now();
        let mut books = self.books().await?;
        let books = &mut *books;

        let (lines, total_points, total_weight) = price(&books.catalog, &self.stats, items)?;

        let account = books
            .accounts
            .entry(user.id.clone())
            .or_insert_with(|| UserAccount::new(user, now));
        apply_deposit_to_account(account, &lines, total_points, &self.stats).map_err(
            |balance| DepositError::BalanceOverflow {
                user: account.id.clone(),
                balance,
                points: total_points,
            },
        )?;
        let new_balance = account.points;

        books.next_tx += 1;
        let id = books.next_tx;
        let tx = Transaction {
            id,
            machine_id: None,
            user_id: Some(account.id.clone()),
            user_name: Some(account.name.clone()),
            lines,
            total_points,
            total_weight,
            claim_code: None,
            status: TransactionStatus::Completed,
            machine_location: None,
            created_at: now,
            claimed_at: None,
        };
        books.transactions.insert(id, tx.clone());

        Ok(DirectReceipt {
            transaction: tx,
            new_balance,
        })
    }

    /// Claim:
    /// - Find the transaction behind the code; it must still be `Pending`
    /// - Resolve or provision the account and apply the transaction to it;
    ///   a balance that would overflow rejects the claim before anything changes
    /// - Transition to `Claimed` and refresh the location snapshot, all under
    ///   the same lock
    async fn apply_claim(&self, user: &Identity, code: &str) -> Result<ClaimReceipt, LedgerError> {
        let now = Utc::now();
        let code = normalize_code(code);
        let mut books = self.books().await?;
        let books = &mut *books;

        let tx = books
            .codes
            .get(&code)
            .and_then(|id| books.transactions.get_mut(id))
            .filter(|tx| tx.is_pending())
            .ok_or_else(|| ClaimError::InvalidOrClaimedCode(code.clone()))?;

        let account = books
            .accounts
            .entry(user.id.clone())
            .or_insert_with(|| UserAccount::new(user, now));
        apply_deposit_to_account(account, &tx.lines, tx.total_points, &self.stats).map_err(
            |balance| ClaimError::BalanceOverflow {
                user: account.id.clone(),
                balance,
                points: tx.total_points,
            },
        )?;

        let location = tx
            .machine_id
            .as_ref()
            .and_then(|id| books.machines.get(id))
            .map(|m| m.location.address.clone());
        if location.is_some() {
            tx.machine_location = location;
        }
        tx.user_id = Some(account.id.clone());
        tx.user_name = Some(account.name.clone());
        tx.status = TransactionStatus::Claimed;
        tx.claimed_at = Some(now);

        Ok(ClaimReceipt {
            tx: tx.id,
            points_added: tx.total_points,
            new_balance: account.points,
        })
    }

    /// Redeem:
    /// - Ensure cost is positive and the account exists
    /// - Mint an unused code
    /// - Deduct only if the balance covers the cost, then record the redemption
    async fn apply_redeem(
        &self,
        user: &str,
        reward: &str,
        cost: Points,
    ) -> Result<RedemptionReceipt, LedgerError> {
        if !cost.is_positive() {
            return Err(RedeemError::InvalidCost(cost).into());
        }

        let now = Utc::now();
        let mut books = self.books().await?;
        let books = &mut *books;

        let account = books
            .accounts
            .get_mut(user)
            .ok_or_else(|| RedeemError::UserNotFound(user.to_string()))?;

        let attempts = self.settings.redemption_code_attempts;
        let code = (0..attempts)
            .map(|_| (self.redemption_codes)(now))
            .find(|c| !books.redemption_codes.contains(c))
            .ok_or(StoreError::CodeCollision(attempts))?;

        account
            .try_debit(cost)
            .map_err(|balance| RedeemError::InsufficientPoints {
                user: user.to_string(),
                balance,
                cost,
            })?;

        let redemption = Redemption {
            code: code.clone(),
            reward_name: reward.to_string(),
            cost,
            created_at: now,
            expires_at: now + self.settings.redemption_ttl,
        };
        account.redemptions.push(redemption.clone());
        books.redemption_codes.insert(code);

        Ok(RedemptionReceipt {
            redemption,
            new_balance: account.points,
        })
    }
}

/// Price deposit lines with the rules currently in the catalog. The result
/// is a snapshot: later catalog edits do not change it.
fn price(
    catalog: &WasteCatalog,
    stats: &StatsTable,
    items: &[LineItem],
) -> Result<(Vec<PricedLine>, Points, Grams), DepositError> {
    if items.is_empty() {
        return Err(DepositError::EmptyDeposit);
    }

    let lines = items
        .iter()
        .map(|item| {
            if item.count == 0 {
                return Err(DepositError::ZeroCount(item.waste_type_id.clone()));
            }
            let quote = catalog.rate_for(&item.waste_type_id)?;
            let points_awarded = quote
                .points_per_unit
                .checked_times(item.count)
                .ok_or(DepositError::PointsOverflow)?;
            Ok(PricedLine {
                waste_type_id: item.waste_type_id.clone(),
                count: item.count,
                points_awarded,
                weight: stats.weight_of(&item.waste_type_id, item.count),
            })
        })
        .collect::<Result<Vec<_>, DepositError>>()?;

    let total_points = Points::checked_sum(lines.iter().map(|l| l.points_awarded))
        .ok_or(DepositError::PointsOverflow)?;
    let total_weight = lines.iter().map(|l| l.weight).sum();
    Ok((lines, total_points, total_weight))
}

fn normalize_code(code: &str) -> ClaimCode {
    code.trim().to_ascii_uppercase()
}

fn generate_claim_code(len: usize) -> ClaimCode {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CLAIM_CODE_ALPHABET[rng.gen_range(0..CLAIM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// `REDEEM-<last 6 digits of the unix millis>-<4 random digits>`
fn generate_redemption_code(now: DateTime<Utc>) -> String {
    let suffix = now.timestamp_millis().rem_euclid(1_000_000);
    let random: u32 = rand::thread_rng().gen_range(1000..10_000);
    format!("REDEEM-{suffix:06}-{random}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rate;
    use crate::catalog::{Unit, default_rules};
    use crate::machine::MachineStatus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // test utils

    fn kiosk(id: &str, max_capacity: u32, active: bool) -> Machine {
        let mut machine = Machine::new(
            id,
            "Campus Kiosk",
            Location {
                lat: 52.52,
                lng: 13.40,
                address: "12 Green St".to_string(),
            },
            max_capacity,
            "k1",
        );
        machine.active = active;
        machine
    }

    fn ledger() -> Ledger {
        let config = LedgerConfig {
            machines: vec![kiosk("m1", 1_000, true), kiosk("pending", 1_000, false)],
            ..LedgerConfig::default()
        };
        Ledger::from_config(&config).unwrap()
    }

    fn items(pairs: &[(&str, u64)]) -> Vec<LineItem> {
        pairs.iter().map(|(id, n)| LineItem::new(*id, *n)).collect()
    }

    fn user(id: &str) -> Identity {
        Identity::new(id, format!("User {id}"))
    }

    /// Give `id` a starting balance through a direct deposit of plastic bottles.
    async fn fund(ledger: &Ledger, id: &str, points: i64) {
        let bottles = u64::try_from(points / 10).unwrap();
        ledger
            .record_direct_deposit(&user(id), &items(&[("1", bottles)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn new_ledger_has_no_accounts() {
        let ledger = ledger();
        assert!(ledger.accounts().await.unwrap().is_empty());
    }

    // Deposit

    #[tokio::test]
    async fn deposit_creates_pending_transaction() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 3)])).await.unwrap();

        assert_eq!(receipt.total_points, Points::new(30));
        assert_eq!(receipt.total_weight, Grams::new(60));
        assert_eq!(receipt.claim_code.len(), 8);
        assert_eq!(
            receipt.scan_payload,
            format!("recycle://claim/{}", receipt.claim_code)
        );

        let tx = ledger
            .transaction_by_code(&receipt.claim_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.user_id, None);
        assert_eq!(tx.machine_id.as_deref(), Some("m1"));
        assert_eq!(tx.machine_location.as_deref(), Some("12 Green St"));
        assert_eq!(tx.lines.len(), 1);
        assert_eq!(tx.lines[0].points_awarded, Points::new(30));
    }

    #[tokio::test]
    async fn deposit_total_is_sum_of_lines() {
        let ledger = ledger();
        let receipt = ledger
            .record_deposit("m1", &items(&[("1", 2), ("2", 1), ("3", 4), ("4", 250)]))
            .await
            .unwrap();

        // 2*10 + 1*15 + 4*12 + round(250*0.05)
        assert_eq!(receipt.total_points, Points::new(20 + 15 + 48 + 13));
        assert_eq!(receipt.total_weight, Grams::new(40 + 200 + 60 + 250));
    }

    #[tokio::test]
    async fn deposit_fills_machine() {
        let ledger = ledger();
        ledger
            .record_deposit("m1", &items(&[("1", 3), ("3", 2)]))
            .await
            .unwrap();
        assert_eq!(ledger.machine("m1").await.unwrap().unwrap().capacity, 5);
    }

    #[tokio::test]
    async fn deposit_at_unknown_machine_fails() {
        let ledger = ledger();
        let err = ledger
            .record_deposit("nope", &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::MachineNotFound(ref id)) if id == "nope"
        ));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deposit_at_unapproved_machine_fails() {
        let ledger = ledger();
        let err = ledger
            .record_deposit("pending", &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inactive);

        ledger.approve_machine("pending").await.unwrap();
        ledger
            .record_deposit("pending", &items(&[("1", 1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deposit_at_full_machine_fails() {
        let ledger = ledger();
        ledger.register_machine(kiosk("small", 2, false)).await.unwrap();
        ledger.approve_machine("small").await.unwrap();

        ledger.record_deposit("small", &items(&[("1", 2)])).await.unwrap();
        let err = ledger
            .record_deposit("small", &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::MachineUnavailable(_, MachineStatus::Full))
        ));

        ledger.empty_machine("small").await.unwrap();
        ledger.record_deposit("small", &items(&[("1", 1)])).await.unwrap();
    }

    #[tokio::test]
    async fn deposit_at_machine_in_maintenance_fails() {
        let ledger = ledger();
        ledger.set_machine_maintenance("m1", true).await.unwrap();
        let err = ledger
            .record_deposit("m1", &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::MachineUnavailable(
                _,
                MachineStatus::Maintenance
            ))
        ));
    }

    #[tokio::test]
    async fn deposit_with_unknown_waste_type_is_rejected_whole() {
        let ledger = ledger();
        let err = ledger
            .record_deposit("m1", &items(&[("1", 3), ("99", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownWasteType);

        // nothing stored, machine untouched
        assert_eq!(ledger.machine("m1").await.unwrap().unwrap().capacity, 0);
    }

    #[tokio::test]
    async fn deposit_with_deactivated_waste_type_is_rejected() {
        let ledger = ledger();
        assert!(ledger.deactivate_waste_type("2").await.unwrap());
        let err = ledger
            .record_deposit("m1", &items(&[("2", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownWasteType);
    }

    #[tokio::test]
    async fn empty_or_zero_count_deposit_is_rejected() {
        let ledger = ledger();
        let err = ledger.record_deposit("m1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::EmptyDeposit)
        ));

        let err = ledger
            .record_deposit("m1", &items(&[("1", 0)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::ZeroCount(ref id)) if id == "1"
        ));
    }

    #[tokio::test]
    async fn kiosk_deposit_checks_secret() {
        let ledger = ledger();
        let err = ledger
            .record_kiosk_deposit("m1", "wrong", &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::MachineUnauthorized(_))
        ));

        ledger
            .record_kiosk_deposit("m1", "k1", &items(&[("1", 1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deposit_codes_are_unique() {
        let ledger = ledger();
        let mut codes = HashSet::new();
        for _ in 0..50 {
            let receipt = ledger.record_deposit("m1", &items(&[("1", 1)])).await.unwrap();
            assert!(codes.insert(receipt.claim_code));
        }
    }

    // Claim

    #[tokio::test]
    async fn claim_applies_points_and_stats() {
        let ledger = ledger();
        fund(&ledger, "u", 500).await;
        let before = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(before.points, Points::new(500));

        let receipt = ledger.record_deposit("m1", &items(&[("1", 3)])).await.unwrap();
        let claimed = ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();

        assert_eq!(claimed.points_added, Points::new(30));
        assert_eq!(claimed.new_balance, Points::new(530));

        let after = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(after.points, Points::new(530));
        assert_eq!(
            after.stats.plastic_bottles,
            before.stats.plastic_bottles + 3
        );
        assert_eq!(
            after.stats.transactions_count,
            before.stats.transactions_count + 1
        );
        assert_eq!(
            after.stats.total_weight,
            before.stats.total_weight + Grams::new(60)
        );

        let tx = ledger
            .transaction_by_code(&receipt.claim_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Claimed);
        assert_eq!(tx.user_id.as_deref(), Some("u"));
        assert_eq!(tx.user_name.as_deref(), Some("User u"));
        assert!(tx.claimed_at.is_some());
    }

    #[tokio::test]
    async fn claim_twice_fails_and_keeps_balance() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 3)])).await.unwrap();
        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();

        let err = ledger
            .claim(&user("u"), &receipt.claim_code)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Claim(ClaimError::InvalidOrClaimedCode(_))
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // another user cannot take it either
        assert!(ledger.claim(&user("v"), &receipt.claim_code).await.is_err());

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(30));
        assert_eq!(account.stats.transactions_count, 1);
        assert!(ledger.account("v").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_unknown_code_fails() {
        let ledger = ledger();
        let err = ledger.claim(&user("u"), "NOPE1234").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Claim(ClaimError::InvalidOrClaimedCode(ref code)) if code == "NOPE1234"
        ));
        assert!(ledger.account("u").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_normalizes_code() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 1)])).await.unwrap();
        let typed = format!("  {}\n", receipt.claim_code.to_lowercase());
        ledger.claim(&user("u"), &typed).await.unwrap();
    }

    #[tokio::test]
    async fn claim_provisions_missing_account() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("5", 1)])).await.unwrap();
        let claimed = ledger
            .claim(&Identity::new("new", "Newcomer"), &receipt.claim_code)
            .await
            .unwrap();
        assert_eq!(claimed.new_balance, Points::new(50));

        let account = ledger.account("new").await.unwrap().unwrap();
        assert_eq!(account.name, "Newcomer");
        assert_eq!(account.stats.e_waste, 1);
    }

    #[tokio::test]
    async fn claim_keeps_location_snapshot_when_machine_is_gone() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 1)])).await.unwrap();
        ledger.remove_machine("m1").await.unwrap();

        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();
        let tx = ledger
            .transaction_by_code(&receipt.claim_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.machine_location.as_deref(), Some("12 Green St"));
    }

    #[tokio::test]
    async fn claim_refreshes_location_from_relocated_machine() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 1)])).await.unwrap();
        ledger
            .relocate_machine(
                "m1",
                Location {
                    lat: 52.50,
                    lng: 13.42,
                    address: "3 River Rd".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            ledger.machine("m1").await.unwrap().unwrap().location.address,
            "3 River Rd"
        );

        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();
        let tx = ledger
            .transaction_by_code(&receipt.claim_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.machine_location.as_deref(), Some("3 River Rd"));
    }

    #[tokio::test]
    async fn claim_that_would_overflow_balance_changes_nothing() {
        let ledger = ledger();
        fund(&ledger, "u", 100).await;
        ledger.books.lock().await.accounts.get_mut("u").unwrap().points =
            Points::new(i64::MAX - 5);
        let before = ledger.account("u").await.unwrap().unwrap();

        let receipt = ledger.record_deposit("m1", &items(&[("1", 1)])).await.unwrap();
        let err = ledger
            .claim(&user("u"), &receipt.claim_code)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Claim(ClaimError::BalanceOverflow { balance, points, .. })
                if balance == Points::new(i64::MAX - 5) && points == Points::new(10)
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(ledger.account("u").await.unwrap().unwrap(), before);
        let tx = ledger
            .transaction_by_code(&receipt.claim_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.user_id, None);
        assert_eq!(tx.claimed_at, None);

        // the code is still claimable by someone else
        let claimed = ledger.claim(&user("v"), &receipt.claim_code).await.unwrap();
        assert_eq!(claimed.new_balance, Points::new(10));
    }

    #[tokio::test]
    async fn claimed_points_use_rates_from_deposit_time() {
        let ledger = ledger();
        let receipt = ledger.record_deposit("m1", &items(&[("1", 3)])).await.unwrap();
        ledger
            .upsert_waste_type(WasteTypeRule::new(
                "1",
                "Plastic Bottle",
                Rate::whole(100),
                Unit::Item,
            ))
            .await
            .unwrap();

        let claimed = ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();
        assert_eq!(claimed.points_added, Points::new(30));
    }

    #[tokio::test]
    async fn unrouted_waste_type_earns_points_without_stats() {
        let ledger = ledger();
        ledger
            .upsert_waste_type(WasteTypeRule::new(
                "battery",
                "Battery",
                Rate::whole(7),
                Unit::Item,
            ))
            .await
            .unwrap();

        let receipt = ledger
            .record_deposit("m1", &items(&[("battery", 2), ("1", 1)]))
            .await
            .unwrap();
        assert_eq!(receipt.total_points, Points::new(24));
        assert_eq!(receipt.total_weight, Grams::new(20));

        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();
        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(24));
        assert_eq!(account.stats.plastic_bottles, 1);
        assert_eq!(account.stats.total_weight, Grams::new(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_exactly_one_wins() {
        let ledger = Arc::new(ledger());
        let receipt = ledger.record_deposit("m1", &items(&[("1", 3)])).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            let code = receipt.claim_code.clone();
            handles.push(tokio::spawn(async move {
                let who = if i % 2 == 0 { "u" } else { "v" };
                ledger.claim(&user(who), &code).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(matches!(
                    e,
                    LedgerError::Claim(ClaimError::InvalidOrClaimedCode(_))
                )),
            }
        }
        assert_eq!(wins, 1);

        let total: i64 = ledger
            .accounts()
            .await
            .unwrap()
            .iter()
            .map(|a| a.points.value())
            .sum();
        assert_eq!(total, 30);
    }

    // Direct deposit

    #[tokio::test]
    async fn direct_deposit_is_completed_and_applied() {
        let ledger = ledger();
        let receipt = ledger
            .record_direct_deposit(&user("u"), &items(&[("2", 2), ("3", 1)]))
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, Points::new(42));
        assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
        assert_eq!(receipt.transaction.user_id.as_deref(), Some("u"));
        assert_eq!(receipt.transaction.claim_code, None);
        assert_eq!(receipt.transaction.machine_id, None);

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.stats.glass_bottles, 2);
        assert_eq!(account.stats.aluminum_cans, 1);
        assert_eq!(account.stats.total_weight, Grams::new(415));
        assert_eq!(account.stats.transactions_count, 1);
    }

    #[tokio::test]
    async fn direct_deposit_rejects_unknown_type_without_side_effects() {
        let ledger = ledger();
        let err = ledger
            .record_direct_deposit(&user("u"), &items(&[("99", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownWasteType);
        assert!(ledger.account("u").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deposit_worth_more_than_points_can_hold_is_rejected() {
        let ledger = ledger();
        let err = ledger
            .record_direct_deposit(&user("u"), &items(&[("1", u64::MAX)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::PointsOverflow)
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // each line fits on its own, the total does not
        let near_max = i64::MAX as u64 / 10;
        let err = ledger
            .record_direct_deposit(&user("u"), &items(&[("1", near_max), ("1", near_max)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::PointsOverflow)
        ));

        let err = ledger
            .record_deposit("m1", &items(&[("1", near_max), ("1", near_max)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::PointsOverflow)
        ));

        assert!(ledger.account("u").await.unwrap().is_none());
        assert_eq!(ledger.machine("m1").await.unwrap().unwrap().capacity, 0);
    }

    #[tokio::test]
    async fn direct_deposit_that_would_overflow_balance_changes_nothing() {
        let ledger = ledger();
        fund(&ledger, "u", 100).await;
        ledger.books.lock().await.accounts.get_mut("u").unwrap().points =
            Points::new(i64::MAX - 5);
        let before = ledger.account("u").await.unwrap().unwrap();

        let err = ledger
            .record_direct_deposit(&user("u"), &items(&[("1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Deposit(DepositError::BalanceOverflow { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(ledger.account("u").await.unwrap().unwrap(), before);
        assert_eq!(ledger.transactions_for("u").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transactions_count_tracks_transactions_not_lines() {
        let ledger = ledger();
        ledger
            .record_direct_deposit(&user("u"), &items(&[("1", 1), ("2", 1), ("3", 1)]))
            .await
            .unwrap();
        let receipt = ledger
            .record_deposit("m1", &items(&[("4", 100), ("5", 2)]))
            .await
            .unwrap();
        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.stats.transactions_count, 2);
    }

    #[tokio::test]
    async fn history_lists_user_transactions_newest_first() {
        let ledger = ledger();
        ledger
            .record_direct_deposit(&user("u"), &items(&[("1", 1)]))
            .await
            .unwrap();
        let receipt = ledger.record_deposit("m1", &items(&[("2", 1)])).await.unwrap();
        ledger.claim(&user("u"), &receipt.claim_code).await.unwrap();
        // unclaimed deposit is nobody's history
        ledger.record_deposit("m1", &items(&[("3", 1)])).await.unwrap();

        let history = ledger.transactions_for("u").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, receipt.tx);
        assert_eq!(history[1].status, TransactionStatus::Completed);
    }

    // Redeem

    #[tokio::test]
    async fn redeem_deducts_and_mints_code() {
        let ledger = ledger();
        fund(&ledger, "u", 530).await;

        let receipt = ledger.redeem("u", "Coffee", Points::new(500)).await.unwrap();
        assert_eq!(receipt.new_balance, Points::new(30));

        let redemption = &receipt.redemption;
        let parts: Vec<&str> = redemption.code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "REDEEM");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(
            redemption.expires_at - redemption.created_at,
            chrono::Duration::days(30)
        );

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.redemptions, vec![redemption.clone()]);

        let err = ledger
            .redeem("u", "Lunch", Points::new(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Redeem(RedeemError::InsufficientPoints { balance, cost, .. })
                if balance == Points::new(30) && cost == Points::new(100)
        ));
        assert_eq!(
            ledger.account("u").await.unwrap().unwrap().points,
            Points::new(30)
        );
    }

    #[tokio::test]
    async fn redeem_exact_balance_succeeds() {
        let ledger = ledger();
        fund(&ledger, "u", 100).await;
        let receipt = ledger.redeem("u", "Tote", Points::new(100)).await.unwrap();
        assert_eq!(receipt.new_balance, Points::ZERO);
    }

    #[tokio::test]
    async fn redeem_unknown_user_fails() {
        let ledger = ledger();
        let err = ledger
            .redeem("ghost", "Coffee", Points::new(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ledger.account("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redeem_rejects_non_positive_cost() {
        let ledger = ledger();
        fund(&ledger, "u", 100).await;
        for cost in [0, -5] {
            let err = ledger
                .redeem("u", "Free", Points::new(cost))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Redeem(RedeemError::InvalidCost(_))));
        }
        assert_eq!(
            ledger.account("u").await.unwrap().unwrap().points,
            Points::new(100)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_never_overdraw() {
        let ledger = Arc::new(ledger());
        fund(&ledger, "u", 530).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.redeem("u", "Coffee", Points::new(100)).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(receipt) => {
                    assert!(receipt.new_balance >= Points::ZERO);
                    wins += 1;
                }
                Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientPoints),
            }
        }
        assert_eq!(wins, 5);

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(30));
        assert_eq!(account.redemptions.len(), 5);
    }

    #[tokio::test]
    async fn redemption_code_collision_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ledger = ledger().with_redemption_codes(move |_| {
            // first two candidates are the same code
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => "REDEEM-000001-1000".to_string(),
                _ => "REDEEM-000002-2000".to_string(),
            }
        });
        fund(&ledger, "u", 500).await;

        let first = ledger.redeem("u", "Coffee", Points::new(100)).await.unwrap();
        assert_eq!(first.redemption.code, "REDEEM-000001-1000");

        let second = ledger.redeem("u", "Coffee", Points::new(100)).await.unwrap();
        assert_eq!(second.redemption.code, "REDEEM-000002-2000");
        assert_eq!(second.new_balance, Points::new(300));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_redemption_codes_surface_transient_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ledger = ledger().with_redemption_codes(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            "REDEEM-000001-1000".to_string()
        });
        fund(&ledger, "u", 500).await;
        ledger.redeem("u", "Coffee", Points::new(100)).await.unwrap();

        let err = ledger
            .redeem("u", "Coffee", Points::new(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transient(StoreError::CodeCollision(8))
        ));
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1 + 8);

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(400));
        assert_eq!(account.redemptions.len(), 1);
    }

    // Store timeout

    #[tokio::test]
    async fn busy_store_surfaces_transient_error() {
        let settings = LedgerSettings {
            store_timeout: Duration::from_millis(20),
            ..LedgerSettings::default()
        };
        let ledger = Ledger::new(
            WasteCatalog::from_rules(default_rules()).unwrap(),
            StatsTable::default(),
            settings,
        );

        let _guard = ledger.books.lock().await;
        let err = ledger.claim(&user("u"), "ABCDEFGH").await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, LedgerError::Transient(StoreError::Timeout(_))));
    }

    // Admin

    #[tokio::test]
    async fn registered_machine_starts_inactive() {
        let ledger = ledger();
        ledger.register_machine(kiosk("m2", 10, true)).await.unwrap();
        assert!(!ledger.machine("m2").await.unwrap().unwrap().active);

        let err = ledger
            .register_machine(kiosk("m2", 10, false))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Admin(AdminError::MachineExists(_))));
    }

    #[tokio::test]
    async fn deactivation_is_reversible() {
        let ledger = ledger();
        ledger.deactivate_machine("m1").await.unwrap();
        assert!(ledger.record_deposit("m1", &items(&[("1", 1)])).await.is_err());
        ledger.approve_machine("m1").await.unwrap();
        assert!(ledger.record_deposit("m1", &items(&[("1", 1)])).await.is_ok());
    }

    #[tokio::test]
    async fn admin_ops_on_missing_machine_fail() {
        let ledger = ledger();
        let err = ledger.approve_machine("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ledger.remove_machine("nope").await.is_err());
        assert!(
            ledger
                .relocate_machine("nope", Location::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn register_user_is_idempotent() {
        let ledger = ledger();
        ledger.register_user(&Identity::new("u", "Uma")).await.unwrap();
        fund(&ledger, "u", 100).await;

        let account = ledger
            .register_user(&Identity::new("u", "Renamed"))
            .await
            .unwrap();
        assert_eq!(account.name, "Uma");
        assert_eq!(account.points, Points::new(100));
    }

    #[test]
    fn duplicate_configured_machines_are_rejected() {
        let config = LedgerConfig {
            machines: vec![kiosk("m1", 1, true), kiosk("m1", 1, true)],
            ..LedgerConfig::default()
        };
        assert!(matches!(
            Ledger::from_config(&config),
            Err(ConfigError::DuplicateMachine(_))
        ));
    }

    #[test]
    fn claim_codes_use_unambiguous_alphabet() {
        let code = generate_claim_code(32);
        assert_eq!(code.len(), 32);
        assert!(code.bytes().all(|b| CLAIM_CODE_ALPHABET.contains(&b)));
    }

    //  Async run()

    #[tokio::test]
    async fn run_processes_all_commands() {
        let ledger = ledger();
        let commands = vec![
            Command::Deposit {
                machine: "m1".to_string(),
                reference: "d1".to_string(),
                items: items(&[("1", 3)]),
            },
            Command::DirectDeposit {
                user: user("u"),
                items: items(&[("5", 10)]),
            },
            Command::Claim {
                user: user("u"),
                reference: "d1".to_string(),
            },
            Command::Redeem {
                user: "u".to_string(),
                reward: "Coffee".to_string(),
                cost: Points::new(500),
            },
        ];

        ledger.run(tokio_stream::iter(commands)).await;

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(30));
        assert_eq!(account.stats.transactions_count, 2);
        assert_eq!(account.redemptions.len(), 1);
    }

    #[tokio::test]
    async fn run_skips_failed_commands_and_continues() {
        let ledger = ledger();
        let commands = vec![
            Command::Deposit {
                machine: "ghost".to_string(),
                reference: "d1".to_string(),
                items: items(&[("1", 3)]),
            },
            // refers to the failed deposit
            Command::Claim {
                user: user("u"),
                reference: "d1".to_string(),
            },
            Command::Redeem {
                user: "u".to_string(),
                reward: "Coffee".to_string(),
                cost: Points::new(1),
            },
            Command::DirectDeposit {
                user: user("u"),
                items: items(&[("1", 2)]),
            },
        ];

        ledger.run(tokio_stream::iter(commands)).await;

        let account = ledger.account("u").await.unwrap().unwrap();
        assert_eq!(account.points, Points::new(20));
        assert!(account.redemptions.is_empty());
    }
}
