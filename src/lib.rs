pub mod catalog;
pub mod config;
pub mod csv;
pub mod ledger;
pub mod machine;
pub mod model;
pub mod units;

pub use catalog::{StatsTable, WasteCatalog, WasteTypeRule};
pub use ledger::{Ledger, LedgerError, UserAccount};
pub use machine::Machine;
pub use model::{Command, Identity, LineItem, Transaction, TransactionStatus};
pub use units::{Grams, Points, Rate};
