use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::UserAccount;
use crate::model::{Command, Identity, LineItem};
use crate::Points;

/// Errors that can occur when reading command rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open command file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{command}'")]
    UnrecognizedType { line: usize, command: String },

    #[error("line {line}: {command} missing {field}")]
    MissingField {
        line: usize,
        command: String,
        field: &'static str,
    },

    #[error("line {line}: malformed items '{items}', expected '<waste type>:<count>;...'")]
    MalformedItems { line: usize, items: String },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: Option<String>,
    machine: Option<String>,
    r#ref: Option<String>,
    items: Option<String>,
    reward: Option<String>,
    cost: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    user: &'a str,
    name: &'a str,
    points: Points,
    plastic_bottles: u64,
    glass_bottles: u64,
    aluminum_cans: u64,
    paper_grams: u64,
    e_waste: u64,
    total_weight_grams: u64,
    transactions: u64,
    redemptions: usize,
}

/// Read ledger commands from a csv file.
///
/// Columns: `type,user,machine,ref,items,reward,cost`, where `type` is one of
/// `deposit`, `claim`, `direct` or `redeem` and `items` is a `;`-separated
/// list of `<waste type>:<count>` pairs.
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let command = row.r#type.as_str();
    let require = |value: Option<String>, field: &'static str| {
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                command: command.to_string(),
                field,
            })
    };

    match command {
        "deposit" => Ok(Command::Deposit {
            machine: require(row.machine, "machine")?,
            reference: require(row.r#ref, "ref")?,
            items: parse_items(line, &require(row.items, "items")?)?,
        }),
        "claim" => Ok(Command::Claim {
            user: Identity::from_id(require(row.user, "user")?),
            reference: require(row.r#ref, "ref")?,
        }),
        "direct" => Ok(Command::DirectDeposit {
            user: Identity::from_id(require(row.user, "user")?),
            items: parse_items(line, &require(row.items, "items")?)?,
        }),
        "redeem" => {
            let user = require(row.user, "user")?;
            let reward = require(row.reward, "reward")?;
            let cost = row.cost.ok_or_else(|| CsvError::MissingField {
                line,
                command: command.to_string(),
                field: "cost",
            })?;
            Ok(Command::Redeem {
                user,
                reward,
                cost: Points::new(cost),
            })
        }
        other => Err(CsvError::UnrecognizedType {
            line,
            command: other.to_string(),
        }),
    }
}

fn parse_items(line: usize, items: &str) -> Result<Vec<LineItem>, CsvError> {
    let malformed = || CsvError::MalformedItems {
        line,
        items: items.to_string(),
    };

    items
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (id, count) = pair.split_once(':').ok_or_else(malformed)?;
            let count = count.trim().parse::<u64>().map_err(|_| malformed())?;
            let id = id.trim();
            if id.is_empty() {
                return Err(malformed());
            }
            Ok(LineItem::new(id, count))
        })
        .collect()
}

/// Write user accounts in csv format
pub fn write_accounts<'a>(
    accounts: impl IntoIterator<Item = &'a UserAccount>,
    writer: impl io::Write,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        let stats = &account.stats;
        let row = OutputRow {
            user: &account.id,
            name: &account.name,
            points: account.points,
            plastic_bottles: stats.plastic_bottles,
            glass_bottles: stats.glass_bottles,
            aluminum_cans: stats.aluminum_cans,
            paper_grams: stats.paper_grams,
            e_waste: stats.e_waste,
            total_weight_grams: stats.total_weight.value(),
            transactions: stats.transactions_count,
            redemptions: account.redemptions.len(),
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
