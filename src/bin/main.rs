// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use bank_ledger_rs::{
    Account, AccountId, AccountType, Bank, LedgerConfig, Operation, TracingObserver,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Ledger - Run a CSV script of banking operations
///
/// Reads account openings and operations from a CSV file, runs them through
/// the ledger and writes the resulting accounts to stdout.
#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Runs a CSV script of banking operations against the ledger", long_about = None)]
struct Args {
    /// Path to CSV script
    ///
    /// Expected format: type,account,counterparty,amount
    /// Example: cargo run -- script.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Operations allowed to wait for a worker
    #[arg(long, default_value_t = LedgerConfig::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seconds a cached account snapshot stays valid (0 = until invalidated)
    #[arg(long, default_value_t = 30)]
    cache_ttl_secs: u64,

    /// Minimum balance for savings accounts
    #[arg(long, default_value_t = Decimal::ZERO)]
    savings_minimum: Decimal,

    /// Annual interest rate for savings accounts
    #[arg(long, default_value = "0.02")]
    savings_rate: Decimal,

    /// Overdraft limit for current accounts
    #[arg(long, default_value_t = Decimal::ZERO)]
    overdraft_limit: Decimal,

    /// Term in months for fixed-term accounts
    #[arg(long, default_value_t = 12)]
    term_months: u32,

    /// Annual interest rate for fixed-term accounts
    #[arg(long, default_value = "0.05")]
    fixed_rate: Decimal,
}

impl Args {
    fn config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::default()
            .with_queue_capacity(self.queue_capacity)
            .with_cache_ttl(Duration::from_secs(self.cache_ttl_secs));
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config
    }

    fn products(&self) -> Products {
        Products {
            savings: AccountType::Savings {
                minimum_balance: self.savings_minimum,
                interest_rate: self.savings_rate,
            },
            current: AccountType::Current {
                overdraft_limit: self.overdraft_limit,
            },
            fixed: AccountType::FixedTerm {
                term_months: self.term_months,
                interest_rate: self.fixed_rate,
            },
        }
    }
}

fn main() {
    // Logs go to stderr so stdout stays a clean CSV.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let bank = match Bank::new(args.config()) {
        Ok(bank) => bank,
        Err(e) => {
            eprintln!("Error starting ledger: {}", e);
            process::exit(1);
        }
    };
    bank.subscribe(Arc::new(TracingObserver));

    // Run the script
    if let Err(e) = run_script(&bank, &args.products(), BufReader::new(file)) {
        eprintln!("Error processing script: {}", e);
        process::exit(1);
    }

    // Write results to stdout
    if let Err(e) = write_accounts(&bank, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    bank.shutdown();
}

/// Account variants used when the script opens accounts.
#[derive(Debug, Clone, Copy)]
struct Products {
    savings: AccountType,
    current: AccountType,
    fixed: AccountType,
}

/// Raw CSV record matching the script format.
///
/// Fields: `type, account, counterparty, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    #[serde(default)]
    account: String,
    #[serde(default)]
    counterparty: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

/// One script step, with accounts still named by alias.
#[derive(Debug, PartialEq)]
enum Step {
    Open {
        alias: String,
        account_type: AccountType,
        initial: Decimal,
    },
    Deposit {
        alias: String,
        amount: Decimal,
    },
    Withdraw {
        alias: String,
        amount: Decimal,
    },
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
    },
    Interest,
    Close {
        alias: String,
    },
}

impl CsvRecord {
    /// Converts a CSV record to a script step.
    ///
    /// Returns `None` for unknown types or missing required fields.
    fn into_step(self, products: &Products) -> Option<Step> {
        let alias = self.account;
        let needs_alias = |alias: String| (!alias.is_empty()).then_some(alias);

        match self.op_type.to_lowercase().as_str() {
            "savings" | "current" | "fixed" => {
                let account_type = match self.op_type.to_lowercase().as_str() {
                    "savings" => products.savings,
                    "current" => products.current,
                    _ => products.fixed,
                };
                Some(Step::Open {
                    alias: needs_alias(alias)?,
                    account_type,
                    initial: self.amount.unwrap_or(Decimal::ZERO),
                })
            }
            "deposit" => Some(Step::Deposit {
                alias: needs_alias(alias)?,
                amount: self.amount?,
            }),
            "withdraw" | "withdrawal" => Some(Step::Withdraw {
                alias: needs_alias(alias)?,
                amount: self.amount?,
            }),
            "transfer" => Some(Step::Transfer {
                from: needs_alias(alias)?,
                to: needs_alias(self.counterparty)?,
                amount: self.amount?,
            }),
            "interest" => Some(Step::Interest),
            "close" => Some(Step::Close {
                alias: needs_alias(alias)?,
            }),
            _ => None,
        }
    }
}

fn resolve(aliases: &HashMap<String, AccountId>, alias: &str) -> Option<AccountId> {
    let id = aliases.get(alias).copied();
    if id.is_none() {
        tracing::debug!(alias, "skipping step for unknown account alias");
    }
    id
}

/// Runs a CSV script against the bank.
///
/// Each step waits for its result before the next is read, so the script
/// behaves like a sequential ledger. Malformed rows and failed operations are
/// logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, account, counterparty, amount`
/// - `type`: savings, current, fixed (open an account), deposit, withdraw,
///   transfer, interest, close
/// - `account`: alias of the account the step applies to
/// - `counterparty`: alias of the transfer target
/// - `amount`: decimal amount (initial deposit when opening)
///
/// # Example
///
/// ```csv
/// type,account,counterparty,amount
/// current,alice,,1000
/// savings,bob,,500
/// transfer,alice,bob,250
/// interest,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn run_script<R: Read>(bank: &Bank, products: &Products, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " deposit "
        .flexible(true) // Allow trailing fields to be omitted
        .has_headers(true)
        .from_reader(reader);

    let mut aliases: HashMap<String, AccountId> = HashMap::new();

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(step) = record.into_step(products) else {
            tracing::warn!("skipping invalid script step");
            continue;
        };

        let operation = match step {
            Step::Open {
                alias,
                account_type,
                initial,
            } => {
                match bank.create_account(&alias, account_type, initial) {
                    Ok(id) => {
                        aliases.insert(alias, id);
                    }
                    Err(e) => tracing::warn!(alias, error = %e, "could not open account"),
                }
                continue;
            }
            Step::Interest => {
                if let Err(e) = bank.run_interest_batch() {
                    tracing::warn!(error = %e, "interest batch incomplete");
                }
                continue;
            }
            Step::Close { alias } => {
                if let Some(id) = aliases.remove(&alias) {
                    if let Err(e) = bank.close_account(id) {
                        tracing::warn!(alias, error = %e, "could not close account");
                    }
                }
                continue;
            }
            Step::Deposit { alias, amount } => {
                let Some(id) = resolve(&aliases, &alias) else { continue };
                Operation::deposit(id, amount)
            }
            Step::Withdraw { alias, amount } => {
                let Some(id) = resolve(&aliases, &alias) else { continue };
                Operation::withdraw(id, amount)
            }
            Step::Transfer { from, to, amount } => {
                let (Some(source), Some(target)) = (resolve(&aliases, &from), resolve(&aliases, &to))
                else {
                    continue;
                };
                Operation::transfer(source, target, amount)
            }
        };

        let result = bank.submit(operation).wait();
        if let Some(error) = result.error() {
            tracing::debug!(%error, "skipping failed operation");
        }
    }

    Ok(())
}

/// Flat account row for the CSV report.
#[derive(Debug, Serialize)]
struct AccountRow {
    id: AccountId,
    name: String,
    kind: &'static str,
    balance: Decimal,
    transactions: usize,
}

/// Write account states to a CSV writer
///
/// Outputs all open accounts ordered by id, balances rounded to 4 decimal
/// places.
///
/// # CSV Format
///
/// Columns: `id, name, kind, balance, transactions`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_accounts<W: Write>(bank: &Bank, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for account in bank.accounts() {
        wtr.serialize(AccountRow {
            id: account.id,
            name: account.name,
            kind: account.kind.label(),
            balance: account.balance.round_dp(Account::DECIMAL_PRECISION),
            transactions: account.transactions.len(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
