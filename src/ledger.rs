//! Credit ledger contract and an in-memory implementation.
//!
//! The [`CreditLedger`] trait is the only way the engine touches credit
//! balances. A deduction must be atomic from the caller's side: it either
//! lowers the balance by the full amount and reports the new balance, or it
//! fails and leaves the balance alone.
//!
//! [`MemoryLedger`] keeps balances in a map and records every successful
//! deduction, which is what the CLI replay and the tests run against.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: u64, requested: u64 },
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for credit balances.
pub trait CreditLedger {
    /// Current balance of an account.
    fn balance(&self, account: &str) -> Result<u64, LedgerError>;

    /// Deduct `amount` credits. Returns the new balance.
    fn deduct(&mut self, account: &str, amount: u64) -> Result<u64, LedgerError>;
}

/// A deduction that went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub account: String,
    pub amount: u64,
    pub balance_after: u64,
}

/// Balances held in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: HashMap<String, u64>,
    deductions: Vec<Deduction>,
    offline: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger holding a single account.
    pub fn with_account(account: impl Into<String>, balance: u64) -> Self {
        let mut ledger = Self::new();
        ledger.credit(account, balance);
        ledger
    }

    /// Add credits to an account, opening it if needed.
    pub fn credit(&mut self, account: impl Into<String>, amount: u64) {
        let entry = self.balances.entry(account.into()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Every successful deduction, oldest first.
    pub fn deductions(&self) -> &[Deduction] {
        &self.deductions
    }

    /// Simulate an outage: all calls fail with [`LedgerError::Unavailable`].
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn ensure_online(&self) -> Result<(), LedgerError> {
        if self.offline {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }
}

impl CreditLedger for MemoryLedger {
    fn balance(&self, account: &str) -> Result<u64, LedgerError> {
        self.ensure_online()?;
        self.balances
            .get(account)
            .copied()
            .ok_or_else(|| LedgerError::UnknownAccount(account.to_string()))
    }

    fn deduct(&mut self, account: &str, amount: u64) -> Result<u64, LedgerError> {
        self.ensure_online()?;
        let balance = self
            .balances
            .get_mut(account)
            .ok_or_else(|| LedgerError::UnknownAccount(account.to_string()))?;
        if *balance < amount {
            warn!(account, balance = *balance, amount, "deduction refused");
            return Err(LedgerError::InsufficientCredits {
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        let balance_after = *balance;
        debug!(account, amount, balance_after, "credits deducted");
        self.deductions.push(Deduction {
            account: account.to_string(),
            amount,
            balance_after,
        });
        Ok(balance_after)
    }
}
