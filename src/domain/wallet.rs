use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, ledger_now};

pub type WalletId = Uuid;

/// Identity of the (already authenticated) user that owns a wallet.
pub type OwnerId = Uuid;

/// A user-owned balance. Only ledger operations move `balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub name: String,
    pub owner_id: OwnerId,
    /// Never negative once a ledger operation has committed.
    pub balance: Cents,
    /// Set on every balance change.
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(name: impl Into<String>, owner_id: OwnerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id,
            balance: 0,
            last_transaction_at: None,
            created_at: ledger_now(),
        }
    }

    pub fn can_afford(&self, amount: Cents) -> bool {
        self.balance >= amount
    }

    pub fn increase(&mut self, amount: Cents, at: DateTime<Utc>) {
        self.balance += amount;
        self.last_transaction_at = Some(at);
    }

    /// Callers check `can_afford` first; the store rejects negative balances anyway.
    pub fn decrease(&mut self, amount: Cents, at: DateTime<Utc>) {
        self.balance -= amount;
        self.last_transaction_at = Some(at);
    }
}
