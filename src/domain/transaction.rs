use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, ProductId, WalletId, format_cents};

pub type TransactionId = Uuid;

/// Current time truncated to whole seconds, the precision the ledger persists.
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which way the money moved relative to the owning wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// An append-only ledger entry against a single wallet.
/// Entries are never updated; a transfer is recorded as two entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub direction: Direction,
    /// Always positive; the sign comes from `direction`.
    pub amount: Cents,
    pub description: String,
    pub wallet_id: WalletId,
    /// Present only on purchase-derived expenses.
    pub product_id: Option<ProductId>,
    /// The other wallet of a transfer.
    pub counterparty_wallet_id: Option<WalletId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    fn new(
        kind: TransactionKind,
        direction: Direction,
        wallet_id: WalletId,
        amount: Cents,
        description: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            kind,
            direction,
            amount,
            description,
            wallet_id,
            product_id: None,
            counterparty_wallet_id: None,
            created_at,
        }
    }

    /// Money entering a wallet from outside the ledger.
    pub fn credit(wallet_id: WalletId, amount: Cents, at: DateTime<Utc>) -> Self {
        Self::new(
            TransactionKind::Income,
            Direction::In,
            wallet_id,
            amount,
            format!("Credit of {}", format_cents(amount)),
            at,
        )
    }

    /// The sender's side of a transfer.
    pub fn transfer_out(
        sender_id: WalletId,
        receiver_id: WalletId,
        receiver_name: &str,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            TransactionKind::Transfer,
            Direction::Out,
            sender_id,
            amount,
            format!("Transfer to: {}", receiver_name),
            at,
        );
        tx.counterparty_wallet_id = Some(receiver_id);
        tx
    }

    /// The receiver's side of a transfer.
    pub fn transfer_in(
        receiver_id: WalletId,
        sender_id: WalletId,
        sender_name: &str,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            TransactionKind::Transfer,
            Direction::In,
            receiver_id,
            amount,
            format!("Transfer from: {}", sender_name),
            at,
        );
        tx.counterparty_wallet_id = Some(sender_id);
        tx
    }

    /// The expense recorded when a wallet buys `quantity` units of a product.
    pub fn purchase(
        wallet_id: WalletId,
        product_id: ProductId,
        product_name: &str,
        quantity: u32,
        total: Cents,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            TransactionKind::Expense,
            Direction::Out,
            wallet_id,
            total,
            format!(
                "Buying {}, quantity: {} for {}",
                product_name,
                quantity,
                format_cents(total)
            ),
            at,
        );
        tx.product_id = Some(product_id);
        tx
    }

    /// Amount with the sign it contributes to the wallet balance.
    pub fn signed_amount(&self) -> Cents {
        match self.direction {
            Direction::In => self.amount,
            Direction::Out => -self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_is_positive_income() {
        let wallet = Uuid::new_v4();
        let tx = Transaction::credit(wallet, 5000, ledger_now());

        assert_eq!(tx.kind, TransactionKind::Income);
        assert_eq!(tx.signed_amount(), 5000);
        assert_eq!(tx.description, "Credit of 50.00");
        assert!(tx.product_id.is_none());
    }

    #[test]
    fn test_transfer_legs_offset_each_other() {
        let (sender, receiver) = (Uuid::new_v4(), Uuid::new_v4());
        let at = ledger_now();
        let out = Transaction::transfer_out(sender, receiver, "savings", 2000, at);
        let inc = Transaction::transfer_in(receiver, sender, "personal", 2000, at);

        assert_eq!(out.signed_amount() + inc.signed_amount(), 0);
        assert_eq!(out.description, "Transfer to: savings");
        assert_eq!(inc.description, "Transfer from: personal");
        assert_eq!(out.counterparty_wallet_id, Some(receiver));
        assert_eq!(inc.counterparty_wallet_id, Some(sender));
    }

    #[test]
    fn test_purchase_references_product() {
        let product = Uuid::new_v4();
        let tx = Transaction::purchase(Uuid::new_v4(), product, "Coffee", 2, 6000, ledger_now());

        assert_eq!(tx.kind, TransactionKind::Expense);
        assert_eq!(tx.product_id, Some(product));
        assert_eq!(tx.signed_amount(), -6000);
        assert_eq!(tx.description, "Buying Coffee, quantity: 2 for 60.00");
    }

    #[test]
    fn test_ledger_now_has_second_precision() {
        assert_eq!(ledger_now().timestamp_subsec_nanos(), 0);
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        Transaction::credit(Uuid::new_v4(), 0, ledger_now());
    }
}
