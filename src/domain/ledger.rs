use std::collections::HashMap;

use serde::Serialize;

use super::{Cents, Product, ProductId, Transaction, Wallet, WalletId};

/// Compute the balance for a single wallet from its ledger entries.
/// Balance = sum of inflows - sum of outflows.
pub fn compute_balance(wallet_id: WalletId, transactions: &[Transaction]) -> Cents {
    transactions
        .iter()
        .filter(|tx| tx.wallet_id == wallet_id)
        .map(Transaction::signed_amount)
        .sum()
}

/// Compute balances for all wallets that appear in `transactions`.
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<WalletId, Cents> {
    let mut balances: HashMap<WalletId, Cents> = HashMap::new();
    for tx in transactions {
        *balances.entry(tx.wallet_id).or_insert(0) += tx.signed_amount();
    }
    balances
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub wallet_id: WalletId,
    pub wallet_name: String,
    pub stored: Cents,
    pub computed: Cents,
}

/// Result of auditing the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub wallet_count: usize,
    pub transaction_count: usize,
    /// Wallets whose stored balance differs from the sum of their entries.
    pub mismatches: Vec<BalanceMismatch>,
    pub negative_wallets: Vec<WalletId>,
    /// Products whose `available` flag disagrees with their quantity.
    pub inconsistent_products: Vec<ProductId>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
            && self.negative_wallets.is_empty()
            && self.inconsistent_products.is_empty()
    }
}

/// One wallet's stored balance next to the sum of its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletAudit {
    pub wallet_id: WalletId,
    pub wallet_name: String,
    pub stored: Cents,
    pub computed: Cents,
    pub entry_count: usize,
}

impl WalletAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.computed
    }
}

pub fn audit_wallet(wallet: &Wallet, transactions: &[Transaction]) -> WalletAudit {
    WalletAudit {
        wallet_id: wallet.id,
        wallet_name: wallet.name.clone(),
        stored: wallet.balance,
        computed: compute_balance(wallet.id, transactions),
        entry_count: transactions.iter().filter(|tx| tx.wallet_id == wallet.id).count(),
    }
}

pub fn build_integrity_report(
    wallets: &[Wallet],
    transactions: &[Transaction],
    products: &[Product],
) -> IntegrityReport {
    let computed = compute_all_balances(transactions);

    let mismatches = wallets
        .iter()
        .filter_map(|wallet| {
            let computed = computed.get(&wallet.id).copied().unwrap_or(0);
            (computed != wallet.balance).then(|| BalanceMismatch {
                wallet_id: wallet.id,
                wallet_name: wallet.name.clone(),
                stored: wallet.balance,
                computed,
            })
        })
        .collect();

    IntegrityReport {
        wallet_count: wallets.len(),
        transaction_count: transactions.len(),
        mismatches,
        negative_wallets: wallets
            .iter()
            .filter(|w| w.balance < 0)
            .map(|w| w.id)
            .collect(),
        inconsistent_products: products
            .iter()
            .filter(|p| p.available != (p.quantity > 0))
            .map(|p| p.id)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::ledger_now;

    #[test]
    fn test_compute_balance_empty() {
        assert_eq!(compute_balance(Uuid::new_v4(), &[]), 0);
    }

    #[test]
    fn test_compute_balance_mixed() {
        let wallet = Uuid::new_v4();
        let other = Uuid::new_v4();
        let at = ledger_now();
        let transactions = vec![
            Transaction::credit(wallet, 10000, at),
            Transaction::transfer_out(wallet, other, "other", 2500, at),
            Transaction::transfer_in(other, wallet, "wallet", 2500, at),
            Transaction::purchase(wallet, Uuid::new_v4(), "Tea", 1, 500, at),
        ];

        assert_eq!(compute_balance(wallet, &transactions), 7000);
        assert_eq!(compute_balance(other, &transactions), 2500);
    }

    #[test]
    fn test_audit_wallet_ignores_other_wallets() {
        let mut wallet = Wallet::new("main", Uuid::new_v4());
        let at = ledger_now();
        wallet.increase(1500, at);
        let transactions = vec![
            Transaction::credit(wallet.id, 1500, at),
            Transaction::credit(Uuid::new_v4(), 900, at),
        ];

        let audit = audit_wallet(&wallet, &transactions);
        assert!(audit.is_consistent());
        assert_eq!(audit.computed, 1500);
        assert_eq!(audit.entry_count, 1);

        wallet.increase(1, at);
        assert!(!audit_wallet(&wallet, &transactions).is_consistent());
    }

    #[test]
    fn test_transfers_conserve_money() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let at = ledger_now();
        let transactions = vec![
            Transaction::transfer_out(a, b, "b", 700, at),
            Transaction::transfer_in(b, a, "a", 700, at),
        ];

        let total: Cents = compute_all_balances(&transactions).values().sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_integrity_report_flags_mismatch() {
        let owner = Uuid::new_v4();
        let mut good = Wallet::new("good", owner);
        let mut bad = Wallet::new("bad", owner);
        let at = ledger_now();
        good.increase(1000, at);
        bad.increase(1000, at);
        let transactions = vec![Transaction::credit(good.id, 1000, at)];

        let mut product = Product::new("Tea", 300, 0);
        product.available = true;

        let report = build_integrity_report(&[good, bad.clone()], &transactions, &[product.clone()]);

        assert!(!report.is_ok());
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].wallet_id, bad.id);
        assert_eq!(report.mismatches[0].computed, 0);
        assert_eq!(report.inconsistent_products, vec![product.id]);
    }
}
