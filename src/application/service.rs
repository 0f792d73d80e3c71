use anyhow::Context;

use crate::domain::{
    IntegrityReport, Product, Transaction, TransactionId, Wallet, WalletAudit, WalletId,
    audit_wallet, build_integrity_report, ledger_now,
};
use crate::storage::{Filter, Page, PageRequest, Repository, Sort};

use super::{AppError, CreditRequest, ErrorKind, PurchaseRequest, TransferRequest, TransferResult};

/// The ledger engine: every balance-affecting operation runs here, inside a
/// single atomic scope that either commits all of its writes or none.
///
/// Wallets and products are locked before any business rule is evaluated
/// against them, so concurrent operations on the same rows serialize instead
/// of losing updates. Dropping an operation's future rolls its scope back.
#[derive(Debug, Clone)]
pub struct LedgerService {
    repo: Repository,
}

fn log_rejection(operation: &'static str, err: &AppError) {
    match err.kind() {
        ErrorKind::Internal => tracing::error!(operation, error = %err, "ledger operation failed"),
        kind => tracing::warn!(operation, ?kind, error = %err, "ledger operation rejected"),
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Balance operations
    // ========================

    /// Credit `amount` to a wallet, recording an income entry.
    pub async fn credit(&self, req: CreditRequest) -> Result<Transaction, AppError> {
        self.apply_credit(req)
            .await
            .inspect_err(|e| log_rejection("credit", e))
    }

    async fn apply_credit(&self, req: CreditRequest) -> Result<Transaction, AppError> {
        if req.amount <= 0 {
            return Err(AppError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let mut tx = self.repo.begin().await?;
        let mut wallet = self
            .repo
            .lock_by_id_in_tx::<Wallet>(&mut *tx, req.wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(req.wallet_id.to_string()))?;
        if wallet.balance.checked_add(req.amount).is_none() {
            return Err(AppError::InvalidAmount("balance would overflow".to_string()));
        }

        let at = ledger_now();
        let entry = Transaction::credit(wallet.id, req.amount, at);
        self.repo.create_in_tx(&mut *tx, &entry).await?;

        wallet.increase(req.amount, at);
        self.repo.update_in_tx(&mut *tx, &wallet).await?;

        tx.commit().await.context("Failed to commit credit")?;
        tracing::info!(
            wallet_id = %wallet.id,
            amount = req.amount,
            balance = wallet.balance,
            "credited wallet"
        );
        Ok(entry)
    }

    /// Move `amount` from one wallet to another, recording one entry on each.
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferResult, AppError> {
        self.apply_transfer(req)
            .await
            .inspect_err(|e| log_rejection("transfer", e))
    }

    async fn apply_transfer(&self, req: TransferRequest) -> Result<TransferResult, AppError> {
        if req.amount <= 0 {
            return Err(AppError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        if req.sender_wallet_id == req.receiver_wallet_id {
            return Err(AppError::SameWalletTransfer(req.sender_wallet_id.to_string()));
        }

        let mut tx = self.repo.begin().await?;

        // Lock in ascending id order whatever the roles, so two opposite
        // transfers between the same pair can't wait on each other.
        let (first_id, second_id) = if req.sender_wallet_id < req.receiver_wallet_id {
            (req.sender_wallet_id, req.receiver_wallet_id)
        } else {
            (req.receiver_wallet_id, req.sender_wallet_id)
        };
        let first = self.repo.lock_by_id_in_tx::<Wallet>(&mut *tx, first_id).await?;
        let second = self.repo.lock_by_id_in_tx::<Wallet>(&mut *tx, second_id).await?;
        let (sender, receiver) = if first_id == req.sender_wallet_id {
            (first, second)
        } else {
            (second, first)
        };

        let mut sender =
            sender.ok_or_else(|| AppError::WalletNotFound(req.sender_wallet_id.to_string()))?;
        let mut receiver =
            receiver.ok_or_else(|| AppError::WalletNotFound(req.receiver_wallet_id.to_string()))?;

        if !sender.can_afford(req.amount) {
            return Err(AppError::InsufficientFunds {
                wallet_name: sender.name,
                balance: sender.balance,
                required: req.amount,
            });
        }
        if receiver.balance.checked_add(req.amount).is_none() {
            return Err(AppError::InvalidAmount("balance would overflow".to_string()));
        }

        let at = ledger_now();
        let sender_transaction =
            Transaction::transfer_out(sender.id, receiver.id, &receiver.name, req.amount, at);
        self.repo.create_in_tx(&mut *tx, &sender_transaction).await?;
        sender.decrease(req.amount, at);
        self.repo.update_in_tx(&mut *tx, &sender).await?;

        let receiver_transaction =
            Transaction::transfer_in(receiver.id, sender.id, &sender.name, req.amount, at);
        self.repo.create_in_tx(&mut *tx, &receiver_transaction).await?;
        receiver.increase(req.amount, at);
        self.repo.update_in_tx(&mut *tx, &receiver).await?;

        tx.commit().await.context("Failed to commit transfer")?;
        tracing::info!(
            sender_id = %sender.id,
            receiver_id = %receiver.id,
            amount = req.amount,
            "transferred between wallets"
        );
        Ok(TransferResult {
            sender_transaction,
            receiver_transaction,
        })
    }

    /// Buy units of a product: stock goes down, the wallet is charged and an
    /// expense entry referencing the product is recorded.
    pub async fn purchase(&self, req: PurchaseRequest) -> Result<Transaction, AppError> {
        self.apply_purchase(req)
            .await
            .inspect_err(|e| log_rejection("purchase", e))
    }

    async fn apply_purchase(&self, req: PurchaseRequest) -> Result<Transaction, AppError> {
        if req.quantity == 0 {
            return Err(AppError::InvalidQuantity(
                "quantity must be greater than zero".to_string(),
            ));
        }

        let mut tx = self.repo.begin().await?;
        let mut wallet = self
            .repo
            .lock_by_id_in_tx::<Wallet>(&mut *tx, req.wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(req.wallet_id.to_string()))?;
        let mut product = self
            .repo
            .lock_by_id_in_tx::<Product>(&mut *tx, req.product_id)
            .await?
            .ok_or_else(|| AppError::UnknownProduct(req.product_id.to_string()))?;

        if !product.can_supply(req.quantity) {
            return Err(AppError::ProductUnavailable {
                name: product.name,
                requested: req.quantity,
                in_stock: product.quantity,
            });
        }
        let total = product
            .total_for(req.quantity)
            .ok_or_else(|| AppError::InvalidAmount("purchase total overflows".to_string()))?;
        if !wallet.can_afford(total) {
            return Err(AppError::InsufficientFunds {
                wallet_name: wallet.name,
                balance: wallet.balance,
                required: total,
            });
        }

        product.take(req.quantity);
        self.repo.update_in_tx(&mut *tx, &product).await?;

        let at = ledger_now();
        wallet.decrease(total, at);
        self.repo.update_in_tx(&mut *tx, &wallet).await?;

        let entry =
            Transaction::purchase(wallet.id, product.id, &product.name, req.quantity, total, at);
        self.repo.create_in_tx(&mut *tx, &entry).await?;

        tx.commit().await.context("Failed to commit purchase")?;
        tracing::info!(
            wallet_id = %wallet.id,
            product_id = %product.id,
            quantity = req.quantity,
            total,
            remaining = product.quantity,
            "purchased product"
        );
        Ok(entry)
    }

    // ========================
    // Reads
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .find_by_id::<Transaction>(id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))
    }

    pub async fn list_transactions(
        &self,
        page: PageRequest,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Page<Transaction>, AppError> {
        Ok(self.repo.find_paginated(page, filter, sort).await?)
    }

    /// All entries of one wallet, oldest first.
    pub async fn wallet_transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, AppError> {
        let filter = Filter::new().eq("wallet_id", wallet_id);
        Ok(self
            .repo
            .find_all(&filter, Some(&Sort::asc("created_at")))
            .await?)
    }

    /// Recompute one wallet's balance from its entries.
    pub async fn audit_wallet(&self, wallet_id: WalletId) -> Result<WalletAudit, AppError> {
        let wallet: Wallet = self
            .repo
            .find_by_id(wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
        let transactions = self.wallet_transactions(wallet_id).await?;
        Ok(audit_wallet(&wallet, &transactions))
    }

    /// Recompute every balance from the ledger and report inconsistencies.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let everything = Filter::new();
        let wallets: Vec<Wallet> = self.repo.find_all(&everything, None).await?;
        let transactions: Vec<Transaction> = self.repo.find_all(&everything, None).await?;
        let products: Vec<Product> = self.repo.find_all(&everything, None).await?;

        let report = build_integrity_report(&wallets, &transactions, &products);
        if !report.is_ok() {
            tracing::warn!(
                mismatches = report.mismatches.len(),
                negative = report.negative_wallets.len(),
                products = report.inconsistent_products.len(),
                "ledger integrity check failed"
            );
        }
        Ok(report)
    }
}

