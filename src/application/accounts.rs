use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{OwnerId, Product, ProductId, Transaction, Wallet, WalletId};
use crate::storage::{
    Filter, Operator, Page, PageRequest, QueryError, Repository, Sort, format_timestamp,
    is_unique_violation,
};

use super::{AppError, ProductInput};

/// A wallet together with its entries inside a time window, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct WalletHistory {
    pub wallet: Wallet,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
}

/// Wallet and product management. Nothing here moves money; balances and
/// stock levels only change through [`super::LedgerService`], except for
/// restocking a product.
#[derive(Debug, Clone)]
pub struct AccountService {
    repo: Repository,
}

fn clean_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidName("name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Map a failed write to `duplicate` when a UNIQUE constraint rejected it.
fn unique_or(err: anyhow::Error, duplicate: impl FnOnce() -> AppError) -> AppError {
    if is_unique_violation(&err) {
        duplicate()
    } else {
        AppError::Database(err)
    }
}

impl AccountService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    // ========================
    // Wallets
    // ========================

    pub async fn create_wallet(&self, owner_id: OwnerId, name: &str) -> Result<Wallet, AppError> {
        let name = clean_name(name)?;

        let existing: Option<Wallet> = self
            .repo
            .find_one_by_filter(&Filter::new().eq("owner_id", owner_id).eq("name", &name), None)
            .await?;
        if existing.is_some() {
            return Err(AppError::WalletAlreadyExists(name));
        }

        let mut tx = self.repo.begin().await?;

        let wallet = Wallet::new(name, owner_id);
        self.repo
            .create_in_tx(&mut *tx, &wallet)
            .await
            .map_err(|e| unique_or(e, || AppError::WalletAlreadyExists(wallet.name.clone())))?;
        tx.commit().await.context("Failed to commit wallet")?;

        tracing::info!(wallet_id = %wallet.id, owner_id = %owner_id, name = %wallet.name, "created wallet");
        Ok(wallet)
    }

    /// Only the name of a wallet can change; the balance belongs to the ledger.
    pub async fn rename_wallet(
        &self,
        owner_id: OwnerId,
        wallet_id: WalletId,
        name: &str,
    ) -> Result<Wallet, AppError> {
        let name = clean_name(name)?;
        let mut tx = self.repo.begin().await?;

        let mut wallet = self
            .repo
            .lock_by_id_in_tx::<Wallet>(&mut *tx, wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
        if wallet.owner_id != owner_id {
            return Err(AppError::NotWalletOwner(wallet_id.to_string()));
        }

        let clash: Option<Wallet> = self
            .repo
            .find_one_by_filter_in_tx(
                &mut *tx,
                &Filter::new().eq("owner_id", owner_id).eq("name", &name),
                None,
            )
            .await?;
        if clash.is_some_and(|other| other.id != wallet.id) {
            return Err(AppError::WalletAlreadyExists(name));
        }

        wallet.name = name;
        self.repo
            .update_in_tx(&mut *tx, &wallet)
            .await
            .map_err(|e| unique_or(e, || AppError::WalletAlreadyExists(wallet.name.clone())))?;
        tx.commit().await.context("Failed to commit wallet rename")?;

        tracing::info!(wallet_id = %wallet.id, name = %wallet.name, "renamed wallet");
        Ok(wallet)
    }

    /// Delete a wallet and, with it, every entry recorded on it.
    pub async fn delete_wallet(&self, owner_id: OwnerId, wallet_id: WalletId) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let wallet = self
            .repo
            .lock_by_id_in_tx::<Wallet>(&mut *tx, wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))?;
        if wallet.owner_id != owner_id {
            return Err(AppError::NotWalletOwner(wallet_id.to_string()));
        }

        self.repo.delete_by_id_in_tx::<Wallet>(&mut *tx, wallet_id).await?;
        tx.commit().await.context("Failed to commit wallet deletion")?;

        tracing::info!(wallet_id = %wallet_id, "deleted wallet");
        Ok(())
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet, AppError> {
        self.repo
            .find_by_id::<Wallet>(wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))
    }

    pub async fn list_wallets(
        &self,
        page: PageRequest,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Page<Wallet>, AppError> {
        Ok(self.repo.find_paginated(page, filter, sort).await?)
    }

    /// Entries of a wallet created in `[from, to)`, newest first.
    pub async fn wallet_history(
        &self,
        wallet_id: WalletId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<WalletHistory, AppError> {
        if from > to {
            return Err(AppError::InvalidQuery(QueryError::InvalidValue {
                field: "from".to_string(),
                value: format_timestamp(&from),
                reason: "start of the window is after its end".to_string(),
            }));
        }
        let wallet = self.get_wallet(wallet_id).await?;

        let filter = Filter::new()
            .eq("wallet_id", wallet_id)
            .and("created_at", Operator::Gte, format_timestamp(&from))
            .and("created_at", Operator::Lt, format_timestamp(&to));
        let transactions = self
            .repo
            .find_all(&filter, Some(&Sort::desc("created_at")))
            .await?;

        Ok(WalletHistory {
            wallet,
            from,
            to,
            transactions,
        })
    }

    // ========================
    // Products
    // ========================

    fn validate_product(input: &ProductInput) -> Result<String, AppError> {
        let name = clean_name(&input.name)?;
        if input.price <= 0 {
            return Err(AppError::InvalidAmount(
                "price must be greater than zero".to_string(),
            ));
        }
        Ok(name)
    }

    pub async fn create_product(&self, input: ProductInput) -> Result<Product, AppError> {
        let name = Self::validate_product(&input)?;

        let existing: Option<Product> = self
            .repo
            .find_one_by_filter(&Filter::new().eq("name", &name), None)
            .await?;
        if existing.is_some() {
            return Err(AppError::ProductAlreadyExists(name));
        }

        let mut tx = self.repo.begin().await?;

        let mut product = Product::new(name, input.price, input.quantity);
        product.description = clean_description(input.description);
        self.repo
            .create_in_tx(&mut *tx, &product)
            .await
            .map_err(|e| unique_or(e, || AppError::ProductAlreadyExists(product.name.clone())))?;
        tx.commit().await.context("Failed to commit product")?;

        tracing::info!(product_id = %product.id, name = %product.name, quantity = product.quantity, "created product");
        Ok(product)
    }

    /// Replace a product's name, description, price and stock level.
    pub async fn update_product(
        &self,
        product_id: ProductId,
        input: ProductInput,
    ) -> Result<Product, AppError> {
        let name = Self::validate_product(&input)?;
        let mut tx = self.repo.begin().await?;

        let mut product = self
            .repo
            .lock_by_id_in_tx::<Product>(&mut *tx, product_id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(product_id.to_string()))?;

        let clash: Option<Product> = self
            .repo
            .find_one_by_filter_in_tx(&mut *tx, &Filter::new().eq("name", &name), None)
            .await?;
        if clash.is_some_and(|other| other.id != product.id) {
            return Err(AppError::ProductAlreadyExists(name));
        }

        product.name = name;
        product.description = clean_description(input.description);
        product.price = input.price;
        product.set_quantity(input.quantity);
        self.repo
            .update_in_tx(&mut *tx, &product)
            .await
            .map_err(|e| unique_or(e, || AppError::ProductAlreadyExists(product.name.clone())))?;
        tx.commit().await.context("Failed to commit product update")?;

        tracing::info!(product_id = %product.id, quantity = product.quantity, "updated product");
        Ok(product)
    }

    /// Delete a product. Purchases that referenced it keep their entry but
    /// lose the reference.
    pub async fn delete_product(&self, product_id: ProductId) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        if !self
            .repo
            .delete_by_id_in_tx::<Product>(&mut *tx, product_id)
            .await?
        {
            return Err(AppError::ProductNotFound(product_id.to_string()));
        }
        tx.commit().await.context("Failed to commit product deletion")?;

        tracing::info!(product_id = %product_id, "deleted product");
        Ok(())
    }

    pub async fn get_product(&self, product_id: ProductId) -> Result<Product, AppError> {
        self.repo
            .find_by_id::<Product>(product_id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(product_id.to_string()))
    }

    pub async fn list_products(
        &self,
        page: PageRequest,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Page<Product>, AppError> {
        Ok(self.repo.find_paginated(page, filter, sort).await?)
    }
}
