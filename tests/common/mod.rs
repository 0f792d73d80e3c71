// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;
use wallet_ledger::application::{AccountService, CreditRequest, LedgerService, ProductInput};
use wallet_ledger::domain::{Cents, Product, Transaction, Wallet, WalletId};
use wallet_ledger::storage::{Filter, Repository, StoreOptions};

/// Both services over one temporary database.
pub struct TestLedger {
    pub repo: Repository,
    pub ledger: LedgerService,
    pub accounts: AccountService,
    pub owner: Uuid,
    _temp: TempDir,
}

/// Helper to create test services with a temporary database
pub async fn test_ledger() -> Result<TestLedger> {
    let temp = TempDir::new()?;
    let db_path = temp.path().join("test.db");
    let repo = Repository::init(db_path.to_str().unwrap(), &StoreOptions::default()).await?;
    Ok(TestLedger {
        ledger: LedgerService::new(repo.clone()),
        accounts: AccountService::new(repo.clone()),
        repo,
        owner: Uuid::new_v4(),
        _temp: temp,
    })
}

impl TestLedger {
    /// Create a wallet for the default owner, optionally funded by a credit.
    pub async fn wallet(&self, name: &str, funds: Cents) -> Result<Wallet> {
        let wallet = self.accounts.create_wallet(self.owner, name).await?;
        if funds > 0 {
            self.ledger
                .credit(CreditRequest {
                    wallet_id: wallet.id,
                    amount: funds,
                })
                .await?;
        }
        Ok(self.accounts.get_wallet(wallet.id).await?)
    }

    pub async fn product(&self, name: &str, price: Cents, quantity: u32) -> Result<Product> {
        Ok(self
            .accounts
            .create_product(ProductInput {
                name: name.to_string(),
                description: None,
                price,
                quantity,
            })
            .await?)
    }

    pub async fn balance(&self, wallet_id: WalletId) -> Result<Cents> {
        Ok(self.accounts.get_wallet(wallet_id).await?.balance)
    }

    pub async fn stock(&self, product: &Product) -> Result<u32> {
        Ok(self.accounts.get_product(product.id).await?.quantity)
    }

    pub async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.repo.find_all(&Filter::new(), None).await?)
    }
}
