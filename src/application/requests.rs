use serde::{Deserialize, Serialize};

use crate::domain::{Cents, ProductId, Transaction, WalletId};

/// Add money to a wallet from outside the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub wallet_id: WalletId,
    pub amount: Cents,
}

/// Move money between two wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender_wallet_id: WalletId,
    pub receiver_wallet_id: WalletId,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub sender_transaction: Transaction,
    pub receiver_transaction: Transaction,
}

/// Buy `quantity` units of a product with a wallet's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub wallet_id: WalletId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Fields accepted when creating or replacing a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInput {
    pub name: String,
    pub description: Option<String>,
    pub price: Cents,
    pub quantity: u32,
}
