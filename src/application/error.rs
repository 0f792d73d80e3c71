use thiserror::Error;

use crate::domain::{Cents, format_cents};
use crate::storage::{LookupError, QueryError};

/// Coarse classification of every [`AppError`], for delivery layers that
/// map errors to statuses without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced wallet, product or transaction does not exist.
    NotFound,
    /// Structurally invalid input reached the service.
    InvalidArgument,
    /// A business rule rejected the operation.
    PermissionDenied,
    /// The store failed, including a failed commit.
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Cannot transfer from a wallet to itself: {0}")]
    SameWalletTransfer(String),

    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    #[error("{wallet_name} does not have enough balance. Balance: {}, required: {}", format_cents(Cents::clone(.balance)), format_cents(Cents::clone(.required)))]
    InsufficientFunds {
        wallet_name: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Product {name} does not have enough quantity or is unavailable (requested {requested}, in stock {in_stock})")]
    ProductUnavailable {
        name: String,
        requested: u32,
        in_stock: u32,
    },

    /// A purchase referenced a product that does not exist.
    #[error("Product does not exist: {0}")]
    UnknownProduct(String),

    #[error("Wallet {0} belongs to another user")]
    NotWalletOwner(String),

    #[error("Wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("Product already exists: {0}")]
    ProductAlreadyExists(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::WalletNotFound(_)
            | AppError::ProductNotFound(_)
            | AppError::TransactionNotFound(_) => ErrorKind::NotFound,
            AppError::InvalidAmount(_)
            | AppError::InvalidQuantity(_)
            | AppError::InvalidName(_)
            | AppError::SameWalletTransfer(_)
            | AppError::InvalidQuery(_) => ErrorKind::InvalidArgument,
            AppError::InsufficientFunds { .. }
            | AppError::ProductUnavailable { .. }
            | AppError::UnknownProduct(_)
            | AppError::NotWalletOwner(_)
            | AppError::WalletAlreadyExists(_)
            | AppError::ProductAlreadyExists(_) => ErrorKind::PermissionDenied,
            AppError::Database(_) => ErrorKind::Internal,
        }
    }
}

impl From<LookupError> for AppError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Query(e) => AppError::InvalidQuery(e),
            LookupError::Store(e) => AppError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_surfaces_balance() {
        let err = AppError::InsufficientFunds {
            wallet_name: "personal".into(),
            balance: 1000,
            required: 6000,
        };
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            err.to_string(),
            "personal does not have enough balance. Balance: 10.00, required: 60.00"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(AppError::WalletNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(AppError::UnknownProduct("x".into()).kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            AppError::from(LookupError::Query(QueryError::MalformedSort("x".into()))).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            AppError::Database(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Internal
        );
    }
}
