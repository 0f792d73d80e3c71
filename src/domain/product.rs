use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, ledger_now};

pub type ProductId = Uuid;

/// An item that wallets can purchase. `available` is derived from `quantity`
/// and is never set on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub price: Cents,
    pub quantity: u32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Cents, quantity: u32) -> Self {
        let now = ledger_now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            price,
            quantity,
            available: quantity > 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the stock level, keeping `available` in sync.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.available = quantity > 0;
        self.updated_at = ledger_now();
    }

    /// True when `requested` units can be taken from stock right now.
    pub fn can_supply(&self, requested: u32) -> bool {
        self.available && self.quantity >= 1 && requested <= self.quantity
    }

    /// Price of `requested` units, or `None` on overflow.
    pub fn total_for(&self, requested: u32) -> Option<Cents> {
        self.price.checked_mul(Cents::from(requested))
    }

    /// Remove `requested` units from stock. Callers check `can_supply` first.
    pub fn take(&mut self, requested: u32) {
        self.set_quantity(self.quantity.saturating_sub(requested));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_follows_quantity() {
        let mut product = Product::new("Coffee", 350, 2);
        assert!(product.available);

        product.take(2);
        assert_eq!(product.quantity, 0);
        assert!(!product.available);

        product.set_quantity(4);
        assert!(product.available);
    }

    #[test]
    fn test_new_product_without_stock_is_unavailable() {
        let product = Product::new("Ghost", 100, 0);
        assert!(!product.available);
        assert!(!product.can_supply(1));
    }

    #[test]
    fn test_can_supply() {
        let product = Product::new("Tea", 300, 5);
        assert!(product.can_supply(5));
        assert!(!product.can_supply(6));
    }

    #[test]
    fn test_total_for_detects_overflow() {
        let product = Product::new("Gold", Cents::MAX / 2, 10);
        assert_eq!(product.total_for(1), Some(Cents::MAX / 2));
        assert_eq!(product.total_for(3), None);
    }
}
