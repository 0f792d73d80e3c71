use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::domain::{Direction, Product, Transaction, TransactionKind, Wallet};

use super::query::{FieldKind, FieldSpec, Value, format_timestamp};

/// A many-to-many link table whose rows are replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub target_column: &'static str,
    pub targets: Vec<Uuid>,
}

/// Compile-time mapping between a domain entity and its table.
///
/// `FIELDS` is the whitelist of columns that callers may filter and sort on;
/// anything else is rejected before a statement is built.
pub trait Record: Sized + Send + Sync + Unpin {
    /// Human-readable entity name, used in errors and logs.
    const ENTITY: &'static str;
    const TABLE: &'static str;
    /// Select list, in the order `from_row` expects.
    const COLUMNS: &'static str;
    const FIELDS: &'static [FieldSpec];
    /// Non-key column rewritten with its own value to take the write lock.
    const LOCK_COLUMN: &'static str;

    fn id(&self) -> Uuid;

    fn from_row(row: &SqliteRow) -> Result<Self>;

    /// Every persisted column and its value, starting with `id`.
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Link tables this entity owns. None of the ledger entities have any;
    /// single-valued references are plain columns in `values`.
    fn associations(&self) -> Vec<Association> {
        Vec::new()
    }
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).with_context(|| format!("Invalid {}", column))
}

fn parse_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid {}", column))
}

fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Invalid {} timestamp", column))?
        .with_timezone(&Utc))
}

fn parse_opt_time(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column);
    Ok(raw
        .map(|s| DateTime::parse_from_rfc3339(&s))
        .transpose()
        .with_context(|| format!("Invalid {} timestamp", column))?
        .map(|dt| dt.with_timezone(&Utc)))
}

impl Record for Wallet {
    const ENTITY: &'static str = "wallet";
    const TABLE: &'static str = "wallets";
    const COLUMNS: &'static str = "id, name, owner_id, balance, last_transaction_at, created_at";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("id", FieldKind::Id),
        FieldSpec::new("name", FieldKind::Text),
        FieldSpec::new("owner_id", FieldKind::Id),
        FieldSpec::new("balance", FieldKind::Money),
        FieldSpec::new("last_transaction_at", FieldKind::Timestamp),
        FieldSpec::new("created_at", FieldKind::Timestamp),
    ];
    const LOCK_COLUMN: &'static str = "balance";

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Wallet {
            id: parse_uuid(row, "id")?,
            name: row.get("name"),
            owner_id: parse_uuid(row, "owner_id")?,
            balance: row.get("balance"),
            last_transaction_at: parse_opt_time(row, "last_transaction_at")?,
            created_at: parse_time(row, "created_at")?,
        })
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Text(self.id.to_string())),
            ("name", Value::Text(self.name.clone())),
            ("owner_id", Value::Text(self.owner_id.to_string())),
            ("balance", Value::Integer(self.balance)),
            (
                "last_transaction_at",
                Value::opt_text(self.last_transaction_at.as_ref().map(format_timestamp)),
            ),
            ("created_at", Value::Text(format_timestamp(&self.created_at))),
        ]
    }
}

impl Record for Product {
    const ENTITY: &'static str = "product";
    const TABLE: &'static str = "products";
    const COLUMNS: &'static str =
        "id, name, description, price, quantity, available, created_at, updated_at";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("id", FieldKind::Id),
        FieldSpec::new("name", FieldKind::Text),
        FieldSpec::new("description", FieldKind::Text),
        FieldSpec::new("price", FieldKind::Money),
        FieldSpec::new("quantity", FieldKind::Integer),
        FieldSpec::new("available", FieldKind::Bool),
        FieldSpec::new("created_at", FieldKind::Timestamp),
        FieldSpec::new("updated_at", FieldKind::Timestamp),
    ];
    const LOCK_COLUMN: &'static str = "quantity";

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let quantity: i64 = row.get("quantity");
        Ok(Product {
            id: parse_uuid(row, "id")?,
            name: row.get("name"),
            description: row.get("description"),
            price: row.get("price"),
            quantity: u32::try_from(quantity).context("Invalid product quantity")?,
            available: row.get::<i32, _>("available") != 0,
            created_at: parse_time(row, "created_at")?,
            updated_at: parse_time(row, "updated_at")?,
        })
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Text(self.id.to_string())),
            ("name", Value::Text(self.name.clone())),
            ("description", Value::opt_text(self.description.as_ref())),
            ("price", Value::Integer(self.price)),
            ("quantity", Value::Integer(i64::from(self.quantity))),
            ("available", Value::Bool(self.available)),
            ("created_at", Value::Text(format_timestamp(&self.created_at))),
            ("updated_at", Value::Text(format_timestamp(&self.updated_at))),
        ]
    }
}

impl Record for Transaction {
    const ENTITY: &'static str = "transaction";
    const TABLE: &'static str = "transactions";
    const COLUMNS: &'static str = "id, kind, direction, amount, description, wallet_id, product_id, counterparty_wallet_id, created_at";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("id", FieldKind::Id),
        FieldSpec::new("kind", FieldKind::Text),
        FieldSpec::new("direction", FieldKind::Text),
        FieldSpec::new("amount", FieldKind::Money),
        FieldSpec::new("description", FieldKind::Text),
        FieldSpec::new("wallet_id", FieldKind::Id),
        FieldSpec::new("product_id", FieldKind::Id),
        FieldSpec::new("counterparty_wallet_id", FieldKind::Id),
        FieldSpec::new("created_at", FieldKind::Timestamp),
    ];
    const LOCK_COLUMN: &'static str = "amount";

    fn id(&self) -> Uuid {
        self.id
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let kind: String = row.get("kind");
        let direction: String = row.get("direction");
        Ok(Transaction {
            id: parse_uuid(row, "id")?,
            kind: TransactionKind::from_str(&kind)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind))?,
            direction: Direction::from_str(&direction)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction direction: {}", direction))?,
            amount: row.get("amount"),
            description: row.get("description"),
            wallet_id: parse_uuid(row, "wallet_id")?,
            product_id: parse_opt_uuid(row, "product_id")?,
            counterparty_wallet_id: parse_opt_uuid(row, "counterparty_wallet_id")?,
            created_at: parse_time(row, "created_at")?,
        })
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Text(self.id.to_string())),
            ("kind", Value::Text(self.kind.as_str().to_string())),
            ("direction", Value::Text(self.direction.as_str().to_string())),
            ("amount", Value::Integer(self.amount)),
            ("description", Value::Text(self.description.clone())),
            ("wallet_id", Value::Text(self.wallet_id.to_string())),
            ("product_id", Value::opt_text(self.product_id)),
            (
                "counterparty_wallet_id",
                Value::opt_text(self.counterparty_wallet_id),
            ),
            ("created_at", Value::Text(format_timestamp(&self.created_at))),
        ]
    }
}
