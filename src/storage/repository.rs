use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::query::{Filter, Page, PageRequest, QueryError, QueryPlan, Sort};
use super::{MIGRATION_001_INITIAL, Record};

/// An open atomic scope. Dropping it without `commit` rolls back.
pub type Tx = sqlx::Transaction<'static, Sqlite>;

/// Connection settings for the SQLite store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for another scope to release its lock.
    pub busy_timeout: Duration,
    pub max_connections: u32,
    /// Create the database file if it doesn't exist.
    pub create: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 8,
            create: false,
        }
    }
}

/// Error from a lookup: either the caller's query was invalid or the store failed.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// True when `err` was caused by a UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

/// Generic persistence for every [`Record`] type.
///
/// Writes take the caller's open scope (`&mut SqliteConnection`, usually
/// `&mut *tx`) and never begin or commit on their own.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database file.
    pub async fn connect(database_path: &str, options: &StoreOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))
            .context("Invalid database path")?
            .create_if_missing(options.create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_path: &str, options: &StoreOptions) -> Result<Self> {
        let options = StoreOptions {
            create: true,
            ..options.clone()
        };
        let repo = Self::connect(database_path, &options).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Open an atomic scope.
    pub async fn begin(&self) -> Result<Tx> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // ========================
    // Writes (inside a scope)
    // ========================

    pub async fn create_in_tx<E: Record>(&self, conn: &mut SqliteConnection, record: &E) -> Result<()> {
        let values = record.values();
        let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} (", E::TABLE));
        for (i, (column, _)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(*column);
        }
        qb.push(") VALUES (");
        for (i, (_, value)) in values.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            value.push_bind(&mut qb);
        }
        qb.push(")");

        qb.build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create {}", E::ENTITY))?;
        self.replace_associations(conn, record).await
    }

    /// Full-row update by id, then replacement of the record's link tables.
    /// Returns false when no row had that id.
    pub async fn update_in_tx<E: Record>(&self, conn: &mut SqliteConnection, record: &E) -> Result<bool> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", E::TABLE));
        let mut first = true;
        for (column, value) in record.values().into_iter().filter(|(c, _)| *c != "id") {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push(column).push(" = ");
            value.push_bind(&mut qb);
        }
        qb.push(" WHERE id = ");
        qb.push_bind(record.id().to_string());

        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to update {}", E::ENTITY))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        self.replace_associations(conn, record).await?;
        Ok(true)
    }

    async fn replace_associations<E: Record>(&self, conn: &mut SqliteConnection, record: &E) -> Result<()> {
        let owner = record.id().to_string();
        for association in record.associations() {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "DELETE FROM {} WHERE {} = ",
                association.table, association.owner_column
            ));
            qb.push_bind(owner.clone());
            qb.build()
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed to clear {}", association.table))?;

            if association.targets.is_empty() {
                continue;
            }
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "INSERT INTO {} ({}, {}) ",
                association.table, association.owner_column, association.target_column
            ));
            qb.push_values(&association.targets, |mut row, target| {
                row.push_bind(owner.clone()).push_bind(target.to_string());
            });
            qb.build()
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed to link {}", association.table))?;
        }
        Ok(())
    }

    /// Returns false when no row had that id.
    pub async fn delete_by_id_in_tx<E: Record>(&self, conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", E::TABLE))
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to delete {}", E::ENTITY))?;
        Ok(result.rows_affected() > 0)
    }

    /// Read a row and take the write lock on it for the rest of the scope.
    ///
    /// SQLite locks the database rather than rows, so the read is issued as a
    /// no-op write: whoever gets here second waits (up to the busy timeout)
    /// until the first scope commits or rolls back, then sees its result.
    pub async fn lock_by_id_in_tx<E: Record>(&self, conn: &mut SqliteConnection, id: Uuid) -> Result<Option<E>> {
        let row = sqlx::query(&format!(
            "UPDATE {table} SET {lock} = {lock} WHERE id = ? RETURNING {columns}",
            table = E::TABLE,
            lock = E::LOCK_COLUMN,
            columns = E::COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("Failed to lock {}", E::ENTITY))?;

        row.as_ref().map(E::from_row).transpose()
    }

    // ========================
    // Reads
    // ========================

    pub async fn find_by_id<E: Record>(&self, id: Uuid) -> Result<Option<E>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = ?",
            E::COLUMNS,
            E::TABLE
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch {}", E::ENTITY))?;

        row.as_ref().map(E::from_row).transpose()
    }

    fn select<E: Record>(plan: &QueryPlan) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", E::COLUMNS, E::TABLE));
        plan.push_where(&mut qb);
        plan.push_order(&mut qb);
        qb
    }

    pub async fn find_all<E: Record>(&self, filter: &Filter, sort: Option<&Sort>) -> Result<Vec<E>, LookupError> {
        let plan = QueryPlan::build(E::ENTITY, E::FIELDS, filter, sort)?;
        let mut qb = Self::select::<E>(&plan);
        tracing::debug!(sql = qb.sql(), "find_all {}", E::ENTITY);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list {}", E::TABLE))?;
        Ok(rows.iter().map(E::from_row).collect::<Result<_>>()?)
    }

    /// First row matching `filter` under `sort`, if any.
    pub async fn find_one_by_filter<E: Record>(&self, filter: &Filter, sort: Option<&Sort>) -> Result<Option<E>, LookupError> {
        let plan = QueryPlan::build(E::ENTITY, E::FIELDS, filter, sort)?;
        let mut qb = Self::select::<E>(&plan);
        qb.push(" LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch {}", E::ENTITY))?;
        Ok(row.as_ref().map(E::from_row).transpose()?)
    }

    /// Like [`find_one_by_filter`](Self::find_one_by_filter), but reads through
    /// the caller's open scope. Issue it after the scope's lock so it sees
    /// committed state and doesn't need a second pooled connection.
    pub async fn find_one_by_filter_in_tx<E: Record>(
        &self,
        conn: &mut SqliteConnection,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Option<E>, LookupError> {
        let plan = QueryPlan::build(E::ENTITY, E::FIELDS, filter, sort)?;
        let mut qb = Self::select::<E>(&plan);
        qb.push(" LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("Failed to fetch {}", E::ENTITY))?;
        Ok(row.as_ref().map(E::from_row).transpose()?)
    }

    /// One page of rows matching `filter`. A page past the end is empty, not an error.
    pub async fn find_paginated<E: Record>(
        &self,
        page: PageRequest,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Page<E>, LookupError> {
        let plan = QueryPlan::build(E::ENTITY, E::FIELDS, filter, sort)?;

        let mut count = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) AS count FROM {}", E::TABLE));
        plan.push_where(&mut count);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", E::TABLE))?
            .get("count");

        let mut qb = Self::select::<E>(&plan);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(page.page_size()));
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());
        tracing::debug!(sql = qb.sql(), total, "find_paginated {}", E::ENTITY);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list {}", E::TABLE))?;
        let rows = rows.iter().map(E::from_row).collect::<Result<Vec<_>>>()?;

        Ok(Page::new(page, u64::try_from(total).unwrap_or(0), rows))
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqliteRow;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::{Association, FieldKind, FieldSpec, Value};

    /// A named group of wallets, kept in a link table.
    #[derive(Debug, Clone, PartialEq)]
    struct Group {
        id: Uuid,
        name: String,
        members: Vec<Uuid>,
    }

    impl Record for Group {
        const ENTITY: &'static str = "group";
        const TABLE: &'static str = "wallet_groups";
        const COLUMNS: &'static str = "id, name";
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::new("id", FieldKind::Id),
            FieldSpec::new("name", FieldKind::Text),
        ];
        const LOCK_COLUMN: &'static str = "name";

        fn id(&self) -> Uuid {
            self.id
        }

        fn from_row(row: &SqliteRow) -> Result<Self> {
            let id: String = row.get("id");
            Ok(Group {
                id: Uuid::parse_str(&id)?,
                name: row.get("name"),
                members: Vec::new(),
            })
        }

        fn values(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::Text(self.id.to_string())),
                ("name", Value::Text(self.name.clone())),
            ]
        }

        fn associations(&self) -> Vec<Association> {
            vec![Association {
                table: "wallet_group_members",
                owner_column: "group_id",
                target_column: "wallet_id",
                targets: self.members.clone(),
            }]
        }
    }

    async fn group_store() -> Result<(Repository, TempDir)> {
        let dir = TempDir::new()?;
        let path = dir.path().join("groups.db");
        let options = StoreOptions {
            create: true,
            ..StoreOptions::default()
        };
        let repo = Repository::connect(&path.to_string_lossy(), &options).await?;
        sqlx::query(
            "CREATE TABLE wallet_groups (id TEXT PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE wallet_group_members (
                 group_id TEXT NOT NULL,
                 wallet_id TEXT NOT NULL,
                 PRIMARY KEY (group_id, wallet_id)
             );",
        )
        .execute(&repo.pool)
        .await?;
        Ok((repo, dir))
    }

    async fn members(repo: &Repository, group: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT wallet_id FROM wallet_group_members WHERE group_id = ?")
            .bind(group.to_string())
            .fetch_all(&repo.pool)
            .await?;
        let mut ids = rows
            .iter()
            .map(|row| Uuid::parse_str(&row.get::<String, _>("wallet_id")))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }

    #[tokio::test]
    async fn test_create_and_update_replace_links() -> Result<()> {
        let (repo, _dir) = group_store().await?;
        let mut first = vec![Uuid::new_v4(), Uuid::new_v4()];
        first.sort();
        let mut group = Group {
            id: Uuid::new_v4(),
            name: "family".to_string(),
            members: first.clone(),
        };
        let other = Group {
            id: Uuid::new_v4(),
            name: "work".to_string(),
            members: vec![Uuid::new_v4()],
        };

        let mut tx = repo.begin().await?;
        repo.create_in_tx(&mut *tx, &group).await?;
        repo.create_in_tx(&mut *tx, &other).await?;
        tx.commit().await?;
        assert_eq!(members(&repo, group.id).await?, first);

        group.members = vec![first[1], Uuid::new_v4()];
        let mut tx = repo.begin().await?;
        assert!(repo.update_in_tx(&mut *tx, &group).await?);
        tx.commit().await?;
        let mut expected = group.members.clone();
        expected.sort();
        assert_eq!(members(&repo, group.id).await?, expected);

        // An empty set clears the links and leaves other owners alone
        group.members.clear();
        let mut tx = repo.begin().await?;
        assert!(repo.update_in_tx(&mut *tx, &group).await?);
        tx.commit().await?;
        assert!(members(&repo, group.id).await?.is_empty());
        assert_eq!(members(&repo, other.id).await?, other.members);
        Ok(())
    }

    #[tokio::test]
    async fn test_rolled_back_links_are_discarded() -> Result<()> {
        let (repo, _dir) = group_store().await?;
        let group = Group {
            id: Uuid::new_v4(),
            name: "trip".to_string(),
            members: vec![Uuid::new_v4()],
        };

        let mut tx = repo.begin().await?;
        repo.create_in_tx(&mut *tx, &group).await?;
        drop(tx);

        assert!(repo.find_by_id::<Group>(group.id).await?.is_none());
        assert!(members(&repo, group.id).await?.is_empty());

        // Updating a missing row touches no links
        let mut tx = repo.begin().await?;
        assert!(!repo.update_in_tx(&mut *tx, &group).await?);
        tx.commit().await?;
        assert!(members(&repo, group.id).await?.is_empty());
        Ok(())
    }
}
