use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    AccountService, AppError, CreditRequest, ErrorKind, LedgerService, ProductInput,
    PurchaseRequest, TransferRequest,
};
use crate::domain::{
    Cents, Product, Transaction, Wallet, format_cents, ledger_now, parse_cents,
};
use crate::storage::{
    DEFAULT_PAGE_SIZE, Filter, Page, PageRequest, QueryError, Repository, Sort, StoreOptions,
    parse_timestamp,
};

mod logging;

pub use logging::{DEFAULT_FILTER, LogFormat, init_logging};

/// Wallet ledger: credits, transfers and product purchases over SQLite
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "An atomic wallet ledger with credits, transfers and purchases")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "WALLET_LEDGER_DB", default_value = "wallet-ledger.db", global = true)]
    pub database: String,

    /// Caller identity (UUID) owning the wallets it creates
    #[arg(short, long, env = "WALLET_LEDGER_USER", global = true)]
    pub user: Option<Uuid>,

    /// How long to wait for a locked wallet or product, in milliseconds
    #[arg(long, default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Rows per page for list commands
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, global = true)]
    pub page_size: u32,

    /// Log output format
    #[arg(long, value_enum, env = "WALLET_LEDGER_LOG_FORMAT", default_value_t, global = true)]
    pub log_format: LogFormat,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Product catalogue commands
    #[command(subcommand)]
    Product(ProductCommands),

    /// Add money to a wallet
    Credit {
        /// Wallet ID
        wallet: Uuid,

        /// Amount to credit (e.g., "50.00" or "50")
        amount: String,
    },

    /// Move money between wallets
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Sender wallet ID
        #[arg(long)]
        from: Uuid,

        /// Receiver wallet ID
        #[arg(long)]
        to: Uuid,
    },

    /// Buy a product with a wallet's balance
    Purchase {
        /// Wallet ID
        wallet: Uuid,

        /// Product ID
        product: Uuid,

        /// Units to buy
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },

    /// List ledger entries
    Transactions(ListArgs),

    /// Show a single ledger entry
    Show {
        /// Transaction ID
        id: Uuid,
    },

    /// Verify that every balance equals the sum of its entries
    Check,
}

/// Filtering, sorting and paging shared by list commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Conditions as field:value:op, comma-separated (op: eq lt gt lte gte in like)
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Sort rule as field:asc|desc
    #[arg(short, long)]
    pub sort: Option<String>,

    /// Page number, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub page: u32,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet owned by the caller
    Create {
        /// Wallet name (unique per owner)
        name: String,
    },

    /// Rename a wallet
    Rename {
        /// Wallet ID
        id: Uuid,

        /// New name
        name: String,
    },

    /// Delete a wallet and its entries
    Delete {
        /// Wallet ID
        id: Uuid,
    },

    /// Show wallet details
    Show {
        /// Wallet ID
        id: Uuid,
    },

    /// List wallets
    List(ListArgs),

    /// Compare a wallet's balance with the sum of its entries
    Audit {
        /// Wallet ID
        id: Uuid,
    },

    /// Show a wallet's entries in a time window, newest first
    History {
        /// Wallet ID
        id: Uuid,

        /// Window start, inclusive (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Window end, exclusive (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Add a product to the catalogue
    Create {
        /// Product name (must be unique)
        name: String,

        /// Unit price (e.g., "30.00")
        #[arg(long)]
        price: String,

        /// Units in stock
        #[arg(short, long, default_value_t = 0)]
        quantity: u32,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Replace a product's fields
    Update {
        /// Product ID
        id: Uuid,

        /// Product name
        #[arg(long)]
        name: String,

        /// Unit price
        #[arg(long)]
        price: String,

        /// Units in stock
        #[arg(short, long)]
        quantity: u32,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a product; past purchases keep their entries
    Delete {
        /// Product ID
        id: Uuid,
    },

    /// Show product details
    Show {
        /// Product ID
        id: Uuid,
    },

    /// List products
    List(ListArgs),
}

/// Services sharing one connection pool.
struct Services {
    accounts: AccountService,
    ledger: LedgerService,
}

impl Services {
    fn new(repo: Repository) -> Self {
        Self {
            accounts: AccountService::new(repo.clone()),
            ledger: LedgerService::new(repo),
        }
    }
}

impl Cli {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            ..StoreOptions::default()
        }
    }

    fn caller(&self) -> Result<Uuid> {
        self.user
            .context("No caller identity: pass --user or set WALLET_LEDGER_USER")
    }

    fn list_request(&self, args: &ListArgs) -> Result<(PageRequest, Filter, Option<Sort>), AppError> {
        let page = PageRequest::new(args.page, self.page_size)?;
        let filter = args
            .filter
            .as_deref()
            .map(Filter::parse)
            .transpose()?
            .unwrap_or_default();
        let sort = args.sort.as_deref().map(Sort::parse).transpose()?;
        Ok((page, filter, sort))
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        if let Commands::Init = self.command {
            Repository::init(&self.database, &self.store_options()).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let repo = Repository::connect(&self.database, &self.store_options())
            .await
            .with_context(|| format!("Cannot open {}; run `wallet-ledger init` first", self.database))?;
        let services = Services::new(repo);

        match &self.command {
            Commands::Init => {}

            Commands::Wallet(cmd) => self.run_wallet_command(&services, cmd).await?,

            Commands::Product(cmd) => self.run_product_command(&services.accounts, cmd).await?,

            Commands::Credit { wallet, amount } => {
                let amount = parse_amount(amount)?;
                let entry = services
                    .ledger
                    .credit(CreditRequest {
                        wallet_id: *wallet,
                        amount,
                    })
                    .await?;
                self.emit(&entry, |e| {
                    println!("Credited {} to {} ({})", format_cents(e.amount), e.wallet_id, e.id)
                })?;
            }

            Commands::Transfer { amount, from, to } => {
                let amount = parse_amount(amount)?;
                let result = services
                    .ledger
                    .transfer(TransferRequest {
                        sender_wallet_id: *from,
                        receiver_wallet_id: *to,
                        amount,
                    })
                    .await?;
                self.emit(&result, |r| {
                    println!(
                        "Transferred {}: {} -> {}",
                        format_cents(r.sender_transaction.amount),
                        r.sender_transaction.wallet_id,
                        r.receiver_transaction.wallet_id
                    );
                    println!("  {}", r.sender_transaction.id);
                    println!("  {}", r.receiver_transaction.id);
                })?;
            }

            Commands::Purchase {
                wallet,
                product,
                quantity,
            } => {
                let entry = services
                    .ledger
                    .purchase(PurchaseRequest {
                        wallet_id: *wallet,
                        product_id: *product,
                        quantity: *quantity,
                    })
                    .await?;
                self.emit(&entry, |e| println!("{} ({})", e.description, e.id))?;
            }

            Commands::Transactions(args) => {
                let (page, filter, sort) = self.list_request(args)?;
                let page = services
                    .ledger
                    .list_transactions(page, &filter, sort.as_ref())
                    .await?;
                self.emit(&page, print_transactions_page)?;
            }

            Commands::Show { id } => {
                let entry = services.ledger.get_transaction(*id).await?;
                self.emit(&entry, print_transaction)?;
            }

            Commands::Check => {
                let report = services.ledger.check_integrity().await?;
                self.emit(&report, |r| {
                    println!("Wallets:      {}", r.wallet_count);
                    println!("Transactions: {}", r.transaction_count);
                    println!();
                    for m in &r.mismatches {
                        println!(
                            "  - {} ({}): stored {}, ledger {}",
                            m.wallet_name,
                            m.wallet_id,
                            format_cents(m.stored),
                            format_cents(m.computed)
                        );
                    }
                    for id in &r.negative_wallets {
                        println!("  - wallet {} has a negative balance", id);
                    }
                    for id in &r.inconsistent_products {
                        println!("  - product {} availability disagrees with stock", id);
                    }
                })?;
                if !report.is_ok() {
                    anyhow::bail!("Ledger integrity check failed");
                }
                if !self.json {
                    println!("Ledger is consistent.");
                }
            }
        }

        Ok(())
    }

    async fn run_wallet_command(&self, services: &Services, cmd: &WalletCommands) -> Result<()> {
        let accounts = &services.accounts;
        match cmd {
            WalletCommands::Create { name } => {
                let wallet = accounts.create_wallet(self.caller()?, name).await?;
                self.emit(&wallet, |w| println!("Created wallet: {} ({})", w.name, w.id))?;
            }

            WalletCommands::Rename { id, name } => {
                let wallet = accounts.rename_wallet(self.caller()?, *id, name).await?;
                self.emit(&wallet, |w| println!("Renamed wallet {} to {}", w.id, w.name))?;
            }

            WalletCommands::Delete { id } => {
                accounts.delete_wallet(self.caller()?, *id).await?;
                println!("Deleted wallet: {}", id);
            }

            WalletCommands::Show { id } => {
                let wallet = accounts.get_wallet(*id).await?;
                self.emit(&wallet, print_wallet)?;
            }

            WalletCommands::List(args) => {
                let (page, filter, sort) = self.list_request(args)?;
                let page = accounts.list_wallets(page, &filter, sort.as_ref()).await?;
                self.emit(&page, |p| {
                    if p.rows.is_empty() {
                        println!("No wallets found.");
                        return;
                    }
                    println!("{:<36}  {:<20} {:>12}", "ID", "NAME", "BALANCE");
                    println!("{}", "-".repeat(70));
                    for w in &p.rows {
                        println!(
                            "{:<36}  {:<20} {:>12}",
                            w.id,
                            truncate(&w.name, 20),
                            format_cents(w.balance)
                        );
                    }
                    print_page_footer(p);
                })?;
            }

            WalletCommands::Audit { id } => {
                let audit = services.ledger.audit_wallet(*id).await?;
                self.emit(&audit, |a| {
                    println!("Wallet:  {} ({})", a.wallet_name, a.wallet_id);
                    println!("Entries: {}", a.entry_count);
                    println!("Stored:  {}", format_cents(a.stored));
                    println!("Ledger:  {}", format_cents(a.computed));
                    println!("Status:  {}", if a.is_consistent() { "OK" } else { "MISMATCH" });
                })?;
            }

            WalletCommands::History { id, from, to } => {
                let from = match from {
                    Some(raw) => parse_date(raw)?,
                    None => DateTime::<Utc>::UNIX_EPOCH,
                };
                let to = match to {
                    Some(raw) => parse_date(raw)?,
                    None => ledger_now() + chrono::Duration::seconds(1),
                };
                let history = accounts.wallet_history(*id, from, to).await?;
                self.emit(&history, |h| {
                    print_wallet(&h.wallet);
                    println!();
                    if h.transactions.is_empty() {
                        println!("No transactions in window.");
                    }
                    for entry in &h.transactions {
                        print_transaction_row(entry);
                    }
                })?;
            }
        }
        Ok(())
    }

    async fn run_product_command(&self, accounts: &AccountService, cmd: &ProductCommands) -> Result<()> {
        match cmd {
            ProductCommands::Create {
                name,
                price,
                quantity,
                description,
            } => {
                let product = accounts
                    .create_product(ProductInput {
                        name: name.clone(),
                        description: description.clone(),
                        price: parse_amount(price)?,
                        quantity: *quantity,
                    })
                    .await?;
                self.emit(&product, |p| println!("Created product: {} ({})", p.name, p.id))?;
            }

            ProductCommands::Update {
                id,
                name,
                price,
                quantity,
                description,
            } => {
                let product = accounts
                    .update_product(
                        *id,
                        ProductInput {
                            name: name.clone(),
                            description: description.clone(),
                            price: parse_amount(price)?,
                            quantity: *quantity,
                        },
                    )
                    .await?;
                self.emit(&product, print_product)?;
            }

            ProductCommands::Delete { id } => {
                accounts.delete_product(*id).await?;
                println!("Deleted product: {}", id);
            }

            ProductCommands::Show { id } => {
                let product = accounts.get_product(*id).await?;
                self.emit(&product, print_product)?;
            }

            ProductCommands::List(args) => {
                let (page, filter, sort) = self.list_request(args)?;
                let page = accounts.list_products(page, &filter, sort.as_ref()).await?;
                self.emit(&page, |p| {
                    if p.rows.is_empty() {
                        println!("No products found.");
                        return;
                    }
                    println!("{:<36}  {:<20} {:>10} {:>6}", "ID", "NAME", "PRICE", "QTY");
                    println!("{}", "-".repeat(76));
                    for product in &p.rows {
                        println!(
                            "{:<36}  {:<20} {:>10} {:>6}",
                            product.id,
                            truncate(&product.name, 20),
                            format_cents(product.price),
                            product.quantity
                        );
                    }
                    print_page_footer(p);
                })?;
            }
        }
        Ok(())
    }
}

/// Print `err` with a prefix for its kind and pick the matching exit status.
pub fn report_error(err: &anyhow::Error) -> ExitCode {
    let Some(app) = err.downcast_ref::<AppError>() else {
        eprintln!("error: {:#}", err);
        return ExitCode::FAILURE;
    };
    let (label, code) = match app.kind() {
        ErrorKind::NotFound => ("not found", 2),
        ErrorKind::InvalidArgument => ("invalid argument", 3),
        ErrorKind::PermissionDenied => ("rejected", 4),
        ErrorKind::Internal => ("internal error", 1),
    };
    eprintln!("{}: {}", label, app);
    ExitCode::from(code)
}

fn parse_amount(raw: &str) -> Result<Cents, AppError> {
    parse_cents(raw).map_err(|e| {
        AppError::InvalidAmount(format!("'{}' ({}). Use '50.00' or '50'", raw, e))
    })
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, AppError> {
    parse_timestamp(raw).ok_or_else(|| {
        AppError::InvalidQuery(QueryError::InvalidValue {
            field: "date".to_string(),
            value: raw.to_string(),
            reason: "use YYYY-MM-DD or RFC 3339".to_string(),
        })
    })
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn print_page_footer<T>(page: &Page<T>) {
    println!(
        "\nPage {}/{} ({} of {} rows)",
        page.page, page.total_pages, page.rows_on_page, page.total_count
    );
}

fn print_wallet(wallet: &Wallet) {
    println!("Wallet: {}", wallet.name);
    println!("  ID:       {}", wallet.id);
    println!("  Owner:    {}", wallet.owner_id);
    println!("  Balance:  {}", format_cents(wallet.balance));
    println!("  Created:  {}", wallet.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(last) = wallet.last_transaction_at {
        println!("  Last transaction: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
}

fn print_product(product: &Product) {
    println!("Product: {}", product.name);
    println!("  ID:        {}", product.id);
    if let Some(desc) = &product.description {
        println!("  Description: {}", desc);
    }
    println!("  Price:     {}", format_cents(product.price));
    println!("  In stock:  {}", product.quantity);
    println!("  Available: {}", if product.available { "yes" } else { "no" });
}

fn print_transaction(entry: &Transaction) {
    println!("Transaction: {}", entry.id);
    println!("  Kind:        {} ({})", entry.kind, entry.direction.as_str());
    println!("  Amount:      {}", format_cents(entry.signed_amount()));
    println!("  Wallet:      {}", entry.wallet_id);
    if let Some(other) = entry.counterparty_wallet_id {
        println!("  Counterpart: {}", other);
    }
    if let Some(product) = entry.product_id {
        println!("  Product:     {}", product);
    }
    println!("  Description: {}", entry.description);
    println!("  Date:        {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_transaction_row(entry: &Transaction) {
    println!(
        "{:<20} {:<9} {:>12}  {}",
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.kind,
        format_cents(entry.signed_amount()),
        truncate(&entry.description, 40)
    );
}

fn print_transactions_page(page: &Page<Transaction>) {
    if page.rows.is_empty() {
        println!("No transactions found.");
        return;
    }
    println!("{:<20} {:<9} {:>12}  DESCRIPTION", "DATE", "KIND", "AMOUNT");
    println!("{}", "-".repeat(70));
    for entry in &page.rows {
        print_transaction_row(entry);
    }
    print_page_footer(page);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_transfer() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "wallet-ledger",
            "--database",
            "test.db",
            "transfer",
            "12.50",
            "--from",
            &from.to_string(),
            "--to",
            &to.to_string(),
        ])
        .unwrap();

        assert_eq!(cli.database, "test.db");
        match cli.command {
            Commands::Transfer { amount, from: f, to: t } => {
                assert_eq!(parse_amount(&amount).unwrap(), 1250);
                assert_eq!(f, from);
                assert_eq!(t, to);
            }
            _ => panic!("expected transfer"),
        }
    }

    #[test]
    fn test_list_request_uses_page_size() {
        let cli = Cli::try_parse_from(["wallet-ledger", "--page-size", "5", "check"]).unwrap();
        let args = ListArgs {
            filter: Some("name:main:like".into()),
            sort: Some("balance:desc".into()),
            page: 2,
        };
        let (page, filter, sort) = cli.list_request(&args).unwrap();
        assert_eq!(page.page_size(), 5);
        assert_eq!(page.offset(), 5);
        assert_eq!(filter.conditions.len(), 1);
        assert_eq!(sort, Some(Sort::desc("balance")));
    }

    #[test]
    fn test_list_request_rejects_oversized_page() {
        let cli = Cli::try_parse_from(["wallet-ledger", "--page-size", "500", "check"]).unwrap();
        let err = cli.list_request(&ListArgs::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_bad_amount_and_date_are_invalid_arguments() {
        let err = parse_amount("12,50").unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));

        let err = anyhow::Error::from(parse_amount("lots").unwrap_err());
        let app = err.downcast_ref::<AppError>().unwrap();
        assert_eq!(app.kind(), ErrorKind::InvalidArgument);

        let err = parse_date("yesterday").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(parse_date("2024-01-15").is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long wallet name", 10), "a very ...");
    }
}
