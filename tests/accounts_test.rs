mod common;

use anyhow::Result;
use chrono::Duration;
use common::test_ledger;
use uuid::Uuid;
use wallet_ledger::application::{AppError, ErrorKind, ProductInput, PurchaseRequest, TransferRequest};
use wallet_ledger::domain::ledger_now;

#[tokio::test]
async fn test_wallet_names_are_unique_per_owner() -> Result<()> {
    let t = test_ledger().await?;
    t.accounts.create_wallet(t.owner, "savings").await?;

    let err = t
        .accounts
        .create_wallet(t.owner, "savings")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletAlreadyExists(_)));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // Another owner may reuse the name
    let other = t.accounts.create_wallet(Uuid::new_v4(), "savings").await?;
    assert_eq!(other.name, "savings");
    assert_eq!(other.balance, 0);
    Ok(())
}

#[tokio::test]
async fn test_wallet_name_is_trimmed_and_required() -> Result<()> {
    let t = test_ledger().await?;
    let wallet = t.accounts.create_wallet(t.owner, "  travel  ").await?;
    assert_eq!(wallet.name, "travel");

    let err = t.accounts.create_wallet(t.owner, "   ").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidName(_)));
    Ok(())
}

#[tokio::test]
async fn test_rename_wallet() -> Result<()> {
    let t = test_ledger().await?;
    let main = t.wallet("main", 1500).await?;
    t.wallet("spare", 0).await?;

    // Keeping its own name is not a clash
    let same = t.accounts.rename_wallet(t.owner, main.id, "main").await?;
    assert_eq!(same.name, "main");

    let err = t
        .accounts
        .rename_wallet(t.owner, main.id, "spare")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletAlreadyExists(_)));

    let renamed = t.accounts.rename_wallet(t.owner, main.id, "daily").await?;
    assert_eq!(renamed.name, "daily");
    assert_eq!(renamed.balance, 1500);
    assert_eq!(t.accounts.get_wallet(main.id).await?.name, "daily");
    Ok(())
}

#[tokio::test]
async fn test_only_owner_can_rename_or_delete() -> Result<()> {
    let t = test_ledger().await?;
    let wallet = t.wallet("main", 0).await?;
    let stranger = Uuid::new_v4();

    let err = t
        .accounts
        .rename_wallet(stranger, wallet.id, "mine")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotWalletOwner(_)));

    let err = t
        .accounts
        .delete_wallet(stranger, wallet.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(t.accounts.get_wallet(wallet.id).await?.name, "main");
    Ok(())
}

#[tokio::test]
async fn test_delete_wallet_removes_its_entries() -> Result<()> {
    let t = test_ledger().await?;
    let alice = t.wallet("alice", 3000).await?;
    let bob = t.wallet("bob", 0).await?;
    let result = t
        .ledger
        .transfer(TransferRequest {
            sender_wallet_id: alice.id,
            receiver_wallet_id: bob.id,
            amount: 1000,
        })
        .await?;

    t.accounts.delete_wallet(t.owner, alice.id).await?;

    let err = t.accounts.get_wallet(alice.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = t
        .ledger
        .get_transaction(result.sender_transaction.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransactionNotFound(_)));

    // Bob's side of the transfer stays on Bob's wallet
    let kept = t
        .ledger
        .get_transaction(result.receiver_transaction.id)
        .await?;
    assert_eq!(kept.counterparty_wallet_id, Some(alice.id));
    assert!(t.ledger.check_integrity().await?.is_ok());

    let err = t
        .accounts
        .delete_wallet(t.owner, alice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_wallet_history_window() -> Result<()> {
    let t = test_ledger().await?;
    let wallet = t.wallet("main", 1000).await?;
    let other = t.wallet("other", 0).await?;
    t.ledger
        .transfer(TransferRequest {
            sender_wallet_id: wallet.id,
            receiver_wallet_id: other.id,
            amount: 400,
        })
        .await?;

    let now = ledger_now();
    let history = t
        .accounts
        .wallet_history(wallet.id, now - Duration::hours(1), now + Duration::hours(1))
        .await?;
    assert_eq!(history.wallet.id, wallet.id);
    assert_eq!(history.transactions.len(), 2);
    assert!(history.transactions.iter().all(|tx| tx.wallet_id == wallet.id));
    assert!(history.transactions[0].created_at >= history.transactions[1].created_at);

    // Nothing was recorded before the wallet existed
    let empty = t
        .accounts
        .wallet_history(wallet.id, now - Duration::hours(2), now - Duration::hours(1))
        .await?;
    assert!(empty.transactions.is_empty());

    let err = t
        .accounts
        .wallet_history(wallet.id, now, now - Duration::hours(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = t
        .accounts
        .wallet_history(Uuid::new_v4(), now - Duration::hours(1), now)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_product_lifecycle() -> Result<()> {
    let t = test_ledger().await?;
    let product = t
        .accounts
        .create_product(ProductInput {
            name: "Lamp".to_string(),
            description: Some("Desk lamp".to_string()),
            price: 4500,
            quantity: 0,
        })
        .await?;
    assert!(!product.available);
    assert_eq!(product.description.as_deref(), Some("Desk lamp"));

    let restocked = t
        .accounts
        .update_product(
            product.id,
            ProductInput {
                name: "Lamp".to_string(),
                description: None,
                price: 4000,
                quantity: 7,
            },
        )
        .await?;
    assert!(restocked.available);
    assert_eq!(restocked.quantity, 7);
    assert_eq!(restocked.price, 4000);
    assert_eq!(restocked.description, None);
    assert_eq!(t.accounts.get_product(product.id).await?, restocked);

    t.accounts.delete_product(product.id).await?;
    let err = t.accounts.get_product(product.id).await.unwrap_err();
    assert!(matches!(err, AppError::ProductNotFound(_)));
    let err = t.accounts.delete_product(product.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_product_validation_and_duplicates() -> Result<()> {
    let t = test_ledger().await?;
    let lamp = t.product("Lamp", 4500, 1).await?;
    let chair = t.product("Chair", 9000, 1).await?;

    let err = t.product("Lamp", 100, 1).await.unwrap_err();
    let err = err.downcast::<AppError>()?;
    assert!(matches!(err, AppError::ProductAlreadyExists(_)));

    let err = t
        .accounts
        .update_product(
            chair.id,
            ProductInput {
                name: "Lamp".to_string(),
                description: None,
                price: 9000,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProductAlreadyExists(_)));

    let err = t
        .accounts
        .create_product(ProductInput {
            name: "Free".to_string(),
            description: None,
            price: 0,
            quantity: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = t
        .accounts
        .update_product(
            Uuid::new_v4(),
            ProductInput {
                name: "Ghost".to_string(),
                description: None,
                price: 100,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProductNotFound(_)));

    assert_eq!(t.accounts.get_product(lamp.id).await?.price, 4500);
    Ok(())
}

#[tokio::test]
async fn test_restocked_product_can_be_bought_again() -> Result<()> {
    let t = test_ledger().await?;
    let wallet = t.wallet("main", 10000).await?;
    let lamp = t.product("Lamp", 1000, 1).await?;
    let buy = PurchaseRequest {
        wallet_id: wallet.id,
        product_id: lamp.id,
        quantity: 1,
    };

    t.ledger.purchase(buy).await?;
    assert!(t.ledger.purchase(buy).await.is_err());

    t.accounts
        .update_product(
            lamp.id,
            ProductInput {
                name: "Lamp".to_string(),
                description: None,
                price: 1000,
                quantity: 2,
            },
        )
        .await?;
    t.ledger.purchase(buy).await?;
    assert_eq!(t.stock(&lamp).await?, 1);
    assert_eq!(t.balance(wallet.id).await?, 8000);
    Ok(())
}
