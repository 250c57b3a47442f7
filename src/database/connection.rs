use mongodb::{
    bson::doc,
    options::IndexOptions,
    Client, Collection, Database, IndexModel,
};

use crate::models::transaction::PaymentTransaction;

pub async fn get_db_client(database_url: &str) -> Database {
    let client = Client::with_uri_str(database_url)
        .await
        .expect("Failed to connect to MongoDB");

    let db_name = "dukadb";
    let db = client.database(db_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            println!("✅ Connected to database: {}", db_name);
            println!("📂 Collections found: {:?}", collections);
        }
        Err(e) => {
            eprintln!("❌ Database '{}' may not exist or is inaccessible: {}", db_name, e);
        }
    }

    db
}

/// Unique sparse indexes on the gateway correlation ids. The callback
/// handler matches on these, so two ledger rows must never share one.
/// Sparse because the ids are absent until the gateway responds.
pub async fn ensure_indexes(db: &Database) {
    let transactions: Collection<PaymentTransaction> = db.collection("transactions");

    for field in ["merchant_request_id", "checkout_request_id"] {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).sparse(true).build())
            .build();

        match transactions.create_index(index).await {
            Ok(_) => tracing::info!("Ensured unique index on transactions.{}", field),
            Err(e) => tracing::warn!("Failed to create index on transactions.{}: {}", field, e),
        }
    }
}
