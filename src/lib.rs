// Card Optimizer - Core Library
// Scoring and selection, plus the catalog client, store and CLI/server glue

pub mod card;       // Card profiles, reward evaluator, bonus matching
pub mod scoring;    // Best reward tier for one card
pub mod wallet;     // Best card across a wallet
pub mod catalog;    // Card catalog HTTP client
pub mod db;         // SQLite store for cards, domains, transactions
pub mod shop;       // Wallet building, merchant resolution, transact
pub mod config;
pub mod telemetry;

// Re-export commonly used types
pub use card::{AnnualSpend, Benefit, BonusRule, CardProfile};
pub use scoring::{score_card, RewardValue};
pub use wallet::{select_best, Wallet, WalletSelection};
pub use catalog::{
    CardCatalog, CardSummary, CatalogClient, CatalogConfig, CatalogError, Endpoint, IssuerCards,
};
pub use db::{
    Domain, MerchantDetails, TransactionRecord, normalize_domain,
    setup_database, open_database,
    insert_card, get_cards_by_keys, get_all_cards, card_count,
    insert_domain, get_domain_by_name, import_domains_csv,
    insert_transaction, get_all_transactions, transaction_count,
};
pub use shop::{
    build_wallet, build_wallet_shared, get_cards, get_cards_shared, resolve_category,
    stored_wallet, transact, MerchantCategory, TransactError, WalletError, UNKNOWN_CATEGORY_ID,
};
pub use config::{AppConfig, AppEnvironment, ConfigError};
