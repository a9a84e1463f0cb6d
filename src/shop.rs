// 🛒 Shop - Wallet building, merchant resolution, and recording purchases
//
// Flow: card keys → cached or fetched profiles → wallet
//       domain → merchant category → best card → stored transaction

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use crate::card::CardProfile;
use crate::catalog::{CardCatalog, CatalogError};
use crate::db::{self, MerchantDetails, TransactionRecord};
use crate::wallet::Wallet;

/// Category id used for scoring when a domain has no known category.
/// No bonus rule targets it, so every card falls back to its base rate.
pub const UNKNOWN_CATEGORY_ID: i64 = -1;

// ============================================================================
// MERCHANT CATEGORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MerchantCategory {
    Resolved { id: i64, name: String },
    Unknown,
}

impl MerchantCategory {
    /// Category id to score with
    pub fn id(&self) -> i64 {
        match self {
            MerchantCategory::Resolved { id, .. } => *id,
            MerchantCategory::Unknown => UNKNOWN_CATEGORY_ID,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MerchantCategory::Resolved { name, .. } => name,
            MerchantCategory::Unknown => "",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, MerchantCategory::Resolved { .. })
    }
}

/// Map a merchant domain to its spending category
pub fn resolve_category(conn: &Connection, domain_name: &str) -> Result<MerchantCategory> {
    let category = match db::get_domain_by_name(conn, domain_name)? {
        Some(domain) => MerchantCategory::Resolved {
            id: domain.category_id,
            name: domain.category_name,
        },
        None => {
            warn!(domain = domain_name, "no category known for domain");
            MerchantCategory::Unknown
        }
    };

    Ok(category)
}

// ============================================================================
// WALLET BUILDING
// ============================================================================

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("card catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Profiles for `card_keys`, in the order given.
///
/// Cards already in the store are reused; the rest are fetched from the
/// catalog and stored before being returned. A repeated key yields one card.
/// The first catalog failure aborts the whole call and nothing is stored.
pub fn get_cards<C>(
    conn: &Connection,
    catalog: &C,
    card_keys: &[String],
) -> Result<Vec<CardProfile>, WalletError>
where
    C: CardCatalog + ?Sized,
{
    let keys = unique_keys(card_keys);
    let cached = db::get_cards_by_keys(conn, card_keys)?;
    let fetched = fetch_missing(catalog, &keys, &cached)?;
    store_fetched(conn, &fetched)?;

    Ok(in_request_order(&keys, cached, fetched))
}

/// Same as [`get_cards`] for a connection shared between threads.
///
/// The lock is only held while reading and writing the store, never across
/// catalog requests.
pub fn get_cards_shared<C>(
    db: &Mutex<Connection>,
    catalog: &C,
    card_keys: &[String],
) -> Result<Vec<CardProfile>, WalletError>
where
    C: CardCatalog + ?Sized,
{
    let keys = unique_keys(card_keys);
    let cached = db::get_cards_by_keys(&*lock(db)?, card_keys)?;
    let fetched = fetch_missing(catalog, &keys, &cached)?;
    if !fetched.is_empty() {
        store_fetched(&*lock(db)?, &fetched)?;
    }

    Ok(in_request_order(&keys, cached, fetched))
}

pub fn build_wallet<C>(
    conn: &Connection,
    catalog: &C,
    card_keys: &[String],
) -> Result<Wallet, WalletError>
where
    C: CardCatalog + ?Sized,
{
    let cards = get_cards(conn, catalog, card_keys)?;
    info!(cards = cards.len(), "built wallet");
    Ok(Wallet::new(cards))
}

pub fn build_wallet_shared<C>(
    db: &Mutex<Connection>,
    catalog: &C,
    card_keys: &[String],
) -> Result<Wallet, WalletError>
where
    C: CardCatalog + ?Sized,
{
    let cards = get_cards_shared(db, catalog, card_keys)?;
    info!(cards = cards.len(), "built wallet");
    Ok(Wallet::new(cards))
}

fn lock(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow!("database lock poisoned"))
}

fn unique_keys(card_keys: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    card_keys
        .iter()
        .map(String::as_str)
        .filter(|key| seen.insert(*key))
        .collect()
}

/// Catalog profiles for keys with no stored copy, keyed by requested key
fn fetch_missing<C>(
    catalog: &C,
    keys: &[&str],
    cached: &HashMap<String, CardProfile>,
) -> Result<Vec<(String, CardProfile)>, CatalogError>
where
    C: CardCatalog + ?Sized,
{
    let mut fetched = Vec::new();
    for key in keys {
        if cached.contains_key(*key) {
            continue;
        }
        let card = catalog.fetch_card_detail(key)?;
        info!(card = %card.card_name, "fetched card from catalog");
        fetched.push((key.to_string(), card));
    }
    Ok(fetched)
}

fn store_fetched(conn: &Connection, fetched: &[(String, CardProfile)]) -> Result<()> {
    for (_, card) in fetched {
        db::insert_card(conn, card)?;
    }
    Ok(())
}

fn in_request_order(
    keys: &[&str],
    mut cached: HashMap<String, CardProfile>,
    fetched: Vec<(String, CardProfile)>,
) -> Vec<CardProfile> {
    if !cached.is_empty() {
        info!(cards = cached.len(), "found stored cards");
    }
    cached.extend(fetched);
    keys.iter().filter_map(|key| cached.remove(*key)).collect()
}

/// Wallet from stored cards only; unknown keys are skipped
pub fn stored_wallet(conn: &Connection, card_keys: &[String]) -> Result<Wallet> {
    if card_keys.is_empty() {
        return Ok(Wallet::new(db::get_all_cards(conn)?));
    }

    let mut stored = db::get_cards_by_keys(conn, card_keys)?;
    let cards = card_keys
        .iter()
        .filter_map(|key| {
            let card = stored.remove(key);
            if card.is_none() {
                warn!(card_key = %key, "card not in store, skipping");
            }
            card
        })
        .collect();

    Ok(Wallet::new(cards))
}

// ============================================================================
// TRANSACT
// ============================================================================

#[derive(Debug, Error)]
pub enum TransactError {
    #[error("spend amount must be a non-negative number, got {0}")]
    InvalidAmount(f64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Pick the best card in `wallet` for a purchase at `domain_name` and record it
pub fn transact(
    conn: &Connection,
    domain_name: &str,
    amount: f64,
    wallet: &Wallet,
) -> Result<TransactionRecord, TransactError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(TransactError::InvalidAmount(amount));
    }

    let domain_name = db::normalize_domain(domain_name);
    let category = resolve_category(conn, &domain_name)?;
    let selection = wallet.select_best(category.id());

    if selection.is_empty() {
        warn!(domain = %domain_name, cards = wallet.len(), "no card earns rewards for this purchase");
    } else {
        info!(
            "Transacting ${:.2} with card {:?} for {:.2}% value back",
            amount,
            selection.card_name,
            selection.reward.percent_back()
        );
    }

    let record = TransactionRecord::new(
        amount,
        MerchantDetails {
            category_id: category.id(),
            category_name: category.name().to_string(),
            domain_name,
        },
        selection,
    );

    db::insert_transaction(conn, &record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::BonusRule;
    use crate::catalog::IssuerCards;
    use crate::db::{setup_database, Domain};
    use std::sync::Arc;

    /// In-memory catalog that records which keys were fetched
    struct StubCatalog {
        cards: HashMap<String, CardProfile>,
        fetched: Mutex<Vec<String>>,
    }

    impl StubCatalog {
        fn new(cards: Vec<CardProfile>) -> Self {
            StubCatalog {
                cards: cards.into_iter().map(|c| (c.card_key.clone(), c)).collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl CardCatalog for StubCatalog {
        fn fetch_card_list(&self) -> Result<Vec<IssuerCards>, CatalogError> {
            Ok(Vec::new())
        }

        fn fetch_card_detail(&self, card_key: &str) -> Result<CardProfile, CatalogError> {
            self.fetched.lock().unwrap().push(card_key.to_string());
            self.cards
                .get(card_key)
                .cloned()
                .ok_or_else(|| CatalogError::CardNotFound(card_key.to_string()))
        }
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn card(key: &str, base: f64, bonuses: &[(i64, f64)]) -> CardProfile {
        CardProfile {
            card_key: key.to_string(),
            card_name: key.to_uppercase(),
            base_spend_amount: base,
            base_spend_earn_currency: "points".to_string(),
            bonus_rules: bonuses
                .iter()
                .map(|&(category_id, earn_multiplier)| BonusRule {
                    category_id,
                    earn_multiplier,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_get_cards_fetches_missing_and_reuses_stored() {
        let conn = test_db();
        db::insert_card(&conn, &card("stored", 1.0, &[])).unwrap();
        let catalog = StubCatalog::new(vec![card("remote", 2.0, &[])]);

        let cards = get_cards(&conn, &catalog, &keys(&["remote", "stored"])).unwrap();

        let names: Vec<&str> = cards.iter().map(|c| c.card_key.as_str()).collect();
        assert_eq!(names, vec!["remote", "stored"]);
        assert_eq!(catalog.fetched(), vec!["remote"]);
        assert_eq!(db::card_count(&conn).unwrap(), 2);

        // Second build hits the store only
        get_cards(&conn, &catalog, &keys(&["remote"])).unwrap();
        assert_eq!(catalog.fetched(), vec!["remote"]);
    }

    #[test]
    fn test_get_cards_collapses_duplicate_keys() {
        let conn = test_db();
        let catalog = StubCatalog::new(vec![card("a", 1.0, &[])]);

        let cards = get_cards(&conn, &catalog, &keys(&["a", "a"])).unwrap();

        assert_eq!(cards.len(), 1);
        assert_eq!(catalog.fetched(), vec!["a"]);
    }

    #[test]
    fn test_build_wallet_propagates_catalog_failure() {
        let conn = test_db();
        let catalog = StubCatalog::new(vec![card("a", 1.0, &[])]);

        let err = build_wallet(&conn, &catalog, &keys(&["a", "gone"])).unwrap_err();

        assert!(matches!(
            err,
            WalletError::Catalog(CatalogError::CardNotFound(ref key)) if key == "gone"
        ));
    }

    #[test]
    fn test_resolve_category() {
        let conn = test_db();
        db::insert_domain(&conn, &Domain::new("doordash.com", 5, "Dining")).unwrap();

        let known = resolve_category(&conn, "doordash.com").unwrap();
        assert_eq!(known, MerchantCategory::Resolved { id: 5, name: "Dining".to_string() });
        assert_eq!(known.id(), 5);

        let unknown = resolve_category(&conn, "nowhere.example").unwrap();
        assert_eq!(unknown, MerchantCategory::Unknown);
        assert_eq!(unknown.id(), UNKNOWN_CATEGORY_ID);
        assert_eq!(unknown.name(), "");
        assert!(!unknown.is_resolved());
    }

    #[test]
    fn test_transact_records_best_card() {
        let conn = test_db();
        db::insert_domain(&conn, &Domain::new("doordash.com", 5, "Dining")).unwrap();
        let wallet = Wallet::new(vec![
            card("flat", 1.5, &[]),
            card("dining", 1.0, &[(5, 4.0)]),
        ]);

        let record = transact(&conn, "doordash.com", 40.0, &wallet).unwrap();

        assert_eq!(record.card.card_key, "dining");
        assert_eq!(record.card.reward.value, 0.04);
        assert_eq!(record.merchant.category_name, "Dining");

        let stored = db::get_all_transactions(&conn).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].card.card_key, "dining");
        assert_eq!(stored[0].spend_amount, 40.0);
    }

    #[test]
    fn test_transact_unknown_domain_uses_base_rates() {
        let conn = test_db();
        let wallet = Wallet::new(vec![
            card("flat", 1.5, &[]),
            card("dining", 1.0, &[(5, 4.0)]),
        ]);

        let record = transact(&conn, "mystery.shop", 10.0, &wallet).unwrap();

        assert_eq!(record.card.card_key, "flat");
        assert_eq!(record.merchant.category_id, UNKNOWN_CATEGORY_ID);
        assert_eq!(record.merchant.category_name, "");
    }

    #[test]
    fn test_transact_with_empty_wallet_records_no_card() {
        let conn = test_db();

        let record = transact(&conn, "amazon.com", 5.0, &Wallet::default()).unwrap();

        assert!(record.card.is_empty());
        assert_eq!(db::transaction_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_transact_rejects_negative_amount() {
        let conn = test_db();

        let err = transact(&conn, "amazon.com", -1.0, &Wallet::default()).unwrap_err();
        assert!(matches!(err, TransactError::InvalidAmount(amount) if amount == -1.0));
        assert!(matches!(
            transact(&conn, "amazon.com", f64::NAN, &Wallet::default()),
            Err(TransactError::InvalidAmount(_))
        ));
        assert_eq!(db::transaction_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_transact_store_failure_is_distinct() {
        let conn = test_db();
        conn.execute("DROP TABLE transactions", []).unwrap();

        let err = transact(&conn, "amazon.com", 5.0, &Wallet::default()).unwrap_err();
        assert!(matches!(err, TransactError::Store(_)));
    }

    #[test]
    fn test_transact_records_normalized_domain() {
        let conn = test_db();
        db::insert_domain(&conn, &Domain::new("amazon.com", 3, "Shopping")).unwrap();

        let record = transact(&conn, "  Amazon.COM ", 5.0, &Wallet::default()).unwrap();
        transact(&conn, "amazon.com", 5.0, &Wallet::default()).unwrap();

        assert_eq!(record.merchant.domain_name, "amazon.com");
        assert_eq!(record.merchant.category_id, 3);
        let history = db::get_all_transactions(&conn).unwrap();
        assert!(history.iter().all(|tx| tx.merchant.domain_name == "amazon.com"));
    }

    /// Catalog that fails the test if the shared connection is locked while it is called
    struct LockCheckingCatalog {
        db: Arc<Mutex<Connection>>,
        inner: StubCatalog,
    }

    impl CardCatalog for LockCheckingCatalog {
        fn fetch_card_list(&self) -> Result<Vec<IssuerCards>, CatalogError> {
            self.inner.fetch_card_list()
        }

        fn fetch_card_detail(&self, card_key: &str) -> Result<CardProfile, CatalogError> {
            assert!(self.db.try_lock().is_ok(), "connection locked during catalog fetch");
            self.inner.fetch_card_detail(card_key)
        }
    }

    #[test]
    fn test_get_cards_shared_releases_lock_while_fetching() {
        let conn = test_db();
        db::insert_card(&conn, &card("stored", 1.0, &[])).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let catalog = LockCheckingCatalog {
            db: shared.clone(),
            inner: StubCatalog::new(vec![card("remote", 2.0, &[]), card("other", 1.0, &[])]),
        };

        let wallet =
            build_wallet_shared(&shared, &catalog, &keys(&["remote", "stored", "other", "remote"]))
                .unwrap();

        let order: Vec<&str> = wallet.cards().iter().map(|c| c.card_key.as_str()).collect();
        assert_eq!(order, vec!["remote", "stored", "other"]);
        assert_eq!(catalog.inner.fetched(), vec!["remote", "other"]);
        assert_eq!(db::card_count(&shared.lock().unwrap()).unwrap(), 3);
    }

    #[test]
    fn test_get_cards_stores_nothing_when_a_fetch_fails() {
        let conn = test_db();
        let catalog = StubCatalog::new(vec![card("a", 1.0, &[])]);

        assert!(get_cards(&conn, &catalog, &keys(&["a", "gone"])).is_err());
        assert_eq!(db::card_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_stored_wallet_skips_unknown_keys() {
        let conn = test_db();
        db::insert_card(&conn, &card("b", 1.0, &[])).unwrap();
        db::insert_card(&conn, &card("a", 1.0, &[])).unwrap();

        let wallet = stored_wallet(&conn, &keys(&["b", "zzz", "a"])).unwrap();
        let order: Vec<&str> = wallet.cards().iter().map(|c| c.card_key.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);

        assert_eq!(stored_wallet(&conn, &[]).unwrap().len(), 2);
    }
}
