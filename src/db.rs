use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::card::CardProfile;
use crate::scoring::RewardValue;
use crate::wallet::WalletSelection;

// ============================================================================
// RECORDS
// ============================================================================

/// Merchant domain with its spending category (e.g., amazon.com → Shopping)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    /// Document identity (UUID)
    pub id: String,
    pub name: String,
    pub category_id: i64,
    pub category_name: String,
    pub created_at: DateTime<Utc>,
}

/// Domain names compare case-insensitively and ignore surrounding whitespace
pub fn normalize_domain(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Domain {
    pub fn new(name: &str, category_id: i64, category_name: &str) -> Self {
        Domain {
            id: uuid::Uuid::new_v4().to_string(),
            name: normalize_domain(name),
            category_id,
            category_name: category_name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Where a purchase was made
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantDetails {
    pub domain_name: String,
    pub category_id: i64,
    pub category_name: String,
}

/// A purchase and the card chosen for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Document identity (UUID)
    pub id: String,
    pub transaction_at: DateTime<Utc>,
    pub spend_amount: f64,
    pub merchant: MerchantDetails,
    pub card: WalletSelection,
}

impl TransactionRecord {
    pub fn new(spend_amount: f64, merchant: MerchantDetails, card: WalletSelection) -> Self {
        TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_at: Utc::now(),
            spend_amount,
            merchant,
            card,
        }
    }

    /// Dollars of reward this purchase earned
    pub fn reward_earned(&self) -> f64 {
        self.spend_amount * self.card.reward.value
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases report "memory" and keep it)
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_row| Ok(()))?;

    // ==========================================================================
    // Cards: catalog documents cached by key
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT UNIQUE NOT NULL,
            card_key TEXT UNIQUE NOT NULL,
            card_name TEXT NOT NULL,
            card_detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Domains: merchant domain → spending category
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS domains (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT UNIQUE NOT NULL,
            name TEXT UNIQUE NOT NULL,
            category_id INTEGER NOT NULL,
            category_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Transactions: purchase + chosen card, reward flattened into columns
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT UNIQUE NOT NULL,
            transaction_at TEXT NOT NULL,
            spend_amount REAL NOT NULL,
            domain_name TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            category_name TEXT NOT NULL,
            card_key TEXT NOT NULL,
            card_name TEXT NOT NULL,
            reward_amount REAL NOT NULL,
            reward_currency TEXT NOT NULL,
            cash_convertible INTEGER NOT NULL,
            cash_conv_value REAL NOT NULL,
            reward_value REAL NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_at ON transactions(transaction_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_card ON transactions(card_key)",
        [],
    )?;

    Ok(())
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// CARDS
// ============================================================================

/// Store a card document, replacing any earlier copy with the same key
pub fn insert_card(conn: &Connection, card: &CardProfile) -> Result<()> {
    let detail_json = serde_json::to_string(card)?;

    conn.execute(
        "INSERT INTO cards (doc_id, card_key, card_name, card_detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(card_key) DO UPDATE SET
            card_name = excluded.card_name,
            card_detail = excluded.card_detail",
        params![
            uuid::Uuid::new_v4().to_string(),
            card.card_key,
            card.card_name,
            detail_json,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to store card {}", card.card_key))?;

    Ok(())
}

/// Cached cards for the given keys. Keys with no stored document are absent.
pub fn get_cards_by_keys(
    conn: &Connection,
    card_keys: &[String],
) -> Result<HashMap<String, CardProfile>> {
    if card_keys.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; card_keys.len()].join(", ");
    let sql = format!(
        "SELECT card_key, card_detail FROM cards WHERE card_key IN ({})",
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let cards = stmt
        .query_map(params_from_iter(card_keys.iter()), |row| {
            let key: String = row.get(0)?;
            let detail_json: String = row.get(1)?;
            Ok((key, parse_card(1, &detail_json)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(cards)
}

pub fn get_all_cards(conn: &Connection) -> Result<Vec<CardProfile>> {
    let mut stmt = conn.prepare("SELECT card_detail FROM cards ORDER BY card_name")?;

    let cards = stmt
        .query_map([], |row| {
            let detail_json: String = row.get(0)?;
            parse_card(0, &detail_json)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(cards)
}

pub fn card_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
    Ok(count)
}

fn parse_card(column: usize, json: &str) -> rusqlite::Result<CardProfile> {
    serde_json::from_str(json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

// ============================================================================
// DOMAINS
// ============================================================================

/// Store a domain mapping, updating the category if the name already exists
pub fn insert_domain(conn: &Connection, domain: &Domain) -> Result<()> {
    conn.execute(
        "INSERT INTO domains (doc_id, name, category_id, category_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            category_id = excluded.category_id,
            category_name = excluded.category_name",
        params![
            domain.id,
            domain.name,
            domain.category_id,
            domain.category_name,
            domain.created_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to store domain {}", domain.name))?;

    Ok(())
}

/// Look up a domain by name. `None` when the domain has never been mapped.
pub fn get_domain_by_name(conn: &Connection, name: &str) -> Result<Option<Domain>> {
    let domain = conn
        .query_row(
            "SELECT doc_id, name, category_id, category_name, created_at
             FROM domains
             WHERE name = ?1",
            [normalize_domain(name)],
            |row| {
                let created_at: String = row.get(4)?;
                Ok(Domain {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category_id: row.get(2)?,
                    category_name: row.get(3)?,
                    created_at: parse_timestamp(4, &created_at)?,
                })
            },
        )
        .optional()?;

    Ok(domain)
}

#[derive(Debug, Deserialize)]
struct DomainRow {
    name: String,
    category_id: i64,
    category_name: String,
}

/// Load domain mappings from a CSV with `name,category_id,category_name` headers
pub fn import_domains_csv(conn: &Connection, csv_path: &Path) -> Result<usize> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut imported = 0;
    for (line, result) in rdr.deserialize::<DomainRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to deserialize domain on row {}", line + 1))?;

        if row.name.trim().is_empty() {
            warn!(row = line + 1, "skipping domain row with empty name");
            continue;
        }

        insert_domain(conn, &Domain::new(&row.name, row.category_id, &row.category_name))?;
        imported += 1;
    }

    info!(imported, path = ?csv_path, "imported domain mappings");
    Ok(imported)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

pub fn insert_transaction(conn: &Connection, tx: &TransactionRecord) -> Result<()> {
    let reward = &tx.card.reward;

    conn.execute(
        "INSERT INTO transactions (
            doc_id, transaction_at, spend_amount,
            domain_name, category_id, category_name,
            card_key, card_name,
            reward_amount, reward_currency, cash_convertible, cash_conv_value, reward_value
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            tx.id,
            tx.transaction_at.to_rfc3339(),
            tx.spend_amount,
            tx.merchant.domain_name,
            tx.merchant.category_id,
            tx.merchant.category_name,
            tx.card.card_key,
            tx.card.card_name,
            reward.amount,
            reward.currency,
            reward.cash_convertible,
            reward.cash_conv_value,
            reward.value,
        ],
    )
    .context("Failed to record transaction")?;

    Ok(())
}

/// Every recorded transaction, newest first
pub fn get_all_transactions(conn: &Connection) -> Result<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT doc_id, transaction_at, spend_amount,
                domain_name, category_id, category_name,
                card_key, card_name,
                reward_amount, reward_currency, cash_convertible, cash_conv_value, reward_value
         FROM transactions
         ORDER BY transaction_at DESC, id DESC",
    )?;

    let transactions = stmt
        .query_map([], |row| {
            let transaction_at: String = row.get(1)?;

            Ok(TransactionRecord {
                id: row.get(0)?,
                transaction_at: parse_timestamp(1, &transaction_at)?,
                spend_amount: row.get(2)?,
                merchant: MerchantDetails {
                    domain_name: row.get(3)?,
                    category_id: row.get(4)?,
                    category_name: row.get(5)?,
                },
                card: WalletSelection {
                    card_key: row.get(6)?,
                    card_name: row.get(7)?,
                    reward: RewardValue {
                        amount: row.get(8)?,
                        currency: row.get(9)?,
                        cash_convertible: row.get(10)?,
                        cash_conv_value: row.get(11)?,
                        value: row.get(12)?,
                    },
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn transaction_count(conn: &Connection) -> Result<i64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
