// Card Optimizer - Web Server
// REST API with Axum over the same store and catalog the CLI uses

use anyhow::{anyhow, Context};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use card_optimizer::{
    build_wallet_shared, db, normalize_domain, resolve_category, telemetry, transact, AppConfig,
    CardCatalog, CardProfile, CatalogClient, CatalogError, MerchantCategory, TransactError,
    TransactionRecord, WalletError, WalletSelection,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    /// None when no API key is configured; transact is unavailable then
    catalog: Option<Arc<dyn CardCatalog>>,
}

/// API Response wrapper
#[derive(Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::fail(message))).into_response()
}

/// Transaction response (simplified for API)
#[derive(Serialize, Deserialize)]
struct TransactionResponse {
    id: String,
    transaction_at: String,
    spend_amount: f64,
    domain_name: String,
    category_id: i64,
    category_name: String,
    card_key: String,
    card_name: String,
    reward_value: f64,
    reward_earned: f64,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(tx: TransactionRecord) -> Self {
        let reward_earned = tx.reward_earned();
        Self {
            id: tx.id,
            transaction_at: tx.transaction_at.to_rfc3339(),
            spend_amount: tx.spend_amount,
            domain_name: tx.merchant.domain_name,
            category_id: tx.merchant.category_id,
            category_name: tx.merchant.category_name,
            card_key: tx.card.card_key,
            card_name: tx.card.card_name,
            reward_value: tx.card.reward.value,
            reward_earned,
        }
    }
}

/// Card response (summary of a stored catalog card)
#[derive(Serialize, Deserialize)]
struct CardResponse {
    card_key: String,
    card_name: String,
    card_issuer: String,
    base_spend_amount: f64,
    base_spend_earn_currency: String,
    bonus_categories: Vec<i64>,
}

impl From<CardProfile> for CardResponse {
    fn from(card: CardProfile) -> Self {
        Self {
            bonus_categories: card.bonus_rules.iter().map(|b| b.category_id).collect(),
            card_key: card.card_key,
            card_name: card.card_name,
            card_issuer: card.card_issuer,
            base_spend_amount: card.base_spend_amount,
            base_spend_earn_currency: card.base_spend_earn_currency,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DomainResponse {
    domain_name: String,
    category: MerchantCategory,
}

#[derive(Deserialize)]
struct TransactRequest {
    domain: String,
    amount: f64,
    card_keys: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct TransactResponse {
    transaction: TransactionResponse,
    selection: WalletSelection,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// Run store work on the blocking pool so a busy connection never parks a runtime worker
async fn with_db<T, F>(db: Arc<Mutex<Connection>>, work: F) -> anyhow::Result<T>
where
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        work(&conn)
    })
    .await
    .context("database task failed")?
}

/// GET /api/transactions - Get all recorded transactions
async fn get_transactions(State(state): State<AppState>) -> Response {
    match with_db(state.db, |conn| db::get_all_transactions(conn)).await {
        Ok(transactions) => {
            let response: Vec<TransactionResponse> =
                transactions.into_iter().map(|tx| tx.into()).collect();

            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            error!("Error getting transactions: {:#}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to load transactions")
        }
    }
}

/// GET /api/cards - Get all stored cards
async fn get_cards(State(state): State<AppState>) -> Response {
    match with_db(state.db, |conn| db::get_all_cards(conn)).await {
        Ok(cards) => {
            let response: Vec<CardResponse> = cards.into_iter().map(|c| c.into()).collect();
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            error!("Error getting cards: {:#}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to load cards")
        }
    }
}

/// GET /api/domains/:name - Resolve a merchant domain to its category
async fn get_domain(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let domain_name = normalize_domain(&name);
    let lookup = domain_name.clone();

    match with_db(state.db, move |conn| resolve_category(conn, &lookup)).await {
        Ok(category) => {
            let response = DomainResponse {
                domain_name,
                category,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            error!("Error resolving domain {}: {:#}", domain_name, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to resolve domain")
        }
    }
}

/// POST /api/transact - Build a wallet, pick the best card, record the purchase
async fn post_transact(
    State(state): State<AppState>,
    Json(request): Json<TransactRequest>,
) -> Response {
    let Some(catalog) = state.catalog.clone() else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "card catalog is not configured");
    };

    // Catalog fetches and SQLite both block; the connection is only locked
    // around store access so other requests keep going during fetches
    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<TransactionRecord> {
        let wallet = build_wallet_shared(&db, catalog.as_ref(), &request.card_keys)?;
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        Ok(transact(&conn, &request.domain, request.amount, &wallet)?)
    })
    .await;

    match result {
        Ok(Ok(record)) => {
            let selection = record.card.clone();
            let response = TransactResponse {
                transaction: record.into(),
                selection,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Ok(Err(e)) => {
            error!("Error processing transaction: {:#}", e);
            transact_failure(&e)
        }
        Err(e) => {
            error!("Transaction task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "transaction task failed")
        }
    }
}

/// Status for a failed transact; internal error details stay in the log
fn transact_failure(e: &anyhow::Error) -> Response {
    if let Some(wallet_error) = e.downcast_ref::<WalletError>() {
        return match wallet_error {
            WalletError::Catalog(CatalogError::CardNotFound(key)) => {
                failure(StatusCode::NOT_FOUND, format!("unknown card: {}", key))
            }
            WalletError::Catalog(_) => {
                failure(StatusCode::BAD_GATEWAY, "card catalog request failed")
            }
            WalletError::Store(_) => {
                failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to load cards")
            }
        };
    }

    match e.downcast_ref::<TransactError>() {
        Some(err) if matches!(err, TransactError::InvalidAmount(_)) => {
            failure(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        _ => failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to record transaction"),
    }
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(get_transactions))
        .route("/cards", get(get_cards))
        .route("/domains/:name", get(get_domain))
        .route("/transact", post(post_transact))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let conn = db::open_database(&config.database_path)?;
    info!(path = ?config.database_path, "database opened");

    // Blocking HTTP client must be built outside the async runtime
    let catalog: Option<Arc<dyn CardCatalog>> = match config.catalog() {
        Ok(catalog_config) => Some(Arc::new(CatalogClient::new(catalog_config.clone())?)),
        Err(e) => {
            info!("{}; POST /api/transact disabled", e);
            None
        }
    };

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        catalog,
    };
    let addr = config.server.socket_addr()?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!("Server running on http://{}", addr);
        info!("API: http://{}/api/transactions", addr);

        axum::serve(listener, app(state))
            .await
            .context("Server error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use card_optimizer::{BonusRule, Domain, IssuerCards};
    use tower::ServiceExt;

    struct StubCatalog(Vec<CardProfile>);

    impl CardCatalog for StubCatalog {
        fn fetch_card_list(&self) -> Result<Vec<IssuerCards>, CatalogError> {
            Ok(Vec::new())
        }

        fn fetch_card_detail(&self, card_key: &str) -> Result<CardProfile, CatalogError> {
            self.0
                .iter()
                .find(|c| c.card_key == card_key)
                .cloned()
                .ok_or_else(|| CatalogError::CardNotFound(card_key.to_string()))
        }
    }

    fn test_state(catalog: Option<Arc<dyn CardCatalog>>) -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        db::insert_domain(&conn, &Domain::new("doordash.com", 5, "Dining")).unwrap();
        AppState {
            db: Arc::new(Mutex::new(conn)),
            catalog,
        }
    }

    fn dining_card() -> CardProfile {
        CardProfile {
            card_key: "dining".to_string(),
            card_name: "Dining Card".to_string(),
            base_spend_amount: 1.0,
            base_spend_earn_currency: "points".to_string(),
            bonus_rules: vec![BonusRule {
                category_id: 5,
                earn_multiplier: 4.0,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn flat_card() -> CardProfile {
        CardProfile {
            card_key: "flat".to_string(),
            card_name: "Flat Card".to_string(),
            base_spend_amount: 2.0,
            base_spend_earn_currency: "cashback".to_string(),
            ..Default::default()
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn transact_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/transact")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let response = app(test_state(None))
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], "OK");
    }

    #[tokio::test]
    async fn domain_lookup_distinguishes_unknown() {
        let router = app(test_state(None));

        let known = router
            .clone()
            .oneshot(Request::builder().uri("/api/domains/doordash.com").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(known).await;
        assert_eq!(json["data"]["category"]["Resolved"]["id"], 5);

        let unknown = router
            .oneshot(Request::builder().uri("/api/domains/nowhere.example").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(unknown).await;
        assert_eq!(json["data"]["category"], "Unknown");
    }

    #[tokio::test]
    async fn transact_picks_best_card_and_records_it() {
        let catalog: Arc<dyn CardCatalog> = Arc::new(StubCatalog(vec![flat_card(), dining_card()]));
        let state = test_state(Some(catalog));
        let router = app(state.clone());

        let response = router
            .clone()
            .oneshot(transact_request(serde_json::json!({
                "domain": "doordash.com",
                "amount": 50.0,
                "card_keys": ["flat", "dining"]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["selection"]["card_key"], "dining");
        assert_eq!(json["data"]["transaction"]["category_name"], "Dining");

        let history = router
            .oneshot(Request::builder().uri("/api/transactions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(history).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        let conn = state.db.lock().unwrap();
        assert_eq!(db::card_count(&conn).unwrap(), 2);
    }

    #[tokio::test]
    async fn transact_reports_unknown_card() {
        let catalog: Arc<dyn CardCatalog> = Arc::new(StubCatalog(vec![flat_card()]));
        let response = app(test_state(Some(catalog)))
            .oneshot(transact_request(serde_json::json!({
                "domain": "doordash.com",
                "amount": 10.0,
                "card_keys": ["missing"]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn transact_without_catalog_is_unavailable() {
        let response = app(test_state(None))
            .oneshot(transact_request(serde_json::json!({
                "domain": "doordash.com",
                "amount": 10.0,
                "card_keys": []
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transact_store_failure_is_internal_error() {
        let catalog: Arc<dyn CardCatalog> = Arc::new(StubCatalog(vec![flat_card()]));
        let state = test_state(Some(catalog));
        state
            .db
            .lock()
            .unwrap()
            .execute("DROP TABLE transactions", [])
            .unwrap();

        let response = app(state)
            .oneshot(transact_request(serde_json::json!({
                "domain": "doordash.com",
                "amount": 10.0,
                "card_keys": ["flat"]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "failed to record transaction");
    }

    #[tokio::test]
    async fn transact_rejects_negative_amount() {
        let catalog: Arc<dyn CardCatalog> = Arc::new(StubCatalog(vec![flat_card()]));
        let response = app(test_state(Some(catalog)))
            .oneshot(transact_request(serde_json::json!({
                "domain": "doordash.com",
                "amount": -5.0,
                "card_keys": ["flat"]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn transact_records_normalized_domain() {
        let catalog: Arc<dyn CardCatalog> = Arc::new(StubCatalog(vec![dining_card()]));
        let response = app(test_state(Some(catalog)))
            .oneshot(transact_request(serde_json::json!({
                "domain": "DoorDash.com",
                "amount": 20.0,
                "card_keys": ["dining"]
            })))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["data"]["transaction"]["domain_name"], "doordash.com");
        assert_eq!(json["data"]["transaction"]["category_id"], 5);
    }
}
