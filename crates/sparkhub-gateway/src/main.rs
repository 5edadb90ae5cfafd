use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use sparkhub_core::{LedgerEntry, NewAccount, OfferFilter, SubmissionFilter};
use sparkhub_ledger::{
    Ledger, LedgerError, LedgerPolicy, LocalFileStore, NewTopUp, NewUpload, PgLedgerStore,
};
use sparkhub_platform::{
    AccountView, BalanceResponse, EnsureAccountRequest, EntryView, LEDGER_POSTED,
    LedgerPostedEvent, LedgerSettings, MarkReadRequest, NotificationView, OfferView,
    PurchaseRequest, PurchaseResponse, RedisBus, ServiceConfig, SubmissionView, TOPUPS_SUBMITTED,
    TopUpRequest, TopUpSubmittedEvent, UploadProjectRequest, UploadProjectResponse,
    connect_database, run_migrations,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    ledger: Ledger<PgLedgerStore, LocalFileStore>,
    redis: RedisBus,
}

#[derive(Debug, Clone, Deserialize)]
struct BalanceQuery {
    /// When set, the response reports whether the balance covers this charge.
    required: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct EntriesQuery {
    limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct NotificationsQuery {
    unread: Option<bool>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sparkhub_gateway=info,sparkhub_ledger=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let settings = LedgerSettings::from_env()?;
    let pool = connect_database(&config.database_url).await?;
    run_migrations(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    tokio::fs::create_dir_all(&settings.file_staging_dir).await?;
    tokio::fs::create_dir_all(&settings.file_live_dir).await?;
    let files = LocalFileStore::new(&settings.file_staging_dir, &settings.file_live_dir);
    let policy = LedgerPolicy {
        expedite_fee_per_day: settings.expedite_fee_per_day,
        base_upload_fee: settings.base_upload_fee,
        max_admin_adjustment: settings.max_admin_adjustment,
        max_topup_amount: settings.max_topup_amount,
    };
    let ledger = Ledger::new(Arc::new(PgLedgerStore::new(pool)), Arc::new(files), policy);

    let state = AppState { ledger, redis };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/accounts/ensure", post(ensure_account))
        .route("/accounts/{account_id}/balance", get(get_balance))
        .route("/accounts/{account_id}/entries", get(list_entries))
        .route("/accounts/{account_id}/topups", get(list_topups))
        .route(
            "/accounts/{account_id}/notifications",
            get(list_notifications),
        )
        .route(
            "/notifications/{notification_id}/read",
            post(mark_notification_read),
        )
        .route("/offers", get(list_offers))
        .route("/purchases", post(purchase_offer))
        .route("/projects", post(upload_project))
        .route("/topups", post(submit_topup))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ensure_account(
    State(state): State<AppState>,
    Json(payload): Json<EnsureAccountRequest>,
) -> Result<Json<AccountView>, (StatusCode, String)> {
    let account = state
        .ledger
        .ensure_account(NewAccount {
            id: payload.account_id,
            display_name: payload.display_name,
            email: payload.email,
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(account.into()))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, (StatusCode, String)> {
    let account = state.ledger.account(account_id).await.map_err(ledger_error)?;
    let sufficient = query.required.map(|required| account.balance >= required);
    Ok(Json(BalanceResponse {
        account_id,
        balance: account.balance,
        sufficient,
    }))
}

async fn list_entries(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<Vec<EntryView>>, (StatusCode, String)> {
    state.ledger.account(account_id).await.map_err(ledger_error)?;
    let entries = state
        .ledger
        .history(account_id, query.limit)
        .await
        .map_err(ledger_error)?;
    Ok(Json(entries.into_iter().map(EntryView::from).collect()))
}

async fn list_offers(
    State(state): State<AppState>,
) -> Result<Json<Vec<OfferView>>, (StatusCode, String)> {
    let offers = state
        .ledger
        .offers(OfferFilter {
            only_available_at: Some(Utc::now()),
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(offers.into_iter().map(OfferView::from).collect()))
}

async fn purchase_offer(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, (StatusCode, String)> {
    let receipt = state
        .ledger
        .purchase_offer(payload.account_id, payload.offer_id, payload.units)
        .await
        .map_err(ledger_error)?;
    publish_ledger_event(&state, &receipt.entry).await;
    Ok(Json(PurchaseResponse {
        project_id: receipt.project.id,
        entry_id: receipt.entry.id,
        cost_points: receipt.cost(),
        balance_after: receipt.balance_after(),
    }))
}

async fn upload_project(
    State(state): State<AppState>,
    Json(payload): Json<UploadProjectRequest>,
) -> Result<Json<UploadProjectResponse>, (StatusCode, String)> {
    let receipt = state
        .ledger
        .upload_project(
            payload.account_id,
            NewUpload {
                title: payload.title,
                description: payload.description,
                category: payload.category,
                file_ref: payload.file_ref,
                offer_id: payload.offer_id,
                units: payload.units,
                expedite_days: payload.expedite_days,
            },
        )
        .await
        .map_err(ledger_error)?;
    publish_ledger_event(&state, &receipt.entry).await;
    let cost_points = receipt.cost();
    let balance_after = receipt.balance_after();
    Ok(Json(UploadProjectResponse {
        project: receipt.project.into(),
        cost_points,
        balance_after,
    }))
}

async fn submit_topup(
    State(state): State<AppState>,
    Json(payload): Json<TopUpRequest>,
) -> Result<Json<SubmissionView>, (StatusCode, String)> {
    let submission = state
        .ledger
        .submit_topup(
            payload.account_id,
            NewTopUp {
                amount: payload.amount,
                currency: payload.currency,
                method: payload.method,
                tx_reference: payload.tx_reference,
            },
        )
        .await
        .map_err(ledger_error)?;

    let event = TopUpSubmittedEvent {
        submission_id: submission.id,
        account_id: submission.account_id,
        amount: submission.amount,
        currency: submission.currency.clone(),
    };
    if let Err(err) = state.redis.publish_json(TOPUPS_SUBMITTED, &event).await {
        error!("failed to publish top-up event: {err}");
    }
    Ok(Json(submission.into()))
}

async fn list_topups(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<SubmissionView>>, (StatusCode, String)> {
    state.ledger.account(account_id).await.map_err(ledger_error)?;
    let submissions = state
        .ledger
        .topups(SubmissionFilter {
            account_id: Some(account_id),
            ..Default::default()
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(
        submissions.into_iter().map(SubmissionView::from).collect(),
    ))
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Vec<NotificationView>>, (StatusCode, String)> {
    state.ledger.account(account_id).await.map_err(ledger_error)?;
    let notifications = state
        .ledger
        .notifications(account_id, query.unread.unwrap_or(false))
        .await
        .map_err(ledger_error)?;
    Ok(Json(
        notifications
            .into_iter()
            .map(NotificationView::from)
            .collect(),
    ))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<NotificationView>, (StatusCode, String)> {
    let notification = state
        .ledger
        .mark_notification_read(payload.account_id, notification_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(notification.into()))
}

/// Fire-and-forget ledger event. The entry is already committed; a publish
/// failure costs observability, not correctness.
async fn publish_ledger_event(state: &AppState, entry: &LedgerEntry) {
    let event = LedgerPostedEvent::from(entry);
    if let Err(err) = state.redis.publish_json(LEDGER_POSTED, &event).await {
        error!("failed to publish ledger event: {err}");
    }
}

fn ledger_error(err: LedgerError) -> (StatusCode, String) {
    let status = match &err {
        LedgerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::AccountNotFound(_) | LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        LedgerError::AlreadyDecided { .. }
        | LedgerError::DuplicateReference { .. }
        | LedgerError::OfferUnavailable { .. } => StatusCode::CONFLICT,
        LedgerError::EmptyReason
        | LedgerError::InvalidAmount(_)
        | LedgerError::MissingField(_)
        | LedgerError::InvalidWindow
        | LedgerError::AdjustmentTooLarge { .. } => StatusCode::BAD_REQUEST,
        LedgerError::SideEffectFailed(_) => StatusCode::BAD_GATEWAY,
        LedgerError::CompensationFailed { .. } | LedgerError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!("request failed: {err}");
    }
    (status, err.to_string())
}
