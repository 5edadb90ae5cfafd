use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;
use sparkhub_core::{
    LedgerEntry, OfferDraft, OfferFilter, ProjectFilter, ProjectStatus, SubmissionFilter,
    SubmissionStatus,
};
use sparkhub_ledger::{Ledger, LedgerError, LedgerPolicy, LocalFileStore, PgLedgerStore, Ruling};
use sparkhub_platform::{
    AccountView, AdminAdjustRequest, EntryView, LEDGER_POSTED, LedgerPostedEvent, LedgerSettings,
    OfferUpsertRequest, OfferView, ProjectDecisionRequest, ProjectDecisionResponse, ProjectView,
    ReconciliationRunView, RedisBus, RejectTopUpRequest, RetireOfferRequest,
    RunReconciliationRequest, ServiceConfig, SetRoleRequest, SubmissionView, VerifyTopUpRequest,
    VerifyTopUpResponse, connect_database,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    ledger: Ledger<PgLedgerStore, LocalFileStore>,
    redis: RedisBus,
}

#[derive(Debug, Clone, Deserialize)]
struct TopupsQuery {
    admin_id: Uuid,
    status: Option<SubmissionStatus>,
    limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct OffersQuery {
    admin_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
struct ProjectsQuery {
    admin_id: Uuid,
    account_id: Option<Uuid>,
    status: Option<ProjectStatus>,
    limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReconciliationQuery {
    admin_id: Uuid,
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sparkhub_admin=info,sparkhub_ledger=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8090")?;
    let settings = LedgerSettings::from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

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
        .route("/admin/topups", get(list_topups))
        .route("/admin/topups/{submission_id}/verify", post(verify_topup))
        .route("/admin/topups/{submission_id}/reject", post(reject_topup))
        .route("/admin/adjust", post(adjust_balance))
        .route("/admin/offers", get(list_offers).post(create_offer))
        .route("/admin/offers/{offer_id}", put(update_offer))
        .route("/admin/offers/{offer_id}/retire", post(retire_offer))
        .route("/admin/projects", get(list_projects))
        .route("/admin/projects/{project_id}/decide", post(decide_project))
        .route("/admin/accounts/{account_id}/role", post(set_role))
        .route("/admin/reconciliation", get(list_reconciliation_runs))
        .route("/admin/reconciliation/run", post(run_reconciliation))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("admin service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_topups(
    State(state): State<AppState>,
    Query(query): Query<TopupsQuery>,
) -> Result<Json<Vec<SubmissionView>>, (StatusCode, String)> {
    state
        .ledger
        .require_admin(query.admin_id)
        .await
        .map_err(ledger_error)?;
    // The review queue defaults to claims still awaiting a decision.
    let submissions = state
        .ledger
        .topups(SubmissionFilter {
            account_id: None,
            status: Some(query.status.unwrap_or(SubmissionStatus::Submitted)),
            limit: query.limit,
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(
        submissions.into_iter().map(SubmissionView::from).collect(),
    ))
}

async fn verify_topup(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(payload): Json<VerifyTopUpRequest>,
) -> Result<Json<VerifyTopUpResponse>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let outcome = state
        .ledger
        .verify_topup(&actor, submission_id)
        .await
        .map_err(ledger_error)?;
    if let Some(entry) = &outcome.entry {
        publish_ledger_event(&state, entry).await;
    }
    Ok(Json(VerifyTopUpResponse {
        submission: outcome.submission.into(),
        entry: outcome.entry.map(EntryView::from),
    }))
}

async fn reject_topup(
    State(state): State<AppState>,
    Path(submission_id): Path<Uuid>,
    Json(payload): Json<RejectTopUpRequest>,
) -> Result<Json<SubmissionView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let submission = state
        .ledger
        .reject_topup(&actor, submission_id, &payload.reason)
        .await
        .map_err(ledger_error)?;
    Ok(Json(submission.into()))
}

async fn adjust_balance(
    State(state): State<AppState>,
    Json(payload): Json<AdminAdjustRequest>,
) -> Result<Json<EntryView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let entry = state
        .ledger
        .admin_adjust(&actor, payload.account_id, payload.amount, &payload.reason)
        .await
        .map_err(ledger_error)?;
    publish_ledger_event(&state, &entry).await;
    Ok(Json(entry.into()))
}

async fn list_offers(
    State(state): State<AppState>,
    Query(query): Query<OffersQuery>,
) -> Result<Json<Vec<OfferView>>, (StatusCode, String)> {
    state
        .ledger
        .require_admin(query.admin_id)
        .await
        .map_err(ledger_error)?;
    // Admins see the whole catalog, retired offers included.
    let offers = state
        .ledger
        .offers(OfferFilter::default())
        .await
        .map_err(ledger_error)?;
    Ok(Json(offers.into_iter().map(OfferView::from).collect()))
}

async fn create_offer(
    State(state): State<AppState>,
    Json(payload): Json<OfferUpsertRequest>,
) -> Result<Json<OfferView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let offer = state
        .ledger
        .create_offer(&actor, offer_draft(payload))
        .await
        .map_err(ledger_error)?;
    Ok(Json(offer.into()))
}

async fn update_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(payload): Json<OfferUpsertRequest>,
) -> Result<Json<OfferView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let offer = state
        .ledger
        .update_offer(&actor, offer_id, offer_draft(payload))
        .await
        .map_err(ledger_error)?;
    Ok(Json(offer.into()))
}

async fn retire_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    Json(payload): Json<RetireOfferRequest>,
) -> Result<Json<OfferView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let offer = state
        .ledger
        .retire_offer(&actor, offer_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(offer.into()))
}

async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectsQuery>,
) -> Result<Json<Vec<ProjectView>>, (StatusCode, String)> {
    state
        .ledger
        .require_admin(query.admin_id)
        .await
        .map_err(ledger_error)?;
    let projects = state
        .ledger
        .projects(ProjectFilter {
            account_id: query.account_id,
            status: query.status,
            limit: query.limit,
        })
        .await
        .map_err(ledger_error)?;
    Ok(Json(projects.into_iter().map(ProjectView::from).collect()))
}

async fn decide_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<ProjectDecisionRequest>,
) -> Result<Json<ProjectDecisionResponse>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let ruling = if payload.approve {
        Ruling::Approve
    } else {
        Ruling::Reject {
            reason: payload.reason.unwrap_or_default(),
            refund: payload.refund.unwrap_or(false),
        }
    };
    let outcome = state
        .ledger
        .decide_project(&actor, project_id, ruling)
        .await
        .map_err(ledger_error)?;
    if let Some(entry) = &outcome.refund_entry {
        publish_ledger_event(&state, entry).await;
    }
    Ok(Json(ProjectDecisionResponse {
        project: outcome.project.into(),
        refund_entry: outcome.refund_entry.map(EntryView::from),
    }))
}

async fn set_role(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<AccountView>, (StatusCode, String)> {
    let actor = state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let account = state
        .ledger
        .set_role(&actor, account_id, payload.role)
        .await
        .map_err(ledger_error)?;
    Ok(Json(account.into()))
}

async fn list_reconciliation_runs(
    State(state): State<AppState>,
    Query(query): Query<ReconciliationQuery>,
) -> Result<Json<Vec<ReconciliationRunView>>, (StatusCode, String)> {
    state
        .ledger
        .require_admin(query.admin_id)
        .await
        .map_err(ledger_error)?;
    let runs = state
        .ledger
        .reconciliation_runs(query.limit.unwrap_or(20))
        .await
        .map_err(ledger_error)?;
    Ok(Json(
        runs.into_iter().map(ReconciliationRunView::from).collect(),
    ))
}

async fn run_reconciliation(
    State(state): State<AppState>,
    Json(payload): Json<RunReconciliationRequest>,
) -> Result<Json<ReconciliationRunView>, (StatusCode, String)> {
    state
        .ledger
        .require_admin(payload.admin_id)
        .await
        .map_err(ledger_error)?;
    let run = state
        .ledger
        .run_reconciliation()
        .await
        .map_err(ledger_error)?;
    Ok(Json(run.into()))
}

fn offer_draft(payload: OfferUpsertRequest) -> OfferDraft {
    OfferDraft {
        name: payload.name,
        description: payload.description,
        cost_points: payload.cost_points,
        discount_pct: payload.discount_pct,
        per_unit: payload.per_unit.unwrap_or(false),
        active: payload.active.unwrap_or(true),
        available_from: payload.available_from,
        available_until: payload.available_until,
    }
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
