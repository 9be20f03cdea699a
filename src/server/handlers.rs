//! Request and query handlers
//!
//! Create endpoints answer 201 before durability: validate, consult the
//! cache then the store index, and hand the write to the batch writer.
//! Query endpoints only ever see committed state, so a freshly accepted
//! create may not be visible immediately.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ServiceError;
use crate::graph::{
    GraphStore, GraphTx, Label, NodeId, RelKind, StoreStats, PROP_IDENTITY, PROP_TITLE, PROP_URL,
};
use crate::identity::{self, CanonicalIdentity};
use crate::page::{self, CanonicalPage};
use crate::writer::{PendingWrite, WriterStatsSnapshot};

use super::{AppContext, AppState};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateIdentityRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub identity: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePageRequest {
    pub url: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RelationshipResponse {
    pub identity: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PageSummary {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub writer: WriterStatsSnapshot,
}

// ============================================================================
// Error envelope
// ============================================================================

/// Maps the service error taxonomy onto HTTP statuses. Validation and
/// reachability failures are the client's fault; a closed queue or store
/// trouble is ours.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::MissingIdentity
            | ServiceError::MissingPage
            | ServiceError::InvalidEmail(_)
            | ServiceError::InvalidPhone(_)
            | ServiceError::UnknownRegion(_)
            | ServiceError::UrlPrefix { .. }
            | ServiceError::InvalidUrl(_)
            | ServiceError::PageUnreachable { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Probe(_) => StatusCode::BAD_GATEWAY,
            ServiceError::WriterClosed => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_) | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorPayload {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn stats<S: GraphStore>(State(ctx): State<AppState<S>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: ctx.store.stats(),
        writer: ctx.writer.stats().snapshot(),
    })
}

/// POST /v1/identities. Responds 201 with the canonical form once the
/// identity is known or queued; durability is not awaited.
pub async fn create_identity<S: GraphStore>(
    State(ctx): State<AppState<S>>,
    Json(request): Json<CreateIdentityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let canonical = canonicalize_identity(&request, &ctx.default_region)?;

    if resolve_identity(&ctx, &canonical.key).is_none() {
        debug!(key = %canonical.key, "identity queued for creation");
        ctx.writer
            .enqueue(PendingWrite::CreateIdentity { key: canonical.key })
            .await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(IdentityResponse {
            identity: canonical.canonical,
        }),
    ))
}

/// POST /v1/pages. Unknown pages must answer a HEAD probe with 200 before
/// they are queued.
pub async fn create_page<S: GraphStore>(
    State(ctx): State<AppState<S>>,
    Json(request): Json<CreatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = canonicalize_page(&request, &ctx.url_prefix)?;

    if resolve_page(&ctx, &page.url).is_none() {
        ensure_reachable(&ctx, &page.url).await?;
        debug!(url = %page.url, "page queued for creation");
        ctx.writer
            .enqueue(PendingWrite::CreatePage {
                url: page.url.clone(),
                title: page.title,
            })
            .await?;
    }

    Ok((StatusCode::CREATED, Json(PageResponse { url: page.url })))
}

pub async fn like_page<S: GraphStore>(
    state: State<AppState<S>>,
    path: Path<String>,
    body: Json<CreatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    relate_page(state, path, body, RelKind::Likes).await
}

pub async fn hate_page<S: GraphStore>(
    state: State<AppState<S>>,
    path: Path<String>,
    body: Json<CreatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    relate_page(state, path, body, RelKind::Hates).await
}

pub async fn get_likes<S: GraphStore>(
    State(ctx): State<AppState<S>>,
    Path(raw_identity): Path<String>,
) -> Result<Json<Vec<PageSummary>>, ApiError> {
    list_relationships(&ctx, &raw_identity, RelKind::Likes)
}

pub async fn get_hates<S: GraphStore>(
    State(ctx): State<AppState<S>>,
    Path(raw_identity): Path<String>,
) -> Result<Json<Vec<PageSummary>>, ApiError> {
    list_relationships(&ctx, &raw_identity, RelKind::Hates)
}

/// POST /v1/identities/{identity}/likes|hates. A single pending write
/// carries the relationship; the writer creates missing endpoints inside
/// the same batch transaction.
async fn relate_page<S: GraphStore>(
    State(ctx): State<AppState<S>>,
    Path(raw_identity): Path<String>,
    Json(request): Json<CreatePageRequest>,
    kind: RelKind,
) -> Result<impl IntoResponse, ApiError> {
    let canonical = identity::from_raw(&raw_identity, &ctx.default_region)?;
    let page = canonicalize_page(&request, &ctx.url_prefix)?;

    if resolve_page(&ctx, &page.url).is_none() {
        ensure_reachable(&ctx, &page.url).await?;
    }

    debug!(key = %canonical.key, url = %page.url, %kind, "relationship queued");
    ctx.writer
        .enqueue(PendingWrite::Relate {
            identity_key: canonical.key,
            url: page.url.clone(),
            title: page.title,
            kind,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RelationshipResponse {
            identity: canonical.canonical,
            url: page.url,
        }),
    ))
}

// ============================================================================
// Resolution helpers
// ============================================================================

fn canonicalize_identity(
    request: &CreateIdentityRequest,
    default_region: &str,
) -> Result<CanonicalIdentity, ServiceError> {
    if let Some(email) = request.email.as_deref() {
        return identity::from_email(email);
    }
    if let Some(phone) = request.phone.as_deref() {
        let region = request.region.as_deref().unwrap_or(default_region);
        return identity::from_phone(phone, region);
    }
    Err(ServiceError::MissingIdentity)
}

fn canonicalize_page(
    request: &CreatePageRequest,
    prefix: &str,
) -> Result<CanonicalPage, ServiceError> {
    if let Some(url) = request.url.as_deref() {
        return page::from_url(url, prefix);
    }
    if let Some(title) = request.title.as_deref() {
        return page::from_title(title, prefix);
    }
    Err(ServiceError::MissingPage)
}

/// Cache first, then a short-lived read transaction against the index.
/// Index hits are published to the cache on the way out.
fn resolve_identity<S: GraphStore>(ctx: &AppContext<S>, key: &str) -> Option<NodeId> {
    if let Some(id) = ctx.caches.identities.get(key) {
        return Some(id);
    }

    let tx = ctx.store.begin();
    let found = tx.find_node(Label::Identity, PROP_IDENTITY, key);
    tx.rollback();

    let id = found?;
    ctx.caches.identities.put(key.to_string(), id);
    Some(id)
}

fn resolve_page<S: GraphStore>(ctx: &AppContext<S>, url: &str) -> Option<NodeId> {
    if let Some(id) = ctx.caches.pages.get(url) {
        return Some(id);
    }

    let tx = ctx.store.begin();
    let found = tx.find_node(Label::Page, PROP_URL, url);
    tx.rollback();

    let id = found?;
    ctx.caches.pages.put(url.to_string(), id);
    Some(id)
}

async fn ensure_reachable<S: GraphStore>(
    ctx: &AppContext<S>,
    url: &str,
) -> Result<(), ServiceError> {
    let status = ctx.probe.status(url).await?;
    if status != 200 {
        return Err(ServiceError::PageUnreachable {
            url: url.to_string(),
            status,
        });
    }
    Ok(())
}

fn list_relationships<S: GraphStore>(
    ctx: &AppContext<S>,
    raw_identity: &str,
    kind: RelKind,
) -> Result<Json<Vec<PageSummary>>, ApiError> {
    let canonical = identity::from_raw(raw_identity, &ctx.default_region)?;

    // A valid identity with no node yet reads as an empty list; it may be
    // sitting in the write queue right now.
    let Some(node) = resolve_identity(ctx, &canonical.key) else {
        return Ok(Json(Vec::new()));
    };

    let tx = ctx.store.begin();
    let pages = tx
        .outgoing(node, kind)
        .into_iter()
        .map(|target| PageSummary {
            title: tx.node_property(target, PROP_TITLE).unwrap_or_default(),
            url: tx.node_property(target, PROP_URL).unwrap_or_default(),
        })
        .collect();
    tx.rollback();

    Ok(Json(pages))
}

// ============================================================================
// Tests
// ============================================================================
