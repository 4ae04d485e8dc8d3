//! HTTP API for HASHWEAVE node

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hashweave_consensus::{ConsensusRecord, ConsensusStats, KnownSummary, Submission};
use hashweave_core::{HashweaveError, NodeId, PublicKey, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = NodeRuntime;

/// Largest page served by `/consensus`
const MAX_RECORDS_PER_PAGE: usize = 1000;

/// API response wrapper
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of an event submission
#[derive(Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub hash: String,
    pub status: String,
    pub fork: bool,
    pub released: Vec<String>,
    pub finalized: u64,
    pub missing: Vec<String>,
}

impl From<&Submission> for SubmissionResponse {
    fn from(submission: &Submission) -> Self {
        let mut response = SubmissionResponse {
            hash: submission.hash().to_hex(),
            status: String::new(),
            fork: false,
            released: vec![],
            finalized: 0,
            missing: vec![],
        };
        match submission {
            Submission::Accepted {
                fork,
                released,
                finalized,
                ..
            } => {
                response.status = "accepted".into();
                response.fork = fork.is_some();
                response.released = released.iter().map(|h| h.to_hex()).collect();
                response.finalized = *finalized;
            }
            Submission::Deferred { missing, .. } => {
                response.status = "deferred".into();
                response.missing = missing.iter().map(|h| h.to_hex()).collect();
            }
            Submission::Duplicate(_) => response.status = "duplicate".into(),
        }
        response
    }
}

/// Highest known sequence per creator, keyed by hex node id
#[derive(Default, Serialize, Deserialize)]
pub struct SummaryBody {
    pub known: BTreeMap<String, Sequence>,
}

impl From<&KnownSummary> for SummaryBody {
    fn from(summary: &KnownSummary) -> Self {
        Self {
            known: summary
                .iter()
                .map(|(node, seq)| (node.to_hex(), *seq))
                .collect(),
        }
    }
}

impl SummaryBody {
    pub fn to_summary(&self) -> Result<KnownSummary, String> {
        self.known
            .iter()
            .map(|(node, seq)| {
                NodeId::from_hex(node)
                    .map(|id| (id, *seq))
                    .map_err(|_| format!("Invalid node id {}", node))
            })
            .collect()
    }
}

/// Hex-encoded raw events
#[derive(Serialize, Deserialize)]
pub struct SyncResponse {
    pub events: Vec<String>,
}

/// Request to create this node's next event
#[derive(Default, Deserialize)]
pub struct CreateEventRequest {
    /// Hex public key of the participant whose latest event becomes the other-parent
    pub peer: Option<String>,
    /// Hex-encoded transactions
    #[serde(default)]
    pub transactions: Vec<String>,
}

#[derive(Deserialize)]
pub struct ConsensusQuery {
    #[serde(default)]
    pub from: u64,
    pub limit: Option<usize>,
}

/// Finalized event as served over the API
#[derive(Serialize, Deserialize)]
pub struct RecordResponse {
    pub index: u64,
    pub hash: String,
    pub creator: String,
    pub round_received: u64,
    pub timestamp: u64,
    pub transactions: Vec<String>,
}

impl From<&ConsensusRecord> for RecordResponse {
    fn from(record: &ConsensusRecord) -> Self {
        Self {
            index: record.index,
            hash: record.hash.to_hex(),
            creator: record.creator.to_hex(),
            round_received: record.round_received,
            timestamp: record.timestamp.as_millis(),
            transactions: record.transactions.iter().map(hex::encode).collect(),
        }
    }
}

/// Node status response
#[derive(Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub name: String,
    pub node_id: String,
    pub is_participant: bool,
    pub consensus_digest: String,
    pub stats: ConsensusStats,
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Gossip
        .route("/events", post(submit_event))
        .route("/events/create", post(create_event))
        .route("/sync", post(sync))
        .route("/summary", get(summary))
        // Output
        .route("/consensus", get(consensus))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn error_status(error: &HashweaveError) -> StatusCode {
    match error {
        HashweaveError::Insert(_)
        | HashweaveError::Event(_)
        | HashweaveError::UnknownParticipant(_)
        | HashweaveError::Internal(_) => StatusCode::BAD_REQUEST,
        HashweaveError::ServiceStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn submission_reply(
    result: Result<Submission, HashweaveError>,
) -> (StatusCode, Json<ApiResponse<SubmissionResponse>>) {
    match result {
        Ok(submission) => {
            let status = match submission {
                Submission::Deferred { .. } => StatusCode::ACCEPTED,
                _ => StatusCode::OK,
            };
            (status, Json(ApiResponse::ok(SubmissionResponse::from(&submission))))
        }
        Err(e) => (error_status(&e), Json(ApiResponse::err(e))),
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node status
async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.stats().await {
        Ok(stats) => {
            let status = NodeStatusResponse {
                name: runtime.name().to_string(),
                node_id: runtime.node_id().to_hex(),
                is_participant: runtime.is_participant(),
                consensus_digest: runtime.log().digest().to_hex(),
                stats,
            };
            (StatusCode::OK, Json(ApiResponse::ok(status)))
        }
        Err(e) => (error_status(&e), Json(ApiResponse::<NodeStatusResponse>::err(e))),
    }
}

/// Submit a raw bincode-encoded event
async fn submit_event(State(runtime): State<ApiState>, body: Bytes) -> impl IntoResponse {
    submission_reply(runtime.submit(body.to_vec()).await)
}

/// Create this node's next event
async fn create_event(
    State(runtime): State<ApiState>,
    Json(req): Json<CreateEventRequest>,
) -> impl IntoResponse {
    let parsed = parse_create_request(&req);
    match parsed {
        Ok((peer, transactions)) => submission_reply(runtime.create_event(peer, transactions).await),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<SubmissionResponse>::err(e)),
        ),
    }
}

fn parse_create_request(req: &CreateEventRequest) -> Result<(Option<PublicKey>, Vec<Vec<u8>>), String> {
    let peer = req
        .peer
        .as_deref()
        .map(PublicKey::from_hex)
        .transpose()
        .map_err(|_| "Invalid peer public key")?;
    let transactions = req
        .transactions
        .iter()
        .map(hex::decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| "Invalid transaction hex")?;
    Ok((peer, transactions))
}

/// Events unknown to a peer, parents first
async fn sync(State(runtime): State<ApiState>, Json(body): Json<SummaryBody>) -> impl IntoResponse {
    let summary = match body.to_summary() {
        Ok(summary) => summary,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<SyncResponse>::err(e)),
            )
        }
    };
    match runtime.sync(summary).await {
        Ok(events) => {
            let response = SyncResponse {
                events: events.iter().map(hex::encode).collect(),
            };
            (StatusCode::OK, Json(ApiResponse::ok(response)))
        }
        Err(e) => (error_status(&e), Json(ApiResponse::<SyncResponse>::err(e))),
    }
}

/// Local summary, to be sent to peers
async fn summary(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.known_summary().await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::ok(SummaryBody::from(&summary)))),
        Err(e) => (error_status(&e), Json(ApiResponse::<SummaryBody>::err(e))),
    }
}

/// Finalized records starting at `from`
async fn consensus(
    State(runtime): State<ApiState>,
    Query(query): Query<ConsensusQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(MAX_RECORDS_PER_PAGE)
        .min(MAX_RECORDS_PER_PAGE);
    let records: Vec<RecordResponse> = runtime
        .log()
        .range(query.from, limit)
        .iter()
        .map(|record| RecordResponse::from(record.as_ref()))
        .collect();

    Json(ApiResponse::ok(records))
}

/// Start API server
pub async fn start_api_server(runtime: NodeRuntime, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
