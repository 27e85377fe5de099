use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::api::health::HealthState;
use crate::config::WS_BROADCAST_TOP_N;
use crate::error::AppError;
use crate::feed::{now_ms, VenueFeed};
use crate::scorer::RankingsCache;
use crate::types::{InstrumentSnapshot, Opportunity, Venue};

#[derive(Clone)]
pub struct ApiState {
    pub feeds: Arc<Vec<Arc<dyn VenueFeed>>>,
    pub rankings: Arc<RankingsCache>,
    pub health: Arc<HealthState>,
    pub update_rx: watch::Receiver<u64>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/pairs", get(get_pairs))
        .route("/api/opportunities/:pair", get(get_opportunities))
        .route("/api/snapshots/:venue", get(get_snapshots))
        .route("/health", get(get_health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    /// Truncate to the top N records; the scorer itself never truncates.
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct VenueHealth {
    pub venue: Venue,
    pub connected: bool,
    pub snapshot_count: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub venues: Vec<VenueHealth>,
    pub scoring_passes: u64,
    pub last_scoring_pass_ms: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_pairs(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.rankings.pairs())
}

async fn get_opportunities(
    State(state): State<ApiState>,
    Path(pair): Path<String>,
    Query(params): Query<OpportunitiesQuery>,
) -> Result<Json<Vec<Opportunity>>, AppError> {
    let mut opportunities = state
        .rankings
        .get(&pair)
        .ok_or_else(|| AppError::UnknownPair(pair.clone()))?;
    if let Some(limit) = params.limit {
        opportunities.truncate(limit);
    }
    Ok(Json(opportunities))
}

async fn get_snapshots(
    State(state): State<ApiState>,
    Path(venue): Path<String>,
) -> Result<Json<Vec<InstrumentSnapshot>>, AppError> {
    let venue: Venue = venue.parse()?;
    let feed = state
        .feeds
        .iter()
        .find(|f| f.venue() == venue)
        .ok_or_else(|| AppError::UnknownVenue(venue.to_string()))?;
    Ok(Json(feed.snapshots()))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let venues = state
        .feeds
        .iter()
        .map(|f| VenueHealth {
            venue: f.venue(),
            connected: f.is_connected(),
            snapshot_count: f.snapshots().len(),
        })
        .collect();
    Json(HealthResponse {
        venues,
        scoring_passes: state.health.scoring_passes(),
        last_scoring_pass_ms: state.health.last_scoring_pass_ms(),
    })
}

// ---------------------------------------------------------------------------
// WebSocket fan-out
// ---------------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

/// Pushes the current rankings immediately on connect, then again after
/// every scoring pass. The watch channel coalesces passes that complete
/// while a send is in flight.
async fn client_loop(mut socket: WebSocket, mut state: ApiState) {
    debug!("ws client connected");
    if socket
        .send(Message::Text(build_update(&state.rankings)))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            changed = state.update_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                if socket
                    .send(Message::Text(build_update(&state.rankings)))
                    .await
                    .is_err()
                {
                    debug!("ws client disconnected");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    None | Some(Err(_)) => {
                        debug!("ws client disconnected");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn build_update(rankings: &RankingsCache) -> String {
    let mut data = serde_json::Map::new();
    for pair in rankings.pairs() {
        if let Some(mut opportunities) = rankings.get(&pair) {
            opportunities.truncate(WS_BROADCAST_TOP_N);
            if let Ok(value) = serde_json::to_value(&opportunities) {
                data.insert(pair, value);
            }
        }
    }
    serde_json::json!({
        "type": "ARBITRAGE_UPDATE",
        "data": data,
        "timestamp": now_ms(),
    })
    .to_string()
}
