use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{OriginalUri, Path as AxumPath, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use defipoly_config::{AppConfig, WebConfig};
use defipoly_core_types::{ActionFeedRow, ActionKind, ActionRecord, ApplyActionOutcome};
use defipoly_storage::{is_retryable_sqlite_anyhow_error, ProfileUpdate, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const WS_HEARTBEAT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Clone)]
pub struct WebRuntimeHandle {
    inner: Arc<WebRuntimeInner>,
}

struct WebRuntimeInner {
    sqlite_path: String,
    ingest_auth_token: String,
    steal_protection_seconds: i64,
    started_at: DateTime<Utc>,
    live_tx: broadcast::Sender<LiveEvent>,
}

impl WebRuntimeHandle {
    pub fn new(sqlite_path: String, config: &AppConfig) -> Self {
        let (live_tx, _) = broadcast::channel(config.web.live_channel_capacity.max(16));
        Self {
            inner: Arc::new(WebRuntimeInner {
                sqlite_path,
                ingest_auth_token: config.web.ingest_auth_token.clone(),
                steal_protection_seconds: config.game.steal_protection_seconds,
                started_at: Utc::now(),
                live_tx,
            }),
        }
    }

    pub fn ingest_token_is_configured(&self) -> bool {
        let token = self.inner.ingest_auth_token.trim();
        !token.is_empty() && !token.contains("REPLACE_ME")
    }

    pub fn sqlite_path(&self) -> String {
        self.inner.sqlite_path.clone()
    }

    pub fn publish_event(&self, event_type: impl Into<String>, payload: Value) {
        let event = LiveEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            ts: Utc::now(),
            payload,
        };
        let _ = self.inner.live_tx.send(event);
    }

    pub async fn run_server(self, web_config: WebConfig) -> Result<()> {
        let app = build_router(self.clone());
        let bind = format!("{}:{}", web_config.host, web_config.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind web server on {}", bind))?;
        info!(bind = %bind, "web server started");
        axum::serve(listener, app)
            .await
            .context("axum web server failed")?;
        Ok(())
    }
}

fn build_router(state: WebRuntimeHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/actions", post(api_ingest_action))
        .route("/api/actions/batch", post(api_ingest_batch))
        .route("/api/actions/recent", get(api_recent_actions))
        .route("/api/actions/player/{wallet}", get(api_player_actions))
        .route("/api/actions/property/{property_id}", get(api_property_actions))
        .route("/api/stats/{wallet}", get(api_player_stats))
        .route("/api/ownership/{wallet}", get(api_ownership))
        .route("/api/cooldowns/{wallet}", get(api_set_cooldowns))
        .route("/api/cooldowns/{wallet}/{set_id}", get(api_set_cooldown))
        .route("/api/steal-cooldowns/{wallet}", get(api_steal_cooldowns))
        .route(
            "/api/steal-cooldowns/{wallet}/{property_id}",
            get(api_steal_cooldown),
        )
        .route("/api/game-state/{wallet}", get(api_game_state))
        .route("/api/properties", get(api_properties))
        .route("/api/properties/state", get(api_property_states))
        .route("/api/properties/{property_id}/state", get(api_property_state))
        .route("/api/properties/{property_id}/owners", get(api_property_owners))
        .route(
            "/api/properties/{property_id}/steal-targets",
            get(api_steal_targets),
        )
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/api/leaderboard/stats", get(api_leaderboard_stats))
        .route("/api/profile/{wallet}", get(api_get_profile).put(api_put_profile))
        .route("/ws/live", get(ws_live))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "status": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PaginationQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl PaginationQuery {
    fn limit_or(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, 500)
    }

    fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct StealTargetsQuery {
    attacker: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct OwnersQuery {
    exclude: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestActionRequest {
    tx_signature: String,
    action_type: ActionKind,
    player_address: String,
    #[serde(default)]
    property_id: Option<u8>,
    #[serde(default)]
    target_address: Option<String>,
    #[serde(default)]
    amount: u64,
    #[serde(default)]
    slots: u32,
    #[serde(default)]
    shield_duration_seconds: Option<i64>,
    block_time: i64,
}

impl IngestActionRequest {
    fn into_record(self) -> ActionRecord {
        ActionRecord {
            signature: self.tx_signature,
            kind: self.action_type,
            player: self.player_address,
            property_id: self.property_id,
            target: self.target_address,
            amount: self.amount,
            slots: self.slots,
            shield_duration_seconds: self.shield_duration_seconds,
            block_time: self.block_time,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestActionResponse {
    tx_signature: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestBatchResponse {
    applied: usize,
    duplicates: usize,
    failed: usize,
    results: Vec<IngestBatchItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestBatchItem {
    tx_signature: String,
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnershipView {
    property_id: u8,
    property_name: &'static str,
    slots_owned: u32,
    slots_shielded: u32,
    shield_expiry: i64,
    shield_active: bool,
    steal_protection_expiry: i64,
    steal_protection_active: bool,
    purchase_timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetCooldownView {
    set_id: u8,
    last_purchase_timestamp: i64,
    cooldown_duration: i64,
    cooldown_remaining: i64,
    is_on_cooldown: bool,
    last_purchased_property_id: Option<u8>,
    properties_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StealCooldownView {
    property_id: u8,
    last_steal_timestamp: i64,
    cooldown_duration: i64,
    cooldown_remaining: i64,
    is_on_cooldown: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerStatsView {
    wallet_address: String,
    total_actions: u32,
    properties_bought: u32,
    properties_sold: u32,
    successful_steals: u32,
    failed_steals: u32,
    times_stolen: u32,
    shields_activated: u32,
    rewards_claimed: u32,
    total_spent: u64,
    total_earned: u64,
    total_slots_owned: u32,
    complete_sets: u32,
    daily_income: u64,
    leaderboard_score: u64,
    roi_ratio: f64,
    steal_win_rate: f64,
    last_action_time: i64,
    last_claim_timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PropertyView {
    id: u8,
    name: &'static str,
    set_id: u8,
    tier: &'static str,
    max_slots: u32,
    max_per_player: u32,
    price: u64,
    yield_bps: u32,
    shield_cost_bps: u32,
    cooldown_hours: u32,
    available_slots: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PropertyOwnerView {
    wallet_address: String,
    slots_owned: u32,
    slots_shielded: u32,
    unshielded_slots: u32,
    shield_expiry: i64,
    steal_protection_expiry: i64,
    steal_protected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PropertyStateView {
    property_id: u8,
    available_slots: u32,
    max_slots: u32,
    last_synced: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardStatsResponse {
    ts: DateTime<Utc>,
    total_players: u64,
    total_slots_owned: u64,
    total_daily_income: u64,
    total_earned: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionFeedView {
    id: i64,
    tx_signature: String,
    action_type: ActionKind,
    player_address: String,
    property_id: Option<u8>,
    target_address: Option<String>,
    amount: u64,
    slots: u32,
    block_time: i64,
    recorded_at: DateTime<Utc>,
}

impl From<ActionFeedRow> for ActionFeedView {
    fn from(row: ActionFeedRow) -> Self {
        Self {
            id: row.id,
            tx_signature: row.tx_signature,
            action_type: row.kind,
            player_address: row.player_address,
            property_id: row.property_id,
            target_address: row.target_address,
            amount: row.amount,
            slots: row.slots,
            block_time: row.block_time,
            recorded_at: row.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardEntryView {
    rank: u32,
    wallet_address: String,
    username: Option<String>,
    leaderboard_score: u64,
    total_earned: u64,
    daily_income: u64,
    complete_sets: u32,
    total_slots_owned: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardResponse {
    ts: DateTime<Utc>,
    limit: u32,
    offset: u32,
    total_players: u64,
    total_slots_owned: u64,
    total_daily_income: u64,
    total_earned: u64,
    players: Vec<LeaderboardEntryView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    wallet_address: String,
    username: Option<String>,
    avatar_seed: Option<String>,
    board_theme: Option<String>,
    property_card_theme: Option<String>,
    corner_square_style: Option<String>,
    board_background: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdateRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_seed: Option<String>,
    #[serde(default)]
    board_theme: Option<String>,
    #[serde(default)]
    property_card_theme: Option<String>,
    #[serde(default)]
    corner_square_style: Option<String>,
    #[serde(default)]
    board_background: Option<String>,
}

impl ProfileUpdateRequest {
    fn into_update(self) -> ProfileUpdate {
        ProfileUpdate {
            username: self.username,
            avatar_seed: self.avatar_seed,
            board_theme: self.board_theme,
            property_card_theme: self.property_card_theme,
            corner_square_style: self.corner_square_style,
            board_background: self.board_background,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GameStateResponse {
    ts: DateTime<Utc>,
    wallet_address: String,
    ownership: Vec<OwnershipView>,
    set_cooldowns: Vec<SetCooldownView>,
    steal_cooldowns: Vec<StealCooldownView>,
    stats: Option<PlayerStatsView>,
    profile: Option<ProfileView>,
}

async fn healthz(State(state): State<WebRuntimeHandle>) -> impl IntoResponse {
    let uptime_seconds = (Utc::now() - state.inner.started_at).num_seconds().max(0);
    Json(json!({
        "status": "ok",
        "ts": Utc::now(),
        "uptimeSeconds": uptime_seconds,
    }))
}

async fn api_ingest_action(
    State(state): State<WebRuntimeHandle>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(request): Json<IngestActionRequest>,
) -> Result<Json<IngestActionResponse>, ApiError> {
    ensure_authorized_request(&state, &headers, &uri)?;
    let record = request.into_record();
    let tx_signature = record.signature.clone();
    let outcome = apply_record(&state, record.clone()).await?;

    let status = match outcome {
        ApplyActionOutcome::Applied => {
            state.publish_event(
                "action",
                json!({
                    "txSignature": record.signature,
                    "actionType": record.kind,
                    "playerAddress": record.player,
                    "propertyId": record.property_id,
                    "targetAddress": record.target,
                    "amount": record.amount,
                    "slots": record.slots,
                    "blockTime": record.block_time,
                }),
            );
            "applied"
        }
        ApplyActionOutcome::Duplicate => "duplicate",
    };
    Ok(Json(IngestActionResponse {
        tx_signature,
        status,
    }))
}

async fn api_ingest_batch(
    State(state): State<WebRuntimeHandle>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(requests): Json<Vec<IngestActionRequest>>,
) -> Result<Json<IngestBatchResponse>, ApiError> {
    ensure_authorized_request(&state, &headers, &uri)?;

    let mut applied = 0usize;
    let mut duplicates = 0usize;
    let mut failed = 0usize;
    let mut results = Vec::with_capacity(requests.len());

    for request in requests {
        let record = request.into_record();
        let tx_signature = record.signature.clone();
        let status = match apply_record(&state, record.clone()).await {
            Ok(ApplyActionOutcome::Applied) => {
                applied += 1;
                state.publish_event(
                    "action",
                    json!({
                        "txSignature": record.signature,
                        "actionType": record.kind,
                        "playerAddress": record.player,
                        "propertyId": record.property_id,
                        "targetAddress": record.target,
                        "amount": record.amount,
                        "slots": record.slots,
                        "blockTime": record.block_time,
                    }),
                );
                "applied".to_string()
            }
            Ok(ApplyActionOutcome::Duplicate) => {
                duplicates += 1;
                "duplicate".to_string()
            }
            Err(error) => {
                failed += 1;
                format!("error: {}", error.message)
            }
        };
        results.push(IngestBatchItem {
            tx_signature,
            status,
        });
    }

    Ok(Json(IngestBatchResponse {
        applied,
        duplicates,
        failed,
        results,
    }))
}

async fn apply_record(
    state: &WebRuntimeHandle,
    record: ActionRecord,
) -> Result<ApplyActionOutcome, ApiError> {
    let sqlite_path = state.sqlite_path();
    let steal_protection_seconds = state.inner.steal_protection_seconds;
    let join = tokio::task::spawn_blocking(move || {
        let store = SqliteStore::open(Path::new(&sqlite_path))
            .with_context(|| format!("failed opening sqlite for write: {}", sqlite_path))?;
        store.apply_action(&record, steal_protection_seconds, Utc::now())
    })
    .await
    .map_err(|error| ApiError::internal(format!("sqlite write task failed: {error}")))?;

    join.map_err(|error| {
        if is_retryable_sqlite_anyhow_error(&error) {
            ApiError::service_unavailable("database is busy, retry the request")
        } else {
            ApiError::bad_request(format!("{error:#}"))
        }
    })
}

async fn api_player_stats(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<PlayerStatsView>, ApiError> {
    let lookup = wallet.clone();
    let stats = read_only_db(state.sqlite_path(), move |store| store.player_stats(&lookup))
        .await?
        // A wallet with no recorded actions reads as all zeros.
        .unwrap_or_else(|| defipoly_storage::PlayerStatsRow {
            wallet_address: wallet,
            ..Default::default()
        });
    Ok(Json(to_stats_view(stats)))
}

async fn api_ownership(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<Vec<OwnershipView>>, ApiError> {
    let now_ts = Utc::now().timestamp();
    let rows = read_only_db(state.sqlite_path(), move |store| {
        store.ownership_for_wallet(&wallet)
    })
    .await?;
    Ok(Json(
        rows.into_iter().map(|row| to_ownership_view(row, now_ts)).collect(),
    ))
}

async fn api_set_cooldowns(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<Vec<SetCooldownView>>, ApiError> {
    let now_ts = Utc::now().timestamp();
    let rows = read_only_db(state.sqlite_path(), move |store| {
        store.set_cooldowns_for_wallet(&wallet)
    })
    .await?;

    // One entry per color set; sets the wallet never bought into read as
    // not on cooldown.
    let views = (0..defipoly_board::SET_COUNT)
        .map(|set_id| {
            rows.iter()
                .find(|row| row.set_id == set_id)
                .cloned()
                .map(|row| to_set_cooldown_view(row, now_ts))
                .unwrap_or_else(|| SetCooldownView {
                    set_id,
                    last_purchase_timestamp: 0,
                    cooldown_duration: defipoly_board::set_cooldown_seconds(set_id),
                    cooldown_remaining: 0,
                    is_on_cooldown: false,
                    last_purchased_property_id: None,
                    properties_count: 0,
                })
        })
        .collect();
    Ok(Json(views))
}

async fn api_set_cooldown(
    State(state): State<WebRuntimeHandle>,
    AxumPath((wallet, set_id)): AxumPath<(String, u8)>,
) -> Result<Json<SetCooldownView>, ApiError> {
    if usize::from(set_id) >= defipoly_board::PROPERTY_SETS.len() {
        return Err(ApiError::bad_request(format!("unknown set id {set_id}")));
    }
    let now_ts = Utc::now().timestamp();
    let row = read_only_db(state.sqlite_path(), move |store| {
        store.set_cooldown(&wallet, set_id)
    })
    .await?;

    // A wallet that never bought into the set is simply not on cooldown.
    let view = match row {
        Some(row) => to_set_cooldown_view(row, now_ts),
        None => SetCooldownView {
            set_id,
            last_purchase_timestamp: 0,
            cooldown_duration: defipoly_board::set_cooldown_seconds(set_id),
            cooldown_remaining: 0,
            is_on_cooldown: false,
            last_purchased_property_id: None,
            properties_count: 0,
        },
    };
    Ok(Json(view))
}

async fn api_steal_cooldowns(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<Vec<StealCooldownView>>, ApiError> {
    let now_ts = Utc::now().timestamp();
    let rows = read_only_db(state.sqlite_path(), move |store| {
        store.steal_cooldowns_for_wallet(&wallet)
    })
    .await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| to_steal_cooldown_view(row, now_ts))
            .collect(),
    ))
}

async fn api_steal_cooldown(
    State(state): State<WebRuntimeHandle>,
    AxumPath((wallet, property_id)): AxumPath<(String, u8)>,
) -> Result<Json<StealCooldownView>, ApiError> {
    if defipoly_board::property(property_id).is_none() {
        return Err(ApiError::bad_request(format!(
            "unknown property id {property_id}"
        )));
    }
    let now_ts = Utc::now().timestamp();
    let row = read_only_db(state.sqlite_path(), move |store| {
        store.steal_cooldown(&wallet, property_id)
    })
    .await?;

    let view = match row {
        Some(row) => to_steal_cooldown_view(row, now_ts),
        None => StealCooldownView {
            property_id,
            last_steal_timestamp: 0,
            cooldown_duration: defipoly_board::steal_cooldown_seconds(property_id),
            cooldown_remaining: 0,
            is_on_cooldown: false,
        },
    };
    Ok(Json(view))
}

async fn api_game_state(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<GameStateResponse>, ApiError> {
    let now = Utc::now();
    let now_ts = now.timestamp();
    let lookup = wallet.clone();
    let (ownership, set_cooldowns, steal_cooldowns, stats, profile) =
        read_only_db(state.sqlite_path(), move |store| {
            Ok((
                store.ownership_for_wallet(&lookup)?,
                store.set_cooldowns_for_wallet(&lookup)?,
                store.steal_cooldowns_for_wallet(&lookup)?,
                store.player_stats(&lookup)?,
                store.profile(&lookup)?,
            ))
        })
        .await?;

    Ok(Json(GameStateResponse {
        ts: now,
        wallet_address: wallet,
        ownership: ownership
            .into_iter()
            .map(|row| to_ownership_view(row, now_ts))
            .collect(),
        set_cooldowns: set_cooldowns
            .into_iter()
            .map(|row| to_set_cooldown_view(row, now_ts))
            .collect(),
        steal_cooldowns: steal_cooldowns
            .into_iter()
            .map(|row| to_steal_cooldown_view(row, now_ts))
            .collect(),
        stats: stats.map(to_stats_view),
        profile: profile.map(to_profile_view),
    }))
}

async fn api_properties(
    State(state): State<WebRuntimeHandle>,
) -> Result<Json<Vec<PropertyView>>, ApiError> {
    let states = read_only_db(state.sqlite_path(), move |store| store.all_property_states()).await?;
    let views = defipoly_board::PROPERTIES
        .iter()
        .map(|property| {
            let available_slots = states
                .iter()
                .find(|row| row.property_id == property.id)
                .map(|row| row.available_slots);
            PropertyView {
                id: property.id,
                name: property.name,
                set_id: property.set_id,
                tier: property.tier,
                max_slots: property.max_slots,
                max_per_player: property.max_per_player,
                price: property.price,
                yield_bps: property.yield_bps,
                shield_cost_bps: property.shield_cost_bps,
                cooldown_hours: property.cooldown_hours,
                available_slots,
            }
        })
        .collect();
    Ok(Json(views))
}

async fn api_property_states(
    State(state): State<WebRuntimeHandle>,
) -> Result<Json<Vec<PropertyStateView>>, ApiError> {
    let states =
        read_only_db(state.sqlite_path(), move |store| store.all_property_states()).await?;
    Ok(Json(states.into_iter().map(to_property_state_view).collect()))
}

async fn api_property_state(
    State(state): State<WebRuntimeHandle>,
    AxumPath(property_id): AxumPath<u8>,
) -> Result<Json<PropertyStateView>, ApiError> {
    if defipoly_board::property(property_id).is_none() {
        return Err(ApiError::bad_request(format!(
            "unknown property id {property_id}"
        )));
    }
    let row = read_only_db(state.sqlite_path(), move |store| {
        store.property_state(property_id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(format!("no state for property {property_id}")))?;
    Ok(Json(to_property_state_view(row)))
}

async fn api_property_owners(
    State(state): State<WebRuntimeHandle>,
    AxumPath(property_id): AxumPath<u8>,
    Query(query): Query<OwnersQuery>,
) -> Result<Json<Vec<PropertyOwnerView>>, ApiError> {
    if defipoly_board::property(property_id).is_none() {
        return Err(ApiError::bad_request(format!(
            "unknown property id {property_id}"
        )));
    }
    let now_ts = Utc::now().timestamp();
    let owners = read_only_db(state.sqlite_path(), move |store| {
        store.property_owners(property_id, query.exclude.as_deref(), now_ts)
    })
    .await?;
    Ok(Json(
        owners
            .into_iter()
            .map(|owner| to_owner_view(owner, now_ts))
            .collect(),
    ))
}

async fn api_steal_targets(
    State(state): State<WebRuntimeHandle>,
    AxumPath(property_id): AxumPath<u8>,
    Query(query): Query<StealTargetsQuery>,
) -> Result<Json<Vec<PropertyOwnerView>>, ApiError> {
    if defipoly_board::property(property_id).is_none() {
        return Err(ApiError::bad_request(format!(
            "unknown property id {property_id}"
        )));
    }
    let attacker = query
        .attacker
        .ok_or_else(|| ApiError::bad_request("attacker query parameter is required"))?;
    let now_ts = Utc::now().timestamp();
    let targets = read_only_db(state.sqlite_path(), move |store| {
        store.steal_targets(property_id, &attacker, now_ts)
    })
    .await?;
    Ok(Json(
        targets
            .into_iter()
            .map(|owner| to_owner_view(owner, now_ts))
            .collect(),
    ))
}

async fn api_leaderboard(
    State(state): State<WebRuntimeHandle>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let limit = query.limit_or(100);
    let offset = query.offset();
    let (players, totals) = read_only_db(state.sqlite_path(), move |store| {
        Ok((store.leaderboard(limit, offset)?, store.leaderboard_totals()?))
    })
    .await?;

    Ok(Json(LeaderboardResponse {
        ts: Utc::now(),
        limit,
        offset,
        total_players: totals.total_players,
        total_slots_owned: totals.total_slots_owned,
        total_daily_income: totals.total_daily_income,
        total_earned: totals.total_earned,
        players: players
            .into_iter()
            .map(|row| LeaderboardEntryView {
                rank: row.rank,
                wallet_address: row.wallet_address,
                username: row.username,
                leaderboard_score: row.leaderboard_score,
                total_earned: row.total_earned,
                daily_income: row.daily_income,
                complete_sets: row.complete_sets,
                total_slots_owned: row.total_slots_owned,
            })
            .collect(),
    }))
}

async fn api_leaderboard_stats(
    State(state): State<WebRuntimeHandle>,
) -> Result<Json<LeaderboardStatsResponse>, ApiError> {
    let totals =
        read_only_db(state.sqlite_path(), move |store| store.leaderboard_totals()).await?;
    Ok(Json(LeaderboardStatsResponse {
        ts: Utc::now(),
        total_players: totals.total_players,
        total_slots_owned: totals.total_slots_owned,
        total_daily_income: totals.total_daily_income,
        total_earned: totals.total_earned,
    }))
}

async fn api_recent_actions(
    State(state): State<WebRuntimeHandle>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Vec<ActionFeedView>>, ApiError> {
    let limit = query.limit_or(50);
    let rows =
        read_only_db(state.sqlite_path(), move |store| store.list_recent_actions(limit)).await?;
    Ok(Json(rows.into_iter().map(ActionFeedView::from).collect()))
}

async fn api_player_actions(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Vec<ActionFeedView>>, ApiError> {
    let limit = query.limit_or(50);
    let offset = query.offset();
    let rows = read_only_db(state.sqlite_path(), move |store| {
        store.list_actions_by_player(&wallet, limit, offset)
    })
    .await?;
    Ok(Json(rows.into_iter().map(ActionFeedView::from).collect()))
}

async fn api_property_actions(
    State(state): State<WebRuntimeHandle>,
    AxumPath(property_id): AxumPath<u8>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Vec<ActionFeedView>>, ApiError> {
    if defipoly_board::property(property_id).is_none() {
        return Err(ApiError::bad_request(format!(
            "unknown property id {property_id}"
        )));
    }
    let limit = query.limit_or(50);
    let offset = query.offset();
    let rows = read_only_db(state.sqlite_path(), move |store| {
        store.list_actions_by_property(property_id, limit, offset)
    })
    .await?;
    Ok(Json(rows.into_iter().map(ActionFeedView::from).collect()))
}

async fn api_get_profile(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
) -> Result<Json<ProfileView>, ApiError> {
    let lookup = wallet.clone();
    let profile = read_only_db(state.sqlite_path(), move |store| store.profile(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no profile for wallet {wallet}")))?;
    Ok(Json(to_profile_view(profile)))
}

async fn api_put_profile(
    State(state): State<WebRuntimeHandle>,
    AxumPath(wallet): AxumPath<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(request): Json<ProfileUpdateRequest>,
) -> Result<Json<ProfileView>, ApiError> {
    ensure_authorized_request(&state, &headers, &uri)?;
    let sqlite_path = state.sqlite_path();
    let join = tokio::task::spawn_blocking(move || {
        let store = SqliteStore::open(Path::new(&sqlite_path))
            .with_context(|| format!("failed opening sqlite for write: {}", sqlite_path))?;
        store.upsert_profile(&wallet, &request.into_update(), Utc::now())
    })
    .await
    .map_err(|error| ApiError::internal(format!("sqlite write task failed: {error}")))?;

    let profile = join.map_err(|error| ApiError::bad_request(format!("{error:#}")))?;
    Ok(Json(to_profile_view(profile)))
}

async fn ws_live(
    ws: WebSocketUpgrade,
    State(state): State<WebRuntimeHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_loop(socket, state))
}

async fn websocket_loop(mut socket: WebSocket, state: WebRuntimeHandle) {
    let mut rx = state.inner.live_tx.subscribe();
    let mut heartbeat = time::interval(std::time::Duration::from_secs(WS_HEARTBEAT_SECONDS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_ws_event(&mut socket, &event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let lagged = LiveEvent {
                            event_id: uuid::Uuid::new_v4().to_string(),
                            event_type: "lagged".to_string(),
                            ts: Utc::now(),
                            payload: json!({
                                "droppedMessages": skipped,
                                "action": "resync_required"
                            }),
                        };
                        if send_ws_event(&mut socket, &lagged).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
            _ = heartbeat.tick() => {
                let heartbeat_event = LiveEvent {
                    event_id: uuid::Uuid::new_v4().to_string(),
                    event_type: "heartbeat".to_string(),
                    ts: Utc::now(),
                    payload: json!({"status": "alive"}),
                };
                if send_ws_event(&mut socket, &heartbeat_event).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_ws_event(socket: &mut WebSocket, event: &LiveEvent) -> Result<()> {
    let payload = serde_json::to_string(event).context("failed to serialize ws live event")?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .context("failed to send ws live event")?;
    Ok(())
}

fn ensure_authorized(
    state: &WebRuntimeHandle,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    let expected = state.inner.ingest_auth_token.trim();
    if expected.is_empty() || expected.contains("REPLACE_ME") {
        return Err(ApiError::service_unavailable(
            "ingest auth token is not configured",
        ));
    }

    if let Some(header_value) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
    {
        if header_value == expected {
            return Ok(());
        }
    }

    if query_token.is_some_and(|value| value == expected) {
        return Ok(());
    }

    Err(ApiError::unauthorized("invalid bearer token"))
}

fn ensure_authorized_request(
    state: &WebRuntimeHandle,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<(), ApiError> {
    let query_token = query_token_from_uri(uri);
    ensure_authorized(state, headers, query_token.as_deref())
}

fn query_token_from_uri(uri: &Uri) -> Option<String> {
    uri.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            if key != "token" {
                return None;
            }
            Some(parts.next().unwrap_or_default().to_string())
        })
    })
}

async fn read_only_db<T, F>(sqlite_path: String, action: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(SqliteStore) -> Result<T> + Send + 'static,
{
    let join = tokio::task::spawn_blocking(move || {
        let store = SqliteStore::open_read_only(Path::new(&sqlite_path))
            .with_context(|| format!("failed opening read-only sqlite: {}", sqlite_path))?;
        action(store)
    })
    .await
    .map_err(|error| ApiError::internal(format!("sqlite read task failed: {error}")))?;

    join.map_err(|error| ApiError::internal(error.to_string()))
}

fn to_ownership_view(row: defipoly_storage::OwnershipRow, now_ts: i64) -> OwnershipView {
    OwnershipView {
        property_id: row.property_id,
        property_name: defipoly_board::property(row.property_id)
            .map(|property| property.name)
            .unwrap_or(""),
        slots_owned: row.slots_owned,
        slots_shielded: row.slots_shielded,
        shield_expiry: row.shield_expiry,
        shield_active: defipoly_board::expiry_active(row.shield_expiry, now_ts),
        steal_protection_expiry: row.steal_protection_expiry,
        steal_protection_active: defipoly_board::expiry_active(row.steal_protection_expiry, now_ts),
        purchase_timestamp: row.purchase_timestamp,
    }
}

fn to_set_cooldown_view(row: defipoly_storage::SetCooldownRow, now_ts: i64) -> SetCooldownView {
    let window =
        defipoly_board::CooldownWindow::new(row.last_purchase_timestamp, row.cooldown_duration);
    SetCooldownView {
        set_id: row.set_id,
        last_purchase_timestamp: row.last_purchase_timestamp,
        cooldown_duration: row.cooldown_duration,
        cooldown_remaining: window.remaining(now_ts),
        is_on_cooldown: window.is_active(now_ts),
        last_purchased_property_id: row.last_purchased_property_id,
        properties_count: row.properties_count,
    }
}

fn to_steal_cooldown_view(
    row: defipoly_storage::StealCooldownRow,
    now_ts: i64,
) -> StealCooldownView {
    let window =
        defipoly_board::CooldownWindow::new(row.last_steal_timestamp, row.cooldown_duration);
    StealCooldownView {
        property_id: row.property_id,
        last_steal_timestamp: row.last_steal_timestamp,
        cooldown_duration: row.cooldown_duration,
        cooldown_remaining: window.remaining(now_ts),
        is_on_cooldown: window.is_active(now_ts),
    }
}

fn to_owner_view(owner: defipoly_storage::PropertyOwnerRow, now_ts: i64) -> PropertyOwnerView {
    PropertyOwnerView {
        wallet_address: owner.wallet_address,
        slots_owned: owner.slots_owned,
        slots_shielded: owner.effective_shielded,
        unshielded_slots: owner.unshielded_slots,
        shield_expiry: owner.shield_expiry,
        steal_protection_expiry: owner.steal_protection_expiry,
        steal_protected: defipoly_board::expiry_active(owner.steal_protection_expiry, now_ts),
    }
}

fn to_stats_view(row: defipoly_storage::PlayerStatsRow) -> PlayerStatsView {
    PlayerStatsView {
        wallet_address: row.wallet_address,
        total_actions: row.total_actions,
        properties_bought: row.properties_bought,
        properties_sold: row.properties_sold,
        successful_steals: row.successful_steals,
        failed_steals: row.failed_steals,
        times_stolen: row.times_stolen,
        shields_activated: row.shields_activated,
        rewards_claimed: row.rewards_claimed,
        total_spent: row.total_spent,
        total_earned: row.total_earned,
        total_slots_owned: row.total_slots_owned,
        complete_sets: row.complete_sets,
        daily_income: row.daily_income,
        leaderboard_score: row.leaderboard_score,
        roi_ratio: defipoly_board::roi_ratio(row.total_earned, row.total_spent),
        steal_win_rate: defipoly_board::steal_win_rate(row.successful_steals, row.failed_steals),
        last_action_time: row.last_action_time,
        last_claim_timestamp: row.last_claim_timestamp,
    }
}

fn to_property_state_view(row: defipoly_storage::PropertyStateRow) -> PropertyStateView {
    PropertyStateView {
        property_id: row.property_id,
        available_slots: row.available_slots,
        max_slots: row.max_slots,
        last_synced: row.last_synced,
    }
}

fn to_profile_view(row: defipoly_storage::ProfileRow) -> ProfileView {
    ProfileView {
        wallet_address: row.wallet_address,
        username: row.username,
        avatar_seed: row.avatar_seed,
        board_theme: row.board_theme,
        property_card_theme: row.property_card_theme,
        corner_square_style: row.corner_square_style,
        board_background: row.board_background,
        updated_at: row.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with_token(token: &str) -> WebRuntimeHandle {
        let mut config = AppConfig::default();
        config.web.ingest_auth_token = token.to_string();
        WebRuntimeHandle::new("unused.db".to_string(), &config)
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {token}").parse().expect("header value"),
        );
        headers
    }

    #[test]
    fn writes_are_refused_until_a_real_token_is_configured() {
        for placeholder in ["", "   ", "REPLACE_ME", "dev-REPLACE_ME-token"] {
            let state = handle_with_token(placeholder);
            let error = ensure_authorized(&state, &bearer_headers("secret"), None)
                .expect_err("unconfigured token must refuse all writes");
            assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn bearer_header_and_query_token_both_authorize() {
        let state = handle_with_token("secret");
        assert!(ensure_authorized(&state, &bearer_headers("secret"), None).is_ok());
        assert!(ensure_authorized(&state, &HeaderMap::new(), Some("secret")).is_ok());
    }

    #[test]
    fn mismatched_credentials_are_unauthorized() {
        let state = handle_with_token("secret");

        let error = ensure_authorized(&state, &bearer_headers("wrong"), None)
            .expect_err("wrong header token");
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);

        let error = ensure_authorized(&state, &HeaderMap::new(), Some("wrong"))
            .expect_err("wrong query token");
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);

        let error = ensure_authorized(&state, &HeaderMap::new(), None)
            .expect_err("missing credentials");
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn query_token_is_extracted_from_the_uri() {
        let uri: Uri = "/api/actions?token=secret&limit=5".parse().expect("uri");
        assert_eq!(query_token_from_uri(&uri).as_deref(), Some("secret"));

        let uri: Uri = "/api/actions?limit=5".parse().expect("uri");
        assert_eq!(query_token_from_uri(&uri), None);
    }

    #[test]
    fn pagination_clamps_to_the_allowed_window() {
        let query = PaginationQuery {
            limit: Some(10_000),
            offset: Some(7),
        };
        assert_eq!(query.limit_or(100), 500);
        assert_eq!(query.offset(), 7);

        let query = PaginationQuery {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(query.limit_or(100), 1);
        assert_eq!(PaginationQuery::default().limit_or(50), 50);
    }

    #[test]
    fn ingest_request_accepts_camel_case_wire_format() {
        let body = r#"{
            "txSignature": "sig-1",
            "actionType": "steal_success",
            "playerAddress": "attacker",
            "propertyId": 8,
            "targetAddress": "victim",
            "amount": 1000,
            "slots": 2,
            "blockTime": 1760000000
        }"#;
        let request: IngestActionRequest = serde_json::from_str(body).expect("deserialize");
        let record = request.into_record();
        assert_eq!(record.kind, ActionKind::StealSuccess);
        assert_eq!(record.property_id, Some(8));
        assert_eq!(record.target.as_deref(), Some("victim"));
        assert_eq!(record.slots, 2);
    }
}
