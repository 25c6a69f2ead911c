use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::activity::{ActivityEvent, EventKind, SharedActivity};
use crate::error::ReplaceError;
use crate::history::{History, WateringSession};
use crate::push::{BroadcastPublisher, SENSOR_UPDATE};
use crate::readings::{self, Readings, ReadingsRx};
use crate::registry::ZoneRegistry;
use crate::valve::ValveBoard;
use crate::zone::{ValveId, Zone};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ZoneRegistry>,
    pub valves: Arc<ValveBoard>,
    pub readings: ReadingsRx,
    pub activity: SharedActivity,
    pub events: BroadcastPublisher,
    pub history: Option<History>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/zones", get(get_zones).put(put_zones))
        .route("/api/valves/{id}/{action}", post(set_valve))
        .route("/api/history", get(api_history))
        .route("/api/events", get(api_events))
        .with_state(state)
}

#[derive(Serialize)]
struct Status {
    uptime_sec: u64,
    readings: Readings,
    valves: BTreeMap<ValveId, bool>,
    zones: usize,
    activity: Vec<ActivityEvent>,
}

async fn api_status(State(state): State<AppState>) -> Json<Status> {
    let readings = Readings::clone(&readings::current(&state.readings));
    let zones = state.registry.snapshot().await.zones.len();
    let log = state.activity.read().await;
    Json(Status {
        uptime_sec: log.uptime_secs(),
        readings,
        valves: state.valves.states(),
        zones,
        activity: log.recent(),
    })
}

async fn get_zones(State(state): State<AppState>) -> Json<Vec<Zone>> {
    Json(state.registry.snapshot().await.zones)
}

/// Bulk replace. Malformed bodies are rejected by the extractor before the
/// registry is touched.
async fn put_zones(
    State(state): State<AppState>,
    Json(zones): Json<Vec<Zone>>,
) -> Result<Json<Vec<Zone>>, ApiError> {
    match state.registry.replace(zones).await {
        Ok(()) => {
            state
                .activity
                .write()
                .await
                .record(EventKind::System, "zones replaced");
            Ok(Json(state.registry.snapshot().await.zones))
        }
        Err(ReplaceError::Rejected(e)) => {
            warn!("zone replace rejected: {e}");
            Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(ReplaceError::NotPersisted(e)) => {
            state
                .activity
                .write()
                .await
                .record(EventKind::Error, e.to_string());
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Serialize)]
struct ValveState {
    valve: ValveId,
    on: bool,
}

/// Manual override: bypasses the policies and session supervision.
async fn set_valve(
    State(state): State<AppState>,
    Path((id, action)): Path<(u8, String)>,
) -> Result<Json<ValveState>, ApiError> {
    let on = match action.as_str() {
        "on" => true,
        "off" => false,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown action '{other}' (use on/off)"),
            ))
        }
    };
    let valve = ValveId(id);
    state
        .valves
        .set(valve, on)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    state.activity.write().await.record(
        EventKind::Valve,
        format!("manual: valve {valve} {}", if on { "ON" } else { "OFF" }),
    );
    Ok(Json(ValveState { valve, on }))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn api_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<WateringSession>>, ApiError> {
    let Some(history) = &state.history else {
        return Ok(Json(Vec::new()));
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    history.recent(limit).await.map(Json).map_err(|e| {
        error!("history query failed: {e:#}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// Server-sent events. A new subscriber first gets the current readings,
/// then every push event as it happens. Lagging subscribers skip what they
/// missed.
async fn api_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let current = readings::current(&state.readings);
    let first = match serde_json::to_string(&*current) {
        Ok(data) => Some(Event::default().event(SENSOR_UPDATE).data(data)),
        Err(e) => {
            warn!("failed to encode readings: {e}");
            None
        }
    };

    let live = BroadcastStream::new(state.events.subscribe()).filter_map(|msg| {
        msg.ok()
            .map(|ev| Event::default().event(ev.event).data(ev.payload.to_string()))
    });

    let stream = tokio_stream::iter(first).chain(live).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(
    state: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::push::Publisher;
    use crate::readings::{channel, snapshot, ReadingsTx};
    use crate::store::ZoneStore;
    use crate::zone::tests::zone;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Rig {
        state: AppState,
        _readings: ReadingsTx,
        dir: tempfile::TempDir,
    }

    impl Rig {
        fn on_disk(&self) -> Vec<Zone> {
            ZoneStore::new(self.dir.path().join("zones.json")).load()
        }
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = ZoneStore::new(dir.path().join("zones.json"));
        store.overwrite(&[zone("beds", 1, &[1])]).unwrap();

        let valves =
            Arc::new(ValveBoard::new(&[(ValveId(1), 26), (ValveId(2), 20)], false).unwrap());
        let registry = Arc::new(ZoneRegistry::load(store, valves.valve_ids()));
        let (tx, rx) = channel();
        tx.send_replace(Arc::new(snapshot(&[(1, 42.5, false)])));

        Rig {
            state: AppState {
                registry,
                valves,
                readings: rx,
                activity: ActivityLog::shared(),
                events: BroadcastPublisher::new(16),
                history: None,
            },
            _readings: tx,
            dir,
        }
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let res = router(state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_readings_and_valves() {
        let rig = rig();
        let (status, body) = send(&rig.state, get_req("/api/status")).await;
        assert_eq!(status, StatusCode::OK);

        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["readings"]["sensors"]["1"]["moisture"], 42.5);
        assert_eq!(v["valves"]["1"], false);
        assert_eq!(v["zones"], 1);
        assert!(v["activity"].is_array());
    }

    #[tokio::test]
    async fn get_zones_lists_registry() {
        let rig = rig();
        let (status, body) = send(&rig.state, get_req("/api/zones")).await;
        assert_eq!(status, StatusCode::OK);
        let zones: Vec<Zone> = serde_json::from_slice(&body).unwrap();
        assert_eq!(zones, vec![zone("beds", 1, &[1])]);
    }

    #[tokio::test]
    async fn put_zones_replaces_and_persists() {
        let rig = rig();
        let new = vec![zone("lawn", 2, &[]), zone("pots", 1, &[1])];
        let body = serde_json::to_string(&new).unwrap();

        let (status, _) = send(&rig.state, json_req("PUT", "/api/zones", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(rig.state.registry.snapshot().await.zones, new);
        assert_eq!(rig.on_disk(), new);
    }

    #[tokio::test]
    async fn put_zones_malformed_payload_writes_nothing() {
        let rig = rig();
        let before = rig.on_disk();

        let (status, _) =
            send(&rig.state, json_req("PUT", "/api/zones", "[{\"name\": 1}".into())).await;
        assert!(status.is_client_error(), "got {status}");

        let missing_field = json!([{ "name": "x", "valve": 1 }]).to_string();
        let (status, _) = send(&rig.state, json_req("PUT", "/api/zones", missing_field)).await;
        assert!(status.is_client_error(), "got {status}");

        assert_eq!(rig.on_disk(), before);
        assert_eq!(rig.state.registry.snapshot().await.generation, 0);
    }

    #[tokio::test]
    async fn put_zones_with_unknown_valve_is_unprocessable() {
        let rig = rig();
        let body = serde_json::to_string(&vec![zone("ghost", 9, &[])]).unwrap();

        let (status, body) = send(&rig.state, json_req("PUT", "/api/zones", body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(String::from_utf8(body).unwrap().contains("valve 9"));
        assert_eq!(rig.on_disk(), vec![zone("beds", 1, &[1])]);
    }

    #[tokio::test]
    async fn manual_valve_on_and_off() {
        let rig = rig();
        let (status, body) = send(&rig.state, json_req("POST", "/api/valves/2/on", String::new())).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, json!({ "valve": 2, "on": true }));
        assert_eq!(rig.state.valves.is_on(ValveId(2)), Some(true));

        let (status, _) = send(&rig.state, json_req("POST", "/api/valves/2/off", String::new())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rig.state.valves.is_on(ValveId(2)), Some(false));
        assert_eq!(rig.state.activity.read().await.len(), 2);
    }

    #[tokio::test]
    async fn manual_unknown_valve_is_not_found() {
        let rig = rig();
        let (status, _) = send(&rig.state, json_req("POST", "/api/valves/9/on", String::new())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(rig.state.valves.states().values().all(|on| !on));
    }

    #[tokio::test]
    async fn manual_bad_action_is_bad_request() {
        let rig = rig();
        let (status, _) =
            send(&rig.state, json_req("POST", "/api/valves/1/toggle", String::new())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(rig.state.valves.is_on(ValveId(1)), Some(false));
    }

    #[tokio::test]
    async fn history_without_database_is_empty() {
        let rig = rig();
        let (status, body) = send(&rig.state, get_req("/api/history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn history_lists_sessions_with_limit() {
        let history = History::connect("sqlite::memory:").await.unwrap();
        history.migrate().await.unwrap();
        for minute in 0..3 {
            history
                .record(&WateringSession {
                    started_at: format!("2024-05-01T06:0{minute}:00"),
                    ended_at: format!("2024-05-01T06:0{minute}:30"),
                    zone: "beds".into(),
                    valve: 1,
                    policy: "scheduled".into(),
                    reason: "Scheduled watering at 06:00".into(),
                    result: "satisfied".into(),
                })
                .await
                .unwrap();
        }
        let mut rig = rig();
        rig.state.history = Some(history);

        let (status, body) = send(&rig.state, get_req("/api/history?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let rows: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[0]["started_at"], "2024-05-01T06:02:00");
    }

    #[tokio::test]
    async fn events_start_with_current_snapshot_then_stream_pushes() {
        let rig = rig();
        let res = router(rig.state.clone())
            .oneshot(get_req("/api/events"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let mut body = res.into_body();

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains("event: sensor_update"), "{first}");
        assert!(first.contains("\"moisture\":42.5"), "{first}");

        rig.state.events.publish("zone_update", &json!({ "zone": "beds" }));
        let next = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let next = String::from_utf8(next.to_vec()).unwrap();
        assert!(next.contains("event: zone_update"), "{next}");
        assert!(next.contains("\"zone\":\"beds\""), "{next}");
    }
}
