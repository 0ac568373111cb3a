// API REST RELAYWATCH - Serveur HTTP de consultation
//
// RÔLE :
// Expose le journal de samples en lecture seule pour le dashboard web
// et les scripts d'exploitation. Aucune écriture : le collector est le
// seul writer du journal.
//
// FONCTIONNEMENT :
// - Serveur Axum, routes /api/* + /health simple
// - Cache mémoire rechargé à chaque requête (queue du TSV uniquement)
// - Détection changements/anomalies calculée à la demande sur le cache
// - CORS ouvert : le dashboard est servi depuis une autre origine
//
// UTILITÉ DANS RELAYWATCH :
// 🎯 Dashboard temps réel : status, recent, stats
// 🎯 Exploitation : /api/health répond "les données sont-elles fraîches ?"
//    pour distinguer appareil silencieux et collector mort
// 🎯 Diagnostic : changes (bascules WAN, IP, SIM) et anomalies (signal,
//    latence, pings perdus) avec seuils paramétrables

use crate::config::ApiConfig;
use crate::logcache::LogCache;
use crate::state::Shared;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use relaywatch_core::anomaly::{detect_anomalies, AnomalyConfig, AnomalyEvent};
use relaywatch_core::changes::{detect_changes, ChangeEvent};
use relaywatch_core::sample::Sample;
use relaywatch_core::stats::{compute_stats, WindowStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub cache: Shared<LogCache>,
    pub cfg: ApiConfig,
}

/// Vue aplatie d'un Sample pour le dashboard (mêmes clés que les
/// colonnes du journal, en snake_case).
#[derive(Serialize)]
struct SampleView {
    timestamp: String,
    source_ip: Option<String>,
    active_interface: Option<String>,
    dest_ip: String,
    success: bool,
    latency_ms: Option<u32>,
    public_ip: Option<String>,
    wan_status: Option<&'static str>,
    wan_source: &'static str,
    sim_status: Option<String>,
    technology: Option<String>,
    band: Option<String>,
    bandwidth: Option<String>,
    device_ipv4: Option<String>,
    carrier: Option<String>,
    apn: Option<String>,
    iccid: Option<String>,
    ecgi: Option<String>,
    pci: Option<String>,
    rsrp: Option<i32>,
    rsrq: Option<i32>,
    snr: Option<i32>,
    rssi: Option<i32>,
    model: Option<String>,
    manufacturer: Option<String>,
    firmware: Option<String>,
    imei: Option<String>,
    serial: Option<String>,
    active_sim: Option<u8>,
    conn_dev_count: Option<u32>,
    conn_dev_names: Option<String>,
    extras: BTreeMap<String, String>,
}

fn to_view(s: &Sample) -> SampleView {
    SampleView {
        timestamp: s.timestamp.format(&Rfc3339).unwrap_or_default(),
        source_ip: s.ping.source_ip.clone(),
        active_interface: s.ping.active_interface.clone(),
        dest_ip: s.ping.dest.clone(),
        success: s.ping.success,
        latency_ms: s.ping.latency_ms,
        public_ip: s.public_ip.clone(),
        wan_status: s.connection.wan_status.map(|w| w.as_str()),
        wan_source: s.connection.wan_source.as_str(),
        sim_status: s.sim.sim_status.clone(),
        technology: s.network.technology.clone(),
        band: s.network.band.clone(),
        bandwidth: s.network.bandwidth.clone(),
        device_ipv4: s.connection.device_ipv4.clone(),
        carrier: s.network.carrier.clone(),
        apn: s.sim.apn.clone(),
        iccid: s.sim.iccid.clone(),
        ecgi: s.network.ecgi.clone(),
        pci: s.network.pci.clone(),
        rsrp: s.signal.rsrp,
        rsrq: s.signal.rsrq,
        snr: s.signal.sinr,
        rssi: s.signal.rssi,
        model: s.device.model.clone(),
        manufacturer: s.device.manufacturer.clone(),
        firmware: s.device.firmware.clone(),
        imei: s.device.imei.clone(),
        serial: s.device.serial.clone(),
        active_sim: s.sim.active_slot,
        conn_dev_count: s.connected_devices.count,
        conn_dev_names: s.connected_devices.names.clone(),
        extras: s.extras.clone(),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/health", get(get_health))
        .route("/api/status", get(get_status))
        .route("/api/recent", get(get_recent))
        .route("/api/stats", get(get_stats))
        .route("/api/changes", get(get_changes))
        .route("/api/anomalies", get(get_anomalies))
        .route("/api/sim/current", get(get_current_sim))
        .with_state(app_state)
        .layer(cors)
}

/// Recharge le cache ; une erreur de lecture devient une 500 explicite.
fn reload(app: &AppState) -> Result<(), StatusCode> {
    app.cache.lock().reload().map_err(|e| {
        eprintln!("[api] log reload failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Serialize)]
struct HealthView {
    status: &'static str,
    log_file_exists: bool,
    cached_entries: usize,
    last_read: Option<String>,
    /// Âge du dernier sample en secondes - la réponse à « est-ce que le
    /// collector tourne encore ? »
    latest_sample_age_secs: Option<i64>,
    /// Contenu du fichier de statut écrit par le collector (flag auth,
    /// cycles, staleness) ; null si le fichier n'existe pas encore.
    collector: Option<serde_json::Value>,
}

// GET /api/health
async fn get_health(State(app): State<AppState>) -> Json<HealthView> {
    // best effort : même si le journal est illisible on répond
    let _ = app.cache.lock().reload();
    let cache = app.cache.lock();

    let now = OffsetDateTime::now_utc();
    let age = cache.latest().map(|s| (now - s.timestamp).whole_seconds().max(0));
    let collector = std::fs::read_to_string(&app.cfg.status_file)
        .ok()
        .and_then(|body| serde_json::from_str(&body).ok());

    Json(HealthView {
        status: "healthy",
        log_file_exists: cache.log_file_exists(),
        cached_entries: cache.len(),
        last_read: cache
            .last_read()
            .and_then(|t| t.format(&Rfc3339).ok()),
        latest_sample_age_secs: age,
        collector,
    })
}

// GET /api/status (dernier sample)
async fn get_status(State(app): State<AppState>) -> Result<Json<SampleView>, StatusCode> {
    reload(&app)?;
    let cache = app.cache.lock();
    let Some(latest) = cache.latest() else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(latest)))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    count: Option<usize>,
}

#[derive(Serialize)]
struct RecentView {
    entries: Vec<SampleView>,
}

// GET /api/recent?count=N
async fn get_recent(
    State(app): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<RecentView>, StatusCode> {
    reload(&app)?;
    let count = params.count.unwrap_or(100).min(app.cfg.cache_lines);
    let cache = app.cache.lock();
    let entries = cache.recent(count).iter().map(to_view).collect();
    Ok(Json(RecentView { entries }))
}

// GET /api/stats?count=N (min/avg/max latence + RSRP sur la fenêtre)
async fn get_stats(
    State(app): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<WindowStats>, StatusCode> {
    reload(&app)?;
    let count = params.count.unwrap_or(100).min(app.cfg.cache_lines);
    let cache = app.cache.lock();
    match compute_stats(cache.recent(count)) {
        Some(stats) => Ok(Json(stats)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Serialize)]
struct ChangesView {
    changes: Vec<ChangeEvent>,
}

// GET /api/changes (bascules wan_source / IP / carrier / APN / ICCID)
async fn get_changes(State(app): State<AppState>) -> Result<Json<ChangesView>, StatusCode> {
    reload(&app)?;
    let cache = app.cache.lock();
    let changes = detect_changes(cache.samples(), app.cfg.change_retention);
    Ok(Json(ChangesView { changes }))
}

#[derive(Debug, Deserialize)]
struct AnomalyParams {
    rsrp_threshold: Option<i32>,
    latency_threshold: Option<u32>,
    window: Option<usize>,
}

#[derive(Serialize)]
struct AnomaliesView {
    anomalies: Vec<AnomalyEvent>,
}

// GET /api/anomalies?rsrp_threshold=10&latency_threshold=50
async fn get_anomalies(
    State(app): State<AppState>,
    Query(params): Query<AnomalyParams>,
) -> Result<Json<AnomaliesView>, StatusCode> {
    reload(&app)?;
    let defaults = AnomalyConfig::default();
    let cfg = AnomalyConfig {
        rsrp_threshold: params.rsrp_threshold.unwrap_or(defaults.rsrp_threshold),
        latency_threshold: params.latency_threshold.unwrap_or(defaults.latency_threshold),
        window: params.window.unwrap_or(defaults.window),
    };
    let cache = app.cache.lock();
    let anomalies = detect_anomalies(cache.samples(), &cfg);
    Ok(Json(AnomaliesView { anomalies }))
}

#[derive(Serialize)]
struct SimView {
    current_slot: u8,
}

// GET /api/sim/current (slot SIM actif vu dans le dernier sample)
async fn get_current_sim(State(app): State<AppState>) -> Result<Json<SimView>, StatusCode> {
    reload(&app)?;
    let cache = app.cache.lock();
    let slot = cache.latest().and_then(|s| s.sim.active_slot);
    match slot {
        Some(current_slot) => Ok(Json(SimView { current_slot })),
        None => Err(StatusCode::NOT_FOUND),
    }
}
