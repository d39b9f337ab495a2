//! Web server for calibration UI and API

use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::calibration::{
    calibration_view, nudge, reset_calibration, set_vanishing_point, CalibrationView, Direction,
};
use crate::config::{Calibration, Config};
use crate::error::IpmError;
use crate::frame::{GrayFrame, ImageSize};
use crate::geometry::{CameraGeometry, VanishingPoint};
use crate::preview::{encode_gray_jpeg, encode_source_preview, PREVIEW_QUALITY};
use crate::table::{MappingTable, TableStats};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Previews are only encoded while a client polled within this window
const PREVIEW_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state
pub struct AppState {
    /// Configuration (with calibration data)
    pub config: Arc<RwLock<Config>>,
    /// Path to save configuration
    config_path: PathBuf,
    /// Active mapping table, replaced wholesale on calibration change
    table: ArcSwap<MappingTable>,
    /// Serializes read-config/compile/store so tables are stored in order
    rebuild_lock: Mutex<()>,
    /// Latest bird's-eye preview frame (JPEG encoded)
    preview_frame: RwLock<Vec<u8>>,
    /// Latest perspective preview frame with crosshair (JPEG encoded)
    raw_preview_frame: RwLock<Vec<u8>>,
    /// Milliseconds since `started` at the last preview request
    last_preview_request_ms: AtomicU64,
    started: Instant,
    /// Frames processed by the pipeline
    frames_processed: AtomicU64,
    /// Last measured pipeline rate
    fps: RwLock<f64>,
    src_size: ImageSize,
    dst_size: ImageSize,
}

impl AppState {
    /// Build the initial table from the configuration.
    ///
    /// Invalid frame sizes are fatal configuration errors.
    pub fn new(config: Arc<RwLock<Config>>, config_path: PathBuf) -> Result<Self, IpmError> {
        let (table, src_size, dst_size) = {
            let cfg = config.read();
            let src = cfg.source_size();
            let dst = cfg.destination_size();
            let vp = cfg.calibration.vanishing_point(src);
            (MappingTable::compile(&cfg.camera, src, dst, vp)?, src, dst)
        };

        let stats = table.stats();
        info!(
            "Initial mapping table {} -> {} ({:.1}% mapped)",
            src_size,
            dst_size,
            stats.mapped_ratio() * 100.0
        );

        Ok(Self {
            config,
            config_path,
            table: ArcSwap::from_pointee(table),
            rebuild_lock: Mutex::new(()),
            preview_frame: RwLock::new(Vec::new()),
            raw_preview_frame: RwLock::new(Vec::new()),
            last_preview_request_ms: AtomicU64::new(0),
            started: Instant::now(),
            frames_processed: AtomicU64::new(0),
            fps: RwLock::new(0.0),
            src_size,
            dst_size,
        })
    }

    pub fn source_size(&self) -> ImageSize {
        self.src_size
    }

    pub fn destination_size(&self) -> ImageSize {
        self.dst_size
    }

    /// Get the current mapping table
    pub fn table(&self) -> Arc<MappingTable> {
        self.table.load_full()
    }

    /// Rebuild the table from the current calibration and swap it in
    pub fn recompile(&self) -> Result<TableStats, IpmError> {
        let _guard = self.rebuild_lock.lock();
        let start = Instant::now();

        let (camera, vp) = {
            let config = self.config.read();
            (
                config.camera.clone(),
                config.calibration.vanishing_point(self.src_size),
            )
        };

        let table = MappingTable::compile(&camera, self.src_size, self.dst_size, vp)?;
        let stats = table.stats();
        self.table.store(Arc::new(table));

        info!(
            "Rebuilt mapping table for vanishing point ({}, {}) in {:.1}ms ({:.1}% mapped)",
            vp.x,
            vp.y,
            start.elapsed().as_secs_f64() * 1000.0,
            stats.mapped_ratio() * 100.0
        );
        Ok(stats)
    }

    /// Apply a change to the calibration and rebuild the table
    pub fn update_calibration<F>(&self, f: F) -> Result<TableStats, IpmError>
    where
        F: FnOnce(&mut Calibration, ImageSize),
    {
        {
            let mut config = self.config.write();
            f(&mut config.calibration, self.src_size);
        }
        self.recompile()
    }

    /// Current vanishing point
    pub fn vanishing_point(&self) -> VanishingPoint {
        self.config.read().calibration.vanishing_point(self.src_size)
    }

    pub fn calibration_enabled(&self) -> bool {
        self.config.read().calibration.enabled
    }

    /// Whether a client asked for a preview recently
    pub fn should_encode_preview(&self) -> bool {
        let last = self.last_preview_request_ms.load(Ordering::Relaxed);
        last > 0 && self.elapsed_ms().saturating_sub(last) < PREVIEW_IDLE_TIMEOUT.as_millis() as u64
    }

    fn touch_preview(&self) {
        self.last_preview_request_ms
            .store(self.elapsed_ms().max(1), Ordering::Relaxed);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Update the bird's-eye preview (called from capture thread)
    pub fn update_preview(&self, frame: &GrayFrame) {
        match encode_gray_jpeg(frame, PREVIEW_QUALITY) {
            Ok(jpeg) => *self.preview_frame.write() = jpeg,
            Err(e) => warn!("Failed to encode preview: {}", e),
        }
    }

    /// Update the perspective preview with the vanishing point crosshair
    pub fn update_raw_preview(&self, frame: &GrayFrame, vp: VanishingPoint) {
        match encode_source_preview(frame, vp, PREVIEW_QUALITY) {
            Ok(jpeg) => *self.raw_preview_frame.write() = jpeg,
            Err(e) => warn!("Failed to encode raw preview: {}", e),
        }
    }

    /// Get the latest preview frame
    pub fn get_preview(&self) -> Vec<u8> {
        self.touch_preview();
        self.preview_frame.read().clone()
    }

    /// Get the latest raw preview frame
    pub fn get_raw_preview(&self) -> Vec<u8> {
        self.touch_preview();
        self.raw_preview_frame.read().clone()
    }

    /// Record pipeline throughput
    pub fn record_frames(&self, frames: u64, fps: f64) {
        self.frames_processed.fetch_add(frames, Ordering::Relaxed);
        *self.fps.write() = fps;
    }

    /// Save configuration to file
    pub fn save_config(&self) -> Result<()> {
        let config = self.config.read();
        config.save(&self.config_path)
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Static files and UI
        .route("/", get(index_handler))
        .route("/static/*path", get(static_handler))
        // API endpoints
        .route("/api/calibration", get(get_calibration).post(set_calibration))
        .route("/api/calibration/nudge", post(nudge_calibration))
        .route("/api/calibration/key", post(key_calibration))
        .route("/api/calibration/reset", post(reset_handler))
        .route("/api/calibration/save", post(save_calibration))
        .route("/api/calibration/enable", post(enable_calibration))
        .route("/api/calibration/disable", post(disable_calibration))
        // Previews
        .route("/api/preview", get(get_preview))
        .route("/api/preview/raw", get(get_raw_preview))
        // Table and system info
        .route("/api/table/stats", get(get_table_stats))
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the main index page
async fn index_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
    }
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// API response for calibration data
#[derive(Serialize)]
struct CalibrationResponse {
    calibration: CalibrationView,
    camera: CameraGeometry,
    source: ImageSize,
    destination: ImageSize,
}

fn calibration_response(state: &AppState) -> CalibrationResponse {
    let config = state.config.read();
    CalibrationResponse {
        calibration: calibration_view(&config.calibration, &config.camera, state.src_size),
        camera: config.camera.clone(),
        source: state.src_size,
        destination: state.dst_size,
    }
}

/// Respond with the new calibration, or 500 if the rebuild failed
fn after_rebuild(state: &AppState, result: Result<TableStats, IpmError>) -> Response {
    match result {
        Ok(_) => Json(calibration_response(state)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Get current calibration
async fn get_calibration(State(state): State<Arc<AppState>>) -> Json<CalibrationResponse> {
    Json(calibration_response(&state))
}

/// Request to place the vanishing point
#[derive(Deserialize)]
struct SetCalibrationRequest {
    x: i32,
    y: i32,
}

/// Set the vanishing point
async fn set_calibration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetCalibrationRequest>,
) -> Response {
    let result = state.update_calibration(|cal, _| set_vanishing_point(cal, req.x, req.y));
    after_rebuild(&state, result)
}

#[derive(Deserialize)]
struct NudgeRequest {
    direction: Direction,
}

/// Move the vanishing point one step
async fn nudge_calibration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NudgeRequest>,
) -> Response {
    let result = state.update_calibration(|cal, src| {
        nudge(cal, req.direction, src);
    });
    after_rebuild(&state, result)
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
}

/// Keyboard-style adjustment (`a`, `d`, `w`, `s`)
async fn key_calibration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeyRequest>,
) -> Response {
    let direction = req.key.chars().next().and_then(Direction::from_key);
    match direction {
        Some(direction) => {
            let result = state.update_calibration(|cal, src| {
                nudge(cal, direction, src);
            });
            after_rebuild(&state, result)
        }
        // Unbound keys leave the calibration alone
        None => Json(calibration_response(&state)).into_response(),
    }
}

/// Reset calibration to defaults
async fn reset_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = state.update_calibration(|cal, _| reset_calibration(cal));
    after_rebuild(&state, result)
}

/// Save calibration to file
async fn save_calibration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.save_config() {
        Ok(_) => (StatusCode::OK, "Saved").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Enable bird's-eye processing
async fn enable_calibration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.config.write().calibration.enabled = true;
    StatusCode::OK
}

/// Disable bird's-eye processing
async fn disable_calibration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.config.write().calibration.enabled = false;
    StatusCode::OK
}

/// Get current bird's-eye preview frame (JPEG)
async fn get_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    jpeg_response(state.get_preview())
}

/// Get perspective preview frame with crosshair (JPEG)
async fn get_raw_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    jpeg_response(state.get_raw_preview())
}

fn jpeg_response(frame: Vec<u8>) -> Response {
    if frame.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response();
    }

    (
        [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
        frame,
    )
        .into_response()
}

/// Mapped/unmapped counts of the active table
async fn get_table_stats(State(state): State<Arc<AppState>>) -> Json<TableStats> {
    Json(state.table().stats())
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    source: ImageSize,
    destination: ImageSize,
    calibration_enabled: bool,
    frames_processed: u64,
    fps: f64,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: state.src_size,
        destination: state.dst_size,
        calibration_enabled: state.calibration_enabled(),
        frames_processed: state.frames_processed.load(Ordering::Relaxed),
        fps: *state.fps.read(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        let config = Arc::new(RwLock::new(Config::default()));
        AppState::new(config, PathBuf::from("/tmp/birdseye-test.toml")).unwrap()
    }

    #[test]
    fn test_initial_table_matches_config() {
        let state = test_state();
        let table = state.table();
        assert_eq!(table.src_size(), ImageSize::new(720, 360));
        assert_eq!(table.dst_size(), ImageSize::new(200, 200));
        assert_eq!(state.vanishing_point(), VanishingPoint::new(360, 180));
    }

    #[test]
    fn test_nudge_swaps_in_new_table() {
        let state = test_state();
        let before = state.table();

        state
            .update_calibration(|cal, src| {
                nudge(cal, Direction::Left, src);
            })
            .unwrap();

        let after = state.table();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_ne!(*before, *after);
        assert_eq!(before.entries().len(), after.entries().len());
        assert_eq!(state.vanishing_point(), VanishingPoint::new(358, 180));

        // A reader holding the old table keeps a consistent snapshot
        let expected = MappingTable::compile(
            &CameraGeometry::default(),
            ImageSize::new(720, 360),
            ImageSize::new(200, 200),
            VanishingPoint::new(360, 180),
        )
        .unwrap();
        assert_eq!(*before, expected);
    }

    #[test]
    fn test_reset_restores_centered_table() {
        let state = test_state();
        let original = state.table();
        state
            .update_calibration(|cal, _| set_vanishing_point(cal, 10, 10))
            .unwrap();
        state.update_calibration(|cal, _| reset_calibration(cal)).unwrap();
        assert_eq!(*state.table(), *original);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = Config::default();
        config.output.width = 0;
        let result = AppState::new(Arc::new(RwLock::new(config)), PathBuf::from("unused.toml"));
        assert!(matches!(result, Err(IpmError::InvalidDimension { .. })));
    }

    #[test]
    fn test_preview_gating() {
        let state = test_state();
        assert!(!state.should_encode_preview());
        assert!(state.get_preview().is_empty());
        assert!(state.should_encode_preview());
    }

    #[test]
    fn test_calibration_response_serializes() {
        let state = test_state();
        let json = serde_json::to_value(calibration_response(&state)).unwrap();
        assert_eq!(json["calibration"]["vanishing_point"]["x"], 360);
        assert_eq!(json["source"]["width"], 720);
        assert_eq!(json["camera"]["fov_h_deg"], 80.0);
    }
}
