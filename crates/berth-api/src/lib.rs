//! berth-api — the volume-plugin HTTP surface.
//!
//! Implements the container runtime's volume-plugin protocol: JSON
//! over HTTP, every endpoint a POST, failure signaled by a non-empty
//! `Err` string in the response body.
//!
//! # Endpoints
//!
//! | Path | Request | Response |
//! |---|---|---|
//! | `/Plugin.Activate` | `{}` | `{Implements}` |
//! | `/VolumeDriver.Create` | `{Name}` | `{Err}` |
//! | `/VolumeDriver.Remove` | `{Name}` | `{Err}` |
//! | `/VolumeDriver.Mount` | `{Name}` | `{Mountpoint, Err}` |
//! | `/VolumeDriver.Unmount` | `{Name}` | `{Err}` |
//! | `/VolumeDriver.Get` | `{Name}` | `{Volume, Err}` |
//! | `/VolumeDriver.Path` | `{Name}` | `{Mountpoint, Err}` |
//! | `/VolumeDriver.List` | `{}` | `{Volumes, Err}` |
//! | `/VolumeDriver.Capabilities` | `{}` | `{Capabilities}` |

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use berth_driver::VolumeDriver;

/// Shared state for the plugin handlers.
#[derive(Clone)]
pub struct ApiState {
    pub driver: Arc<VolumeDriver>,
}

/// Build the plugin router.
pub fn build_router(driver: Arc<VolumeDriver>) -> Router {
    let state = ApiState { driver };
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(state)
}

// ── Protocol types ─────────────────────────────────────────────────

/// Request carrying a volume name.
#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

/// One volume in Get/List responses.
#[derive(Debug, Serialize)]
pub struct VolumeInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

#[derive(Debug, Serialize, Default)]
pub struct PluginResponse {
    #[serde(rename = "Mountpoint", skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(rename = "Volume", skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    #[serde(rename = "Volumes", skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    /// Empty on success; the stable error string otherwise.
    #[serde(rename = "Err")]
    pub err: String,
}

impl PluginResponse {
    fn ok() -> Self {
        Self::default()
    }

    fn error(e: impl std::fmt::Display) -> Self {
        Self {
            err: e.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    #[serde(rename = "Capabilities")]
    pub capabilities: Capability,
}

#[derive(Debug, Serialize)]
pub struct Capability {
    /// Volumes here are host-local: each host's driver manages its own
    /// mount table.
    #[serde(rename = "Scope")]
    pub scope: String,
}

// ── Handlers ───────────────────────────────────────────────────────

async fn activate() -> Json<ActivateResponse> {
    debug!("plugin activated");
    Json(ActivateResponse {
        implements: vec!["VolumeDriver".to_string()],
    })
}

async fn capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: Capability {
            scope: "local".to_string(),
        },
    })
}

async fn create(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.create(&req.name).await {
        Ok(()) => Json(PluginResponse::ok()),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn remove(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.remove(&req.name) {
        Ok(()) => Json(PluginResponse::ok()),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn mount(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.mount(&req.name).await {
        Ok(path) => Json(PluginResponse {
            mountpoint: Some(path.display().to_string()),
            ..PluginResponse::ok()
        }),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn unmount(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.unmount(&req.name).await {
        Ok(()) => Json(PluginResponse::ok()),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn get(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.get(&req.name) {
        Ok(path) => Json(PluginResponse {
            volume: Some(VolumeInfo {
                name: req.name,
                mountpoint: path.display().to_string(),
            }),
            ..PluginResponse::ok()
        }),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn path(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<PluginResponse> {
    match state.driver.path(&req.name) {
        Ok(path) => Json(PluginResponse {
            mountpoint: Some(path.display().to_string()),
            ..PluginResponse::ok()
        }),
        Err(e) => Json(PluginResponse::error(e)),
    }
}

async fn list(State(state): State<ApiState>) -> Json<PluginResponse> {
    match state.driver.list().await {
        Ok(volumes) => Json(PluginResponse {
            volumes: Some(
                volumes
                    .into_iter()
                    .map(|(name, path)| VolumeInfo {
                        name,
                        mountpoint: path.display().to_string(),
                    })
                    .collect(),
            ),
            ..PluginResponse::ok()
        }),
        Err(e) => Json(PluginResponse::error(e)),
    }
}
