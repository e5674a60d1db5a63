//! HTTP routes
//!
//! | Route            | Method | Purpose                                 |
//! |------------------|--------|-----------------------------------------|
//! | /move_motor      | POST   | Manual jog or target tracking           |
//! | /set_zero        | POST   | Capture the current pose as zero        |
//! | /go_zero         | POST   | Return to the stored zero               |
//! | /rezero          | POST   | Hardware re-zero, clears faults         |
//! | /read_json       | POST   | Own turret position                     |
//! | /my_turret       | POST   | Own turret position (404 when unknown)  |
//! | /read_targets    | POST   | Globes and turrets from the feed        |
//! | /status          | GET    | Axis states and stored zero             |
//! | /health          | GET    | Liveness                                |
//! | /positions.json  | GET    | Bundled arena snapshot                  |

use crate::error::ApiError;
use arena_feed::{FeedError, TargetEntity, TargetKind};
use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeFile;
use tracing::{info, info_span, Instrument};
use turret_control::{AxisState, MotionCoordinator, MotionError, MoveRequest, StatusReport, TrackRequest};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub motion: Arc<MotionCoordinator>,
}

pub fn router(state: AppState, fixture: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/move_motor", post(move_motor))
        .route("/set_zero", post(set_zero).get(set_zero_get))
        .route("/go_zero", post(go_zero))
        .route("/rezero", post(rezero))
        .route("/status", get(status))
        .route("/read_json", post(read_json))
        .route("/my_turret", post(my_turret))
        .route("/read_targets", post(read_targets))
        .route_service("/positions.json", ServeFile::new(fixture))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MoveBody {
    theta: Option<Value>,
    phi: Option<Value>,
    z: Option<Value>,
    url: Option<String>,
    team: Option<Value>,
    target_id: Option<Value>,
    target_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedBody {
    url: Option<String>,
    team: Option<Value>,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// JSON number or numeric string
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

/// Team and target ids arrive as numbers or strings
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.trim().is_empty())
}

impl MoveBody {
    fn is_manual(&self) -> bool {
        self.theta.is_some() || self.phi.is_some() || self.z.is_some()
    }

    fn manual(&self) -> Result<(f64, f64), ApiError> {
        let invalid = |field: &str| ApiError::BadRequest(format!("Invalid manual move inputs: {}", field));

        let azimuth_deg = match (&self.theta, &self.phi) {
            (Some(_), Some(_)) => {
                return Err(ApiError::BadRequest(
                    "Invalid manual move inputs: give either theta (radians) or phi (degrees), not both"
                        .to_string(),
                ))
            }
            (Some(theta), None) => number(theta).ok_or_else(|| invalid("theta"))?.to_degrees(),
            (None, Some(phi)) => number(phi).ok_or_else(|| invalid("phi"))?,
            (None, None) => 0.0,
        };
        let elevation_deg = match &self.z {
            Some(z) => number(z).ok_or_else(|| invalid("z"))?,
            None => 0.0,
        };
        Ok((azimuth_deg, elevation_deg))
    }

    fn track(self) -> Result<TrackRequest, ApiError> {
        let missing = || ApiError::BadRequest("Missing target move parameters".to_string());

        let url = non_empty(self.url).ok_or_else(missing)?;
        let team = self.team.as_ref().and_then(identifier).ok_or_else(missing)?;
        let target_id = self.target_id.as_ref().and_then(identifier).ok_or_else(missing)?;
        let target_kind = self
            .target_type
            .ok_or_else(missing)?
            .parse::<TargetKind>()
            .map_err(MotionError::from)?;

        Ok(TrackRequest {
            url,
            team,
            target_id,
            target_kind,
        })
    }
}

impl FeedBody {
    fn url_and_team(self) -> Option<(String, String)> {
        let url = non_empty(self.url)?;
        let team = self.team.as_ref().and_then(identifier)?;
        Some((url, team))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ManualMoveResponse {
    pub status: &'static str,
    pub motor1_theta_deg: f64,
    pub motor2_z: f64,
    pub motor1_angle: f64,
    pub motor2_angle: f64,
}

#[derive(Serialize)]
pub struct TargetMoveResponse {
    pub status: &'static str,
    /// Rotation actually performed on the traverse axis
    pub motor1_phi_deg: f64,
    pub motor2_z: f64,
    pub range: f64,
    pub motor1_angle: f64,
    pub motor2_angle: f64,
    pub target: TargetEntity,
}

#[derive(Serialize)]
pub struct SetZeroResponse {
    pub status: String,
    pub phi0: f64,
    pub z0: f64,
}

#[derive(Serialize)]
pub struct GoZeroResponse {
    pub status: &'static str,
    pub phi_zero: f64,
    pub z_zero: f64,
}

#[derive(Serialize)]
pub struct AxesResponse {
    pub azimuth: AxisState,
    pub elevation: AxisState,
}

#[derive(Serialize)]
pub struct RezeroResponse {
    pub status: &'static str,
    pub axes: AxesResponse,
}

#[derive(Serialize)]
pub struct TurretPositionResponse {
    pub r: f64,
    pub theta: f64,
}

#[derive(Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetEntity>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "turret-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn move_motor(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("move_motor", %request_id);

    async move {
        let body: MoveBody = parse_body(&body)?;

        if body.is_manual() {
            let (azimuth_deg, elevation_deg) = body.manual()?;
            let report = state
                .motion
                .execute(MoveRequest::Manual {
                    azimuth_deg,
                    elevation_deg,
                })
                .await?;

            let response = ManualMoveResponse {
                status: "manual moving",
                motor1_theta_deg: azimuth_deg,
                motor2_z: elevation_deg,
                motor1_angle: report.azimuth.new_angle,
                motor2_angle: report.elevation.new_angle,
            };
            return Ok(Json(response).into_response());
        }

        let track = body.track()?;
        info!("Tracking {} {} for team {}", track.target_kind, track.target_id, track.team);
        let report = state.motion.execute(MoveRequest::Track(track)).await?;

        let (aim, target) = match (report.aim, report.target) {
            (Some(aim), Some(target)) => (aim, target),
            _ => return Err(ApiError::Internal("tracking move produced no aim".to_string())),
        };
        let response = TargetMoveResponse {
            status: "target moving",
            motor1_phi_deg: report.azimuth.delta(),
            motor2_z: aim.elevation_delta_deg,
            range: aim.range,
            motor1_angle: report.azimuth.new_angle,
            motor2_angle: report.elevation.new_angle,
            target,
        };
        Ok(Json(response).into_response())
    }
    .instrument(span)
    .await
}

async fn set_zero(State(state): State<AppState>) -> Result<Json<SetZeroResponse>, ApiError> {
    let zero = state.motion.set_zero().await?;
    Ok(Json(SetZeroResponse {
        status: format!("Zero set! phi0={:.2}, z0={:.2}", zero.phi0, zero.z0),
        phi0: zero.phi0,
        z0: zero.z0,
    }))
}

async fn set_zero_get() -> ApiError {
    ApiError::MethodNotAllowed("Use POST to set zero".to_string())
}

async fn go_zero(State(state): State<AppState>) -> Result<Json<GoZeroResponse>, ApiError> {
    let (zero, _) = state.motion.go_zero().await?;
    Ok(Json(GoZeroResponse {
        status: "moved to zero",
        phi_zero: zero.phi0,
        z_zero: zero.z0,
    }))
}

async fn rezero(State(state): State<AppState>) -> Result<Json<RezeroResponse>, ApiError> {
    let report = state.motion.rezero().await?;
    Ok(Json(RezeroResponse {
        status: "re-zeroed",
        axes: AxesResponse {
            azimuth: report.azimuth,
            elevation: report.elevation,
        },
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.motion.status().await)
}

async fn read_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TurretPositionResponse>, ApiError> {
    let body: FeedBody = parse_body(&body)?;
    let (url, team) = body
        .url_and_team()
        .ok_or_else(|| ApiError::BadRequest("Provide JSON URL and your team ID".to_string()))?;

    let turret = state.motion.locate_turret(&url, &team).await?;
    Ok(Json(TurretPositionResponse {
        r: turret.r,
        theta: turret.theta,
    }))
}

async fn my_turret(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TurretPositionResponse>, ApiError> {
    let body: FeedBody = parse_body(&body)?;
    let (url, team) = body
        .url_and_team()
        .ok_or_else(|| ApiError::BadRequest("Provide JSON URL and your team ID".to_string()))?;

    match state.motion.locate_turret(&url, &team).await {
        Ok(turret) => Ok(Json(TurretPositionResponse {
            r: turret.r,
            theta: turret.theta,
        })),
        Err(MotionError::Feed(FeedError::TurretNotFound(_))) => {
            Err(ApiError::NotFound("Team ID not found".to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

async fn read_targets(State(state): State<AppState>, body: Bytes) -> Result<Json<TargetsResponse>, ApiError> {
    let body: FeedBody = parse_body(&body)?;
    let url = non_empty(body.url).ok_or_else(|| ApiError::BadRequest("Provide JSON URL".to_string()))?;
    let team = body.team.as_ref().and_then(identifier);

    let targets = state.motion.list_targets(&url, team.as_deref()).await?;
    Ok(Json(TargetsResponse { targets }))
}
