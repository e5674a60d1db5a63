//! Motion Coordinator
//!
//! Turns a move request into per-axis commands. Tracking requests go through
//! the arena feed, the resolver and the aim transform; manual requests feed
//! their deltas straight to the axes. Both axes are commanded concurrently.

use crate::axis::{AxisController, AxisError, AxisState, MoveMode, MoveOutcome};
use crate::calibration::{CalibrationError, ZeroCalibrationStore};
use crate::hardware::HardwareContext;
use arena_feed::{resolve, FeedClient, FeedError, ResolveError, TargetEntity, TargetKind, TurretPosition};
use serde::Serialize;
use std::sync::Arc;
use targeting::{compute_aim, AimSolution, ZeroCalibration};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MotionError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Axis(#[from] AxisError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Aim at one entity of the arena feed
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub url: String,
    /// Own team id: locates this turret in the feed
    pub team: String,
    pub target_id: String,
    pub target_kind: TargetKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveRequest {
    /// Raw relative deltas in actuator degrees
    Manual { azimuth_deg: f64, elevation_deg: f64 },
    Track(TrackRequest),
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub azimuth: MoveOutcome,
    pub elevation: MoveOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aim: Option<AimSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetEntity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub azimuth: AxisState,
    pub elevation: AxisState,
    pub zero: ZeroCalibration,
}

pub struct MotionCoordinator {
    hardware: HardwareContext,
    feed: FeedClient,
    calibration: Arc<ZeroCalibrationStore>,
}

impl MotionCoordinator {
    pub fn new(hardware: HardwareContext, feed: FeedClient, calibration: ZeroCalibrationStore) -> Self {
        Self {
            hardware,
            feed,
            calibration: Arc::new(calibration),
        }
    }

    pub fn hardware(&self) -> &HardwareContext {
        &self.hardware
    }

    pub fn feed(&self) -> &FeedClient {
        &self.feed
    }

    pub fn calibration(&self) -> &ZeroCalibrationStore {
        &self.calibration
    }

    pub async fn execute(&self, request: MoveRequest) -> Result<MoveReport, MotionError> {
        match request {
            MoveRequest::Manual {
                azimuth_deg,
                elevation_deg,
            } => self.manual(azimuth_deg, elevation_deg).await,
            MoveRequest::Track(track) => self.track(&track).await,
        }
    }

    async fn manual(&self, azimuth_deg: f64, elevation_deg: f64) -> Result<MoveReport, MotionError> {
        if !azimuth_deg.is_finite() || !elevation_deg.is_finite() {
            return Err(MotionError::InvalidInput(format!(
                "move deltas must be finite (got {}, {})",
                azimuth_deg, elevation_deg
            )));
        }
        debug!("Manual move: azimuth {:+.3}°, elevation {:+.3}°", azimuth_deg, elevation_deg);

        let (azimuth, elevation) = tokio::join!(
            relative_move(self.hardware.azimuth(), azimuth_deg),
            relative_move(self.hardware.elevation(), elevation_deg),
        );

        Ok(MoveReport {
            azimuth: azimuth?,
            elevation: elevation?,
            aim: None,
            target: None,
        })
    }

    async fn track(&self, request: &TrackRequest) -> Result<MoveReport, MotionError> {
        let snapshot = self.feed.fetch(&request.url).await?;
        let turret = snapshot.turret(&request.team)?;
        let target = resolve(&snapshot.targets(), request.target_kind, &request.target_id)?;

        let zero = self.load_zero().await;
        let aim = compute_aim(&turret.polar(), &target.polar(), &zero);
        info!(
            "Team {} aiming at {} {}: azimuth {:.3}°, elevation {:.3}°, range {:.1}",
            request.team,
            request.target_kind,
            request.target_id,
            aim.azimuth_delta_deg,
            aim.elevation_delta_deg,
            aim.range
        );

        let (azimuth, elevation) = tokio::join!(
            self.hardware
                .azimuth()
                .move_axis(aim.azimuth_delta_deg, MoveMode::Bearing),
            self.hardware
                .elevation()
                .move_axis(aim.elevation_delta_deg, MoveMode::Absolute),
        );

        Ok(MoveReport {
            azimuth: azimuth?,
            elevation: elevation?,
            aim: Some(aim),
            target: Some(target),
        })
    }

    /// Fetch the feed and return the position of `team`
    pub async fn locate_turret(&self, url: &str, team: &str) -> Result<TurretPosition, MotionError> {
        Ok(self.feed.fetch(url).await?.turret(team)?)
    }

    /// Fetch the feed and list target candidates, minus the caller's own turret when given
    pub async fn list_targets(&self, url: &str, own_team: Option<&str>) -> Result<Vec<TargetEntity>, MotionError> {
        let snapshot = self.feed.fetch(url).await?;
        Ok(match own_team {
            Some(team) => snapshot.targets_excluding(team),
            None => snapshot.targets(),
        })
    }

    /// Capture both axes' commanded angles as the new zero
    pub async fn set_zero(&self) -> Result<ZeroCalibration, MotionError> {
        let (phi0, z0) = tokio::join!(
            self.hardware.azimuth().position(),
            self.hardware.elevation().position(),
        );
        let (phi0, z0) = (phi0?, z0?);

        let store = Arc::clone(&self.calibration);
        let zero = tokio::task::spawn_blocking(move || store.save(phi0, z0))
            .await
            .map_err(|e| CalibrationError::Io(std::io::Error::other(e)))??;
        Ok(zero)
    }

    /// Return both axes to the stored zero
    pub async fn go_zero(&self) -> Result<(ZeroCalibration, MoveReport), MotionError> {
        let zero = self.load_zero().await;
        debug!("Returning to zero phi0={:.3} z0={:.3}", zero.phi0, zero.z0);

        let (azimuth, elevation) = tokio::join!(
            self.hardware.azimuth().move_axis(zero.phi0, MoveMode::Absolute),
            self.hardware.elevation().move_axis(zero.z0, MoveMode::Absolute),
        );

        let report = MoveReport {
            azimuth: azimuth?,
            elevation: elevation?,
            aim: None,
            target: None,
        };
        Ok((zero, report))
    }

    /// Hardware re-zero of both axes, clearing any fault
    pub async fn rezero(&self) -> Result<StatusReport, MotionError> {
        let (azimuth, elevation) = tokio::join!(
            self.hardware.azimuth().rezero(),
            self.hardware.elevation().rezero(),
        );
        for result in [&azimuth, &elevation] {
            if let Err(e) = result {
                warn!("Re-zero incomplete: {}", e);
            }
        }
        azimuth?;
        elevation?;
        Ok(self.status().await)
    }

    pub async fn status(&self) -> StatusReport {
        let zero = self.load_zero().await;
        StatusReport {
            azimuth: self.hardware.azimuth().snapshot(),
            elevation: self.hardware.elevation().snapshot(),
            zero,
        }
    }

    /// Stored zero, read on the blocking pool like `save`
    async fn load_zero(&self) -> ZeroCalibration {
        let store = Arc::clone(&self.calibration);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .unwrap_or_else(|e| {
                warn!("Zero calibration load task failed: {}, using defaults", e);
                ZeroCalibration::default()
            })
    }
}

/// Relative move, skipped without queueing when below the axis epsilon
async fn relative_move(axis: &AxisController, delta: f64) -> Result<MoveOutcome, AxisError> {
    if delta.abs() < axis.epsilon_deg() {
        return Ok(MoveOutcome::skipped(axis.axis(), axis.snapshot().angle_deg));
    }
    axis.move_axis(delta, MoveMode::Relative).await
}
