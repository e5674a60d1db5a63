//! Axis Controller
//!
//! Each axis owns a dedicated worker thread holding the driver and the axis
//! state. Requests reach the worker through a queue and are answered on a
//! one-shot channel, so every operation on one axis is serialized while the
//! async callers stay free until their reply arrives.
//!
//! ```text
//! Idle --(command)--> Moving --(ack)--> Idle
//!                        \--(fault)--> Faulted --(rezero)--> Idle
//! ```

use crate::driver::{AxisDriver, DriverFault};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use targeting::normalize_deg;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    /// Traverse axis (motor 1)
    Azimuth,
    /// Vertical axis (motor 2)
    Elevation,
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Azimuth => write!(f, "azimuth"),
            Self::Elevation => write!(f, "elevation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveMode {
    /// Offset from the current angle
    Relative,
    /// Exact angle
    Absolute,
    /// Angle on a circular axis, reached by the shorter rotation
    Bearing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCommand {
    pub axis: AxisId,
    pub value: f64,
    pub mode: MoveMode,
}

impl MoveCommand {
    /// Absolute angle this command resolves to from `current`
    pub fn target_from(&self, current: f64) -> f64 {
        match self.mode {
            MoveMode::Relative => current + self.value,
            MoveMode::Absolute => self.value,
            MoveMode::Bearing => current + normalize_deg(self.value - current),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisPhase {
    Idle,
    Moving,
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisState {
    pub angle_deg: f64,
    pub phase: AxisPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl AxisState {
    fn idle(angle_deg: f64) -> Self {
        Self {
            angle_deg,
            phase: AxisPhase::Idle,
            fault: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveOutcome {
    pub axis: AxisId,
    pub previous_angle: f64,
    pub new_angle: f64,
    /// Below epsilon: the driver was not called
    pub skipped: bool,
}

impl MoveOutcome {
    pub fn skipped(axis: AxisId, angle: f64) -> Self {
        Self {
            axis,
            previous_angle: angle,
            new_angle: angle,
            skipped: true,
        }
    }

    /// Rotation actually performed
    pub fn delta(&self) -> f64 {
        self.new_angle - self.previous_angle
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AxisError {
    #[error("{axis} axis is faulted: {reason}")]
    Faulted { axis: AxisId, reason: String },
    #[error("{axis} {fault}")]
    Actuator { axis: AxisId, fault: DriverFault },
    #[error("{axis} axis rejected command: {reason}")]
    InvalidCommand { axis: AxisId, reason: String },
    #[error("{0} axis worker is offline")]
    Offline(AxisId),
}

enum AxisRequest {
    Move {
        command: MoveCommand,
        reply: oneshot::Sender<Result<MoveOutcome, AxisError>>,
    },
    Position {
        reply: oneshot::Sender<f64>,
    },
    Rezero {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
}

/// Handle to one axis. Dropping it drains the queue and releases the driver.
pub struct AxisController {
    axis: AxisId,
    epsilon_deg: f64,
    requests: Option<mpsc::UnboundedSender<AxisRequest>>,
    state: watch::Receiver<AxisState>,
    worker: Option<thread::JoinHandle<()>>,
}

impl AxisController {
    /// Start the worker thread for an already-zeroed driver
    pub fn spawn(
        axis: AxisId,
        driver: Box<dyn AxisDriver>,
        epsilon_deg: f64,
    ) -> std::io::Result<Self> {
        let (requests, queue) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(AxisState::idle(driver.current_angle()));

        let worker = AxisWorker {
            axis,
            epsilon_deg,
            driver,
            state: state_tx,
        };
        let handle = thread::Builder::new()
            .name(format!("axis-{}", axis))
            .spawn(move || worker.run(queue))?;

        info!("{} axis worker started", axis);
        Ok(Self {
            axis,
            epsilon_deg,
            requests: Some(requests),
            state,
            worker: Some(handle),
        })
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    pub fn epsilon_deg(&self) -> f64 {
        self.epsilon_deg
    }

    /// Latest published state, without queueing
    pub fn snapshot(&self) -> AxisState {
        self.state.borrow().clone()
    }

    /// Move the axis and wait for the driver's acknowledgement
    pub async fn move_axis(&self, value: f64, mode: MoveMode) -> Result<MoveOutcome, AxisError> {
        let command = MoveCommand {
            axis: self.axis,
            value,
            mode,
        };
        let (reply, response) = oneshot::channel();
        self.submit(AxisRequest::Move { command, reply })?;
        response.await.map_err(|_| AxisError::Offline(self.axis))?
    }

    /// Commanded angle once every earlier request has completed
    pub async fn position(&self) -> Result<f64, AxisError> {
        let (reply, response) = oneshot::channel();
        self.submit(AxisRequest::Position { reply })?;
        response.await.map_err(|_| AxisError::Offline(self.axis))
    }

    /// Hardware re-zero: clears a fault and resets the angle to 0
    pub async fn rezero(&self) -> Result<(), AxisError> {
        let (reply, response) = oneshot::channel();
        self.submit(AxisRequest::Rezero { reply })?;
        response.await.map_err(|_| AxisError::Offline(self.axis))?
    }

    fn submit(&self, request: AxisRequest) -> Result<(), AxisError> {
        self.requests
            .as_ref()
            .ok_or(AxisError::Offline(self.axis))?
            .send(request)
            .map_err(|_| AxisError::Offline(self.axis))
    }

    /// Stop accepting requests, finish queued ones and release the driver
    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("{} axis worker panicked", self.axis);
            }
        }
    }
}

impl Drop for AxisController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AxisWorker {
    axis: AxisId,
    epsilon_deg: f64,
    driver: Box<dyn AxisDriver>,
    state: watch::Sender<AxisState>,
}

impl AxisWorker {
    fn run(mut self, mut queue: mpsc::UnboundedReceiver<AxisRequest>) {
        while let Some(request) = queue.blocking_recv() {
            match request {
                AxisRequest::Move { command, reply } => {
                    let result = self.execute(command);
                    let _ = reply.send(result);
                }
                AxisRequest::Position { reply } => {
                    let _ = reply.send(self.state.borrow().angle_deg);
                }
                AxisRequest::Rezero { reply } => {
                    let _ = reply.send(self.rezero());
                }
            }
        }
    }

    fn execute(&mut self, command: MoveCommand) -> Result<MoveOutcome, AxisError> {
        let current = {
            let state = self.state.borrow();
            if state.phase == AxisPhase::Faulted {
                return Err(AxisError::Faulted {
                    axis: self.axis,
                    reason: state.fault.clone().unwrap_or_default(),
                });
            }
            state.angle_deg
        };

        let axis = command.axis;
        let target = command.target_from(current);
        if !target.is_finite() {
            return Err(AxisError::InvalidCommand {
                axis,
                reason: format!("non-finite target {}", target),
            });
        }

        if (target - current).abs() < self.epsilon_deg {
            debug!("{} {:?} move to {:.4}° below epsilon, skipped", axis, command.mode, target);
            return Ok(MoveOutcome::skipped(axis, current));
        }

        self.state.send_modify(|s| s.phase = AxisPhase::Moving);
        debug!("{} {:?} move {:.3}° -> {:.3}°", axis, command.mode, current, target);

        let driver = &mut self.driver;
        let result = panic::catch_unwind(AssertUnwindSafe(|| driver.go_to_angle(target)))
            .unwrap_or_else(|_| Err(DriverFault::Actuator(format!("{} driver panicked", axis))));

        match result {
            Ok(()) => {
                let new_angle = self.driver.current_angle();
                self.state.send_replace(AxisState::idle(new_angle));
                info!("{} at {:.3}°", axis, new_angle);
                Ok(MoveOutcome {
                    axis,
                    previous_angle: current,
                    new_angle,
                    skipped: false,
                })
            }
            Err(DriverFault::OutOfRange(reason)) => {
                self.state.send_replace(AxisState::idle(self.driver.current_angle()));
                warn!("{} rejected move to {}°: {}", axis, target, reason);
                Err(AxisError::InvalidCommand { axis, reason })
            }
            Err(fault) => {
                let angle_deg = self.driver.current_angle();
                self.state.send_replace(AxisState {
                    angle_deg,
                    phase: AxisPhase::Faulted,
                    fault: Some(fault.to_string()),
                });
                error!("{} faulted at {:.3}°: {}", axis, angle_deg, fault);
                Err(AxisError::Actuator { axis, fault })
            }
        }
    }

    fn rezero(&mut self) -> Result<(), AxisError> {
        self.driver.zero().map_err(|fault| {
            warn!("{} re-zero failed: {}", self.axis, fault);
            AxisError::Actuator {
                axis: self.axis,
                fault,
            }
        })?;
        self.state.send_replace(AxisState::idle(self.driver.current_angle()));
        info!("{} re-zeroed", self.axis);
        Ok(())
    }
}

// Runs when the queue closes and also when the worker unwinds
impl Drop for AxisWorker {
    fn drop(&mut self) {
        self.driver.release();
        info!("{} axis released ({})", self.axis, self.driver.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, Recorder};
    use crate::driver::{SimulatedStepper, StepperConfig};
    use std::time::Duration;
    use targeting::DEFAULT_EPSILON_DEG;

    fn controller(axis: AxisId, driver: MockDriver) -> AxisController {
        AxisController::spawn(axis, Box::new(driver), DEFAULT_EPSILON_DEG).unwrap()
    }

    #[tokio::test]
    async fn test_relative_and_absolute_moves() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder));

        let outcome = axis.move_axis(30.0, MoveMode::Relative).await.unwrap();
        assert_eq!(outcome.new_angle, 30.0);
        let outcome = axis.move_axis(15.0, MoveMode::Relative).await.unwrap();
        assert_eq!(outcome.previous_angle, 30.0);
        assert_eq!(outcome.new_angle, 45.0);

        let outcome = axis.move_axis(-10.0, MoveMode::Absolute).await.unwrap();
        assert_eq!(outcome.new_angle, -10.0);
        assert_eq!(outcome.delta(), -55.0);
        assert_eq!(axis.snapshot().phase, AxisPhase::Idle);
        assert_eq!(recorder.moves(), 3);
    }

    #[tokio::test]
    async fn test_bearing_takes_short_way() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder));

        axis.move_axis(170.0, MoveMode::Absolute).await.unwrap();
        let outcome = axis.move_axis(-170.0, MoveMode::Bearing).await.unwrap();
        assert!((outcome.delta() - 20.0).abs() < 1e-9);
        assert!((outcome.new_angle - 190.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_below_epsilon_is_noop() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Elevation, MockDriver::new("m2", &recorder));

        let outcome = axis.move_axis(0.001, MoveMode::Relative).await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.new_angle, 0.0);
        assert_eq!(axis.snapshot().angle_deg, 0.0);
        assert_eq!(recorder.moves(), 0);

        // Absolute targets within epsilon of the current angle are skipped too
        axis.move_axis(12.0, MoveMode::Absolute).await.unwrap();
        let outcome = axis.move_axis(12.005, MoveMode::Absolute).await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(recorder.moves(), 1);
    }

    #[tokio::test]
    async fn test_same_axis_moves_are_serialized() {
        let recorder = Recorder::default();
        let axis = controller(
            AxisId::Azimuth,
            MockDriver::new("m1", &recorder).with_delay(Duration::from_millis(100)),
        );

        let (a, b) = tokio::join!(
            axis.move_axis(10.0, MoveMode::Relative),
            axis.move_axis(20.0, MoveMode::Relative),
        );
        a.unwrap();
        b.unwrap();

        let spans = recorder.spans();
        assert_eq!(spans.len(), 2);
        assert!(spans[1].start >= spans[0].end);
        assert_eq!(axis.snapshot().angle_deg, 30.0);
    }

    #[tokio::test]
    async fn test_different_axes_overlap() {
        let recorder = Recorder::default();
        let delay = Duration::from_millis(200);
        let azimuth = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder).with_delay(delay));
        let elevation = controller(AxisId::Elevation, MockDriver::new("m2", &recorder).with_delay(delay));

        let (a, b) = tokio::join!(
            azimuth.move_axis(10.0, MoveMode::Relative),
            elevation.move_axis(5.0, MoveMode::Relative),
        );
        a.unwrap();
        b.unwrap();

        let spans = recorder.spans();
        assert_eq!(spans.len(), 2);
        assert!(spans[0].start < spans[1].end && spans[1].start < spans[0].end);
    }

    #[tokio::test]
    async fn test_fault_is_sticky_until_rezero() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder).failing_on_move(2));

        axis.move_axis(10.0, MoveMode::Relative).await.unwrap();
        let err = axis.move_axis(10.0, MoveMode::Relative).await.unwrap_err();
        assert!(matches!(err, AxisError::Actuator { .. }));
        assert_eq!(axis.snapshot().phase, AxisPhase::Faulted);

        let err = axis.move_axis(5.0, MoveMode::Relative).await.unwrap_err();
        assert!(matches!(err, AxisError::Faulted { .. }));
        assert_eq!(recorder.moves(), 2);

        axis.rezero().await.unwrap();
        let state = axis.snapshot();
        assert_eq!(state.phase, AxisPhase::Idle);
        assert_eq!(state.angle_deg, 0.0);
        assert!(state.fault.is_none());

        axis.move_axis(5.0, MoveMode::Relative).await.unwrap();
        assert_eq!(recorder.moves(), 3);
    }

    #[tokio::test]
    async fn test_position_waits_for_pending_move() {
        let recorder = Recorder::default();
        let axis = controller(
            AxisId::Elevation,
            MockDriver::new("m2", &recorder).with_delay(Duration::from_millis(50)),
        );

        let (moved, position) = tokio::join!(
            axis.move_axis(7.5, MoveMode::Relative),
            axis.position(),
        );
        moved.unwrap();
        assert_eq!(position.unwrap(), 7.5);
    }

    #[tokio::test]
    async fn test_drop_releases_driver() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder));
        axis.move_axis(1.0, MoveMode::Relative).await.unwrap();

        drop(axis);
        assert_eq!(recorder.released(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_move_leaves_axis_usable() {
        let stepper = SimulatedStepper::new(
            "motor2",
            StepperConfig {
                step_delay: Duration::ZERO,
                ..StepperConfig::default()
            },
        );
        let axis = AxisController::spawn(AxisId::Elevation, Box::new(stepper), DEFAULT_EPSILON_DEG).unwrap();

        axis.move_axis(-10.0, MoveMode::Relative).await.unwrap();
        let before = axis.snapshot().angle_deg;

        let err = axis.move_axis(1e300, MoveMode::Relative).await.unwrap_err();
        assert!(matches!(err, AxisError::InvalidCommand { axis: AxisId::Elevation, .. }));
        let state = axis.snapshot();
        assert_eq!(state.phase, AxisPhase::Idle);
        assert_eq!(state.angle_deg, before);

        let outcome = axis.move_axis(5.0, MoveMode::Relative).await.unwrap();
        assert_eq!(outcome.axis, AxisId::Elevation);
        assert!((outcome.new_angle - (before + 5.0)).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_driver_panic_faults_axis_and_still_releases() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder).panicking_on_move(1));

        let err = axis.move_axis(10.0, MoveMode::Relative).await.unwrap_err();
        assert!(matches!(err, AxisError::Actuator { axis: AxisId::Azimuth, .. }));
        assert_eq!(axis.snapshot().phase, AxisPhase::Faulted);

        // The worker survived: re-zero and move again
        axis.rezero().await.unwrap();
        axis.move_axis(3.0, MoveMode::Relative).await.unwrap();

        drop(axis);
        assert_eq!(recorder.released(), 1);
    }

    #[tokio::test]
    async fn test_non_finite_command_rejected() {
        let recorder = Recorder::default();
        let axis = controller(AxisId::Azimuth, MockDriver::new("m1", &recorder));

        let err = axis.move_axis(f64::NAN, MoveMode::Relative).await.unwrap_err();
        assert!(matches!(err, AxisError::InvalidCommand { .. }));
        assert_eq!(recorder.moves(), 0);
    }
}
