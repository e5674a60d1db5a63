//! Actuator Drivers
//!
//! An `AxisDriver` moves one physical axis. Calls block until the mechanism
//! acknowledges, so drivers are only ever called from an axis worker thread.
//!
//! The physical shift-register stepper driver lives outside this crate; the
//! `SimulatedStepper` here stands in for it on development machines.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverFault {
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("actuator fault: {0}")]
    Actuator(String),
    /// Rejected before any motion; the axis is unchanged
    #[error("out of range: {0}")]
    OutOfRange(String),
}

/// One actuated axis
pub trait AxisDriver: Send {
    /// Driver identifier for logs
    fn name(&self) -> &str;

    /// Declare the current physical pose to be angle 0
    fn zero(&mut self) -> Result<(), DriverFault>;

    /// Current commanded angle in degrees
    fn current_angle(&self) -> f64;

    /// Move to an absolute angle, blocking until the move completes
    fn go_to_angle(&mut self, angle_deg: f64) -> Result<(), DriverFault>;

    /// Free the hardware (pins, shift register). Called once, on shutdown.
    fn release(&mut self) {}
}

/// Simulated stepper configuration
#[derive(Debug, Clone)]
pub struct StepperConfig {
    /// Full revolution in steps (28BYJ-48 half-stepping: 4096)
    pub steps_per_rev: u32,
    /// Time spent per step
    pub step_delay: Duration,
    /// Longest single move, in steps
    pub max_steps_per_move: u32,
    /// Inject a fault on the Nth move (1-based)
    pub fault_on_move: Option<u32>,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            steps_per_rev: 4096,
            step_delay: Duration::from_micros(1200),
            max_steps_per_move: 8 * 4096,
            fault_on_move: None,
        }
    }
}

/// Open-loop stepper emulation. Angles are quantized to whole steps.
pub struct SimulatedStepper {
    name: String,
    config: StepperConfig,
    position_steps: i64,
    moves: u32,
    released: bool,
}

impl SimulatedStepper {
    pub fn new(name: impl Into<String>, config: StepperConfig) -> Self {
        Self {
            name: name.into(),
            config,
            position_steps: 0,
            moves: 0,
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn steps_for(&self, angle_deg: f64) -> Result<i64, DriverFault> {
        let steps = (angle_deg * self.config.steps_per_rev as f64 / 360.0).round();
        // i64::MAX is not representable as f64; stay strictly inside the range
        if !steps.is_finite() || steps.abs() >= i64::MAX as f64 {
            return Err(DriverFault::OutOfRange(format!(
                "{}: {}° is beyond the step counter",
                self.name, angle_deg
            )));
        }
        Ok(steps as i64)
    }
}

impl AxisDriver for SimulatedStepper {
    fn name(&self) -> &str {
        &self.name
    }

    fn zero(&mut self) -> Result<(), DriverFault> {
        if self.config.steps_per_rev == 0 {
            return Err(DriverFault::Init(format!("{}: steps_per_rev must be positive", self.name)));
        }
        self.position_steps = 0;
        debug!("{} zeroed", self.name);
        Ok(())
    }

    fn current_angle(&self) -> f64 {
        self.position_steps as f64 * 360.0 / self.config.steps_per_rev as f64
    }

    fn go_to_angle(&mut self, angle_deg: f64) -> Result<(), DriverFault> {
        let target = self.steps_for(angle_deg)?;
        let travel = target.checked_sub(self.position_steps).ok_or_else(|| {
            DriverFault::OutOfRange(format!("{}: move to {}° overflows the step counter", self.name, angle_deg))
        })?;
        let steps = u32::try_from(travel.unsigned_abs())
            .ok()
            .filter(|&s| s <= self.config.max_steps_per_move)
            .ok_or_else(|| {
                DriverFault::OutOfRange(format!(
                    "{}: {} steps exceeds the {} step limit per move",
                    self.name,
                    travel.unsigned_abs(),
                    self.config.max_steps_per_move
                ))
            })?;

        self.moves += 1;

        if self.config.fault_on_move == Some(self.moves) {
            // Stall halfway through the move
            self.position_steps += travel / 2;
            warn!("{} stalled after {} of {} steps", self.name, steps / 2, steps);
            return Err(DriverFault::Actuator(format!("{} stalled", self.name)));
        }

        if !self.config.step_delay.is_zero() {
            std::thread::sleep(self.config.step_delay.saturating_mul(steps));
        }
        self.position_steps = target;
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        debug!("{} released", self.name);
    }
}
