//! Hardware context
//!
//! Built once at startup: zeroes both drivers and starts one worker per
//! axis. Dropping the context releases every driver, whichever way the
//! process is exiting.

use crate::axis::{AxisController, AxisId};
use crate::driver::{AxisDriver, SimulatedStepper, StepperConfig};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("failed to initialize {axis} axis: {reason}")]
    Init { axis: AxisId, reason: String },
}

pub struct HardwareContext {
    azimuth: AxisController,
    elevation: AxisController,
}

impl HardwareContext {
    /// Zero both drivers and start their workers.
    ///
    /// On failure every driver claimed so far is released before returning.
    pub fn init(
        azimuth: Box<dyn AxisDriver>,
        elevation: Box<dyn AxisDriver>,
        epsilon_deg: f64,
    ) -> Result<Self, HardwareError> {
        let azimuth = match start_axis(AxisId::Azimuth, azimuth, epsilon_deg) {
            Ok(controller) => controller,
            Err(e) => {
                let mut elevation = elevation;
                elevation.release();
                return Err(e);
            }
        };

        // On failure `azimuth` drops here and releases its driver
        let elevation = start_axis(AxisId::Elevation, elevation, epsilon_deg)?;

        info!("Hardware ready (epsilon {}°)", epsilon_deg);
        Ok(Self { azimuth, elevation })
    }

    /// Two simulated steppers sharing one configuration
    pub fn simulated(config: &StepperConfig, epsilon_deg: f64) -> Result<Self, HardwareError> {
        Self::init(
            Box::new(SimulatedStepper::new("motor1", config.clone())),
            Box::new(SimulatedStepper::new("motor2", config.clone())),
            epsilon_deg,
        )
    }

    pub fn axis(&self, axis: AxisId) -> &AxisController {
        match axis {
            AxisId::Azimuth => &self.azimuth,
            AxisId::Elevation => &self.elevation,
        }
    }

    pub fn azimuth(&self) -> &AxisController {
        &self.azimuth
    }

    pub fn elevation(&self) -> &AxisController {
        &self.elevation
    }

    pub fn epsilon_deg(&self) -> f64 {
        self.azimuth.epsilon_deg()
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        info!("Releasing turret hardware");
        self.azimuth.shutdown();
        self.elevation.shutdown();
    }
}

fn start_axis(
    axis: AxisId,
    mut driver: Box<dyn AxisDriver>,
    epsilon_deg: f64,
) -> Result<AxisController, HardwareError> {
    if let Err(fault) = driver.zero() {
        error!("{} ({}) failed to zero: {}", axis, driver.name(), fault);
        driver.release();
        return Err(HardwareError::Init {
            axis,
            reason: fault.to_string(),
        });
    }

    AxisController::spawn(axis, driver, epsilon_deg).map_err(|e| HardwareError::Init {
        axis,
        reason: format!("worker thread: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::MoveMode;
    use crate::driver::mock::{MockDriver, Recorder};

    #[tokio::test]
    async fn test_init_zeroes_and_drop_releases() {
        let recorder = Recorder::default();
        let mut driver = MockDriver::new("m1", &recorder);
        driver.angle = 17.0;

        let hardware = HardwareContext::init(
            Box::new(driver),
            Box::new(MockDriver::new("m2", &recorder)),
            0.01,
        )
        .unwrap();
        assert_eq!(hardware.azimuth().snapshot().angle_deg, 0.0);

        hardware
            .axis(AxisId::Elevation)
            .move_axis(3.0, MoveMode::Relative)
            .await
            .unwrap();

        drop(hardware);
        assert_eq!(recorder.released(), 2);
    }

    #[test]
    fn test_failed_init_releases_claimed_axes() {
        let recorder = Recorder::default();
        let result = HardwareContext::init(
            Box::new(MockDriver::new("m1", &recorder)),
            Box::new(MockDriver::new("m2", &recorder).failing_zero()),
            0.01,
        );

        assert!(matches!(
            result,
            Err(HardwareError::Init { axis: AxisId::Elevation, .. })
        ));
        assert_eq!(recorder.released(), 2);
    }

    #[test]
    fn test_failed_first_axis_releases_second() {
        let recorder = Recorder::default();
        let result = HardwareContext::init(
            Box::new(MockDriver::new("m1", &recorder).failing_zero()),
            Box::new(MockDriver::new("m2", &recorder)),
            0.01,
        );

        assert!(matches!(
            result,
            Err(HardwareError::Init { axis: AxisId::Azimuth, .. })
        ));
        assert_eq!(recorder.released(), 2);
    }
}
