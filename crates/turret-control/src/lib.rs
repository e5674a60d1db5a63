//! Turret Control
//!
//! Two actuated axes (traverse and elevation), each driven by its own worker,
//! plus the zero calibration store and the coordinator that turns manual or
//! tracking requests into axis moves.

pub mod axis;
pub mod calibration;
pub mod coordinator;
pub mod driver;
pub mod hardware;

pub use axis::{AxisController, AxisError, AxisId, AxisPhase, AxisState, MoveMode, MoveOutcome};
pub use calibration::{CalibrationError, ZeroCalibrationStore};
pub use coordinator::{MotionCoordinator, MotionError, MoveReport, MoveRequest, StatusReport, TrackRequest};
pub use driver::{AxisDriver, DriverFault, SimulatedStepper, StepperConfig};
pub use hardware::{HardwareContext, HardwareError};
