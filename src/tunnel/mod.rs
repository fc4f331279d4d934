//! Tunnel-facing data types shared by the analytical model and the learned policy
// (c) 2024 Ross Younger

mod action;
pub use action::{Action, ACTION_COUNT, ACTION_MTU_STEP};

mod measurement;
pub use measurement::{Measurement, MeasurementWindow, State, STATE_DIM};

mod objective;
pub use objective::Weights;

mod parameters;
pub use parameters::{ParameterSet, BUFFER_RANGE, MTU_RANGE};

mod transition;
pub use transition::Transition;
