//! wheel_sim - per-wheel raycast suspension + tire force model

pub mod config;
pub mod force;
pub mod types;

pub use config::{WheelConfig, WheelMode};
pub use force::step_wheel;
pub use types::{ChassisState, WheelOutput, WheelRuntimeState, sign};
