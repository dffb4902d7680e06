pub mod inputs;
pub mod net;
pub mod netsync;
pub mod physics;
pub mod ports;
pub mod rest;
pub mod state;
pub mod vehicle;
pub mod wheel_sim;

pub use ports::{RayHit, RayQueryPort, RigidBodyPort};
pub use vehicle::Vehicle;
