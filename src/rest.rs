// ==============================================================================
// rest.rs — REST DETECTION + REST STATE REPLICATION GATING
// ------------------------------------------------------------------------------
// A vehicle that sits still should stop costing bandwidth. The tracker flips
// to at-rest after the chassis stays under the velocity threshold for three
// continuous seconds; the send planner then decides when the owner must
// (re)send its rest pose or clear it on the other peers.
// ==============================================================================

use rapier3d::prelude::{Real, Vector};

use crate::netsync::NetState;

/// Velocity (cm/s) under which the vehicle counts as not moving.
pub const REST_VELOCITY_THRESHOLD: Real = 25.0;
/// Continuous seconds under the threshold before at-rest flips on.
pub const REST_TIME: Real = 3.0;
/// Rest pose re-send distance while the body is still awake, cm.
pub const REST_DISTANCE_AWAKE: Real = 50.0;
/// Rest pose re-send distance once the body sleeps, cm.
pub const REST_DISTANCE_ASLEEP: Real = 0.5;

#[derive(Clone, Copy, Debug, Default)]
pub struct RestStateTracker {
    timer: Real,
    at_rest: bool,
}

impl RestStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_rest(&self) -> bool {
        self.at_rest
    }

    /// Feed one tick of chassis speed. Returns `Some(new_state)` only on a
    /// transition edge, so listeners fire once per change.
    pub fn update(&mut self, speed: Real, dt: Real) -> Option<bool> {
        let was_at_rest = self.at_rest;
        if speed <= REST_VELOCITY_THRESHOLD {
            if !self.at_rest {
                self.timer += dt;
                if self.timer >= REST_TIME {
                    self.at_rest = true;
                }
            } else {
                self.timer = 0.0;
            }
        } else {
            self.timer = 0.0;
            self.at_rest = false;
        }
        (self.at_rest != was_at_rest).then_some(self.at_rest)
    }
}

/// Owner-side decision for the rest channel on one send tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestSend {
    Nothing,
    /// Send the current pose as the shared rest state.
    Update,
    /// Send a blank rest state so peers resume normal syncing.
    Clear,
}

/// Movement states flow only while not at rest; the rest state is sent once
/// and refreshed only when the pose drifts past a distance threshold. The
/// threshold is generous while physics is still awake to avoid re-sending
/// every settle wobble.
pub fn plan_rest_send(
    local_at_rest: bool,
    network_at_rest: bool,
    body_awake: bool,
    last_rest_position: Vector<Real>,
    current_position: Vector<Real>,
) -> RestSend {
    if !local_at_rest {
        if network_at_rest {
            return RestSend::Clear;
        }
        return RestSend::Nothing;
    }

    let threshold = if body_awake {
        REST_DISTANCE_AWAKE
    } else {
        REST_DISTANCE_ASLEEP
    };
    let moved = (current_position - last_rest_position).norm();
    if !network_at_rest || moved > threshold {
        RestSend::Update
    } else {
        RestSend::Nothing
    }
}

/// Receivers infer resting from the rest pose itself: a blank (all zero)
/// position means no rest state is in effect.
pub fn network_at_rest(rest_state: &NetState) -> bool {
    rest_state.position != Vector::zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::vector;

    #[test]
    fn rest_flips_on_the_step_crossing_three_seconds() {
        let mut tracker = RestStateTracker::new();
        for _ in 0..5 {
            assert_eq!(tracker.update(10.0, 0.5), None);
            assert!(!tracker.at_rest());
        }
        // 2.5s accumulated; this step reaches exactly 3.0
        assert_eq!(tracker.update(10.0, 0.5), Some(true));
        assert!(tracker.at_rest());
    }

    #[test]
    fn excursion_resets_the_timer_and_the_state() {
        let mut tracker = RestStateTracker::new();
        for _ in 0..5 {
            tracker.update(10.0, 0.5);
        }
        assert_eq!(tracker.update(26.0, 0.5), None); // was not at rest yet
        for _ in 0..5 {
            assert_eq!(tracker.update(10.0, 0.5), None); // full wait again
        }
        assert_eq!(tracker.update(10.0, 0.5), Some(true));

        // moving again fires the falling edge once
        assert_eq!(tracker.update(100.0, 0.5), Some(false));
        assert_eq!(tracker.update(100.0, 0.5), None);
    }

    #[test]
    fn edge_fires_once_while_resting_continues() {
        let mut tracker = RestStateTracker::new();
        for _ in 0..6 {
            tracker.update(0.0, 0.5);
        }
        assert!(tracker.at_rest());
        assert_eq!(tracker.update(0.0, 0.5), None);
        assert_eq!(tracker.update(0.0, 0.5), None);
    }

    #[test]
    fn send_plan_follows_the_rest_protocol() {
        let origin = Vector::zeros();

        // moving, nothing outstanding
        assert_eq!(
            plan_rest_send(false, false, true, origin, origin),
            RestSend::Nothing
        );
        // moving but peers still think we rest
        assert_eq!(
            plan_rest_send(false, true, true, origin, origin),
            RestSend::Clear
        );
        // newly at rest
        assert_eq!(
            plan_rest_send(true, false, true, origin, origin),
            RestSend::Update
        );
        // resting and already synced, small settle drift stays quiet
        assert_eq!(
            plan_rest_send(true, true, true, origin, vector![30.0, 0.0, 0.0]),
            RestSend::Nothing
        );
        // drifted past the awake threshold
        assert_eq!(
            plan_rest_send(true, true, true, origin, vector![60.0, 0.0, 0.0]),
            RestSend::Update
        );
        // asleep bodies use the tight threshold
        assert_eq!(
            plan_rest_send(true, true, false, origin, vector![1.0, 0.0, 0.0]),
            RestSend::Update
        );
    }

    #[test]
    fn blank_rest_state_means_not_resting() {
        assert!(!network_at_rest(&NetState::default()));
        let resting = NetState {
            position: vector![100.0, 20.0, 0.0],
            ..Default::default()
        };
        assert!(network_at_rest(&resting));
    }
}
