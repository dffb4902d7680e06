// ==============================================================================
// netsync.rs — MOVEMENT STATE QUEUE + POSE RECONCILIATION
// ------------------------------------------------------------------------------
// Non-owning peers receive timestamped movement snapshots and replay them a
// fixed interval behind the sender's clock. States queue up ordered by sender
// timestamp; sampling lerps the chassis from a captured start pose to the
// head state, snapping exact at the end of each segment. Large gaps teleport
// instead of dragging the vehicle across the map.
// ==============================================================================

use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::{Real, Vector};

/// Flood limit: incoming states beyond this are dropped, not queued.
pub const MAX_QUEUED_STATES: usize = 10;
/// Replay delay added to every incoming timestamp, seconds.
pub const NET_TIME_BEHIND: Real = 0.15;
/// How early before a state's replay time the lerp may begin, seconds.
pub const NET_LERP_START: Real = 0.35;
/// Start states this close to the target (per axis, cm) are skipped so
/// physics can settle instead of micro-lerping.
pub const NET_POSITION_TOLERANCE: Real = 0.1;
/// Exponential smoothing factor used when applying blended poses.
pub const NET_SMOOTHING: Real = 10.0;
/// Moves beyond this distance (cm) teleport instead of lerping.
pub const TELEPORT_DISTANCE: Real = 3000.0;
/// Owner movement send interval, seconds.
pub const NET_SEND_RATE: Real = 0.05;

/// This peer's relationship to a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Simulates and broadcasts; never consumes the queue.
    Owner,
    Server,
    Client,
    /// Client that spawned the vehicle but does not own it.
    ClientSpawned,
}

/// One movement snapshot on the wire.
#[derive(Clone, Copy, Debug)]
pub struct NetState {
    /// Sender clock, seconds. Shifted by NET_TIME_BEHIND once queued.
    pub net_timestamp: Real,
    /// Receiver clock at which this state should be fully applied.
    /// Assigned locally, never sent.
    pub local_timestamp: Real,
    pub position: Vector<Real>,         // cm
    pub rotation: UnitQuaternion<Real>,
    pub velocity: Vector<Real>,         // cm/s
    pub angular_velocity: Vector<Real>, // rad/s
}

impl Default for NetState {
    fn default() -> Self {
        Self {
            net_timestamp: 0.0,
            local_timestamp: 0.0,
            position: Vector::zeros(),
            rotation: UnitQuaternion::identity(),
            velocity: Vector::zeros(),
            angular_velocity: Vector::zeros(),
        }
    }
}

/// What the physics side should do with the chassis this tick.
#[derive(Clone, Copy, Debug)]
pub enum PoseCommand {
    None,
    /// Approach the pose with smoothing and distance gating.
    Blend {
        position: Vector<Real>,
        rotation: UnitQuaternion<Real>,
        /// Physics-mode wheels must be woken before the chassis moves.
        wake_wheels: bool,
    },
    /// Snap pose and velocities to the state.
    Exact(NetState),
    /// Snap pose, zero velocities, reset wheel positions.
    Teleport(NetState),
}

pub struct NetworkStateQueue {
    queue: Vec<NetState>,
    /// Timestamp of the newest state we started consuming; later arrivals
    /// older than this are discarded.
    last_active_timestamp: Real,
    lerp_start: NetState,
    need_start_state: bool,
}

impl Default for NetworkStateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStateQueue {
    pub fn new() -> Self {
        Self {
            queue: Vec::with_capacity(MAX_QUEUED_STATES),
            last_active_timestamp: 0.0,
            lerp_start: NetState::default(),
            need_start_state: true,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.need_start_state = true;
    }

    /// Queue an incoming movement state. Owners never queue; flooded or
    /// stale states are dropped without side effects.
    pub fn push(&mut self, mut state: NetState, role: Role, local_now: Real) {
        if role == Role::Owner {
            return;
        }
        if self.queue.len() >= MAX_QUEUED_STATES {
            return;
        }

        // Shift into the future so there is room to lerp.
        state.net_timestamp += NET_TIME_BEHIND;
        if state.net_timestamp < self.last_active_timestamp {
            return; // late, already replayed past this point
        }

        if self.queue.is_empty() {
            state.local_timestamp = local_now + NET_TIME_BEHIND;
            self.queue.push(state);
            return;
        }

        // Insert ordered by sender timestamp, scanning from the tail since
        // in-order arrival is the common case.
        for i in (0..self.queue.len()).rev() {
            if self.queue[i].net_timestamp < state.net_timestamp {
                self.queue.insert(i + 1, state);
                self.recalculate_local_timestamps();
                return;
            }
        }
        // Older than everything queued: drop it.
    }

    /// Re-chain local replay times from sender-clock deltas. The head is
    /// the reference and never moves; it may be actively syncing.
    fn recalculate_local_timestamps(&mut self) {
        for i in 1..self.queue.len() {
            let delta = self.queue[i].net_timestamp - self.queue[i - 1].net_timestamp;
            self.queue[i].local_timestamp = self.queue[i - 1].local_timestamp + delta;
        }
    }

    /// Advance replay by one tick. `now` is the receiver clock; the current
    /// chassis pose seeds lerp start states and the teleport check.
    pub fn sample(
        &mut self,
        now: Real,
        current_position: Vector<Real>,
        current_rotation: UnitQuaternion<Real>,
        rest: Option<&NetState>,
    ) -> PoseCommand {
        if let Some(rest_state) = rest {
            // Queue should be empty while resting.
            if !self.queue.is_empty() {
                self.clear();
            }
            if (rest_state.position - current_position).norm() > TELEPORT_DISTANCE {
                return PoseCommand::Teleport(*rest_state);
            }
            return PoseCommand::Blend {
                position: rest_state.position,
                rotation: rest_state.rotation,
                wake_wheels: true,
            };
        }

        let Some(&head) = self.queue.first() else {
            return PoseCommand::None;
        };

        // Let physics run until we are close enough to the replay time.
        if now < head.local_timestamp - NET_LERP_START {
            return PoseCommand::None;
        }

        if self.need_start_state {
            self.lerp_start = NetState {
                net_timestamp: now,
                local_timestamp: now,
                position: current_position,
                rotation: current_rotation,
                velocity: Vector::zeros(),
                angular_velocity: Vector::zeros(),
            };
            self.need_start_state = false;

            // A start state nearly equal to its target is skipped outright,
            // which lets slow-moving physics settle instead of jittering.
            let delta = head.position - self.lerp_start.position;
            if delta.x.abs() <= NET_POSITION_TOLERANCE
                && delta.y.abs() <= NET_POSITION_TOLERANCE
                && delta.z.abs() <= NET_POSITION_TOLERANCE
            {
                self.queue.remove(0);
                self.need_start_state = true;
                return PoseCommand::None;
            }
        }

        self.last_active_timestamp = head.net_timestamp;

        // A gap this large is a respawn or a long relevancy drop; one
        // sample lands on the target instead of streaking across the map.
        if (head.position - current_position).norm() > TELEPORT_DISTANCE {
            self.queue.remove(0);
            self.need_start_state = true;
            return PoseCommand::Teleport(head);
        }

        let begin = self.lerp_start.local_timestamp;
        if begin >= head.local_timestamp {
            // Start state was captured past the replay window.
            self.queue.remove(0);
            self.need_start_state = true;
            return PoseCommand::Exact(head);
        }

        let percent = ((now - begin) / (head.local_timestamp - begin)).clamp(0.0, 1.0);
        if percent >= 0.99 {
            self.queue.remove(0);
            self.need_start_state = true;
            return PoseCommand::Exact(head);
        }

        let position = self.lerp_start.position
            + (head.position - self.lerp_start.position) * percent;
        let rotation = slerp_shortest(self.lerp_start.rotation, head.rotation, percent);
        PoseCommand::Blend {
            position,
            rotation,
            wake_wheels: false,
        }
    }
}

/// Shortest-path slerp; antipodal pairs fall back to the nearer endpoint.
pub fn slerp_shortest(
    from: UnitQuaternion<Real>,
    to: UnitQuaternion<Real>,
    t: Real,
) -> UnitQuaternion<Real> {
    let mut to = to;
    if from.coords.dot(&to.coords) < 0.0 {
        to = UnitQuaternion::new_unchecked(-to.into_inner());
    }
    from.try_slerp(&to, t, 1.0e-6)
        .unwrap_or(if t < 0.5 { from } else { to })
}
