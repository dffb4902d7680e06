// ==============================================================================
// vehicle.rs — VEHICLE: WHEEL SET + STEP ORCHESTRATION
// ------------------------------------------------------------------------------
// Owns the wheels and the two crossings between the presentation side and the
// simulation side: inputs go in through an overwrite-in-place slot (only the
// newest matters), wheel outputs come back as drained batches (only the
// newest complete batch matters). The simulation step itself reads the
// chassis once and runs the per-wheel force model.
// ==============================================================================

use std::collections::VecDeque;

use rapier3d::prelude::Real;

use crate::inputs::{SteeringFalloff, SteeringState, VehicleInputs};
use crate::netsync::{NetworkStateQueue, Role};
use crate::ports::{RayQueryPort, RigidBodyPort};
use crate::rest::RestStateTracker;
use crate::wheel_sim::{
    ChassisState, WheelConfig, WheelMode, WheelOutput, WheelRuntimeState, step_wheel,
};

const CM_PER_SEC_TO_KMH: Real = 0.036;

pub struct Wheel {
    pub config: WheelConfig,
    pub attached: bool,
    pub simulate_suspension: bool,
    /// Simulation-side slip and spin state.
    state: WheelRuntimeState,
    /// Presentation-side copy of the last simulation output.
    pub data: WheelOutput,

    // Visual spin, presentation only.
    cur_ang_vel: Real,
    /// Free-spin target (rad/s) for driving wheels with no contact,
    /// typically fed from the drivetrain.
    pub target_ang_vel: Real,
    /// Accumulated roll of the wheel mesh, radians.
    pub rotation_rad: Real,
    passive: bool,
    tick_enabled: bool,
}

impl Wheel {
    pub fn new(config: WheelConfig) -> Self {
        let spring_length = config.spring_length;
        Self {
            config,
            attached: true,
            simulate_suspension: true,
            state: WheelRuntimeState::default(),
            data: WheelOutput {
                hit: None,
                angular_velocity: 0.0,
                spring_length,
            },
            cur_ang_vel: 0.0,
            target_ang_vel: 0.0,
            rotation_rad: 0.0,
            passive: false,
            tick_enabled: true,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.attached && self.simulate_suspension
    }

    pub fn has_contact(&self) -> bool {
        self.data.hit.is_some()
    }

    pub fn angular_velocity(&self) -> Real {
        self.cur_ang_vel
    }

    pub fn set_passive(&mut self, passive: bool) {
        self.passive = passive;
        if !passive {
            self.tick_enabled = true;
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.tick_enabled
    }

    /// Vertical offset (cm) of the wheel mesh below the spring seat.
    pub fn mesh_offset(&self) -> Real {
        let spring_start = self.config.spring_length * 0.5;
        (spring_start - self.data.spring_length).min(spring_start)
    }

    /// Presentation tick: grounded wheels show their simulated spin, free
    /// wheels interpolate. A passive wheel winds down and stops ticking.
    pub fn visual_tick(&mut self, dt: Real) {
        if self.config.mode != WheelMode::Raycast {
            return;
        }
        if !self.attached || !self.simulate_suspension || !self.tick_enabled {
            return;
        }

        if self.has_contact() && !self.passive {
            self.cur_ang_vel = self.data.angular_velocity;
        } else if self.config.locked {
            self.cur_ang_vel = 0.0;
        } else {
            if self.passive {
                self.target_ang_vel = 0.0;
            }
            let accelerating = self.target_ang_vel.abs() > self.cur_ang_vel.abs();
            let target = if self.config.is_driving {
                self.target_ang_vel
            } else {
                0.0
            };
            let interp_speed = if self.config.is_driving {
                if accelerating { 2.0 } else { 1.0 }
            } else {
                0.2
            };
            self.cur_ang_vel += (target - self.cur_ang_vel) * (dt * interp_speed).clamp(0.0, 1.0);
        }

        self.rotation_rad += self.cur_ang_vel * dt;

        if self.passive && self.cur_ang_vel.abs() <= 0.01 {
            self.tick_enabled = false;
        }
    }

    /// Teleports leave wheel meshes wherever they were; snap them back.
    pub fn reset_visuals(&mut self) {
        self.rotation_rad = 0.0;
        self.cur_ang_vel = 0.0;
        self.data.spring_length = self.config.spring_length;
        self.data.hit = None;
    }
}

pub struct Vehicle {
    pub wheels: Vec<Wheel>,
    pub role: Role,
    pub net_queue: NetworkStateQueue,
    pub rest: RestStateTracker,
    pub steering: SteeringState,
    pub steering_falloff: SteeringFalloff,

    /// Newest inputs from the presentation side, consumed each step.
    pending_inputs: VehicleInputs,
    /// Finished wheel batches waiting for the presentation side.
    outputs: VecDeque<Vec<WheelOutput>>,
    detached: bool,
    send_accumulator: Real,
}

impl Vehicle {
    pub fn new(wheels: Vec<Wheel>, role: Role) -> Self {
        Self {
            wheels,
            role,
            net_queue: NetworkStateQueue::new(),
            rest: RestStateTracker::new(),
            steering: SteeringState::default(),
            steering_falloff: SteeringFalloff::default(),
            pending_inputs: VehicleInputs::default(),
            outputs: VecDeque::new(),
            detached: false,
            send_accumulator: 0.0,
        }
    }

    /// Overwrite-in-place input slot. Called from the presentation side;
    /// intermediate values are never needed.
    pub fn set_inputs(&mut self, inputs: VehicleInputs) {
        self.pending_inputs = inputs;
    }

    pub fn inputs(&self) -> VehicleInputs {
        self.pending_inputs
    }

    /// Stop producing steps. An in-flight step finishes normally; there is
    /// exactly one simulation writer per vehicle.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// One simulation step. `wheel_bodies` is parallel to `wheels` and only
    /// physics-mode wheels need an entry.
    pub fn step(
        &mut self,
        dt: Real,
        rays: &dyn RayQueryPort,
        chassis_body: &mut dyn RigidBodyPort,
        wheel_bodies: &mut [Option<&mut dyn RigidBodyPort>],
    ) {
        if self.detached || dt <= 0.0 {
            return;
        }
        if !chassis_body.is_active() {
            return;
        }

        let chassis = ChassisState::from_port(chassis_body);

        // Steering shaping: smooth the raw input, then cap it by the
        // speed falloff so fast vehicles cannot crank the wheel over.
        let mut inputs = self.pending_inputs;
        let speed_kmh = chassis.linvel.norm() * CM_PER_SEC_TO_KMH;
        let max_steering = self.steering_falloff.eval(speed_kmh);
        let smoothed = self.steering.advance(inputs.steering.clamp(-1.0, 1.0), dt);
        inputs.steering = smoothed.clamp(-max_steering, max_steering);

        let mut batch = Vec::with_capacity(self.wheels.len());
        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            if !wheel.is_simulated() {
                continue;
            }
            let wheel_body = match wheel_bodies.get_mut(i) {
                Some(slot) => slot.as_deref_mut().map(|b| b as &mut dyn RigidBodyPort),
                None => None,
            };
            let output = step_wheel(
                &wheel.config,
                &mut wheel.state,
                &chassis,
                &inputs,
                dt,
                rays,
                chassis_body,
                wheel_body,
            );
            batch.push(output);
        }
        self.outputs.push_back(batch);
    }

    pub fn simulated_wheel_count(&self) -> usize {
        self.wheels.iter().filter(|w| w.is_simulated()).count()
    }

    /// Drain finished batches and copy the newest complete one into the
    /// wheels. A batch whose length no longer matches the wheel list (a
    /// wheel was attached or detached mid-flight) is ignored; we wait for
    /// the next matching one.
    pub fn apply_outputs(&mut self) -> bool {
        let expected = self.simulated_wheel_count();
        let mut latest: Option<Vec<WheelOutput>> = None;
        while let Some(batch) = self.outputs.pop_front() {
            if batch.len() == expected {
                latest = Some(batch);
            }
        }
        let Some(batch) = latest else {
            return false;
        };
        let mut outputs = batch.into_iter();
        for wheel in self.wheels.iter_mut().filter(|w| w.is_simulated()) {
            if let Some(output) = outputs.next() {
                wheel.data = output;
            }
        }
        true
    }

    /// While the chassis sleeps its velocity stops updating, so grounded
    /// wheels must stop visually spinning too.
    pub fn zero_contact_spin(&mut self) {
        for wheel in &mut self.wheels {
            if wheel.has_contact() {
                wheel.data.angular_velocity = 0.0;
                wheel.cur_ang_vel = 0.0;
            }
        }
    }

    /// Wheel positions are stale after a teleport.
    pub fn reset_wheels(&mut self) {
        for wheel in &mut self.wheels {
            wheel.reset_visuals();
        }
    }

    /// Edge-triggered rest update; flips wheel passive mode on transitions.
    pub fn update_rest(&mut self, speed: Real, dt: Real) -> Option<bool> {
        let edge = self.rest.update(speed, dt);
        if let Some(now_resting) = edge {
            for wheel in &mut self.wheels {
                wheel.set_passive(now_resting);
            }
        }
        edge
    }

    /// True once per NET_SEND_RATE of accumulated time.
    pub fn net_send_due(&mut self, dt: Real) -> bool {
        self.send_accumulator += dt;
        if self.send_accumulator >= crate::netsync::NET_SEND_RATE {
            self.send_accumulator = 0.0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{RayHit, RigidBodyPort};
    use rapier3d::prelude::{Isometry, Point, Vector, point, vector};

    struct FlatGround;

    impl RayQueryPort for FlatGround {
        fn cast(&self, start: Point<Real>, end: Point<Real>) -> Option<RayHit> {
            let dy = end.y - start.y;
            if dy == 0.0 {
                return None;
            }
            let t = (-60.0 - start.y) / dy;
            if !(0.0..=1.0).contains(&t) {
                return None;
            }
            let point = start + (end - start) * t;
            Some(RayHit {
                point,
                normal: vector![0.0, 1.0, 0.0],
                distance: (point - start).norm(),
                friction: 1.0,
            })
        }
    }

    struct StubBody {
        active: bool,
        forces: usize,
    }

    impl RigidBodyPort for StubBody {
        fn transform(&self) -> Isometry<Real> {
            Isometry::identity()
        }
        fn center_of_mass(&self) -> Point<Real> {
            point![0.0, 0.0, 0.0]
        }
        fn linear_velocity(&self) -> Vector<Real> {
            Vector::zeros()
        }
        fn angular_velocity(&self) -> Vector<Real> {
            Vector::zeros()
        }
        fn mass(&self) -> Real {
            1500.0
        }
        fn gravity(&self) -> Real {
            981.0
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn add_force_at_point(&mut self, _point: Point<Real>, _force: Vector<Real>) {
            self.forces += 1;
        }
        fn add_force(&mut self, _force: Vector<Real>) {}
        fn add_torque(&mut self, _torque: Vector<Real>) {}
        fn set_velocities(&mut self, _linear: Vector<Real>, _angular: Vector<Real>) {}
    }

    fn four_wheel_vehicle() -> Vehicle {
        let mut configs = Vec::new();
        for i in 0..4 {
            let mut config = WheelConfig::default();
            let x = if i % 2 == 0 { -80.0 } else { 80.0 };
            let z = if i < 2 { -120.0 } else { 120.0 };
            config.local_transform.translation.vector = vector![x, -30.0, z];
            configs.push(config);
        }
        Vehicle::new(configs.into_iter().map(Wheel::new).collect(), Role::Owner)
    }

    #[test]
    fn step_produces_one_output_per_simulated_wheel() {
        let mut vehicle = four_wheel_vehicle();
        let mut body = StubBody {
            active: true,
            forces: 0,
        };
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        assert_eq!(vehicle.outputs.len(), 1);
        assert_eq!(vehicle.outputs[0].len(), 4);

        vehicle.wheels[2].simulate_suspension = false;
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        assert_eq!(vehicle.outputs[1].len(), 3);
    }

    #[test]
    fn mismatched_batches_are_ignored() {
        let mut vehicle = four_wheel_vehicle();
        let mut body = StubBody {
            active: true,
            forces: 0,
        };
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);

        // a wheel detaches after the batch was produced
        vehicle.wheels[0].attached = false;
        assert!(!vehicle.apply_outputs());

        // the next step produces a matching batch again
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        assert!(vehicle.apply_outputs());
        assert!(vehicle.wheels[1].has_contact());
    }

    #[test]
    fn inactive_chassis_skips_the_step() {
        let mut vehicle = four_wheel_vehicle();
        let mut body = StubBody {
            active: false,
            forces: 0,
        };
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        assert!(vehicle.outputs.is_empty());
        assert_eq!(body.forces, 0);
    }

    #[test]
    fn detach_stops_future_steps() {
        let mut vehicle = four_wheel_vehicle();
        let mut body = StubBody {
            active: true,
            forces: 0,
        };
        vehicle.detach();
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        assert!(vehicle.outputs.is_empty());
    }

    #[test]
    fn input_slot_keeps_only_the_newest_value() {
        let mut vehicle = four_wheel_vehicle();
        vehicle.set_inputs(VehicleInputs {
            throttle: 0.3,
            ..Default::default()
        });
        vehicle.set_inputs(VehicleInputs {
            throttle: 0.9,
            ..Default::default()
        });
        assert_eq!(vehicle.inputs().throttle, 0.9);
    }

    #[test]
    fn sleeping_chassis_zeroes_grounded_wheel_spin() {
        let mut vehicle = four_wheel_vehicle();
        let mut body = StubBody {
            active: true,
            forces: 0,
        };
        vehicle.step(1.0 / 60.0, &FlatGround, &mut body, &mut []);
        vehicle.apply_outputs();
        vehicle.wheels[0].data.angular_velocity = 5.0;
        vehicle.wheels[0].cur_ang_vel = 5.0;

        vehicle.zero_contact_spin();
        assert_eq!(vehicle.wheels[0].data.angular_velocity, 0.0);
        assert_eq!(vehicle.wheels[0].angular_velocity(), 0.0);
    }

    #[test]
    fn passive_wheel_spins_down_and_stops_ticking() {
        let mut config = WheelConfig::default();
        config.is_driving = true;
        let mut wheel = Wheel::new(config);
        wheel.cur_ang_vel = 20.0;
        wheel.target_ang_vel = 20.0;
        wheel.set_passive(true);

        for _ in 0..2000 {
            wheel.visual_tick(1.0 / 60.0);
            if !wheel.is_ticking() {
                break;
            }
        }
        assert!(!wheel.is_ticking());
        assert!(wheel.angular_velocity().abs() <= 0.01);
    }

    #[test]
    fn locked_wheel_shows_no_spin_in_air() {
        let mut config = WheelConfig::default();
        config.locked = true;
        let mut wheel = Wheel::new(config);
        wheel.cur_ang_vel = 15.0;
        wheel.data.hit = None;
        wheel.visual_tick(1.0 / 60.0);
        assert_eq!(wheel.angular_velocity(), 0.0);
    }

    #[test]
    fn send_timer_fires_at_the_send_rate() {
        let mut vehicle = four_wheel_vehicle();
        let mut fired = 0;
        for _ in 0..60 {
            if vehicle.net_send_due(1.0 / 60.0) {
                fired += 1;
            }
        }
        // 0.05s cadence over one second of 60 Hz ticks
        assert!((19..=21).contains(&fired));
    }
}
