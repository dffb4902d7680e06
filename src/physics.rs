// ==============================================================================
// physics.rs — RAPIER WORLD + PORT IMPLEMENTATIONS (SERVER GLUE)
// ------------------------------------------------------------------------------
// Everything rapier-specific lives here: the world, the ground, vehicle
// spawning, the RayQueryPort/RigidBodyPort implementations, and the network
// pose application. The core wheel model never sees a rapier type.
//
// The world runs in centimeters with Y up, gravity -981 cm/s². Forces from
// the wheel model arrive in centinewtons, which is exactly kg·cm/s².
// ==============================================================================

use rapier3d::prelude::*;
use rapier3d::na::UnitQuaternion;
use std::collections::HashMap;

use rand::Rng;

use crate::inputs::VehicleInputs;
use crate::netsync::{self, NetState, PoseCommand, Role, slerp_shortest};
use crate::ports::{RayHit, RayQueryPort, RigidBodyPort};
use crate::rest::{self, REST_VELOCITY_THRESHOLD, RestSend};
use crate::vehicle::{Vehicle, Wheel};
use crate::wheel_sim::WheelConfig;

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

pub const GRAVITY: Real = 981.0; // cm/s²

// Bodies past this coordinate are considered exploded and get reset.
const WORLD_BOUND: Real = 100_000.0; // cm
const SPAWN_HEIGHT: Real = 150.0; // cm
const CHASSIS_MASS: Real = 1500.0; // kg

/// Network-bound messages produced by the owner side of a tick.
#[derive(Clone, Copy, Debug)]
pub enum Outbound {
    Movement(NetState),
    Rest(NetState),
}

// ------------------------------------------------------------------
// Port implementations
// ------------------------------------------------------------------

/// Suspension ray casts against the live collider set, excluding the
/// vehicle's own chassis.
pub struct RapierRays<'a> {
    pub query: &'a QueryPipeline,
    pub bodies: &'a RigidBodySet,
    pub colliders: &'a ColliderSet,
    pub exclude: RigidBodyHandle,
}

impl RayQueryPort for RapierRays<'_> {
    fn cast(&self, start: Point<Real>, end: Point<Real>) -> Option<RayHit> {
        let span = end - start;
        let max = span.norm();
        if max <= 0.0 {
            return None;
        }
        let ray = Ray::new(start, span / max);
        let filter = QueryFilter::default().exclude_rigid_body(self.exclude);
        let (handle, hit) =
            self.query
                .cast_ray_and_get_normal(self.bodies, self.colliders, &ray, max, true, filter)?;
        let friction = self
            .colliders
            .get(handle)
            .map(|c| c.friction())
            .unwrap_or(1.0);
        Some(RayHit {
            point: ray.point_at(hit.time_of_impact),
            normal: hit.normal,
            distance: hit.time_of_impact,
            friction,
        })
    }
}

/// Buffered view of one rigid body. Reads are snapshotted at creation,
/// writes queue up and flush after the wheel loop, so several proxies can
/// coexist without aliasing the body set.
pub struct BodyProxy {
    handle: RigidBodyHandle,
    transform: Isometry<Real>,
    com: Point<Real>,
    linvel: Vector<Real>,
    angvel: Vector<Real>,
    mass: Real,
    active: bool,

    forces_at: Vec<(Point<Real>, Vector<Real>)>,
    forces: Vec<Vector<Real>>,
    torques: Vec<Vector<Real>>,
    velocity_override: Option<(Vector<Real>, Vector<Real>)>,
}

impl BodyProxy {
    pub fn snapshot(handle: RigidBodyHandle, body: &RigidBody) -> Self {
        Self {
            handle,
            transform: *body.position(),
            com: *body.center_of_mass(),
            linvel: *body.linvel(),
            angvel: *body.angvel(),
            mass: body.mass(),
            active: body.is_dynamic() && !body.is_sleeping(),
            forces_at: Vec::new(),
            forces: Vec::new(),
            torques: Vec::new(),
            velocity_override: None,
        }
    }

    pub fn flush(self, bodies: &mut RigidBodySet) {
        let Some(body) = bodies.get_mut(self.handle) else {
            return;
        };
        for (point, force) in self.forces_at {
            body.add_force_at_point(force, point, true);
        }
        for force in self.forces {
            body.add_force(force, true);
        }
        for torque in self.torques {
            body.add_torque(torque, true);
        }
        if let Some((linear, angular)) = self.velocity_override {
            body.set_linvel(linear, true);
            body.set_angvel(angular, true);
        }
    }
}

impl RigidBodyPort for BodyProxy {
    fn transform(&self) -> Isometry<Real> {
        self.transform
    }
    fn center_of_mass(&self) -> Point<Real> {
        self.com
    }
    fn linear_velocity(&self) -> Vector<Real> {
        self.linvel
    }
    fn angular_velocity(&self) -> Vector<Real> {
        self.angvel
    }
    fn mass(&self) -> Real {
        self.mass
    }
    fn gravity(&self) -> Real {
        GRAVITY
    }
    fn is_active(&self) -> bool {
        self.active
    }
    fn add_force_at_point(&mut self, point: Point<Real>, force: Vector<Real>) {
        self.forces_at.push((point, force));
    }
    fn add_force(&mut self, force: Vector<Real>) {
        self.forces.push(force);
    }
    fn add_torque(&mut self, torque: Vector<Real>) {
        self.torques.push(torque);
    }
    fn set_velocities(&mut self, linear: Vector<Real>, angular: Vector<Real>) {
        self.velocity_override = Some((linear, angular));
    }
}

// ------------------------------------------------------------------
// World
// ------------------------------------------------------------------

pub struct VehicleEntry {
    pub vehicle: Vehicle,
    pub chassis: RigidBodyHandle,
    /// Parallel to `vehicle.wheels`; only physics-mode wheels have a body.
    pub wheel_bodies: Vec<Option<RigidBodyHandle>>,
    /// Last rest state seen for this vehicle (sent if owner, received
    /// otherwise). A blank position means no rest is in effect.
    pub rest_state: NetState,
    /// Latched once the incoming pose settles under the rest threshold;
    /// widens the apply-gate so settle wobble stops shaking the chassis.
    rest_thresh: bool,
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    pub vehicles: HashMap<String, VehicleEntry>,
    /// Simulation clock, seconds since world creation.
    pub time: Real,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let gravity = vector![0.0, -GRAVITY, 0.0];

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Large static ground slab, top surface at y = 0.
        let ground_rb = RigidBodyBuilder::fixed()
            .translation(vector![0.0, -10.0, 0.0])
            .build();
        let ground_handle = bodies.insert(ground_rb);
        let ground_collider = ColliderBuilder::cuboid(50_000.0, 10.0, 50_000.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.0)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        println!(
            "🌍 Ground inserted. Bodies = {}, Colliders = {}",
            bodies.len(),
            colliders.len()
        );

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
            time: 0.0,
        }
    }

    /// Four raycast wheels: front pair steers, rear pair drives, all brake,
    /// rear pair carries the handbrake.
    fn default_wheels() -> Vec<Wheel> {
        let mut wheels = Vec::with_capacity(4);
        for i in 0..4 {
            let front = i < 2;
            let left = i % 2 == 0;
            let mut config = WheelConfig::default();
            config.auto_radius = false;
            config.is_steerable = front;
            config.is_driving = !front;
            config.is_handbrake = !front;
            config.invert_steering = false;
            config.local_transform.translation.vector = vector![
                if left { -80.0 } else { 80.0 },
                -30.0,
                if front { -120.0 } else { 120.0 }
            ];
            wheels.push(Wheel::new(config));
        }
        wheels
    }

    /// Spawn a vehicle near `position` with a little scatter so stacked
    /// joins don't interpenetrate.
    pub fn spawn_vehicle(&mut self, id: &str, position: [Real; 3], role: Role) {
        let mut rng = rand::thread_rng();
        let spawn_x = position[0] + rng.gen_range(-200.0..200.0);
        let spawn_z = position[2] + rng.gen_range(-200.0..200.0);

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![spawn_x, SPAWN_HEIGHT, spawn_z])
            .linear_damping(0.05)
            .angular_damping(0.5)
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(rb);

        let collider = ColliderBuilder::cuboid(100.0, 35.0, 210.0)
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .mass(CHASSIS_MASS)
            .friction(0.0) // wheels provide all the grip
            .restitution(0.0)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        let wheels = Self::default_wheels();
        let wheel_count = wheels.len();
        self.vehicles.insert(
            id.to_string(),
            VehicleEntry {
                vehicle: Vehicle::new(wheels, role),
                chassis: handle,
                wheel_bodies: vec![None; wheel_count],
                rest_state: NetState::default(),
                rest_thresh: false,
            },
        );

        println!(
            "🚗 Spawned vehicle {} at [{:.0}, {:.0}, {:.0}] role {:?} (body = {:?})",
            id, spawn_x, SPAWN_HEIGHT, spawn_z, role, handle
        );
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        let Some(mut entry) = self.vehicles.remove(id) else {
            return;
        };
        // No new steps may start while the body is being torn down.
        entry.vehicle.detach();
        self.bodies.remove(
            entry.chassis,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        for handle in entry.wheel_bodies.iter().flatten() {
            self.bodies.remove(
                *handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.joints,
                &mut self.multibody_joints,
                true,
            );
        }
        println!("🗑️ Removed vehicle {}", id);
    }

    pub fn set_inputs(&mut self, id: &str, inputs: VehicleInputs) {
        if let Some(entry) = self.vehicles.get_mut(id) {
            entry.vehicle.set_inputs(inputs);
        }
    }

    pub fn receive_movement_state(&mut self, id: &str, state: NetState) {
        let now = self.time;
        if let Some(entry) = self.vehicles.get_mut(id) {
            let role = entry.vehicle.role;
            entry.vehicle.net_queue.push(state, role, now);
        }
    }

    pub fn receive_rest_state(&mut self, id: &str, state: NetState) {
        if let Some(entry) = self.vehicles.get_mut(id) {
            entry.rest_state = state;
        }
    }

    /// Ownership changed hands: every peer drops its queued states.
    pub fn change_role(&mut self, id: &str, role: Role) {
        if let Some(entry) = self.vehicles.get_mut(id) {
            entry.vehicle.role = role;
            entry.vehicle.net_queue.clear();
            println!("🔑 Vehicle {} role changed to {:?}", id, role);
        }
    }

    /// One fixed simulation step: wheel forces, rigid body integration,
    /// rest tracking, explosion guard.
    pub fn step(&mut self, dt: Real) {
        self.time += dt;

        let ids: Vec<String> = self.vehicles.keys().cloned().collect();
        for id in &ids {
            let Some(entry) = self.vehicles.get_mut(id) else {
                continue;
            };
            let Some(chassis_body) = self.bodies.get(entry.chassis) else {
                continue;
            };

            let mut chassis = BodyProxy::snapshot(entry.chassis, chassis_body);
            let mut wheel_proxies: Vec<Option<BodyProxy>> = entry
                .wheel_bodies
                .iter()
                .map(|slot| {
                    slot.and_then(|h| self.bodies.get(h).map(|b| BodyProxy::snapshot(h, b)))
                })
                .collect();
            let rays = RapierRays {
                query: &self.query_pipeline,
                bodies: &self.bodies,
                colliders: &self.colliders,
                exclude: entry.chassis,
            };

            {
                let mut slots: Vec<Option<&mut dyn RigidBodyPort>> = wheel_proxies
                    .iter_mut()
                    .map(|o| o.as_mut().map(|p| p as &mut dyn RigidBodyPort))
                    .collect();
                entry.vehicle.step(dt, &rays, &mut chassis, &mut slots);
            }

            chassis.flush(&mut self.bodies);
            for proxy in wheel_proxies.into_iter().flatten() {
                proxy.flush(&mut self.bodies);
            }
        }

        let hooks = ();
        let mut events = ();
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &mut events,
            &hooks,
        );

        // Wheel forces are recomputed every tick; they must not persist.
        for entry in self.vehicles.values() {
            if let Some(body) = self.bodies.get_mut(entry.chassis) {
                body.reset_forces(false);
                body.reset_torques(false);
            }
            for handle in entry.wheel_bodies.iter().flatten() {
                if let Some(body) = self.bodies.get_mut(*handle) {
                    body.reset_forces(false);
                    body.reset_torques(false);
                }
            }
        }

        // Rest tracking, all roles.
        for (id, entry) in self.vehicles.iter_mut() {
            if let Some(body) = self.bodies.get(entry.chassis) {
                let speed = body.linvel().norm();
                if let Some(resting) = entry.vehicle.update_rest(speed, dt) {
                    println!(
                        "💤 Vehicle {} {}",
                        id,
                        if resting { "at rest" } else { "moving" }
                    );
                }
            }
        }

        // Guard against solver blowups.
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite()
                || !pos.y.is_finite()
                || !pos.z.is_finite()
                || pos.x.abs() > WORLD_BOUND
                || pos.y.abs() > WORLD_BOUND
                || pos.z.abs() > WORLD_BOUND;
            if bad {
                body.set_translation(vector![0.0, SPAWN_HEIGHT, 0.0], true);
                body.set_linvel(Vector::zeros(), true);
                body.set_angvel(Vector::zeros(), true);
                eprintln!("⚠️ Reset exploding body back to spawn");
            }
        }
    }

    /// Networking: owners emit movement/rest states on their send cadence,
    /// everyone else consumes their state queue.
    pub fn network_tick(&mut self, dt: Real) -> Vec<(String, Outbound)> {
        let now = self.time;
        let mut outbound = Vec::new();

        let ids: Vec<String> = self.vehicles.keys().cloned().collect();
        for id in ids {
            let Some(entry) = self.vehicles.get_mut(&id) else {
                continue;
            };

            if entry.vehicle.role == Role::Owner {
                if !entry.vehicle.net_send_due(dt) {
                    continue;
                }
                let Some(body) = self.bodies.get(entry.chassis) else {
                    continue;
                };
                let state = NetState {
                    net_timestamp: now,
                    local_timestamp: now,
                    position: *body.translation(),
                    rotation: *body.rotation(),
                    velocity: *body.linvel(),
                    angular_velocity: *body.angvel(),
                };
                let local_rest = entry.vehicle.rest.at_rest();
                let net_rest = rest::network_at_rest(&entry.rest_state);
                let awake = !body.is_sleeping();

                if !local_rest {
                    outbound.push((id.clone(), Outbound::Movement(state)));
                }
                match rest::plan_rest_send(
                    local_rest,
                    net_rest,
                    awake,
                    entry.rest_state.position,
                    state.position,
                ) {
                    RestSend::Update => {
                        entry.rest_state = state;
                        outbound.push((id.clone(), Outbound::Rest(state)));
                    }
                    RestSend::Clear => {
                        entry.rest_state = NetState::default();
                        outbound.push((id.clone(), Outbound::Rest(NetState::default())));
                    }
                    RestSend::Nothing => {}
                }

                // Owners never replay their own states.
                entry.vehicle.net_queue.clear();
            } else {
                let Some(body) = self.bodies.get(entry.chassis) else {
                    continue;
                };
                let position = *body.translation();
                let rotation = *body.rotation();
                let rest_state =
                    rest::network_at_rest(&entry.rest_state).then_some(entry.rest_state);
                let command =
                    entry
                        .vehicle
                        .net_queue
                        .sample(now, position, rotation, rest_state.as_ref());
                self.apply_pose(&id, command, dt);
            }
        }
        outbound
    }

    fn apply_pose(&mut self, id: &str, command: PoseCommand, dt: Real) {
        match command {
            PoseCommand::None => {}
            PoseCommand::Blend {
                position,
                rotation,
                wake_wheels,
            } => self.blend_pose(id, position, rotation, wake_wheels, dt),
            PoseCommand::Exact(state) => {
                let Some(entry) = self.vehicles.get(id) else {
                    return;
                };
                if let Some(body) = self.bodies.get_mut(entry.chassis) {
                    body.set_position(
                        Isometry::from_parts(state.position.into(), state.rotation),
                        true,
                    );
                    body.set_linvel(state.velocity, true);
                    body.set_angvel(state.angular_velocity, true);
                }
            }
            PoseCommand::Teleport(state) => {
                let Some(entry) = self.vehicles.get_mut(id) else {
                    return;
                };
                if let Some(body) = self.bodies.get_mut(entry.chassis) {
                    body.set_position(
                        Isometry::from_parts(state.position.into(), state.rotation),
                        true,
                    );
                    body.set_linvel(Vector::zeros(), true);
                    body.set_angvel(Vector::zeros(), true);
                }
                entry.vehicle.reset_wheels();
            }
        }
    }

    /// Move toward a target pose with smoothing, gated by distance so a
    /// nearly-settled vehicle is left alone.
    fn blend_pose(
        &mut self,
        id: &str,
        position: Vector<Real>,
        rotation: UnitQuaternion<Real>,
        wake_wheels: bool,
        dt: Real,
    ) {
        let Some(entry) = self.vehicles.get_mut(id) else {
            return;
        };
        let net_rest = rest::network_at_rest(&entry.rest_state);

        if wake_wheels {
            for handle in entry.wheel_bodies.iter().flatten() {
                if let Some(body) = self.bodies.get_mut(*handle) {
                    body.wake_up(true);
                }
            }
        }

        let Some(body) = self.bodies.get_mut(entry.chassis) else {
            return;
        };
        let current = *body.translation();
        let move_distance = (position - current).norm();
        let speed = body.linvel().norm();

        let mut threshold = 0.15; // cm
        if (net_rest && entry.rest_thresh) || move_distance < threshold {
            threshold = 10.0;
            entry.rest_thresh = move_distance < threshold;
        }

        // Leave the body alone when it is already close enough and slow.
        if speed > REST_VELOCITY_THRESHOLD || move_distance > threshold {
            if body.is_dynamic() && !body.is_sleeping() {
                let alpha = (dt * netsync::NET_SMOOTHING).clamp(0.0, 1.0);
                let new_position = current + (position - current) * alpha;
                let new_rotation = slerp_shortest(*body.rotation(), rotation, alpha);
                body.set_position(Isometry::from_parts(new_position.into(), new_rotation), true);
            } else {
                // Asleep: snap without waking.
                body.set_position(Isometry::from_parts(position.into(), rotation), false);
            }
        }
    }

    /// Presentation side of the tick: pull wheel outputs and spin meshes.
    pub fn presentation_tick(&mut self, dt: Real) {
        for entry in self.vehicles.values_mut() {
            entry.vehicle.apply_outputs();

            let asleep = self
                .bodies
                .get(entry.chassis)
                .map(|b| b.is_sleeping())
                .unwrap_or(true);
            if asleep {
                entry.vehicle.zero_contact_spin();
            }

            for wheel in &mut entry.vehicle.wheels {
                if wheel.has_contact() {
                    // Grounded spin carries over as the free-spin target,
                    // so a wheel leaving the ground keeps its speed.
                    wheel.target_ang_vel = wheel.data.angular_velocity;
                }
                wheel.visual_tick(dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Real = 1.0 / 60.0;

    #[test]
    fn suspension_ray_hits_the_ground_with_friction() {
        let mut world = PhysicsWorld::new();
        // the query pipeline is only populated after the first step
        world.step(DT);

        let rays = RapierRays {
            query: &world.query_pipeline,
            bodies: &world.bodies,
            colliders: &world.colliders,
            exclude: RigidBodyHandle::invalid(),
        };
        let hit = rays
            .cast(point![0.0, 100.0, 0.0], point![0.0, -50.0, 0.0])
            .expect("ground below");
        assert!((hit.distance - 100.0).abs() < 1.0);
        assert!(hit.normal.y > 0.99);
        assert!((hit.friction - 1.0).abs() < 1e-6);
    }

    #[test]
    fn spawned_vehicle_settles_on_its_springs() {
        let mut world = PhysicsWorld::new();
        world.spawn_vehicle("p1", [0.0, 0.0, 0.0], Role::Owner);

        // ten simulated seconds to fall and settle
        for _ in 0..600 {
            world.step(DT);
        }

        let entry = &world.vehicles["p1"];
        let body = &world.bodies[entry.chassis];
        let y = body.translation().y;
        assert!(y.is_finite());
        // held off the ground by the springs, not resting on the collider
        assert!(y > 30.0 && y < 90.0, "chassis settled at y = {y}");
    }

    #[test]
    fn client_vehicle_teleports_to_a_distant_state() {
        let mut world = PhysicsWorld::new();
        world.gravity = Vector::zeros();
        world.spawn_vehicle("remote", [0.0, 0.0, 0.0], Role::Server);

        let state = NetState {
            net_timestamp: world.time,
            position: vector![20_000.0, 150.0, 0.0],
            ..Default::default()
        };
        world.receive_movement_state("remote", state);
        let outbound = world.network_tick(DT);
        assert!(outbound.is_empty());

        let entry = &world.vehicles["remote"];
        let body = &world.bodies[entry.chassis];
        assert!((body.translation().x - 20_000.0).abs() < 1.0);
        assert_eq!(body.linvel().norm(), 0.0);
    }

    #[test]
    fn owner_emits_movement_states_on_the_send_cadence() {
        let mut world = PhysicsWorld::new();
        world.spawn_vehicle("p1", [0.0, 0.0, 0.0], Role::Owner);

        let mut movements = 0;
        for _ in 0..60 {
            world.step(DT);
            for (_, msg) in world.network_tick(DT) {
                if matches!(msg, Outbound::Movement(_)) {
                    movements += 1;
                }
            }
        }
        // 0.05s cadence over one second
        assert!((15..=25).contains(&movements), "sent {movements}");
    }

    #[test]
    fn owner_sends_rest_state_once_settled() {
        let mut world = PhysicsWorld::new();
        world.spawn_vehicle("p1", [0.0, 0.0, 0.0], Role::Owner);

        let mut rest_updates = 0;
        // enough time to settle (and 3s of rest) with margin
        for _ in 0..1800 {
            world.step(DT);
            for (_, msg) in world.network_tick(DT) {
                if matches!(msg, Outbound::Rest(state) if state.position != Vector::zeros()) {
                    rest_updates += 1;
                }
            }
        }
        assert!(rest_updates >= 1, "no rest state was ever sent");
        let entry = &world.vehicles["p1"];
        assert!(entry.vehicle.rest.at_rest());
    }
}
