use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::vector;

use crate::netsync::NetState;
use crate::physics::{Outbound, PhysicsWorld};

/// Movement/rest state as it travels on the wire. Rotation is x, y, z, w.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireState {
    pub timestamp: f32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
}

impl From<&NetState> for WireState {
    fn from(state: &NetState) -> Self {
        let q = state.rotation.coords;
        Self {
            timestamp: state.net_timestamp,
            position: [state.position.x, state.position.y, state.position.z],
            rotation: [q.x, q.y, q.z, q.w],
            velocity: [state.velocity.x, state.velocity.y, state.velocity.z],
            angular_velocity: [
                state.angular_velocity.x,
                state.angular_velocity.y,
                state.angular_velocity.z,
            ],
        }
    }
}

impl WireState {
    pub fn into_net_state(self) -> NetState {
        let [x, y, z, w] = self.rotation;
        NetState {
            net_timestamp: self.timestamp,
            local_timestamp: 0.0,
            position: vector![self.position[0], self.position[1], self.position[2]],
            rotation: UnitQuaternion::from_quaternion(
                rapier3d::na::Quaternion::new(w, x, y, z),
            ),
            velocity: vector![self.velocity[0], self.velocity[1], self.velocity[2]],
            angular_velocity: vector![
                self.angular_velocity[0],
                self.angular_velocity[1],
                self.angular_velocity[2]
            ],
        }
    }
}

#[derive(Serialize)]
pub struct WheelSnapshot {
    pub spring_length: f32,
    pub angular_velocity: f32,
    /// Accumulated mesh roll, radians.
    pub rotation: f32,
    pub contact: bool,
}

#[derive(Serialize)]
pub struct VehicleSnapshot {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
    pub qw: f32,
    pub at_rest: bool,
    pub wheels: Vec<WheelSnapshot>,
}

#[derive(Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: Vec<UnboundedSender<String>>,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: Vec::new(),
        }
    }

    pub fn register_client(&mut self, tx: UnboundedSender<String>) {
        self.clients.push(tx);
    }

    fn broadcast(&self, json: String) {
        for tx in &self.clients {
            let _ = tx.send(json.clone());
        }
    }

    /// Build and send a snapshot of every vehicle to all clients.
    pub fn broadcast_snapshot(&self, world: &PhysicsWorld) {
        let mut vehicles = Vec::with_capacity(world.vehicles.len());

        for (id, entry) in &world.vehicles {
            if let Some(body) = world.bodies.get(entry.chassis) {
                let pos = body.translation();
                let rot = body.rotation().coords;
                let wheels = entry
                    .vehicle
                    .wheels
                    .iter()
                    .map(|wheel| WheelSnapshot {
                        spring_length: wheel.data.spring_length,
                        angular_velocity: wheel.angular_velocity(),
                        rotation: wheel.rotation_rad,
                        contact: wheel.has_contact(),
                    })
                    .collect();
                vehicles.push(VehicleSnapshot {
                    id: id.clone(),
                    x: pos.x,
                    y: pos.y,
                    z: pos.z,
                    qx: rot.x,
                    qy: rot.y,
                    qz: rot.z,
                    qw: rot.w,
                    at_rest: entry.vehicle.rest.at_rest(),
                    wheels,
                });
            }
        }

        let json = serde_json::to_string(&Snapshot {
            tick: self.tick,
            vehicles,
        })
        .unwrap();
        self.broadcast(json);
    }

    /// Relay movement/rest states produced by this tick's owners.
    pub fn broadcast_outbound(&self, messages: &[(String, Outbound)]) {
        for (id, message) in messages {
            let json = match message {
                Outbound::Movement(state) => serde_json::json!({
                    "type": "movement_state",
                    "id": id,
                    "state": WireState::from(state),
                }),
                Outbound::Rest(state) => serde_json::json!({
                    "type": "rest_state",
                    "id": id,
                    "state": WireState::from(state),
                }),
            };
            self.broadcast(json.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::Real;

    #[test]
    fn wire_state_round_trips_the_pose() {
        let state = NetState {
            net_timestamp: 1.25,
            local_timestamp: 99.0, // local-only, never travels
            position: vector![100.0, 50.0, -30.0],
            rotation: UnitQuaternion::from_axis_angle(
                &rapier3d::na::Vector3::y_axis(),
                0.5 as Real,
            ),
            velocity: vector![10.0, 0.0, -5.0],
            angular_velocity: vector![0.0, 0.2, 0.0],
        };

        let wire = WireState::from(&state);
        let back = wire.into_net_state();

        assert_eq!(back.net_timestamp, 1.25);
        assert_eq!(back.local_timestamp, 0.0);
        assert_eq!(back.position, state.position);
        assert!((back.rotation.angle_to(&state.rotation)).abs() < 1e-6);
        assert_eq!(back.velocity, state.velocity);
        assert_eq!(back.angular_velocity, state.angular_velocity);
    }

    #[test]
    fn snapshot_serializes_vehicles_and_wheels() {
        use crate::netsync::Role;

        let mut world = PhysicsWorld::new();
        world.spawn_vehicle("p1", [0.0, 0.0, 0.0], Role::Owner);
        world.step(1.0 / 60.0);

        let state = SharedGameState::new();
        let mut vehicles = Vec::new();
        for (id, entry) in &world.vehicles {
            let body = &world.bodies[entry.chassis];
            vehicles.push(VehicleSnapshot {
                id: id.clone(),
                x: body.translation().x,
                y: body.translation().y,
                z: body.translation().z,
                qx: 0.0,
                qy: 0.0,
                qz: 0.0,
                qw: 1.0,
                at_rest: entry.vehicle.rest.at_rest(),
                wheels: Vec::new(),
            });
        }
        let json = serde_json::to_string(&Snapshot {
            tick: state.tick,
            vehicles,
        })
        .unwrap();
        assert!(json.contains("\"p1\""));
        assert!(json.contains("\"at_rest\":false"));
    }
}
