use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::inputs::VehicleInputs;
use crate::netsync::Role;
use crate::physics::PhysicsWorld;
use crate::state::{SharedGameState, WireState};

#[derive(Debug)]
pub struct ClientMessage {
    pub msg_type: String,
    pub steering: f32,
    pub throttle: f32,
    pub brake: f32,
    pub torque: f32,
    pub handbrake: bool,
    pub reverse_torque: bool,
    /// Movement or rest payload, when the message carries one.
    pub state: Option<WireState>,
    /// Requested role for control_change messages.
    pub role: Option<String>,
}

impl ClientMessage {
    pub fn from_json(txt: &str) -> Option<Self> {
        let v = serde_json::from_str::<serde_json::Value>(txt).ok()?;

        Some(ClientMessage {
            msg_type: v.get("type")?.as_str()?.to_string(),
            steering: v.get("steering").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            throttle: v.get("throttle").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            brake: v.get("brake").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            torque: v.get("torque").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            handbrake: v.get("handbrake").and_then(|x| x.as_bool()).unwrap_or(false),
            reverse_torque: v
                .get("reverse_torque")
                .and_then(|x| x.as_bool())
                .unwrap_or(false),
            state: v
                .get("state")
                .and_then(|s| serde_json::from_value::<WireState>(s.clone()).ok()),
            role: v.get("role").and_then(|r| r.as_str()).map(str::to_string),
        })
    }
}

/// Hook for rejecting suspicious client messages before they reach the
/// simulation. Rejected messages are dropped without a reply.
pub trait MessageValidator: Send + Sync {
    fn validate(&self, _message: &ClientMessage) -> bool {
        true
    }
}

/// Default validator: every well-formed message passes.
pub struct AcceptAll;

impl MessageValidator for AcceptAll {}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "owner" => Some(Role::Owner),
        "server" => Some(Role::Server),
        "client" => Some(Role::Client),
        "client_spawned" => Some(Role::ClientSpawned),
        _ => None,
    }
}

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) {
    let listener = TcpListener::bind("0.0.0.0:9001")
        .await
        .expect("Failed to bind WebSocket port");

    println!("🌐 WebSocket listening on ws://localhost:9001");

    let validator: Arc<dyn MessageValidator> = Arc::new(AcceptAll);

    loop {
        let Ok((raw, _)) = listener.accept().await else {
            continue;
        };
        let state_clone = Arc::clone(&state);
        let physics_clone = Arc::clone(&physics);
        let validator = Arc::clone(&validator);

        tokio::spawn(async move {
            let ws = match accept_async(raw).await {
                Ok(ws) => ws,
                Err(_) => return,
            };
            let (mut write, mut read) = ws.split();

            // -------------------------------
            // 1) Create outgoing message channel
            // -------------------------------
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();

            {
                let mut game = state_clone.lock().await;
                game.register_client(tx.clone());
            }

            // -------------------------------
            // 2) Spawn send-loop task
            // -------------------------------
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let _ = write.send(Message::Text(msg)).await;
                }
            });

            // -------------------------------
            // 3) Spawn the player's vehicle
            // -------------------------------
            // The client simulates its own vehicle; this server replays its
            // movement states and relays them to everyone else.
            let player_id = Uuid::new_v4().to_string();
            {
                let mut phys = physics_clone.lock().await;
                phys.spawn_vehicle(&player_id, [0.0, 0.0, 0.0], Role::Server);
            }

            println!("🟢 Player connected: {}", player_id);

            // Send welcome through the outgoing TX channel
            let welcome = format!(r#"{{"type":"welcome","player_id":"{}"}}"#, player_id);
            let _ = tx.send(welcome);

            // -------------------------------
            // 4) Main receive loop
            // -------------------------------
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };

                if !msg.is_text() {
                    continue;
                }
                let text = match msg.to_text() {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if text.contains("\"type\":\"ping\"") {
                    let _ = tx.send("{\"type\":\"pong\"}".into());
                    continue;
                }

                let parsed = match ClientMessage::from_json(text) {
                    Some(v) => v,
                    None => continue,
                };
                if !validator.validate(&parsed) {
                    continue;
                }

                match parsed.msg_type.as_str() {
                    "input" => {
                        let inputs = VehicleInputs {
                            steering: parsed.steering,
                            throttle: parsed.throttle,
                            brake: parsed.brake,
                            torque: parsed.torque,
                            handbrake: parsed.handbrake,
                            reverse_torque: parsed.reverse_torque,
                        };
                        let mut phys = physics_clone.lock().await;
                        phys.set_inputs(&player_id, inputs);
                    }
                    "movement_state" => {
                        if let Some(wire) = parsed.state {
                            let mut phys = physics_clone.lock().await;
                            phys.receive_movement_state(&player_id, wire.into_net_state());
                        }
                    }
                    "rest_state" => {
                        if let Some(wire) = parsed.state {
                            let mut phys = physics_clone.lock().await;
                            phys.receive_rest_state(&player_id, wire.into_net_state());
                        }
                    }
                    "control_change" => {
                        if let Some(role) = parsed.role.as_deref().and_then(parse_role) {
                            let mut phys = physics_clone.lock().await;
                            phys.change_role(&player_id, role);
                        }
                    }
                    _ => {}
                }
            }

            println!("🔴 Player disconnected: {}", player_id);
            let mut phys = physics_clone.lock().await;
            phys.remove_vehicle(&player_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_parses_all_axes() {
        let msg = ClientMessage::from_json(
            r#"{"type":"input","steering":-0.5,"throttle":1.0,"brake":0.2,
                "torque":300.0,"handbrake":true,"reverse_torque":false}"#,
        )
        .expect("well-formed");
        assert_eq!(msg.msg_type, "input");
        assert_eq!(msg.steering, -0.5);
        assert_eq!(msg.throttle, 1.0);
        assert_eq!(msg.brake, 0.2);
        assert_eq!(msg.torque, 300.0);
        assert!(msg.handbrake);
        assert!(!msg.reverse_torque);
    }

    #[test]
    fn movement_state_message_carries_a_wire_state() {
        let msg = ClientMessage::from_json(
            r#"{"type":"movement_state","state":{
                "timestamp":1.5,
                "position":[100.0,50.0,0.0],
                "rotation":[0.0,0.0,0.0,1.0],
                "velocity":[10.0,0.0,0.0],
                "angular_velocity":[0.0,0.0,0.0]}}"#,
        )
        .expect("well-formed");
        let state = msg.state.expect("state payload").into_net_state();
        assert_eq!(state.net_timestamp, 1.5);
        assert_eq!(state.position.x, 100.0);
        assert_eq!(state.velocity.x, 10.0);
    }

    #[test]
    fn missing_type_field_is_rejected() {
        assert!(ClientMessage::from_json(r#"{"steering":1.0}"#).is_none());
        assert!(ClientMessage::from_json("not json").is_none());
    }

    #[test]
    fn control_change_roles_parse() {
        assert_eq!(parse_role("owner"), Some(Role::Owner));
        assert_eq!(parse_role("server"), Some(Role::Server));
        assert_eq!(parse_role("client"), Some(Role::Client));
        assert_eq!(parse_role("client_spawned"), Some(Role::ClientSpawned));
        assert_eq!(parse_role("admin"), None);
    }
}
