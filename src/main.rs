use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, interval};

use wheelhouse::net::start_websocket_server;
use wheelhouse::netsync::Role;
use wheelhouse::physics::PhysicsWorld;
use wheelhouse::state::SharedGameState;

const DT: f32 = 1.0 / 60.0;

#[tokio::main]
async fn main() {
    println!("🚀 Starting Wheelhouse vehicle server...");

    let state = Arc::new(Mutex::new(SharedGameState::new()));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    // One server-owned vehicle so a fresh world is never empty. Its
    // movement states flow to every client like any other owner's.
    {
        let mut phys = physics.lock().await;
        phys.spawn_vehicle("server-demo", [0.0, 0.0, 600.0], Role::Owner);
    }

    // Start WebSocket server
    tokio::spawn(start_websocket_server(
        Arc::clone(&state),
        Arc::clone(&physics),
    ));

    // Fixed timestep: ~60 Hz
    let mut ticker = interval(Duration::from_millis(16));

    loop {
        ticker.tick().await;

        let mut phys = physics.lock().await;
        let mut game = state.lock().await;

        // Wheel forces + rigid body integration
        phys.step(DT);

        // Owners emit movement/rest states, remote vehicles consume theirs
        let outbound = phys.network_tick(DT);

        // Visual wheel spin + presentation-side output handoff
        phys.presentation_tick(DT);

        game.tick += 1;
        game.broadcast_outbound(&outbound);
        game.broadcast_snapshot(&phys);
    }
}
