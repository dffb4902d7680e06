// ==============================================================================
// force.rs — PER-WHEEL SUSPENSION + TIRE FORCE MODEL
// ------------------------------------------------------------------------------
// One wheel, one step. Casts the suspension ray, derives spring/damper force,
// runs the slip model against the contact plane, and pushes the combined
// force into the chassis body port. Physics-mode wheels stop after the
// suspension stage; their own rigid body handles friction and torque.
//
// Units: world distances in cm, spring rate in N/mm, damping in kN·s/m,
// internal force math in SI newtons, applied forces in centinewtons (×100).
// Wheel axes: forward = -Z, right = +X, up = +Y of the wheel transform.
// ==============================================================================

use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::*;

use crate::inputs::VehicleInputs;
use crate::ports::{RayQueryPort, RigidBodyPort};

use super::config::{WheelConfig, WheelMode};
use super::types::{ChassisState, WheelOutput, WheelRuntimeState, sign};

// Suspension force drops off as the contact normal approaches the wheel's
// right axis, zero force at END, full force at START.
const TILT_FALLOFF_START: Real = 0.5;
const TILT_FALLOFF_END: Real = 0.1;

// Slip angle (deg) at which lateral grip peaks.
const SLIP_ANGLE_PEAK: Real = 12.0;
const LONG_SLIP_LIMIT: Real = 30.0;

pub fn step_wheel(
    config: &WheelConfig,
    state: &mut WheelRuntimeState,
    chassis: &ChassisState,
    inputs: &VehicleInputs,
    dt: Real,
    rays: &dyn RayQueryPort,
    chassis_body: &mut dyn RigidBodyPort,
    mut wheel_body: Option<&mut dyn RigidBodyPort>,
) -> WheelOutput {
    let dt = dt.max(1.0e-6);

    // Steering rotates the wheel frame about its local up axis. The wheel
    // has no body of its own in raycast mode, so the transform is rebuilt
    // from the chassis every step.
    let mut local = config.local_transform;
    if config.is_steerable {
        let mut angle_deg = inputs.steering * config.max_steer_angle;
        if config.invert_steering {
            angle_deg = -angle_deg;
        }
        // negative about +Y so positive steering turns toward +X (right)
        let yaw = UnitQuaternion::from_axis_angle(&Vector::y_axis(), -angle_deg.to_radians());
        local.rotation *= yaw;
    }
    let wheel_iso = chassis.transform * local;
    let wheel_pos = Point::from(wheel_iso.translation.vector);
    let forward = wheel_iso.rotation * -Vector::z();
    let right = wheel_iso.rotation * Vector::x();
    let up = wheel_iso.rotation * Vector::y();

    // Span from top of wheel fully compressed to bottom fully extended.
    let reach = config.spring_length * 0.5 + config.radius();
    let trace_start = wheel_pos + up * reach;
    let trace_end = wheel_pos - up * reach;

    let Some(hit) = rays.cast(trace_start, trace_end) else {
        return step_airborne(config, state, inputs, chassis_body, wheel_body, wheel_pos, up);
    };

    // Length of the spring right now. Negative means the wheel is pushed
    // past full compression into the chassis.
    let length = hit.distance - config.radius() * 2.0;
    let new_spring_length = length.clamp(0.0, config.spring_length);

    let contact_vel = chassis.velocity_at(hit.point); // cm/s
    let vel_m = contact_vel * 0.01; // m/s
    let vel_on_plane = vel_m - hit.normal * vel_m.dot(&hit.normal);
    let wheel_speed = vel_on_plane.norm(); // m/s
    let vel_dir = if wheel_speed != 0.0 {
        vel_on_plane / wheel_speed
    } else {
        Vector::zeros()
    };
    let forward_on_plane = (forward - hit.normal * forward.dot(&hit.normal))
        .try_normalize(1.0e-6)
        .unwrap_or_else(Vector::zeros);
    let right_on_plane = (right - hit.normal * right.dot(&hit.normal))
        .try_normalize(1.0e-6)
        .unwrap_or_else(Vector::zeros);
    // Plane-projected velocity along the raw wheel axes, m/s.
    let v_long_m = vel_on_plane.dot(&forward);
    let v_lat_m = vel_on_plane.dot(&right);

    // Suspension
    let compression_m = (config.spring_length - new_spring_length) * 0.01;
    let compression_vel_m = contact_vel.dot(&up) * -0.01;
    let mut spring_n = config.spring_strength * 1000.0 * compression_m;
    let mut damper_n = config.spring_damping * 1000.0 * compression_vel_m;

    // Excess compression, hold the chassis off the ground
    if length < -1.0 {
        spring_n += chassis.gravity * chassis.mass * 0.01;
        damper_n *= 2.0;
    }

    // Scale force by left/right tilt to prevent sudden thrusts when landing
    // sideways. 1.0 = wheel upright relative to the contact normal.
    let tilt = 1.0 - hit.normal.dot(&right).abs();
    let tilt_falloff = ((tilt - TILT_FALLOFF_END) / (TILT_FALLOFF_START - TILT_FALLOFF_END))
        .clamp(0.0, 1.0);

    let suspension_n = (spring_n + damper_n) * tilt_falloff;
    let suspension_cn = hit.normal * (suspension_n * 100.0); // centinewtons

    if config.mode == WheelMode::Physics {
        chassis_body.add_force_at_point(hit.point, suspension_cn);
        if let Some(body) = wheel_body.as_deref_mut() {
            body.add_force(-suspension_cn);
            if config.is_braking && inputs.brake > 0.0 {
                brake_wheel_body(body, config.brake_torque * inputs.brake, config.inertia(), dt);
            }
        }
        // The solver owns friction and torque from here.
        return WheelOutput {
            hit: Some(hit),
            angular_velocity: state.angular_velocity,
            spring_length: new_spring_length,
        };
    }

    // Friction combine method = multiply
    let friction_long = config.tire_friction[0] * hit.friction;
    let friction_lat = config.tire_friction[1] * hit.friction;

    let slip_angle = -right_on_plane
        .dot(&vel_dir)
        .clamp(-1.0, 1.0)
        .asin()
        .to_degrees();

    // cm/s over cm = rad/s
    let rolling_ang_vel = contact_vel.dot(&forward) / config.radius();
    state.angular_velocity = rolling_ang_vel;

    let x_slip_target;
    if (inputs.handbrake && config.is_handbrake) || config.locked {
        state.angular_velocity = 0.0;
        x_slip_target = sign(-v_long_m);
    } else {
        let max_friction_torque = suspension_n * config.radius_m() * friction_long;

        // Rolling resistance rides along as a minimum brake input.
        let brake_input = if config.is_braking { inputs.brake } else { 0.0 }
            .clamp(config.rolling_resistance, 1.0);
        let x_brake_torque = sign(-state.angular_velocity) * config.brake_torque * brake_input;

        let mut x_drive_torque = 0.0;
        if inputs.torque > 0.0 && config.is_driving {
            let mut input_torque = inputs.torque;
            if config.invert_torque ^ inputs.reverse_torque {
                input_torque = -input_torque;
            }
            let new_ang_vel =
                state.angular_velocity + input_torque * 100.0 / config.inertia() * dt;
            x_drive_torque = (new_ang_vel - rolling_ang_vel) / dt * config.inertia();
        }

        let denom = if max_friction_torque.abs() > 1.0e-6 {
            max_friction_torque
        } else {
            1.0e-6
        };
        x_slip_target = (x_brake_torque + x_drive_torque) / denom;
    }

    // Longitudinal slip chases its target faster the faster the wheel moves.
    let min_interp = (inputs.throttle * 0.1).clamp(0.01, 0.1);
    let interp_long = (v_long_m.abs() / 0.010 * dt).clamp(min_interp, 1.0);
    let mut slip_x = state.slip[0] + (x_slip_target - state.slip[0]) * interp_long;
    slip_x = slip_x.clamp(-LONG_SLIP_LIMIT, LONG_SLIP_LIMIT);

    // Lateral slip blends from a low-speed push-back to the slip-angle model.
    let y_target_high = slip_angle / SLIP_ANGLE_PEAK;
    let y_target_low = -sign(v_lat_m);
    let alpha = (wheel_speed - 1.0).clamp(0.0, 1.0); // m/s mapped [1,2] -> [0,1]
    let y_slip_target = y_target_low + (y_target_high - y_target_low) * alpha;
    let interp_lat = (v_lat_m.abs() / 0.007 * dt).clamp(0.0, 1.0);
    let slip_y = state.slip[1] + (y_slip_target - state.slip[1]) * interp_lat;

    // Save the raw slip before normalizing for the final force.
    state.slip = [slip_x, slip_y];
    let mut nx = slip_x;
    let mut ny = slip_y;
    let slip_len = (nx * nx + ny * ny).sqrt();
    if slip_len > 1.0 {
        nx /= slip_len;
        ny /= slip_len;
    }
    ny = sign(ny) * ny.abs().sqrt();

    // The normalized slip defines how much grip is spent in each direction.
    let traction_cn = (forward_on_plane * (nx * friction_long)
        + right_on_plane * (ny * friction_lat))
        * suspension_n
        * 100.0;

    let total = suspension_cn + traction_cn;
    if total.iter().all(|c| c.is_finite()) {
        chassis_body.add_force_at_point(wheel_pos, total);
    } else {
        eprintln!("wheel force diverged, force dropped for this step");
    }

    WheelOutput {
        hit: Some(hit),
        angular_velocity: state.angular_velocity,
        spring_length: new_spring_length,
    }
}

/// No contact: spring fully extended, slip cleared, spin stopped under
/// brakes. A free physics-mode wheel still gets pulled back toward the
/// spring seat.
fn step_airborne(
    config: &WheelConfig,
    state: &mut WheelRuntimeState,
    inputs: &VehicleInputs,
    chassis_body: &mut dyn RigidBodyPort,
    mut wheel_body: Option<&mut dyn RigidBodyPort>,
    wheel_pos: Point<Real>,
    up: Vector<Real>,
) -> WheelOutput {
    state.slip = [0.0, 0.0];

    if (inputs.handbrake && config.is_handbrake) || (inputs.brake > 0.0 && config.is_braking) {
        state.angular_velocity = 0.0;
    }

    if config.mode == WheelMode::Physics {
        if let Some(body) = wheel_body.as_deref_mut() {
            let spring_start = wheel_pos + up * (config.spring_length * 0.5);
            let body_pos = Point::from(body.transform().translation.vector);
            let stretched = (spring_start - body_pos)
                .norm()
                .clamp(0.0, config.spring_length);
            if stretched < config.spring_length {
                let compression_m = (config.spring_length - stretched) * 0.01;
                let spring_cn = up * (config.spring_strength * 1000.0 * compression_m * 100.0);
                chassis_body.add_force_at_point(body_pos, spring_cn);
                body.add_force(-spring_cn);
            }
        }
    }

    WheelOutput {
        hit: None,
        angular_velocity: state.angular_velocity,
        spring_length: config.spring_length,
    }
}

/// Brake a physics-mode wheel body: the torque that would stop its spin
/// this step, clamped to the brake's capacity, applied about the wheel's
/// own spin axis through its inertia.
fn brake_wheel_body(body: &mut dyn RigidBodyPort, max_torque: Real, inertia: Real, dt: Real) {
    let rot = body.transform().rotation;
    let spin = rot.inverse_transform_vector(&body.angular_velocity()).x;
    let full_stop = -spin / dt;
    let ang_accel = full_stop.clamp(-max_torque, max_torque);
    // inertia kg·m² scaled to the centimeter world's kg·cm²
    let torque = rot * Vector::x() * (ang_accel * inertia * 1.0e4);
    body.add_torque(torque);
}
