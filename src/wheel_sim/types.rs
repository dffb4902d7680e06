use rapier3d::prelude::{Isometry, Point, Real, Vector};

use crate::ports::{RayHit, RigidBodyPort};

/// Sign with a true zero case, unlike `f32::signum`.
pub fn sign(v: Real) -> Real {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Per-wheel state owned by the simulation context.
#[derive(Clone, Copy, Debug, Default)]
pub struct WheelRuntimeState {
    /// (longitudinal, lateral) slip, raw values before normalization.
    pub slip: [Real; 2],
    /// Spin angular velocity in rad/s, positive = rolling forward.
    pub angular_velocity: Real,
}

/// Result of one wheel step, handed back to the presentation side.
#[derive(Clone, Copy, Debug)]
pub struct WheelOutput {
    pub hit: Option<RayHit>,
    pub angular_velocity: Real, // rad/s
    pub spring_length: Real,    // cm, used to place the wheel mesh
}

/// Chassis kinematics captured once per step, before the wheel loop.
#[derive(Clone, Copy, Debug)]
pub struct ChassisState {
    pub transform: Isometry<Real>,
    pub com: Point<Real>,
    pub linvel: Vector<Real>, // cm/s
    pub angvel: Vector<Real>, // rad/s
    pub mass: Real,           // kg
    pub gravity: Real,        // cm/s², positive magnitude
}

impl ChassisState {
    pub fn from_port(port: &dyn RigidBodyPort) -> Self {
        Self {
            transform: port.transform(),
            com: port.center_of_mass(),
            linvel: port.linear_velocity(),
            angvel: port.angular_velocity(),
            mass: port.mass(),
            gravity: port.gravity(),
        }
    }

    /// v(p) = v_com + ω × (p - com)
    pub fn velocity_at(&self, point: Point<Real>) -> Vector<Real> {
        self.linvel + self.angvel.cross(&(point - self.com))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::{point, vector};

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(3.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
    }

    #[test]
    fn velocity_at_point_adds_spin_term() {
        let chassis = ChassisState {
            transform: Isometry::identity(),
            com: point![0.0, 0.0, 0.0],
            linvel: vector![100.0, 0.0, 0.0],
            angvel: vector![0.0, 1.0, 0.0],
            mass: 1500.0,
            gravity: 981.0,
        };
        // ω = 1 rad/s about Y at a point 200 cm forward (-Z)
        let v = chassis.velocity_at(point![0.0, 0.0, -200.0]);
        assert!((v.x - (100.0 - 200.0)).abs() < 1e-3);
        assert!(v.y.abs() < 1e-6);
        assert!(v.z.abs() < 1e-6);
    }
}
