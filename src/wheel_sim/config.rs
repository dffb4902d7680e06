use rapier3d::prelude::{Isometry, Real};

/// How a wheel interacts with the world.
///
/// Raycast wheels are fully simulated here (suspension + slip + traction).
/// Physics wheels have their own rigid body; we only push suspension into
/// them and let the external solver own friction and torque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WheelMode {
    Raycast,
    Physics,
}

/// Substituted whenever a configured radius is unusable in a division.
pub const FALLBACK_WHEEL_RADIUS: Real = 30.0; // cm

#[derive(Clone, Debug)]
pub struct WheelConfig {
    pub mode: WheelMode,

    /// (Rim+Tire) wheel mass in kg, used by the slip simulation only.
    mass: Real,
    /// Wheel radius in cm.
    radius: Real,
    /// Derive the radius from measured mesh bounds instead of the field above.
    pub auto_radius: bool,

    /// Friction coefficients (longitudinal, lateral).
    pub tire_friction: [Real; 2],

    pub is_driving: bool,
    pub is_steerable: bool,
    /// Maximum steering angle in degrees.
    pub max_steer_angle: Real,
    pub invert_torque: bool,
    pub invert_steering: bool,

    pub is_braking: bool,
    /// Brake torque in N·m.
    pub brake_torque: Real,
    /// Constant rolling resistance (0 - 1), applied as a minimum brake input.
    pub rolling_resistance: Real,
    pub is_handbrake: bool,

    /// Spring length in cm.
    pub spring_length: Real,
    /// Spring rate in N/mm.
    pub spring_strength: Real,
    /// Damper force in kN·s/m.
    pub spring_damping: Real,

    /// Forces the longitudinal slip into a locked-wheel regime.
    pub locked: bool,

    /// Wheel rest transform relative to the chassis body.
    pub local_transform: Isometry<Real>,

    // Derived constants, recomputed whenever mass or radius changes.
    radius_m: Real,
    inertia: Real,
}

impl Default for WheelConfig {
    fn default() -> Self {
        let mut config = Self {
            mode: WheelMode::Raycast,
            mass: 15.0,
            radius: 30.0,
            auto_radius: true,
            tire_friction: [1.4, 1.4],
            is_driving: false,
            is_steerable: false,
            max_steer_angle: 30.0,
            invert_torque: false,
            invert_steering: false,
            is_braking: true,
            brake_torque: 2500.0,
            rolling_resistance: 0.01,
            is_handbrake: false,
            spring_length: 25.0,
            spring_strength: 25.0,
            spring_damping: 1.0,
            locked: false,
            local_transform: Isometry::identity(),
            radius_m: 0.0,
            inertia: 0.0,
        };
        config.calculate_constants();
        config
    }
}

impl WheelConfig {
    pub fn mass(&self) -> Real {
        self.mass
    }

    /// Radius in cm, already defended against non-positive values.
    pub fn radius(&self) -> Real {
        self.radius
    }

    /// Radius in meters.
    pub fn radius_m(&self) -> Real {
        self.radius_m
    }

    /// Spin inertia in kg·m².
    pub fn inertia(&self) -> Real {
        self.inertia
    }

    pub fn set_mass(&mut self, new_mass: Real) {
        self.mass = if new_mass > 0.0 {
            new_mass
        } else {
            eprintln!("wheel config defect: mass {new_mass} <= 0, keeping 15 kg");
            15.0
        };
        self.calculate_constants();
    }

    pub fn set_radius(&mut self, new_radius: Real) {
        self.radius = if new_radius > 0.0 {
            new_radius
        } else {
            eprintln!(
                "wheel config defect: radius {new_radius} <= 0, keeping {FALLBACK_WHEEL_RADIUS} cm"
            );
            FALLBACK_WHEEL_RADIUS
        };
        self.calculate_constants();
    }

    /// Feed a measured mesh radius when `auto_radius` is set. Bad
    /// measurements fall back rather than propagate.
    pub fn set_measured_radius(&mut self, measured: Real) {
        if self.auto_radius {
            self.set_radius(if measured > 0.0 {
                measured
            } else {
                FALLBACK_WHEEL_RADIUS
            });
        }
    }

    fn calculate_constants(&mut self) {
        if !(self.radius > 0.0) {
            self.radius = FALLBACK_WHEEL_RADIUS;
        }
        self.radius_m = self.radius * 0.01;
        self.inertia = 0.5 * self.mass * self.radius_m * self.radius_m;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inertia_tracks_mass_and_radius() {
        let mut config = WheelConfig::default();
        assert!((config.inertia() - 0.5 * 15.0 * 0.3 * 0.3).abs() < 1e-6);

        config.set_mass(30.0);
        assert!((config.inertia() - 0.5 * 30.0 * 0.3 * 0.3).abs() < 1e-6);

        config.set_radius(60.0);
        assert!((config.radius_m() - 0.6).abs() < 1e-6);
        assert!((config.inertia() - 0.5 * 30.0 * 0.6 * 0.6).abs() < 1e-6);
    }

    #[test]
    fn non_positive_radius_falls_back() {
        let mut config = WheelConfig::default();
        config.set_radius(0.0);
        assert_eq!(config.radius(), FALLBACK_WHEEL_RADIUS);
        assert!(config.inertia() > 0.0);

        config.set_radius(-5.0);
        assert_eq!(config.radius(), FALLBACK_WHEEL_RADIUS);
    }

    #[test]
    fn measured_radius_only_applies_when_auto() {
        let mut config = WheelConfig::default();
        config.auto_radius = false;
        config.set_measured_radius(42.0);
        assert_eq!(config.radius(), 30.0);

        config.auto_radius = true;
        config.set_measured_radius(42.0);
        assert_eq!(config.radius(), 42.0);

        config.set_measured_radius(-1.0);
        assert_eq!(config.radius(), FALLBACK_WHEEL_RADIUS);
    }
}
