// ==============================================================================
// inputs.rs — DRIVER INPUTS + STEERING SHAPING
// ------------------------------------------------------------------------------
// Raw driver inputs plus the two shaping stages the vehicle applies before the
// wheels see them: a speed-based falloff table that limits steering authority,
// and an input smoother with a separate recenter speed.
// ==============================================================================

use rapier3d::prelude::Real;

#[derive(Clone, Copy, Debug, Default)]
pub struct VehicleInputs {
    pub steering: Real, // -1.0 (left) .. 1.0 (right)
    pub throttle: Real, // 0.0 .. 1.0
    pub brake: Real,    // 0.0 .. 1.0
    pub torque: Real,   // N·m delivered to each driving wheel
    pub handbrake: bool,
    pub reverse_torque: bool,
}

/// Max steering input as a function of vehicle speed (km/h). Piecewise
/// linear, clamped to the end keys, output clamped to [0, 1].
#[derive(Clone, Debug)]
pub struct SteeringFalloff {
    points: Vec<(Real, Real)>, // (speed km/h, max steering input)
}

impl Default for SteeringFalloff {
    fn default() -> Self {
        Self::new(vec![(0.0, 1.0), (20.0, 0.8), (60.0, 0.4), (120.0, 0.3)])
    }
}

impl SteeringFalloff {
    /// Keys must strictly increase in speed; offenders are dropped.
    pub fn new(points: Vec<(Real, Real)>) -> Self {
        let mut kept: Vec<(Real, Real)> = Vec::with_capacity(points.len());
        for (speed, value) in points {
            match kept.last() {
                Some(&(prev, _)) if speed <= prev => {
                    eprintln!("steering falloff key {speed} not increasing, dropped");
                }
                _ => kept.push((speed, value)),
            }
        }
        Self { points: kept }
    }

    pub fn eval(&self, speed: Real) -> Real {
        let Some(&(first_speed, first_value)) = self.points.first() else {
            return 1.0;
        };
        if speed <= first_speed {
            return first_value.clamp(0.0, 1.0);
        }
        for pair in self.points.windows(2) {
            let (s0, v0) = pair[0];
            let (s1, v1) = pair[1];
            if speed <= s1 {
                let t = (speed - s0) / (s1 - s0);
                return (v0 + (v1 - v0) * t).clamp(0.0, 1.0);
            }
        }
        self.points.last().map(|&(_, v)| v).unwrap_or(1.0).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SteeringSmoothing {
    Instant,
    Constant,
    Ease,
}

/// Returns true if the newer value is moving towards zero.
pub fn is_toward_zero(old: Real, new: Real) -> bool {
    old.abs() > new.abs()
}

/// Smoothed steering input state, one per vehicle.
#[derive(Clone, Copy, Debug)]
pub struct SteeringState {
    pub mode: SteeringSmoothing,
    pub speed: Real,          // higher = faster
    pub recenter_speed: Real, // used when the input heads back to zero
    pub current: Real,
}

impl Default for SteeringState {
    fn default() -> Self {
        Self {
            mode: SteeringSmoothing::Ease,
            speed: 2.5,
            recenter_speed: 2.5,
            current: 0.0,
        }
    }
}

impl SteeringState {
    pub fn advance(&mut self, target: Real, dt: Real) -> Real {
        let speed = if is_toward_zero(self.current, target) {
            self.recenter_speed
        } else {
            self.speed
        };
        self.current = match self.mode {
            SteeringSmoothing::Instant => target,
            SteeringSmoothing::Constant => {
                let step = speed * dt;
                let delta = target - self.current;
                if delta.abs() <= step {
                    target
                } else {
                    self.current + delta.signum() * step
                }
            }
            SteeringSmoothing::Ease => {
                self.current + (target - self.current) * (dt * speed).clamp(0.0, 1.0)
            }
        };
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falloff_interpolates_between_keys() {
        let falloff = SteeringFalloff::default();
        assert_eq!(falloff.eval(0.0), 1.0);
        assert_eq!(falloff.eval(20.0), 0.8);
        assert!((falloff.eval(40.0) - 0.6).abs() < 1e-6);
        assert_eq!(falloff.eval(120.0), 0.3);
    }

    #[test]
    fn falloff_clamps_outside_keys() {
        let falloff = SteeringFalloff::default();
        assert_eq!(falloff.eval(-10.0), 1.0);
        assert_eq!(falloff.eval(500.0), 0.3);
    }

    #[test]
    fn falloff_drops_non_monotonic_keys() {
        let falloff = SteeringFalloff::new(vec![(0.0, 2.0), (10.0, 0.5), (5.0, 0.9)]);
        assert_eq!(falloff.eval(0.0), 1.0); // output clamp
        assert_eq!(falloff.eval(100.0), 0.5); // bad key dropped
    }

    #[test]
    fn toward_zero_detection() {
        assert!(is_toward_zero(-0.8, -0.2));
        assert!(is_toward_zero(0.8, 0.2));
        assert!(!is_toward_zero(0.2, 0.8));
        assert!(!is_toward_zero(0.0, 0.0));
    }

    #[test]
    fn constant_smoothing_never_overshoots() {
        let mut state = SteeringState {
            mode: SteeringSmoothing::Constant,
            speed: 2.0,
            recenter_speed: 2.0,
            current: 0.0,
        };
        let value = state.advance(1.0, 0.1);
        assert!((value - 0.2).abs() < 1e-6);
        for _ in 0..20 {
            state.advance(1.0, 0.1);
        }
        assert_eq!(state.current, 1.0);
    }

    #[test]
    fn recenter_speed_used_toward_zero() {
        let mut state = SteeringState {
            mode: SteeringSmoothing::Constant,
            speed: 1.0,
            recenter_speed: 5.0,
            current: 1.0,
        };
        state.advance(0.0, 0.1);
        assert!((state.current - 0.5).abs() < 1e-6);
    }

    #[test]
    fn instant_smoothing_passes_through() {
        let mut state = SteeringState {
            mode: SteeringSmoothing::Instant,
            ..Default::default()
        };
        assert_eq!(state.advance(-0.7, 0.016), -0.7);
    }
}
