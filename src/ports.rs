// ==============================================================================
// ports.rs — EXTERNAL COLLABORATOR INTERFACES (RAY QUERY + RIGID BODY)
// ------------------------------------------------------------------------------
// The wheel simulation never talks to a physics engine directly. It consumes
// two narrow ports:
// - RayQueryPort: a synchronous segment cast returning hit geometry + friction
// - RigidBodyPort: chassis/wheel body kinematics reads + force/torque writes
//
// physics.rs provides the rapier3d-backed implementations; tests provide flat
// ground + recording bodies.
// ==============================================================================

use rapier3d::prelude::{Isometry, Point, Real, Vector};

/// Result of a suspension ray cast.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    /// Distance from the segment start to the hit, in cm.
    pub distance: Real,
    /// Surface friction coefficient of the hit material.
    pub friction: Real,
}

/// Synchronous world ray query. Must be safe to call from the simulation
/// context every wheel every step.
pub trait RayQueryPort {
    fn cast(&self, start: Point<Real>, end: Point<Real>) -> Option<RayHit>;
}

/// Rigid body access for one body (chassis or a physics-mode wheel).
///
/// Mutating calls take effect before the next step reads state; an
/// implementation may buffer them and flush after the wheel loop, which is
/// how the rapier glue avoids aliasing the body set mid-iteration.
pub trait RigidBodyPort {
    fn transform(&self) -> Isometry<Real>;
    fn center_of_mass(&self) -> Point<Real>;
    fn linear_velocity(&self) -> Vector<Real>;
    fn angular_velocity(&self) -> Vector<Real>;
    /// v(p) = v_com + ω × (p - com)
    fn velocity_at_point(&self, point: Point<Real>) -> Vector<Real> {
        let r = point - self.center_of_mass();
        self.linear_velocity() + self.angular_velocity().cross(&r)
    }
    /// Mass in kg.
    fn mass(&self) -> Real;
    /// Gravity magnitude in cm/s².
    fn gravity(&self) -> Real;
    /// False while the body is asleep or kinematic; the simulation step
    /// skips entirely in that case.
    fn is_active(&self) -> bool;

    fn add_force_at_point(&mut self, point: Point<Real>, force: Vector<Real>);
    fn add_force(&mut self, force: Vector<Real>);
    fn add_torque(&mut self, torque: Vector<Real>);
    fn set_velocities(&mut self, linear: Vector<Real>, angular: Vector<Real>);
}
