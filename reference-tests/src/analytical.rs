//! Closed-form results for a Gaussian wavepacket on the lattice.
//!
//! Units follow the engine: hbar = 1, the packet amplitude is
//! `exp(-r^2 / (2 sigma^2)) / (sigma sqrt(pi))`, so the density along each
//! axis has variance `sigma^2 / 2`. One turn advances time by `2 dt`.

/// Physical time covered by `turns` turns of quarter-turn step `dt`.
pub fn elapsed_time(turns: u32, dt: f32) -> f64 {
    2.0 * dt as f64 * turns as f64
}

/// Free Gaussian packet in the continuum limit.
///
/// The width grows as
/// ```text
/// sigma(t)^2 = sigma0^2 * (1 + (t / (m sigma0^2))^2)
/// ```
pub struct FreePacket {
    /// Initial width
    pub sigma0: f64,
    /// Particle mass
    pub mass: f64,
}

impl FreePacket {
    /// Width at time `t`.
    pub fn sigma_at(&self, t: f64) -> f64 {
        let tau = t / (self.mass * self.sigma0 * self.sigma0);
        self.sigma0 * (1.0 + tau * tau).sqrt()
    }

    /// Per-axis variance of the density at time `t`.
    pub fn variance_at(&self, t: f64) -> f64 {
        let s = self.sigma_at(t);
        0.5 * s * s
    }
}

/// Mean velocity of a packet of width `sigma` kicked to wavenumber `k0` on a
/// lattice with `E(k) = (1 - cos(k dx)) / (m dx^2)`.
///
/// Averages `sin(k dx) / (m dx)` over the packet's momentum distribution,
/// which has variance `1 / (2 sigma^2)`.
pub fn lattice_group_velocity(k0: f64, sigma: f64, mass: f64, dx: f64) -> f64 {
    let spread = dx * dx / (4.0 * sigma * sigma);
    (k0 * dx).sin() * (-spread).exp() / (mass * dx)
}

/// Harmonic well whose ground state is a Gaussian of width `sigma`.
///
/// `V(r) = m omega^2 r^2 / 2` with `omega = 1 / (m sigma^2)`.
pub struct HarmonicWell {
    /// Ground-state width
    pub sigma: f64,
    /// Particle mass
    pub mass: f64,
}

impl HarmonicWell {
    /// Angular frequency of the well.
    pub fn omega(&self) -> f64 {
        1.0 / (self.mass * self.sigma * self.sigma)
    }

    /// Potential at distance `r` from the centre.
    pub fn potential(&self, r: f64) -> f64 {
        let w = self.omega();
        0.5 * self.mass * w * w * r * r
    }

    /// Classical oscillation period.
    pub fn period(&self) -> f64 {
        2.0 * std::f64::consts::PI / self.omega()
    }
}

/// First and second moments of a density field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    /// Sum of the density times the cell area
    pub total: f64,
    /// Centroid
    pub mean: [f64; 2],
    /// Per-axis variance
    pub variance: [f64; 2],
}

impl Moments {
    /// Moments of a row-major `width x height` density with spacing `dx`.
    pub fn of(density: &[f32], width: u32, dx: f64) -> Self {
        let mut sum = 0.0f64;
        let mut first = [0.0f64; 2];
        let mut second = [0.0f64; 2];
        for (i, &rho) in density.iter().enumerate() {
            let rho = rho as f64;
            let x = (i as u32 % width) as f64 * dx;
            let y = (i as u32 / width) as f64 * dx;
            sum += rho;
            first[0] += rho * x;
            first[1] += rho * y;
            second[0] += rho * x * x;
            second[1] += rho * y * y;
        }
        if sum <= 0.0 {
            return Self { total: 0.0, mean: [0.0; 2], variance: [0.0; 2] };
        }
        let mean = [first[0] / sum, first[1] / sum];
        let variance = [second[0] / sum - mean[0] * mean[0], second[1] / sum - mean[1] * mean[1]];
        Self { total: sum * dx * dx, mean, variance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_packet_doubles_variance() {
        let packet = FreePacket { sigma0: 4.0, mass: 1.0 };
        assert_eq!(packet.sigma_at(0.0), 4.0);
        // At t = m sigma0^2 the width grows by sqrt(2).
        assert!((packet.variance_at(16.0) - 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_group_velocity_small_k() {
        let v = lattice_group_velocity(0.01, 100.0, 1.0, 1.0);
        assert!((v - 0.01).abs() < 1e-5);
    }

    #[test]
    fn test_moments_of_two_cells() {
        // Equal weight at x = 0 and x = 2 on row 1.
        let density = [0.0, 0.0, 0.0, 0.5, 0.0, 0.5];
        let m = Moments::of(&density, 3, 1.0);
        assert!((m.total - 1.0).abs() < 1e-12);
        assert_eq!(m.mean, [1.0, 1.0]);
        assert!((m.variance[0] - 1.0).abs() < 1e-12);
        assert!(m.variance[1].abs() < 1e-12);
    }

    #[test]
    fn test_harmonic_well() {
        let well = HarmonicWell { sigma: 6.0, mass: 1.0 };
        assert!((well.omega() - 1.0 / 36.0).abs() < 1e-15);
        assert!((well.potential(6.0) - 0.5 / 36.0).abs() < 1e-15);
    }
}
