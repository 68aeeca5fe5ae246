//! The Phoenix escape-time kernel.
//!
//! The same recurrence exists twice: as the WGSL entry point in `phoenix.wgsl`, which the GPU
//! backend compiles, and as [`escape_time`], which the host backend runs. Both evaluate in `f32`
//! and in the same operation order.

use bytemuck::{Pod, Zeroable};

use crate::plane::Complex;

pub const PHOENIX_ENTRY_POINT: &str = "phoenix";

/// Coefficients of `z' = (x² + a·y + b, x)` and the escape test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelParams {
    pub max_iterations: u32,
    pub a: f32,
    pub b: f32,
    pub escape_radius: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            max_iterations: 128,
            a: -0.5,
            b: 0.56667,
            escape_radius: 2.0,
        }
    }
}

impl KernelParams {
    pub fn to_uniform(&self) -> Parameters {
        Parameters {
            max_iterations: self.max_iterations,
            a: self.a,
            b: self.b,
            escape_radius_squared: self.escape_radius * self.escape_radius,
        }
    }
}

/// [`bytemuck`]-compatible mirror of `phoenix.wgsl#Parameters`.
#[repr(C)]
#[derive(Pod, Zeroable, Clone, Copy, Debug)]
pub struct Parameters {
    pub max_iterations: u32,
    pub a: f32,
    pub b: f32,
    pub escape_radius_squared: f32,
}

/// A compute program: source text plus the name of the entry point to run.
#[derive(Clone, Debug)]
pub struct KernelSource {
    pub label: &'static str,
    pub wgsl: &'static str,
    pub entry_point: &'static str,
}

impl KernelSource {
    pub fn phoenix() -> Self {
        Self {
            label: "phoenix",
            wgsl: include_str!("phoenix.wgsl"),
            entry_point: PHOENIX_ENTRY_POINT,
        }
    }
}

/// Number of steps before the orbit of `start` leaves the escape radius, or
/// `params.max_iterations` if it never does.
pub fn escape_time(start: Complex, params: &KernelParams) -> u32 {
    let escape_radius_squared = params.escape_radius * params.escape_radius;
    let mut z = start;

    for iteration in 0..params.max_iterations {
        z = Complex {
            real: z.real * z.real + z.imaginary * params.a + params.b,
            imaginary: z.real,
        };

        if z.real * z.real + z.imaginary * z.imaginary > escape_radius_squared {
            return iteration;
        }
    }

    params.max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diverging_point_escapes_immediately() {
        let params = KernelParams::default();
        // 2² + 0.56667 is already past the radius.
        assert_eq!(escape_time(Complex::new(2.0, 0.0), &params), 0);
        assert!(escape_time(Complex::new(5.5, 1.2), &params) < params.max_iterations);
    }

    #[test]
    fn origin_escapes_after_a_few_steps() {
        // (0, 0) -> (0.56667, 0) -> (0.888, 0.567) -> (1.072, 0.888) -> (1.272, 1.072) -> out
        assert_eq!(escape_time(Complex::ZERO, &KernelParams::default()), 4);
    }

    #[test]
    fn bounded_orbit_reaches_the_iteration_bound() {
        // With b = 0 the origin is a fixed point of the recurrence.
        let params = KernelParams {
            b: 0.0,
            ..KernelParams::default()
        };
        assert_eq!(escape_time(Complex::ZERO, &params), params.max_iterations);
    }

    #[test]
    fn result_never_exceeds_the_bound() {
        let params = KernelParams {
            max_iterations: 3,
            b: 0.0,
            ..KernelParams::default()
        };
        for point in [
            Complex::ZERO,
            Complex::new(0.1, -0.1),
            Complex::new(1.9, 0.0),
            Complex::new(-3.0, 3.0),
        ] {
            assert!(escape_time(point, &params) <= 3);
        }
    }

    #[test]
    fn uniform_carries_squared_radius() {
        let uniform = KernelParams::default().to_uniform();
        assert_eq!(uniform.escape_radius_squared, 4.0);
        assert_eq!(uniform.max_iterations, 128);
        assert_eq!(std::mem::size_of::<Parameters>(), 16);
    }

    #[test]
    fn shader_declares_the_entry_point() {
        let source = KernelSource::phoenix();
        assert!(source
            .wgsl
            .contains(&format!("fn {}(", source.entry_point)));
    }
}
