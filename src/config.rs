//! Render configuration.

use std::path::PathBuf;

use crate::{
    bitmap,
    error::{Error, Result},
    kernel::KernelParams,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// The rectangle of the complex plane sampled by the grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

/// Which class of adapter the GPU backend is allowed to pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicePreference {
    /// Discrete, integrated or virtual GPUs. CPU and unclassified adapters are skipped.
    Gpu,
    /// Any adapter wgpu reports, including software rasterizers.
    Any,
}

/// What to do when the GPU backend finds no matching adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// Fail with `NoDeviceAvailable`.
    None,
    /// Evaluate the kernel on the host with rayon.
    Host,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub size: Size,
    pub bounds: Bounds,
    pub kernel: KernelParams,
    pub device: DevicePreference,
    pub fallback: Fallback,
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: Size {
                width: 1024,
                height: 1024,
            },
            bounds: Bounds {
                min_x: -1.5,
                max_x: 5.5,
                min_y: -1.2,
                max_y: 1.2,
            },
            kernel: KernelParams::default(),
            device: DevicePreference::Gpu,
            fallback: Fallback::None,
            output: PathBuf::from("phoenix_curve.bmp"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        validate_size(self.size)?;
        validate_bounds(&self.bounds)?;
        if self.kernel.max_iterations == 0 {
            return Err(Error::InvalidIterationBound);
        }
        Ok(())
    }
}

/// At least 2x2, and small enough for the bitmap's 32-bit size fields.
pub fn validate_size(size: Size) -> Result<()> {
    if size.width <= 1 || size.height <= 1 {
        return Err(Error::InvalidDimension {
            width: size.width,
            height: size.height,
        });
    }
    bitmap::check_dimensions(size.width, size.height)
}

pub fn validate_bounds(bounds: &Bounds) -> Result<()> {
    let Bounds {
        min_x,
        max_x,
        min_y,
        max_y,
    } = *bounds;

    if ![min_x, max_x, min_y, max_y].iter().all(|bound| bound.is_finite()) {
        return Err(Error::InvalidBounds(format!("{:?} is not finite", bounds)));
    }
    if min_x >= max_x {
        return Err(Error::InvalidBounds(format!(
            "min_x ({}) must be less than max_x ({})",
            min_x, max_x
        )));
    }
    if min_y >= max_y {
        return Err(Error::InvalidBounds(format!(
            "min_y ({}) must be less than max_y ({})",
            min_y, max_y
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_the_reference_configuration() {
        let config = Config::default();
        assert_eq!(config.size.sample_count(), 1_048_576);
        assert_eq!(config.kernel.max_iterations, 128);
        assert_eq!(config.output, PathBuf::from("phoenix_curve.bmp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let mut config = Config::default();
        config.kernel.max_iterations = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidIterationBound)
        ));
    }

    #[test]
    fn sizes_the_bitmap_cannot_hold_are_rejected() {
        let mut config = Config::default();
        config.size = Size {
            width: 40_000,
            height: 40_000,
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidDimension {
                width: 40_000,
                height: 40_000
            })
        ));
    }

    #[test]
    fn inverted_or_non_finite_bounds_are_rejected() {
        let mut bounds = Config::default().bounds;
        bounds.min_x = bounds.max_x;
        assert!(matches!(
            validate_bounds(&bounds),
            Err(Error::InvalidBounds(_))
        ));

        let mut bounds = Config::default().bounds;
        bounds.max_y = f32::NAN;
        assert!(matches!(
            validate_bounds(&bounds),
            Err(Error::InvalidBounds(_))
        ));
    }
}
