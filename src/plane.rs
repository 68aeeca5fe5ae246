//! Sampling the complex plane on a pixel grid.

use std::ops::Deref;

use bytemuck::{Pod, Zeroable};

use crate::{
    config::{self, Bounds, Size},
    error::Result,
};

/// Matches `phoenix.wgsl#Complex`.
#[repr(C)]
#[derive(Pod, Zeroable, Clone, Copy, Debug, PartialEq)]
pub struct Complex {
    pub real: f32,
    pub imaginary: f32,
}

impl Complex {
    pub const ZERO: Self = Complex {
        real: 0.0,
        imaginary: 0.0,
    };

    pub fn new(real: f32, imaginary: f32) -> Self {
        Self { real, imaginary }
    }
}

/// Row-major sample points: the point for pixel `(col, row)` is at `row * width + col`.
#[derive(Debug)]
pub struct SampleGrid {
    size: Size,
    points: Vec<Complex>,
}

impl SampleGrid {
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn get(&self, col: u32, row: u32) -> Option<Complex> {
        if col >= self.size.width || row >= self.size.height {
            return None;
        }
        self.points
            .get(row as usize * self.size.width as usize + col as usize)
            .copied()
    }
}

impl Deref for SampleGrid {
    type Target = [Complex];

    fn deref(&self) -> &Self::Target {
        &self.points
    }
}

/// `steps` evenly spaced values from `min` to `max`, with both ends exact.
fn axis(min: f32, max: f32, steps: u32) -> Vec<f32> {
    let last = steps - 1;
    (0..steps)
        .map(|step| {
            if step == last {
                max
            } else {
                min + (max - min) * step as f32 / last as f32
            }
        })
        .collect()
}

pub fn generate(size: Size, bounds: &Bounds) -> Result<SampleGrid> {
    config::validate_size(size)?;
    config::validate_bounds(bounds)?;

    let xs = axis(bounds.min_x, bounds.max_x, size.width);
    let ys = axis(bounds.min_y, bounds.max_y, size.height);

    let mut points = Vec::with_capacity(size.sample_count());
    for &imaginary in &ys {
        points.extend(xs.iter().map(|&real| Complex { real, imaginary }));
    }
    debug_assert_eq!(points.len(), size.sample_count());

    Ok(SampleGrid { size, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, error::Error};

    fn reference() -> SampleGrid {
        let config = Config::default();
        generate(config.size, &config.bounds).unwrap()
    }

    #[test]
    fn grid_has_one_point_per_pixel() {
        let grid = reference();
        assert_eq!(grid.len(), 1024 * 1024);
        assert_eq!(grid.size(), Config::default().size);
    }

    #[test]
    fn corners_map_exactly_to_bounds() {
        let grid = reference();
        let bounds = Config::default().bounds;
        assert_eq!(
            grid.get(0, 0),
            Some(Complex::new(bounds.min_x, bounds.min_y))
        );
        assert_eq!(
            grid.get(1023, 1023),
            Some(Complex::new(bounds.max_x, bounds.max_y))
        );
        assert_eq!(grid.get(1024, 0), None);
    }

    #[test]
    fn axes_are_strictly_increasing() {
        let grid = reference();
        for row in [0, 511, 1023] {
            for col in 1..1024 {
                let previous = grid.get(col - 1, row).unwrap();
                let current = grid.get(col, row).unwrap();
                assert!(current.real > previous.real, "col {} row {}", col, row);
                assert_eq!(current.imaginary, previous.imaginary);
            }
        }
        for col in [0, 700, 1023] {
            for row in 1..1024 {
                let previous = grid.get(col, row - 1).unwrap();
                let current = grid.get(col, row).unwrap();
                assert!(current.imaginary > previous.imaginary);
                assert_eq!(current.real, previous.real);
            }
        }
    }

    #[test]
    fn row_major_layout() {
        let bounds = Bounds {
            min_x: 0.0,
            max_x: 2.0,
            min_y: 0.0,
            max_y: 1.0,
        };
        let grid = generate(
            Size {
                width: 3,
                height: 2,
            },
            &bounds,
        )
        .unwrap();
        let expected = [
            Complex::new(0.0, 0.0),
            Complex::new(1.0, 0.0),
            Complex::new(2.0, 0.0),
            Complex::new(0.0, 1.0),
            Complex::new(1.0, 1.0),
            Complex::new(2.0, 1.0),
        ];
        assert_eq!(&*grid, &expected[..]);
    }

    #[test]
    fn degenerate_dimensions_are_rejected() {
        let bounds = Config::default().bounds;
        for (width, height) in [(1, 1024), (1024, 1), (0, 5), (1, 1)] {
            let result = generate(Size { width, height }, &bounds);
            assert!(
                matches!(result, Err(Error::InvalidDimension { .. })),
                "{}x{} should be rejected",
                width,
                height
            );
        }
    }
}
