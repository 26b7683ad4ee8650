//! Pyramid shapes.
//!
//! Two shapes exist and they are not interchangeable:
//!
//! - **Ceil**: odd dimensions are padded up to even before halving and the
//!   last level is exactly 1x1. Used for sum reductions, where zero padding
//!   is harmless.
//! - **Roof**: `next = prev/2 + 1` per axis, last level exactly 2x2. Level
//!   `L+1` node `I` sits on level `L` node `2I`, so the coarse grid keeps a
//!   node on (or one past) each fine edge. Used for the line-integral pyramid.

use crate::device::{BufferId, ComputeDevice, Format};
use crate::error::EngineError;

/// Hard cap on pyramid depth.
pub const MAX_LEVELS: usize = 32;

/// Pyramid shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidShape {
    /// Even-padded sum pyramid terminating at 1x1.
    Ceil,
    /// Line-integral pyramid terminating at 2x2.
    Roof,
}

/// Dimensions of one level: allocated (padded) size and logical data size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDims {
    /// Allocated width.
    pub buffer_width: u32,
    /// Allocated height.
    pub buffer_height: u32,
    /// Logical width.
    pub data_width: u32,
    /// Logical height.
    pub data_height: u32,
}

impl LevelDims {
    fn unpadded(width: u32, height: u32) -> Self {
        Self { buffer_width: width, buffer_height: height, data_width: width, data_height: height }
    }
}

fn round_up_even(n: u32) -> u32 {
    n + (n & 1)
}

/// Level dimensions of a ceil pyramid over a `width x height` base.
pub fn ceil_levels(width: u32, height: u32) -> Result<Vec<LevelDims>, EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidGrid(format!(
            "ceil pyramid needs a non-empty base, got {}x{}",
            width, height
        )));
    }
    let mut levels = Vec::new();
    let (mut w, mut h) = (width, height);
    loop {
        if levels.len() == MAX_LEVELS {
            return Err(EngineError::InvalidGrid(format!(
                "ceil pyramid over {}x{} exceeds {} levels",
                width, height, MAX_LEVELS
            )));
        }
        if w == 1 && h == 1 {
            levels.push(LevelDims::unpadded(1, 1));
            return Ok(levels);
        }
        levels.push(LevelDims {
            buffer_width: round_up_even(w),
            buffer_height: round_up_even(h),
            data_width: w,
            data_height: h,
        });
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
}

/// Level dimensions of a roof pyramid over a `width x height` node grid.
pub fn roof_levels(width: u32, height: u32) -> Result<Vec<LevelDims>, EngineError> {
    if width < 2 || height < 2 {
        return Err(EngineError::InvalidGrid(format!(
            "roof pyramid needs at least 2x2 nodes, got {}x{}",
            width, height
        )));
    }
    let mut levels = Vec::new();
    let (mut w, mut h) = (width, height);
    loop {
        if levels.len() == MAX_LEVELS {
            return Err(EngineError::InvalidGrid(format!(
                "roof pyramid over {}x{} exceeds {} levels",
                width, height, MAX_LEVELS
            )));
        }
        levels.push(LevelDims::unpadded(w, h));
        if w <= 2 && h <= 2 {
            return Ok(levels);
        }
        // 2 is a fixed point of n/2 + 1, so a finished axis stays at 2.
        w = w / 2 + 1;
        h = h / 2 + 1;
    }
}

/// Extent a full-resolution buffer needs so every roof node of every level,
/// placed at `(I * 2^L, J * 2^L)`, has a cell.
pub fn roof_extent(levels: &[LevelDims]) -> (u32, u32) {
    levels.iter().enumerate().fold((0, 0), |(ew, eh), (i, dims)| {
        let scale = 1u32 << i;
        (
            ew.max((dims.data_width - 1) * scale + 1),
            eh.max((dims.data_height - 1) * scale + 1),
        )
    })
}

/// A pyramid level with its device buffer.
#[derive(Debug, Clone, Copy)]
pub struct Level {
    /// Level dimensions.
    pub dims: LevelDims,
    /// Device buffer, allocated at `buffer_width x buffer_height`.
    pub buffer: BufferId,
}

/// A pyramid allocated on a device. Level count is fixed at construction.
#[derive(Debug, Clone)]
pub struct Pyramid {
    shape: PyramidShape,
    format: Format,
    levels: Vec<Level>,
}

impl Pyramid {
    /// Allocate every level. Fails on the first buffer that cannot be created.
    pub fn allocate(
        device: &mut dyn ComputeDevice,
        label: &str,
        shape: PyramidShape,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Self, EngineError> {
        let dims = match shape {
            PyramidShape::Ceil => ceil_levels(width, height)?,
            PyramidShape::Roof => roof_levels(width, height)?,
        };
        let mut levels = Vec::with_capacity(dims.len());
        for (i, d) in dims.into_iter().enumerate() {
            let buffer = device.create_buffer(
                &format!("{}[{}]", label, i),
                d.buffer_width,
                d.buffer_height,
                format,
            )?;
            levels.push(Level { dims: d, buffer });
        }
        tracing::debug!("Allocated {:?} pyramid '{}' with {} levels", shape, label, levels.len());
        Ok(Self { shape, format, levels })
    }

    /// Pyramid shape.
    pub fn shape(&self) -> PyramidShape {
        self.shape
    }

    /// Channel format of every level.
    pub fn format(&self) -> Format {
        self.format
    }

    /// All levels, finest first.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always false; a pyramid has at least one level.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level `i`.
    pub fn level(&self, i: usize) -> &Level {
        &self.levels[i]
    }

    /// Base level.
    pub fn base(&self) -> &Level {
        &self.levels[0]
    }

    /// Coarsest level.
    pub fn top(&self) -> &Level {
        &self.levels[self.levels.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_pyramid_terminates_at_one() {
        for w in 1..70u32 {
            for h in [1u32, 2, 3, 17, 64, 65] {
                let levels = ceil_levels(w, h).unwrap();
                let last = levels.last().unwrap();
                assert_eq!((last.data_width, last.data_height), (1, 1));
                assert_eq!((last.buffer_width, last.buffer_height), (1, 1));

                for pair in levels.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    assert!(a.data_width.max(a.data_height) > b.data_width.max(b.data_height));
                    assert!(b.data_width <= a.data_width && b.data_height <= a.data_height);
                }
                for level in &levels[..levels.len() - 1] {
                    assert_eq!(level.buffer_width, round_up_even(level.data_width));
                    assert_eq!(level.buffer_height, round_up_even(level.data_height));
                }
            }
        }
    }

    #[test]
    fn test_ceil_pyramid_386x257() {
        let levels = ceil_levels(386, 257).unwrap();
        assert_eq!((levels[0].buffer_width, levels[0].buffer_height), (386, 258));
        assert_eq!((levels[1].data_width, levels[1].data_height), (193, 129));
        assert_eq!((levels[1].buffer_width, levels[1].buffer_height), (194, 130));
        assert_eq!(levels.len(), 10);
    }

    #[test]
    fn test_roof_pyramid_terminates_at_two() {
        for w in 2..80u32 {
            for h in [2u32, 3, 4, 5, 33, 257] {
                let levels = roof_levels(w, h).unwrap();
                let last = levels.last().unwrap();
                assert_eq!((last.data_width, last.data_height), (2, 2));
                for pair in levels.windows(2) {
                    assert_eq!(pair[1].data_width, pair[0].data_width / 2 + 1);
                    assert_eq!(pair[1].data_height, pair[0].data_height / 2 + 1);
                }
                assert!(levels.iter().all(|l| l.data_width >= 2 && l.data_height >= 2));
            }
        }
    }

    #[test]
    fn test_roof_pyramid_386_dims_and_extent() {
        let levels = roof_levels(386, 257).unwrap();
        let widths: Vec<u32> = levels.iter().map(|l| l.data_width).collect();
        assert_eq!(widths, vec![386, 194, 98, 50, 26, 14, 8, 5, 3, 2]);
        let heights: Vec<u32> = levels.iter().map(|l| l.data_height).collect();
        assert_eq!(heights, vec![257, 129, 65, 33, 17, 9, 5, 3, 2, 2]);
        assert_eq!(roof_extent(&levels), (513, 513));
    }

    #[test]
    fn test_roof_rejects_thin_grid() {
        assert!(roof_levels(1, 10).is_err());
        assert!(roof_levels(10, 1).is_err());
    }
}
