//! Drag potential from the line-integral pyramid.
//!
//! Level 0 holds, per node, the line integrals of the probability current
//! along the edges to its +x and +y neighbours. Each coarser roof level sums
//! pairs of edges into one longer edge, so its nodes form the same kind of
//! lattice at twice the spacing. The 2x2 top is made curl-free and seeded
//! with four potentials, which are then pushed back down level by level: a
//! node between two known nodes takes the average of the forward and
//! backward predictions along its edge.
//!
//! Every pass here is a storage pass and is followed by a barrier.

use crate::device::{BufferId, ComputeDevice, Format, Pass};
use crate::error::EngineError;
use crate::grid::GridSpec;
use crate::pyramid::{roof_extent, Pyramid, PyramidShape};

/// Builds the drag-potential buffer once per turn.
#[derive(Debug, Clone)]
pub struct DragPotentialPipeline {
    lip: Pyramid,
    drag: BufferId,
    extent: (u32, u32),
    coefficient: f32,
}

impl DragPotentialPipeline {
    /// Allocate the roof pyramid and a drag buffer large enough for every roof node.
    pub fn new(device: &mut dyn ComputeDevice, grid: &GridSpec, drag: f32) -> Result<Self, EngineError> {
        let lip = Pyramid::allocate(device, "lip", PyramidShape::Roof, grid.width, grid.height, Format::RG32F)?;
        let dims: Vec<_> = lip.levels().iter().map(|l| l.dims).collect();
        let extent = roof_extent(&dims);
        let drag_buffer = device.create_buffer("drag_potential", extent.0, extent.1, Format::R32F)?;
        tracing::debug!(
            "LIP with {} levels over {}x{}, drag extent {}x{}",
            lip.len(),
            grid.width,
            grid.height,
            extent.0,
            extent.1
        );
        Ok(Self { lip, drag: drag_buffer, extent, coefficient: drag / grid.mass })
    }

    /// The drag potential buffer. Only `[0, W) x [0, H)` is physically meaningful.
    pub fn drag_potential(&self) -> BufferId {
        self.drag
    }

    /// Allocated size of the drag buffer.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// The line-integral pyramid.
    pub fn pyramid(&self) -> &Pyramid {
        &self.lip
    }

    /// `drag / mass`.
    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }

    /// Zero the drag potential.
    pub fn clear(&self, device: &mut dyn ComputeDevice) {
        device.dispatch(&Pass::Fill { dst: self.drag, value: [0.0, 0.0] }, [self.extent.0, self.extent.1]);
    }

    /// Rebuild the drag potential from the two most recent field buffers.
    pub fn update(&self, device: &mut dyn ComputeDevice, cur: BufferId, prev: BufferId) {
        let levels = self.lip.levels();
        let base = levels[0].dims;

        device.dispatch(
            &Pass::LipInit { cur, prev, dst: levels[0].buffer, coefficient: self.coefficient },
            [base.data_width, base.data_height],
        );
        device.barrier();

        for pair in levels.windows(2) {
            let dst = pair[1].dims;
            device.dispatch(
                &Pass::LipBuild { src: pair[0].buffer, dst: pair[1].buffer },
                [dst.data_width, dst.data_height],
            );
            device.barrier();
        }

        let top = levels.len() - 1;
        device.dispatch(&Pass::LipKiss { top: levels[top].buffer, drag: self.drag, scale: 1 << top }, [1, 1]);
        device.barrier();

        for i in (0..top).rev() {
            let fine = levels[i].dims;
            let coarse = levels[i + 1].dims;
            let scale = 1u32 << i;

            // Odd columns on even rows, including the roof row past the edge.
            let x_grid = [coarse.data_width - 1, coarse.data_height];
            if x_grid[0] > 0 && x_grid[1] > 0 {
                device.dispatch(&Pass::LipIntegrateX { lip: levels[i].buffer, drag: self.drag, scale }, x_grid);
                device.barrier();
            }

            let y_grid = [fine.data_width, coarse.data_height - 1];
            if y_grid[0] > 0 && y_grid[1] > 0 {
                device.dispatch(&Pass::LipIntegrateY { lip: levels[i].buffer, drag: self.drag, scale }, y_grid);
                device.barrier();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;

    fn plane_wave_state(w: u32, h: u32, k: f32) -> (Vec<f32>, Vec<f32>) {
        let mut cur = vec![0.0f32; (w * h * 2) as usize];
        let mut prev = vec![0.0f32; (w * h * 2) as usize];
        for y in 0..h {
            for x in 0..w {
                let i = ((y * w + x) * 2) as usize;
                let theta = k * x as f32;
                cur[i] = theta.cos();
                cur[i + 1] = theta.sin();
                prev[i + 1] = theta.cos();
            }
        }
        (cur, prev)
    }

    fn drag_for(k: f32) -> (Vec<f32>, f32) {
        let mut device = CpuDevice::new();
        let grid = GridSpec::new(33, 33, 1.0, 1.0).unwrap();
        let lip = DragPotentialPipeline::new(&mut device, &grid, 2.0).unwrap();
        assert_eq!(lip.extent(), (33, 33));

        let cur = device.create_buffer("cur", 33, 33, Format::RG32F).unwrap();
        let prev = device.create_buffer("prev", 33, 33, Format::RG32F).unwrap();
        let (c, p) = plane_wave_state(33, 33, k);
        device.write_buffer(cur, &c).unwrap();
        device.write_buffer(prev, &p).unwrap();

        lip.update(&mut device, cur, prev);
        assert!(device.poll_errors().is_empty());
        let drag = device.read_region(lip.drag_potential(), [0, 0], [33, 33]).unwrap();
        (drag, lip.coefficient() * k.sin())
    }

    #[test]
    fn test_plane_wave_drag_rises_along_current() {
        let (drag, slope) = drag_for(0.3);
        assert!(slope > 0.0);
        for y in 0..33usize {
            for x in 0..32usize {
                let d = drag[y * 33 + x + 1] - drag[y * 33 + x];
                assert!((d - slope).abs() < 1e-4, "({}, {}): {} vs {}", x, y, d, slope);
            }
        }
    }

    #[test]
    fn test_no_current_no_drag() {
        let (drag, _) = drag_for(0.0);
        assert!(drag.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_update_fences_every_storage_pass() {
        let mut device = CpuDevice::new();
        let grid = GridSpec::new(386, 257, 1.0, 1.0).unwrap();
        let lip = DragPotentialPipeline::new(&mut device, &grid, 4.0).unwrap();
        assert_eq!(lip.extent(), (513, 513));
        let cur = device.create_buffer("cur", 386, 257, Format::RG32F).unwrap();
        let prev = device.create_buffer("prev", 386, 257, Format::RG32F).unwrap();
        lip.update(&mut device, cur, prev);
        assert!(device.poll_errors().is_empty());
    }
}
