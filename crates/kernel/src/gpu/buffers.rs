//! GPU buffer management for the wavefield passes.
//!
//! Every simulation buffer is a flat `array<f32>` storage buffer with the
//! 2D layout kept on the host side. Staging buffers track an in-flight
//! `map_async` through a channel so readiness can be polled without waiting.

use std::sync::mpsc;

use crate::device::{Format, Pass};

/// Per-dispatch uniform block.
/// Must match the `Params` struct in `shaders/wavefield.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPassParams {
    /// Allocated size of the target (binding 5).
    pub out_size: [u32; 2],
    /// Allocated size of the primary input (binding 1).
    pub in_size: [u32; 2],
    /// Secondary size: drag extent for the stepper, data size for reductions.
    pub aux_size: [u32; 2],
    /// Invocation extent.
    pub grid: [u32; 2],
    /// Node spacing for line-integral passes.
    pub scale: u32,
    /// Channels of the target.
    pub channels: u32,
    /// Padding.
    pub _pad: [u32; 2],
    /// Per-pass floats.
    pub fa: [f32; 4],
    /// More per-pass floats.
    pub fb: [f32; 4],
}

/// A storage buffer and its 2D shape.
pub(crate) struct DeviceBuffer {
    pub buffer: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

impl DeviceBuffer {
    pub fn size(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn byte_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.channels() as u64 * 4
    }
}

/// Shapes a pass needs beyond its own parameters.
pub(crate) struct PassShapes {
    pub out: [u32; 2],
    pub out_channels: u32,
    pub first_input: [u32; 2],
    pub drag: [u32; 2],
}

/// Pack a pass into the uniform block.
pub(crate) fn pass_params(pass: &Pass, grid: [u32; 2], shapes: &PassShapes) -> GpuPassParams {
    let mut params = GpuPassParams {
        out_size: shapes.out,
        in_size: shapes.first_input,
        grid,
        channels: shapes.out_channels,
        ..Default::default()
    };
    match *pass {
        Pass::Fill { value, .. } => params.fa = [value[0], value[1], 0.0, 0.0],
        Pass::Gaussian { center, sigma, amplitude, dx, .. } => {
            params.fa = [center[0], center[1], sigma, amplitude];
            params.fb[0] = dx;
        }
        Pass::QuarterTurn { dt, four_m_dx2, .. } => {
            params.aux_size = shapes.drag;
            params.fa = [dt, four_m_dx2, 0.0, 0.0];
        }
        Pass::ReduceSum { src_data, .. } => params.aux_size = src_data,
        Pass::LipInit { coefficient, .. } => params.fa[0] = coefficient,
        Pass::LipKiss { scale, .. } | Pass::LipIntegrateX { scale, .. } | Pass::LipIntegrateY { scale, .. } => {
            params.scale = scale
        }
        Pass::Kick { origin, radius, momentum, phase, dx, .. } => {
            params.fa = [origin[0], origin[1], radius.max(0.0), phase];
            params.fb = [momentum[0], momentum[1], dx, 0.0];
        }
        Pass::PlaneWave { momentum, dx, .. } => params.fb = [momentum[0], momentum[1], dx, 0.0],
        Pass::Density { .. } | Pass::Overlap { .. } | Pass::ComplexMul { .. } | Pass::LipBuild { .. } => {}
    }
    params
}

#[derive(Debug, PartialEq)]
pub(crate) enum ReadyState {
    Ready,
    Pending,
    Failed,
}

/// A mappable copy target with async map tracking.
pub(crate) struct StagingBuffer {
    buffer: wgpu::Buffer,
    rx: Option<mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
}

impl StagingBuffer {
    pub fn new(device: &wgpu::Device, label: &str, size: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size.max(4),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            rx: None,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Only valid once the copy into this buffer has been submitted.
    pub fn start_map(&mut self) {
        let (tx, rx) = mpsc::channel();
        self.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.rx = Some(rx);
    }

    pub fn is_mapping(&self) -> bool {
        self.rx.is_some()
    }

    pub fn check_ready(&mut self) -> ReadyState {
        let Some(receiver) = &self.rx else {
            return ReadyState::Pending;
        };
        match receiver.try_recv() {
            Ok(Ok(())) => {
                self.rx = None;
                ReadyState::Ready
            }
            Ok(Err(_)) | Err(mpsc::TryRecvError::Disconnected) => {
                self.rx = None;
                ReadyState::Failed
            }
            Err(mpsc::TryRecvError::Empty) => ReadyState::Pending,
        }
    }

    pub fn read_f32(&self, count: usize) -> Vec<f32> {
        let data = self.buffer.slice(..).get_mapped_range();
        let out = bytemuck::cast_slice::<u8, f32>(&data)[..count].to_vec();
        drop(data);
        self.buffer.unmap();
        out
    }

    pub fn read_u64(&self, count: usize) -> Vec<u64> {
        let data = self.buffer.slice(..).get_mapped_range();
        let out = bytemuck::cast_slice::<u8, u64>(&data)[..count].to_vec();
        drop(data);
        self.buffer.unmap();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferId;

    #[test]
    fn test_params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<GpuPassParams>(), 80);
        assert_eq!(std::mem::offset_of!(GpuPassParams, fa), 48);
    }

    #[test]
    fn test_quarter_turn_params() {
        let shapes = PassShapes { out: [10, 8], out_channels: 2, first_input: [10, 8], drag: [17, 17] };
        let id = BufferId(0);
        let pass = Pass::QuarterTurn { src: id, dst: id, potential: id, drag: id, mask: id, dt: 0.2, four_m_dx2: 4.0 };
        let p = pass_params(&pass, [10, 8], &shapes);
        assert_eq!(p.aux_size, [17, 17]);
        assert_eq!(p.fa[..2], [0.2, 4.0]);
        assert_eq!(p.channels, 2);
    }
}
