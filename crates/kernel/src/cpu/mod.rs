//! Host reference backend.
//!
//! Executes every pass eagerly on rayon worker threads. Command-stream
//! semantics are kept where they are observable: deferred readbacks and
//! timers only become ready after a later [`submit`](ComputeDevice::submit),
//! and storage hazards are reported exactly as a GPU would suffer them.

pub mod hazard;
pub(crate) mod passes;

use std::collections::HashMap;
use std::time::Instant;

use crate::device::{BufferId, ComputeDevice, Format, Pass, ReadbackTicket, TimerTicket};
use crate::error::{DeviceAnomaly, EngineError};

pub use hazard::HazardTracker;
use passes::{Plane, Target};

struct HostBuffer {
    label: String,
    width: u32,
    height: u32,
    format: Format,
    data: Vec<f32>,
}

impl HostBuffer {
    fn plane(&self) -> Plane<'_> {
        Plane { data: &self.data, width: self.width, height: self.height, channels: self.format.channels() }
    }
}

struct Pending<T> {
    value: T,
    submitted: bool,
}

/// CPU implementation of [`ComputeDevice`].
pub struct CpuDevice {
    buffers: Vec<HostBuffer>,
    hazards: HazardTracker,
    anomalies: Vec<DeviceAnomaly>,
    readbacks: HashMap<u64, Pending<Result<Vec<f32>, EngineError>>>,
    timers: HashMap<u64, Pending<f64>>,
    timer_start: Option<Instant>,
    next_ticket: u64,
    dispatches: u64,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    /// Empty device.
    pub fn new() -> Self {
        tracing::debug!("CPU device using {} rayon threads", rayon::current_num_threads());
        Self {
            buffers: Vec::new(),
            hazards: HazardTracker::new(),
            anomalies: Vec::new(),
            readbacks: HashMap::new(),
            timers: HashMap::new(),
            timer_start: None,
            next_ticket: 0,
            dispatches: 0,
        }
    }

    /// Passes executed so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Total host memory held by buffers, in bytes.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len() * std::mem::size_of::<f32>()).sum()
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn copy_region(&self, id: BufferId, origin: [u32; 2], size: [u32; 2]) -> Result<Vec<f32>, EngineError> {
        let buf = self
            .buffers
            .get(id.index())
            .ok_or_else(|| EngineError::Device(format!("unknown buffer {}", id.index())))?;
        let (x1, y1) = (origin[0] as u64 + size[0] as u64, origin[1] as u64 + size[1] as u64);
        if x1 > buf.width as u64 || y1 > buf.height as u64 {
            return Err(EngineError::Readback(format!(
                "region {:?}+{:?} outside '{}' ({}x{})",
                origin, size, buf.label, buf.width, buf.height
            )));
        }
        let ch = buf.format.channels();
        let row = buf.width as usize * ch;
        let mut out = Vec::with_capacity(size[0] as usize * size[1] as usize * ch);
        for y in origin[1]..origin[1] + size[1] {
            let start = y as usize * row + origin[0] as usize * ch;
            out.extend_from_slice(&buf.data[start..start + size[0] as usize * ch]);
        }
        Ok(out)
    }
}

fn execute<'a>(pass: &Pass, grid: [u32; 2], out: &mut Target<'_>, input: impl Fn(BufferId) -> Plane<'a>) {
    match *pass {
        Pass::Fill { value, .. } => passes::raster(out, grid, |_, _| value),
        Pass::Gaussian { center, sigma, amplitude, dx, .. } => {
            passes::gaussian(out, grid, center, sigma, amplitude, dx)
        }
        Pass::QuarterTurn { src, potential, drag, mask, dt, four_m_dx2, .. } => passes::quarter_turn(
            out,
            grid,
            input(src),
            input(potential),
            input(drag),
            input(mask),
            dt,
            four_m_dx2,
        ),
        Pass::Density { cur, prev, .. } => passes::density(out, grid, input(cur), input(prev)),
        Pass::Overlap { goal, cur, prev, .. } => {
            passes::overlap(out, grid, input(goal), input(cur), input(prev))
        }
        Pass::ComplexMul { a, b, .. } => passes::complex_mul(out, grid, input(a), input(b)),
        Pass::ReduceSum { src, src_data, .. } => passes::reduce_sum(out, grid, input(src), src_data),
        Pass::LipInit { cur, prev, coefficient, .. } => {
            passes::lip_init(out, grid, input(cur), input(prev), coefficient)
        }
        Pass::LipBuild { src, .. } => passes::lip_build(out, grid, input(src)),
        Pass::LipKiss { top, scale, .. } => passes::lip_kiss(out, input(top), scale),
        Pass::LipIntegrateX { lip, scale, .. } => passes::lip_integrate_x(out, grid, input(lip), scale),
        Pass::LipIntegrateY { lip, scale, .. } => passes::lip_integrate_y(out, grid, input(lip), scale),
        Pass::Kick { origin, radius, momentum, phase, dx, .. } => {
            passes::kick(out, grid, origin, radius, momentum, phase, dx)
        }
        Pass::PlaneWave { momentum, dx, .. } => passes::plane_wave(out, grid, momentum, dx),
    }
}

impl ComputeDevice for CpuDevice {
    fn backend_name(&self) -> &'static str {
        "cpu"
    }

    fn create_buffer(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<BufferId, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::ResourceCreation(format!(
                "buffer '{}' has zero size {}x{}",
                label, width, height
            )));
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or_else(|| EngineError::ResourceCreation(format!("buffer '{}' is too large", label)))?;
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(HostBuffer { label: label.to_string(), width, height, format, data: vec![0.0; len] });
        Ok(id)
    }

    fn buffer_info(&self, id: BufferId) -> Option<(u32, u32, Format)> {
        self.buffers.get(id.index()).map(|b| (b.width, b.height, b.format))
    }

    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), EngineError> {
        let buf = self
            .buffers
            .get_mut(id.index())
            .ok_or_else(|| EngineError::Device(format!("unknown buffer {}", id.index())))?;
        if data.len() != buf.data.len() {
            return Err(EngineError::Device(format!(
                "write of {} floats into '{}' which holds {}",
                data.len(),
                buf.label,
                buf.data.len()
            )));
        }
        buf.data.copy_from_slice(data);
        Ok(())
    }

    fn dispatch(&mut self, pass: &Pass, grid: [u32; 2]) {
        if let Some((id, _)) = pass.bindings().into_iter().find(|(id, _)| id.index() >= self.buffers.len()) {
            self.anomalies.push(DeviceAnomaly::Backend(format!(
                "{} references unknown buffer {}",
                pass.name(),
                id.index()
            )));
            return;
        }

        let found = self.hazards.check(pass);
        let aliased = found.iter().any(|a| matches!(a, DeviceAnomaly::ReadWriteAlias { .. }));
        for anomaly in &found {
            tracing::warn!("cpu device: {}", anomaly);
        }
        self.anomalies.extend(found);

        let target = pass.target();
        let mut data = std::mem::take(&mut self.buffers[target.index()].data);
        // An aliased input reads the values from before the pass.
        let snapshot = if aliased { Some(data.clone()) } else { None };
        {
            let t = &self.buffers[target.index()];
            let mut out = Target { data: &mut data, width: t.width, height: t.height, channels: t.format.channels() };
            let buffers = &self.buffers;
            let snapshot = snapshot.as_deref();
            execute(pass, grid, &mut out, |id| {
                let buf = &buffers[id.index()];
                match snapshot {
                    Some(snap) if id == target => Plane {
                        data: snap,
                        width: buf.width,
                        height: buf.height,
                        channels: buf.format.channels(),
                    },
                    _ => buf.plane(),
                }
            });
        }
        self.buffers[target.index()].data = data;
        self.dispatches += 1;
    }

    fn barrier(&mut self) {
        self.hazards.barrier();
    }

    fn submit(&mut self) {
        for pending in self.readbacks.values_mut() {
            pending.submitted = true;
        }
        for pending in self.timers.values_mut() {
            pending.submitted = true;
        }
    }

    fn read_region(
        &mut self,
        id: BufferId,
        origin: [u32; 2],
        size: [u32; 2],
    ) -> Result<Vec<f32>, EngineError> {
        self.copy_region(id, origin, size)
    }

    fn request_readback(&mut self, id: BufferId, origin: [u32; 2], size: [u32; 2]) -> ReadbackTicket {
        let value = self.copy_region(id, origin, size);
        let ticket = self.ticket();
        self.readbacks.insert(ticket, Pending { value, submitted: false });
        ReadbackTicket(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackTicket) -> Option<Result<Vec<f32>, EngineError>> {
        match self.readbacks.get(&ticket.0) {
            None => Some(Err(EngineError::Readback(format!("unknown ticket {}", ticket.0)))),
            Some(p) if !p.submitted => None,
            Some(_) => self.readbacks.remove(&ticket.0).map(|p| p.value),
        }
    }

    fn begin_timer(&mut self) {
        self.timer_start = Some(Instant::now());
    }

    fn end_timer(&mut self) -> TimerTicket {
        let seconds = self.timer_start.take().map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        let ticket = self.ticket();
        self.timers.insert(ticket, Pending { value: seconds, submitted: false });
        TimerTicket(ticket)
    }

    fn poll_timer(&mut self, ticket: TimerTicket) -> Option<f64> {
        match self.timers.get(&ticket.0) {
            // Spent or foreign tickets resolve to NaN so callers never wait on them.
            None => Some(f64::NAN),
            Some(p) if !p.submitted => None,
            Some(_) => self.timers.remove(&ticket.0).map(|p| p.value),
        }
    }

    fn poll_errors(&mut self) -> Vec<DeviceAnomaly> {
        std::mem::take(&mut self.anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_sum_matches_analytic_total() {
        // sum over i, j of (i + 1) * (j + 1) = (W(W+1)/2) * (H(H+1)/2)
        for &(w, h) in &[(6u32, 4u32), (7, 5), (33, 17), (1, 9)] {
            let mut device = CpuDevice::new();
            let levels = crate::pyramid::ceil_levels(w, h).unwrap();
            let ids: Vec<BufferId> = levels
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    device
                        .create_buffer(&format!("r{}", i), l.buffer_width, l.buffer_height, Format::R32F)
                        .unwrap()
                })
                .collect();
            let base = levels[0];
            let mut data = vec![0.0f32; (base.buffer_width * base.buffer_height) as usize];
            for j in 0..h {
                for i in 0..w {
                    data[(j * base.buffer_width + i) as usize] = ((i + 1) * (j + 1)) as f32;
                }
            }
            device.write_buffer(ids[0], &data).unwrap();
            for i in 1..levels.len() {
                let src = levels[i - 1];
                let dst = levels[i];
                device.dispatch(
                    &Pass::ReduceSum { src: ids[i - 1], src_data: [src.data_width, src.data_height], dst: ids[i] },
                    [dst.buffer_width, dst.buffer_height],
                );
            }
            let total = device.read_region(*ids.last().unwrap(), [0, 0], [1, 1]).unwrap()[0];
            let expected = (w * (w + 1) / 2 * (h * (h + 1) / 2)) as f32;
            assert!(((total - expected) / expected).abs() < 1e-4, "{}x{}: {} vs {}", w, h, total, expected);
            assert!(device.poll_errors().is_empty());
        }
    }

    #[test]
    fn test_missing_barrier_is_reported() {
        let mut device = CpuDevice::new();
        let a = device.create_buffer("lip0", 4, 4, Format::RG32F).unwrap();
        let b = device.create_buffer("lip1", 3, 3, Format::RG32F).unwrap();
        let c = device.create_buffer("lip2", 2, 2, Format::RG32F).unwrap();

        device.dispatch(&Pass::LipBuild { src: a, dst: b }, [3, 3]);
        device.dispatch(&Pass::LipBuild { src: b, dst: c }, [2, 2]);
        let errors = device.poll_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), "missing_barrier");

        device.barrier();
        device.dispatch(&Pass::LipBuild { src: a, dst: b }, [3, 3]);
        device.barrier();
        device.dispatch(&Pass::LipBuild { src: b, dst: c }, [2, 2]);
        assert!(device.poll_errors().is_empty());
    }

    #[test]
    fn test_readback_ready_after_submit() {
        let mut device = CpuDevice::new();
        let buf = device.create_buffer("v", 2, 2, Format::R32F).unwrap();
        device.write_buffer(buf, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        let ticket = device.request_readback(buf, [1, 0], [1, 2]);
        // Later writes do not leak into an earlier readback.
        device.dispatch(&Pass::Fill { dst: buf, value: [0.0, 0.0] }, [2, 2]);
        assert!(device.poll_readback(ticket).is_none());
        device.submit();
        assert_eq!(device.poll_readback(ticket).unwrap().unwrap(), vec![2.0, 4.0]);

        let timer = {
            device.begin_timer();
            device.end_timer()
        };
        assert!(device.poll_timer(timer).is_none());
        device.submit();
        assert!(device.poll_timer(timer).unwrap() >= 0.0);
    }

    #[test]
    fn test_aliased_pass_reads_old_values() {
        let mut device = CpuDevice::new();
        let a = device.create_buffer("a", 2, 1, Format::RG32F).unwrap();
        device.write_buffer(a, &[0.0, 1.0, 2.0, 0.0]).unwrap();
        device.dispatch(&Pass::ComplexMul { a, b: a, dst: a }, [2, 1]);
        assert_eq!(device.read_region(a, [0, 0], [2, 1]).unwrap(), vec![-1.0, 0.0, 4.0, 0.0]);
        assert_eq!(device.poll_errors()[0].kind(), "read_write_alias");
    }
}
