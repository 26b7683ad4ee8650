//! GPU (Metal/Vulkan/DX12 via wgpu) implementation of [`ComputeDevice`].
//!
//! # Architecture
//! - All passes live in one WGSL module, one entry point per [`Pass`] variant.
//! - Every pipeline shares one bind group layout:
//!   binding 0 is the uniform `Params`, bindings 1..=4 are read-only inputs
//!   and binding 5 is the read-write target. Unused input slots are bound to
//!   a small dummy buffer.
//! - Each dispatch gets a fresh uniform and a fresh bind group and runs in
//!   its own compute pass, so no binding state carries over between
//!   dispatches and wgpu orders dependent storage accesses for us.
//! - The same [`HazardTracker`] as the CPU backend runs over the recorded
//!   stream so missing barriers are reported identically on both backends.
//! - Readbacks copy into staging buffers that are mapped after the next
//!   submit and polled without blocking.
//! - Timed regions use timestamp queries when the adapter has them and fall
//!   back to `on_submitted_work_done` wall-clock timing otherwise.

pub mod buffers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use wgpu::util::DeviceExt;

use buffers::{pass_params, DeviceBuffer, PassShapes, ReadyState, StagingBuffer};
use crate::cpu::HazardTracker;
use crate::device::{BufferId, ComputeDevice, Format, Pass, ReadbackTicket, TimerTicket};
use crate::error::{DeviceAnomaly, EngineError};

/// Workgroup edge length; must match `@workgroup_size` in the shader.
const WORKGROUP: u32 = 8;

/// Timestamp slots, two per timed region.
const QUERY_SLOTS: u32 = 32;

const ENTRY_POINTS: [&str; 14] = [
    "fill",
    "gaussian",
    "quarter_turn",
    "density",
    "overlap",
    "complex_mul",
    "reduce_sum",
    "lip_init",
    "lip_build",
    "lip_kiss",
    "lip_integrate_x",
    "lip_integrate_y",
    "kick",
    "plane_wave",
];

/// Error returned when GPU initialization fails.
#[derive(Debug)]
pub struct GpuInitError(pub String);

impl std::fmt::Display for GpuInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GPU initialization failed: {}", self.0)
    }
}

impl std::error::Error for GpuInitError {}

impl From<GpuInitError> for EngineError {
    fn from(e: GpuInitError) -> Self {
        EngineError::ResourceCreation(e.0)
    }
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

struct PendingReadback {
    staging: StagingBuffer,
    floats: usize,
    submitted: bool,
}

enum PendingTimer {
    Query { staging: StagingBuffer, submitted: bool },
    Wall { start: Instant, done: Arc<Mutex<Option<Instant>>>, armed: bool },
}

struct Timestamps {
    query_set: wgpu::QuerySet,
    period_ns: f32,
    next_slot: u32,
}

/// wgpu compute backend.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    layout: wgpu::BindGroupLayout,
    pipelines: HashMap<&'static str, wgpu::ComputePipeline>,
    dummy: wgpu::Buffer,
    buffers: Vec<DeviceBuffer>,
    encoder: wgpu::CommandEncoder,
    in_flight_uniforms: Vec<wgpu::Buffer>,
    hazards: HazardTracker,
    anomalies: Vec<DeviceAnomaly>,
    uncaptured: Arc<Mutex<Vec<String>>>,
    readbacks: HashMap<u64, PendingReadback>,
    timers: HashMap<u64, PendingTimer>,
    timestamps: Option<Timestamps>,
    timer_begin: Option<(u32, Instant)>,
    next_ticket: u64,
}

impl GpuDevice {
    /// Open the default high-performance adapter and compile every pass.
    ///
    /// Returns `Err(GpuInitError)` if no adapter is found or the shader fails
    /// to compile, allowing callers to fall back to the CPU backend.
    pub fn new() -> Result<Self, GpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GpuInitError("No suitable GPU adapter found".into()))?;

        let adapter_name = adapter.get_info().name;
        let has_timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        tracing::info!("GPU adapter: {:?} (timestamp queries: {})", adapter_name, has_timestamps);

        let required_features =
            if has_timestamps { wgpu::Features::TIMESTAMP_QUERY } else { wgpu::Features::empty() };
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("wavefield_device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuInitError(format!("Failed to create device: {e}")))?;

        let uncaptured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |e| {
            if let Ok(mut errors) = sink.lock() {
                errors.push(e.to_string());
            }
        }));

        // --- Shader ---
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("wavefield"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/wavefield.wgsl").into()),
        });

        // --- Bind group layout ---
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("wavefield_bgl"),
            entries: &[
                bgl_uniform(0),    // params
                bgl_storage_ro(1), // first input
                bgl_storage_ro(2),
                bgl_storage_ro(3),
                bgl_storage_ro(4),
                bgl_storage_rw(5), // target
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("wavefield_pl"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        // --- Pipelines ---
        let pipelines = ENTRY_POINTS
            .iter()
            .map(|&name| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(name),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some(name),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (name, pipeline)
            })
            .collect();
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuInitError(format!("Shader compilation failed: {err}")));
        }

        let dummy = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("unused_input"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let timestamps = has_timestamps.then(|| Timestamps {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("timer_queries"),
                ty: wgpu::QueryType::Timestamp,
                count: QUERY_SLOTS,
            }),
            period_ns: queue.get_timestamp_period(),
            next_slot: 0,
        });

        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });

        Ok(Self {
            device,
            queue,
            adapter_name,
            layout,
            pipelines,
            dummy,
            buffers: Vec::new(),
            encoder,
            in_flight_uniforms: Vec::new(),
            hazards: HazardTracker::new(),
            anomalies: Vec::new(),
            uncaptured,
            readbacks: HashMap::new(),
            timers: HashMap::new(),
            timestamps,
            timer_begin: None,
            next_ticket: 0,
        })
    }

    /// Adapter name reported by the driver.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Whether timers use hardware timestamps.
    pub fn has_timestamp_queries(&self) -> bool {
        self.timestamps.is_some()
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn get(&self, id: BufferId) -> Result<&DeviceBuffer, EngineError> {
        self.buffers
            .get(id.index())
            .ok_or_else(|| EngineError::Device(format!("unknown buffer {}", id.index())))
    }

    fn encode_region_copy(
        &mut self,
        id: BufferId,
        origin: [u32; 2],
        size: [u32; 2],
    ) -> Result<PendingReadback, EngineError> {
        let buf = self.get(id)?;
        if origin[0] as u64 + size[0] as u64 > buf.width as u64
            || origin[1] as u64 + size[1] as u64 > buf.height as u64
        {
            return Err(EngineError::Readback(format!(
                "region {:?}+{:?} outside {}x{} buffer",
                origin, size, buf.width, buf.height
            )));
        }
        let ch = buf.format.channels() as u64;
        let row_bytes = size[0] as u64 * ch * 4;
        let staging = StagingBuffer::new(&self.device, "readback_staging", row_bytes * size[1] as u64);
        for row in 0..size[1] as u64 {
            let src_offset = ((origin[1] as u64 + row) * buf.width as u64 + origin[0] as u64) * ch * 4;
            self.encoder.copy_buffer_to_buffer(&buf.buffer, src_offset, staging.buffer(), row * row_bytes, row_bytes);
        }
        let floats = (size[0] as u64 * size[1] as u64 * ch) as usize;
        Ok(PendingReadback { staging, floats, submitted: false })
    }

    fn shapes(&self, pass: &Pass) -> Option<PassShapes> {
        let out = self.buffers.get(pass.target().index())?;
        let bindings = pass.bindings();
        let first_input = match bindings.len() {
            1 => out.size(),
            _ => self.buffers.get(bindings[0].0.index())?.size(),
        };
        let drag = match *pass {
            Pass::QuarterTurn { drag, .. } => self.buffers.get(drag.index())?.size(),
            _ => [0, 0],
        };
        Some(PassShapes { out: out.size(), out_channels: out.format.channels() as u32, first_input, drag })
    }
}

impl ComputeDevice for GpuDevice {
    fn backend_name(&self) -> &'static str {
        "gpu"
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
        let size = width as u64 * height as u64 * format.channels() as u64 * 4;
        if size > self.device.limits().max_storage_buffer_binding_size as u64 {
            return Err(EngineError::ResourceCreation(format!(
                "buffer '{}' needs {} bytes, over the binding limit",
                label, size
            )));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EngineError::ResourceCreation(format!("buffer '{}': {}", label, err)));
        }
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(DeviceBuffer { buffer, width, height, format });
        Ok(id)
    }

    fn buffer_info(&self, id: BufferId) -> Option<(u32, u32, Format)> {
        self.buffers.get(id.index()).map(|b| (b.width, b.height, b.format))
    }

    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), EngineError> {
        let expected = self.get(id)?.byte_len();
        if data.len() as u64 * 4 != expected {
            return Err(EngineError::Device(format!(
                "write of {} floats into buffer {} which holds {}",
                data.len(),
                id.index(),
                expected / 4
            )));
        }
        // Queue writes land before the next submission, so flush what is recorded first.
        self.submit();
        self.queue.write_buffer(&self.buffers[id.index()].buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    fn dispatch(&mut self, pass: &Pass, grid: [u32; 2]) {
        let Some(shapes) = self.shapes(pass) else {
            self.anomalies.push(DeviceAnomaly::Backend(format!("{} references an unknown buffer", pass.name())));
            return;
        };
        let found = self.hazards.check(pass);
        let aliased = found.iter().any(|a| matches!(a, DeviceAnomaly::ReadWriteAlias { .. }));
        for anomaly in &found {
            tracing::warn!("gpu device: {}", anomaly);
        }
        self.anomalies.extend(found);
        if aliased {
            // wgpu rejects a buffer bound as both input and output.
            self.anomalies.push(DeviceAnomaly::Backend(format!("{} skipped: aliased binding", pass.name())));
            return;
        }
        if grid[0] == 0 || grid[1] == 0 {
            return;
        }
        let Some(pipeline) = self.pipelines.get(pass.name()) else {
            self.anomalies.push(DeviceAnomaly::Backend(format!("no pipeline for {}", pass.name())));
            return;
        };

        let params = pass_params(pass, grid, &shapes);
        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pass_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bindings = pass.bindings();
        let (inputs, target) = bindings.split_at(bindings.len() - 1);
        let input = |slot: usize| inputs.get(slot).map_or(&self.dummy, |(id, _)| &self.buffers[id.index()].buffer);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(pass.name()),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: input(0).as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: input(1).as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: input(2).as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: input(3).as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.buffers[target[0].0.index()].buffer.as_entire_binding(),
                },
            ],
        });

        {
            let mut cpass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.name()),
                timestamp_writes: None,
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(dispatch_size(grid[0], WORKGROUP), dispatch_size(grid[1], WORKGROUP), 1);
        }
        self.in_flight_uniforms.push(uniform);
    }

    fn barrier(&mut self) {
        // Separate compute passes are already ordered by wgpu; only the tracker needs it.
        self.hazards.barrier();
    }

    fn submit(&mut self) {
        let encoder = std::mem::replace(
            &mut self.encoder,
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") }),
        );
        self.queue.submit(Some(encoder.finish()));
        self.in_flight_uniforms.clear();

        for pending in self.readbacks.values_mut().filter(|p| !p.submitted) {
            pending.staging.start_map();
            pending.submitted = true;
        }
        for timer in self.timers.values_mut() {
            match timer {
                PendingTimer::Query { staging, submitted } if !*submitted => {
                    staging.start_map();
                    *submitted = true;
                }
                PendingTimer::Wall { done, armed, .. } if !*armed => {
                    let done = Arc::clone(done);
                    self.queue.on_submitted_work_done(move || {
                        if let Ok(mut slot) = done.lock() {
                            *slot = Some(Instant::now());
                        }
                    });
                    *armed = true;
                }
                _ => {}
            }
        }
        self.device.poll(wgpu::Maintain::Poll);
    }

    fn read_region(
        &mut self,
        id: BufferId,
        origin: [u32; 2],
        size: [u32; 2],
    ) -> Result<Vec<f32>, EngineError> {
        let mut pending = self.encode_region_copy(id, origin, size)?;
        self.submit();
        pending.staging.start_map();
        self.device.poll(wgpu::Maintain::Wait);
        match pending.staging.check_ready() {
            ReadyState::Ready => Ok(pending.staging.read_f32(pending.floats)),
            ReadyState::Pending | ReadyState::Failed => {
                Err(EngineError::Readback(format!("map of buffer {} did not complete", id.index())))
            }
        }
    }

    fn request_readback(&mut self, id: BufferId, origin: [u32; 2], size: [u32; 2]) -> ReadbackTicket {
        let ticket = self.ticket();
        match self.encode_region_copy(id, origin, size) {
            Ok(pending) => {
                self.readbacks.insert(ticket, pending);
            }
            Err(e) => self.anomalies.push(DeviceAnomaly::ReadbackFailed(e.to_string())),
        }
        ReadbackTicket(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackTicket) -> Option<Result<Vec<f32>, EngineError>> {
        let Some(pending) = self.readbacks.get_mut(&ticket.0) else {
            return Some(Err(EngineError::Readback(format!("unknown ticket {}", ticket.0))));
        };
        if !pending.submitted {
            return None;
        }
        self.device.poll(wgpu::Maintain::Poll);
        match pending.staging.check_ready() {
            ReadyState::Pending => None,
            ReadyState::Ready => {
                let pending = self.readbacks.remove(&ticket.0)?;
                Some(Ok(pending.staging.read_f32(pending.floats)))
            }
            ReadyState::Failed => {
                self.readbacks.remove(&ticket.0);
                Some(Err(EngineError::Readback(format!("map of ticket {} failed", ticket.0))))
            }
        }
    }

    fn begin_timer(&mut self) {
        let slot = match self.timestamps.as_mut() {
            Some(ts) => {
                let slot = ts.next_slot;
                ts.next_slot = (ts.next_slot + 2) % QUERY_SLOTS;
                let _ = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("timer_begin"),
                    timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                        query_set: &ts.query_set,
                        beginning_of_pass_write_index: Some(slot),
                        end_of_pass_write_index: None,
                    }),
                });
                slot
            }
            None => 0,
        };
        self.timer_begin = Some((slot, Instant::now()));
    }

    fn end_timer(&mut self) -> TimerTicket {
        let ticket = self.ticket();
        let (slot, start) = self.timer_begin.take().unwrap_or((0, Instant::now()));
        let timer = match self.timestamps.as_ref() {
            Some(ts) => {
                {
                    let _ = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("timer_end"),
                        timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                            query_set: &ts.query_set,
                            beginning_of_pass_write_index: None,
                            end_of_pass_write_index: Some(slot + 1),
                        }),
                    });
                }
                let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("timer_resolve"),
                    size: 16,
                    usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });
                let staging = StagingBuffer::new(&self.device, "timer_staging", 16);
                self.encoder.resolve_query_set(&ts.query_set, slot..slot + 2, &resolve, 0);
                self.encoder.copy_buffer_to_buffer(&resolve, 0, staging.buffer(), 0, 16);
                PendingTimer::Query { staging, submitted: false }
            }
            None => PendingTimer::Wall { start, done: Arc::new(Mutex::new(None)), armed: false },
        };
        self.timers.insert(ticket, timer);
        TimerTicket(ticket)
    }

    fn poll_timer(&mut self, ticket: TimerTicket) -> Option<f64> {
        let Some(timer) = self.timers.get_mut(&ticket.0) else {
            return Some(f64::NAN);
        };
        self.device.poll(wgpu::Maintain::Poll);
        let seconds = match timer {
            PendingTimer::Query { submitted: false, .. } => return None,
            PendingTimer::Query { staging, .. } => match staging.check_ready() {
                ReadyState::Pending => return None,
                ReadyState::Failed => f64::NAN,
                ReadyState::Ready => {
                    let period = self.timestamps.as_ref().map_or(1.0, |ts| ts.period_ns as f64);
                    let ts = staging.read_u64(2);
                    ts[1].saturating_sub(ts[0]) as f64 * period * 1e-9
                }
            },
            PendingTimer::Wall { start, done, .. } => {
                let finished = done.lock().ok().and_then(|slot| *slot);
                match finished {
                    Some(end) => end.duration_since(*start).as_secs_f64(),
                    None => return None,
                }
            }
        };
        self.timers.remove(&ticket.0);
        Some(seconds)
    }

    fn poll_errors(&mut self) -> Vec<DeviceAnomaly> {
        self.device.poll(wgpu::Maintain::Poll);
        let mut found = std::mem::take(&mut self.anomalies);
        if let Ok(mut errors) = self.uncaptured.lock() {
            found.extend(errors.drain(..).map(DeviceAnomaly::Backend));
        }
        found
    }
}

/// Calculate dispatch workgroup count: ceil(total / workgroup_size).
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(1, 8), 1);
        assert_eq!(dispatch_size(8, 8), 1);
        assert_eq!(dispatch_size(386, 8), 49);
    }

    #[test]
    fn test_entry_points_cover_every_pass() {
        let shader = include_str!("shaders/wavefield.wgsl");
        for name in ENTRY_POINTS {
            assert!(shader.contains(&format!("fn {}(", name)), "missing entry point {}", name);
        }
    }
}
