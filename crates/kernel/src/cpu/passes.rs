//! Host implementations of every [`Pass`](crate::device::Pass).
//!
//! Rows are processed in parallel with rayon. Reads outside a buffer return
//! zero, which gives the Dirichlet boundary of the stepper and the zero
//! padding of the pyramids for free.

use rayon::prelude::*;

/// Read-only view of a host buffer.
#[derive(Clone, Copy)]
pub(crate) struct Plane<'a> {
    pub data: &'a [f32],
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

impl<'a> Plane<'a> {
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> [f32; 2] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return [0.0; 2];
        }
        let i = (y as usize * self.width as usize + x as usize) * self.channels;
        let re = self.data.get(i).copied().unwrap_or(0.0);
        let im = if self.channels == 2 { self.data.get(i + 1).copied().unwrap_or(0.0) } else { 0.0 };
        [re, im]
    }

    #[inline]
    pub fn r(&self, x: i64, y: i64) -> f32 {
        self.get(x, y)[0]
    }
}

/// Mutable view of the buffer a pass writes.
pub(crate) struct Target<'a> {
    pub data: &'a mut [f32],
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

impl Target<'_> {
    fn as_plane(&self) -> Plane<'_> {
        Plane { data: self.data, width: self.width, height: self.height, channels: self.channels }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some((y as usize * self.width as usize + x as usize) * self.channels)
        } else {
            None
        }
    }
}

#[inline]
fn cmul(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] * b[0] - a[1] * b[1], a[0] * b[1] + a[1] * b[0]]
}

/// Amplitude synchronised in time from the two most recent staggered buffers.
#[inline]
pub(crate) fn synced(cur: &Plane<'_>, prev: &Plane<'_>, x: i64, y: i64) -> [f32; 2] {
    let c = cur.get(x, y);
    let p = prev.get(x, y);
    [0.5 * (c[0] + p[1]), c[1]]
}

/// Write `f(x, y)` into `[0, grid) x [0, grid)` of the target.
pub(crate) fn raster<F>(out: &mut Target<'_>, grid: [u32; 2], f: F)
where
    F: Fn(i64, i64) -> [f32; 2] + Sync,
{
    let row_len = out.width as usize * out.channels;
    if row_len == 0 {
        return;
    }
    let nx = grid[0].min(out.width) as usize;
    let ny = grid[1].min(out.height) as usize;
    let ch = out.channels;
    out.data
        .par_chunks_mut(row_len)
        .take(ny)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..nx {
                let v = f(x as i64, y as i64);
                row[x * ch] = v[0];
                if ch == 2 {
                    row[x * ch + 1] = v[1];
                }
            }
        });
}

pub(crate) fn gaussian(out: &mut Target<'_>, grid: [u32; 2], center: [f32; 2], sigma: f32, amplitude: f32, dx: f32) {
    let inv_s2 = 1.0 / (sigma * sigma);
    raster(out, grid, |x, y| {
        let px = x as f32 * dx - center[0];
        let py = y as f32 * dx - center[1];
        [amplitude * (-0.5 * (px * px + py * py) * inv_s2).exp(), 0.0]
    });
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn quarter_turn(
    out: &mut Target<'_>,
    grid: [u32; 2],
    src: Plane<'_>,
    potential: Plane<'_>,
    drag: Plane<'_>,
    mask: Plane<'_>,
    dt: f32,
    four_m_dx2: f32,
) {
    let wall = |x: i64, y: i64| mask.r(x, y) >= 0.5;
    let re = |x: i64, y: i64| if wall(x, y) { 0.0 } else { src.r(x, y) };
    raster(out, grid, |x, y| {
        if wall(x, y) {
            return [0.0, 0.0];
        }
        let c = src.get(x, y);
        let lap = 4.0 * c[0] - (re(x - 1, y) + re(x + 1, y) + re(x, y - 1) + re(x, y + 1));
        let v = potential.r(x, y) + drag.r(x, y);
        let h = 2.0 * lap / four_m_dx2 + v * c[0];
        [c[1] - dt * h, -c[0]]
    });
}

pub(crate) fn density(out: &mut Target<'_>, grid: [u32; 2], cur: Plane<'_>, prev: Plane<'_>) {
    raster(out, grid, |x, y| {
        let c = cur.get(x, y);
        let p = prev.get(x, y);
        [(c[1] * c[1] + c[0] * p[1]).max(0.0), 0.0]
    });
}

pub(crate) fn overlap(out: &mut Target<'_>, grid: [u32; 2], goal: Plane<'_>, cur: Plane<'_>, prev: Plane<'_>) {
    raster(out, grid, |x, y| {
        let g = goal.get(x, y);
        let psi = synced(&cur, &prev, x, y);
        cmul([g[0], -g[1]], psi)
    });
}

pub(crate) fn complex_mul(out: &mut Target<'_>, grid: [u32; 2], a: Plane<'_>, b: Plane<'_>) {
    raster(out, grid, |x, y| cmul(a.get(x, y), b.get(x, y)));
}

pub(crate) fn reduce_sum(out: &mut Target<'_>, grid: [u32; 2], src: Plane<'_>, src_data: [u32; 2]) {
    let (dw, dh) = (src_data[0] as i64, src_data[1] as i64);
    raster(out, grid, |x, y| {
        let mut sum = [0.0f32; 2];
        for (cx, cy) in [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)] {
            if cx < dw && cy < dh {
                let v = src.get(cx, cy);
                sum[0] += v[0];
                sum[1] += v[1];
            }
        }
        sum
    });
}

pub(crate) fn lip_init(out: &mut Target<'_>, grid: [u32; 2], cur: Plane<'_>, prev: Plane<'_>, coefficient: f32) {
    let (w, h) = (cur.width as i64, cur.height as i64);
    let im_conj = |a: [f32; 2], b: [f32; 2]| a[0] * b[1] - a[1] * b[0];
    raster(out, grid, |x, y| {
        let here = synced(&cur, &prev, x, y);
        let ax = if x + 1 < w { coefficient * im_conj(here, synced(&cur, &prev, x + 1, y)) } else { 0.0 };
        let ay = if y + 1 < h { coefficient * im_conj(here, synced(&cur, &prev, x, y + 1)) } else { 0.0 };
        [ax, ay]
    });
}

pub(crate) fn lip_build(out: &mut Target<'_>, grid: [u32; 2], src: Plane<'_>) {
    raster(out, grid, |x, y| {
        let ax = src.get(2 * x, 2 * y)[0] + src.get(2 * x + 1, 2 * y)[0];
        let ay = src.get(2 * x, 2 * y)[1] + src.get(2 * x, 2 * y + 1)[1];
        [ax, ay]
    });
}

/// Remove the circulation around the 2x2 top loop and seed its corners.
pub(crate) fn kiss_potentials(top: &Plane<'_>) -> [f32; 4] {
    let ax00 = top.get(0, 0)[0];
    let ax01 = top.get(0, 1)[0];
    let ay00 = top.get(0, 0)[1];
    let ay10 = top.get(1, 0)[1];
    let c = 0.25 * (ax00 + ay10 - ax01 - ay00);
    let (ax00, ay10, ay00) = (ax00 - c, ay10 - c, ay00 + c);
    let phi10 = ax00;
    [0.0, phi10, ay00, phi10 + ay10]
}

pub(crate) fn lip_kiss(drag: &mut Target<'_>, top: Plane<'_>, scale: u32) {
    let phi = kiss_potentials(&top);
    let corners = [(0, 0), (scale, 0), (0, scale), (scale, scale)];
    for (value, (x, y)) in phi.into_iter().zip(corners) {
        if let Some(i) = drag.index(x, y) {
            drag.data[i] = value;
        }
    }
}

pub(crate) fn lip_integrate_x(drag: &mut Target<'_>, grid: [u32; 2], lip: Plane<'_>, scale: u32) {
    let writes: Vec<(usize, f32)> = {
        let field = drag.as_plane();
        let s = scale as i64;
        (0..grid[1] as i64)
            .into_par_iter()
            .flat_map_iter(|jp| {
                (0..grid[0] as i64).filter_map(move |ip| {
                    let j = 2 * jp;
                    let (xl, xr, y) = (2 * ip * s, (2 * ip + 2) * s, j * s);
                    if xr >= field.width as i64 || y >= field.height as i64 {
                        return None;
                    }
                    let a_left = lip.get(2 * ip, j)[0];
                    let a_right = lip.get(2 * ip + 1, j)[0];
                    let forward = field.r(xl, y) + a_left;
                    let backward = field.r(xr, y) - a_right;
                    let i = (y as usize * field.width as usize + ((2 * ip + 1) * s) as usize) * field.channels;
                    Some((i, 0.5 * (forward + backward)))
                })
            })
            .collect()
    };
    for (i, v) in writes {
        drag.data[i] = v;
    }
}

pub(crate) fn lip_integrate_y(drag: &mut Target<'_>, grid: [u32; 2], lip: Plane<'_>, scale: u32) {
    let writes: Vec<(usize, f32)> = {
        let field = drag.as_plane();
        let s = scale as i64;
        (0..grid[1] as i64)
            .into_par_iter()
            .flat_map_iter(|jp| {
                (0..grid[0] as i64).filter_map(move |i| {
                    let (x, yd, yu) = (i * s, 2 * jp * s, (2 * jp + 2) * s);
                    if x >= field.width as i64 || yu >= field.height as i64 {
                        return None;
                    }
                    let a_down = lip.get(i, 2 * jp)[1];
                    let a_up = lip.get(i, 2 * jp + 1)[1];
                    let forward = field.r(x, yd) + a_down;
                    let backward = field.r(x, yu) - a_up;
                    let idx = (((2 * jp + 1) * s) as usize * field.width as usize + x as usize) * field.channels;
                    Some((idx, 0.5 * (forward + backward)))
                })
            })
            .collect()
    };
    for (i, v) in writes {
        drag.data[i] = v;
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn kick(
    out: &mut Target<'_>,
    grid: [u32; 2],
    origin: [f32; 2],
    radius: f32,
    momentum: [f32; 2],
    phase: f32,
    dx: f32,
) {
    let inv_r2 = if radius > 0.0 { 1.0 / (radius * radius) } else { 0.0 };
    raster(out, grid, |x, y| {
        let d = [x as f32 * dx - origin[0], y as f32 * dx - origin[1]];
        let weight = if radius > 0.0 {
            let t = (1.0 - (d[0] * d[0] + d[1] * d[1]) * inv_r2).clamp(0.0, 1.0);
            t * t
        } else {
            0.0
        };
        let theta = weight * (momentum[0] * d[0] + momentum[1] * d[1] + phase);
        [theta.cos(), theta.sin()]
    });
}

pub(crate) fn plane_wave(out: &mut Target<'_>, grid: [u32; 2], momentum: [f32; 2], dx: f32) {
    raster(out, grid, |x, y| {
        let theta = momentum[0] * x as f32 * dx + momentum[1] * y as f32 * dx;
        [theta.cos(), theta.sin()]
    });
}
