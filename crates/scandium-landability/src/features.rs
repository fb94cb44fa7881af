//! Low-level image cues used by the heuristic scorer.
//!
//! All functions take an 8-bit grayscale view and treat the border by
//! clamping coordinates. Complexity is O(W*H) per cue.

use scandium_core::GrayImageView;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];
const LAPLACIAN_KERNEL: Kernel3 = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];

const TAN_22_5_DEG: f32 = 0.414_213_56;

#[inline]
fn convolve_at(img: &GrayImageView<'_>, x: usize, y: usize, k: &Kernel3) -> f32 {
    let w = img.width;
    let h = img.height;
    let xs = [x.saturating_sub(1), x, (x + 1).min(w - 1)];
    let ys = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
    let mut acc = 0.0;
    for (ky, &yy) in ys.iter().enumerate() {
        let row = img.row(yy);
        for (kx, &xx) in xs.iter().enumerate() {
            acc += k[ky][kx] * row[xx] as f32;
        }
    }
    acc
}

/// Variance of the 3x3 Laplacian response. Flat regions give ~0.
pub fn laplacian_variance(img: &GrayImageView<'_>) -> f64 {
    if img.is_empty() {
        return 0.0;
    }
    let n = (img.width * img.height) as f64;
    let mut sum = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    for y in 0..img.height {
        for x in 0..img.width {
            let v = convolve_at(img, x, y, &LAPLACIAN_KERNEL) as f64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Mean absolute difference between two equally sized views, scaled to
/// `[0, 1]`. Returns `None` when the shapes differ.
pub fn frame_difference_ratio(a: &GrayImageView<'_>, b: &GrayImageView<'_>) -> Option<f64> {
    if a.width != b.width || a.height != b.height {
        return None;
    }
    if a.data.is_empty() {
        return Some(0.0);
    }
    let total: u64 = a
        .data
        .iter()
        .zip(b.data)
        .map(|(&p, &q)| p.abs_diff(q) as u64)
        .sum();
    Some(total as f64 / a.data.len() as f64 / 255.0)
}

pub fn mean_intensity(img: &GrayImageView<'_>) -> f64 {
    img.mean()
}

struct Gradients {
    gx: Vec<f32>,
    gy: Vec<f32>,
    /// L1 magnitude `|gx| + |gy|`.
    mag: Vec<f32>,
}

fn sobel(img: &GrayImageView<'_>) -> Gradients {
    let n = img.width * img.height;
    let mut gx = vec![0.0; n];
    let mut gy = vec![0.0; n];
    let mut mag = vec![0.0; n];
    for y in 0..img.height {
        for x in 0..img.width {
            let i = y * img.width + x;
            let sx = convolve_at(img, x, y, &SOBEL_KERNEL_X);
            let sy = convolve_at(img, x, y, &SOBEL_KERNEL_Y);
            gx[i] = sx;
            gy[i] = sy;
            mag[i] = sx.abs() + sy.abs();
        }
    }
    Gradients { gx, gy, mag }
}

/// Fraction of pixels marked as edges by a Canny-style detector.
///
/// Sobel gradients, non-maximum suppression along the quantized gradient
/// direction, then double thresholding with hysteresis: pixels at or above
/// `high` seed edges, pixels at or above `low` join when 8-connected to a
/// seed. The outermost 1-pixel frame never holds edges.
pub fn edge_density(img: &GrayImageView<'_>, low: f32, high: f32) -> f64 {
    let w = img.width;
    let h = img.height;
    if w < 3 || h < 3 {
        return 0.0;
    }
    let g = sobel(img);

    // 0 = none, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    let mut stack = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = g.mag[i];
            if m < low {
                continue;
            }
            let gx = g.gx[i];
            let gy = g.gy[i];
            let abs_gx = gx.abs();
            let abs_gy = gy.abs();
            let same_sign = (gx >= 0.0 && gy >= 0.0) || (gx <= 0.0 && gy <= 0.0);

            let (n1, n2) = if abs_gx >= abs_gy {
                if abs_gy <= abs_gx * TAN_22_5_DEG {
                    (i - 1, i + 1)
                } else if same_sign {
                    (i - w - 1, i + w + 1)
                } else {
                    (i - w + 1, i + w - 1)
                }
            } else if abs_gx <= abs_gy * TAN_22_5_DEG {
                (i - w, i + w)
            } else if same_sign {
                (i - w - 1, i + w + 1)
            } else {
                (i - w + 1, i + w - 1)
            };

            // Ties keep the first pixel along the direction so plateaus thin
            // to one pixel.
            if m <= g.mag[n1] || m < g.mag[n2] {
                continue;
            }
            if m >= high {
                class[i] = 2;
                stack.push(i);
            } else {
                class[i] = 1;
            }
        }
    }

    while let Some(i) = stack.pop() {
        let (x, y) = (i % w, i / w);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let j = ny * w + nx;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    let edges = class.iter().filter(|&&c| c == 2).count();
    edges as f64 / (w * h) as f64
}
