use scandium_core::{MarkerFootprint, PixelRect};
use serde::{Deserialize, Serialize};

/// Where the landing-zone crop is cut from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiPolicy {
    /// ROI side as a multiple of the marker's apparent side, so the crop
    /// covers a fixed ground extent regardless of altitude.
    pub marker_scale: f64,
    /// Share of the requested ROI that must remain after clipping to the
    /// frame.
    pub min_visible_fraction: f64,
    /// Smallest usable side after clipping, pixels.
    pub min_side_px: usize,
}

impl Default for RoiPolicy {
    fn default() -> Self {
        Self {
            marker_scale: 2.0,
            min_visible_fraction: 0.5,
            min_side_px: 3,
        }
    }
}

impl RoiPolicy {
    /// Requested ROI before clipping as `(cx, cy, w, h)`.
    ///
    /// Centered on the marker and sized by its footprint when one is known,
    /// otherwise the central quarter of the frame.
    pub fn requested(&self, width: usize, height: usize, marker: Option<&MarkerFootprint>) -> (f64, f64, f64, f64) {
        match marker {
            Some(m) => {
                let side = m.side_px * self.marker_scale;
                (m.center.x, m.center.y, side, side)
            }
            None => (
                width as f64 / 2.0,
                height as f64 / 2.0,
                (width / 4) as f64,
                (height / 4) as f64,
            ),
        }
    }

    /// Clip the requested ROI to the frame. `None` when too little of it is
    /// inside the image.
    pub fn select(&self, width: usize, height: usize, marker: Option<&MarkerFootprint>) -> Option<PixelRect> {
        let (cx, cy, w, h) = self.requested(width, height, marker);
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
            return None;
        }
        let x0 = (cx - w / 2.0).round();
        let y0 = (cy - h / 2.0).round();
        let x1 = x0 + w.round();
        let y1 = y0 + h.round();

        let cx0 = x0.max(0.0);
        let cy0 = y0.max(0.0);
        let cx1 = x1.min(width as f64);
        let cy1 = y1.min(height as f64);
        if cx1 <= cx0 || cy1 <= cy0 {
            return None;
        }
        let visible = (cx1 - cx0) * (cy1 - cy0);
        let requested = (x1 - x0) * (y1 - y0);
        if visible < self.min_visible_fraction * requested {
            return None;
        }

        let rect = PixelRect {
            x: cx0 as usize,
            y: cy0 as usize,
            width: (cx1 - cx0) as usize,
            height: (cy1 - cy0) as usize,
        };
        if rect.width < self.min_side_px || rect.height < self.min_side_px {
            return None;
        }
        Some(rect)
    }
}
