//! Impedance to reflection-coefficient transform and chart pixel mapping.
//!
//! Normalizes a measured impedance `Z = R + jX` against the characteristic
//! impedance Z0 and maps the resulting reflection coefficient
//! `Γ = (z - 1) / (z + 1)` onto Smith-chart pixel coordinates. Passive loads
//! (`R >= 0`) land inside or on the unit circle.

use thiserror::Error;

/// Characteristic impedance the chart is normalized against, Ohms.
pub const Z0_OHMS: f64 = 50.0;

/// The transform singularity: `Γ` is undefined for `Z = -Z0 + j0` (and any
/// input whose transform is non-finite). Such samples are skipped by the
/// chart rather than plotted at an infinite pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("impedance {real:.2} + j{imag:.2} Ω has no finite reflection coefficient")]
pub struct DegenerateLoad {
    pub real: f64,
    pub imag: f64,
}

/// Reflection coefficient `(Γ_re, Γ_im)` of `real + j·imag` Ohms against `z0`.
///
/// Computed in real arithmetic:
/// ```text
/// r = R/Z0, x = X/Z0
/// denom = (r+1)² + x²
/// Γ_re  = ((r-1)(r+1) + x²) / denom
/// Γ_im  = 2x / denom
/// ```
pub fn reflection_coefficient(real: f64, imag: f64, z0: f64) -> Result<(f64, f64), DegenerateLoad> {
    let r = real / z0;
    let x = imag / z0;
    let denom = (r + 1.0) * (r + 1.0) + x * x;
    if denom == 0.0 {
        return Err(DegenerateLoad { real, imag });
    }
    let gamma_re = ((r - 1.0) * (r + 1.0) + x * x) / denom;
    let gamma_im = (2.0 * x) / denom;
    if !gamma_re.is_finite() || !gamma_im.is_finite() {
        return Err(DegenerateLoad { real, imag });
    }
    Ok((gamma_re, gamma_im))
}

/// Smith-chart geometry derived from the target surface on every render.
///
/// Never cached between frames: the surface may be resized at any time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartGeometry {
    /// Chart center in pixel coordinates.
    pub cx: f64,
    pub cy: f64,
    /// Pixel radius of the |Γ| = 1 circle.
    pub radius: f64,
}

impl ChartGeometry {
    /// Geometry for a surface of the given size anchored at `(left, top)`.
    /// The chart uses 93% of the smaller half-dimension, like the bench UI
    /// it replaces.
    pub fn from_surface(left: f64, top: f64, width: f64, height: f64) -> Self {
        let cx = left + width / 2.0;
        let cy = top + height / 2.0;
        let radius = (width / 2.0).min(height / 2.0) * 0.93;
        Self { cx, cy, radius }
    }

    /// Map a reflection coefficient to pixel coordinates. The vertical axis
    /// is inverted: screen Y grows downward, the chart's imaginary axis grows
    /// upward.
    pub fn project(&self, gamma: (f64, f64)) -> (f64, f64) {
        (
            self.cx + gamma.0 * self.radius,
            self.cy - gamma.1 * self.radius,
        )
    }
}
