//! Smith-chart rendering for a history of impedance samples.
//!
//! The chart is redrawn from scratch on every call: background geometry
//! (outer |Γ| = 1 circle and the horizontal real axis) first, then one filled
//! outlined dot per sample in store order. Only the most recently appended
//! sample carries a text annotation with its impedance value; this keeps the
//! chart readable while still plotting every point.
//!
//! Samples whose reflection coefficient is undefined (see
//! [`crate::transform::DegenerateLoad`]) are skipped on every redraw and
//! counted; the count is shown as an on-chart note instead of letting a
//! non-finite pixel position reach the painter.

use egui::{Align2, Color32, FontId, Pos2, Sense, Stroke, StrokeKind, Ui, Vec2};

use crate::sample::ImpedanceSample;
use crate::transform::{reflection_coefficient, ChartGeometry, Z0_OHMS};

const GRID_COLOR: Color32 = Color32::from_rgb(149, 165, 166);
const POINT_OUTLINE: Color32 = Color32::from_rgb(51, 51, 51);
const LABEL_COLOR: Color32 = Color32::from_rgb(44, 62, 80);
const POINT_RADIUS: f32 = 4.0;

/// One sample resolved to a pixel position, ready to paint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlottedPoint {
    pub x: f64,
    pub y: f64,
    pub color: Color32,
    /// Set only for the last plottable sample in the sequence.
    pub labeled: bool,
}

/// Text annotation for a sample: `"Z: R + jX"` with two decimal places.
pub fn label_text(sample: &ImpedanceSample) -> String {
    format!(
        "Z: {:.2} + j{:.2}",
        sample.real_impedance, sample.imag_impedance
    )
}

/// Resolve every sample to a pixel position. Returns the plottable points in
/// store order plus the number of degenerate samples that were skipped.
///
/// The label flag is attached to the last sample of the sequence; when that
/// sample is itself degenerate no point is labeled.
pub fn plotted_points(
    samples: &[ImpedanceSample],
    geometry: &ChartGeometry,
) -> (Vec<PlottedPoint>, usize) {
    let mut points = Vec::with_capacity(samples.len());
    let mut skipped = 0usize;
    let last_index = samples.len().checked_sub(1);

    for (index, sample) in samples.iter().enumerate() {
        match reflection_coefficient(sample.real_impedance, sample.imag_impedance, Z0_OHMS) {
            Ok(gamma) => {
                let (x, y) = geometry.project(gamma);
                points.push(PlottedPoint {
                    x,
                    y,
                    color: sample.color.color32(),
                    labeled: Some(index) == last_index,
                });
            }
            Err(_) => skipped += 1,
        }
    }
    (points, skipped)
}

/// Widget that paints one history store as a Smith chart.
pub struct SmithChart {
    /// Side length requested from the layout, points.
    pub size: f32,
}

impl Default for SmithChart {
    fn default() -> Self {
        Self { size: 280.0 }
    }
}

impl SmithChart {
    /// Full redraw of background geometry and all samples.
    pub fn show(&self, ui: &mut Ui, samples: &[ImpedanceSample]) {
        let (rect, _response) = ui.allocate_exact_size(Vec2::splat(self.size), Sense::hover());
        if !ui.is_rect_visible(rect) {
            return;
        }
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, egui::CornerRadius::same(4), ui.visuals().extreme_bg_color);
        painter.rect_stroke(
            rect,
            egui::CornerRadius::same(4),
            Stroke::new(1.0, ui.visuals().widgets.noninteractive.bg_stroke.color),
            StrokeKind::Inside,
        );

        let geometry = ChartGeometry::from_surface(
            rect.left() as f64,
            rect.top() as f64,
            rect.width() as f64,
            rect.height() as f64,
        );
        Self::paint_background(&painter, &geometry);

        let (points, skipped) = plotted_points(samples, &geometry);
        for point in &points {
            let pos = Pos2::new(point.x as f32, point.y as f32);
            painter.circle(pos, POINT_RADIUS, point.color, Stroke::new(1.0, POINT_OUTLINE));
        }
        if let Some(labeled) = points.iter().find(|p| p.labeled) {
            if let Some(sample) = samples.last() {
                painter.text(
                    Pos2::new(labeled.x as f32 + 10.0, labeled.y as f32 - 10.0),
                    Align2::LEFT_BOTTOM,
                    label_text(sample),
                    FontId::proportional(12.0),
                    LABEL_COLOR,
                );
            }
        }
        if skipped > 0 {
            painter.text(
                rect.left_bottom() + Vec2::new(6.0, -6.0),
                Align2::LEFT_BOTTOM,
                format!("{skipped} point(s) off-chart (singular load)"),
                FontId::proportional(11.0),
                ui.visuals().warn_fg_color,
            );
        }
    }

    fn paint_background(painter: &egui::Painter, geometry: &ChartGeometry) {
        let center = Pos2::new(geometry.cx as f32, geometry.cy as f32);
        let radius = geometry.radius as f32;
        let stroke = Stroke::new(1.0, GRID_COLOR);
        painter.circle_stroke(center, radius, stroke);
        painter.line_segment(
            [
                Pos2::new(center.x - radius, center.y),
                Pos2::new(center.x + radius, center.y),
            ],
            stroke,
        );
    }
}
