//! Tabular view of a history store.
//!
//! The table is rebuilt from the store's current contents on every frame
//! (discard-and-recreate, no row patching) so the presentation can never show
//! stale rows. The scroll area sticks to the bottom, keeping the most
//! recently appended row visible.

use egui::{Color32, RichText, ScrollArea, Stroke, Ui};

use crate::history::HistoryStore;
use crate::sample::{DatasetColor, ImpedanceSample};

/// Delimiter between motor positions in the positions column.
const MOTOR_DELIMITER: &str = ", ";

/// One fully formatted table row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// 1-based display index, derived from store position.
    pub index: usize,
    pub motor_positions: String,
    /// Frequency, 1 decimal place.
    pub frequency: String,
    /// Real impedance, 2 decimal places.
    pub real: String,
    /// Imaginary impedance, 2 decimal places.
    pub imag: String,
    pub color: DatasetColor,
}

/// Build one row per sample in store order.
pub fn history_rows(samples: &[ImpedanceSample]) -> Vec<TableRow> {
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| TableRow {
            index: i + 1,
            motor_positions: sample
                .motor_positions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(MOTOR_DELIMITER),
            frequency: format!("{:.1}", sample.frequency_mhz),
            real: format!("{:.2}", sample.real_impedance),
            imag: format!("{:.2}", sample.imag_impedance),
            color: sample.color,
        })
        .collect()
}

/// Widget that renders one history store as a table.
pub struct HistoryTable {
    id: &'static str,
    pub max_height: f32,
}

impl HistoryTable {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            max_height: 160.0,
        }
    }

    pub fn show(&self, ui: &mut Ui, store: &HistoryStore) {
        ScrollArea::vertical()
            .id_salt(self.id)
            .max_height(self.max_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                egui::Grid::new((self.id, "grid"))
                    .striped(true)
                    .min_col_width(40.0)
                    .show(ui, |ui| {
                        ui.label(RichText::new("#").strong());
                        ui.label(RichText::new("Motor positions").strong());
                        ui.label(RichText::new("f (MHz)").strong());
                        ui.label(RichText::new("R (Ω)").strong());
                        ui.label(RichText::new("X (Ω)").strong());
                        ui.label(RichText::new("Color").strong());
                        ui.end_row();

                        let rows = history_rows(store.all());
                        if rows.is_empty() {
                            ui.label("No impedance data yet.");
                            ui.end_row();
                            return;
                        }
                        for row in rows {
                            ui.label(row.index.to_string());
                            ui.label(row.motor_positions);
                            ui.label(row.frequency);
                            ui.label(row.real);
                            ui.label(row.imag);
                            Self::color_dot(ui, row.color);
                            ui.end_row();
                        }
                    });
            });
    }

    fn color_dot(ui: &mut Ui, color: DatasetColor) {
        let (rect, _) = ui.allocate_exact_size(egui::Vec2::splat(12.0), egui::Sense::hover());
        ui.painter().circle(
            rect.center(),
            5.0,
            color.color32(),
            Stroke::new(1.0, Color32::from_rgb(51, 51, 51)),
        );
    }
}
