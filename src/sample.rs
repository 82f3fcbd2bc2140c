//! Measurement record types shared by the history stores, charts and tables.

use chrono::{DateTime, Utc};
use egui::Color32;
use serde::{Deserialize, Serialize};

/// Number of stepper motors on the matching fixture.
pub const MOTOR_COUNT: usize = 4;

/// Dataset color tag chosen by the user at capture time.
///
/// The palette is fixed; the tag is used only for rendering and never for
/// sample identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetColor {
    Red,
    Blue,
    Green,
    Orange,
    Purple,
    Teal,
}

impl DatasetColor {
    /// All palette entries (useful for combo-box UIs).
    pub const ALL: [DatasetColor; 6] = [
        DatasetColor::Red,
        DatasetColor::Blue,
        DatasetColor::Green,
        DatasetColor::Orange,
        DatasetColor::Purple,
        DatasetColor::Teal,
    ];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DatasetColor::Red => "Red",
            DatasetColor::Blue => "Blue",
            DatasetColor::Green => "Green",
            DatasetColor::Orange => "Orange",
            DatasetColor::Purple => "Purple",
            DatasetColor::Teal => "Teal",
        }
    }

    /// Fill color used for chart points and table color dots.
    pub fn color32(&self) -> Color32 {
        match self {
            DatasetColor::Red => Color32::from_rgb(231, 76, 60),
            DatasetColor::Blue => Color32::from_rgb(52, 152, 219),
            DatasetColor::Green => Color32::from_rgb(46, 204, 113),
            DatasetColor::Orange => Color32::from_rgb(230, 126, 34),
            DatasetColor::Purple => Color32::from_rgb(155, 89, 182),
            DatasetColor::Teal => Color32::from_rgb(26, 188, 156),
        }
    }
}

impl Default for DatasetColor {
    fn default() -> Self {
        DatasetColor::Blue
    }
}

/// One measured complex impedance with its experimental context.
///
/// The motor positions are a snapshot taken at measurement time and are never
/// mutated afterwards. Identity within a store is positional (1-based when
/// displayed); two samples with identical fields are both valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSample {
    /// Step counts of motors 1-4 at the time of the measurement.
    pub motor_positions: [i32; MOTOR_COUNT],
    /// Stimulus frequency in MHz.
    pub frequency_mhz: f64,
    /// Real part of the measured impedance, Ohms.
    pub real_impedance: f64,
    /// Imaginary part of the measured impedance, Ohms.
    pub imag_impedance: f64,
    /// Dataset color tag selected when the sample was captured.
    pub color: DatasetColor,
    /// When the panel absorbed the measurement result.
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl ImpedanceSample {
    pub fn new(
        motor_positions: [i32; MOTOR_COUNT],
        frequency_mhz: f64,
        real_impedance: f64,
        imag_impedance: f64,
        color: DatasetColor,
    ) -> Self {
        Self {
            motor_positions,
            frequency_mhz,
            real_impedance,
            imag_impedance,
            color,
            captured_at: Utc::now(),
        }
    }
}
