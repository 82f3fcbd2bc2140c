//! Configuration for the bench panel.

use std::time::Duration;

/// Top-level configuration for [`crate::app::BenchPanelApp`].
pub struct PanelConfig {
    /// Native window title.
    pub title: String,
    /// How long a request may stay unanswered before it is abandoned and the
    /// affected display flips to an error indicator.
    pub request_timeout: Duration,
    /// Side length of each Smith chart, points.
    pub chart_size: f32,
    /// Optional eframe native-window options.
    pub native_options: Option<eframe::NativeOptions>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            title: "Impedance Matching Bench".to_string(),
            request_timeout: Duration::from_secs(15),
            chart_size: 280.0,
            native_options: None,
        }
    }
}
