//! Smithbench crate root: re-exports and module wiring.
//!
//! A bench control panel, built on egui/eframe, for a stepper-motor-driven
//! impedance-matching fixture paired with a vector network analyzer. The
//! panel jogs and calibrates the four tuning motors, dispatches measurement
//! and sweep requests to an external instrument-control service, and keeps
//! two independent measurement histories (single-shot and sweep), each
//! rendered as a Smith chart plus a results table.
//!
//! Module map:
//! - `sample`: measurement records and the dataset color palette
//! - `history`: append-only history stores
//! - `transform`: impedance → reflection coefficient → pixel mapping
//! - `chart`: Smith-chart rendering
//! - `table`: tabular history views
//! - `client`: the instrument-service seam (requests, events, tokens)
//! - `controllers`: measurement/sweep/export orchestration and validation
//! - `config`, `app`: panel configuration and the eframe shell

pub mod app;
pub mod chart;
pub mod client;
pub mod config;
pub mod controllers;
pub mod history;
pub mod sample;
pub mod table;
pub mod transform;

// Public re-exports for a compact external API
pub use app::{run_panel, BenchPanelApp};
pub use client::{
    instrument_channel, InstrumentClient, InstrumentError, InstrumentEvent, MotorPositions,
    RequestToken,
};
pub use config::PanelConfig;
pub use controllers::{
    ExportCoordinator, MeasurementController, MotorController, SweepController, SweepForm,
    ValidationError,
};
pub use history::HistoryStore;
pub use sample::{DatasetColor, ImpedanceSample, MOTOR_COUNT};
pub use transform::{reflection_coefficient, ChartGeometry, DegenerateLoad, Z0_OHMS};
