//! The eframe application shell tying stores, controllers and views together.
//!
//! The UI runs on a single cooperative event loop: each frame first drains
//! the instrument event channel and routes every event to its controller
//! (this is the only place history stores are mutated), then polls request
//! timeouts, then rebuilds the entire presentation from the stores' current
//! contents. Charts and tables never patch incrementally.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{RichText, Ui};

use crate::chart::SmithChart;
use crate::client::{InstrumentClient, InstrumentEvent, MotorPositions};
use crate::config::PanelConfig;
use crate::controllers::{
    ExportCoordinator, MeasurementController, MotorController, Status, SweepController, SweepForm,
};
use crate::sample::{DatasetColor, MOTOR_COUNT};
use crate::table::HistoryTable;

/// The bench panel application.
pub struct BenchPanelApp {
    client: Box<dyn InstrumentClient>,
    events: Receiver<InstrumentEvent>,
    positions: MotorPositions,

    motors: MotorController,
    single: MeasurementController,
    single_export: ExportCoordinator,
    sweep: SweepController,
    sweep_export: ExportCoordinator,

    chart: SmithChart,
    single_table: HistoryTable,
    sweep_table: HistoryTable,

    // Form state
    frequency_input: String,
    single_color: DatasetColor,
    single_filename: String,
    sweep_form: SweepForm,
    sweep_color: DatasetColor,
    sweep_filename: String,
    positions_error: Option<String>,
}

impl BenchPanelApp {
    /// Build the panel and issue the initial motor-position query that seeds
    /// the live-position handle.
    pub fn new(
        client: Box<dyn InstrumentClient>,
        events: Receiver<InstrumentEvent>,
        positions: MotorPositions,
        config: &PanelConfig,
    ) -> Self {
        client.request_motor_positions();
        Self {
            client,
            events,
            positions,
            motors: MotorController::new(config.request_timeout),
            single: MeasurementController::new(config.request_timeout),
            single_export: ExportCoordinator::new(config.request_timeout),
            sweep: SweepController::new(config.request_timeout),
            sweep_export: ExportCoordinator::new(config.request_timeout),
            chart: SmithChart {
                size: config.chart_size,
            },
            single_table: HistoryTable::new("single_history"),
            sweep_table: HistoryTable::new("sweep_history"),
            frequency_input: String::new(),
            single_color: DatasetColor::default(),
            single_filename: String::new(),
            sweep_form: SweepForm {
                motor_index: 1,
                ..SweepForm::default()
            },
            sweep_color: DatasetColor::default(),
            sweep_filename: String::new(),
            positions_error: None,
        }
    }

    /// Route every queued instrument event to its controller. Store updates
    /// happen here and nowhere else, so a render pass always sees a complete
    /// sequence.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                InstrumentEvent::MeasurementReady { token, result } => {
                    self.single.on_measurement_ready(token, result);
                }
                InstrumentEvent::SweepStarted { token, result } => {
                    self.sweep.on_sweep_started(token, result);
                }
                InstrumentEvent::SweepPoint { token, sample } => {
                    self.sweep.on_sweep_point(token, sample);
                }
                InstrumentEvent::SweepFinished { token, result } => {
                    self.sweep.on_sweep_finished(token, result);
                }
                InstrumentEvent::MotorMoved {
                    token,
                    motor_index,
                    result,
                } => {
                    self.motors
                        .on_motor_moved(token, motor_index, result, &self.positions);
                }
                InstrumentEvent::Calibrated { token, result } => {
                    self.motors.on_calibrated(token, result, &self.positions);
                }
                InstrumentEvent::ClearAck { token, result } => {
                    self.single.on_clear_ack(token, result);
                }
                InstrumentEvent::ExportReady { token, result } => {
                    if self.single_export.pending_token() == Some(token) {
                        self.single_export.on_export_ready(token, result);
                    } else {
                        self.sweep_export.on_export_ready(token, result);
                    }
                }
                InstrumentEvent::MotorPositions { result } => match result {
                    Ok(positions) => {
                        self.positions.set(positions);
                        self.positions_error = None;
                    }
                    Err(err) => {
                        log::warn!("failed to read motor positions: {err}");
                        self.positions_error =
                            Some(format!("Failed to load motor positions: {err}"));
                    }
                },
            }
        }
    }

    fn poll_timeouts(&mut self) {
        let now = Instant::now();
        self.motors.poll_timeouts(now);
        self.single.poll_timeouts(now);
        self.sweep.poll_timeouts(now);
        self.single_export.poll_timeouts(now);
        self.sweep_export.poll_timeouts(now);
    }

    fn motor_positions_ui(&mut self, ui: &mut Ui) {
        ui.heading("Motors");
        match self.positions.current() {
            Some(positions) => {
                let busy = self.motors.is_busy();
                egui::Grid::new("motor_positions").show(ui, |ui| {
                    for (i, pos) in positions.iter().enumerate() {
                        ui.label(format!("Motor {}", i + 1));
                        ui.label(RichText::new(pos.to_string()).monospace());
                        let response = ui.add(
                            egui::TextEdit::singleline(&mut self.motors.inputs[i])
                                .hint_text("steps")
                                .desired_width(50.0),
                        );
                        let submitted =
                            response.lost_focus() && ui.input(|inp| inp.key_pressed(egui::Key::Enter));
                        let clicked = ui
                            .add_enabled(!busy, egui::Button::new("Move"))
                            .clicked();
                        if clicked || submitted {
                            let _ = self.motors.request_move(&*self.client, i + 1);
                        }
                        ui.end_row();
                    }
                });
                if ui
                    .add_enabled(!busy, egui::Button::new("Calibrate all"))
                    .clicked()
                {
                    self.motors.request_calibrate(&*self.client);
                }
                Self::status_ui(ui, &self.motors.status);
            }
            None => {
                ui.label("Waiting for motor positions...");
            }
        }
        if let Some(err) = &self.positions_error {
            ui.colored_label(ui.visuals().error_fg_color, err);
            if ui.button("Retry").clicked() {
                self.positions_error = None;
                self.client.request_motor_positions();
            }
        }
    }

    fn readout_ui(ui: &mut Ui, readout: &crate::controllers::Readout) {
        ui.horizontal(|ui| {
            ui.label("R:");
            ui.label(RichText::new(readout.real_text()).monospace());
            ui.label("Ω    X:");
            ui.label(RichText::new(readout.imag_text()).monospace());
            ui.label("Ω");
        });
    }

    fn status_ui(ui: &mut Ui, status: &Option<Status>) {
        if let Some(status) = status {
            let color = if status.is_error {
                ui.visuals().error_fg_color
            } else {
                ui.visuals().weak_text_color()
            };
            ui.colored_label(color, &status.text);
        }
    }

    fn color_picker_ui(ui: &mut Ui, id: &str, selected: &mut DatasetColor) {
        egui::ComboBox::from_id_salt(id)
            .selected_text(selected.label())
            .show_ui(ui, |ui| {
                for color in DatasetColor::ALL {
                    ui.selectable_value(selected, color, color.label());
                }
            });
    }

    /// Ask for a save destination seeded with the resolved filename, then
    /// dispatch the export. Aborts silently if the dialog is cancelled.
    fn prompt_and_export(&mut self, sweep: bool) {
        let input = if sweep {
            self.sweep_filename.clone()
        } else {
            self.single_filename.clone()
        };
        let resolved = match crate::controllers::resolve_csv_filename(&input) {
            Ok(name) => name,
            Err(err) => {
                let coordinator = if sweep {
                    &mut self.sweep_export
                } else {
                    &mut self.single_export
                };
                coordinator.status = Some(Status::error(err.to_string()));
                return;
            }
        };
        let Some(path) = rfd::FileDialog::new()
            .set_file_name(&resolved)
            .add_filter("CSV", &["csv"])
            .save_file()
        else {
            return;
        };
        if sweep {
            let samples = self.sweep.store.all().to_vec();
            let _ = self
                .sweep_export
                .request_export(&*self.client, &input, path, Some(&samples));
        } else {
            let _ = self
                .single_export
                .request_export(&*self.client, &input, path, None);
        }
    }

    fn single_section_ui(&mut self, ui: &mut Ui) {
        ui.heading("Single measurement");
        ui.horizontal(|ui| {
            ui.label("Frequency (MHz):");
            let response = ui.text_edit_singleline(&mut self.frequency_input);
            let submitted =
                response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            ui.label("Color:");
            Self::color_picker_ui(ui, "single_color", &mut self.single_color);
            let clicked = ui
                .add_enabled(!self.single.is_measuring(), egui::Button::new("Measure"))
                .clicked();
            if clicked || submitted {
                let _ = self.single.request_measurement(
                    &*self.client,
                    &self.frequency_input,
                    &self.positions,
                    self.single_color,
                );
            }
        });
        Self::readout_ui(ui, &self.single.readout);
        Self::status_ui(ui, &self.single.status);

        self.chart.show(ui, self.single.store.all());
        self.single_table.show(ui, &self.single.store);

        ui.horizontal(|ui| {
            ui.label("Export as:");
            ui.text_edit_singleline(&mut self.single_filename);
            if ui
                .add_enabled(!self.single_export.is_exporting(), egui::Button::new("Export CSV"))
                .clicked()
            {
                self.prompt_and_export(false);
            }
            if ui.button("Clear history").clicked() {
                self.single.request_clear(&*self.client);
            }
        });
        Self::status_ui(ui, &self.single_export.status);
    }

    fn sweep_section_ui(&mut self, ui: &mut Ui) {
        ui.heading("Parameter sweep");
        ui.horizontal(|ui| {
            ui.label("Motor:");
            egui::ComboBox::from_id_salt("sweep_motor")
                .selected_text(format!("Motor {}", self.sweep_form.motor_index))
                .show_ui(ui, |ui| {
                    for index in 1..=MOTOR_COUNT {
                        ui.selectable_value(
                            &mut self.sweep_form.motor_index,
                            index,
                            format!("Motor {index}"),
                        );
                    }
                });
            ui.label("Start:");
            ui.add(egui::TextEdit::singleline(&mut self.sweep_form.start).desired_width(50.0));
            ui.label("Stop:");
            ui.add(egui::TextEdit::singleline(&mut self.sweep_form.stop).desired_width(50.0));
            ui.label("Step:");
            ui.add(egui::TextEdit::singleline(&mut self.sweep_form.step).desired_width(50.0));
            ui.label("f (MHz):");
            ui.add(egui::TextEdit::singleline(&mut self.sweep_form.frequency).desired_width(60.0));
        });
        ui.horizontal(|ui| {
            ui.label("Color:");
            Self::color_picker_ui(ui, "sweep_color", &mut self.sweep_color);
            if ui
                .add_enabled(!self.sweep.is_sweeping(), egui::Button::new("Start sweep"))
                .clicked()
            {
                let form = self.sweep_form.clone();
                let _ = self.sweep.request_sweep(&*self.client, &form, self.sweep_color);
            }
        });
        Self::readout_ui(ui, &self.sweep.readout);
        Self::status_ui(ui, &self.sweep.status);

        self.chart.show(ui, self.sweep.store.all());
        self.sweep_table.show(ui, &self.sweep.store);

        ui.horizontal(|ui| {
            ui.label("Export as:");
            ui.text_edit_singleline(&mut self.sweep_filename);
            if ui
                .add_enabled(!self.sweep_export.is_exporting(), egui::Button::new("Export CSV"))
                .clicked()
            {
                self.prompt_and_export(true);
            }
            if ui.button("Clear history").clicked() {
                self.sweep.clear_local();
            }
        });
        Self::status_ui(ui, &self.sweep_export.status);
    }
}

impl eframe::App for BenchPanelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        self.poll_timeouts();

        egui::SidePanel::left("motors")
            .resizable(false)
            .show(ctx, |ui| {
                self.motor_positions_ui(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.columns(2, |columns| {
                    self.single_section_ui(&mut columns[0]);
                    self.sweep_section_ui(&mut columns[1]);
                });
            });
        });

        // Instrument replies arrive without user input; poll for them.
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

/// Run the panel as a native window with the given client and event channel.
pub fn run_panel(
    client: Box<dyn InstrumentClient>,
    events: Receiver<InstrumentEvent>,
    positions: MotorPositions,
    config: PanelConfig,
) -> eframe::Result<()> {
    let native_options = config.native_options.clone().unwrap_or_else(|| {
        let mut options = eframe::NativeOptions::default();
        options.viewport = egui::ViewportBuilder::default().with_inner_size([1100.0, 760.0]);
        options
    });
    let title = config.title.clone();
    eframe::run_native(
        &title,
        native_options,
        Box::new(move |_cc| Ok(Box::new(BenchPanelApp::new(client, events, positions, &config)))),
    )
}
