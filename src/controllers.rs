//! Orchestration of measurements, sweeps, clears and exports.
//!
//! Controllers own the two history stores and all per-dataset display state.
//! They validate user input before any dispatch, hand requests to the
//! [`InstrumentClient`] seam, and fold the resulting [`InstrumentEvent`]s
//! back into their store. Every operation is all-or-nothing: a failure path
//! never leaves a store or its views partially updated.
//!
//! Hardening over the bench UI this replaces: every request records a token
//! and an issue time, late replies with a stale token are dropped, and
//! requests with no reply are abandoned after a configurable timeout instead
//! of leaving "Measuring..." up forever.
//!
//! [`InstrumentEvent`]: crate::client::InstrumentEvent

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::client::{
    next_token, ExportRequest, InstrumentClient, InstrumentError, MeasureRequest, MotorPositions,
    RequestToken, SweepRequest,
};
use crate::history::HistoryStore;
use crate::sample::{DatasetColor, ImpedanceSample};

/// Malformed or out-of-range user input, rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("enter a valid positive frequency in MHz")]
    Frequency,
    #[error("motor positions are not known yet")]
    PositionsUnknown,
    #[error("enter a filename for export")]
    EmptyFilename,
    #[error("enter a whole number of steps between -200 and 200")]
    MotorSteps,
    #[error("sweep {0} must be a finite number")]
    SweepNumber(&'static str),
    #[error("sweep motor index must be between 1 and 4")]
    MotorIndex,
    #[error("step size must be non-zero")]
    ZeroStep,
    #[error("step sign must match the sweep direction")]
    StepDirection,
}

/// Largest single jog accepted by the fixture, steps.
pub const MAX_MOTOR_STEPS: i32 = 200;

/// Parse and validate a relative motor jog entered as text. Must be a whole
/// number within the fixture's per-command limit.
pub fn parse_motor_steps(text: &str) -> Result<i32, ValidationError> {
    match text.trim().parse::<i32>() {
        Ok(steps) if (-MAX_MOTOR_STEPS..=MAX_MOTOR_STEPS).contains(&steps) => Ok(steps),
        _ => Err(ValidationError::MotorSteps),
    }
}

/// Parse and validate a frequency entered as text. Must be a finite number
/// strictly greater than zero.
pub fn parse_frequency_mhz(text: &str) -> Result<f64, ValidationError> {
    match text.trim().parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => Ok(f),
        _ => Err(ValidationError::Frequency),
    }
}

/// Resolve a user-supplied export filename: must be non-empty after
/// trimming; a `.csv` suffix is appended when absent.
pub fn resolve_csv_filename(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyFilename);
    }
    if trimmed.ends_with(".csv") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}.csv"))
    }
}

/// Impedance readout shown next to each chart.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Readout {
    /// Nothing measured yet.
    #[default]
    Blank,
    /// A request is in flight.
    Measuring,
    /// The last request failed or timed out.
    Failed,
    /// Last successful measurement.
    Ready { real: f64, imag: f64 },
}

impl Readout {
    pub fn real_text(&self) -> String {
        match self {
            Readout::Blank => "—".into(),
            Readout::Measuring => "Measuring...".into(),
            Readout::Failed => "Error".into(),
            Readout::Ready { real, .. } => format!("{real:.2}"),
        }
    }

    pub fn imag_text(&self) -> String {
        match self {
            Readout::Blank => "—".into(),
            Readout::Measuring => "Measuring...".into(),
            Readout::Failed => "Error".into(),
            Readout::Ready { imag, .. } => format!("{imag:.2}"),
        }
    }
}

/// One user-visible status line per dataset section.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub text: String,
    pub is_error: bool,
}

impl Status {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// An outstanding request awaiting its reply.
#[derive(Debug, Clone, Copy)]
struct Pending {
    token: RequestToken,
    issued: Instant,
}

impl Pending {
    fn new(token: RequestToken) -> Self {
        Self {
            token,
            issued: Instant::now(),
        }
    }

    fn matches(&self, token: RequestToken) -> bool {
        self.token == token
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.issued) >= timeout
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Motor control
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates motor jogs and the calibrate-all reset.
///
/// Owns one step-entry field per motor. A jog is relative; the reply carries
/// the motor's new absolute position, which is folded into the shared
/// [`MotorPositions`] handle. Calibration resets every position to zero.
pub struct MotorController {
    /// Raw step-entry text, one field per motor.
    pub inputs: [String; crate::sample::MOTOR_COUNT],
    pub status: Option<Status>,
    pending_move: Option<(Pending, usize)>,
    pending_calibrate: Option<Pending>,
    timeout: Duration,
}

impl MotorController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inputs: std::array::from_fn(|_| String::new()),
            status: None,
            pending_move: None,
            pending_calibrate: None,
            timeout,
        }
    }

    /// Validate the step entry for one motor (1-based) and dispatch a move.
    /// On validation failure nothing is dispatched.
    pub fn request_move(
        &mut self,
        client: &dyn InstrumentClient,
        motor_index: usize,
    ) -> Result<(), ValidationError> {
        if !(1..=crate::sample::MOTOR_COUNT).contains(&motor_index) {
            self.status = Some(Status::error(ValidationError::MotorIndex.to_string()));
            return Err(ValidationError::MotorIndex);
        }
        let steps = match parse_motor_steps(&self.inputs[motor_index - 1]) {
            Ok(steps) => steps,
            Err(err) => {
                self.status = Some(Status::error(err.to_string()));
                return Err(err);
            }
        };
        let token = next_token();
        self.pending_move = Some((Pending::new(token), motor_index));
        self.status = None;
        client.move_motor(token, motor_index, steps);
        Ok(())
    }

    /// Fold a move reply into the shared position handle. Stale tokens are
    /// dropped.
    pub fn on_motor_moved(
        &mut self,
        token: RequestToken,
        motor_index: usize,
        result: Result<i32, InstrumentError>,
        positions: &MotorPositions,
    ) {
        let Some((pending, _)) = self.pending_move else {
            log::debug!("dropping motor-move reply with no pending move (token {token})");
            return;
        };
        if !pending.matches(token) {
            log::debug!("dropping stale motor-move reply (token {token})");
            return;
        }
        self.pending_move = None;
        match result {
            Ok(position) => {
                positions.set_motor(motor_index, position);
                self.status = Some(Status::info(format!(
                    "Motor {motor_index} at position {position}."
                )));
            }
            Err(err) => {
                self.status = Some(Status::error(format!(
                    "Failed to move motor {motor_index}: {err}"
                )));
            }
        }
    }

    /// Dispatch a calibrate-all request. Positions reset to zero only once
    /// the service acknowledges.
    pub fn request_calibrate(&mut self, client: &dyn InstrumentClient) {
        let token = next_token();
        self.pending_calibrate = Some(Pending::new(token));
        client.calibrate_motors(token);
    }

    pub fn on_calibrated(
        &mut self,
        token: RequestToken,
        result: Result<(), InstrumentError>,
        positions: &MotorPositions,
    ) {
        let Some(pending) = self.pending_calibrate else {
            log::debug!("dropping calibrate ack with no pending calibrate (token {token})");
            return;
        };
        if !pending.matches(token) {
            log::debug!("dropping stale calibrate ack (token {token})");
            return;
        }
        self.pending_calibrate = None;
        match result {
            Ok(()) => {
                positions.set([0; crate::sample::MOTOR_COUNT]);
                self.status = Some(Status::info("All motor positions calibrated to 0."));
            }
            Err(err) => {
                self.status = Some(Status::error(format!("Calibration failed: {err}")));
            }
        }
    }

    /// Abandon requests that outlived the configured timeout.
    pub fn poll_timeouts(&mut self, now: Instant) {
        if let Some((pending, motor_index)) = self.pending_move {
            if pending.expired(now, self.timeout) {
                log::warn!("move request {} for motor {motor_index} timed out", pending.token);
                self.pending_move = None;
                self.status = Some(Status::error(format!(
                    "Motor {motor_index} move timed out."
                )));
            }
        }
        if let Some(pending) = self.pending_calibrate {
            if pending.expired(now, self.timeout) {
                log::warn!("calibrate request {} timed out", pending.token);
                self.pending_calibrate = None;
                self.status = Some(Status::error("Calibration timed out.".to_string()));
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending_move.is_some() || self.pending_calibrate.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-shot measurements
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates single-shot measurements and the ack-gated history clear.
pub struct MeasurementController {
    pub store: HistoryStore,
    pub readout: Readout,
    pub status: Option<Status>,
    pending_measure: Option<Pending>,
    pending_clear: Option<Pending>,
    timeout: Duration,
}

impl MeasurementController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            store: HistoryStore::new(),
            readout: Readout::Blank,
            status: None,
            pending_measure: None,
            pending_clear: None,
            timeout,
        }
    }

    /// Validate the frequency text and current motor positions, then dispatch
    /// a measurement request. On validation failure nothing is dispatched and
    /// no state beyond the status line changes.
    pub fn request_measurement(
        &mut self,
        client: &dyn InstrumentClient,
        frequency_text: &str,
        positions: &MotorPositions,
        color: DatasetColor,
    ) -> Result<(), ValidationError> {
        let frequency_mhz = self.validated(parse_frequency_mhz(frequency_text))?;
        let motor_positions = self.validated(
            positions
                .current()
                .ok_or(ValidationError::PositionsUnknown),
        )?;

        let token = next_token();
        self.pending_measure = Some(Pending::new(token));
        self.readout = Readout::Measuring;
        self.status = None;
        client.measure_impedance(
            token,
            MeasureRequest {
                frequency_mhz,
                motor_positions,
                dataset_color: color,
            },
        );
        Ok(())
    }

    /// Fold a measurement reply into the store. Stale tokens are dropped.
    pub fn on_measurement_ready(
        &mut self,
        token: RequestToken,
        result: Result<ImpedanceSample, InstrumentError>,
    ) {
        let Some(pending) = self.pending_measure else {
            log::debug!("dropping measurement reply with no pending request (token {token})");
            return;
        };
        if !pending.matches(token) {
            log::debug!(
                "dropping stale measurement reply (token {token}, expected {})",
                pending.token
            );
            return;
        }
        self.pending_measure = None;
        match result {
            Ok(sample) => {
                self.readout = Readout::Ready {
                    real: sample.real_impedance,
                    imag: sample.imag_impedance,
                };
                if crate::transform::reflection_coefficient(
                    sample.real_impedance,
                    sample.imag_impedance,
                    crate::transform::Z0_OHMS,
                )
                .is_err()
                {
                    log::warn!(
                        "sample {} + j{} Ω is singular and will not appear on the chart",
                        sample.real_impedance,
                        sample.imag_impedance
                    );
                }
                self.store.append(sample);
            }
            Err(err) => {
                self.readout = Readout::Failed;
                self.status = Some(Status::error(err.to_string()));
            }
        }
    }

    /// Dispatch a server-side history clear. The local store is emptied only
    /// once the service acknowledges (strict ack-gating): if the clear fails,
    /// local and remote history stay consistent and the error is shown.
    pub fn request_clear(&mut self, client: &dyn InstrumentClient) {
        let token = next_token();
        self.pending_clear = Some(Pending::new(token));
        client.clear_history(token);
    }

    pub fn on_clear_ack(&mut self, token: RequestToken, result: Result<(), InstrumentError>) {
        let Some(pending) = self.pending_clear else {
            log::debug!("dropping clear ack with no pending clear (token {token})");
            return;
        };
        if !pending.matches(token) {
            log::debug!("dropping stale clear ack (token {token})");
            return;
        }
        self.pending_clear = None;
        match result {
            Ok(()) => {
                self.store.clear();
                self.readout = Readout::Blank;
                self.status = Some(Status::info("Impedance history cleared."));
            }
            Err(err) => {
                self.status = Some(Status::error(format!("Failed to clear history: {err}")));
            }
        }
    }

    /// Abandon requests that outlived the configured timeout.
    pub fn poll_timeouts(&mut self, now: Instant) {
        if let Some(pending) = self.pending_measure {
            if pending.expired(now, self.timeout) {
                log::warn!("measurement request {} timed out", pending.token);
                self.pending_measure = None;
                self.readout = Readout::Failed;
                self.status = Some(Status::error(format!(
                    "Measurement timed out after {:.0} s.",
                    self.timeout.as_secs_f64()
                )));
            }
        }
        if let Some(pending) = self.pending_clear {
            if pending.expired(now, self.timeout) {
                log::warn!("clear request {} timed out", pending.token);
                self.pending_clear = None;
                self.status = Some(Status::error("Clear request timed out.".to_string()));
            }
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.pending_measure.is_some()
    }

    fn validated<T>(&mut self, result: Result<T, ValidationError>) -> Result<T, ValidationError> {
        if let Err(err) = &result {
            self.status = Some(Status::error(err.to_string()));
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweeps
// ─────────────────────────────────────────────────────────────────────────────

/// Raw sweep parameters as entered in the UI.
#[derive(Debug, Clone, Default)]
pub struct SweepForm {
    /// 1-based motor selection.
    pub motor_index: usize,
    pub start: String,
    pub stop: String,
    pub step: String,
    pub frequency: String,
}

/// Validated sweep parameters ready for dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParams {
    pub motor_index: usize,
    pub start_value: f64,
    pub stop_value: f64,
    pub step_size: f64,
    pub frequency_mhz: f64,
}

impl SweepForm {
    /// Validate every field before dispatch. The bench UI this replaces sent
    /// `NaN` for unparsable fields; here non-numeric or inconsistent
    /// parameters are rejected outright. The step sign must match the sweep
    /// direction (positive for increasing, negative for decreasing), the rule
    /// the backend itself enforces.
    pub fn validate(&self) -> Result<SweepParams, ValidationError> {
        if !(1..=crate::sample::MOTOR_COUNT).contains(&self.motor_index) {
            return Err(ValidationError::MotorIndex);
        }
        let parse = |text: &str, field: &'static str| -> Result<f64, ValidationError> {
            text.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or(ValidationError::SweepNumber(field))
        };
        let start_value = parse(&self.start, "start")?;
        let stop_value = parse(&self.stop, "stop")?;
        let step_size = parse(&self.step, "step")?;
        let frequency_mhz = parse_frequency_mhz(&self.frequency)?;
        if step_size == 0.0 {
            return Err(ValidationError::ZeroStep);
        }
        let increasing = stop_value >= start_value;
        if (increasing && step_size < 0.0) || (!increasing && step_size > 0.0) {
            return Err(ValidationError::StepDirection);
        }
        Ok(SweepParams {
            motor_index: self.motor_index,
            start_value,
            stop_value,
            step_size,
            frequency_mhz,
        })
    }
}

/// An accepted sweep currently streaming points.
#[derive(Debug, Clone, Copy)]
struct ActiveSweep {
    token: RequestToken,
    last_progress: Instant,
}

/// Orchestrates sweep initiation and absorbs per-point results into the
/// sweep history store.
pub struct SweepController {
    pub store: HistoryStore,
    pub readout: Readout,
    pub status: Option<Status>,
    pending_start: Option<Pending>,
    active: Option<ActiveSweep>,
    timeout: Duration,
}

impl SweepController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            store: HistoryStore::new(),
            readout: Readout::Blank,
            status: None,
            pending_start: None,
            active: None,
            timeout,
        }
    }

    /// Validate the sweep form and dispatch a start-sweep request.
    pub fn request_sweep(
        &mut self,
        client: &dyn InstrumentClient,
        form: &SweepForm,
        color: DatasetColor,
    ) -> Result<(), ValidationError> {
        let params = match form.validate() {
            Ok(params) => params,
            Err(err) => {
                self.status = Some(Status::error(err.to_string()));
                return Err(err);
            }
        };
        let token = next_token();
        self.pending_start = Some(Pending::new(token));
        self.active = None;
        self.readout = Readout::Measuring;
        self.status = None;
        client.start_sweep(
            token,
            SweepRequest {
                motor_index: params.motor_index,
                start_value: params.start_value,
                stop_value: params.stop_value,
                step_size: params.step_size,
                frequency_mhz: params.frequency_mhz,
                dataset_color: color,
            },
        );
        Ok(())
    }

    pub fn on_sweep_started(&mut self, token: RequestToken, result: Result<(), InstrumentError>) {
        let Some(pending) = self.pending_start else {
            log::debug!("dropping sweep-started reply with no pending sweep (token {token})");
            return;
        };
        if !pending.matches(token) {
            log::debug!("dropping stale sweep-started reply (token {token})");
            return;
        }
        self.pending_start = None;
        match result {
            Ok(()) => {
                self.active = Some(ActiveSweep {
                    token,
                    last_progress: Instant::now(),
                });
                self.status = Some(Status::info("Sweep started."));
            }
            Err(err) => {
                self.readout = Readout::Failed;
                self.status = Some(Status::error(format!("Failed to start sweep: {err}")));
            }
        }
    }

    /// Absorb one streamed sweep point. Points are accepted only for the
    /// active sweep token so a superseded sweep can never contaminate the
    /// store.
    pub fn on_sweep_point(&mut self, token: RequestToken, sample: ImpedanceSample) {
        let Some(active) = &mut self.active else {
            log::debug!("dropping sweep point with no active sweep (token {token})");
            return;
        };
        if active.token != token {
            log::debug!("dropping sweep point from superseded sweep (token {token})");
            return;
        }
        active.last_progress = Instant::now();
        self.readout = Readout::Ready {
            real: sample.real_impedance,
            imag: sample.imag_impedance,
        };
        self.store.append(sample);
    }

    pub fn on_sweep_finished(
        &mut self,
        token: RequestToken,
        result: Result<usize, InstrumentError>,
    ) {
        let is_active = self.active.map(|a| a.token) == Some(token);
        let is_pending = self.pending_start.map(|p| p.token) == Some(token);
        if !is_active && !is_pending {
            log::debug!("dropping sweep-finished reply for unknown sweep (token {token})");
            return;
        }
        self.active = None;
        self.pending_start = None;
        match result {
            Ok(count) => {
                self.status = Some(Status::info(format!("Sweep finished: {count} point(s).")));
                if self.store.is_empty() {
                    self.readout = Readout::Blank;
                }
            }
            Err(err) => {
                self.readout = Readout::Failed;
                self.status = Some(Status::error(format!("Sweep failed: {err}")));
            }
        }
    }

    /// The backend holds no copy of the panel's sweep history, so clearing is
    /// a purely local operation with no service round trip.
    pub fn clear_local(&mut self) {
        self.store.clear();
        self.readout = Readout::Blank;
        self.status = Some(Status::info("Sweep history cleared."));
    }

    /// Abandon a sweep that was never accepted or stopped making progress.
    pub fn poll_timeouts(&mut self, now: Instant) {
        if let Some(pending) = self.pending_start {
            if pending.expired(now, self.timeout) {
                log::warn!("sweep start request {} timed out", pending.token);
                self.pending_start = None;
                self.readout = Readout::Failed;
                self.status = Some(Status::error("Sweep start timed out.".to_string()));
            }
        }
        if let Some(active) = self.active {
            if now.duration_since(active.last_progress) >= self.timeout {
                log::warn!("sweep {} stalled, abandoning", active.token);
                self.active = None;
                self.status = Some(Status::error(
                    "Sweep stalled; no further points will be accepted.".to_string(),
                ));
            }
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.pending_start.is_some() || self.active.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSV export
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PendingExport {
    token: RequestToken,
    issued: Instant,
    save_to: PathBuf,
}

/// Requests server-side CSV materialization of a history store and saves the
/// returned bytes under the user-chosen path.
pub struct ExportCoordinator {
    pub status: Option<Status>,
    pending: Option<PendingExport>,
    timeout: Duration,
}

impl ExportCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            status: None,
            pending: None,
            timeout,
        }
    }

    /// Dispatch an export request. `samples` carries the sweep history when
    /// the backend holds no copy of its own; pass `None` for the
    /// single-measurement history. `save_to` is the already-chosen local
    /// destination for the returned bytes.
    pub fn request_export(
        &mut self,
        client: &dyn InstrumentClient,
        filename_input: &str,
        save_to: PathBuf,
        samples: Option<&[ImpedanceSample]>,
    ) -> Result<(), ValidationError> {
        let filename = match resolve_csv_filename(filename_input) {
            Ok(name) => name,
            Err(err) => {
                self.status = Some(Status::error(err.to_string()));
                return Err(err);
            }
        };
        let token = next_token();
        self.pending = Some(PendingExport {
            token,
            issued: Instant::now(),
            save_to,
        });
        self.status = None;
        client.export_csv(
            token,
            ExportRequest {
                filename,
                samples: samples.map(|s| s.to_vec()),
            },
        );
        Ok(())
    }

    pub fn on_export_ready(
        &mut self,
        token: RequestToken,
        result: Result<Vec<u8>, InstrumentError>,
    ) {
        let Some(pending) = self.pending.clone() else {
            log::debug!("dropping export reply with no pending export (token {token})");
            return;
        };
        if pending.token != token {
            log::debug!("dropping stale export reply (token {token})");
            return;
        }
        self.pending = None;
        match result {
            Ok(bytes) => match std::fs::write(&pending.save_to, bytes) {
                Ok(()) => {
                    self.status = Some(Status::info(format!(
                        "CSV saved to {}.",
                        pending.save_to.display()
                    )));
                }
                Err(err) => {
                    log::error!("failed to write {}: {err}", pending.save_to.display());
                    self.status = Some(Status::error(format!("Failed to save CSV: {err}")));
                }
            },
            Err(err) => {
                self.status = Some(Status::error(format!("Error saving CSV: {err}")));
            }
        }
    }

    pub fn poll_timeouts(&mut self, now: Instant) {
        if let Some(pending) = &self.pending {
            if now.duration_since(pending.issued) >= self.timeout {
                log::warn!("export request {} timed out", pending.token);
                self.pending = None;
                self.status = Some(Status::error("Export timed out.".to_string()));
            }
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.pending.is_some()
    }

    /// Token of the outstanding export, used to route replies when more than
    /// one coordinator exists.
    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending.as_ref().map(|p| p.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every dispatched request so tests can assert on (non-)dispatch.
    #[derive(Debug, PartialEq)]
    enum Dispatch {
        Measure(RequestToken, MeasureRequest),
        Sweep(RequestToken, SweepRequest),
        Export(RequestToken, ExportRequest),
        Clear(RequestToken),
        Move(RequestToken, usize, i32),
        Calibrate(RequestToken),
        Positions,
    }

    #[derive(Default)]
    struct MockClient {
        dispatched: Mutex<Vec<Dispatch>>,
    }

    impl MockClient {
        fn calls(&self) -> usize {
            self.dispatched.lock().unwrap().len()
        }

        fn last_token(&self) -> RequestToken {
            match self.dispatched.lock().unwrap().last().unwrap() {
                Dispatch::Measure(t, _)
                | Dispatch::Sweep(t, _)
                | Dispatch::Export(t, _)
                | Dispatch::Clear(t)
                | Dispatch::Move(t, _, _)
                | Dispatch::Calibrate(t) => *t,
                Dispatch::Positions => panic!("position queries carry no token"),
            }
        }
    }

    impl InstrumentClient for MockClient {
        fn measure_impedance(&self, token: RequestToken, request: MeasureRequest) {
            self.dispatched
                .lock()
                .unwrap()
                .push(Dispatch::Measure(token, request));
        }
        fn start_sweep(&self, token: RequestToken, request: SweepRequest) {
            self.dispatched
                .lock()
                .unwrap()
                .push(Dispatch::Sweep(token, request));
        }
        fn export_csv(&self, token: RequestToken, request: ExportRequest) {
            self.dispatched
                .lock()
                .unwrap()
                .push(Dispatch::Export(token, request));
        }
        fn clear_history(&self, token: RequestToken) {
            self.dispatched.lock().unwrap().push(Dispatch::Clear(token));
        }
        fn move_motor(&self, token: RequestToken, motor_index: usize, steps: i32) {
            self.dispatched
                .lock()
                .unwrap()
                .push(Dispatch::Move(token, motor_index, steps));
        }
        fn calibrate_motors(&self, token: RequestToken) {
            self.dispatched
                .lock()
                .unwrap()
                .push(Dispatch::Calibrate(token));
        }
        fn request_motor_positions(&self) {
            self.dispatched.lock().unwrap().push(Dispatch::Positions);
        }
    }

    fn known_positions() -> MotorPositions {
        let positions = MotorPositions::new();
        positions.set([10, 20, 30, 40]);
        positions
    }

    fn sample(real: f64, imag: f64) -> ImpedanceSample {
        ImpedanceSample::new([10, 20, 30, 40], 13.56, real, imag, DatasetColor::Red)
    }

    fn timeout() -> Duration {
        Duration::from_secs(10)
    }

    // ── Frequency validation ────────────────────────────────────────────

    #[test]
    fn invalid_frequencies_are_rejected_without_dispatch() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        let positions = known_positions();

        for bad in ["-5", "abc", "", "0", "inf", "nan"] {
            let err = ctrl
                .request_measurement(&client, bad, &positions, DatasetColor::Red)
                .unwrap_err();
            assert_eq!(err, ValidationError::Frequency, "input {bad:?}");
        }
        assert_eq!(client.calls(), 0);
        assert!(ctrl.store.is_empty());
        assert!(ctrl.status.as_ref().unwrap().is_error);
    }

    #[test]
    fn valid_frequency_dispatches_and_shows_measuring() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());

        ctrl.request_measurement(&client, "13.56", &known_positions(), DatasetColor::Blue)
            .unwrap();
        assert_eq!(client.calls(), 1);
        assert!(ctrl.is_measuring());
        assert_eq!(ctrl.readout, Readout::Measuring);
        assert_eq!(ctrl.readout.real_text(), "Measuring...");

        let dispatched = client.dispatched.lock().unwrap();
        let Dispatch::Measure(_, req) = &dispatched[0] else {
            panic!("expected a measurement dispatch");
        };
        assert_eq!(req.frequency_mhz, 13.56);
        assert_eq!(req.motor_positions, [10, 20, 30, 40]);
        assert_eq!(req.dataset_color, DatasetColor::Blue);
    }

    #[test]
    fn unknown_positions_block_dispatch() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        let err = ctrl
            .request_measurement(&client, "13.56", &MotorPositions::new(), DatasetColor::Red)
            .unwrap_err();
        assert_eq!(err, ValidationError::PositionsUnknown);
        assert_eq!(client.calls(), 0);
    }

    // ── Measurement replies ─────────────────────────────────────────────

    #[test]
    fn successful_reply_appends_and_updates_readout() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        ctrl.request_measurement(&client, "13.56", &known_positions(), DatasetColor::Red)
            .unwrap();
        let token = client.last_token();

        ctrl.on_measurement_ready(token, Ok(sample(48.7, -3.2)));
        assert_eq!(ctrl.store.len(), 1);
        assert!(!ctrl.is_measuring());
        assert_eq!(ctrl.readout.real_text(), "48.70");
        assert_eq!(ctrl.readout.imag_text(), "-3.20");
    }

    #[test]
    fn failed_reply_leaves_store_unmodified() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        ctrl.request_measurement(&client, "13.56", &known_positions(), DatasetColor::Red)
            .unwrap();
        let token = client.last_token();

        ctrl.on_measurement_ready(token, Err(InstrumentError::Service("VNA not connected".into())));
        assert!(ctrl.store.is_empty());
        assert_eq!(ctrl.readout, Readout::Failed);
        assert_eq!(ctrl.readout.real_text(), "Error");
        assert_eq!(ctrl.status.as_ref().unwrap().text, "VNA not connected");
    }

    #[test]
    fn stale_measurement_reply_is_dropped() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        ctrl.request_measurement(&client, "10", &known_positions(), DatasetColor::Red)
            .unwrap();
        let first = client.last_token();
        // A second rapid-fire request supersedes the first.
        ctrl.request_measurement(&client, "20", &known_positions(), DatasetColor::Red)
            .unwrap();
        let second = client.last_token();
        assert_ne!(first, second);

        // The late reply to the superseded request must not be absorbed.
        ctrl.on_measurement_ready(first, Ok(sample(99.0, 99.0)));
        assert!(ctrl.store.is_empty());
        assert!(ctrl.is_measuring());

        ctrl.on_measurement_ready(second, Ok(sample(50.0, 0.0)));
        assert_eq!(ctrl.store.len(), 1);
        assert_eq!(ctrl.store.last().unwrap().real_impedance, 50.0);
    }

    #[test]
    fn measurement_times_out() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(Duration::from_secs(5));
        ctrl.request_measurement(&client, "10", &known_positions(), DatasetColor::Red)
            .unwrap();
        let token = client.last_token();

        ctrl.poll_timeouts(Instant::now() + Duration::from_secs(6));
        assert!(!ctrl.is_measuring());
        assert_eq!(ctrl.readout, Readout::Failed);

        // The reply arriving after the timeout is ignored.
        ctrl.on_measurement_ready(token, Ok(sample(50.0, 0.0)));
        assert!(ctrl.store.is_empty());
    }

    // ── Clear protocol ──────────────────────────────────────────────────

    #[test]
    fn clear_is_ack_gated() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        ctrl.request_measurement(&client, "10", &known_positions(), DatasetColor::Red)
            .unwrap();
        ctrl.on_measurement_ready(client.last_token(), Ok(sample(50.0, 0.0)));

        ctrl.request_clear(&client);
        // Not cleared until the service confirms.
        assert_eq!(ctrl.store.len(), 1);

        let token = client.last_token();
        ctrl.on_clear_ack(token, Ok(()));
        assert!(ctrl.store.is_empty());
        assert_eq!(ctrl.readout, Readout::Blank);
    }

    #[test]
    fn failed_clear_keeps_local_history() {
        let client = MockClient::default();
        let mut ctrl = MeasurementController::new(timeout());
        ctrl.request_measurement(&client, "10", &known_positions(), DatasetColor::Red)
            .unwrap();
        ctrl.on_measurement_ready(client.last_token(), Ok(sample(50.0, 0.0)));

        ctrl.request_clear(&client);
        ctrl.on_clear_ack(
            client.last_token(),
            Err(InstrumentError::Transport("connection refused".into())),
        );
        assert_eq!(ctrl.store.len(), 1);
        assert!(ctrl.status.as_ref().unwrap().is_error);
    }

    // ── Motor control ───────────────────────────────────────────────────

    #[test]
    fn invalid_step_entries_are_rejected_without_dispatch() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());

        for bad in ["", "abc", "201", "-201", "1.5"] {
            motors.inputs[0] = bad.to_string();
            let err = motors.request_move(&client, 1).unwrap_err();
            assert_eq!(err, ValidationError::MotorSteps, "input {bad:?}");
        }
        assert_eq!(client.calls(), 0);
        assert!(motors.status.as_ref().unwrap().is_error);
    }

    #[test]
    fn step_limits_are_inclusive() {
        assert_eq!(parse_motor_steps("200").unwrap(), 200);
        assert_eq!(parse_motor_steps("-200").unwrap(), -200);
        assert_eq!(parse_motor_steps("0").unwrap(), 0);
        assert_eq!(parse_motor_steps(" 50 ").unwrap(), 50);
    }

    #[test]
    fn move_reply_updates_the_shared_position_handle() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());
        let positions = known_positions();

        motors.inputs[2] = "25".into();
        motors.request_move(&client, 3).unwrap();
        assert!(motors.is_busy());

        let dispatched = client.dispatched.lock().unwrap();
        assert_eq!(dispatched[0], Dispatch::Move(motors_token(&dispatched), 3, 25));
        drop(dispatched);

        motors.on_motor_moved(client.last_token(), 3, Ok(55), &positions);
        assert!(!motors.is_busy());
        assert_eq!(positions.current(), Some([10, 20, 55, 40]));
        assert!(!motors.status.as_ref().unwrap().is_error);
    }

    fn motors_token(dispatched: &[Dispatch]) -> RequestToken {
        match &dispatched[0] {
            Dispatch::Move(t, _, _) => *t,
            other => panic!("expected a move dispatch, got {other:?}"),
        }
    }

    #[test]
    fn stale_move_reply_does_not_touch_positions() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());
        let positions = known_positions();

        motors.inputs[0] = "10".into();
        motors.request_move(&client, 1).unwrap();
        let first = client.last_token();
        motors.request_move(&client, 1).unwrap();
        let second = client.last_token();
        assert_ne!(first, second);

        motors.on_motor_moved(first, 1, Ok(999), &positions);
        assert_eq!(positions.current(), Some([10, 20, 30, 40]));
        assert!(motors.is_busy());

        motors.on_motor_moved(second, 1, Ok(20), &positions);
        assert_eq!(positions.current(), Some([20, 20, 30, 40]));
    }

    #[test]
    fn failed_move_keeps_positions_and_shows_error() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());
        let positions = known_positions();

        motors.inputs[1] = "-50".into();
        motors.request_move(&client, 2).unwrap();
        motors.on_motor_moved(
            client.last_token(),
            2,
            Err(InstrumentError::Transport("connection refused".into())),
            &positions,
        );
        assert_eq!(positions.current(), Some([10, 20, 30, 40]));
        assert!(motors.status.as_ref().unwrap().is_error);
    }

    #[test]
    fn calibrate_resets_all_positions_on_ack() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());
        let positions = known_positions();

        motors.request_calibrate(&client);
        // Positions stay put until the service confirms.
        assert_eq!(positions.current(), Some([10, 20, 30, 40]));

        motors.on_calibrated(client.last_token(), Ok(()), &positions);
        assert_eq!(positions.current(), Some([0, 0, 0, 0]));
        assert!(!motors.status.as_ref().unwrap().is_error);
    }

    #[test]
    fn failed_calibration_keeps_positions() {
        let client = MockClient::default();
        let mut motors = MotorController::new(timeout());
        let positions = known_positions();

        motors.request_calibrate(&client);
        motors.on_calibrated(
            client.last_token(),
            Err(InstrumentError::Service("motor busy".into())),
            &positions,
        );
        assert_eq!(positions.current(), Some([10, 20, 30, 40]));
        assert!(motors.status.as_ref().unwrap().is_error);
    }

    #[test]
    fn move_times_out_and_late_reply_is_dropped() {
        let client = MockClient::default();
        let mut motors = MotorController::new(Duration::from_secs(5));
        let positions = known_positions();

        motors.inputs[0] = "10".into();
        motors.request_move(&client, 1).unwrap();
        let token = client.last_token();

        motors.poll_timeouts(Instant::now() + Duration::from_secs(6));
        assert!(!motors.is_busy());
        assert!(motors.status.as_ref().unwrap().is_error);

        motors.on_motor_moved(token, 1, Ok(999), &positions);
        assert_eq!(positions.current(), Some([10, 20, 30, 40]));
    }

    // ── Sweep validation ────────────────────────────────────────────────

    fn valid_form() -> SweepForm {
        SweepForm {
            motor_index: 2,
            start: "0".into(),
            stop: "100".into(),
            step: "10".into(),
            frequency: "13.56".into(),
        }
    }

    #[test]
    fn sweep_form_validates_fields() {
        assert!(valid_form().validate().is_ok());

        let mut form = valid_form();
        form.motor_index = 0;
        assert_eq!(form.validate().unwrap_err(), ValidationError::MotorIndex);
        form.motor_index = 5;
        assert_eq!(form.validate().unwrap_err(), ValidationError::MotorIndex);

        let mut form = valid_form();
        form.start = "".into();
        assert_eq!(
            form.validate().unwrap_err(),
            ValidationError::SweepNumber("start")
        );

        let mut form = valid_form();
        form.step = "abc".into();
        assert_eq!(
            form.validate().unwrap_err(),
            ValidationError::SweepNumber("step")
        );

        let mut form = valid_form();
        form.step = "0".into();
        assert_eq!(form.validate().unwrap_err(), ValidationError::ZeroStep);

        let mut form = valid_form();
        form.frequency = "-1".into();
        assert_eq!(form.validate().unwrap_err(), ValidationError::Frequency);
    }

    #[test]
    fn sweep_step_sign_must_match_direction() {
        let mut form = valid_form();
        form.step = "-10".into();
        assert_eq!(form.validate().unwrap_err(), ValidationError::StepDirection);

        // Decreasing sweep with negative step is fine.
        let form = SweepForm {
            motor_index: 1,
            start: "100".into(),
            stop: "0".into(),
            step: "-10".into(),
            frequency: "10".into(),
        };
        assert!(form.validate().is_ok());

        // Decreasing sweep with positive step is not.
        let form = SweepForm {
            step: "10".into(),
            ..form
        };
        assert_eq!(form.validate().unwrap_err(), ValidationError::StepDirection);
    }

    #[test]
    fn invalid_sweep_is_not_dispatched() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(timeout());
        let mut form = valid_form();
        form.stop = "".into();
        assert!(ctrl.request_sweep(&client, &form, DatasetColor::Blue).is_err());
        assert_eq!(client.calls(), 0);
        assert!(ctrl.status.as_ref().unwrap().is_error);
    }

    // ── Sweep streaming ─────────────────────────────────────────────────

    #[test]
    fn sweep_points_feed_the_sweep_store() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(timeout());
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        let token = client.last_token();

        ctrl.on_sweep_started(token, Ok(()));
        assert!(ctrl.is_sweeping());

        ctrl.on_sweep_point(token, sample(30.0, 10.0));
        ctrl.on_sweep_point(token, sample(31.0, 11.0));
        assert_eq!(ctrl.store.len(), 2);
        assert_eq!(ctrl.readout.real_text(), "31.00");

        ctrl.on_sweep_finished(token, Ok(2));
        assert!(!ctrl.is_sweeping());
        assert_eq!(ctrl.store.len(), 2);
        let status = ctrl.status.as_ref().unwrap();
        assert!(!status.is_error);
        assert!(status.text.contains('2'));
    }

    #[test]
    fn points_from_superseded_sweep_are_dropped() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(timeout());
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        let first = client.last_token();
        ctrl.on_sweep_started(first, Ok(()));

        // A new sweep supersedes the first before it finishes.
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        let second = client.last_token();
        ctrl.on_sweep_started(second, Ok(()));

        ctrl.on_sweep_point(first, sample(99.0, 99.0));
        assert!(ctrl.store.is_empty());

        ctrl.on_sweep_point(second, sample(30.0, 10.0));
        assert_eq!(ctrl.store.len(), 1);
    }

    #[test]
    fn rejected_sweep_shows_error_and_keeps_store() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(timeout());
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        ctrl.on_sweep_started(
            client.last_token(),
            Err(InstrumentError::Service("motor busy".into())),
        );
        assert!(!ctrl.is_sweeping());
        assert!(ctrl.store.is_empty());
        assert_eq!(ctrl.readout, Readout::Failed);
    }

    #[test]
    fn stalled_sweep_is_abandoned() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(Duration::from_secs(5));
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        let token = client.last_token();
        ctrl.on_sweep_started(token, Ok(()));
        ctrl.on_sweep_point(token, sample(30.0, 10.0));

        ctrl.poll_timeouts(Instant::now() + Duration::from_secs(6));
        assert!(!ctrl.is_sweeping());
        // Already-absorbed points stay; late points are dropped.
        assert_eq!(ctrl.store.len(), 1);
        ctrl.on_sweep_point(token, sample(31.0, 11.0));
        assert_eq!(ctrl.store.len(), 1);
    }

    #[test]
    fn sweep_clear_is_local_and_immediate() {
        let client = MockClient::default();
        let mut ctrl = SweepController::new(timeout());
        ctrl.request_sweep(&client, &valid_form(), DatasetColor::Green)
            .unwrap();
        let token = client.last_token();
        ctrl.on_sweep_started(token, Ok(()));
        ctrl.on_sweep_point(token, sample(30.0, 10.0));
        let dispatched_before = client.calls();

        ctrl.clear_local();
        assert!(ctrl.store.is_empty());
        assert_eq!(client.calls(), dispatched_before);
    }

    // ── Store independence across controllers ───────────────────────────

    #[test]
    fn single_and_sweep_stores_never_cross_contaminate() {
        let client = MockClient::default();
        let mut single = MeasurementController::new(timeout());
        let mut sweep = SweepController::new(timeout());

        single
            .request_measurement(&client, "10", &known_positions(), DatasetColor::Red)
            .unwrap();
        let m_token = client.last_token();
        sweep
            .request_sweep(&client, &valid_form(), DatasetColor::Blue)
            .unwrap();
        let s_token = client.last_token();
        sweep.on_sweep_started(s_token, Ok(()));

        single.on_measurement_ready(m_token, Ok(sample(50.0, 0.0)));
        sweep.on_sweep_point(s_token, sample(30.0, 10.0));
        sweep.on_sweep_point(s_token, sample(31.0, 11.0));

        assert_eq!(single.store.len(), 1);
        assert_eq!(sweep.store.len(), 2);

        sweep.clear_local();
        assert_eq!(single.store.len(), 1);
        assert!(sweep.store.is_empty());
    }

    // ── Export ──────────────────────────────────────────────────────────

    #[test]
    fn filename_resolution() {
        assert_eq!(resolve_csv_filename("run1").unwrap(), "run1.csv");
        assert_eq!(resolve_csv_filename("run1.csv").unwrap(), "run1.csv");
        assert_eq!(resolve_csv_filename("  run1  ").unwrap(), "run1.csv");
        assert_eq!(
            resolve_csv_filename("").unwrap_err(),
            ValidationError::EmptyFilename
        );
        assert_eq!(
            resolve_csv_filename("   ").unwrap_err(),
            ValidationError::EmptyFilename
        );
    }

    #[test]
    fn export_writes_returned_bytes_to_the_chosen_path() {
        let client = MockClient::default();
        let mut export = ExportCoordinator::new(timeout());
        let path = std::env::temp_dir().join("smithbench_export_test.csv");
        let _ = std::fs::remove_file(&path);

        export
            .request_export(&client, "run1", path.clone(), None)
            .unwrap();
        assert!(export.is_exporting());
        let dispatched = client.dispatched.lock().unwrap();
        let Dispatch::Export(token, req) = &dispatched[0] else {
            panic!("expected an export dispatch");
        };
        assert_eq!(req.filename, "run1.csv");
        assert!(req.samples.is_none());
        let token = *token;
        drop(dispatched);

        export.on_export_ready(token, Ok(b"a,b\n1,2\n".to_vec()));
        assert!(!export.is_exporting());
        assert!(!export.status.as_ref().unwrap().is_error);
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n1,2\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sweep_export_transmits_the_sample_sequence() {
        let client = MockClient::default();
        let mut export = ExportCoordinator::new(timeout());
        let samples = vec![sample(30.0, 10.0), sample(31.0, 11.0)];

        export
            .request_export(
                &client,
                "sweep_run",
                std::env::temp_dir().join("smithbench_sweep_export.csv"),
                Some(&samples),
            )
            .unwrap();
        let dispatched = client.dispatched.lock().unwrap();
        let Dispatch::Export(_, req) = &dispatched[0] else {
            panic!("expected an export dispatch");
        };
        assert_eq!(req.samples.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn empty_filename_blocks_export_dispatch() {
        let client = MockClient::default();
        let mut export = ExportCoordinator::new(timeout());
        assert!(export
            .request_export(&client, "", std::env::temp_dir().join("x.csv"), None)
            .is_err());
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn export_times_out_and_late_bytes_are_discarded() {
        let client = MockClient::default();
        let mut export = ExportCoordinator::new(Duration::from_secs(5));
        let path = std::env::temp_dir().join("smithbench_export_timeout.csv");
        let _ = std::fs::remove_file(&path);

        export
            .request_export(&client, "run1", path.clone(), None)
            .unwrap();
        let token = client.last_token();

        export.poll_timeouts(Instant::now() + Duration::from_secs(6));
        assert!(!export.is_exporting());
        assert!(export.pending_token().is_none());
        assert!(export.status.as_ref().unwrap().is_error);

        // Bytes arriving after the timeout must not reach the filesystem.
        export.on_export_ready(token, Ok(b"late\n".to_vec()));
        assert!(!path.exists());
    }

    #[test]
    fn export_failure_surfaces_service_text() {
        let client = MockClient::default();
        let mut export = ExportCoordinator::new(timeout());
        export
            .request_export(&client, "run1", std::env::temp_dir().join("y.csv"), None)
            .unwrap();
        export.on_export_ready(
            client.last_token(),
            Err(InstrumentError::Service("no data to export".into())),
        );
        let status = export.status.as_ref().unwrap();
        assert!(status.is_error);
        assert!(status.text.contains("no data to export"));
    }
}
