//! Collaborator seam between the panel and the instrument-control service.
//!
//! The panel never talks HTTP itself: an [`InstrumentClient`] implementation
//! (the transport layer, or a simulator) accepts request dispatches and later
//! delivers results as [`InstrumentEvent`]s over an `std::sync::mpsc`
//! channel. The panel drains the channel once per frame, so a history store
//! is only ever mutated atomically at event-processing time.
//!
//! Every request carries a [`RequestToken`] from a process-wide counter and
//! every request-scoped event echoes it back. Controllers drop events whose
//! token does not match their pending request, which closes the
//! out-of-order-response window when the same action is triggered rapidly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::sample::{DatasetColor, ImpedanceSample, MOTOR_COUNT};

/// Correlation token echoed by request-scoped instrument events.
pub type RequestToken = u64;

/// Allocate the next unique request token.
pub fn next_token() -> RequestToken {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Failure reported by the instrument collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    /// The request could not be completed at all.
    #[error("instrument service unreachable: {0}")]
    Transport(String),
    /// The service responded with a non-success status.
    #[error("{0}")]
    Service(String),
}

/// Body of a single-shot measurement request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureRequest {
    pub frequency_mhz: f64,
    pub motor_positions: [i32; MOTOR_COUNT],
    pub dataset_color: DatasetColor,
}

/// Body of a sweep initiation request. The backend performs the stepping and
/// measurement loop; the panel only triggers it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRequest {
    /// Which of the four motors sweeps, 1-based.
    pub motor_index: usize,
    pub start_value: f64,
    pub stop_value: f64,
    pub step_size: f64,
    pub frequency_mhz: f64,
    pub dataset_color: DatasetColor,
}

/// Body of a CSV export request.
///
/// The sweep variant must transmit the sample sequence because the backend
/// keeps no independent copy of the panel's sweep history; for the
/// single-measurement history the backend is authoritative and `samples` is
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRequest {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<ImpedanceSample>>,
}

/// Results delivered asynchronously by an [`InstrumentClient`] implementation.
#[derive(Debug)]
pub enum InstrumentEvent {
    /// Completed (or failed) single-shot measurement.
    MeasurementReady {
        token: RequestToken,
        result: Result<ImpedanceSample, InstrumentError>,
    },
    /// Sweep accepted or rejected by the backend.
    SweepStarted {
        token: RequestToken,
        result: Result<(), InstrumentError>,
    },
    /// One measured point of an in-flight sweep, pushed in sweep order.
    SweepPoint {
        token: RequestToken,
        sample: ImpedanceSample,
    },
    /// Sweep completion; `Ok` carries the number of points delivered.
    SweepFinished {
        token: RequestToken,
        result: Result<usize, InstrumentError>,
    },
    /// Completed (or failed) motor move; `Ok` carries the motor's new
    /// absolute position in steps.
    MotorMoved {
        token: RequestToken,
        /// Which motor moved, 1-based.
        motor_index: usize,
        result: Result<i32, InstrumentError>,
    },
    /// Acknowledgment of a calibrate-all; on `Ok` every motor position is
    /// reset to zero.
    Calibrated {
        token: RequestToken,
        result: Result<(), InstrumentError>,
    },
    /// Acknowledgment of a server-side history clear.
    ClearAck {
        token: RequestToken,
        result: Result<(), InstrumentError>,
    },
    /// Materialized CSV bytes for an export request.
    ExportReady {
        token: RequestToken,
        result: Result<Vec<u8>, InstrumentError>,
    },
    /// Current encoder positions of all four motors.
    MotorPositions {
        result: Result<[i32; MOTOR_COUNT], InstrumentError>,
    },
}

/// Create the event channel pair connecting a client implementation to the
/// panel.
pub fn instrument_channel() -> (Sender<InstrumentEvent>, Receiver<InstrumentEvent>) {
    std::sync::mpsc::channel()
}

/// Request surface the panel needs from the instrument-control service.
///
/// Dispatch methods must not block the UI thread; results arrive later as
/// [`InstrumentEvent`]s carrying the same token.
pub trait InstrumentClient {
    fn measure_impedance(&self, token: RequestToken, request: MeasureRequest);
    fn start_sweep(&self, token: RequestToken, request: SweepRequest);
    fn export_csv(&self, token: RequestToken, request: ExportRequest);
    fn clear_history(&self, token: RequestToken);
    /// Move one motor (1-based index) by a relative number of steps. The
    /// reply carries the motor's new absolute position.
    fn move_motor(&self, token: RequestToken, motor_index: usize, steps: i32);
    /// Reset all motor positions to zero.
    fn calibrate_motors(&self, token: RequestToken);
    /// One-shot position query used to seed the live-position handle at
    /// startup.
    fn request_motor_positions(&self);
}

/// Shared live motor-position handle.
///
/// Owned by the motor-control collaborator, which updates it whenever a move
/// completes; the measurement controller reads the current snapshot instead
/// of re-parsing presentation text.
#[derive(Clone, Default)]
pub struct MotorPositions {
    inner: Arc<Mutex<Option<[i32; MOTOR_COUNT]>>>,
}

impl MotorPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest known positions, or `None` before the first position report.
    pub fn current(&self) -> Option<[i32; MOTOR_COUNT]> {
        *self.inner.lock().unwrap()
    }

    pub fn set(&self, positions: [i32; MOTOR_COUNT]) {
        *self.inner.lock().unwrap() = Some(positions);
    }

    /// Update a single motor's absolute position (1-based index). Positions
    /// unknown so far default to zero for the untouched motors.
    pub fn set_motor(&self, motor_index: usize, position: i32) {
        let mut guard = self.inner.lock().unwrap();
        let mut positions = guard.unwrap_or([0; MOTOR_COUNT]);
        positions[motor_index - 1] = position;
        *guard = Some(positions);
    }
}
