//! Bench panel binary wired to a simulated instrument service.
//!
//! The simulator stands in for the motor/VNA control backend: it answers
//! every request on a worker thread after a short delay, synthesizes
//! plausible impedances, and keeps the authoritative single-measurement
//! history used for CSV export and server-side clears. Swap in a real
//! [`InstrumentClient`] implementation to drive actual hardware.

use std::fmt::Write as _;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use smithbench::client::{
    ExportRequest, InstrumentClient, InstrumentError, InstrumentEvent, MeasureRequest,
    RequestToken, SweepRequest,
};
use smithbench::{instrument_channel, ImpedanceSample, MotorPositions, PanelConfig};

const CSV_HEADER: &str = "Data Number,Motor 1 Position,Motor 2 Position,Motor 3 Position,\
Motor 4 Position,Frequency (MHz),Real Impedance (Ohms),Imaginary Impedance (Ohms),Color";

/// Deterministic stand-in for a VNA reading at the given tuner state.
fn synthetic_impedance(frequency_mhz: f64, motor_positions: [i32; 4]) -> (f64, f64) {
    let tune: f64 = motor_positions
        .iter()
        .enumerate()
        .map(|(i, &p)| p as f64 * 0.01 * (i as f64 + 1.0))
        .sum();
    let phase = frequency_mhz * 0.11 + tune;
    let real = 55.0 + 45.0 * phase.sin();
    let imag = 60.0 * (phase * 0.7).cos();
    (real, imag)
}

fn render_csv(samples: &[ImpedanceSample]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');
    for (i, sample) in samples.iter().enumerate() {
        let [m1, m2, m3, m4] = sample.motor_positions;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            i + 1,
            m1,
            m2,
            m3,
            m4,
            sample.frequency_mhz,
            sample.real_impedance,
            sample.imag_impedance,
            serde_json::to_value(sample.color)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default(),
        );
    }
    out.into_bytes()
}

/// Simulated instrument-control service.
struct SimulatedInstrument {
    events: Sender<InstrumentEvent>,
    positions: MotorPositions,
    /// Backend-held single-measurement history, the authority for exports
    /// without an explicit sample payload.
    history: Arc<Mutex<Vec<ImpedanceSample>>>,
    latency: Duration,
}

impl SimulatedInstrument {
    fn new(events: Sender<InstrumentEvent>, positions: MotorPositions) -> Self {
        Self {
            events,
            positions,
            history: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::from_millis(350),
        }
    }
}

impl InstrumentClient for SimulatedInstrument {
    fn measure_impedance(&self, token: RequestToken, request: MeasureRequest) {
        let events = self.events.clone();
        let history = Arc::clone(&self.history);
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let (real, imag) = synthetic_impedance(request.frequency_mhz, request.motor_positions);
            let sample = ImpedanceSample::new(
                request.motor_positions,
                request.frequency_mhz,
                real,
                imag,
                request.dataset_color,
            );
            history.lock().unwrap().push(sample.clone());
            let _ = events.send(InstrumentEvent::MeasurementReady {
                token,
                result: Ok(sample),
            });
        });
    }

    fn start_sweep(&self, token: RequestToken, request: SweepRequest) {
        let events = self.events.clone();
        let positions = self.positions.clone();
        let latency = self.latency;
        thread::spawn(move || {
            let _ = events.send(InstrumentEvent::SweepStarted {
                token,
                result: Ok(()),
            });
            let mut base = positions.current().unwrap_or([0; 4]);
            let mut value = request.start_value;
            let mut delivered = 0usize;
            let ascending = request.step_size > 0.0;
            while (ascending && value <= request.stop_value)
                || (!ascending && value >= request.stop_value)
            {
                thread::sleep(latency / 2);
                base[request.motor_index - 1] = value.round() as i32;
                positions.set(base);
                let (real, imag) = synthetic_impedance(request.frequency_mhz, base);
                let sample = ImpedanceSample::new(
                    base,
                    request.frequency_mhz,
                    real,
                    imag,
                    request.dataset_color,
                );
                let _ = events.send(InstrumentEvent::SweepPoint { token, sample });
                delivered += 1;
                value += request.step_size;
            }
            let _ = events.send(InstrumentEvent::SweepFinished {
                token,
                result: Ok(delivered),
            });
        });
    }

    fn export_csv(&self, token: RequestToken, request: ExportRequest) {
        let events = self.events.clone();
        let history = Arc::clone(&self.history);
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let result = match request.samples {
                Some(samples) => Ok(render_csv(&samples)),
                None => {
                    let history = history.lock().unwrap();
                    if history.is_empty() {
                        Err(InstrumentError::Service(
                            "no impedance data to export".into(),
                        ))
                    } else {
                        Ok(render_csv(&history))
                    }
                }
            };
            let _ = events.send(InstrumentEvent::ExportReady { token, result });
        });
    }

    fn clear_history(&self, token: RequestToken) {
        let events = self.events.clone();
        let history = Arc::clone(&self.history);
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            history.lock().unwrap().clear();
            let _ = events.send(InstrumentEvent::ClearAck {
                token,
                result: Ok(()),
            });
        });
    }

    fn move_motor(&self, token: RequestToken, motor_index: usize, steps: i32) {
        let events = self.events.clone();
        let positions = self.positions.clone();
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let mut current = positions.current().unwrap_or([0; 4]);
            current[motor_index - 1] += steps;
            positions.set(current);
            let _ = events.send(InstrumentEvent::MotorMoved {
                token,
                motor_index,
                result: Ok(current[motor_index - 1]),
            });
        });
    }

    fn calibrate_motors(&self, token: RequestToken) {
        let events = self.events.clone();
        let positions = self.positions.clone();
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            positions.set([0; 4]);
            let _ = events.send(InstrumentEvent::Calibrated {
                token,
                result: Ok(()),
            });
        });
    }

    fn request_motor_positions(&self) {
        let events = self.events.clone();
        let positions = self.positions.clone();
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            let current = positions.current().unwrap_or([0, 0, 0, 0]);
            positions.set(current);
            let _ = events.send(InstrumentEvent::MotorPositions {
                result: Ok(current),
            });
        });
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();

    let (tx, rx) = instrument_channel();
    let positions = MotorPositions::new();
    let client = SimulatedInstrument::new(tx, positions.clone());

    smithbench::run_panel(Box::new(client), rx, positions, PanelConfig::default())
}
