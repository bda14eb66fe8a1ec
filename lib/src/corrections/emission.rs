//! Emission monitoring: a background task sampling the gun emission on a
//! fixed interval and flagging the scheduler when it sags below its floor.
//!
//! Unlike drift and focus this correction mutates nothing on the column by
//! itself; a flash routine can be attached, but the monitor's job is only to
//! raise the flag before the next scan.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use super::{Correction, CorrectionCounter, CorrectionOutcome};
use crate::error::Result;
use crate::hardware::SharedMicroscope;
use crate::job::{JobHandle, Status};
use crate::Match;

/// Parameters of the emission monitor.
#[derive(Debug, Clone, Copy)]
pub struct EmissionConfig {
    /// The lowest emission (microamps) allowed before a reset is flagged.
    pub min_emission: f64,
    /// Sampling interval of the background task.
    pub interval: Duration,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        EmissionConfig {
            min_emission: 3.5,
            interval: Duration::from_secs(4),
        }
    }
}

/// An optional routine invoked when the monitor trips, e.g. a tip flash.
pub type FlashRoutine = Box<dyn FnMut(&SharedMicroscope) -> Result<()> + Send>;

/// The background emission monitor.
///
/// Sampling runs on its own thread; the scheduler talks to the monitor only
/// through [`Correction::query`], which drains the flag channel.
pub struct EmissionMonitor {
    handle: JobHandle,
    events: Receiver<f64>,
    thread: Option<JoinHandle<()>>,
    flash: Option<FlashRoutine>,
}

fn sampling_loop(
    mic: SharedMicroscope,
    config: EmissionConfig,
    handle: JobHandle,
    events: Sender<f64>,
) {
    let mut counter = CorrectionCounter::new(config.min_emission, Match::NoLower, f64::INFINITY);
    loop {
        match handle.status() {
            Status::Dead | Status::Finished => return,
            Status::Paused => {
                thread::sleep(config.interval);
                continue;
            }
            Status::Active => {}
        }
        match mic.with(|m| m.emission()) {
            Ok(reading) => {
                counter.set_current(reading);
                if counter.needs_reset() {
                    debug!(
                        "emission {reading:.3} below {:.3}, flagging a reset",
                        config.min_emission
                    );
                    if events.send(reading).is_err() {
                        return;
                    }
                }
            }
            Err(err) => warn!("emission sample failed: {err}"),
        }
        thread::sleep(config.interval);
    }
}

impl EmissionMonitor {
    /// Spawns the sampling thread against the shared microscope handle.
    pub fn spawn(mic: SharedMicroscope, config: EmissionConfig) -> EmissionMonitor {
        let handle = JobHandle::new();
        let (tx, rx) = unbounded();
        let loop_handle = handle.clone();
        let thread = thread::Builder::new()
            .name("emission-monitor".into())
            .spawn(move || sampling_loop(mic, config, loop_handle, tx))
            .expect("spawning the monitor thread");
        EmissionMonitor {
            handle,
            events: rx,
            thread: Some(thread),
            flash: None,
        }
    }

    /// Attaches a flash routine run whenever the monitor trips.
    pub fn with_flash(mut self, flash: FlashRoutine) -> EmissionMonitor {
        self.flash = Some(flash);
        self
    }

    /// The status handle of the sampling thread.
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// Stops the sampling thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EmissionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Correction for EmissionMonitor {
    fn name(&self) -> &'static str {
        "emission"
    }

    fn query(&mut self) -> bool {
        let mut tripped = false;
        while self.events.try_recv().is_ok() {
            tripped = true;
        }
        tripped
    }

    fn run(&mut self, mic: &SharedMicroscope) -> Result<CorrectionOutcome> {
        match self.flash.as_mut() {
            Some(flash) => {
                flash(mic)?;
                Ok(CorrectionOutcome::Ran)
            }
            None => Ok(CorrectionOutcome::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::OfflineMicroscope;
    use crate::image::GreyImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn offline(emission: f64, decay: f64) -> SharedMicroscope {
        let mut mic = OfflineMicroscope::new(GreyImage::blank(32, 32));
        mic.set_emission(emission, decay);
        SharedMicroscope::new(mic)
    }

    fn fast_config() -> EmissionConfig {
        EmissionConfig {
            min_emission: 3.5,
            interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn healthy_emission_raises_no_flag() {
        let mut monitor = EmissionMonitor::spawn(offline(4.5, 1.0), fast_config());
        thread::sleep(Duration::from_millis(50));
        assert!(!monitor.query());
        monitor.stop();
    }

    #[test]
    fn decaying_emission_trips_the_monitor() {
        let mut monitor = EmissionMonitor::spawn(offline(4.5, 0.9), fast_config());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut tripped = false;
        while std::time::Instant::now() < deadline {
            if monitor.query() {
                tripped = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(tripped);
        monitor.stop();
    }

    #[test]
    fn flash_routine_runs_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mic = offline(4.5, 1.0);
        let mut monitor = EmissionMonitor::spawn(mic.clone(), fast_config()).with_flash(Box::new(
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ));
        assert_eq!(monitor.run(&mic).unwrap(), CorrectionOutcome::Ran);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        monitor.stop();
    }

    #[test]
    fn stop_is_idempotent_and_joins() {
        let mut monitor = EmissionMonitor::spawn(offline(4.5, 1.0), fast_config());
        monitor.stop();
        monitor.stop();
        assert!(monitor.thread.is_none());
    }
}
