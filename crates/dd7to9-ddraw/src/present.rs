//! Frame pacing and the present worker
//!
//! `FrameCounter` carries the state of the auto frame skipper. `PresentThread`
//! issues `Present` on its own thread when the process runs on more than one
//! core, so the game thread only signals it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::context::SharedDevice;

fn millis(d: Duration) -> f32 {
    d.as_secs_f32() * 1000.0
}

/// Timing of recent presents
#[derive(Debug, Clone)]
pub(crate) struct FrameCounter {
    refresh_rate: u32,
    safety_factor: f32,
    last_present: Instant,
    last_frame: Option<Instant>,
    skipped_in_row: u32,
    frames: u64,
}

impl FrameCounter {
    pub fn new(safety_factor: f32, now: Instant) -> Self {
        Self {
            refresh_rate: 60,
            safety_factor,
            last_present: now,
            last_frame: None,
            skipped_in_row: 0,
            frames: 0,
        }
    }

    #[cfg(test)]
    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    pub fn set_refresh_rate(&mut self, hz: u32) {
        self.refresh_rate = if hz == 0 { 60 } else { hz };
    }

    /// Length of one display refresh in milliseconds
    pub fn refresh_interval_ms(&self) -> f32 {
        1000.0 / self.refresh_rate as f32
    }

    pub fn since_last_present(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_present)
    }

    /// Decide whether the present requested at `now` can be dropped
    ///
    /// Both the time since the last skipped request and the average over the
    /// current run of skips must predict that the next request still lands
    /// inside the current refresh.
    pub fn should_skip(&mut self, now: Instant) -> bool {
        self.skipped_in_row += 1;

        let budget = self.refresh_interval_ms();
        let since_present = millis(self.since_last_present(now));
        let since_frame = match self.last_frame {
            Some(last) => millis(now.saturating_duration_since(last)),
            None => since_present,
        };
        self.last_frame = Some(now);

        let average = since_present / self.skipped_in_row as f32;
        since_present + since_frame * self.safety_factor < budget
            && since_present + average * self.safety_factor < budget
    }

    /// Record a successful present
    pub fn presented(&mut self, now: Instant) {
        self.last_present = now;
        self.last_frame = None;
        self.skipped_in_row = 0;
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[derive(Default)]
struct Signal {
    pending: Mutex<bool>,
    wake: Condvar,
    stop: AtomicBool,
    presents: AtomicU64,
}

/// Worker issuing `Present` on behalf of the game thread
pub(crate) struct PresentThread {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl PresentThread {
    pub fn spawn(device: SharedDevice) -> std::io::Result<Self> {
        let signal = Arc::new(Signal::default());
        let worker = signal.clone();

        let handle = std::thread::Builder::new()
            .name("dd7to9-present".to_string())
            .spawn(move || {
                tracing::debug!("Present thread started");
                loop {
                    {
                        let mut pending = worker.pending.lock().unwrap_or_else(|p| p.into_inner());
                        while !*pending && !worker.stop.load(Ordering::Acquire) {
                            pending = worker.wake.wait(pending).unwrap_or_else(|p| p.into_inner());
                        }
                        *pending = false;
                    }
                    if worker.stop.load(Ordering::Acquire) {
                        break;
                    }

                    let mut slot = device.lock().unwrap_or_else(|p| p.into_inner());
                    if let Some(dev) = slot.as_mut() {
                        match dev.present() {
                            Ok(()) => {
                                worker.presents.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => limit_debug!(100, "Present thread: present failed: {}", err),
                        }
                    }
                }
                tracing::debug!("Present thread stopped");
            })?;

        Ok(Self { signal, handle: Some(handle) })
    }

    /// Wake the worker for one present
    pub fn trigger(&self) {
        let mut pending = self.signal.pending.lock().unwrap_or_else(|p| p.into_inner());
        *pending = true;
        self.signal.wake.notify_one();
    }

    /// Presents completed by the worker
    #[cfg(test)]
    pub fn presents(&self) -> u64 {
        self.signal.presents.load(Ordering::Relaxed)
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.stop.store(true, Ordering::Release);
        {
            let _pending = self.signal.pending.lock().unwrap_or_else(|p| p.into_inner());
            self.signal.wake.notify_all();
        }
        if handle.join().is_err() {
            tracing::error!("Present thread panicked");
        }
    }
}

impl Drop for PresentThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{BehaviorFlags, Direct3D9, PresentParameters};
    use crate::format::D3dFormat;
    use crate::types::WindowHandle;

    #[test]
    fn quick_successive_presents_are_skipped() {
        let t0 = Instant::now();
        let mut counter = FrameCounter::new(1.1, t0);
        counter.set_refresh_rate(60);

        assert!(counter.should_skip(t0 + Duration::from_millis(1)));
        assert!(counter.should_skip(t0 + Duration::from_millis(2)));
        assert!(!counter.should_skip(t0 + Duration::from_millis(15)));

        counter.presented(t0 + Duration::from_millis(15));
        assert_eq!(counter.frames(), 1);
        assert!(counter.should_skip(t0 + Duration::from_millis(16)));
    }

    #[test]
    fn slow_frames_are_never_skipped() {
        let t0 = Instant::now();
        let mut counter = FrameCounter::new(1.1, t0);
        counter.set_refresh_rate(60);
        assert!(!counter.should_skip(t0 + Duration::from_millis(20)));
    }

    #[test]
    fn zero_refresh_rate_falls_back_to_sixty() {
        let mut counter = FrameCounter::new(1.1, Instant::now());
        counter.set_refresh_rate(0);
        assert_eq!(counter.refresh_rate(), 60);
    }

    #[test]
    fn worker_presents_on_trigger_and_stops() {
        let backend = SoftwareBackend::new();
        let mut params = PresentParameters {
            back_buffer_width: 8,
            back_buffer_height: 8,
            back_buffer_format: D3dFormat::X8R8G8B8,
            back_buffer_count: 1,
            windowed: true,
            ..Default::default()
        };
        let device = backend.create().create_device(WindowHandle(1), BehaviorFlags::MULTITHREADED, &mut params).unwrap();
        let shared: SharedDevice = Arc::new(Mutex::new(Some(device)));

        let mut thread = PresentThread::spawn(shared).unwrap();
        thread.trigger();
        let deadline = Instant::now() + Duration::from_secs(5);
        while thread.presents() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(thread.presents() >= 1);
        thread.stop();
        thread.stop();
    }
}
