use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use barkwatch_foundation::{
    CaptureConfig, CaptureError, HardwareError, PipelineError, PipelineState, StateManager,
};
use barkwatch_telemetry::{FpsTracker, PipelineStats};

use super::device::CaptureDevice;
use super::frame_pool::FramePool;
use super::ring::RingProducer;
use super::watchdog::WatchdogTimer;

/// Handle to the dedicated capture thread.
///
/// The device is opened on the thread itself (cpal streams are not Send),
/// through the factory the caller supplies; an open failure is reported
/// back before `spawn` returns, so a bad device aborts pipeline startup.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    watchdog: WatchdogTimer,
}

impl CaptureThread {
    pub fn spawn<D, F>(
        factory: F,
        config: CaptureConfig,
        producer: RingProducer,
        stats: Arc<PipelineStats>,
        state: StateManager,
    ) -> Result<Self, PipelineError>
    where
        D: CaptureDevice + 'static,
        F: FnOnce() -> Result<D, HardwareError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let watchdog = WatchdogTimer::new(Duration::from_secs(5));

        let thread_running = Arc::clone(&running);
        let thread_watchdog = watchdog.clone();
        let (open_tx, open_rx) = mpsc::channel::<Result<(), HardwareError>>();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut device = match factory() {
                    Ok(d) => {
                        let _ = open_tx.send(Ok(()));
                        d
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                run_capture_loop(
                    &mut device,
                    &config,
                    &producer,
                    &stats,
                    &state,
                    &thread_running,
                    &thread_watchdog,
                );

                // Unconditional release: close runs on every exit path,
                // and the device Drop impl backstops a panic.
                device.close();
                info!("Audio capture thread shut down");
            })
            .map_err(|e| PipelineError::Fatal(format!("Failed to spawn capture thread: {e}")))?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle,
                running,
                watchdog,
            }),
            Ok(Err(hw)) => {
                let _ = handle.join();
                Err(PipelineError::Hardware(hw))
            }
            Err(_) => {
                let _ = handle.join();
                Err(PipelineError::Fatal(
                    "Capture thread exited before reporting device state".into(),
                ))
            }
        }
    }

    pub fn watchdog(&self) -> &WatchdogTimer {
        &self.watchdog
    }

    /// Deterministic stop: flag the loop, join the thread. The device
    /// handle is released on the thread before it exits.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

fn run_capture_loop<D: CaptureDevice>(
    device: &mut D,
    config: &CaptureConfig,
    producer: &RingProducer,
    stats: &PipelineStats,
    state: &StateManager,
    running: &AtomicBool,
    watchdog: &WatchdogTimer,
) {
    let mut pool = FramePool::new(config.pool_size, config.frame_size_samples);
    let mut fps = FpsTracker::new();
    let sample_rate = device.sample_rate() as u64;
    let mut samples_total: u64 = 0;
    let mut recovering = false;

    info!(
        "Capture loop started: {} samples/frame at {} Hz",
        config.frame_size_samples, sample_rate
    );

    while running.load(Ordering::SeqCst) {
        let Some(handle) = pool.acquire() else {
            stats.pool_exhausted.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(1));
            continue;
        };

        let read_result = device.read(pool.frame_mut(&handle).buffer_mut());
        match read_result {
            Ok(count) => {
                if recovering {
                    recovering = false;
                    info!("Capture device recovered");
                    // If teardown started mid-recovery the edge is refused;
                    // the loop just keeps going until stop.
                    let _ = state.transition(PipelineState::Running);
                }
                let timestamp_ms = samples_total * 1000 / sample_rate;
                samples_total += count as u64;

                let frame = pool.frame_mut(&handle);
                frame.commit(count, timestamp_ms);
                watchdog.feed();

                let samples = pool.frame(&handle).samples();
                stats.update_audio_level(samples);
                if pool.frame(&handle).rms() * 32768.0 < config.silence_threshold as f32 {
                    stats.silent_frames.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.active_frames.fetch_add(1, Ordering::Relaxed);
                }

                let written = producer.write(samples);
                if written == samples.len() {
                    stats.frames_captured.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    stats.ring_overruns.fetch_add(1, Ordering::Relaxed);
                    stats
                        .overrun_samples
                        .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
                }
                stats
                    .samples_captured
                    .fetch_add(count as u64, Ordering::Relaxed);
                stats.mark_frame_time();
                if let Some(rate) = fps.tick() {
                    stats.update_capture_fps(rate);
                }
            }
            Err(e) => {
                stats.capture_errors.fetch_add(1, Ordering::Relaxed);
                match e {
                    CaptureError::Timeout { .. } | CaptureError::ShortRead { .. } => {
                        warn!("Transient capture error, retrying: {}", e);
                    }
                    CaptureError::Disconnected => {
                        if !recovering {
                            recovering = true;
                            warn!("Capture device disconnected; retrying until stop");
                            let _ = state.transition(PipelineState::Recovering {
                                reason: e.to_string(),
                            });
                        }
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        }
        pool.release(handle);
    }
}
