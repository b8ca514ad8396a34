use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{error, info, warn};

use barkwatch_foundation::{CaptureConfig, CaptureError, HardwareError};

/// Blocking-read abstraction over a hardware audio interface. The concrete
/// device owns the hardware exclusively while open; `close` is an
/// unconditional release and also runs on drop.
pub trait CaptureDevice {
    /// Fill `buf` with PCM samples, blocking up to the configured timeout.
    /// A timeout or short read is transient; the caller retries next cycle.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError>;

    fn close(&mut self);

    fn sample_rate(&self) -> u32;
}

/// cpal-backed capture device. The stream callback converts whatever the
/// host delivers to mono i16 and hands fixed chunks to `read` through a
/// bounded channel, so the callback itself never blocks.
pub struct CpalCaptureDevice {
    stream: Option<Stream>,
    chunk_rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    disconnected: Arc<AtomicBool>,
    callback_drops: Arc<AtomicU64>,
    read_timeout: Duration,
    sample_rate: u32,
}

impl CpalCaptureDevice {
    pub fn open(
        config: &CaptureConfig,
        device_name: Option<&str>,
    ) -> Result<Self, HardwareError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| HardwareError::Fatal(format!("Cannot enumerate devices: {e}")))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| HardwareError::DeviceNotFound {
                    name: Some(name.to_string()),
                })?,
            None => host
                .default_input_device()
                .ok_or(HardwareError::DeviceNotFound { name: None })?,
        };

        if let Ok(name) = device.name() {
            info!("Selected input device: {}", name);
        }

        let default_config = device.default_input_config()?;
        let channels = default_config.channels();
        let sample_format = default_config.sample_format();

        let rate_supported = device.supported_input_configs()?.any(|range| {
            range.min_sample_rate().0 <= config.sample_rate_hz
                && config.sample_rate_hz <= range.max_sample_rate().0
        });
        if !rate_supported {
            return Err(HardwareError::SampleRateNotSupported {
                requested: config.sample_rate_hz,
            });
        }
        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(config.sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(64);
        let disconnected = Arc::new(AtomicBool::new(false));
        let callback_drops = Arc::new(AtomicU64::new(0));

        let stream = build_stream(
            &device,
            &stream_config,
            sample_format,
            channels as usize,
            chunk_tx,
            Arc::clone(&disconnected),
            Arc::clone(&callback_drops),
        )?;
        stream.play()?;

        info!(
            "Capture stream started: {} Hz, {} ch, {:?}",
            config.sample_rate_hz, channels, sample_format
        );

        Ok(Self {
            stream: Some(stream),
            chunk_rx,
            pending: VecDeque::new(),
            disconnected,
            callback_drops,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            sample_rate: config.sample_rate_hz,
        })
    }

    pub fn callback_drops(&self) -> u64 {
        self.callback_drops.load(Ordering::Relaxed)
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        let want = buf.len();
        let deadline = Instant::now() + self.read_timeout;

        loop {
            if self.pending.len() >= want {
                for slot in buf.iter_mut() {
                    *slot = self.pending.pop_front().unwrap_or(0);
                }
                return Ok(want);
            }

            if self.disconnected.load(Ordering::SeqCst) {
                return Err(CaptureError::Disconnected);
            }

            let now = Instant::now();
            if now >= deadline {
                // Partial data stays queued for the next read, so a short
                // read loses nothing.
                return if self.pending.is_empty() {
                    Err(CaptureError::Timeout {
                        timeout: self.read_timeout,
                    })
                } else {
                    Err(CaptureError::ShortRead {
                        got: self.pending.len(),
                        want,
                    })
                };
            }

            match self.chunk_rx.recv_timeout(deadline - now) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::Disconnected)
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Capture stream released");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: usize,
    chunk_tx: Sender<Vec<i16>>,
    disconnected: Arc<AtomicBool>,
    callback_drops: Arc<AtomicU64>,
) -> Result<Stream, HardwareError> {
    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        disconnected.store(true, Ordering::SeqCst);
    };

    let deliver = move |mono: Vec<i16>| {
        if chunk_tx.try_send(mono).is_err() {
            // Channel full: the reader has stalled. Drop here; the ring's
            // own overrun accounting covers the steady-state case.
            callback_drops.fetch_add(1, Ordering::Relaxed);
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &_| {
                deliver(downmix_i16(data, channels));
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &_| {
                let converted: Vec<i16> = data.iter().copied().map(f32_to_i16).collect();
                deliver(downmix_i16(&converted, channels));
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &_| {
                let converted: Vec<i16> =
                    data.iter().map(|&s| (s as i32 - 32768) as i16).collect();
                deliver(downmix_i16(&converted, channels));
            },
            err_fn,
            None,
        )?,
        other => {
            warn!("Unsupported sample format {:?}", other);
            return Err(HardwareError::FormatNotSupported {
                format: format!("{:?}", other),
            });
        }
    };

    Ok(stream)
}

/// Clamp a float sample into [-1, 1] and scale to i16.
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Average interleaved channels down to mono.
fn downmix_i16(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_stereo_averages() {
        let stereo = [100i16, 300, -200, -400, 0, 0];
        assert_eq!(downmix_i16(&stereo, 2), vec![200, -300, 0]);
    }

    #[test]
    fn downmix_mono_is_identity() {
        let mono = [1i16, 2, 3];
        assert_eq!(downmix_i16(&mono, 1), vec![1, 2, 3]);
    }

    #[test]
    fn f32_conversion_is_symmetric() {
        let src = [-1.0f32, -0.5, 0.0, 0.5, 1.0];
        let out: Vec<i16> = src.iter().copied().map(f32_to_i16).collect();
        assert_eq!(out, vec![-32767, -16384, 0, 16384, 32767]);
    }

    #[test]
    fn f32_conversion_clamps_out_of_range_input() {
        assert_eq!(f32_to_i16(2.5), 32767);
        assert_eq!(f32_to_i16(-2.5), -32767);
    }
}
