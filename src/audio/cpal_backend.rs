//! cpal implementation of the audio seams.
//!
//! cpal streams are not `Send` on every platform, so each open stream lives on
//! a dedicated thread that owns it and hands samples over a crossbeam channel.
//! Capture runs at a rate the device supports and is converted to 16-bit mono
//! at the session rate in the callback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, error, info, warn};

use super::devices::{AudioBackend, DeviceInfo, InputStream, StreamFormat};
use super::playback::AudioSink;
use crate::error::{CoachError, Result};

/// How long a read may wait before the device is considered stalled.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames buffered between the cpal callback and the reader.
const FRAME_QUEUE: usize = 8;

struct Entry {
    index: usize,
    host: cpal::HostId,
    device: cpal::Device,
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into())
}

/// Every input device of every available host, in a stable order.
fn enumerate() -> Vec<Entry> {
    let mut entries = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                debug!(host = host_id.name(), "host unavailable: {e}");
                continue;
            }
        };
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                debug!(host = host_id.name(), "cannot enumerate devices: {e}");
                continue;
            }
        };
        for device in devices {
            entries.push(Entry {
                index: entries.len(),
                host: host_id,
                device,
            });
        }
    }
    entries
}

fn find_device(index: Option<usize>) -> Result<cpal::Device> {
    match index {
        Some(index) => enumerate()
            .into_iter()
            .find(|e| e.index == index)
            .map(|e| e.device)
            .ok_or_else(|| CoachError::Audio(format!("input device {index} not found"))),
        None => cpal::default_host()
            .default_input_device()
            .ok_or_else(|| CoachError::Audio("no default input device".into())),
    }
}

/// Pick an f32 input configuration, preferring the session format exactly
/// and falling back to the device default (converted in the callback).
fn input_config_for(device: &cpal::Device, format: &StreamFormat) -> Result<StreamConfig> {
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.sample_format() == SampleFormat::F32
                && range.channels() == format.channels
                && range.min_sample_rate() <= format.sample_rate
                && range.max_sample_rate() >= format.sample_rate
            {
                return Ok(range.with_sample_rate(format.sample_rate).into());
            }
        }
    }

    let default = device
        .default_input_config()
        .map_err(|e| CoachError::Audio(format!("no default input config: {e}")))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(CoachError::Audio(format!(
            "capture requires f32 input (got {:?})",
            default.sample_format()
        )));
    }
    Ok(default.into())
}

/// Build (but do not start) a capture stream delivering PCM16 frames.
fn build_capture(
    device: &cpal::Device,
    format: StreamFormat,
    frames: Sender<Vec<u8>>,
    failed: Sender<()>,
) -> Result<cpal::Stream> {
    let config = input_config_for(device, &format)?;
    let native_rate = config.sample_rate;
    let native_channels = config.channels;
    let target_rate = format.sample_rate;
    let frame_samples = format.frame_samples.max(1);
    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = if native_rate != target_rate {
                    resample(&mono, native_rate, target_rate)
                } else {
                    mono
                };
                pending.extend(samples.iter().map(|s| f32_to_i16(*s)));

                while pending.len() >= frame_samples {
                    let frame: Vec<u8> = pending
                        .drain(..frame_samples)
                        .flat_map(i16::to_le_bytes)
                        .collect();
                    // Never block the audio thread.
                    if frames.try_send(frame).is_err() {
                        debug!("capture queue full, dropping frame");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
                let _ = failed.try_send(());
            },
            None,
        )
        .map_err(|e| CoachError::Audio(format!("failed to build input stream: {e}")))
}

/// Enumerates and opens devices through cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(enumerate()
            .into_iter()
            .map(|entry| DeviceInfo {
                index: entry.index,
                name: device_name(&entry.device),
                max_input_channels: entry
                    .device
                    .default_input_config()
                    .map(|c| c.channels())
                    .unwrap_or(0),
                host: entry.host.name().to_owned(),
            })
            .collect())
    }

    fn default_input_name(&self) -> Option<String> {
        cpal::default_host()
            .default_input_device()
            .map(|d| device_name(&d))
    }

    fn default_input_index(&self) -> Option<usize> {
        let host = cpal::default_host();
        let default_name = device_name(&host.default_input_device()?);
        enumerate()
            .into_iter()
            .find(|e| e.host == host.id() && device_name(&e.device) == default_name)
            .map(|e| e.index)
    }

    fn probe(&self, index: usize, format: &StreamFormat) -> bool {
        let Ok(device) = find_device(Some(index)) else {
            return false;
        };
        let (frames, _rx) = bounded(1);
        let (failed, _failed_rx) = bounded(1);
        match build_capture(&device, *format, frames, failed) {
            Ok(stream) => {
                drop(stream);
                true
            }
            Err(e) => {
                debug!(index, "probe failed: {e}");
                false
            }
        }
    }

    fn open_input(
        &self,
        index: Option<usize>,
        format: &StreamFormat,
    ) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(CpalInputStream::open(index, *format)?))
    }
}

/// A capture stream owned by a dedicated thread.
pub struct CpalInputStream {
    frames: Receiver<Vec<u8>>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInputStream {
    /// Open `index` (or the system default) and start capturing.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Audio`] if the device cannot be opened or started.
    pub fn open(index: Option<usize>, format: StreamFormat) -> Result<Self> {
        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let thread = std::thread::Builder::new()
            .name("tama-mic".into())
            .spawn(move || {
                let (failed_tx, failed_rx) = bounded::<()>(1);
                let started = find_device(index).and_then(|device| {
                    info!(index = ?index, name = %device_name(&device), "opening microphone");
                    let stream = build_capture(&device, format, frame_tx, failed_tx)?;
                    stream
                        .play()
                        .map_err(|e| CoachError::Audio(format!("failed to start input stream: {e}")))?;
                    Ok(stream)
                });
                let stream = match started {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Hold the stream until the reader goes away or the device errors.
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => {}
                    recv(failed_rx) -> _ => warn!("microphone stream failed"),
                }
                drop(stream);
                debug!("microphone thread exiting");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                frames: frame_rx,
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CoachError::Audio("microphone thread exited early".into()))
            }
        }
    }
}

impl InputStream for CpalInputStream {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        self.frames.recv_timeout(READ_TIMEOUT).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                CoachError::Audio("microphone stalled".into())
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                CoachError::Audio("microphone stream closed".into())
            }
        })
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        // Dropping the sender wakes the owning thread.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Speaker output fed from a shared sample queue.
pub struct CpalSpeaker {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSpeaker {
    /// Open the default output device as a mono stream at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Audio`] if no output device can be opened.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let cb_queue = Arc::clone(&queue);

        let thread = std::thread::Builder::new()
            .name("tama-speaker".into())
            .spawn(move || {
                let started = (|| -> Result<cpal::Stream> {
                    let device = cpal::default_host()
                        .default_output_device()
                        .ok_or_else(|| CoachError::Audio("no default output device".into()))?;
                    info!(name = %device_name(&device), "using output device");
                    let config = StreamConfig {
                        channels: 1,
                        sample_rate,
                        buffer_size: cpal::BufferSize::Default,
                    };
                    let stream = device
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                                let mut queue = match cb_queue.lock() {
                                    Ok(q) => q,
                                    Err(_) => return,
                                };
                                for sample in data.iter_mut() {
                                    *sample = queue.pop_front().unwrap_or(0.0);
                                }
                            },
                            move |err| {
                                error!("audio output stream error: {err}");
                            },
                            None,
                        )
                        .map_err(|e| CoachError::Audio(format!("failed to build output stream: {e}")))?;
                    stream
                        .play()
                        .map_err(|e| CoachError::Audio(format!("failed to start output stream: {e}")))?;
                    Ok(stream)
                })();

                match started {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CoachError::Audio("speaker thread exited early".into()))
            }
        }
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut VecDeque<f32>) -> R) -> R {
        match self.queue.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl AudioSink for CpalSpeaker {
    fn enqueue(&self, pcm: &[u8]) -> Result<()> {
        self.with_queue(|queue| {
            queue.extend(
                pcm.chunks_exact(2)
                    .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0),
            );
        });
        Ok(())
    }

    fn clear(&self) {
        self.with_queue(VecDeque::clear);
    }

    fn pending_samples(&self) -> usize {
        self.with_queue(|queue| queue.len())
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
