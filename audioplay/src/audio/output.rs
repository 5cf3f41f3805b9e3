//! Audio output using cpal
//!
//! Render sink backed by a real audio device. Submitted buffers travel to
//! the device callback over a lock-free ring; played buffers come back over
//! a second ring and are what `try_get_buffer` hands out.
//!
//! cpal streams are not `Send` on every platform, so the stream lives on a
//! dedicated output thread that parks until shutdown.

use crate::audio::buffer::OutputBuffer;
use crate::audio::sink::{RenderSink, RENDER_INPUT_PORT};
use crate::audio::types::{Destination, PcmFormat, SessionConfig};
use crate::error::{Error, Result};
use crate::playback::events::{emit, EventSender, RenderEvent};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// List available audio output devices.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// Render sink playing through a cpal output stream.
pub struct CpalSink {
    device_name: String,
    format: PcmFormat,
    /// Write end of the submission ring (read by the device callback)
    queue: Mutex<HeapProd<OutputBuffer>>,
    /// Read end of the free ring (written by the device callback)
    returned: Mutex<HeapCons<OutputBuffer>>,
    queued_frames: Arc<AtomicU64>,
    /// Stream error flag - set by the error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    destination: Mutex<String>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    output_thread: Mutex<Option<JoinHandle<()>>>,
    events: EventSender,
}

impl CpalSink {
    /// Open an output device and start its stream.
    ///
    /// # Arguments
    /// - `device`: device name (None = pick by destination, then default)
    /// - `destination`: with no device name, `Hdmi` prefers a device whose
    ///   name mentions HDMI
    ///
    /// # Errors
    /// - No usable output device
    /// - Device cannot run at the session's sample rate
    /// - Stream build/start failure
    pub fn open(
        config: &SessionConfig,
        device: Option<&str>,
        destination: Destination,
        events: EventSender,
    ) -> Result<Self> {
        let count = config.num_buffers as usize;
        let (queue_prod, queue_cons) = HeapRb::<OutputBuffer>::new(count).split();
        let (mut returned_prod, returned_cons) = HeapRb::<OutputBuffer>::new(count).split();

        for _ in 0..count {
            if returned_prod
                .try_push(OutputBuffer::with_capacity(config.buffer_capacity()))
                .is_err()
            {
                return Err(Error::Internal("buffer pool ring too small".to_string()));
            }
        }

        let queued_frames = Arc::new(AtomicU64::new(0));
        let error_flag = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));

        let cursor = PlaybackCursor::new(
            config.format,
            queue_cons,
            returned_prod,
            Arc::clone(&queued_frames),
            events.clone(),
        );

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let requested = device.map(str::to_string);
        let format = config.format;
        let thread_error_flag = Arc::clone(&error_flag);
        let thread_error_count = Arc::clone(&error_count);
        let thread_events = events.clone();

        let handle = std::thread::Builder::new()
            .name("audioplay-output".to_string())
            .spawn(move || {
                let started = start_stream(
                    requested.as_deref(),
                    destination,
                    format,
                    cursor,
                    thread_error_flag,
                    thread_error_count,
                    thread_events,
                );
                let stream = match started {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until shutdown or until the sink is dropped
                let _ = stop_rx.recv();

                if let Err(e) = stream.pause() {
                    warn!("Failed to pause stream: {}", e);
                }
                drop(stream);
                debug!("Output thread exiting");
            })?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("output thread exited during setup".to_string()))??;

        info!(
            "Audio output open on '{}' ({}, {} buffers x {} bytes)",
            device_name,
            format,
            config.num_buffers,
            config.buffer_capacity()
        );
        emit(&events, RenderEvent::PortSettingsChanged { port: RENDER_INPUT_PORT });

        Ok(Self {
            device_name,
            format,
            queue: Mutex::new(queue_prod),
            returned: Mutex::new(returned_cons),
            queued_frames,
            error_flag,
            error_count,
            destination: Mutex::new(destination.name().to_string()),
            stop_tx: Mutex::new(Some(stop_tx)),
            output_thread: Mutex::new(Some(handle)),
            events,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RenderSink for CpalSink {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn try_get_buffer(&self) -> Option<OutputBuffer> {
        lock(&self.returned).try_pop()
    }

    fn submit(&self, buffer: OutputBuffer) -> Result<()> {
        let frames = self.format.frames_in(buffer.filled_len()) as u64;

        // Count before queueing so the callback never drives the counter negative
        self.queued_frames.fetch_add(frames, Ordering::SeqCst);
        if lock(&self.queue).try_push(buffer).is_err() {
            self.queued_frames.fetch_sub(frames, Ordering::SeqCst);
            return Err(Error::Internal("render queue full".to_string()));
        }
        Ok(())
    }

    fn latency_frames(&self) -> Result<u32> {
        let queued = self.queued_frames.load(Ordering::SeqCst);
        Ok(u32::try_from(queued).unwrap_or(u32::MAX))
    }

    fn set_destination(&self, name: &str) -> Result<()> {
        let mut current = lock(&self.destination);
        if *current != name {
            // cpal routes by device; a different route needs a reopen with --device
            warn!(
                "Destination '{}' requested but '{}' is already open on '{}'",
                name, current, self.device_name
            );
        }
        *current = name.to_string();
        emit(
            &self.events,
            RenderEvent::ConfigChanged {
                what: format!("destination={}", name),
            },
        );
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(stop_tx) = lock(&self.stop_tx).take() {
            info!("Stopping audio stream on '{}'", self.device_name);
            let _ = stop_tx.send(());
        }

        if let Some(handle) = lock(&self.output_thread).take() {
            handle
                .join()
                .map_err(|_| Error::Internal("output thread panicked".to_string()))?;

            if self.error_flag.load(Ordering::SeqCst) {
                warn!(
                    "Audio stream on '{}' reported {} errors",
                    self.device_name,
                    self.error_count.load(Ordering::SeqCst)
                );
            }
        }
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        // Ensure stream is stopped on drop
        let _ = self.shutdown();
    }
}

/// Pick the output device: explicit name, then HDMI by name for the HDMI
/// route, then the host default.
fn select_device(requested: Option<&str>, destination: Destination) -> Result<Device> {
    let host = cpal::default_host();

    let wanted = |predicate: &dyn Fn(&str) -> bool| -> Result<Option<Device>> {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices.find(|d| d.name().map(|n| predicate(&n)).unwrap_or(false)))
    };

    if let Some(name) = requested {
        if let Some(device) = wanted(&|n| n == name)? {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    } else if destination == Destination::Hdmi {
        if let Some(device) = wanted(&|n| n.to_ascii_lowercase().contains("hdmi"))? {
            return Ok(device);
        }
        warn!("No HDMI output device found, falling back to default device");
    }

    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
}

/// Get a stream configuration running at the session's sample rate.
///
/// Prefers the session's channel count, then f32 over i16 over u16.
fn select_config(device: &Device, format: &PcmFormat) -> Result<(StreamConfig, SampleFormat)> {
    let rate = format.sample_rate;

    let best = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .filter_map(|c| {
            let rank = match c.sample_format() {
                SampleFormat::F32 => 2,
                SampleFormat::I16 => 1,
                SampleFormat::U16 => 0,
                _ => return None,
            };
            Some(((c.channels() == format.channels, rank), c))
        })
        .max_by_key(|(key, _)| *key)
        .map(|(_, c)| c)
        .ok_or_else(|| {
            Error::AudioOutput(format!("Device does not support {} Hz output", rate))
        })?;

    let supported = best.with_sample_rate(cpal::SampleRate(rate));
    Ok((supported.config(), supported.sample_format()))
}

fn start_stream(
    requested: Option<&str>,
    destination: Destination,
    format: PcmFormat,
    cursor: PlaybackCursor,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    events: EventSender,
) -> Result<(Stream, String)> {
    let device = select_device(requested, destination)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let (config, sample_format) = select_config(&device, &format)?;

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    let stream = match sample_format {
        SampleFormat::F32 => {
            build_stream::<f32>(&device, &config, cursor, error_flag, error_count, events)?
        }
        SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, cursor, error_flag, error_count, events)?
        }
        SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, cursor, error_flag, error_count, events)?
        }
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                other
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    Ok((stream, name))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut cursor: PlaybackCursor,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    events: EventSender,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0.0f32; channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    if cursor.next_frame(&mut scratch) {
                        for (slot, sample) in frame.iter_mut().zip(&scratch) {
                            *slot = T::from_sample(*sample);
                        }
                    } else {
                        frame.fill(T::EQUILIBRIUM);
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::SeqCst);
                let count = error_count.fetch_add(1, Ordering::SeqCst) + 1;
                emit(
                    &events,
                    RenderEvent::Error {
                        code: count,
                        message: err.to_string(),
                    },
                );
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Callback-side reader over submitted buffers.
///
/// Runs on the device thread: only ring and atomic operations.
struct PlaybackCursor {
    format: PcmFormat,
    queue: HeapCons<OutputBuffer>,
    returned: HeapProd<OutputBuffer>,
    current: Option<OutputBuffer>,
    /// Byte offset into `current`
    position: usize,
    queued_frames: Arc<AtomicU64>,
    events: EventSender,
}

impl PlaybackCursor {
    fn new(
        format: PcmFormat,
        queue: HeapCons<OutputBuffer>,
        returned: HeapProd<OutputBuffer>,
        queued_frames: Arc<AtomicU64>,
        events: EventSender,
    ) -> Self {
        Self {
            format,
            queue,
            returned,
            current: None,
            position: 0,
            queued_frames,
            events,
        }
    }

    /// Decode the next PCM frame into `out` (one f32 per device channel).
    ///
    /// Device channels beyond the stream's wrap around the stream's
    /// channels. Returns false on underrun.
    fn next_frame(&mut self, out: &mut [f32]) -> bool {
        let frame_size = self.format.frame_size();
        let bytes_per_sample = self.format.bytes_per_sample();
        let channels = self.format.channels as usize;

        loop {
            if self.current.is_none() {
                self.current = self.queue.try_pop();
                self.position = 0;
            }

            let Some(buffer) = self.current.as_ref() else {
                return false;
            };

            if self.position + frame_size > buffer.filled_len() {
                self.finish_current();
                continue;
            }

            let frame = &buffer.filled()[self.position..self.position + frame_size];
            for (index, slot) in out.iter_mut().enumerate() {
                let offset = (index % channels) * bytes_per_sample;
                *slot = decode_sample(&frame[offset..offset + bytes_per_sample]);
            }

            self.position += frame_size;
            self.queued_frames.fetch_sub(1, Ordering::SeqCst);
            return true;
        }
    }

    fn finish_current(&mut self) {
        if let Some(mut buffer) = self.current.take() {
            buffer.reset();
            let id = buffer.id();
            // The free ring holds the whole pool, so this cannot overflow
            let _ = self.returned.try_push(buffer);
            emit(&self.events, RenderEvent::BufferReturned { id });
        }
    }
}

/// Little-endian signed sample to [-1.0, 1.0)
fn decode_sample(bytes: &[u8]) -> f32 {
    match bytes.len() {
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::events;

    fn cursor(format: PcmFormat, pool: usize) -> (PlaybackCursor, HeapProd<OutputBuffer>, HeapCons<OutputBuffer>) {
        let (queue_prod, queue_cons) = HeapRb::<OutputBuffer>::new(pool).split();
        let (returned_prod, returned_cons) = HeapRb::<OutputBuffer>::new(pool).split();
        let (tx, _rx) = events::channel();
        let cursor = PlaybackCursor::new(
            format,
            queue_cons,
            returned_prod,
            Arc::new(AtomicU64::new(0)),
            tx,
        );
        (cursor, queue_prod, returned_cons)
    }

    fn buffer_with(samples: &[i16]) -> OutputBuffer {
        let mut buffer = OutputBuffer::with_capacity(samples.len() * 2);
        for (chunk, sample) in buffer.as_mut_slice().chunks_exact_mut(2).zip(samples) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        buffer.set_filled_len(samples.len() * 2);
        buffer
    }

    #[test]
    fn test_list_devices() {
        // This test requires audio hardware
        // Just verify it doesn't panic
        let result = list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_decode_sample_scaling() {
        assert_eq!(decode_sample(&0i16.to_le_bytes()), 0.0);
        assert_eq!(decode_sample(&i16::MIN.to_le_bytes()), -1.0);
        assert_eq!(decode_sample(&(16384i16).to_le_bytes()), 0.5);
        assert_eq!(decode_sample(&(1i32 << 30).to_le_bytes()), 0.5);
    }

    #[test]
    fn test_cursor_underrun_when_queue_empty() {
        let format = PcmFormat::new(48000, 2, 16).unwrap();
        let (mut cursor, _queue, _returned) = cursor(format, 2);
        let mut out = [1.0f32; 2];
        assert!(!cursor.next_frame(&mut out));
    }

    #[test]
    fn test_cursor_plays_frames_then_returns_buffer() {
        let format = PcmFormat::new(48000, 2, 16).unwrap();
        let (mut cursor, mut queue, mut returned) = cursor(format, 2);
        cursor.queued_frames.store(2, Ordering::SeqCst);

        let buffer = buffer_with(&[16384, -16384, 0, 8192]);
        let id = buffer.id();
        assert!(queue.try_push(buffer).is_ok());

        let mut out = [0.0f32; 2];
        assert!(cursor.next_frame(&mut out));
        assert_eq!(out, [0.5, -0.5]);
        assert!(cursor.next_frame(&mut out));
        assert_eq!(out, [0.0, 0.25]);
        assert_eq!(cursor.queued_frames.load(Ordering::SeqCst), 0);

        // Buffer goes back to the free ring once exhausted
        assert!(!cursor.next_frame(&mut out));
        let back = returned.try_pop().unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.filled_len(), 0);
    }

    #[test]
    fn test_cursor_spreads_mono_over_device_channels() {
        let format = PcmFormat::new(48000, 1, 16).unwrap();
        let (mut cursor, mut queue, _returned) = cursor(format, 1);
        cursor.queued_frames.store(1, Ordering::SeqCst);
        assert!(queue.try_push(buffer_with(&[16384])).is_ok());

        let mut out = [0.0f32; 2];
        assert!(cursor.next_frame(&mut out));
        assert_eq!(out, [0.5, 0.5]);
    }
}
