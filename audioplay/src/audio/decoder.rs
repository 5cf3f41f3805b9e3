//! Decode path using symphonia
//!
//! Converts a compressed stream (MP3; WAV is also accepted) into
//! interleaved signed 16-bit little-endian PCM, chunked to the size of the
//! decoder's output port.

use crate::audio::types::{align_buffer_size, PcmFormat, PcmSource};
use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Port index of the decoder's compressed input
pub const DECODER_INPUT_PORT: u32 = 120;

/// Port index of the decoder's PCM output
pub const DECODER_OUTPUT_PORT: u32 = 121;

/// Smallest read buffer symphonia accepts (must exceed 32 KiB)
const MIN_READ_BUFFER: usize = 64 * 1024;

/// Decoded output is always 16-bit
const DECODED_BIT_DEPTH: u16 = 16;

/// Buffer count and size for one decoder port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    pub index: u32,
    pub buffer_count: u32,
    /// Aligned buffer size in bytes
    pub buffer_size: usize,
}

/// Input and output port configuration of the decode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecoderPorts {
    pub input: PortConfig,
    pub output: PortConfig,
}

impl DecoderPorts {
    /// Validate port sizing. Sizes are rounded up to 16 bytes.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if any count or size is zero.
    pub fn new(
        in_count: u32,
        in_size: usize,
        out_count: u32,
        out_size: usize,
    ) -> Result<Self> {
        if in_count == 0 || in_size == 0 || out_count == 0 || out_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "decoder ports need non-zero buffers (in {}x{}, out {}x{})",
                in_count, in_size, out_count, out_size
            )));
        }

        Ok(Self {
            input: PortConfig {
                index: DECODER_INPUT_PORT,
                buffer_count: in_count,
                buffer_size: align_buffer_size(in_size),
            },
            output: PortConfig {
                index: DECODER_OUTPUT_PORT,
                buffer_count: out_count,
                buffer_size: align_buffer_size(out_size),
            },
        })
    }

    /// Read-ahead for the compressed stream, sized from the input port
    fn read_buffer_len(&self) -> usize {
        (self.input.buffer_count as usize * self.input.buffer_size)
            .next_power_of_two()
            .max(MIN_READ_BUFFER)
    }
}

struct OpenedStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: PcmFormat,
}

fn open_stream(path: &Path, read_buffer_len: usize) -> Result<OpenedStream> {
    let file = File::open(path)
        .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;

    let mss = MediaSourceStream::new(
        Box::new(file),
        MediaSourceStreamOptions {
            buffer_len: read_buffer_len,
        },
    );

    // Unknown extensions are treated as MPEG-1 Layer III
    let mut hint = Hint::new();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => hint.with_extension(ext),
        None => hint.with_extension("mp3"),
    };

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

    let format = PcmFormat::new(sample_rate, channels, DECODED_BIT_DEPTH)
        .map_err(|e| Error::Decode(format!("Unsupported stream layout: {}", e)))?;

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    Ok(OpenedStream {
        reader,
        decoder,
        track_id,
        format,
    })
}

/// Pull-based decoder producing frame-aligned PCM chunks.
pub struct StreamDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: PcmFormat,
    ports: DecoderPorts,
    /// Decoded bytes not yet handed out
    pending: Vec<u8>,
    read_pos: usize,
    sample_buf: Option<SampleBuffer<i16>>,
    finished: bool,
    frames_decoded: u64,
}

impl StreamDecoder {
    /// Read just enough of the file to learn its PCM layout.
    pub fn probe(path: &Path) -> Result<PcmFormat> {
        Ok(open_stream(path, MIN_READ_BUFFER)?.format)
    }

    /// Open a file for decoding with the given port configuration.
    pub fn open(path: &Path, ports: DecoderPorts) -> Result<Self> {
        let opened = open_stream(path, ports.read_buffer_len())?;

        info!(
            "Decoding {} ({}), in {}x{} bytes, out {}x{} bytes",
            path.display(),
            opened.format,
            ports.input.buffer_count,
            ports.input.buffer_size,
            ports.output.buffer_count,
            ports.output.buffer_size
        );

        Ok(Self {
            reader: opened.reader,
            decoder: opened.decoder,
            track_id: opened.track_id,
            format: opened.format,
            ports,
            pending: Vec::new(),
            read_pos: 0,
            sample_buf: None,
            finished: false,
            frames_decoded: 0,
        })
    }

    /// PCM layout of the decoded stream
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// true once the stream is exhausted and every decoded byte handed out
    pub fn is_finished(&self) -> bool {
        self.finished && self.read_pos >= self.pending.len()
    }

    /// Copy the next chunk of PCM into `out`.
    ///
    /// The chunk is the smaller of `out` and the output port buffer size,
    /// rounded down to whole frames; the final chunk may be shorter.
    /// Returns 0 at end of stream.
    pub fn next_chunk(&mut self, out: &mut [u8]) -> Result<usize> {
        let frame_size = self.format.frame_size();
        let mut want = out.len().min(self.ports.output.buffer_size);
        want -= want % frame_size;

        while self.pending.len() - self.read_pos < want && !self.finished {
            self.decode_next()?;
        }

        let available = self.pending.len() - self.read_pos;
        let n = want.min(available);
        out[..n].copy_from_slice(&self.pending[self.read_pos..self.read_pos + n]);
        self.read_pos += n;

        if self.read_pos == self.pending.len() {
            self.pending.clear();
            self.read_pos = 0;
        } else if self.read_pos > self.pending.len() / 2 {
            self.pending.drain(..self.read_pos);
            self.read_pos = 0;
        }

        Ok(n)
    }

    fn decode_next(&mut self) -> Result<()> {
        let packet = match self.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Reached end of stream after {} frames", self.frames_decoded);
                self.finished = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("Stream parameters changed; stopping decode");
                self.finished = true;
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Decode(format!("Error reading packet: {}", e)));
            }
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if spec.channels.count() != self.format.channels as usize {
                    return Err(Error::Decode(format!(
                        "Channel count changed mid-stream ({} -> {})",
                        self.format.channels,
                        spec.channels.count()
                    )));
                }

                let needed = decoded.capacity() * spec.channels.count();
                if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                    self.sample_buf = Some(SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
                }

                if let Some(buf) = self.sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    self.pending.reserve(buf.samples().len() * 2);
                    for sample in buf.samples() {
                        self.pending.extend_from_slice(&sample.to_le_bytes());
                    }
                    self.frames_decoded += (buf.samples().len() / spec.channels.count()) as u64;
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame: skip it and keep going
                warn!("Decode error: {}", e);
            }
            Err(e) => {
                return Err(Error::Decode(format!("Decoder failure: {}", e)));
            }
        }

        Ok(())
    }
}

impl PcmSource for StreamDecoder {
    fn fill(&mut self, out: &mut [u8], format: &PcmFormat) -> Result<usize> {
        if *format != self.format {
            return Err(Error::InvalidArgument(format!(
                "decoder produces {} but the session expects {}",
                self.format, format
            )));
        }
        self.next_chunk(out)
    }
}
