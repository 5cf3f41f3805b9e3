//! Deterministic WAV files for the decode path
//!
//! Each sample encodes its position so decoded chunks can be checked
//! byte for byte.

use hound::{WavSpec, WavWriter};
use std::path::Path;

/// Sample written for `frame` on `channel`
pub fn ramp_sample(frame: usize, channel: usize) -> i16 {
    let value = (frame % 16_384) as i16;
    if channel % 2 == 0 {
        value
    } else {
        -value
    }
}

/// Write a 16-bit PCM WAV of `frames` frames
pub fn generate_ramp_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    frames: usize,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for frame in 0..frames {
        for channel in 0..channels as usize {
            writer.write_sample(ramp_sample(frame, channel))?;
        }
    }
    writer.finalize()?;
    Ok(())
}
