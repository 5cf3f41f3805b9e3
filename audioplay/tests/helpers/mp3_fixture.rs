//! Committed MP3 fixture for the decode path
//!
//! `fixtures/silence_44k_stereo.mp3` holds 20 MPEG-1 Layer III frames
//! (128 kbps, 44.1 kHz, stereo) with zeroed side info, so every decoded
//! sample is silent.

use std::path::PathBuf;

pub const MP3_FIXTURE_FRAMES: u64 = 20;

/// PCM frames per MPEG-1 Layer III frame
pub const SAMPLES_PER_MP3_FRAME: u64 = 1152;

pub fn silent_mp3() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("silence_44k_stereo.mp3")
}
