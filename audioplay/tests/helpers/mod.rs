//! Test helper modules for audioplay integration tests
//!
//! - ScriptedSink: render sink whose reported latency follows a script
//! - SharedSink: hands a simulated sink to a session while the test keeps a handle
//! - wav_fixture: deterministic WAV files for the decode path
//! - mp3_fixture: path to the committed silent MP3

#![allow(dead_code)]

pub mod mp3_fixture;
pub mod scripted_sink;
pub mod wav_fixture;

pub use mp3_fixture::{silent_mp3, MP3_FIXTURE_FRAMES, SAMPLES_PER_MP3_FRAME};
pub use scripted_sink::{ScriptProbe, ScriptedSink, SharedSink};
pub use wav_fixture::{generate_ramp_wav, ramp_sample};
