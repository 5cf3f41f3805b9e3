//! Session and buffer tracker integration tests
//!
//! Covers construction validation, the checked-out set, rejected
//! submissions, routing names and decoder port configuration.

mod helpers;

use audioplay::audio::buffer::OutputBuffer;
use audioplay::audio::simulated::{Pacing, SimulatedSink};
use audioplay::audio::types::{PcmFormat, SessionConfig, BUFFER_SIZE_SAMPLES};
use audioplay::playback::{events, AudioSession};
use audioplay::{Error, RejectReason};
use helpers::ScriptedSink;

const RATES: [u32; 9] = [8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000];

fn manual_session(channels: u16, bit_depth: u16, buffers: u32) -> AudioSession {
    let format = PcmFormat::new(48000, channels, bit_depth).unwrap();
    let config = SessionConfig::with_frames(format, buffers, BUFFER_SIZE_SAMPLES).unwrap();
    let (tx, _rx) = events::channel();
    let sink = SimulatedSink::new(&config, Pacing::Manual, tx);
    AudioSession::create(config, Box::new(sink)).unwrap()
}

#[test]
fn test_every_valid_combination_constructs() {
    for rate in RATES {
        for channels in [1u16, 2, 4, 8] {
            for bits in [16u16, 32] {
                let format = PcmFormat::new(rate, channels, bits).unwrap();
                let config = SessionConfig::with_frames(format, 10, BUFFER_SIZE_SAMPLES).unwrap();

                assert_eq!(config.buffer_capacity() % 16, 0);
                assert_eq!(config.fill_length() % format.frame_size(), 0);
                assert_eq!(config.fill_length(), BUFFER_SIZE_SAMPLES * format.frame_size());

                let (sink, _probe) = ScriptedSink::new(&config, &[]);
                let session = AudioSession::create(config, Box::new(sink)).unwrap();
                assert_eq!(session.format(), format);
                session.delete().unwrap();
            }
        }
    }
}

#[test]
fn test_invalid_construction_arguments() {
    for (rate, channels, bits) in [
        (7999, 2, 16),
        (96001, 2, 16),
        (0, 2, 16),
        (48000, 0, 16),
        (48000, 3, 16),
        (48000, 16, 16),
        (48000, 2, 8),
        (48000, 2, 24),
    ] {
        let result = SessionConfig::new(rate, channels, bits, 10, 4096);
        assert!(
            matches!(result, Err(Error::InvalidArgument(_))),
            "{} Hz {} ch {}-bit should be rejected",
            rate,
            channels,
            bits
        );
    }

    assert!(SessionConfig::new(48000, 2, 16, 0, 4096).is_err());
    assert!(SessionConfig::new(48000, 2, 16, 10, 3).is_err());
    assert!(SessionConfig::new(48000, 8, 32, 10, 31).is_err());
    assert!(SessionConfig::new(48000, 8, 32, 10, 32).is_ok());
}

#[test]
fn test_unaligned_buffer_size_rounds_up() {
    // 6 frames of 8-channel 32-bit audio = 192 bytes; 200 is not a multiple of 16
    let config = SessionConfig::new(48000, 8, 32, 2, 200).unwrap();
    assert_eq!(config.buffer_capacity(), 208);
    assert_eq!(config.fill_length(), 192);
}

#[test]
fn test_buffer_is_tracked_until_released() {
    let session = manual_session(2, 16, 3);

    let a = session.get_buffer().unwrap();
    let b = session.get_buffer().unwrap();
    let (a_id, b_id) = (a.id(), b.id());
    assert_ne!(a_id, b_id);
    assert!(session.tracker().is_checked_out(a_id));
    assert!(session.tracker().is_checked_out(b_id));

    session.play_buffer(a, 4096).unwrap();
    assert!(!session.tracker().is_checked_out(a_id));
    assert!(session.tracker().is_checked_out(b_id));

    session.play_buffer(b, 4096).unwrap();
    assert_eq!(session.tracker().outstanding(), 0);
}

#[test]
fn test_misaligned_length_leaves_tracker_unchanged() {
    let session = manual_session(2, 32, 2);
    assert_eq!(session.format().frame_size(), 8);

    let mut buffer = session.get_buffer().unwrap();
    let id = buffer.id();

    for length in [1, 4, 6, 7, 8 * 3 + 2] {
        let rejected = session.tracker().release(buffer, length).unwrap_err();
        assert_eq!(
            rejected.reason,
            RejectReason::Misaligned {
                length,
                frame_size: 8
            }
        );
        assert_eq!(rejected.buffer.id(), id);
        assert!(session.tracker().is_checked_out(id));
        assert_eq!(session.tracker().outstanding(), 1);
        buffer = rejected.buffer;
    }

    session.play_buffer(buffer, 8 * 3).unwrap();
    assert_eq!(session.tracker().outstanding(), 0);
}

#[test]
fn test_foreign_buffer_rejected() {
    let session = manual_session(2, 16, 2);
    let held = session.get_buffer().unwrap();

    let foreign = OutputBuffer::with_capacity(4096);
    let foreign_id = foreign.id();

    let err = session.play_buffer(foreign, 4096).unwrap_err();
    assert!(matches!(
        err,
        Error::BufferRejected(RejectReason::UnknownBuffer(id)) if id == foreign_id
    ));
    assert_eq!(session.tracker().outstanding(), 1);
    assert!(session.tracker().is_checked_out(held.id()));
    assert_eq!(session.latency().unwrap(), 0);
}

#[test]
fn test_rejected_submission_keeps_pool_size() {
    let format = PcmFormat::new(48000, 2, 16).unwrap();
    let config = SessionConfig::with_frames(format, 1, BUFFER_SIZE_SAMPLES).unwrap();
    let (tx, _rx) = events::channel();
    let sink = SimulatedSink::new(&config, Pacing::Instant, tx);
    let session = AudioSession::create(config, Box::new(sink)).unwrap();

    let buffer = session.get_buffer().unwrap();
    assert!(session.get_buffer().is_none());
    assert!(matches!(
        session.play_buffer(buffer, 6),
        Err(Error::BufferRejected(RejectReason::Misaligned {
            length: 6,
            frame_size: 4
        }))
    ));
    assert_eq!(session.tracker().outstanding(), 0);

    let buffer = session
        .get_buffer()
        .expect("only buffer should be back in the pool after a misaligned submit");
    let capacity = buffer.capacity();
    assert!(matches!(
        session.play_buffer(buffer, capacity + 4),
        Err(Error::BufferRejected(RejectReason::ExceedsCapacity { .. }))
    ));
    assert_eq!(session.tracker().outstanding(), 0);

    let buffer = session
        .get_buffer()
        .expect("only buffer should be back in the pool after an oversized submit");
    session.play_buffer(buffer, 4096).unwrap();
    assert!(session.get_buffer().is_some());
}

#[test]
fn test_release_beyond_capacity_rejected() {
    let session = manual_session(2, 16, 2);
    let buffer = session.get_buffer().unwrap();
    let capacity = buffer.capacity();

    let rejected = session.tracker().release(buffer, capacity + 4).unwrap_err();
    assert_eq!(
        rejected.reason,
        RejectReason::ExceedsCapacity {
            length: capacity + 4,
            capacity
        }
    );
    assert_eq!(session.tracker().outstanding(), 1);
}

#[test]
fn test_pool_exhaustion_returns_none() {
    let session = manual_session(2, 16, 2);
    let _a = session.get_buffer().unwrap();
    let _b = session.get_buffer().unwrap();
    assert!(session.get_buffer().is_none());
    assert_eq!(session.tracker().outstanding(), 2);
}

#[test]
fn test_destination_routing() {
    let format = PcmFormat::new(48000, 2, 16).unwrap();
    let config = SessionConfig::with_frames(format, 2, 1024).unwrap();
    let (sink, probe) = ScriptedSink::new(&config, &[]);
    let mut session = AudioSession::create(config, Box::new(sink)).unwrap();

    session.set_destination("hdmi").unwrap();
    assert_eq!(probe.destination().as_deref(), Some("hdmi"));

    let too_long = "a".repeat(128);
    assert!(matches!(
        session.set_destination(&too_long),
        Err(Error::InvalidArgument(_))
    ));
    assert!(session.set_destination("").is_err());
    // Rejected names never reach the sink
    assert_eq!(probe.destination().as_deref(), Some("hdmi"));
    assert_eq!(session.destination(), Some("hdmi"));
}

#[test]
fn test_configure_decoder() {
    let mut session = manual_session(2, 16, 2);

    assert!(session.configure_decoder(0, 4096, 10, 4096).is_err());
    assert!(session.configure_decoder(10, 4096, 10, 0).is_err());
    assert!(session.decoder_ports().is_none());

    let ports = session.configure_decoder(10, 1000, 10, 4100).unwrap();
    assert_eq!(ports.input.buffer_size, 1008);
    assert_eq!(ports.output.buffer_size, 4112);
    assert_eq!(session.decoder_ports(), Some(ports));
}
