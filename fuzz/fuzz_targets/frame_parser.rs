//! Fuzz target for frame parsing
//!
//! Tests that the frame parser correctly handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veil_relay::frame::{Frame, max_frame_size};
use veil_relay::MAX_PACKET_SIZE;

fuzz_target!(|data: &[u8]| {
    // Complete frames with header
    if let Ok((frame, consumed)) = Frame::parse(data, max_frame_size(MAX_PACKET_SIZE)) {
        assert!(consumed <= data.len());
        let _ = frame.encode();
    }

    // Bodies decoded directly, first byte as the type
    if let Some((&frame_type, body)) = data.split_first() {
        let _ = Frame::decode(frame_type, body.to_vec());
    }
});
