//! Fuzz target: inbound plaintext frame parsing
//!
//! Drives arbitrary decrypted bytes through padding removal, header
//! decoding, classification and the per-kind parsers the dispatcher
//! uses, asserting that none of them panic or index outside the frame.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use cloudlink::protocol::coap::{Options, decode_header, pkcs7_unpad};
use cloudlink::protocol::events::decode_event;
use cloudlink::protocol::message::{MessageKind, classify, request_key};
use cloudlink::protocol::ota::parse_chunk;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let frame = match pkcs7_unpad(data) {
        Ok(n) => &data[..n],
        Err(_) => data,
    };

    let kind = classify(frame);
    let Ok(header) = decode_header(frame) else {
        assert_eq!(kind, MessageKind::Error, "undecodable header must classify as Error");
        return;
    };
    let offset = header.options_offset();
    assert!(offset <= frame.len());

    let mut options = Options::new(frame, offset);
    for option in options.by_ref() {
        assert!(option.value.len() <= frame.len());
    }
    assert!(options.payload().len() <= frame.len());

    match kind {
        MessageKind::FunctionCall | MessageKind::VariableRequest => {
            if let Some(key) = request_key(frame, offset) {
                assert!(key.len() <= frame.len());
            }
        }
        MessageKind::Chunk => {
            let _ = parse_chunk(frame, offset);
        }
        MessageKind::Event => {
            if let Ok(event) = decode_event(frame) {
                assert!(event.data.len() <= frame.len());
            }
        }
        _ => {}
    }
});
