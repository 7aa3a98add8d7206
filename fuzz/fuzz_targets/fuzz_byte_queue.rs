//! Fuzz target: `ByteQueue` ring buffer
//!
//! Interprets the input as a script of push / pop / discard operations
//! and checks the queue against a `VecDeque` model:
//! - bytes come out in the order they went in
//! - `available()` never exceeds `capacity()` (N - 1)
//!
//! cargo fuzz run fuzz_byte_queue

#![no_main]

use std::collections::VecDeque;

use cloudlink::queue::ByteQueue;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut q: ByteQueue<17> = ByteQueue::new();
    let mut model = VecDeque::new();
    let mut bytes = data.iter().copied();

    while let Some(op) = bytes.next() {
        let n = usize::from(op & 0x1F);
        match op >> 6 {
            0 | 1 => {
                let chunk: Vec<u8> = bytes.by_ref().take(n).collect();
                let written = q.push(&chunk);
                assert_eq!(written, chunk.len().min(q.capacity() - model.len()));
                model.extend(&chunk[..written]);
            }
            2 => {
                let mut out = vec![0u8; n];
                let read = q.pop(&mut out);
                let expected: Vec<u8> = model.drain(..read.min(model.len())).collect();
                assert_eq!(&out[..read], &expected[..]);
            }
            _ => {
                let dropped = q.discard(n);
                model.drain(..dropped.min(model.len()));
            }
        }
        assert_eq!(q.available(), model.len());
        assert!(q.available() <= q.capacity());
    }
});
