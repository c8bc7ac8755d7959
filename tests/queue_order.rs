//! Property tests for the inbound queue

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;

use lan_audio_receiver::packet::{InboundQueue, Protocol};
use lan_audio_receiver::state::StateTracker;

fn addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn rtp_packet(ssrc: u32, seq: u16) -> Bytes {
    let mut buf = BytesMut::zeroed(12);
    buf[0] = 0x80;
    buf[1] = 10;
    buf[2..4].copy_from_slice(&seq.to_be_bytes());
    buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
    buf.freeze()
}

proptest! {
    /// Pushes from one producer come back in push order, exactly once,
    /// regardless of how pops interleave with pushes.
    #[test]
    fn fifo_per_producer(
        batches in prop::collection::vec(1usize..20, 1..10),
    ) {
        let queue = InboundQueue::new(Protocol::Rtp, Arc::new(StateTracker::new()));
        let writer = queue.writer();

        let mut next_push: u16 = 0;
        let mut next_pop: u16 = 0;

        for batch in batches {
            for _ in 0..batch {
                writer.push(rtp_packet(1, next_push), addr()).unwrap();
                next_push = next_push.wrapping_add(1);
            }
            // Drain half of what is queued, then keep pushing
            for _ in 0..(queue.len() / 2) {
                let raw = queue.pop().expect("queue reported non-empty");
                let seq = u16::from_be_bytes([raw.data[2], raw.data[3]]);
                prop_assert_eq!(seq, next_pop);
                next_pop = next_pop.wrapping_add(1);
            }
        }

        while let Some(raw) = queue.pop() {
            let seq = u16::from_be_bytes([raw.data[2], raw.data[3]]);
            prop_assert_eq!(seq, next_pop);
            next_pop = next_pop.wrapping_add(1);
        }
        prop_assert_eq!(next_pop, next_push);

        let stats = queue.stats();
        prop_assert_eq!(stats.pushed, stats.popped);
    }
}
