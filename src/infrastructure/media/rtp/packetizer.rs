//! RTP header sequencing for locally payloaded media

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;

use super::packet::RtpPacket;

/// Wraps payloads of one access unit into RTP packets.
///
/// Sequence numbers continue across calls; the timestamp advances by the
/// duration of each unit at the track's clock rate. The marker bit is set on
/// the last packet of a unit.
#[derive(Debug)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    clock_rate: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpPacketizer {
    pub fn new(payload_type: u8, ssrc: u32, clock_rate: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            payload_type,
            ssrc,
            clock_rate,
            sequence: rng.gen(),
            timestamp: rng.gen(),
        }
    }

    pub fn packetize(&mut self, payloads: Vec<Bytes>, duration: Duration) -> Vec<RtpPacket> {
        let count = payloads.len();
        let packets = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let mut packet = RtpPacket::new(
                    self.payload_type,
                    self.sequence,
                    self.timestamp,
                    self.ssrc,
                    payload,
                );
                packet.marker = i + 1 == count;
                self.sequence = self.sequence.wrapping_add(1);
                packet
            })
            .collect();

        let ticks = (duration.as_secs_f64() * self.clock_rate as f64).round() as u32;
        self.timestamp = self.timestamp.wrapping_add(ticks);
        packets
    }

    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }
}

/// Outcome of observing one received sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    First,
    InOrder,
    /// Packets between the previous and this one were lost
    Gap(u16),
}

/// Detects sequence-number gaps on a received stream
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sequence: u16) -> SequenceStatus {
        let status = match self.last {
            None => SequenceStatus::First,
            Some(last) if sequence == last.wrapping_add(1) => SequenceStatus::InOrder,
            Some(last) => SequenceStatus::Gap(sequence.wrapping_sub(last).wrapping_sub(1)),
        };
        self.last = Some(sequence);
        status
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
