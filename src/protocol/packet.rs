use std::borrow::Cow;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::buffer::Cursor;
use crate::constant::{MAX_PAYLOAD_LENGTH, PACKET_HEADER_LENGTH};
use crate::error::{Error, Result};

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    /// Read the header at the start of `data` without consuming anything.
    pub fn peek(data: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(data).ok().map(|(header, _)| header)
    }
}

/// True iff `data` starts with a complete header and its complete payload.
pub fn has_full_packet(data: &[u8]) -> bool {
    match PacketHeader::peek(data) {
        Some(header) => data.len() >= PACKET_HEADER_LENGTH + header.length(),
        None => false,
    }
}

/// Consume a 4-byte header. Nothing is consumed when fewer than 4 bytes are available.
pub fn read_header(cursor: &mut Cursor<'_>) -> Option<PacketHeader> {
    cursor
        .take(PACKET_HEADER_LENGTH)
        .and_then(PacketHeader::peek)
        .copied()
}

#[inline]
pub fn next_sequence_id(current: u8) -> u8 {
    current.wrapping_add(1)
}

/// Connection-wide packet sequence counter.
///
/// Holds the sequence id the next packet (inbound or outbound) must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence {
    next: u8,
}

impl Sequence {
    pub fn new(next: u8) -> Self {
        Self { next }
    }

    pub fn expected(&self) -> u8 {
        self.next
    }

    /// Verify an inbound id and return the counter advanced past it, leaving `self` untouched.
    pub fn check(self, actual: u8) -> Result<Self> {
        if actual != self.next {
            return Err(Error::SequenceMismatch {
                expected: self.next,
                actual,
            });
        }
        Ok(Self::new(next_sequence_id(actual)))
    }

    /// Verify an inbound id and commit it.
    pub fn advance(&mut self, actual: u8) -> Result<()> {
        *self = self.check(actual)?;
        Ok(())
    }

    /// Take the id for an outbound packet.
    pub fn stamp(&mut self) -> u8 {
        let id = self.next;
        self.next = next_sequence_id(id);
        id
    }
}

/// A payload reassembled from one or more physical packets.
#[derive(Debug)]
pub struct LogicalPacket<'a> {
    pub payload: Cow<'a, [u8]>,
    /// Counter value after the last packet of the group
    pub sequence: Sequence,
}

/// Read one logical payload, stitching packets while they are exactly
/// [`MAX_PAYLOAD_LENGTH`] long.
///
/// Returns `Ok(None)` with the cursor restored when the group is not fully buffered.
/// A sequence mismatch is reported as soon as the offending header is seen.
pub fn read_logical_packet<'a>(
    cursor: &mut Cursor<'a>,
    sequence: Sequence,
) -> Result<Option<LogicalPacket<'a>>> {
    let mark = cursor.mark();
    let mut sequence = sequence;
    let mut chunks: Vec<&'a [u8]> = Vec::with_capacity(1);

    loop {
        let Some(header) = read_header(cursor) else {
            cursor.rewind(mark);
            return Ok(None);
        };
        sequence = sequence.check(header.sequence_id)?;
        let length = header.length();
        let Some(chunk) = cursor.take(length) else {
            cursor.rewind(mark);
            return Ok(None);
        };
        chunks.push(chunk);
        if length < MAX_PAYLOAD_LENGTH {
            break;
        }
    }

    let payload = match chunks.as_slice() {
        [single] => Cow::Borrowed(*single),
        many => Cow::Owned(many.concat()),
    };
    Ok(Some(LogicalPacket { payload, sequence }))
}

/// Outcome of looking ahead at a multi-packet payload without consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadProbe {
    /// The terminating packet is visible and the total stays within the limit
    Fits { total: usize },
    /// The declared lengths seen so far already exceed the limit
    Exceeds,
    /// Not enough bytes buffered to decide
    Undecided,
}

/// Walk packet headers from the start of `data` summing payload lengths.
pub fn probe_payload_size(data: &[u8], limit: usize) -> PayloadProbe {
    let mut offset = 0;
    let mut total = 0usize;
    loop {
        let Some(header) = data.get(offset..).and_then(PacketHeader::peek) else {
            return PayloadProbe::Undecided;
        };
        let length = header.length();
        total = total.saturating_add(length);
        if total > limit {
            return PayloadProbe::Exceeds;
        }
        if length < MAX_PAYLOAD_LENGTH {
            return PayloadProbe::Fits { total };
        }
        offset += PACKET_HEADER_LENGTH + length;
    }
}

/// Frame `payload` into packets, appending headers and chunks to `out`.
///
/// A payload that is a nonzero multiple of the maximum gets a trailing empty packet.
pub fn write_packets(out: &mut Vec<u8>, payload: &[u8], sequence: &mut Sequence) {
    if payload.is_empty() {
        write_packet_header(out, sequence.stamp(), 0);
        return;
    }
    for chunk in payload.chunks(MAX_PAYLOAD_LENGTH) {
        write_packet_header(out, sequence.stamp(), chunk.len());
        out.extend_from_slice(chunk);
    }
    if payload.len() % MAX_PAYLOAD_LENGTH == 0 {
        write_packet_header(out, sequence.stamp(), 0);
    }
}

#[inline]
pub fn write_packet_header(out: &mut Vec<u8>, sequence_id: u8, payload_length: usize) {
    out.extend_from_slice(PacketHeader::encode(payload_length, sequence_id).as_bytes());
}

/// Result of pulling payload bytes that may span several packets.
#[derive(Debug, PartialEq, Eq)]
pub enum Pull<'a> {
    /// Contiguous bytes of the current packet
    Chunk(&'a [u8]),
    /// The buffer ran out before the payload ended
    NeedMore,
    /// The terminating packet has been fully consumed
    End,
}

/// Streaming position inside a logical payload whose packets arrive over time.
///
/// Unlike [`read_logical_packet`] this commits every header it reads, so the owner must
/// persist it across calls.
#[derive(Debug, Clone)]
pub struct PayloadFrames {
    remaining_in_packet: usize,
    continues: bool,
    packets: usize,
}

impl PayloadFrames {
    /// Begin after the first packet's header was consumed.
    pub fn new(first_packet_length: usize) -> Self {
        Self {
            remaining_in_packet: first_packet_length,
            continues: first_packet_length == MAX_PAYLOAD_LENGTH,
            packets: 1,
        }
    }

    /// The current packet's payload is exhausted.
    pub fn segment_ended(&self) -> bool {
        self.remaining_in_packet == 0
    }

    pub fn packets(&self) -> usize {
        self.packets
    }

    /// Expose the next run of payload bytes without consuming them.
    ///
    /// Crossing into the next packet consumes and verifies its header.
    pub fn peek<'a>(&mut self, cursor: &mut Cursor<'a>, sequence: &mut Sequence) -> Result<Pull<'a>> {
        loop {
            if self.remaining_in_packet > 0 {
                let available = self.remaining_in_packet.min(cursor.remaining_len());
                if available == 0 {
                    return Ok(Pull::NeedMore);
                }
                return Ok(Pull::Chunk(&cursor.remaining()[..available]));
            }
            if !self.continues {
                return Ok(Pull::End);
            }
            let Some(header) = read_header(cursor) else {
                return Ok(Pull::NeedMore);
            };
            sequence.advance(header.sequence_id)?;
            let length = header.length();
            self.remaining_in_packet = length;
            self.continues = length == MAX_PAYLOAD_LENGTH;
            self.packets += 1;
        }
    }

    /// Consume `n` bytes previously exposed by [`PayloadFrames::peek`].
    pub fn consume(&mut self, cursor: &mut Cursor<'_>, n: usize) {
        let taken = cursor.take_up_to(n.min(self.remaining_in_packet));
        self.remaining_in_packet -= taken.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_count(len: usize) -> usize {
        if len == 0 {
            return 1;
        }
        let full = len.div_ceil(MAX_PAYLOAD_LENGTH);
        if len % MAX_PAYLOAD_LENGTH == 0 {
            full + 1
        } else {
            full
        }
    }

    fn round_trip(len: usize) {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        let mut out_seq = Sequence::new(3);
        write_packets(&mut wire, &payload, &mut out_seq);

        let mut headers = 0;
        let mut probe = Cursor::new(&wire);
        while let Some(header) = read_header(&mut probe) {
            headers += 1;
            probe.take(header.length()).unwrap();
        }
        assert_eq!(headers, packet_count(len));

        let mut cursor = Cursor::new(&wire);
        let packet = read_logical_packet(&mut cursor, Sequence::new(3))
            .unwrap()
            .unwrap();
        assert!(packet.payload.as_ref() == payload.as_slice());
        assert_eq!(packet.sequence, out_seq);
        assert_eq!(cursor.remaining_len(), 0);
    }

    #[test]
    fn test_round_trip_small() {
        round_trip(0);
        round_trip(1);
        round_trip(1000);
    }

    #[test]
    fn test_round_trip_at_max_boundary() {
        round_trip(MAX_PAYLOAD_LENGTH - 1);
        round_trip(MAX_PAYLOAD_LENGTH);
        round_trip(MAX_PAYLOAD_LENGTH + 1);
        round_trip(2 * MAX_PAYLOAD_LENGTH);
    }

    #[test]
    fn test_has_full_packet() {
        let mut wire = Vec::new();
        write_packets(&mut wire, b"abc", &mut Sequence::default());
        assert!(has_full_packet(&wire));
        assert!(!has_full_packet(&wire[..6]));
        assert!(!has_full_packet(&wire[..3]));
    }

    #[test]
    fn test_sequence_rollover() {
        let mut seq = Sequence::new(255);
        seq.advance(255).unwrap();
        assert_eq!(seq.expected(), 0);
        assert_eq!(seq.stamp(), 0);
        assert_eq!(seq.expected(), 1);
    }

    #[test]
    fn test_sequence_mismatch_is_fatal() {
        let mut wire = Vec::new();
        write_packets(&mut wire, b"abc", &mut Sequence::new(5));
        let mut cursor = Cursor::new(&wire);
        let err = read_logical_packet(&mut cursor, Sequence::new(4)).unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceMismatch {
                expected: 4,
                actual: 5
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_partial_logical_packet_restores_cursor() {
        let payload = vec![7u8; MAX_PAYLOAD_LENGTH + 10];
        let mut wire = Vec::new();
        write_packets(&mut wire, &payload, &mut Sequence::default());

        let truncated = &wire[..wire.len() - 1];
        let mut cursor = Cursor::new(truncated);
        assert!(
            read_logical_packet(&mut cursor, Sequence::default())
                .unwrap()
                .is_none()
        );
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_probe_payload_size() {
        let payload = vec![1u8; MAX_PAYLOAD_LENGTH + 10];
        let mut wire = Vec::new();
        write_packets(&mut wire, &payload, &mut Sequence::default());

        assert_eq!(
            probe_payload_size(&wire, usize::MAX),
            PayloadProbe::Fits {
                total: MAX_PAYLOAD_LENGTH + 10
            }
        );
        assert_eq!(
            probe_payload_size(&wire, MAX_PAYLOAD_LENGTH + 9),
            PayloadProbe::Exceeds
        );
        // the second header is not visible yet
        assert_eq!(
            probe_payload_size(&wire[..100], usize::MAX),
            PayloadProbe::Undecided
        );
        // but an exceeded limit is known from the first header alone
        assert_eq!(
            probe_payload_size(&wire[..100], 10),
            PayloadProbe::Exceeds
        );
    }

    #[test]
    fn test_payload_frames_across_packets() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD_LENGTH + 5).map(|i| i as u8).collect();
        let mut wire = Vec::new();
        write_packets(&mut wire, &payload, &mut Sequence::default());

        let mut seq = Sequence::default();
        let mut cursor = Cursor::new(&wire);
        let header = read_header(&mut cursor).unwrap();
        seq.advance(header.sequence_id).unwrap();
        let mut frames = PayloadFrames::new(header.length());

        let mut collected = Vec::new();
        loop {
            match frames.peek(&mut cursor, &mut seq).unwrap() {
                Pull::Chunk(chunk) => {
                    let n = chunk.len().min(1 << 20);
                    collected.extend_from_slice(&chunk[..n]);
                    frames.consume(&mut cursor, n);
                }
                Pull::End => break,
                Pull::NeedMore => panic!("everything is buffered"),
            }
        }
        assert!(collected == payload);
        assert_eq!(frames.packets(), 2);
        assert_eq!(seq.expected(), 2);
    }
}
