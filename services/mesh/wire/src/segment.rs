//! Segmentation and reassembly of upper transport PDUs.
//!
//! Messages larger than a single lower transport PDU are split into at most 32
//! segments. Each segment carries a 3-octet header after the SEG/AKF/AID octet:
//!
//! ```text
//! | SZMIC (1) | SeqZero (13) | SegO (5) | SegN (5) |
//! ```

use crate::error::{ensure_len, WireError};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Maximum number of segments per message
pub const MAX_SEGMENTS: usize = 32;

/// Segment payload size for segmented access messages
pub const ACCESS_SEGMENT_SIZE: usize = 12;

/// SeqZero is the low 13 bits of the first segment's sequence number
pub const SEQ_ZERO_MASK: u16 = 0x1FFF;

/// Default time allowed for all segments of a message to arrive
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);

/// One segment of a segmented message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Low 13 bits of the SeqAuth
    pub seq_zero: u16,
    /// Zero-based segment offset
    pub seg_o: u8,
    /// Offset of the last segment
    pub seg_n: u8,
    /// 64-bit TransMIC
    pub szmic: bool,
    /// Segment payload
    pub payload: Bytes,
}

impl Segment {
    /// Segment header size in octets (excluding the SEG/AKF/AID octet)
    pub const HEADER_SIZE: usize = 3;

    /// Whether this is the final segment
    pub fn is_last(&self) -> bool {
        self.seg_o == self.seg_n
    }

    /// Write the 3-octet segment header
    pub fn encode_header<B: BufMut>(&self, buf: &mut B) {
        let seq_zero = self.seq_zero & SEQ_ZERO_MASK;
        buf.put_u8(((self.szmic as u8) << 7) | ((seq_zero >> 6) as u8 & 0x7F));
        buf.put_u8((((seq_zero & 0x3F) as u8) << 2) | ((self.seg_o >> 3) & 0x03));
        buf.put_u8(((self.seg_o & 0x07) << 5) | (self.seg_n & 0x1F));
    }

    /// Encode header and payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());
        self.encode_header(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode header and payload
    pub fn decode(buf: &Bytes) -> Result<Self, WireError> {
        ensure_len(buf, Self::HEADER_SIZE + 1)?;
        let szmic = buf[0] & 0x80 != 0;
        let seq_zero = (((buf[0] & 0x7F) as u16) << 6) | ((buf[1] >> 2) as u16);
        let seg_o = ((buf[1] & 0x03) << 3) | (buf[2] >> 5);
        let seg_n = buf[2] & 0x1F;

        if seg_o > seg_n {
            return Err(WireError::Malformed("segment offset beyond last segment"));
        }

        Ok(Self {
            seq_zero,
            seg_o,
            seg_n,
            szmic,
            payload: buf.slice(Self::HEADER_SIZE..),
        })
    }
}

/// Split `pdu` into ordered segments of at most `max_segment_size` octets.
///
/// The result only depends on the inputs, so a sender can regenerate the same
/// segments for retransmission.
pub fn segment(
    pdu: &Bytes,
    max_segment_size: usize,
    seq_zero: u16,
) -> Result<Vec<Segment>, WireError> {
    if max_segment_size == 0 {
        return Err(WireError::Malformed("segment size must be non-zero"));
    }
    if pdu.is_empty() {
        return Err(WireError::Malformed("cannot segment an empty pdu"));
    }

    let total = (pdu.len() + max_segment_size - 1) / max_segment_size;
    if total > MAX_SEGMENTS {
        return Err(WireError::TooManySegments(total));
    }

    let seg_n = (total - 1) as u8;
    let mut segments = Vec::with_capacity(total);
    let mut offset = 0;

    for seg_o in 0..total {
        let end = std::cmp::min(offset + max_segment_size, pdu.len());
        segments.push(Segment {
            seq_zero: seq_zero & SEQ_ZERO_MASK,
            seg_o: seg_o as u8,
            seg_n,
            szmic: false,
            payload: pdu.slice(offset..end),
        });
        offset = end;
    }

    Ok(segments)
}

/// Reassemble a complete set of segments delivered in any order
pub fn reassemble<I>(src: u16, segments: I) -> Result<Bytes, WireError>
where
    I: IntoIterator<Item = Segment>,
{
    let mut segments = segments.into_iter();
    let first = segments
        .next()
        .ok_or(WireError::Malformed("no segments to reassemble"))?;

    let mut message = PendingMessage::new(&first, Instant::now());
    let seq_zero = first.seq_zero;
    message.place(first);

    for segment in segments {
        if segment.seq_zero != seq_zero || segment.seg_n != message.seg_n {
            return Err(WireError::Malformed("segments belong to different messages"));
        }
        message.place(segment);
    }

    if !message.is_complete() {
        return Err(WireError::IncompleteReassembly { src, seq_zero });
    }
    Ok(message.into_payload())
}

/// A fully reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    /// Source address
    pub src: u16,
    /// SeqZero shared by all segments
    pub seq_zero: u16,
    /// 64-bit TransMIC
    pub szmic: bool,
    /// Upper transport PDU
    pub payload: Bytes,
}

/// Segments collected so far for one message
#[derive(Debug)]
struct PendingMessage {
    seg_n: u8,
    szmic: bool,
    slots: Vec<Option<Bytes>>,
    received: usize,
    started: Instant,
}

impl PendingMessage {
    fn new(first: &Segment, now: Instant) -> Self {
        Self {
            seg_n: first.seg_n,
            szmic: first.szmic,
            slots: vec![None; first.seg_n as usize + 1],
            received: 0,
            started: now,
        }
    }

    /// Place a segment by offset. Returns false for duplicates.
    fn place(&mut self, segment: Segment) -> bool {
        match self.slots.get_mut(segment.seg_o as usize) {
            Some(slot @ None) => {
                *slot = Some(segment.payload);
                self.received += 1;
                true
            }
            _ => false,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    fn into_payload(self) -> Bytes {
        let mut buf = BytesMut::new();
        for chunk in self.slots.into_iter().flatten() {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

/// Reassembly state of one `(src, SeqZero)` key
#[derive(Debug)]
enum Slot {
    Pending(PendingMessage),
    /// Completed at the given instant; late duplicates are dropped until it expires
    Completed(Instant),
}

/// Reassembler for collecting segments into complete messages.
///
/// State is keyed by `(source address, SeqZero)` and can be fed concurrently.
/// Completion is recorded under the same entry lock that places the final
/// segment, so a message is delivered at most once.
#[derive(Debug)]
pub struct Reassembler {
    slots: DashMap<(u16, u16), Slot>,
    timeout: Duration,
}

impl Reassembler {
    /// Create a reassembler with the given reassembly timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            timeout,
        }
    }

    /// Configured reassembly timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of messages still waiting for segments
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Pending(_)))
            .count()
    }

    /// Number of keys tracked, pending or recently completed
    pub fn tracked_count(&self) -> usize {
        self.slots.len()
    }

    /// Add a segment received from `src`
    pub fn add_segment(
        &self,
        src: u16,
        segment: Segment,
    ) -> Result<Option<Reassembled>, WireError> {
        self.add_segment_at(src, segment, Instant::now())
    }

    /// Add a segment with an explicit arrival time.
    ///
    /// Returns `Ok(None)` while segments are missing and for duplicates,
    /// `Ok(Some(_))` once the message is complete, and
    /// [`WireError::IncompleteReassembly`] if the message timed out.
    pub fn add_segment_at(
        &self,
        src: u16,
        segment: Segment,
        now: Instant,
    ) -> Result<Option<Reassembled>, WireError> {
        if segment.seg_o > segment.seg_n {
            return Err(WireError::Malformed("segment offset beyond last segment"));
        }

        let seq_zero = segment.seq_zero & SEQ_ZERO_MASK;
        let key = (src, seq_zero);

        let message = match self.slots.entry(key) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Slot::Completed(done_at) => {
                    if now.saturating_duration_since(*done_at) <= self.timeout {
                        trace!(
                            "Dropping late segment {} for completed message src=0x{:04X} seq_zero={}",
                            segment.seg_o,
                            src,
                            seq_zero
                        );
                        return Ok(None);
                    }
                    // Marker expired: the key is reused by a new message
                    let mut message = PendingMessage::new(&segment, now);
                    message.place(segment);
                    if !message.is_complete() {
                        occupied.insert(Slot::Pending(message));
                        return Ok(None);
                    }
                    occupied.insert(Slot::Completed(now));
                    message
                }
                Slot::Pending(pending) => {
                    if now.saturating_duration_since(pending.started) > self.timeout {
                        occupied.remove();
                        warn!(
                            "Reassembly timed out src=0x{:04X} seq_zero={}",
                            src, seq_zero
                        );
                        return Err(WireError::IncompleteReassembly { src, seq_zero });
                    }
                    if pending.seg_n != segment.seg_n {
                        return Err(WireError::Malformed("inconsistent SegN within message"));
                    }
                    if !pending.place(segment) {
                        trace!("Duplicate segment src=0x{:04X} seq_zero={}", src, seq_zero);
                        return Ok(None);
                    }
                    if !pending.is_complete() {
                        return Ok(None);
                    }
                    match std::mem::replace(occupied.get_mut(), Slot::Completed(now)) {
                        Slot::Pending(message) => message,
                        Slot::Completed(_) => return Ok(None),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                let mut message = PendingMessage::new(&segment, now);
                message.place(segment);
                if !message.is_complete() {
                    vacant.insert(Slot::Pending(message));
                    return Ok(None);
                }
                vacant.insert(Slot::Completed(now));
                message
            }
        };

        debug!(
            "Reassembled {} segments src=0x{:04X} seq_zero={}",
            message.slots.len(),
            src,
            seq_zero
        );

        Ok(Some(Reassembled {
            src,
            seq_zero,
            szmic: message.szmic,
            payload: message.into_payload(),
        }))
    }

    /// Drop messages whose timer expired, reporting each as incomplete.
    ///
    /// Expired completion markers are dropped silently.
    pub fn sweep_expired(&self, now: Instant) -> Vec<WireError> {
        let mut expired = Vec::new();
        let timeout = self.timeout;

        self.slots.retain(|&(src, seq_zero), slot| match slot {
            Slot::Pending(message) => {
                if now.saturating_duration_since(message.started) > timeout {
                    expired.push(WireError::IncompleteReassembly { src, seq_zero });
                    false
                } else {
                    true
                }
            }
            Slot::Completed(done_at) => now.saturating_duration_since(*done_at) <= timeout,
        });

        if !expired.is_empty() {
            warn!("Reassembly sweep dropped {} incomplete messages", expired.len());
        }
        expired
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TIMEOUT)
    }
}
