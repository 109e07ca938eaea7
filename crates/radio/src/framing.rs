//! Wire format of the six DRAND messages.
//!
//! Every frame starts with a one-byte kind tag and a one-byte round number:
//!
//! ```text
//! REQUEST          kind | round
//! GRANT            kind | round | count | count x (addr_hi | addr_lo | timeslot)
//! REJECT           kind | round
//! FAIL             kind | round
//! RELEASE          kind | round | timeslot
//! TWO_HOP_RELEASE  kind | round | timeslot | addr_hi | addr_lo
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use drand_tdma_core::{LinkAddr, Round, SlotIndex};
use log::warn;
use thiserror::Error;

/// Largest frame a node emits.
pub const MAX_FRAME_LEN: usize = 100;

const HEADER_LEN: usize = 2;
const GRANT_HEADER_LEN: usize = HEADER_LEN + 1;
const GRANT_ENTRY_LEN: usize = 3;

/// Occupancy entries that fit into one GRANT.
pub const MAX_GRANT_ENTRIES: usize = (MAX_FRAME_LEN - GRANT_HEADER_LEN) / GRANT_ENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Request = 0,
    Grant = 1,
    Reject = 2,
    Fail = 3,
    Release = 4,
    TwoHopRelease = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageKind::Request,
            1 => MessageKind::Grant,
            2 => MessageKind::Reject,
            3 => MessageKind::Fail,
            4 => MessageKind::Release,
            5 => MessageKind::TwoHopRelease,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame shorter than the {HEADER_LEN}-byte header ({0} bytes)")]
    Truncated(usize),

    #[error("Unknown message kind {0}")]
    UnknownKind(u8),

    #[error("{kind:?} frame must be {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },

    #[error("GRANT declares {declared} entries but only {available} bytes follow")]
    CountExceedsBuffer { declared: usize, available: usize },
}

/// One `(address, timeslot)` pair of a GRANT occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyEntry {
    pub addr: LinkAddr,
    pub timeslot: SlotIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrandMessage {
    Request {
        round: Round,
    },
    Grant {
        round: Round,
        occupancy: Vec<OccupancyEntry>,
    },
    Reject {
        round: Round,
    },
    Fail {
        round: Round,
    },
    Release {
        round: Round,
        timeslot: SlotIndex,
    },
    TwoHopRelease {
        round: Round,
        timeslot: SlotIndex,
        addr: LinkAddr,
    },
}

impl DrandMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            DrandMessage::Request { .. } => MessageKind::Request,
            DrandMessage::Grant { .. } => MessageKind::Grant,
            DrandMessage::Reject { .. } => MessageKind::Reject,
            DrandMessage::Fail { .. } => MessageKind::Fail,
            DrandMessage::Release { .. } => MessageKind::Release,
            DrandMessage::TwoHopRelease { .. } => MessageKind::TwoHopRelease,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            DrandMessage::Request { round }
            | DrandMessage::Grant { round, .. }
            | DrandMessage::Reject { round }
            | DrandMessage::Fail { round }
            | DrandMessage::Release { round, .. }
            | DrandMessage::TwoHopRelease { round, .. } => *round,
        }
    }

    /// Serializes the message. GRANT snapshots beyond [`MAX_GRANT_ENTRIES`] are cut off.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        buf.put_u8(self.kind() as u8);
        buf.put_u8(self.round());

        match self {
            DrandMessage::Request { .. } | DrandMessage::Reject { .. } | DrandMessage::Fail { .. } => {}
            DrandMessage::Grant { occupancy, .. } => {
                if occupancy.len() > MAX_GRANT_ENTRIES {
                    warn!(
                        "GRANT snapshot of {} entries truncated to {}",
                        occupancy.len(),
                        MAX_GRANT_ENTRIES
                    );
                }
                let entries = &occupancy[..occupancy.len().min(MAX_GRANT_ENTRIES)];
                buf.put_u8(entries.len() as u8);
                for entry in entries {
                    buf.put_u8(entry.addr.hi());
                    buf.put_u8(entry.addr.lo());
                    buf.put_u8(entry.timeslot);
                }
            }
            DrandMessage::Release { timeslot, .. } => {
                buf.put_u8(*timeslot);
            }
            DrandMessage::TwoHopRelease { timeslot, addr, .. } => {
                buf.put_u8(*timeslot);
                buf.put_u8(addr.hi());
                buf.put_u8(addr.lo());
            }
        }

        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::Truncated(frame.len()));
        }

        let mut buf = frame;
        let kind = MessageKind::try_from(buf.get_u8())?;
        let round = buf.get_u8();

        let expect = |expected: usize| -> Result<(), DecodeError> {
            if frame.len() != expected {
                return Err(DecodeError::LengthMismatch {
                    kind,
                    expected,
                    actual: frame.len(),
                });
            }
            Ok(())
        };

        let message = match kind {
            MessageKind::Request => {
                expect(HEADER_LEN)?;
                DrandMessage::Request { round }
            }
            MessageKind::Reject => {
                expect(HEADER_LEN)?;
                DrandMessage::Reject { round }
            }
            MessageKind::Fail => {
                expect(HEADER_LEN)?;
                DrandMessage::Fail { round }
            }
            MessageKind::Release => {
                expect(HEADER_LEN + 1)?;
                DrandMessage::Release {
                    round,
                    timeslot: buf.get_u8(),
                }
            }
            MessageKind::TwoHopRelease => {
                expect(HEADER_LEN + 3)?;
                let timeslot = buf.get_u8();
                let hi = buf.get_u8();
                let lo = buf.get_u8();
                DrandMessage::TwoHopRelease {
                    round,
                    timeslot,
                    addr: LinkAddr::new(hi, lo),
                }
            }
            MessageKind::Grant => {
                if !buf.has_remaining() {
                    return Err(DecodeError::LengthMismatch {
                        kind,
                        expected: GRANT_HEADER_LEN,
                        actual: frame.len(),
                    });
                }
                let declared = buf.get_u8() as usize;
                if declared * GRANT_ENTRY_LEN > buf.remaining() {
                    return Err(DecodeError::CountExceedsBuffer {
                        declared,
                        available: buf.remaining(),
                    });
                }
                expect(GRANT_HEADER_LEN + declared * GRANT_ENTRY_LEN)?;

                let occupancy = (0..declared)
                    .map(|_| {
                        let hi = buf.get_u8();
                        let lo = buf.get_u8();
                        OccupancyEntry {
                            addr: LinkAddr::new(hi, lo),
                            timeslot: buf.get_u8(),
                        }
                    })
                    .collect();
                DrandMessage::Grant { round, occupancy }
            }
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_layouts() {
        assert_eq!(&DrandMessage::Request { round: 7 }.encode()[..], &[0, 7]);
        assert_eq!(&DrandMessage::Fail { round: 3 }.encode()[..], &[3, 3]);
        assert_eq!(
            &DrandMessage::Release { round: 1, timeslot: 4 }.encode()[..],
            &[4, 1, 4]
        );
        assert_eq!(
            &DrandMessage::TwoHopRelease {
                round: 2,
                timeslot: 9,
                addr: LinkAddr::new(0xab, 0x01),
            }
            .encode()[..],
            &[5, 2, 9, 0xab, 0x01]
        );
    }

    #[test]
    fn test_grant_payload() {
        let grant = DrandMessage::Grant {
            round: 5,
            occupancy: vec![
                OccupancyEntry { addr: LinkAddr::new(1, 2), timeslot: 0 },
                OccupancyEntry { addr: LinkAddr::new(3, 4), timeslot: 6 },
            ],
        };
        let bytes = grant.encode();
        assert_eq!(&bytes[..], &[1, 5, 2, 1, 2, 0, 3, 4, 6]);
        assert_eq!(DrandMessage::decode(&bytes).unwrap(), grant);
    }

    #[test]
    fn test_grant_count_beyond_buffer_is_rejected() {
        // declares three entries, carries one
        let frame = [1u8, 5, 3, 1, 2, 0];
        assert_eq!(
            DrandMessage::decode(&frame).unwrap_err(),
            DecodeError::CountExceedsBuffer { declared: 3, available: 3 }
        );
    }

    #[test]
    fn test_grant_without_count_byte() {
        assert!(matches!(
            DrandMessage::decode(&[1, 5]).unwrap_err(),
            DecodeError::LengthMismatch { kind: MessageKind::Grant, .. }
        ));
    }

    #[test]
    fn test_grant_trailing_bytes_are_rejected() {
        let frame = [1u8, 5, 1, 1, 2, 0, 0xff];
        assert!(matches!(
            DrandMessage::decode(&frame).unwrap_err(),
            DecodeError::LengthMismatch { expected: 6, actual: 7, .. }
        ));
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(DrandMessage::decode(&[]).unwrap_err(), DecodeError::Truncated(0));
        assert_eq!(DrandMessage::decode(&[4]).unwrap_err(), DecodeError::Truncated(1));
        assert_eq!(DrandMessage::decode(&[9, 0]).unwrap_err(), DecodeError::UnknownKind(9));
        assert!(matches!(
            DrandMessage::decode(&[4, 1]).unwrap_err(),
            DecodeError::LengthMismatch { kind: MessageKind::Release, expected: 3, actual: 2 }
        ));
        assert!(matches!(
            DrandMessage::decode(&[5, 1, 2, 3]).unwrap_err(),
            DecodeError::LengthMismatch { kind: MessageKind::TwoHopRelease, .. }
        ));
    }

    #[test]
    fn test_oversized_grant_is_truncated() {
        let occupancy = (0..40u8)
            .map(|i| OccupancyEntry { addr: LinkAddr::new(0, i), timeslot: i })
            .collect();
        let bytes = DrandMessage::Grant { round: 1, occupancy }.encode();
        assert!(bytes.len() <= MAX_FRAME_LEN);
        match DrandMessage::decode(&bytes).unwrap() {
            DrandMessage::Grant { occupancy, .. } => assert_eq!(occupancy.len(), MAX_GRANT_ENTRIES),
            other => panic!("unexpected {:?}", other),
        }
    }
}
