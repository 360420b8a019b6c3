//! Doorbell word and packet header encoding.
//!
//! Both formats are fixed by the coprocessor firmware.  Field widths and bit positions
//! are wire constants, not tunables.
//!
//! Doorbell word layout:
//!
//! ```text
//!  63                32 31          16 15   12 11     8 7   6 5   4 3      0
//! +--------------------+--------------+-------+--------+---+---+----+--------+
//! |       length       |    offset    |       | context|   |ack|    |  type  |
//! +--------------------+--------------+-------+--------+---+---+----+--------+
//! ```
//!
//! For SET_SHMEM the device address occupies bits 63..16 and bits 7..4 carry a fixed
//! flag value.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::channel::Context;
use crate::{Error, Result};

/// Alignment of every packet pushed onto a call stack
pub const PACKET_ALIGNMENT: usize = 0x40;

const TYPE_MASK: u64 = 0xF;

const MSG_CONTEXT_SHIFT: u32 = 8;
const MSG_CONTEXT_MASK: u64 = 0xF;
const MSG_OFFSET_SHIFT: u32 = 16;
const MSG_OFFSET_MASK: u64 = 0xFFFF;
const MSG_LENGTH_SHIFT: u32 = 32;
const MSG_LENGTH_MASK: u64 = 0xFFFF_FFFF;
const MSG_ACK: u64 = 1 << 6;

const SHMEM_FLAG_SHIFT: u32 = 4;
const SHMEM_FLAG_MASK: u64 = 0xF;
const SHMEM_FLAG_VALUE: u64 = 4;
const SHMEM_DVA_SHIFT: u32 = 16;
const SHMEM_DVA_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Doorbell message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Host advertises the shared-memory region
    SetShmem = 0,
    /// Coprocessor finished initializing
    Initialized = 1,
    /// Remote procedure call or ack
    Msg = 2,
}

/// A decoded doorbell word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    SetShmem {
        dva: u64,
    },
    Initialized,
    Msg {
        /// Raw 4-bit context id.  Not every value names a [`Context`].
        context: u8,
        offset: u16,
        length: u32,
        ack: bool,
    },
    /// Type field holds a value this transport does not know
    Unknown(u64),
}

impl Message {
    /// An RPC message announcing a packet at `offset` within `context`'s window
    pub fn msg(context: Context, offset: u16, length: u32) -> Self {
        Message::Msg {
            context: context as u8,
            offset,
            length,
            ack: false,
        }
    }

    /// Ack of the most recent call received on `context`
    pub fn ack(context: Context) -> Self {
        Message::Msg {
            context: context as u8,
            offset: 0,
            length: 0,
            ack: true,
        }
    }

    pub fn encode(&self) -> u64 {
        match *self {
            Message::SetShmem { dva } => {
                (MessageType::SetShmem as u64)
                    | (SHMEM_FLAG_VALUE << SHMEM_FLAG_SHIFT)
                    | ((dva & SHMEM_DVA_MASK) << SHMEM_DVA_SHIFT)
            }
            Message::Initialized => MessageType::Initialized as u64,
            Message::Msg {
                context,
                offset,
                length,
                ack,
            } => {
                let mut word = (MessageType::Msg as u64)
                    | ((context as u64 & MSG_CONTEXT_MASK) << MSG_CONTEXT_SHIFT)
                    | ((offset as u64 & MSG_OFFSET_MASK) << MSG_OFFSET_SHIFT)
                    | ((length as u64 & MSG_LENGTH_MASK) << MSG_LENGTH_SHIFT);
                if ack {
                    word |= MSG_ACK;
                }
                word
            }
            Message::Unknown(word) => word,
        }
    }

    pub fn decode(word: u64) -> Self {
        match word & TYPE_MASK {
            0 => Message::SetShmem {
                dva: (word >> SHMEM_DVA_SHIFT) & SHMEM_DVA_MASK,
            },
            1 => Message::Initialized,
            2 => Message::Msg {
                context: ((word >> MSG_CONTEXT_SHIFT) & MSG_CONTEXT_MASK) as u8,
                offset: ((word >> MSG_OFFSET_SHIFT) & MSG_OFFSET_MASK) as u16,
                length: ((word >> MSG_LENGTH_SHIFT) & MSG_LENGTH_MASK) as u32,
                ack: word & MSG_ACK != 0,
            },
            _ => Message::Unknown(word),
        }
    }

    /// Whether a SET_SHMEM word carries the flag value the firmware expects
    pub fn shmem_flag_valid(word: u64) -> bool {
        (word >> SHMEM_FLAG_SHIFT) & SHMEM_FLAG_MASK == SHMEM_FLAG_VALUE
    }
}

/// Header at the start of every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Tag in wire order, i.e. byte reversed
    pub tag: [u8; 4],
    pub in_len: u32,
    pub out_len: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 12;

    /// Create a header from a tag in reading order, e.g. `*b"A401"`
    pub fn new(tag: [u8; 4], in_len: u32, out_len: u32) -> Self {
        Self {
            tag: reverse_tag(tag),
            in_len,
            out_len,
        }
    }

    /// The tag in reading order
    pub fn tag(&self) -> [u8; 4] {
        reverse_tag(self.tag)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.tag);
        buf[4..8].copy_from_slice(&self.in_len.to_le_bytes());
        buf[8..12].copy_from_slice(&self.out_len.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::Truncated);
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            tag: [buf[0], buf[1], buf[2], buf[3]],
            in_len: word(4),
            out_len: word(8),
        })
    }

    /// Unaligned length of the whole packet
    pub fn packet_len(&self) -> usize {
        Self::SIZE + self.in_len as usize + self.out_len as usize
    }
}

/// Round a packet length up to [`PACKET_ALIGNMENT`]
pub const fn align_packet(len: usize) -> usize {
    (len + PACKET_ALIGNMENT - 1) & !(PACKET_ALIGNMENT - 1)
}

fn reverse_tag(tag: [u8; 4]) -> [u8; 4] {
    [tag[3], tag[2], tag[1], tag[0]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_bit_positions() {
        let word = Message::Msg {
            context: 2,
            offset: 0x1234,
            length: 0xDEAD_BEEF,
            ack: false,
        }
        .encode();
        assert_eq!(word, 0xDEAD_BEEF_1234_0202);

        let ack = Message::ack(Context::Cb).encode();
        assert_eq!(ack, 0x0000_0000_0000_0042);
    }

    #[test]
    fn set_shmem_layout() {
        let word = Message::SetShmem { dva: 0x8_0000_0000 }.encode();
        assert_eq!(word & 0xF, 0);
        assert!(Message::shmem_flag_valid(word));
        assert_eq!(word >> 16, 0x8_0000_0000);
        assert_eq!(Message::decode(word), Message::SetShmem { dva: 0x8_0000_0000 });
    }

    #[test]
    fn unknown_type_preserved() {
        assert_eq!(Message::decode(0x5), Message::Unknown(0x5));
        assert_eq!(Message::decode(0x1), Message::Initialized);
    }

    #[test]
    fn header_tag_is_reversed_on_the_wire() {
        let hdr = PacketHeader::new(*b"A401", 0, 4);
        let bytes = hdr.encode();
        assert_eq!(&bytes[0..4], b"104A");
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());

        let back = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(back.tag(), *b"A401");
        assert_eq!(back.packet_len(), 16);
    }

    #[test]
    fn header_decode_rejects_short_buffer() {
        assert_eq!(PacketHeader::decode(&[0u8; 11]), Err(Error::Truncated));
    }

    #[test]
    fn alignment() {
        assert_eq!(align_packet(0), 0);
        assert_eq!(align_packet(1), 0x40);
        assert_eq!(align_packet(0x40), 0x40);
        assert_eq!(align_packet(0x41), 0x80);
    }
}
