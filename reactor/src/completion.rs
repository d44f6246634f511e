//! io_uring user_data encoding.
//!
//! Every SQE carries `[63:56] op tag | [55:32] connection slot | [31:0]
//! generation`. The generation is compared against the connection record on
//! completion so CQEs from a previous tenant of the slot are discarded.

use pool::SlotId;

/// Operation kind recorded in the user_data tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpTag {
    Accept = 1,
    Read = 2,
    Write = 3,
    Close = 4,
    EventFd = 5,
}

impl OpTag {
    fn from_u8(raw: u8) -> Option<OpTag> {
        match raw {
            1 => Some(OpTag::Accept),
            2 => Some(OpTag::Read),
            3 => Some(OpTag::Write),
            4 => Some(OpTag::Close),
            5 => Some(OpTag::EventFd),
            _ => None,
        }
    }
}

/// Packed user_data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(pub u64);

const CONN_BITS: u64 = 24;
const CONN_MASK: u64 = (1 << CONN_BITS) - 1;

impl UserData {
    pub fn encode(tag: OpTag, conn: SlotId, generation: u32) -> UserData {
        debug_assert!((conn.raw() as u64) <= CONN_MASK);
        UserData(
            (tag as u64) << 56 | ((conn.raw() as u64) & CONN_MASK) << 32 | generation as u64,
        )
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn tag(&self) -> Option<OpTag> {
        OpTag::from_u8((self.0 >> 56) as u8)
    }

    pub fn conn(&self) -> SlotId {
        SlotId::from_raw(((self.0 >> 32) & CONN_MASK) as u32)
    }

    pub fn generation(&self) -> u32 {
        self.0 as u32
    }
}
