//! Hardware descriptor format.
//!
//! A posted descriptor is three 32-bit words written to the ring's FIFO:
//!
//! ```text
//!   ctrl     [13:0]  buffer length
//!            [31:16] DescFlags
//!   addr_lo  bus address [31:0]
//!   addr_hi  bus address [63:32]   (writing this word commits the entry)
//! ```
//!
//! A completion is one status word popped from the done FIFO:
//!
//! ```text
//!   status   [13:0]  bytes written by the device
//!            [31:16] CompletionStatus
//! ```

use bitflags::bitflags;
use dma_pool::BusAddr;

use crate::error::{Result, RingError};

/// Largest length the 14-bit length field can carry.
pub const MAX_DESC_LEN: u16 = 0x3fff;

const LEN_MASK: u32 = MAX_DESC_LEN as u32;
const FLAGS_SHIFT: u32 = 16;

bitflags! {
    /// Control flags of a posted descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescFlags: u16 {
        /// First descriptor of a frame.
        const FIRST = 1 << 0;
        /// Last descriptor of a frame.
        const LAST = 1 << 1;
        /// Raise an interrupt when this descriptor completes.
        const IRQ = 1 << 2;
    }
}

bitflags! {
    /// Status flags of a completion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompletionStatus: u16 {
        /// Buffer holds the start of a frame.
        const FIRST = 1 << 0;
        /// Buffer holds the end of a frame.
        const LAST = 1 << 1;
        /// Frame check sequence mismatch.
        const CRC_ERR = 1 << 8;
        /// Alignment or length framing error.
        const FRAME_ERR = 1 << 9;
        /// Device FIFO overrun while receiving.
        const OVERRUN = 1 << 10;

        /// Any error bit.
        const ERRORS = Self::CRC_ERR.bits() | Self::FRAME_ERR.bits() | Self::OVERRUN.bits();
    }
}

/// Raw descriptor words in write order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawDescriptor {
    /// Length and flags.
    pub ctrl: u32,
    /// Bus address low word.
    pub addr_lo: u32,
    /// Bus address high word; commits the entry.
    pub addr_hi: u32,
}

/// One DMA transfer as posted to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    addr: BusAddr,
    len: u16,
    flags: DescFlags,
}

impl Descriptor {
    /// Build a descriptor; `len` must be non-zero and fit the length field.
    pub fn new(addr: BusAddr, len: usize, flags: DescFlags) -> Result<Self> {
        if len == 0 || len > MAX_DESC_LEN as usize {
            return Err(RingError::InvalidDescriptor);
        }
        Ok(Self {
            addr,
            len: len as u16,
            flags,
        })
    }

    /// Buffer bus address.
    #[inline]
    pub fn addr(&self) -> BusAddr {
        self.addr
    }

    /// Buffer length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; zero-length descriptors are rejected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Control flags.
    #[inline]
    pub fn flags(&self) -> DescFlags {
        self.flags
    }

    /// Encode into hardware words.
    pub fn encode(&self) -> RawDescriptor {
        RawDescriptor {
            ctrl: (self.len as u32 & LEN_MASK) | ((self.flags.bits() as u32) << FLAGS_SHIFT),
            addr_lo: self.addr.lo(),
            addr_hi: self.addr.hi(),
        }
    }

    /// Decode hardware words. Unknown flag bits are dropped.
    pub fn decode(raw: RawDescriptor) -> Self {
        Self {
            addr: BusAddr(((raw.addr_hi as u64) << 32) | raw.addr_lo as u64),
            len: (raw.ctrl & LEN_MASK) as u16,
            flags: DescFlags::from_bits_truncate((raw.ctrl >> FLAGS_SHIFT) as u16),
        }
    }
}

/// Device report for one finished descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Bytes transferred.
    pub len: u16,
    /// Status flags.
    pub status: CompletionStatus,
}

impl Completion {
    /// Successful completion covering a whole frame.
    pub fn frame(len: u16) -> Self {
        Self {
            len: len & MAX_DESC_LEN,
            status: CompletionStatus::FIRST | CompletionStatus::LAST,
        }
    }

    /// Decode a done-FIFO status word.
    pub fn from_word(word: u32) -> Self {
        Self {
            len: (word & LEN_MASK) as u16,
            status: CompletionStatus::from_bits_truncate((word >> FLAGS_SHIFT) as u16),
        }
    }

    /// Encode into a done-FIFO status word.
    pub fn to_word(&self) -> u32 {
        (self.len as u32 & LEN_MASK) | ((self.status.bits() as u32) << FLAGS_SHIFT)
    }

    /// Whether the device flagged the transfer as bad.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.status.intersects(CompletionStatus::ERRORS)
    }
}
