//! Error types for ring operations

use core::fmt;

use dma_pool::DmaError;

use crate::ring::SlotState;

/// Result type for ring operations
pub type Result<T> = core::result::Result<T, RingError>;

/// Errors surfaced by ring setup, posting and register handshakes.
///
/// Per-descriptor problems (bad completions, allocation misses) are counted
/// in the statistics instead of being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Configuration rejected
    InvalidConfig(&'static str),

    /// Ring size outside the supported range
    InvalidRingSize(usize),

    /// No unused slot left; the reserved slot cannot be posted
    Full,

    /// Slot is not in the state the operation requires
    InvalidSlotState {
        /// Slot index
        index: u16,
        /// State found
        state: SlotState,
    },

    /// Descriptor field out of range for the hardware format
    InvalidDescriptor,

    /// Hardware did not acknowledge within the retry budget
    HandshakeTimeout {
        /// Register polled
        offset: u32,
    },

    /// No receive buffer could be posted at open
    OutOfBuffers,

    /// DMA pool failure
    Dma(DmaError),
}

impl From<DmaError> for RingError {
    fn from(err: DmaError) -> Self {
        RingError::Dma(err)
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(why) => write!(f, "Invalid ring configuration: {}", why),
            Self::InvalidRingSize(size) => write!(f, "Unsupported ring size {}", size),
            Self::Full => write!(f, "Descriptor ring full"),
            Self::InvalidSlotState { index, state } => {
                write!(f, "Slot {} in unexpected state {:?}", index, state)
            }
            Self::InvalidDescriptor => write!(f, "Descriptor field out of range"),
            Self::HandshakeTimeout { offset } => {
                write!(f, "Hardware handshake timed out on register {:#x}", offset)
            }
            Self::OutOfBuffers => write!(f, "No receive buffers could be posted"),
            Self::Dma(err) => write!(f, "DMA error: {}", err),
        }
    }
}
