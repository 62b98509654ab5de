//! Descriptor port: the capability set a ring needs from its hardware.
//!
//! # Register block (per ring)
//! ```text
//!   +0x00  DESC_CTRL     w   length / flags of the next entry
//!   +0x04  DESC_ADDR_LO  w   bus address [31:0]
//!   +0x08  DESC_ADDR_HI  w   bus address [63:32], commits the entry
//!   +0x0c  DONE_COUNT    r   completions waiting in the done FIFO
//!   +0x10  DONE_STATUS   r   pops one completion word
//!   +0x14  CTRL          rw  bit 0: ring enable
//!   +0x18  STATUS        r   bit 0: ready, bit 1: idle
//! ```
//! The interrupt mask register is global and shared by every ring.

use core::sync::atomic::{fence, Ordering};

use log::trace;

use super::mmio::{wait_for_bits, Mmio};
use crate::desc::{Completion, Descriptor};
use crate::error::Result;

/// Global interrupt mask register (bit set = masked).
pub const IRQ_MASK: u32 = 0x0010;

/// Receive ring register block base.
pub const RX_RING_BASE: u32 = 0x0100;

/// Transmit ring register block base.
pub const TX_RING_BASE: u32 = 0x0200;

/// `CTRL`: ring enable.
pub const RING_CTRL_ENABLE: u32 = 1 << 0;

/// `STATUS`: engine accepted the enable.
pub const RING_STATUS_READY: u32 = 1 << 0;

/// `STATUS`: engine stopped after disable.
pub const RING_STATUS_IDLE: u32 = 1 << 1;

/// Hardware side of one descriptor ring.
///
/// Implemented by register-backed ports, simulators and test doubles.
pub trait DescriptorPort {
    /// Hand a descriptor for slot `index` to the device.
    ///
    /// The entry must become visible atomically: the device never observes
    /// a half-written descriptor.
    fn push(&mut self, index: u16, desc: &Descriptor);

    /// Completions the device has reported and not yet handed over.
    fn completions(&mut self) -> u32;

    /// Take the oldest completion. Only called while `completions() > 0`.
    fn pop_completion(&mut self) -> Completion;

    /// Unmask (`true`) or mask the ring's completion interrupt.
    fn set_interrupt(&mut self, armed: bool);

    /// Start the DMA engine.
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop the DMA engine.
    fn disable(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: DescriptorPort + ?Sized> DescriptorPort for &mut T {
    fn push(&mut self, index: u16, desc: &Descriptor) {
        (**self).push(index, desc)
    }

    fn completions(&mut self) -> u32 {
        (**self).completions()
    }

    fn pop_completion(&mut self) -> Completion {
        (**self).pop_completion()
    }

    fn set_interrupt(&mut self, armed: bool) {
        (**self).set_interrupt(armed)
    }

    fn enable(&mut self) -> Result<()> {
        (**self).enable()
    }

    fn disable(&mut self) -> Result<()> {
        (**self).disable()
    }
}

/// Register offsets of one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRegs {
    /// Descriptor length/flags word.
    pub desc_ctrl: u32,
    /// Descriptor address low word.
    pub desc_addr_lo: u32,
    /// Descriptor address high word (commit).
    pub desc_addr_hi: u32,
    /// Done FIFO depth.
    pub done_count: u32,
    /// Done FIFO pop.
    pub done_status: u32,
    /// Ring control.
    pub ctrl: u32,
    /// Ring status.
    pub status: u32,
    /// Interrupt mask register.
    pub irq_mask: u32,
    /// This ring's bit in the interrupt mask.
    pub irq_bit: u32,
}

impl RingRegs {
    /// Receive ring of the CPU MAC.
    pub const RX: RingRegs = RingRegs::at(RX_RING_BASE, 1 << 0);

    /// Transmit ring of the CPU MAC.
    pub const TX: RingRegs = RingRegs::at(TX_RING_BASE, 1 << 1);

    /// Register block at `base` using interrupt bit `irq_bit`.
    pub const fn at(base: u32, irq_bit: u32) -> Self {
        Self {
            desc_ctrl: base,
            desc_addr_lo: base + 0x04,
            desc_addr_hi: base + 0x08,
            done_count: base + 0x0c,
            done_status: base + 0x10,
            ctrl: base + 0x14,
            status: base + 0x18,
            irq_mask: IRQ_MASK,
            irq_bit,
        }
    }
}

/// Register-backed descriptor port.
pub struct MmioPort<M: Mmio> {
    mmio: M,
    regs: RingRegs,
    retries: u32,
}

impl<M: Mmio> MmioPort<M> {
    /// Port over `mmio` with the given register block.
    ///
    /// `retries` bounds every enable/disable handshake.
    pub fn new(mmio: M, regs: RingRegs, retries: u32) -> Self {
        Self {
            mmio,
            regs,
            retries,
        }
    }

    /// Register block in use.
    pub fn regs(&self) -> &RingRegs {
        &self.regs
    }

    /// Underlying register window.
    pub fn mmio(&mut self) -> &mut M {
        &mut self.mmio
    }
}

impl<M: Mmio> DescriptorPort for MmioPort<M> {
    fn push(&mut self, index: u16, desc: &Descriptor) {
        let raw = desc.encode();
        trace!("ring {:#x}: push slot {} {:?}", self.regs.desc_ctrl, index, raw);

        self.mmio.write32(self.regs.desc_ctrl, raw.ctrl);
        self.mmio.write32(self.regs.desc_addr_lo, raw.addr_lo);
        // Low words must land before the committing high word.
        fence(Ordering::Release);
        self.mmio.write32(self.regs.desc_addr_hi, raw.addr_hi);
    }

    fn completions(&mut self) -> u32 {
        self.mmio.read32(self.regs.done_count)
    }

    fn pop_completion(&mut self) -> Completion {
        let word = self.mmio.read32(self.regs.done_status);
        // Status word must be read before the buffer contents.
        fence(Ordering::Acquire);
        Completion::from_word(word)
    }

    fn set_interrupt(&mut self, armed: bool) {
        if armed {
            self.mmio.modify32(self.regs.irq_mask, self.regs.irq_bit, 0);
        } else {
            self.mmio.modify32(self.regs.irq_mask, 0, self.regs.irq_bit);
        }
    }

    fn enable(&mut self) -> Result<()> {
        self.mmio.modify32(self.regs.ctrl, 0, RING_CTRL_ENABLE);
        wait_for_bits(
            &mut self.mmio,
            self.regs.status,
            RING_STATUS_READY,
            RING_STATUS_READY,
            self.retries,
        )?;
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        self.mmio.modify32(self.regs.ctrl, RING_CTRL_ENABLE, 0);
        wait_for_bits(
            &mut self.mmio,
            self.regs.status,
            RING_STATUS_IDLE,
            RING_STATUS_IDLE,
            self.retries,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{CompletionStatus, DescFlags};
    use crate::error::RingError;
    use crate::hw::SharedMmio;
    use dma_pool::BusAddr;
    use std::collections::HashMap;
    use std::vec::Vec;

    /// Register file that logs writes and acks enable/disable on request.
    #[derive(Default)]
    struct Regs {
        values: HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
        done: Vec<u32>,
        ack: bool,
    }

    impl Mmio for Regs {
        fn read32(&mut self, offset: u32) -> u32 {
            let rx = RingRegs::RX;
            if offset == rx.done_count {
                return self.done.len() as u32;
            }
            if offset == rx.done_status {
                return if self.done.is_empty() { 0 } else { self.done.remove(0) };
            }
            if offset == rx.status && self.ack {
                let ctrl = *self.values.get(&rx.ctrl).unwrap_or(&0);
                return if ctrl & RING_CTRL_ENABLE != 0 {
                    RING_STATUS_READY
                } else {
                    RING_STATUS_IDLE
                };
            }
            *self.values.get(&offset).unwrap_or(&0)
        }

        fn write32(&mut self, offset: u32, value: u32) {
            self.writes.push((offset, value));
            self.values.insert(offset, value);
        }
    }

    #[test]
    fn test_push_writes_high_word_last() {
        let mut port = MmioPort::new(Regs::default(), RingRegs::RX, 10);
        let desc = Descriptor::new(
            BusAddr(0x0000_0001_8000_0800),
            2048,
            DescFlags::FIRST | DescFlags::LAST,
        )
        .unwrap();
        port.push(3, &desc);

        let rx = RingRegs::RX;
        let writes = &port.mmio().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], (rx.desc_ctrl, 2048 | (0b11 << 16)));
        assert_eq!(writes[1], (rx.desc_addr_lo, 0x8000_0800));
        assert_eq!(writes[2], (rx.desc_addr_hi, 0x1));
    }

    #[test]
    fn test_completion_fifo() {
        let mut regs = Regs::default();
        let done = Completion {
            len: 128,
            status: CompletionStatus::FIRST | CompletionStatus::LAST,
        };
        regs.done.push(done.to_word());

        let mut port = MmioPort::new(regs, RingRegs::RX, 10);
        assert_eq!(port.completions(), 1);
        assert_eq!(port.pop_completion(), done);
        assert_eq!(port.completions(), 0);
    }

    #[test]
    fn test_enable_handshake() {
        let regs = Regs {
            ack: true,
            ..Default::default()
        };
        let mut port = MmioPort::new(regs, RingRegs::RX, 10);
        assert!(port.enable().is_ok());
        assert!(port.disable().is_ok());
    }

    #[test]
    fn test_enable_times_out_without_ack() {
        let mut port = MmioPort::new(Regs::default(), RingRegs::RX, 10);
        assert_eq!(
            port.enable(),
            Err(RingError::HandshakeTimeout {
                offset: RingRegs::RX.status
            })
        );
    }

    #[test]
    fn test_interrupt_mask_shared_between_rings() {
        let shared = SharedMmio::new(Regs::default());
        let mut rx = MmioPort::new(shared.clone(), RingRegs::RX, 10);
        let mut tx = MmioPort::new(shared.clone(), RingRegs::TX, 10);

        rx.set_interrupt(false);
        tx.set_interrupt(false);
        assert_eq!(shared.with(|r| r.values[&IRQ_MASK]), 0b11);

        rx.set_interrupt(true);
        assert_eq!(shared.with(|r| r.values[&IRQ_MASK]), 0b10);
    }
}
