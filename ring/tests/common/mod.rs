//! Common test utilities and a simulated DMA device

#![allow(dead_code)]

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cpumac_ring::desc::{Completion, CompletionStatus, Descriptor};
use cpumac_ring::hw::DescriptorPort;
use cpumac_ring::{RingConfig, RingError};
use dma_pool::{BufferPool, BusAddr, Direction, DmaMapper, IdentityMapper};

/// Device-side state shared by every clone of a [`SimPort`]
#[derive(Debug, Default)]
pub struct SimState {
    /// Descriptors the device owns, oldest first
    pub posted: VecDeque<Descriptor>,
    /// Every push, in order
    pub pushes: Vec<(u16, Descriptor)>,
    /// Completions waiting to be popped
    pub done: VecDeque<Completion>,
    /// Bogus extra completions added to the reported count, consumed by
    /// pops on an empty FIFO
    pub extra_reported: u32,
    pub armed: bool,
    pub enabled: bool,
    pub fail_enable: bool,
    pub fail_disable: bool,
}

/// In-memory descriptor port.
///
/// Bus addresses are CPU addresses (tests use `IdentityMapper`), so the
/// simulated device writes received payloads straight into buffer memory.
#[derive(Debug, Clone, Default)]
pub struct SimPort {
    state: Arc<Mutex<SimState>>,
}

impl SimPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Descriptors currently owned by the device
    pub fn in_flight(&self) -> usize {
        self.state().posted.len()
    }

    pub fn armed(&self) -> bool {
        self.state().armed
    }

    pub fn enabled(&self) -> bool {
        self.state().enabled
    }

    /// Complete the oldest posted receive descriptor with `payload`.
    ///
    /// Returns false when the device owns no descriptor.
    pub fn complete_rx(&self, payload: &[u8], status: CompletionStatus) -> bool {
        let mut state = self.state();
        let desc = match state.posted.pop_front() {
            Some(desc) => desc,
            None => return false,
        };
        let len = payload.len().min(desc.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                desc.addr().as_u64() as usize as *mut u8,
                len,
            );
        }
        state.done.push_back(Completion {
            len: len as u16,
            status,
        });
        true
    }

    /// Receive one single-descriptor frame.
    pub fn receive(&self, payload: &[u8]) -> bool {
        self.complete_rx(payload, CompletionStatus::FIRST | CompletionStatus::LAST)
    }

    /// Queue `n` completions that match no posted descriptor.
    pub fn spurious(&self, n: usize, len: u16) {
        let mut state = self.state();
        for _ in 0..n {
            state.done.push_back(Completion::frame(len));
        }
    }

    /// Complete the oldest `n` transmit descriptors successfully.
    pub fn complete_tx(&self, n: usize) -> usize {
        let mut state = self.state();
        let mut completed = 0;
        while completed < n {
            let desc = match state.posted.pop_front() {
                Some(desc) => desc,
                None => break,
            };
            state.done.push_back(Completion::frame(desc.len() as u16));
            completed += 1;
        }
        completed
    }

    /// Complete the oldest transmit descriptor with an error.
    pub fn fail_tx(&self, status: CompletionStatus) -> bool {
        let mut state = self.state();
        match state.posted.pop_front() {
            Some(desc) => {
                state.done.push_back(Completion {
                    len: desc.len() as u16,
                    status: status | CompletionStatus::FIRST | CompletionStatus::LAST,
                });
                true
            }
            None => false,
        }
    }

    /// Bytes of the oldest posted transmit descriptor.
    pub fn peek_tx(&self) -> Option<Vec<u8>> {
        let state = self.state();
        state.posted.front().map(|desc| unsafe {
            std::slice::from_raw_parts(desc.addr().as_u64() as usize as *const u8, desc.len())
                .to_vec()
        })
    }
}

impl DescriptorPort for SimPort {
    fn push(&mut self, index: u16, desc: &Descriptor) {
        let mut state = self.state();
        state.posted.push_back(*desc);
        state.pushes.push((index, *desc));
    }

    fn completions(&mut self) -> u32 {
        let state = self.state();
        state.done.len() as u32 + state.extra_reported
    }

    fn pop_completion(&mut self) -> Completion {
        let mut state = self.state();
        match state.done.pop_front() {
            Some(completion) => completion,
            None => {
                state.extra_reported = state.extra_reported.saturating_sub(1);
                Completion::frame(0)
            }
        }
    }

    fn set_interrupt(&mut self, armed: bool) {
        self.state().armed = armed;
    }

    fn enable(&mut self) -> cpumac_ring::Result<()> {
        let mut state = self.state();
        if state.fail_enable {
            return Err(RingError::HandshakeTimeout { offset: 0x118 });
        }
        state.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> cpumac_ring::Result<()> {
        let mut state = self.state();
        if state.fail_disable {
            return Err(RingError::HandshakeTimeout { offset: 0x118 });
        }
        state.enabled = false;
        Ok(())
    }
}

/// Configuration with small rings and batch
pub fn small_config(ring_size: u16) -> RingConfig {
    RingConfig {
        rx_ring_size: ring_size,
        tx_ring_size: ring_size,
        refill_batch: 2,
        ..Default::default()
    }
}

/// Identity-mapped pool with `pages` pages
pub fn pool(pages: usize) -> BufferPool<IdentityMapper> {
    BufferPool::new(IdentityMapper, pages)
}

/// Deterministic test payload
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Identity mapper that counts live mappings
#[derive(Debug, Default)]
pub struct CountingMapper {
    pub maps: AtomicUsize,
    pub unmaps: AtomicUsize,
}

impl CountingMapper {
    pub fn live(&self) -> usize {
        self.maps.load(Ordering::SeqCst) - self.unmaps.load(Ordering::SeqCst)
    }
}

impl DmaMapper for CountingMapper {
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: Direction) -> dma_pool::Result<BusAddr> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        IdentityMapper.map(cpu, len, dir)
    }

    fn unmap(&self, _bus: BusAddr, _len: usize, _dir: Direction) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counting pool; keep the returned mapper to inspect it after close
pub fn counting_pool(pages: usize) -> (Arc<CountingMapper>, BufferPool<Arc<CountingMapper>>) {
    let mapper = Arc::new(CountingMapper::default());
    (mapper.clone(), BufferPool::new(mapper, pages))
}
