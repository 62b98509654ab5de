//! Received frames and multi-descriptor reassembly.

use alloc::vec::Vec;

use dma_pool::PageFragment;

/// Most descriptors one frame may span.
pub const MAX_FRAGMENTS: usize = 8;

/// A received frame: one or more page fragments in wire order.
///
/// Holding a frame keeps its page halves away from the device. Drop it (or
/// copy out with [`to_vec`](Self::to_vec)) to let the ring reuse them.
#[derive(Debug)]
pub struct RxFrame {
    segments: Vec<PageFragment>,
}

impl RxFrame {
    /// Total frame length in bytes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(PageFragment::len).sum()
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fragments in order.
    pub fn segments(&self) -> &[PageFragment] {
        &self.segments
    }

    /// Copy the frame into `out`; returns the bytes copied.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for seg in &self.segments {
            let room = out.len() - copied;
            if room == 0 {
                break;
            }
            let n = seg.len().min(room);
            out[copied..copied + n].copy_from_slice(&seg.as_slice()[..n]);
            copied += n;
        }
        copied
    }

    /// Copy the frame into a fresh vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segments {
            out.extend_from_slice(seg.as_slice());
        }
        out
    }
}

/// Consumer of received frames.
pub trait FrameSink {
    /// Take ownership of one frame.
    fn deliver(&mut self, frame: RxFrame);
}

impl<F: FnMut(RxFrame)> FrameSink for F {
    fn deliver(&mut self, frame: RxFrame) {
        self(frame)
    }
}

/// Collects fragments between a FIRST and a LAST completion.
#[derive(Debug, Default)]
pub(crate) struct Assembler {
    segments: Vec<PageFragment>,
    /// Discarding continuation fragments of a dropped frame until LAST.
    dropping: bool,
}

impl Assembler {
    /// Whether a frame is being collected.
    pub(crate) fn in_frame(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Whether the rest of a dropped frame is being skipped.
    pub(crate) fn dropping(&self) -> bool {
        self.dropping
    }

    /// Append a fragment. Fails (dropping the partial frame) once the frame
    /// exceeds [`MAX_FRAGMENTS`].
    pub(crate) fn push(&mut self, frag: PageFragment) -> bool {
        if self.segments.len() == MAX_FRAGMENTS {
            self.discard(true);
            return false;
        }
        self.segments.push(frag);
        true
    }

    /// Finish the current frame.
    pub(crate) fn take(&mut self) -> RxFrame {
        self.dropping = false;
        RxFrame {
            segments: core::mem::take(&mut self.segments),
        }
    }

    /// Drop the partial frame; with `skip_rest` continuation fragments are
    /// ignored until the next LAST or FIRST.
    pub(crate) fn discard(&mut self, skip_rest: bool) {
        self.segments.clear();
        self.dropping = skip_rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dma_pool::{BufferPool, IdentityMapper};

    #[test]
    fn test_frame_spans_fragments() {
        let pool = BufferPool::new(IdentityMapper, 4);
        let a = pool.acquire_page().unwrap();
        let b = pool.acquire_page().unwrap();

        let mut asm = Assembler::default();
        assert!(asm.push(pool.fragment(&a, 100)));
        assert!(asm.push(pool.fragment(&b, 28)));
        assert!(asm.in_frame());

        let frame = asm.take();
        assert!(!asm.in_frame());
        assert_eq!(frame.len(), 128);
        assert_eq!(frame.segments().len(), 2);
        assert_eq!(frame.to_vec().len(), 128);

        let mut short = [0xffu8; 50];
        assert_eq!(frame.copy_to(&mut short), 50);
        assert!(short.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overlong_frame_is_dropped() {
        let pool = BufferPool::new(IdentityMapper, 1);
        let buf = pool.acquire_page().unwrap();

        let mut asm = Assembler::default();
        for _ in 0..MAX_FRAGMENTS {
            assert!(asm.push(pool.fragment(&buf, 8)));
        }
        assert!(!asm.push(pool.fragment(&buf, 8)));
        assert!(!asm.in_frame());
        assert!(asm.dropping());
        assert_eq!(buf.page().holders(buf.half()), 0);
    }
}
