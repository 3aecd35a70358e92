// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Tracks which ids of the multicast node table are in use.  Free ids are
//! kept as a list of contiguous spans, plus a recycle bin of individually
//! freed ids that is drained first.

use slog::debug;

use crate::hal_err;
use crate::types::HalResult;

/// A Span represents a contiguous range of ids, closed on the bottom and open
/// on the top.  In other words, a Span{1,4} will include 1, 2, and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    low: u32,
    high: u32,
}

impl Span {
    fn new(low: u32, high: u32) -> Self {
        Span { low, high }
    }

    fn contains(&self, id: u32) -> bool {
        self.low <= id && id < self.high
    }

    fn is_empty(&self) -> bool {
        self.low >= self.high
    }
}

pub struct NodeAllocator {
    log: slog::Logger,
    // Number of ids in the managed range
    size: u32,
    // Individually freed ids, reused before the freelist is touched
    recycle_bin: Vec<u32>,
    // Never-allocated ranges, ordered by offset
    freelist: Vec<Span>,
}

impl NodeAllocator {
    pub fn new(log: &slog::Logger) -> Self {
        // The table size isn't known until a pipeline has been pushed, so the
        // allocator starts out empty.
        NodeAllocator {
            log: log.new(slog::o!("unit" => "node_alloc")),
            size: 0,
            recycle_bin: Vec::new(),
            freelist: Vec::new(),
        }
    }

    /// Throw away all allocation state and manage `0..size` from scratch.
    pub fn reset(&mut self, size: u32) {
        debug!(self.log, "reset node allocator.  size: {size}");
        self.size = size;
        self.recycle_bin.clear();
        self.freelist = match size {
            0 => Vec::new(),
            _ => vec![Span::new(0, size)],
        };
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Mark an id found in the hardware as already in use.
    pub fn reserve(&mut self, id: u32) -> HalResult<()> {
        if let Some(pos) = self.recycle_bin.iter().position(|x| *x == id) {
            self.recycle_bin.swap_remove(pos);
            return Ok(());
        }
        let idx = self
            .freelist
            .iter()
            .position(|s| s.contains(id))
            .ok_or_else(|| {
                hal_err!(Internal, "multicast node id {id} is not free")
            })?;
        // Split the span around the reserved id.
        let span = self.freelist.remove(idx);
        let above = Span::new(id + 1, span.high);
        let below = Span::new(span.low, id);
        for s in [above, below] {
            if !s.is_empty() {
                self.freelist.insert(idx, s);
            }
        }
        Ok(())
    }

    pub fn alloc(&mut self) -> HalResult<u32> {
        if let Some(id) = self.recycle_bin.pop() {
            #[cfg(not(test))]
            slog::trace!(self.log, "allocated {id} from recycle bin");
            return Ok(id);
        }
        let span = self.freelist.first_mut().ok_or_else(|| {
            hal_err!(TableFull, "Could not find free multicast node id.")
        })?;
        let id = span.low;
        span.low += 1;
        if span.is_empty() {
            self.freelist.remove(0);
        }
        #[cfg(not(test))]
        slog::trace!(self.log, "allocated {id} from freelist");
        Ok(id)
    }

    pub fn free(&mut self, id: u32) {
        #[cfg(not(test))]
        slog::trace!(self.log, "freeing {id}");
        if id < self.size {
            self.recycle_bin.push(id);
        }
    }
}
