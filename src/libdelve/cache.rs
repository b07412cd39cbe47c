/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
//! Block-cache capacity budget.  Every device class that caches blocks
//! declares its capacity here; constructing a cache with a zero capacity is
//! a programming error and panics.
use std::collections::{HashMap, VecDeque};

use super::error::Result;
use super::source::SourceRef;

pub const FILE_BLOCKS: usize = 10;
pub const QCOW2_BLOCKS: usize = 10;
pub const DISK_IMAGE_BLOCKS: usize = 10;
pub const EXT_INODE_CONTENTS_BLOCKS: usize = 10;

/// Bounded map from block number to the source most recently returned for
/// it.  Eviction drops the least-recently-returned entry.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    entries: HashMap<u64, SourceRef>,
    order: VecDeque<u64>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "block cache declared with zero capacity");
        BlockCache {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Return the cached source for block `n`, or run `fill` and remember
    /// its result.  Failures are not cached.
    pub fn get_or_try_insert(
        &mut self,
        n: u64,
        fill: impl FnOnce() -> Result<SourceRef>,
    ) -> Result<SourceRef> {
        if let Some(hit) = self.entries.get(&n) {
            let hit = hit.clone();
            self.touch(n);
            return Ok(hit);
        }

        let made = fill()?;
        self.entries.insert(n, made.clone());
        self.order.push_back(n);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        Ok(made)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn touch(&mut self, n: u64) {
        if let Some(at) = self.order.iter().position(|&k| k == n) {
            self.order.remove(at);
            self.order.push_back(n);
        }
    }
}
