//! Fan-out session bookkeeping, kept off the `Pipe` struct (design note
//! in §9) so the pipe model stays about transport, not scheduling.

/// Sentinel standing in for "infinity" for `bytes_safely_written` at the
/// start of a cycle, before any consumer has tee'd anything.
pub(crate) const SENTINEL_MAX: u64 = u64::MAX;

/// Per-consumer scratch state for one outbound pipe within a fan-out cycle.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConsumerState {
    pub(crate) bytes_written: u64,
    pub(crate) visited: bool,
    /// Set once this consumer's edge has been abandoned after a permanent
    /// I/O error (§7). A dead consumer is excluded from the safe-write
    /// minimum and counts as always-visited, so one bad consumer can't wedge
    /// the whole fan-out group.
    pub(crate) dead: bool,
}

/// Scratch state for one source node's fan-out group, reset at the start of
/// every readable cycle (§4.4 step 1).
#[derive(Debug)]
pub(crate) struct FanoutSession {
    pub(crate) bytes_safely_written: u64,
    pub(crate) consumers: Vec<ConsumerState>,
}

impl FanoutSession {
    pub(crate) fn new(consumer_count: usize) -> FanoutSession {
        FanoutSession {
            bytes_safely_written: SENTINEL_MAX,
            consumers: vec![ConsumerState::default(); consumer_count],
        }
    }

    /// §4.4 step 1: reset at the start of a new readable cycle.
    pub(crate) fn reset(&mut self) {
        self.bytes_safely_written = SENTINEL_MAX;
        for c in &mut self.consumers {
            *c = ConsumerState::default();
        }
    }

    /// §4.4 step 3: record a tee of `n` bytes into consumer `idx`, update
    /// the running minimum, and mark it visited.
    ///
    /// Invariant upheld: `bytes_safely_written` never exceeds any visited
    /// consumer's `bytes_written` (§3 fan-out session state invariant).
    pub(crate) fn record_tee(&mut self, idx: usize, n: u64) {
        let c = &mut self.consumers[idx];
        c.bytes_written += n;
        c.visited = true;
        self.recompute_min();
    }

    /// Abandons a consumer after a permanent I/O error (§7): it no longer
    /// participates in the safe-write minimum and can't block reclamation.
    pub(crate) fn mark_dead(&mut self, idx: usize) {
        let c = &mut self.consumers[idx];
        c.dead = true;
        c.visited = true;
        self.recompute_min();
    }

    fn recompute_min(&mut self) {
        self.bytes_safely_written = self
            .consumers
            .iter()
            .filter(|c| !c.dead)
            .map(|c| c.bytes_written)
            .min()
            .unwrap_or(0);
    }

    /// §4.4 step 4: true once every live consumer has fired this cycle — the
    /// handler that observes this performs the reclamation splice. A group
    /// with no live consumers left counts as visited (nothing to wait for).
    pub(crate) fn all_visited(&self) -> bool {
        self.consumers.iter().all(|c| c.visited || c.dead)
    }

    pub(crate) fn any_alive(&self) -> bool {
        self.consumers.iter().any(|c| !c.dead)
    }

    /// §4.4 step 4: subtract the reclaimed amount from every consumer's
    /// counter (the producer's read position has advanced by that much).
    pub(crate) fn apply_reclamation(&mut self, reclaimed: u64) {
        for c in &mut self.consumers {
            c.bytes_written = c.bytes_written.saturating_sub(reclaimed);
        }
    }

    /// The amount safe to reclaim this cycle, or `0` if no live consumer has
    /// tee'd anything yet (the sentinel must never be spliced literally).
    pub(crate) fn reclaimable(&self) -> u64 {
        if !self.any_alive() || self.bytes_safely_written == SENTINEL_MAX {
            0
        } else {
            self.bytes_safely_written
        }
    }
}
