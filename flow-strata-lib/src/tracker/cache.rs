use tracing::debug;

use crate::tracker::flow::Flow;

/// Free-list pool of flows.
///
/// Flows are allocated lazily up to `ceiling` and recycled through the free
/// list afterwards. `allocated` counts every flow the pool is responsible
/// for, whether it is parked here or lent to a manager.
#[derive(Debug)]
pub struct FlowCache {
    name: &'static str,
    free: Vec<Box<Flow>>,
    allocated: usize,
    ceiling: usize,
}

impl FlowCache {
    pub fn new(name: &'static str, ceiling: usize) -> Self {
        FlowCache {
            name,
            free: Vec::new(),
            allocated: 0,
            ceiling,
        }
    }

    /// Allocates `n` flows up front, never above the ceiling.
    pub fn preallocate(&mut self, n: usize) -> usize {
        let n = n.min(self.ceiling.saturating_sub(self.allocated));
        self.free.reserve(n);
        self.free.extend((0..n).map(|_| Box::new(Flow::new())));
        self.allocated += n;
        n
    }

    /// A reset flow, reused when one is free. `None` once the ceiling is reached.
    pub fn acquire(&mut self) -> Option<Box<Flow>> {
        if let Some(flow) = self.free.pop() {
            return Some(flow);
        }
        if self.allocated < self.ceiling {
            self.allocated += 1;
            return Some(Box::new(Flow::new()));
        }
        None
    }

    /// Takes a flow back. Flows above a lowered ceiling are dropped.
    pub fn release(&mut self, mut flow: Box<Flow>) {
        if self.allocated > self.ceiling {
            self.allocated -= 1;
            return;
        }
        flow.reset();
        self.free.push(flow);
    }

    /// Changes the ceiling. Free flows above it are dropped at once, lent
    /// flows when they come back.
    pub fn set_ceiling(&mut self, ceiling: usize) {
        self.ceiling = ceiling;
        while self.allocated > self.ceiling && self.free.pop().is_some() {
            self.allocated -= 1;
        }
        debug!(cache = self.name, ceiling, allocated = self.allocated, "flow ceiling changed");
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn free_flows(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}
