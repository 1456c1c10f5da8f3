/*
    Concept32
    https://github.com/dbalsom/concept32

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    scheduler.rs

    Virtual-time device service queue.

    Device models never block; a service routine makes bounded progress and
    tells its caller whether to re-arm it. The queue here is the reference
    driver for that contract: one outstanding event per unit, strictly
    ordered virtual time, no wall clock.
*/

/// What command dispatch tells the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    /// The unit already has an operation in flight. Nothing was changed.
    Busy,
    /// The command was latched; arm one service event after this delay.
    Initiated(u32),
    /// The command finished (or was refused) synchronously with this
    /// device status. No event is outstanding.
    Complete(u8),
}

/// What a service tick tells the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceResult {
    /// Re-arm the service event after this many virtual-time units.
    Continue(u32),
    /// The operation completed or aborted; no event is outstanding.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEvent {
    pub unit: usize,
    pub when: u64,
}

/// A per-controller event queue over virtual time. Events are keyed by
/// unit number; a unit has at most one event pending at a time.
#[derive(Default)]
pub struct ServiceQueue {
    events: Vec<ServiceEvent>,
    now: u64,
}

impl ServiceQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Arm a service event for `unit`, replacing any pending one.
    pub fn schedule(&mut self, unit: usize, delay: u32) {
        self.cancel(unit);
        self.events.push(ServiceEvent {
            unit,
            when: self.now + delay as u64,
        });
    }

    /// Cancel the pending event for `unit`, if any.
    pub fn cancel(&mut self, unit: usize) {
        self.events.retain(|ev| ev.unit != unit);
    }

    pub fn is_active(&self, unit: usize) -> bool {
        self.events.iter().any(|ev| ev.unit == unit)
    }

    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
    }

    /// Pop the earliest pending event, advancing virtual time to it.
    /// Ties break on unit number so replay is deterministic.
    pub fn pop_next(&mut self) -> Option<ServiceEvent> {
        let idx = self
            .events
            .iter()
            .enumerate()
            .min_by_key(|(_, ev)| (ev.when, ev.unit))
            .map(|(i, _)| i)?;
        let ev = self.events.swap_remove(idx);
        self.now = ev.when;
        Some(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_order() {
        let mut queue = ServiceQueue::new();
        queue.schedule(0, 20);
        queue.schedule(1, 10);
        queue.schedule(2, 30);

        assert_eq!(queue.pop_next(), Some(ServiceEvent { unit: 1, when: 10 }));
        assert_eq!(queue.now(), 10);
        assert_eq!(queue.pop_next(), Some(ServiceEvent { unit: 0, when: 20 }));
        assert_eq!(queue.pop_next(), Some(ServiceEvent { unit: 2, when: 30 }));
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn schedule_replaces_pending_event() {
        let mut queue = ServiceQueue::new();
        queue.schedule(3, 100);
        queue.schedule(3, 5);

        assert_eq!(queue.pop_next(), Some(ServiceEvent { unit: 3, when: 5 }));
        assert!(queue.is_idle());
    }

    #[test]
    fn cancel_removes_event() {
        let mut queue = ServiceQueue::new();
        queue.schedule(0, 10);
        assert!(queue.is_active(0));
        queue.cancel(0);
        assert!(!queue.is_active(0));
        assert!(queue.pop_next().is_none());
    }
}
