// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{collections::HashMap, time::Instant};

#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone)]
pub struct EventId(pub u64);

/// A scheduler to schedule and cancel timeouts.
///
/// When a scheduled deadline passes, the owner of the scheduler is expected to call
/// `RxContext::handle_timeout` with the returned ID.
pub trait Scheduler: Send {
    /// Requests to schedule an event. Returns a unique ID used to cancel the scheduled event.
    fn schedule(&mut self, deadline: Instant) -> EventId;
    /// Cancels a previously scheduled event.
    fn cancel(&mut self, id: EventId);
}

/// A timer to schedule and cancel timeouts and retrieve triggered events.
pub struct Timer<E> {
    events: HashMap<EventId, E>,
    scheduler: Box<dyn Scheduler>,
}

impl<E> Timer<E> {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self { events: HashMap::default(), scheduler }
    }

    pub fn triggered(&mut self, event_id: &EventId) -> Option<E> {
        self.events.remove(event_id)
    }

    pub fn schedule_event(&mut self, deadline: Instant, event: E) -> EventId {
        let event_id = self.scheduler.schedule(deadline);
        self.events.insert(event_id, event);
        event_id
    }

    pub fn cancel_event(&mut self, event_id: EventId) {
        self.events.remove(&event_id);
        self.scheduler.cancel(event_id);
    }

    pub fn cancel_all(&mut self) {
        for event_id in self.events.keys() {
            self.scheduler.cancel(*event_id);
        }
        self.events.clear();
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
#[derive(Default)]
struct FakeSchedulerState {
    next_id: u64,
    scheduled: Vec<(EventId, Instant)>,
    canceled: Vec<EventId>,
}

/// Scheduler that records requests instead of arming real timers. Clones share state, so a test
/// can keep one handle and give another to the timer.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct FakeScheduler {
    state: std::sync::Arc<parking_lot::Mutex<FakeSchedulerState>>,
}

#[cfg(test)]
impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_scheduler(&self) -> Box<dyn Scheduler> {
        Box::new(self.clone())
    }

    pub fn scheduled(&self) -> Vec<(EventId, Instant)> {
        self.state.lock().scheduled.clone()
    }

    pub fn canceled(&self) -> Vec<EventId> {
        self.state.lock().canceled.clone()
    }
}

#[cfg(test)]
impl Scheduler for FakeScheduler {
    fn schedule(&mut self, deadline: Instant) -> EventId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = EventId(state.next_id);
        state.scheduled.push((id, deadline));
        id
    }

    fn cancel(&mut self, id: EventId) {
        self.state.lock().canceled.push(id);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[derive(PartialEq, Eq, Debug)]
    struct TidTimeout(u8);

    fn in_ms(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn event_triggers_once() {
        let scheduler = FakeScheduler::new();
        let mut timer = Timer::new(scheduler.as_scheduler());
        let deadline = in_ms(40);
        let id = timer.schedule_event(deadline, TidTimeout(6));
        assert_eq!(scheduler.scheduled(), vec![(id, deadline)]);
        assert_eq!(timer.triggered(&id), Some(TidTimeout(6)));
        assert_eq!(timer.triggered(&id), None);
        assert!(scheduler.canceled().is_empty());
    }

    #[test]
    fn rearm_replaces_pending_event() {
        let scheduler = FakeScheduler::new();
        let mut timer = Timer::new(scheduler.as_scheduler());
        let first = timer.schedule_event(in_ms(100), TidTimeout(0));
        timer.cancel_event(first);
        let second = timer.schedule_event(in_ms(200), TidTimeout(0));

        assert_ne!(first, second);
        assert_eq!(scheduler.canceled(), vec![first]);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.triggered(&first), None);
        assert_eq!(timer.triggered(&second), Some(TidTimeout(0)));
    }

    #[test]
    fn events_are_independent() {
        let scheduler = FakeScheduler::new();
        let mut timer = Timer::new(scheduler.as_scheduler());
        let voice = timer.schedule_event(in_ms(40), TidTimeout(6));
        let video = timer.schedule_event(in_ms(100), TidTimeout(5));
        let best_effort = timer.schedule_event(in_ms(100), TidTimeout(0));
        timer.cancel_event(video);

        assert_eq!(timer.pending(), 2);
        assert_eq!(timer.triggered(&video), None);
        assert_eq!(timer.triggered(&best_effort), Some(TidTimeout(0)));
        assert_eq!(timer.triggered(&voice), Some(TidTimeout(6)));
    }

    #[test]
    fn cancel_all_on_shutdown() {
        let scheduler = FakeScheduler::new();
        let mut timer = Timer::new(scheduler.as_scheduler());
        let ids: Vec<_> =
            (0..3).map(|tid| timer.schedule_event(in_ms(100), TidTimeout(tid))).collect();
        timer.cancel_all();

        assert_eq!(timer.pending(), 0);
        assert!(ids.iter().all(|id| timer.triggered(id).is_none()));
        let mut canceled = scheduler.canceled();
        canceled.sort_by_key(|id| id.0);
        assert_eq!(canceled, ids);
    }
}
