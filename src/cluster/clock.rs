//! Failure scheduling driven by successful client operations.
//!
//! Every successful put or get advances the clock by one tick. Once more
//! than `warm_up` ticks have passed since the last event, the next
//! scheduled event is released and the cycle count starts over.

use super::Event;
use std::collections::VecDeque;
use std::fmt;
use tracing::info;

/// Events waiting to be applied, in order.
pub struct EventSchedule {
    warm_up: usize,
    applied: usize,
    events: VecDeque<Box<dyn Event>>,
}

impl EventSchedule {
    pub fn new(warm_up: usize, events: Vec<Box<dyn Event>>) -> Self {
        Self {
            warm_up,
            applied: 0,
            events: events.into(),
        }
    }

    pub fn warm_up(&self) -> usize {
        self.warm_up
    }

    /// Number of events released so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Number of events still waiting.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    fn next(&mut self) -> Option<Box<dyn Event>> {
        let event = self.events.pop_front()?;
        self.applied += 1;
        Some(event)
    }
}

impl fmt::Debug for EventSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSchedule")
            .field("warm_up", &self.warm_up)
            .field("applied", &self.applied)
            .field("pending", &self.events.len())
            .finish()
    }
}

/// Counts processing cycles and releases scheduled events.
#[derive(Debug)]
pub struct WorldClock {
    cycles: usize,
    schedule: EventSchedule,
}

impl WorldClock {
    pub fn new(schedule: EventSchedule) -> Self {
        Self {
            cycles: 0,
            schedule,
        }
    }

    /// Cycles since the clock last fired.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn schedule(&self) -> &EventSchedule {
        &self.schedule
    }

    /// Advance one cycle, returning the event due at this cycle if any.
    pub fn tick(&mut self) -> Option<Box<dyn Event>> {
        self.cycles += 1;
        if self.cycles <= self.schedule.warm_up {
            return None;
        }

        let cycles = std::mem::take(&mut self.cycles);
        let event = self.schedule.next()?;
        info!(
            cycles,
            index = self.schedule.applied() - 1,
            event = %event.describe(),
            "Releasing scheduled event"
        );
        Some(event)
    }
}
