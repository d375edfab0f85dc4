/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A small scheduling primitive shared by the consensus actor threads and the pool sweeper thread.
//!
//! Every background loop in this library is paced the same way: do one unit of work, then call
//! [Ticker::wait], which sleeps until the next tick boundary unless a shutdown signal arrives first.
//! Keeping the pacing and the stop channel in one place keeps the loops themselves one-liners, and
//! keeps the state machines they drive free of timing concerns so that tests can step them
//! synchronously without any ticker at all.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

/// What a loop should do after [waiting](Ticker::wait) on its ticker: run another iteration, or
/// return.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TickerStatus {
    Tick,
    Stop,
}

pub struct Ticker {
    interval: Duration,
    shutdown: Receiver<()>,
    next_tick: Instant,
}

impl Ticker {
    /// Create a ticker that fires every `interval`, and stops when `()` is sent on the channel that
    /// `shutdown` receives from.
    pub fn new(interval: Duration, shutdown: Receiver<()>) -> Ticker {
        Ticker {
            interval,
            shutdown,
            next_tick: Instant::now() + interval,
        }
    }

    /// Block until the next tick boundary, returning [TickerStatus::Stop] as soon as the shutdown
    /// signal arrives instead. Ticks do not accumulate: a loop iteration that overruns the interval
    /// is followed by a full interval's wait, not a burst of catch-up ticks.
    pub fn wait(&mut self) -> TickerStatus {
        loop {
            let now = Instant::now();
            if now >= self.next_tick {
                self.next_tick = now + self.interval;
                match self.shutdown.try_recv() {
                    Ok(()) => return TickerStatus::Stop,
                    Err(TryRecvError::Empty) => return TickerStatus::Tick,
                    Err(TryRecvError::Disconnected) => {
                        panic!("Ticker disconnected from its controlling thread")
                    }
                }
            }

            match self.shutdown.recv_timeout(self.next_tick - now) {
                Ok(()) => return TickerStatus::Stop,
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("Ticker disconnected from its controlling thread")
                }
            }
        }
    }
}
