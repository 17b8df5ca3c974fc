use crate::error::{BatcherError, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Identity of one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

enum Command {
    Schedule(TimerToken, Instant),
    Cancel(TimerToken),
    Stop,
}

/// One-shot timers served by a single background thread.
///
/// The callback receives the token of the timer that fired; deciding
/// whether that timer is still relevant is up to the callback.
pub struct FlushTimer {
    commands: Sender<Command>,
    next_token: AtomicU64,
}

/// Receiving half of a [`FlushTimer`], turned into the timer thread by
/// [`TimerDriver::spawn`]. Timers scheduled before the spawn are kept.
pub struct TimerDriver {
    commands: Receiver<Command>,
}

/// Create a timer handle and the driver that will serve it
pub fn timer() -> (FlushTimer, TimerDriver) {
    let (tx, rx) = channel::unbounded();
    let handle = FlushTimer {
        commands: tx,
        next_token: AtomicU64::new(1),
    };
    (handle, TimerDriver { commands: rx })
}

impl TimerDriver {
    /// Spawn the timer thread
    pub fn spawn<F>(self, name: impl Into<String>, on_fire: F) -> Result<()>
    where
        F: Fn(TimerToken) + Send + 'static,
    {
        let rx = self.commands;
        thread::Builder::new()
            .name(name.into())
            .spawn(move || run(rx, on_fire))
            .map_err(BatcherError::Spawn)?;
        Ok(())
    }
}

impl FlushTimer {
    /// Fire once after `delay`
    pub fn schedule(&self, delay: Duration) -> TimerToken {
        let token = TimerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let _ = self
            .commands
            .send(Command::Schedule(token, Instant::now() + delay));
        token
    }

    /// Drop a scheduled timer; a timer that already fired is ignored
    pub fn cancel(&self, token: TimerToken) {
        let _ = self.commands.send(Command::Cancel(token));
    }

    /// Stop the timer thread; pending timers never fire
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(rx: Receiver<Command>, on_fire: F)
where
    F: Fn(TimerToken),
{
    let mut timers: HashMap<TimerToken, Instant> = HashMap::new();

    loop {
        let next = timers.values().min().copied();
        let command = match next {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Schedule(token, deadline)) => {
                timers.insert(token, deadline);
            }
            Ok(Command::Cancel(token)) => {
                timers.remove(&token);
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                let mut due: Vec<_> = timers
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(token, deadline)| (*deadline, *token))
                    .collect();
                due.sort_unstable_by_key(|(deadline, token)| (*deadline, token.0));
                for (_, token) in due {
                    timers.remove(&token);
                    trace!(token = token.0, "flush timer fired");
                    on_fire(token);
                }
            }
        }
    }

    trace!(abandoned = timers.len(), "flush timer thread exiting");
}
