//! Progress reporting for archive operations.
//!
//! The mutating operation publishes small snapshots (label, unit, count,
//! finished) into an SPSC channel; a render thread drains it on a fixed
//! interval and draws a spinner/counter line. The mutator never blocks on
//! rendering: the channel is unbounded and a slow terminal only delays the
//! drawing, not the I/O.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

/// Fixed render interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spinner animation; the `=` frame marks the finished state.
const FRAMES: [char; 4] = ['-', '\\', '|', '/'];
const FINISHED_FRAME: char = '=';

/// One snapshot of an operation's progress. `count: None` renders as an
/// indeterminate spinner, the way single-file operations report.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub label: String,
    pub unit: String,
    pub count: Option<u64>,
    pub finished: bool,
}

/// Receiver of progress snapshots. Implementations render independently;
/// nothing they return is consumed by the archive session.
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: ProgressUpdate);
}

/// Terminal spinner bound to stderr.
pub struct TerminalProgress {
    tx: Option<Sender<ProgressUpdate>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalProgress {
    /// Spawn the render thread. With `clear_after_finish` the bar line is
    /// erased once an operation completes; otherwise it is left on screen.
    pub fn new(clear_after_finish: bool) -> Self {
        let (tx, rx) = unbounded::<ProgressUpdate>();

        let thread = std::thread::spawn(move || {
            let mut active: Option<ProgressUpdate> = None;
            let mut frame = 0usize;
            loop {
                let mut disconnected = false;
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(update) => {
                        apply(&mut active, update, clear_after_finish);
                        // Drain whatever else queued up since the last wake.
                        while let Ok(update) = rx.try_recv() {
                            apply(&mut active, update, clear_after_finish);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => disconnected = true,
                }

                if let Some(state) = &active {
                    frame = (frame + 1) % FRAMES.len();
                    draw(state, FRAMES[frame]);
                }
                if disconnected {
                    if let Some(state) = active.take() {
                        finalize(&state, clear_after_finish);
                    }
                    break;
                }
            }
        });

        Self {
            tx: Some(tx),
            thread: Mutex::new(Some(thread)),
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn update(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        // Disconnect the channel so the render thread exits its loop.
        self.tx.take();
        if let Some(handle) = self.thread.lock().ok().and_then(|mut t| t.take()) {
            let _ = handle.join();
        }
    }
}

fn apply(active: &mut Option<ProgressUpdate>, update: ProgressUpdate, clear_after_finish: bool) {
    if update.finished {
        if let Some(state) = active.take() {
            finalize(&ProgressUpdate { finished: true, ..state }, clear_after_finish);
        }
    } else {
        *active = Some(update);
    }
}

fn draw(state: &ProgressUpdate, frame: char) {
    let count = state
        .count
        .map(|c| format!(" {c}"))
        .unwrap_or_default();
    let line = format!("{}{}{} {}", state.label, frame, count, state.unit);
    let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
    let mut truncated: String = line.chars().take(width.saturating_sub(1)).collect();
    // Pad so a shorter frame fully overwrites the previous one.
    while truncated.chars().count() < width.saturating_sub(1) {
        truncated.push(' ');
    }
    let mut err = io::stderr();
    let _ = write!(err, "\r{truncated}");
    let _ = err.flush();
}

fn finalize(state: &ProgressUpdate, clear_after_finish: bool) {
    let mut err = io::stderr();
    if clear_after_finish {
        let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let _ = write!(err, "\r{}\r", " ".repeat(width.saturating_sub(1)));
    } else {
        draw(state, FINISHED_FRAME);
        let _ = writeln!(err);
    }
    let _ = err.flush();
}

/// Per-operation snapshot publisher used by the archive session. Keeps the
/// running count locally and pushes full snapshots into the sink.
pub(crate) struct OpProgress {
    sink: Option<Arc<dyn ProgressSink>>,
    label: String,
    unit: String,
    count: Option<u64>,
}

impl OpProgress {
    /// Start reporting an operation. `counted` operations show a running
    /// file counter; others an indeterminate spinner.
    pub(crate) fn begin(
        sink: Option<Arc<dyn ProgressSink>>,
        label: String,
        counted: bool,
    ) -> Self {
        let progress = Self {
            sink,
            label,
            unit: if counted { "files".into() } else { String::new() },
            count: counted.then_some(0),
        };
        progress.publish(false);
        progress
    }

    pub(crate) fn tick(&mut self) {
        if let Some(count) = self.count.as_mut() {
            *count += 1;
        }
        self.publish(false);
    }

    pub(crate) fn finish(self) {
        self.publish(true);
    }

    fn publish(&self, finished: bool) {
        if let Some(sink) = &self.sink {
            sink.update(ProgressUpdate {
                label: self.label.clone(),
                unit: self.unit.clone(),
                count: self.count,
                finished,
            });
        }
    }
}
