//! Character-counting streamer for a loaded G-code program.
//!
//! Tracks which lines are in flight against an outstanding-bytes ceiling so
//! the host never overruns Grbl's receive buffer. Admission is greedy: a
//! single [`Sender::next`] call may emit zero, one, or many lines — every
//! line that currently fits under the window (§4.4).

use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;

/// Grbl's classic receive buffer is 128 bytes; `?`/`$G\n` poll bytes are
/// never counted against the window (§4.6), so the default ceiling is
/// trimmed by 8 bytes to leave them headroom without any accounting.
pub const DEFAULT_BUFFER_SIZE: u32 = 128 - 8;

pub type SenderContext = HashMap<String, f64>;

/// Serializable snapshot of the sender's progress, for `sender:status`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SenderSnapshot {
    pub name: String,
    pub total: u32,
    pub sent: u32,
    pub received: u32,
    pub data_length: u32,
    pub buffer_size: u32,
}

#[derive(Debug)]
pub struct Sender {
    name: String,
    lines: Vec<String>,
    context: SenderContext,
    total: u32,
    sent: u32,
    received: u32,
    buffer_size: u32,
    data_length: u32,
    queue: VecDeque<u32>,
}

impl Default for Sender {
    fn default() -> Self {
        Self {
            name: String::new(),
            lines: Vec::new(),
            context: SenderContext::new(),
            total: 0,
            sent: 0,
            received: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            data_length: 0,
            queue: VecDeque::new(),
        }
    }
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.total > 0
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.received == self.total
    }

    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Parses `gcode` into lines (splitting on `\n`, dropping blank lines —
    /// they carry no wire bytes and consume no `received` slot, per the
    /// resolution in DESIGN.md). Returns `false` without mutating state if
    /// `gcode` is empty after normalization.
    pub fn load(&mut self, name: impl Into<String>, gcode: &str, context: SenderContext) -> bool {
        if gcode.trim().is_empty() {
            return false;
        }
        let lines: Vec<String> = gcode
            .split('\n')
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.trim().is_empty())
            .collect();
        if lines.is_empty() {
            return false;
        }
        self.name = name.into();
        self.total = lines.len() as u32;
        self.lines = lines;
        self.context = context;
        self.sent = 0;
        self.received = 0;
        self.data_length = 0;
        self.queue.clear();
        true
    }

    /// Clears the loaded program. Resets the buffer ceiling to the default —
    /// a grown window learned from one firmware shouldn't leak into whatever
    /// gets loaded next (see DESIGN.md Open Question resolution).
    pub fn unload(&mut self) {
        self.name.clear();
        self.lines.clear();
        self.context.clear();
        self.total = 0;
        self.sent = 0;
        self.received = 0;
        self.data_length = 0;
        self.queue.clear();
        self.buffer_size = DEFAULT_BUFFER_SIZE;
    }

    pub fn rewind(&mut self) {
        self.sent = 0;
        self.received = 0;
        self.data_length = 0;
        self.queue.clear();
    }

    pub fn context(&self) -> &SenderContext {
        &self.context
    }

    /// Greedily admits every queued line that currently fits under the
    /// window, returning the lines to write (in order). A line whose byte
    /// length alone exceeds `buffer_size` is still admitted when nothing
    /// else is outstanding (§4.4 edge case): the window always accepts at
    /// least one line.
    pub fn next(&mut self) -> Vec<String> {
        let mut emitted = Vec::new();
        while self.sent < self.total {
            let line = &self.lines[self.sent as usize];
            let needed = line.len() as u32 + 1; // +1 for the appended newline
            if self.data_length == 0 || self.data_length + needed <= self.buffer_size {
                self.queue.push_back(needed);
                self.data_length += needed;
                self.sent += 1;
                emitted.push(line.clone());
            } else {
                break;
            }
        }
        emitted
    }

    /// Consumes one `ok`/`error` acknowledgement for the oldest in-flight line.
    pub fn ack(&mut self) {
        if let Some(n) = self.queue.pop_front() {
            self.data_length = self.data_length.saturating_sub(n);
            self.received += 1;
        }
    }

    /// 1-based line number of the line an incoming `error` refers to
    /// (`received + 1`, per §4.6 ack routing).
    pub fn current_line_number(&self) -> u32 {
        self.received + 1
    }

    /// Raises `buffer_size` from a status report's advertised firmware rx
    /// buffer, honoring §4.6's growth rule: only while the workflow is idle
    /// and nothing is in flight, and never below the current ceiling.
    pub fn grow_buffer_size(&mut self, firmware_rx: u32, workflow_idle: bool) {
        if !workflow_idle || self.data_length != 0 {
            return;
        }
        let candidate = firmware_rx.saturating_sub(8);
        if candidate > self.buffer_size {
            self.buffer_size = candidate;
        }
    }

    pub fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            name: self.name.clone(),
            total: self.total,
            sent: self.sent,
            received: self.received,
            data_length: self.data_length,
            buffer_size: self.buffer_size,
        }
    }
}
