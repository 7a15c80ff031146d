//! Machine state types for the Grbl wire protocol.
//!
//! Types only — no parsing logic. Populated by [`crate::parser`], read by
//! the controller, the sender, and anything that renders a snapshot to
//! clients.

use serde::{Deserialize, Serialize};

/// Position in machine or work coordinates. Grbl reports up to six axes;
/// unreported trailing axes default to zero rather than `None` so that
/// downstream consumers (jog bounds, expression context) never have to
/// special-case a missing axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Coarse execution mode reported in a status report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveState {
    #[default]
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    /// Firmware variant reported a state word we don't recognize.
    Unknown(String),
}

impl ActiveState {
    /// Parses the bare state token (before any `:substate`), e.g. `"Hold"`.
    pub fn parse(token: &str) -> Self {
        match token {
            "Idle" => ActiveState::Idle,
            "Run" => ActiveState::Run,
            "Hold" => ActiveState::Hold,
            "Jog" => ActiveState::Jog,
            "Alarm" => ActiveState::Alarm,
            "Door" => ActiveState::Door,
            "Check" => ActiveState::Check,
            "Home" => ActiveState::Home,
            "Sleep" => ActiveState::Sleep,
            other => ActiveState::Unknown(other.to_string()),
        }
    }
}

/// Planner and serial receive-buffer availability from a status report's
/// `Bf:` field. Classic Grbl reports only `rx`; grblHAL reports
/// `planner,rx`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferCounts {
    pub rx: u32,
    pub planner: Option<u32>,
}

/// Override percentages from a status report's `Ov:` field (`feed,rapid,spindle`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    pub feed: u32,
    pub rapid: u32,
    pub spindle: u32,
}

/// Accessory state from a status report's `A:` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryState {
    pub spindle_cw: bool,
    pub spindle_ccw: bool,
    pub flood_coolant: bool,
    pub mist_coolant: bool,
}

/// Input pin state from a status report's `Pn:` field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    pub limit_x: bool,
    pub limit_y: bool,
    pub limit_z: bool,
    pub probe: bool,
    pub door: bool,
    pub hold: bool,
    pub soft_reset: bool,
    pub cycle_start: bool,
}

/// One real-time status report (`<...>`), fully decoded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub active_state: ActiveState,
    pub machine_position: Position,
    pub work_position: Position,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    pub buf: Option<BufferCounts>,
    pub overrides: Option<Overrides>,
    pub accessory: Option<AccessoryState>,
    pub pins: Option<PinState>,
}

/// The firmware's currently active modal groups, as reported by `[GC:...]`.
/// Unrecognized modal words are preserved verbatim in `extra` so an
/// unfamiliar firmware build never loses information.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalState {
    pub motion: Option<String>,
    pub coordinate_system: Option<String>,
    pub plane: Option<String>,
    pub distance: Option<String>,
    pub feed_rate_mode: Option<String>,
    pub units: Option<String>,
    pub program: Option<String>,
    pub spindle: Option<String>,
    pub coolant: Option<String>,
    pub tool: Option<String>,
    pub extra: Vec<String>,
}

impl ModalState {
    /// Updates self from the space-separated modal words inside a `[GC:...]`
    /// line (the brackets and `GC:` prefix already stripped by the caller).
    pub fn apply_words(&mut self, words: &str) {
        for word in words.split_whitespace() {
            self.apply_word(word);
        }
    }

    fn apply_word(&mut self, word: &str) {
        let group = word.chars().next();
        match group {
            Some('G') => self.apply_g_word(word),
            Some('M') => self.apply_m_word(word),
            Some('T') => self.tool = Some(word.to_string()),
            Some('F') | Some('S') => { /* feed/speed values, not modal groups */ }
            _ => self.extra.push(word.to_string()),
        }
    }

    fn apply_g_word(&mut self, word: &str) {
        match word {
            "G0" | "G1" | "G2" | "G3" | "G38.2" | "G38.3" | "G38.4" | "G38.5" | "G80" => {
                self.motion = Some(word.to_string())
            }
            "G54" | "G55" | "G56" | "G57" | "G58" | "G59" => {
                self.coordinate_system = Some(word.to_string())
            }
            "G17" | "G18" | "G19" => self.plane = Some(word.to_string()),
            "G90" | "G91" => self.distance = Some(word.to_string()),
            "G93" | "G94" => self.feed_rate_mode = Some(word.to_string()),
            "G20" | "G21" => self.units = Some(word.to_string()),
            _ => self.extra.push(word.to_string()),
        }
    }

    fn apply_m_word(&mut self, word: &str) {
        match word {
            "M0" | "M1" | "M2" | "M30" => self.program = Some(word.to_string()),
            "M3" | "M4" | "M5" => self.spindle = Some(word.to_string()),
            "M7" | "M8" | "M9" => self.coolant = Some(word.to_string()),
            _ => self.extra.push(word.to_string()),
        }
    }
}

/// The machine state owned by the line parser: the latest successfully
/// parsed view of the firmware. Partial/unterminated lines never mutate
/// this — see [`crate::parser::LineParser`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub active_state: ActiveState,
    pub work_position: Position,
    pub machine_position: Position,
    pub buf: Option<BufferCounts>,
    pub modal: ModalState,
}

impl MachineState {
    pub fn apply_status(&mut self, report: &StatusReport) {
        self.active_state = report.active_state.clone();
        self.work_position = report.work_position;
        self.machine_position = report.machine_position;
        if report.buf.is_some() {
            self.buf = report.buf;
        }
    }
}
