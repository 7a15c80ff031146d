//! Incremental line parser for the Grbl ASCII protocol.
//!
//! Pure parsing — no async, no I/O. [`LineParser::feed`] accepts opaque byte
//! chunks (arbitrary chunk boundaries are tolerated) and returns one
//! [`ParsedMessage`] per complete, non-empty line. A partial trailing line
//! is buffered until more bytes arrive; it never produces a message and
//! never mutates [`MachineState`].

use crate::state::{
    AccessoryState, ActiveState, BufferCounts, MachineState, ModalState, Overrides, PinState,
    Position, StatusReport,
};
use thiserror::Error;

/// Errors from the narrow helpers that parse a sub-field strictly (used by
/// callers that want to validate a line on their own, e.g. a settings
/// importer). [`LineParser::feed`] itself never returns an error — a line
/// that fails strict parsing still gets classified as [`ParsedMessage::Other`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid status line: {0}")]
    InvalidStatus(String),
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// One classified line from the firmware.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedMessage {
    Status(StatusReport),
    Ok,
    Error {
        code: Option<u32>,
        message: String,
    },
    Alarm {
        code: Option<u32>,
        message: String,
    },
    ParserState(ModalState),
    /// `[G54:...]`..`[G59:...]`, `[G28:...]`, `[G30:...]`, `[G92:...]`,
    /// `[TLO:...]`, `[PRB:...]` — raw key and the text inside the brackets.
    Parameters {
        key: String,
        raw: String,
    },
    /// `[MSG:...]`, `[HLP:...]`, `[echo:...]`.
    Feedback(String),
    Settings {
        number: u32,
        value: String,
    },
    /// `Grbl X.Y` banner.
    Startup(String),
    Other(String),
}

/// Stateful incremental parser: buffers partial lines, classifies complete
/// ones, and folds status/parser-state messages into [`MachineState`].
#[derive(Debug, Default)]
pub struct LineParser {
    pub state: MachineState,
    carry: Vec<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a byte chunk, returning every complete line paired with its
    /// classification, in order. Updates `self.state` for `status` and
    /// `parserstate` messages as they are produced. The raw line text is
    /// handed back alongside the classification because the controller's
    /// ack-routing (§4.6) needs to forward the exact text it received, not
    /// a re-serialization of the parsed form.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<(String, ParsedMessage)> {
        self.carry.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(pos) = self.carry.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line_bytes: Vec<u8> = self.carry.drain(..=pos).collect();
            // Drop the trailing \n (and a preceding \r if present).
            let mut end = line_bytes.len() - 1;
            if end > 0 && line_bytes[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&line_bytes[..end]).into_owned();
            if line.trim().is_empty() {
                continue;
            }
            let msg = classify_line(&line);
            self.apply(&msg);
            out.push((line, msg));
        }

        out
    }

    fn apply(&mut self, msg: &ParsedMessage) {
        match msg {
            ParsedMessage::Status(report) => self.state.apply_status(report),
            ParsedMessage::ParserState(modal) => self.state.modal = modal.clone(),
            _ => {}
        }
    }
}

/// Classifies a single already-terminated, non-empty line. Malformed input
/// falls through to [`ParsedMessage::Other`] — classification never fails.
pub fn classify_line(line: &str) -> ParsedMessage {
    let line = line.trim();

    if let Some(inner) = line.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        if let Ok(report) = parse_status_report(inner) {
            return ParsedMessage::Status(report);
        }
        return ParsedMessage::Other(line.to_string());
    }

    if line.eq_ignore_ascii_case("ok") {
        return ParsedMessage::Ok;
    }

    if let Some(rest) = strip_ci(line, "error:") {
        return ParsedMessage::Error {
            code: rest.trim().parse::<u32>().ok(),
            message: rest.trim().to_string(),
        };
    }

    if let Some(rest) = strip_ci(line, "alarm:") {
        return ParsedMessage::Alarm {
            code: rest.trim().parse::<u32>().ok(),
            message: rest.trim().to_string(),
        };
    }

    if let Some(inner) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return classify_bracket(inner);
    }

    if let Some(rest) = line.strip_prefix('$') {
        if let Some((num_str, value)) = rest.split_once('=') {
            if let Ok(number) = num_str.trim().parse::<u32>() {
                return ParsedMessage::Settings {
                    number,
                    value: value.trim().to_string(),
                };
            }
        }
    }

    if line.starts_with("Grbl ") || line.starts_with("GrblHAL ") {
        return ParsedMessage::Startup(line.to_string());
    }

    ParsedMessage::Other(line.to_string())
}

fn strip_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn classify_bracket(inner: &str) -> ParsedMessage {
    if let Some(rest) = inner.strip_prefix("GC:") {
        let mut modal = ModalState::default();
        modal.apply_words(rest.trim());
        return ParsedMessage::ParserState(modal);
    }

    const PARAM_KEYS: &[&str] = &[
        "G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92", "TLO", "PRB",
    ];
    if let Some((key, _)) = inner.split_once(':') {
        if PARAM_KEYS.contains(&key) {
            return ParsedMessage::Parameters {
                key: key.to_string(),
                raw: inner.to_string(),
            };
        }
    }

    if inner.starts_with("MSG:") || inner.starts_with("HLP:") || inner.starts_with("echo:") {
        return ParsedMessage::Feedback(inner.to_string());
    }

    // An unrecognized bracketed line containing modal-looking words (e.g. a
    // `[G...]` variant from a future firmware) still counts as parser state
    // rather than noise, per §4.1's "containing modal words" clause.
    if inner.starts_with('G') && inner.contains(':') {
        let (_, rest) = inner.split_once(':').unwrap();
        let mut modal = ModalState::default();
        modal.apply_words(rest.trim());
        return ParsedMessage::ParserState(modal);
    }

    ParsedMessage::Feedback(inner.to_string())
}

/// Parses the inside of a status report (angle brackets already stripped).
/// Format: `State[:sub]|MPos:x,y,z[,a,b,c]|WPos:...|Bf:rx[,planner]|FS:f,s|Ov:f,r,s|A:flags|Pn:flags`.
fn parse_status_report(s: &str) -> Result<StatusReport, ParseError> {
    let parts: Vec<&str> = s.split('|').collect();
    let state_token = parts.first().map(|p| p.trim()).unwrap_or("");
    if state_token.is_empty() {
        return Err(ParseError::InvalidStatus("empty status".into()));
    }
    let base = state_token.split(':').next().unwrap_or(state_token);
    let mut report = StatusReport {
        active_state: ActiveState::parse(base),
        ..Default::default()
    };

    for field in parts.iter().skip(1) {
        let field = field.trim();
        if let Some(v) = field.strip_prefix("MPos:") {
            report.machine_position = parse_position(v)?;
        } else if let Some(v) = field.strip_prefix("WPos:") {
            report.work_position = parse_position(v)?;
        } else if let Some(v) = field.strip_prefix("FS:") {
            let nums: Vec<f64> = v.split(',').filter_map(|n| n.trim().parse().ok()).collect();
            report.feed_rate = *nums.first().unwrap_or(&0.0);
            report.spindle_speed = *nums.get(1).unwrap_or(&0.0);
        } else if let Some(v) = field.strip_prefix("Bf:") {
            let nums: Vec<u32> = v.split(',').filter_map(|n| n.trim().parse().ok()).collect();
            if !nums.is_empty() {
                if nums.len() >= 2 {
                    report.buf = Some(BufferCounts {
                        planner: Some(nums[0]),
                        rx: nums[1],
                    });
                } else {
                    report.buf = Some(BufferCounts {
                        rx: nums[0],
                        planner: None,
                    });
                }
            }
        } else if let Some(v) = field.strip_prefix("Ov:") {
            let nums: Vec<u32> = v.split(',').filter_map(|n| n.trim().parse().ok()).collect();
            if nums.len() >= 3 {
                report.overrides = Some(Overrides {
                    feed: nums[0],
                    rapid: nums[1],
                    spindle: nums[2],
                });
            }
        } else if let Some(v) = field.strip_prefix("A:") {
            let v = v.trim();
            report.accessory = Some(AccessoryState {
                spindle_cw: v.contains('S'),
                spindle_ccw: v.contains('C'),
                flood_coolant: v.contains('F'),
                mist_coolant: v.contains('M'),
            });
        } else if let Some(v) = field.strip_prefix("Pn:") {
            let v = v.trim();
            report.pins = Some(PinState {
                limit_x: v.contains('X'),
                limit_y: v.contains('Y'),
                limit_z: v.contains('Z'),
                probe: v.contains('P'),
                door: v.contains('D'),
                hold: v.contains('H'),
                soft_reset: v.contains('R'),
                cycle_start: v.contains('S'),
            });
        }
        // Unrecognized fields (e.g. Ln:, WCO:) are ignored, not an error.
    }

    Ok(report)
}

/// Parses `x,y,z[,a,b,c]`. Trailing axes default to 0.0.
fn parse_position(s: &str) -> Result<Position, ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(ParseError::InvalidPosition(format!(
            "expected at least x,y,z, got: {s}"
        )));
    }
    let get = |i: usize| -> Result<f64, ParseError> {
        parts
            .get(i)
            .map(|p| p.parse::<f64>())
            .transpose()
            .map_err(|_| ParseError::InvalidPosition(s.to_string()))?
            .ok_or_else(|| ParseError::InvalidPosition(s.to_string()))
    };
    Ok(Position {
        x: get(0)?,
        y: get(1)?,
        z: get(2)?,
        a: parts.get(3).and_then(|v| v.parse().ok()).unwrap_or(0.0),
        b: parts.get(4).and_then(|v| v.parse().ok()).unwrap_or(0.0),
        c: parts.get(5).and_then(|v| v.parse().ok()).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_report() {
        let msg = classify_line("<Idle|MPos:0.000,0.000,0.000|WPos:0.000,0.000,0.000|FS:0,0>");
        match msg {
            ParsedMessage::Status(report) => {
                assert_eq!(report.active_state, ActiveState::Idle);
                assert_eq!(report.machine_position.x, 0.0);
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn classifies_status_with_buffer_and_overrides() {
        let msg = classify_line(
            "<Run|MPos:1,2,3|WPos:1,2,3|Bf:15,128|FS:100,500|Ov:100,100,100|A:SFM>",
        );
        let ParsedMessage::Status(report) = msg else {
            panic!("expected status")
        };
        assert_eq!(
            report.buf,
            Some(BufferCounts {
                planner: Some(15),
                rx: 128
            })
        );
        assert_eq!(
            report.overrides,
            Some(Overrides {
                feed: 100,
                rapid: 100,
                spindle: 100
            })
        );
        let acc = report.accessory.unwrap();
        assert!(acc.spindle_cw && acc.flood_coolant && acc.mist_coolant);
    }

    #[test]
    fn classifies_ok() {
        assert_eq!(classify_line("ok"), ParsedMessage::Ok);
        assert_eq!(classify_line("  OK  "), ParsedMessage::Ok);
    }

    #[test]
    fn classifies_error_with_code() {
        match classify_line("error:9") {
            ParsedMessage::Error { code, .. } => assert_eq!(code, Some(9)),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn classifies_error_with_description() {
        match classify_line("error: G-code locked out during alarm") {
            ParsedMessage::Error { code, message } => {
                assert_eq!(code, None);
                assert_eq!(message, "G-code locked out during alarm");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn classifies_alarm() {
        match classify_line("ALARM:1") {
            ParsedMessage::Alarm { code, .. } => assert_eq!(code, Some(1)),
            other => panic!("expected Alarm, got {other:?}"),
        }
    }

    #[test]
    fn classifies_parser_state() {
        match classify_line("[GC:G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F0 S0]") {
            ParsedMessage::ParserState(modal) => {
                assert_eq!(modal.motion.as_deref(), Some("G0"));
                assert_eq!(modal.coordinate_system.as_deref(), Some("G54"));
                assert_eq!(modal.units.as_deref(), Some("G21"));
            }
            other => panic!("expected ParserState, got {other:?}"),
        }
    }

    #[test]
    fn classifies_parameters() {
        match classify_line("[G54:0.000,0.000,0.000]") {
            ParsedMessage::Parameters { key, .. } => assert_eq!(key, "G54"),
            other => panic!("expected Parameters, got {other:?}"),
        }
        match classify_line("[PRB:0.000,0.000,-5.000:1]") {
            ParsedMessage::Parameters { key, .. } => assert_eq!(key, "PRB"),
            other => panic!("expected Parameters, got {other:?}"),
        }
    }

    #[test]
    fn classifies_feedback() {
        match classify_line("[MSG:Caution: Unlocked]") {
            ParsedMessage::Feedback(raw) => assert!(raw.starts_with("MSG:")),
            other => panic!("expected Feedback, got {other:?}"),
        }
    }

    #[test]
    fn classifies_settings() {
        match classify_line("$110=500.000") {
            ParsedMessage::Settings { number, value } => {
                assert_eq!(number, 110);
                assert_eq!(value, "500.000");
            }
            other => panic!("expected Settings, got {other:?}"),
        }
    }

    #[test]
    fn classifies_startup() {
        match classify_line("Grbl 1.1h ['$' for help]") {
            ParsedMessage::Startup(s) => assert!(s.starts_with("Grbl")),
            other => panic!("expected Startup, got {other:?}"),
        }
    }

    #[test]
    fn classifies_other_for_malformed_lines() {
        assert_eq!(
            classify_line("garbage noise"),
            ParsedMessage::Other("garbage noise".to_string())
        );
        // A status line with an unparseable position still degrades to Other,
        // never an error — see §7, malformed lines are never fatal.
        assert_eq!(
            classify_line("<Idle|MPos:bad,0,0|WPos:0,0,0>"),
            ParsedMessage::Other("<Idle|MPos:bad,0,0|WPos:0,0,0>".to_string())
        );
    }

    #[test]
    fn feed_tolerates_arbitrary_chunk_boundaries() {
        let whole = "ok\n<Idle|MPos:1,2,3|WPos:1,2,3>\n";
        let mut whole_parser = LineParser::new();
        let whole_msgs = whole_parser.feed(whole.as_bytes());

        let mut chunked_parser = LineParser::new();
        let mut chunked_msgs = Vec::new();
        for byte in whole.as_bytes() {
            chunked_msgs.extend(chunked_parser.feed(&[*byte]));
        }

        assert_eq!(whole_msgs, chunked_msgs);
        assert_eq!(whole_msgs.len(), 2);
    }

    #[test]
    fn feed_buffers_partial_trailing_line() {
        let mut parser = LineParser::new();
        assert!(parser.feed(b"o").is_empty());
        assert!(parser.feed(b"k").is_empty());
        let msgs = parser.feed(b"\n");
        assert_eq!(msgs, vec![("ok".to_string(), ParsedMessage::Ok)]);
    }

    #[test]
    fn feed_ignores_empty_lines() {
        let mut parser = LineParser::new();
        let msgs = parser.feed(b"\n\nok\n\n");
        assert_eq!(msgs, vec![("ok".to_string(), ParsedMessage::Ok)]);
    }

    #[test]
    fn state_is_monotonic_on_partial_lines() {
        let mut parser = LineParser::new();
        parser.feed(b"<Run|MPos:5,5,5|WPos:5,5,5>\n");
        assert_eq!(parser.state.active_state, ActiveState::Run);
        // A partial trailing line must not reset state.
        parser.feed(b"<Idle|MPos:0,0");
        assert_eq!(parser.state.active_state, ActiveState::Run);
    }

    #[test]
    fn applies_status_and_parser_state_to_machine_state() {
        let mut parser = LineParser::new();
        parser.feed(b"<Run|MPos:1,2,3|WPos:4,5,6>\n");
        assert_eq!(parser.state.active_state, ActiveState::Run);
        assert_eq!(parser.state.work_position.x, 4.0);

        parser.feed(b"[GC:G1 G55 G18 G91]\n");
        assert_eq!(parser.state.modal.motion.as_deref(), Some("G1"));
        assert_eq!(parser.state.modal.coordinate_system.as_deref(), Some("G55"));
    }
}
