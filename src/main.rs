//! Minimal binary: parses a hard-coded status line (no serial port).
//! Confirms the parser and state types are wired correctly.

use grbl_streamer::parser::LineParser;
use grbl_streamer::state::ActiveState;

fn main() {
    let line = "<Idle|MPos:0.000,0.000,0.000|WPos:0.000,0.000,0.000|FS:0,0>\n";
    let mut parser = LineParser::new();
    parser.feed(line.as_bytes());
    println!("state: {:?}", parser.state.active_state);
    println!("work position: {:?}", parser.state.work_position);
    assert!(matches!(parser.state.active_state, ActiveState::Idle));
}
