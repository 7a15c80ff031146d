//! The command surface (§4.6): one dispatch table keyed by command name,
//! modeled as a tagged variant rather than stringly-typed dispatch (§9).
//! Deprecated aliases share the same enum so they go through one match arm
//! in the controller instead of a parallel lookup table.

use crate::expression::ExprContext;

/// Feed/spindle override adjustment, shared between `feedOverride` and
/// `spindleOverride` since both scale the same way (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideAdjust {
    Reset,
    CoarsePlus,
    CoarseMinus,
    FinePlus,
    FineMinus,
}

impl OverrideAdjust {
    /// Parses the override value `v` from the command surface (`0, +10,
    /// -10, +1, -1`).
    pub fn from_value(v: i32) -> Option<Self> {
        match v {
            0 => Some(OverrideAdjust::Reset),
            10 => Some(OverrideAdjust::CoarsePlus),
            -10 => Some(OverrideAdjust::CoarseMinus),
            1 => Some(OverrideAdjust::FinePlus),
            -1 => Some(OverrideAdjust::FineMinus),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RapidOverride {
    Full,
    Half,
    Quarter,
}

impl RapidOverride {
    pub fn from_value(v: i32) -> Option<Self> {
        match v {
            0 | 100 => Some(RapidOverride::Full),
            50 => Some(RapidOverride::Half),
            25 => Some(RapidOverride::Quarter),
            _ => None,
        }
    }
}

/// The full command surface a client can invoke. `Start`/`Stop`/`Pause`/
/// `Resume` are the deprecated aliases for their `Gcode*` equivalents.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Gcode {
        lines: Vec<String>,
        context: ExprContext,
    },
    GcodeLoad {
        name: String,
        gcode: String,
        context: ExprContext,
    },
    GcodeUnload,
    GcodeStart,
    GcodeStop,
    GcodePause,
    GcodeResume,
    FeedHold,
    CycleStart,
    StatusReport,
    Homing,
    Sleep,
    Unlock,
    Reset,
    FeedOverride(OverrideAdjust),
    SpindleOverride(OverrideAdjust),
    RapidOverride(RapidOverride),
    LaserTestOn {
        power: f64,
        duration_ms: u64,
    },
    LaserTestOff,
    MacroRun {
        id: String,
        context: ExprContext,
    },
    MacroLoad {
        id: String,
        context: ExprContext,
    },
    WatchdirLoad {
        file: String,
    },
    /// Deprecated alias for `GcodeStart`.
    Start,
    /// Deprecated alias for `GcodeStop`.
    Stop,
    /// Deprecated alias for `GcodePause`.
    Pause,
    /// Deprecated alias for `GcodeResume`.
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_adjust_parses_known_values() {
        assert_eq!(OverrideAdjust::from_value(0), Some(OverrideAdjust::Reset));
        assert_eq!(
            OverrideAdjust::from_value(10),
            Some(OverrideAdjust::CoarsePlus)
        );
        assert_eq!(
            OverrideAdjust::from_value(-10),
            Some(OverrideAdjust::CoarseMinus)
        );
        assert_eq!(OverrideAdjust::from_value(1), Some(OverrideAdjust::FinePlus));
        assert_eq!(
            OverrideAdjust::from_value(-1),
            Some(OverrideAdjust::FineMinus)
        );
        assert_eq!(OverrideAdjust::from_value(42), None);
    }

    #[test]
    fn rapid_override_treats_0_and_100_as_full() {
        assert_eq!(RapidOverride::from_value(0), Some(RapidOverride::Full));
        assert_eq!(RapidOverride::from_value(100), Some(RapidOverride::Full));
        assert_eq!(RapidOverride::from_value(50), Some(RapidOverride::Half));
        assert_eq!(RapidOverride::from_value(25), Some(RapidOverride::Quarter));
        assert_eq!(RapidOverride::from_value(33), None);
    }
}
