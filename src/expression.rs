//! Inline `[...]` arithmetic expression translation.
//!
//! A substring matching a bracketed group is evaluated as an arithmetic
//! expression in a context combining caller-supplied variables with
//! forced-override machine variables (`posx`..`posc`, from the current work
//! position) and bounds defaults (`xmin`/`xmax`/`ymin`/`ymax`/`zmin`/`zmax`
//! = 0). `posx`..`posc` always win over a caller-supplied value of the same
//! name; the bounds defaults are only a fallback the caller can override.
//!
//! Evaluation itself is delegated to the `evalexpr` crate — none of the
//! example repos in this pack embeds its own arithmetic evaluator, so this
//! is the one dependency genuinely new to the stack (see DESIGN.md).

use crate::state::Position;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value};
use std::collections::HashMap;
use tracing::warn;

pub type ExprContext = HashMap<String, f64>;

const BOUNDS_DEFAULTS: [(&str, f64); 6] = [
    ("xmin", 0.0),
    ("xmax", 0.0),
    ("ymin", 0.0),
    ("ymax", 0.0),
    ("zmin", 0.0),
    ("zmax", 0.0),
];

/// Translates every `[...]` group in `line`. On evaluation failure for a
/// given group, the error is logged and that group is left unsubstituted
/// (§4.6) — the rest of the line still translates normally.
pub fn translate(line: &str, context: &ExprContext, position: &Position) -> String {
    if !line.contains('[') {
        return line.to_string();
    }

    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            if let Some(rel_end) = chars[i + 1..].iter().position(|&c| c == ']') {
                let end = i + 1 + rel_end;
                let expr: String = chars[i + 1..end].iter().collect();
                match evaluate(&expr, context, position) {
                    Ok(value) => out.push_str(&format_number(value)),
                    Err(err) => {
                        warn!(%expr, %err, "expression evaluation failed, leaving bracket unsubstituted");
                        out.push('[');
                        out.push_str(&expr);
                        out.push(']');
                    }
                }
                i = end + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Evaluates a single arithmetic expression (the text inside one `[...]`
/// group) against the combined context.
pub fn evaluate(
    expr: &str,
    context: &ExprContext,
    position: &Position,
) -> Result<f64, evalexpr::EvalexprError> {
    let mut ctx = HashMapContext::new();

    for (key, value) in BOUNDS_DEFAULTS {
        ctx.set_value(key.to_string(), Value::Float(value))?;
    }
    for (key, value) in context {
        ctx.set_value(key.clone(), Value::Float(*value))?;
    }
    for (key, value) in [
        ("posx", position.x),
        ("posy", position.y),
        ("posz", position.z),
        ("posa", position.a),
        ("posb", position.b),
        ("posc", position.c),
    ] {
        ctx.set_value(key.to_string(), Value::Float(value))?;
    }

    evalexpr::eval_number_with_context(expr, &ctx)
}

/// Formats a number the way a G-code value is expected to read: integral
/// results print without a decimal point, fractional ones are trimmed of
/// trailing zeros.
fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        let s = format!("{value:.4}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
