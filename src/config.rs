//! Evaluation settings threaded through kernel synthesis.

use std::fmt;

/// How strictly a conversion checks the values it converts.
///
/// Modes are ordered by strictness; each mode performs every check of the
/// modes before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum AssignErrorMode {
    /// No checks; out-of-range values wrap or saturate like `as` casts.
    None = 0,
    /// Raise when a value does not fit the destination range.
    Overflow = 1,
    /// Also raise when a fractional part would be dropped.
    #[default]
    Fractional = 2,
    /// Also raise when the destination cannot hold the value exactly.
    Inexact = 3,
}

impl AssignErrorMode {
    /// All modes, weakest first.
    pub const ALL: [AssignErrorMode; 4] = [
        AssignErrorMode::None,
        AssignErrorMode::Overflow,
        AssignErrorMode::Fractional,
        AssignErrorMode::Inexact,
    ];

    #[inline]
    pub(crate) const fn from_u8(v: u8) -> AssignErrorMode {
        match v {
            0 => AssignErrorMode::None,
            1 => AssignErrorMode::Overflow,
            2 => AssignErrorMode::Fractional,
            _ => AssignErrorMode::Inexact,
        }
    }

    /// Parse a mode name as accepted by `DTYPE_ERRMODE`.
    pub fn parse(name: &str) -> Option<AssignErrorMode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(AssignErrorMode::None),
            "overflow" => Some(AssignErrorMode::Overflow),
            "fractional" => Some(AssignErrorMode::Fractional),
            "inexact" => Some(AssignErrorMode::Inexact),
            _ => None,
        }
    }
}

impl fmt::Display for AssignErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssignErrorMode::None => "none",
            AssignErrorMode::Overflow => "overflow",
            AssignErrorMode::Fractional => "fractional",
            AssignErrorMode::Inexact => "inexact",
        };
        f.write_str(name)
    }
}

/// Settings for kernel synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvalContext {
    /// Error mode used when a caller does not pass one explicitly.
    pub errmode: AssignErrorMode,
    /// Emit a summary of every finished kernel tree.
    pub trace: bool,
}

impl EvalContext {
    /// Build a context from `DTYPE_ERRMODE` and `DTYPE_TRACE`.
    ///
    /// Missing or unparseable variables keep the defaults.
    pub fn from_env() -> Self {
        let errmode = std::env::var("DTYPE_ERRMODE")
            .ok()
            .and_then(|v| AssignErrorMode::parse(&v))
            .unwrap_or_default();
        let trace = matches!(std::env::var("DTYPE_TRACE"), Ok(ref v) if v == "1");
        EvalContext { errmode, trace }
    }

    /// Same context with a different default error mode.
    pub fn with_errmode(self, errmode: AssignErrorMode) -> Self {
        EvalContext { errmode, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errmode_ordering() {
        assert!(AssignErrorMode::None < AssignErrorMode::Overflow);
        assert!(AssignErrorMode::Overflow < AssignErrorMode::Fractional);
        assert!(AssignErrorMode::Fractional < AssignErrorMode::Inexact);
        assert_eq!(AssignErrorMode::default(), AssignErrorMode::Fractional);
    }

    #[test]
    fn test_errmode_parse_and_display() {
        for mode in AssignErrorMode::ALL {
            assert_eq!(AssignErrorMode::parse(&mode.to_string()), Some(mode));
            assert_eq!(AssignErrorMode::from_u8(mode as u8), mode);
        }
        assert_eq!(AssignErrorMode::parse(" Overflow "), Some(AssignErrorMode::Overflow));
        assert_eq!(AssignErrorMode::parse("lossy"), None);
    }

    #[test]
    fn test_with_errmode() {
        let ctx = EvalContext::default().with_errmode(AssignErrorMode::Inexact);
        assert_eq!(ctx.errmode, AssignErrorMode::Inexact);
        assert!(!ctx.trace);
    }
}
