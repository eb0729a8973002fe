//! Mode name normalization
//!
//! The library only accepts the canonical `stream` / `logged` names. Field
//! scripts and config files have historically used many spellings, so the CLI
//! maps those onto the canonical modes before building a session.

use j1939_capture::Mode;

const STREAM_ALIASES: &[&str] = &[
    "stream", "streaming", "datastream", "data-stream", "data_stream", "data", "s", "strm",
    "live", "livestream", "live-stream", "realtime", "real-time", "on-the-fly", "monitor",
];

const LOGGED_ALIASES: &[&str] = &[
    "logged", "log", "logging", "l", "logfile", "log-file", "log_file", "save", "saved",
    "record", "recorded", "rec", "archive", "archived", "persist", "persistent", "file",
    "to-file", "to_file",
];

/// Resolve a user-supplied mode name to a canonical mode
///
/// Matching ignores case, surrounding whitespace, and treats spaces like
/// hyphens ("live stream" == "live-stream").
pub fn normalize_mode(input: &str) -> Option<Mode> {
    let key = input.trim().to_ascii_lowercase().replace(' ', "-");
    if STREAM_ALIASES.contains(&key.as_str()) {
        Some(Mode::Stream)
    } else if LOGGED_ALIASES.contains(&key.as_str()) {
        Some(Mode::Logged)
    } else {
        None
    }
}

/// Like [`normalize_mode`], but falls back to the library's strict parser so
/// the error message is the canonical `InvalidMode` one
pub fn resolve_mode(input: &str) -> j1939_capture::Result<Mode> {
    match normalize_mode(input) {
        Some(mode) => Ok(mode),
        None => input.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_canonical_modes() {
        for alias in ["stream", "Live", "real-time", " data stream ", "monitor"] {
            assert_eq!(normalize_mode(alias), Some(Mode::Stream), "{alias}");
        }
        for alias in ["logged", "LOGGING", "record", "log file", "persist"] {
            assert_eq!(normalize_mode(alias), Some(Mode::Logged), "{alias}");
        }
    }

    #[test]
    fn test_alias_tables_do_not_overlap() {
        for alias in STREAM_ALIASES {
            assert!(!LOGGED_ALIASES.contains(alias), "{alias} is ambiguous");
        }
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert_eq!(normalize_mode("blf"), None);
        assert!(matches!(
            resolve_mode("blf"),
            Err(j1939_capture::CaptureError::InvalidMode(_))
        ));
    }
}
