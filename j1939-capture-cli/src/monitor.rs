//! Live signal monitor
//!
//! Prints one line per J1939 frame with the source address, PGN and every
//! catalog signal that fits the payload:
//!
//! ```text
//! SRC  61  PGN 0xF00E  nox=   40.00 ppm  o2=   -6.86 %
//! ```

use j1939_capture::{Frame, LogRecord, SignalCatalog};

/// Frames from this source address are not shown
const IGNORED_SOURCE: u8 = 0;

/// Format a monitor line, or `None` if the frame should not be shown
///
/// Standard frames and frames from the ignored source are dropped.
pub fn format_line(frame: &Frame, record: &LogRecord, catalog: &SignalCatalog) -> Option<String> {
    let source = record.identifier.source?;
    let pgn = record.identifier.pgn?;
    if source == IGNORED_SOURCE {
        return None;
    }

    let mut line = format!("SRC {:>3}  PGN 0x{:04X}", source, pgn);
    for (signal, value) in catalog.extract_all(&frame.data, false) {
        line.push_str(&format!("  {}={:>8.2}", signal.name, value));
        if let Some(unit) = &signal.unit {
            line.push(' ');
            line.push_str(unit);
        }
    }
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use j1939_capture::{j1939, Direction, SignalDefinition};

    fn record_for(frame: &Frame) -> LogRecord {
        LogRecord {
            sequence: 1,
            relative_time: 0.0,
            direction: Direction::Receive,
            identifier: j1939::decode(frame.arbitration_id, frame.is_extended),
            data_hex: frame.data_hex(),
            signals: Vec::new(),
        }
    }

    #[test]
    fn test_line_lists_signals_with_units() {
        let catalog = SignalCatalog::builtin();
        let frame = Frame::extended(0x18F00E3D, &[0x20, 0x10], 0.0);
        let line = format_line(&frame, &record_for(&frame), &catalog).unwrap();

        assert!(line.starts_with("SRC  61  PGN 0xF00E"), "{line}");
        // 0x20 * 0.05 - 200
        assert!(line.contains("nox= -198.40 ppm"), "{line}");
        assert!(line.contains("o2="), "{line}");
        assert!(line.ends_with('%'), "{line}");
    }

    #[test]
    fn test_short_payload_drops_signals_that_do_not_fit() {
        let catalog = SignalCatalog::builtin();
        let frame = Frame::extended(0x18F00E3D, &[0x20], 0.0);
        let line = format_line(&frame, &record_for(&frame), &catalog).unwrap();
        assert!(line.contains("nox="));
        assert!(!line.contains("o2="));
    }

    #[test]
    fn test_ignored_and_standard_frames_are_hidden() {
        let catalog = SignalCatalog::builtin();
        let from_zero = Frame::extended(0x18F00E00, &[0x20, 0x10], 0.0);
        assert!(format_line(&from_zero, &record_for(&from_zero), &catalog).is_none());

        let standard = Frame::standard(0x123, &[0x20, 0x10], 0.0);
        assert!(format_line(&standard, &record_for(&standard), &catalog).is_none());
    }

    #[test]
    fn test_extra_and_overridden_signals_are_printed() {
        let catalog = SignalCatalog::builtin()
            .with_signal(SignalDefinition::new("egt", 2, 1.0, 40.0).with_unit("degC"))
            .with_signal(SignalDefinition::new("nox", 0, 1.0, 0.0));

        let frame = Frame::extended(0x18F00E3D, &[100, 0, 140], 0.0);
        let line = format_line(&frame, &record_for(&frame), &catalog).unwrap();
        assert!(line.contains("egt=  100.00 degC"), "{line}");
        assert!(line.contains("nox=  100.00"), "{line}");
    }
}
