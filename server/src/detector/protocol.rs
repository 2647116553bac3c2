//! The ingestion wire protocol.
//!
//! Newline-delimited ASCII, one sample per line:
//!
//! ```text
//! <name> <stamp> <value>\n
//! ```
//!
//! The protocol is write-only from the client's perspective; the server
//! never responds. Malformed lines are dropped without closing the
//! connection.

use thiserror::Error;

use crate::models::{Metric, MetricError};

/// Line parsing and validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed line, expected `name stamp value`")]
    Malformed,
    #[error("bad stamp: {0}")]
    BadStamp(std::num::ParseIntError),
    #[error("bad value: {0}")]
    BadValue(std::num::ParseFloatError),
    #[error("invalid metric: {0}")]
    Invalid(#[from] MetricError),
}

/// Parse one protocol line into a validated metric.
pub fn parse_line(line: &str) -> Result<Metric, ProtocolError> {
    let mut parts = line.split_whitespace();
    let name = parts.next().ok_or(ProtocolError::Malformed)?;
    let stamp: u32 = parts
        .next()
        .ok_or(ProtocolError::Malformed)?
        .parse()
        .map_err(ProtocolError::BadStamp)?;
    let value: f64 = parts
        .next()
        .ok_or(ProtocolError::Malformed)?
        .parse()
        .map_err(ProtocolError::BadValue)?;
    if parts.next().is_some() {
        return Err(ProtocolError::Malformed);
    }
    let m = Metric::new(name, stamp, value);
    m.validate()?;
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STAMP_HORIZON;

    #[test]
    fn test_parse_ok() {
        let m = parse_line("timer.count_ps.api 1452674178 3.14").unwrap();
        assert_eq!(m.name, "timer.count_ps.api");
        assert_eq!(m.stamp, 1452674178);
        assert!((m.value - 3.14).abs() < f64::EPSILON);
        assert_eq!((m.score, m.average, m.link), (0.0, 0.0, 0));
    }

    #[test]
    fn test_parse_accepts_float_forms() {
        assert!(parse_line("a.b 1452674178 1e3").is_ok());
        assert!(parse_line("a.b 1452674178 -0.5").is_ok());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_line(""), Err(ProtocolError::Malformed));
        assert_eq!(parse_line("a.b"), Err(ProtocolError::Malformed));
        assert_eq!(parse_line("a.b 1452674178"), Err(ProtocolError::Malformed));
        assert_eq!(
            parse_line("a.b 1452674178 1.0 extra"),
            Err(ProtocolError::Malformed)
        );
        assert!(matches!(
            parse_line("a.b notastamp 1.0"),
            Err(ProtocolError::BadStamp(_))
        ));
        assert!(matches!(
            parse_line("a.b 1452674178 notavalue"),
            Err(ProtocolError::BadValue(_))
        ));
    }

    #[test]
    fn test_parse_rejects_stale_stamp() {
        let line = format!("a.b {} 1.0", STAMP_HORIZON - 1);
        assert_eq!(
            parse_line(&line),
            Err(ProtocolError::Invalid(MetricError::StampTooSmall))
        );
    }
}
