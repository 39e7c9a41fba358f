//! ISO-8601 duration form used by `OperationTimeout` and shell `Lifetime`.
//!
//! WinRM only needs the `PT{seconds}S` shape. Sub-second durations round up
//! so a nonzero timeout never serializes as `PT0S`.

use std::time::Duration;

use crate::ProtocolFault;

pub fn to_iso8601(duration: Duration) -> String {
    let mut seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        seconds += 1;
    }
    format!("PT{seconds}S")
}

pub fn from_iso8601(text: &str) -> Result<Duration, ProtocolFault> {
    let seconds = text
        .strip_prefix("PT")
        .and_then(|rest| rest.strip_suffix('S'))
        .and_then(|digits| digits.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| ProtocolFault::unexpected(format!("invalid duration: {text}")))?;

    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_seconds() {
        assert_eq!(to_iso8601(Duration::from_secs(1)), "PT1S");
        assert_eq!(to_iso8601(Duration::from_secs(60)), "PT60S");
        assert_eq!(to_iso8601(Duration::ZERO), "PT0S");
    }

    #[test]
    fn subsecond_rounds_up() {
        assert_eq!(to_iso8601(Duration::from_millis(500)), "PT1S");
        assert_eq!(to_iso8601(Duration::from_millis(1500)), "PT2S");
    }

    #[test]
    fn parses_back() {
        assert_eq!(from_iso8601("PT20S").unwrap(), Duration::from_secs(20));
        assert_eq!(from_iso8601("PT1.5S").unwrap(), Duration::from_secs_f64(1.5));
        assert!(from_iso8601("20S").is_err());
        assert!(from_iso8601("PT-1S").is_err());
    }
}
