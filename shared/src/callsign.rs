use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated station identifier of the form `BASE[-SSID]`.
///
/// `BASE` is 3-6 uppercase ASCII alphanumerics starting with a letter.
/// `SSID`, when present, is 1-2 uppercase alphanumerics; a purely numeric
/// SSID must fall in `[1,15]` (`0` is reserved and rejected). Total length
/// (base plus the `-SSID` suffix) is capped at 9.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Callsign(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallsignError {
    #[error("callsign is longer than 9 characters")]
    TooLong,
    #[error("callsign base must be 3-6 characters starting with a letter")]
    InvalidBase,
    #[error("ssid must be 1-2 alphanumeric characters")]
    InvalidSsid,
    #[error("numeric ssid must be in 1..=15")]
    SsidOutOfRange,
    #[error("callsign is empty")]
    Empty,
}

const MAX_TOTAL_LEN: usize = 9;

impl Callsign {
    pub fn parse(raw: &str) -> Result<Self, CallsignError> {
        if raw.is_empty() {
            return Err(CallsignError::Empty);
        }
        let upper = raw.to_ascii_uppercase();
        if upper.len() > MAX_TOTAL_LEN {
            return Err(CallsignError::TooLong);
        }

        let (base, ssid) = match upper.split_once('-') {
            Some((b, s)) => (b, Some(s)),
            None => (upper.as_str(), None),
        };

        if !(3..=6).contains(&base.len()) {
            return Err(CallsignError::InvalidBase);
        }
        let mut chars = base.chars();
        let first = chars.next().ok_or(CallsignError::InvalidBase)?;
        if !first.is_ascii_alphabetic() {
            return Err(CallsignError::InvalidBase);
        }
        if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CallsignError::InvalidBase);
        }

        if let Some(ssid) = ssid {
            if ssid.is_empty() || ssid.len() > 2 || !ssid.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(CallsignError::InvalidSsid);
            }
            if let Ok(n) = ssid.parse::<u32>() {
                if n == 0 || n > 15 {
                    return Err(CallsignError::SsidOutOfRange);
                }
            }
            // non-numeric SSIDs (e.g. "AB") are accepted as-is.
        }

        Ok(Callsign(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Callsign {
    type Error = CallsignError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Callsign::parse(&value)
    }
}

impl From<Callsign> for String {
    fn from(value: Callsign) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_callsigns() {
        assert!(Callsign::parse("K8XYZ").is_ok());
        assert!(Callsign::parse("N0CALL-11").is_ok());
    }

    #[test]
    fn normalizes_case() {
        assert_eq!(Callsign::parse("k8xyz").unwrap().as_str(), "K8XYZ");
    }

    #[test]
    fn rejects_known_bad_forms() {
        assert!(Callsign::parse("N0-5").is_err());
        assert!(Callsign::parse("-11").is_err());
        assert!(Callsign::parse("N8XYZ-0").is_err());
        assert!(Callsign::parse("N8XYZ-16").is_err());
        assert!(Callsign::parse("AB").is_err());
        assert!(Callsign::parse("TOOLONGCALL-1").is_err());
    }

    #[test]
    fn distinguishes_ssid_variants() {
        let a = Callsign::parse("N0CALL-1").unwrap();
        let b = Callsign::parse("N0CALL-2").unwrap();
        assert_ne!(a, b);
    }
}
