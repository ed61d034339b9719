// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live in milliseconds. Zero means the entry never expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlMs(pub u64);

impl TtlMs {
    pub const PERMANENT: TtlMs = TtlMs(0);

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub fn is_permanent(&self) -> bool {
        self.0 == 0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for TtlMs {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

pub mod config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_zero_is_permanent() {
        assert!(TtlMs::PERMANENT.is_permanent());
        assert!(TtlMs::default().is_permanent());
        assert!(!TtlMs(1).is_permanent());
    }

    #[test]
    fn test_ttl_conversions() {
        assert_eq!(TtlMs::from_secs(3), TtlMs(3000));
        assert_eq!(TtlMs::from(Duration::from_millis(250)), TtlMs(250));
        assert_eq!(TtlMs(1500).as_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().starts_with("io:"));
    }
}
