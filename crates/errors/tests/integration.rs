//! Integration tests for error types

#[cfg(test)]
mod tests {
    use leasehold_errors::*;

    #[test]
    fn test_error_conversion() {
        let pool_err = PoolError::NoFreeResource { resource_count: 2 };
        let err: Error = pool_err.into();
        assert!(matches!(err, Error::Pool(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidValue {
            field: "LEASEHOLD_FAIR".into(),
            value: "maybe".into(),
        };
        assert_eq!(err.to_string(), "invalid value for LEASEHOLD_FAIR: maybe");
    }

    #[test]
    fn test_cancelled_is_retryable() {
        let err = Error::Cancelled;
        assert!(err.is_cancelled());
        assert!(err.is_retryable());
        assert_eq!(err.user_code(), Some("error.cancelled"));
    }

    #[test]
    fn test_user_codes_are_forwarded() {
        let err: Error = PoolError::TimerUnavailable {
            message: "no runtime".into(),
        }
        .into();
        assert_eq!(err.user_code(), Some("pool.timer_unavailable"));
        assert!(err.user_hint().is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: Error = io_err.into();
        assert!(matches!(
            err,
            Error::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                ..
            }
        ));
    }
}
