use actix_web::http::StatusCode;
use shortgate::errors::{Result, ShortgateError};
use std::error::Error;

#[cfg(test)]
mod error_creation_tests {
    use super::*;

    #[test]
    fn test_storage_not_configured_error() {
        let error = ShortgateError::storage_not_configured("no backend");

        assert!(matches!(error, ShortgateError::StorageNotConfigured(_)));
        assert_eq!(error.code(), "E001");
        assert!(error.to_string().contains("Storage Not Configured"));
        assert!(error.to_string().contains("no backend"));
    }

    #[test]
    fn test_validation_error() {
        let error = ShortgateError::validation("bad url");

        assert!(matches!(error, ShortgateError::Validation(_)));
        assert_eq!(error.code(), "E006");
        assert_eq!(error.message(), "bad url");
        assert_eq!(error.format_simple(), "Validation Error: bad url");
    }

    #[test]
    fn test_every_variant_has_unique_code() {
        let errors = vec![
            ShortgateError::storage_not_configured("x"),
            ShortgateError::store_connection("x"),
            ShortgateError::store_operation("x"),
            ShortgateError::serialization("x"),
            ShortgateError::not_found("x"),
            ShortgateError::validation("x"),
            ShortgateError::password("x"),
            ShortgateError::probe("x"),
            ShortgateError::forward("x"),
            ShortgateError::notify("x"),
            ShortgateError::unauthorized("x"),
            ShortgateError::date_parse("x"),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}

#[cfg(test)]
mod http_mapping_tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ShortgateError::not_found("x").http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ShortgateError::validation("x").http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShortgateError::date_parse("x").http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShortgateError::unauthorized("x").http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ShortgateError::forward("x").http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ShortgateError::store_operation("x").http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ShortgateError::storage_not_configured("x").http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_public_message_hides_internal_details() {
        let internal = ShortgateError::store_operation("redis://secret-host:6379 refused");
        assert_eq!(internal.public_message(), "Internal Server Error");

        let upstream = ShortgateError::forward("https://internal.example.com timed out");
        assert_eq!(upstream.public_message(), "Upstream unavailable");

        let unbound = ShortgateError::storage_not_configured("backend = none");
        assert_eq!(unbound.public_message(), "Storage not configured");

        let client = ShortgateError::validation("subject cannot be empty");
        assert_eq!(client.public_message(), "subject cannot be empty");
    }
}

#[cfg(test)]
mod conversion_tests {
    use super::*;

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let error: ShortgateError = json_err.into();
        assert!(matches!(error, ShortgateError::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: ShortgateError = io_err.into();
        assert!(matches!(error, ShortgateError::StoreOperation(_)));
    }

    #[test]
    fn test_from_chrono_parse_error() {
        let parse_err = chrono::DateTime::parse_from_rfc3339("not a date").unwrap_err();
        let error: ShortgateError = parse_err.into();
        assert!(matches!(error, ShortgateError::DateParse(_)));
    }

    #[test]
    fn test_question_mark_propagation() {
        fn parse(input: &str) -> Result<serde_json::Value> {
            Ok(serde_json::from_str(input)?)
        }
        assert!(parse("{}").is_ok());
        assert!(matches!(parse("{"), Err(ShortgateError::Serialization(_))));
    }

    #[test]
    fn test_is_std_error() {
        let error = ShortgateError::notify("webhook down");
        let dyn_error: &dyn Error = &error;
        assert!(dyn_error.source().is_none());
        assert!(dyn_error.to_string().contains("webhook down"));
    }
}
