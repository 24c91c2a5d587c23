use crate::define_domain_errors;
use crate::errors::{CqrsError, CqrsErrorCode};
use http::StatusCode;

define_domain_errors! {
    domain: "commit",
    prefix: 2,
    errors: {
        DuplicateCommand => (1, StatusCode::CONFLICT, "DUPLICATE_COMMAND"),
        DuplicateAggregateCreation => (2, StatusCode::CONFLICT, "DUPLICATE_AGGREGATE_CREATION"),
        AppendFailed => (3, StatusCode::INTERNAL_SERVER_ERROR, "APPEND_FAILED"),
        PublishFailed => (4, StatusCode::INTERNAL_SERVER_ERROR, "PUBLISH_FAILED"),
        RecoveryStreamMissing => (5, StatusCode::INTERNAL_SERVER_ERROR, "RECOVERY_STREAM_MISSING"),
        LookupFailed => (6, StatusCode::INTERNAL_SERVER_ERROR, "LOOKUP_FAILED"),
        HandlerNotInstalled => (7, StatusCode::INTERNAL_SERVER_ERROR, "HANDLER_NOT_INSTALLED"),
        RetryNotProduced => (8, StatusCode::INTERNAL_SERVER_ERROR, "RETRY_NOT_PRODUCED"),
    }
}

impl From<ErrorCode> for CqrsError {
    fn from(e: ErrorCode) -> Self {
        e.error(e.to_string())
    }
}
