//! Domain-level error types.
//!
//! These errors are transport agnostic. The excluded request-handling layer
//! maps them to HTTP status classes; the core only guarantees that every
//! business outcome keeps its own [`ErrorCode`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// The caller may not act on the addressed resource.
    Forbidden,
    /// The requested resource does not exist.
    NotFound,
    /// Not enough stock remains to satisfy a reservation.
    OutOfStock,
    /// The coupon has reached its issuance cap.
    LimitExceeded,
    /// The user already holds the coupon.
    AlreadyIssued,
    /// The coupon is disabled, expired, or not yet active.
    CouponUnavailable,
    /// The balance cannot cover the debit.
    InsufficientBalance,
    /// The order is not in a state that permits the transition.
    InvalidState,
    /// A resource lease could not be acquired within the wait budget.
    LockTimeout,
    /// Optimistic retries were exhausted by version conflicts.
    RetryExhausted,
    /// A store or coordination service is unreachable.
    ServiceUnavailable,
    /// An unexpected error occurred inside the domain.
    InternalError,
}

impl ErrorCode {
    /// Whether the whole request may succeed if the caller tries again.
    ///
    /// Only transient contention qualifies. Business-terminal outcomes such
    /// as [`ErrorCode::OutOfStock`] never change on retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::LockTimeout | Self::RetryExhausted)
    }
}

/// Domain error payload.
///
/// ## Invariants
/// - `message` must be non-empty once trimmed of whitespace.
///
/// # Examples
/// ```
/// use commerce_backend::domain::{Error, ErrorCode};
///
/// let err = Error::out_of_stock("product 42 has 0 left");
/// assert_eq!(err.code(), ErrorCode::OutOfStock);
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
#[serde(try_from = "ErrorDto", into = "ErrorDto")]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Validation errors emitted by the constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorValidationError {
    /// The message was empty after trimming.
    EmptyMessage,
}

impl std::fmt::Display for ErrorValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "error message must not be empty"),
        }
    }
}

impl std::error::Error for ErrorValidationError {}

macro_rules! error_constructors {
    ($($(#[$meta:meta])* $name:ident => $code:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(ErrorCode::$code, message)
            }
        )*
    };
}

impl Error {
    /// Create a new error, panicking if validation fails.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        match Self::try_new(code, message) {
            Ok(value) => value,
            Err(err) => panic!("error messages must satisfy validation: {err}"),
        }
    }

    /// Fallible constructor that validates the message content.
    pub fn try_new(
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<Self, ErrorValidationError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ErrorValidationError::EmptyMessage);
        }
        Ok(Self {
            code,
            message,
            details: None,
        })
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message returned to adapters.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details for adapters.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Shorthand for [`ErrorCode::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Attach structured details to the error.
    ///
    /// # Examples
    /// ```
    /// use commerce_backend::domain::Error;
    /// use serde_json::json;
    ///
    /// let err = Error::insufficient_balance("balance too low")
    ///     .with_details(json!({ "required": 5_000 }));
    /// assert!(err.details().is_some());
    /// ```
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    error_constructors! {
        /// Convenience constructor for [`ErrorCode::InvalidRequest`].
        invalid_request => InvalidRequest,
        /// Convenience constructor for [`ErrorCode::Forbidden`].
        forbidden => Forbidden,
        /// Convenience constructor for [`ErrorCode::NotFound`].
        not_found => NotFound,
        /// Convenience constructor for [`ErrorCode::OutOfStock`].
        out_of_stock => OutOfStock,
        /// Convenience constructor for [`ErrorCode::LimitExceeded`].
        limit_exceeded => LimitExceeded,
        /// Convenience constructor for [`ErrorCode::AlreadyIssued`].
        already_issued => AlreadyIssued,
        /// Convenience constructor for [`ErrorCode::CouponUnavailable`].
        coupon_unavailable => CouponUnavailable,
        /// Convenience constructor for [`ErrorCode::InsufficientBalance`].
        insufficient_balance => InsufficientBalance,
        /// Convenience constructor for [`ErrorCode::InvalidState`].
        invalid_state => InvalidState,
        /// Convenience constructor for [`ErrorCode::LockTimeout`].
        lock_timeout => LockTimeout,
        /// Convenience constructor for [`ErrorCode::RetryExhausted`].
        retry_exhausted => RetryExhausted,
        /// Convenience constructor for [`ErrorCode::ServiceUnavailable`].
        service_unavailable => ServiceUnavailable,
        /// Convenience constructor for [`ErrorCode::InternalError`].
        internal => InternalError,
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDto {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl From<Error> for ErrorDto {
    fn from(value: Error) -> Self {
        Self {
            code: value.code,
            message: value.message,
            details: value.details,
        }
    }
}

impl TryFrom<ErrorDto> for Error {
    type Error = ErrorValidationError;

    fn try_from(value: ErrorDto) -> Result<Self, Self::Error> {
        let ErrorDto {
            code,
            message,
            details,
        } = value;

        let mut error = Error::try_new(code, message)?;
        error.details = details;
        Ok(error)
    }
}
