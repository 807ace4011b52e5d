//! AWS client errors
//!
//! The `aws` CLI reports service errors on stderr as
//! `An error occurred (<Code>) when calling the <Operation> operation: <message>`.
//! `AwsError::from_cli_stderr` turns that line into a classified variant so
//! callers can decide between retrying, failing fast and treating the
//! resource as absent.

use thiserror::Error;

/// Error codes AWS uses for request throttling
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
    "RequestThrottledException",
    "SlowDown",
    "PriorRequestNotComplete",
];

/// Error codes for service-side faults worth retrying
const UNAVAILABLE_CODES: &[&str] = &[
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "ServiceFailure",
    "InternalFailure",
    "InternalError",
    "ServerException",
    "RequestTimeout",
    "RequestTimeoutException",
];

const PERMISSION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnauthorizedException",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "ExpiredToken",
    "ExpiredTokenException",
    "AuthFailure",
];

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NoSuchEntityException",
    "InvalidSubnetID.NotFound",
    "InvalidVpcID.NotFound",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "EntityAlreadyExistsException",
    "ResourceInUseException",
];

/// Errors that can occur when calling AWS
#[derive(Debug, Error)]
pub enum AwsError {
    /// Request throttled by the service
    #[error("AWS throttled {operation}: {message}")]
    Throttled { operation: String, message: String },

    /// Service-side fault or network failure
    #[error("AWS service unavailable during {operation}: {message}")]
    Unavailable { operation: String, message: String },

    /// Caller lacks permission; the message is AWS's own text
    #[error("access denied for {operation}: {message}")]
    AccessDenied { operation: String, message: String },

    /// Resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource with that name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Any other service error
    #[error("AWS error {code} during {operation}: {message}")]
    Api {
        code: String,
        operation: String,
        message: String,
    },

    /// The CLI could not be run or exited without a service error
    #[error("aws CLI failed: {0}")]
    Cli(String),

    /// Call exceeded its timeout
    #[error("aws call timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Unexpected response shape
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AwsError {
    /// Classify a service error code
    pub fn from_code(code: &str, operation: &str, message: &str) -> Self {
        let operation = operation.to_string();
        let message = message.to_string();
        if THROTTLING_CODES.contains(&code) {
            Self::Throttled { operation, message }
        } else if UNAVAILABLE_CODES.contains(&code) {
            Self::Unavailable { operation, message }
        } else if PERMISSION_CODES.contains(&code) {
            Self::AccessDenied { operation, message }
        } else if NOT_FOUND_CODES.contains(&code) {
            Self::NotFound(message)
        } else if ALREADY_EXISTS_CODES.contains(&code) {
            Self::AlreadyExists(message)
        } else {
            Self::Api {
                code: code.to_string(),
                operation,
                message,
            }
        }
    }

    /// Parse the CLI's stderr; `fallback_operation` names the command when stderr has no operation
    pub fn from_cli_stderr(stderr: &str, fallback_operation: &str) -> Self {
        let Some(line) = stderr
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("An error occurred ("))
        else {
            let trimmed = stderr.trim();
            if trimmed.contains("Could not connect to the endpoint URL")
                || trimmed.contains("Connection was closed")
                || trimmed.contains("Read timeout")
            {
                return Self::Unavailable {
                    operation: fallback_operation.to_string(),
                    message: trimmed.to_string(),
                };
            }
            if trimmed.contains("Unable to locate credentials") {
                return Self::AccessDenied {
                    operation: fallback_operation.to_string(),
                    message: trimmed.to_string(),
                };
            }
            return Self::Cli(trimmed.to_string());
        };

        let rest = &line["An error occurred (".len()..];
        let Some((code, rest)) = rest.split_once(')') else {
            return Self::Cli(line.to_string());
        };
        let operation = rest
            .trim_start()
            .strip_prefix("when calling the ")
            .and_then(|r| r.split_once(" operation"))
            .map_or(fallback_operation, |(op, _)| op);
        let message = rest.split_once(": ").map_or("", |(_, m)| m);
        Self::from_code(code, operation, message)
    }

    /// Retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Unavailable { .. } | Self::Timeout { .. }
        )
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_is_transient() {
        let err = AwsError::from_cli_stderr(
            "\nAn error occurred (Throttling) when calling the CreatePolicy operation: Rate exceeded\n",
            "iam create-policy",
        );
        assert!(matches!(err, AwsError::Throttled { .. }));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "AWS throttled CreatePolicy: Rate exceeded");
    }

    #[test]
    fn test_access_denied_keeps_message() {
        let err = AwsError::from_cli_stderr(
            "An error occurred (AccessDenied) when calling the CreateRole operation: User: arn:aws:iam::1:user/x is not authorized to perform: iam:CreateRole",
            "iam create-role",
        );
        assert!(err.is_permission());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("is not authorized to perform: iam:CreateRole"));
    }

    #[test]
    fn test_not_found_codes() {
        let err = AwsError::from_cli_stderr(
            "An error occurred (ResourceNotFoundException) when calling the DescribeCluster operation: No cluster found for name: demo.",
            "eks describe-cluster",
        );
        assert!(err.is_not_found());

        let err = AwsError::from_cli_stderr(
            "An error occurred (NoSuchEntity) when calling the GetRole operation: The role with name x cannot be found.",
            "iam get-role",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_code_is_api_error() {
        let err = AwsError::from_cli_stderr(
            "An error occurred (InvalidParameterException) when calling the CreateCluster operation: bad subnet",
            "eks create-cluster",
        );
        match err {
            AwsError::Api { code, operation, .. } => {
                assert_eq!(code, "InvalidParameterException");
                assert_eq!(operation, "CreateCluster");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_stderr() {
        let err = AwsError::from_cli_stderr("Could not connect to the endpoint URL: \"https://eks.x\"", "eks list");
        assert!(err.is_transient());

        let err = AwsError::from_cli_stderr("Unable to locate credentials. You can configure credentials by running \"aws configure\".", "sts");
        assert!(err.is_permission());

        let err = AwsError::from_cli_stderr("usage: aws [options]", "eks");
        assert!(matches!(err, AwsError::Cli(_)));
    }
}
