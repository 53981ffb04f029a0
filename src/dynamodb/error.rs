use std::fmt;

use thiserror::Error;

use crate::dynamodb::BatchRequest;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes the store returns when a request exceeded provisioned capacity.
///
/// Batch submissions failing with one of these are resubmitted by the retry
/// engine; every other error is surfaced to the caller unchanged.
pub const RETRYABLE_ERROR_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// A malformed schema, detected while a `Model` is being constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid schema{}: {rule}", attribute.as_deref().map(|a| format!(" for attribute \"{a}\"")).unwrap_or_default())]
pub struct SchemaValidationError {
    /// Dotted path of the offending attribute, if the rule is attribute-scoped.
    pub attribute: Option<String>,
    /// Human readable description of the violated rule.
    pub rule: String,
}

impl SchemaValidationError {
    pub(crate) fn attribute(attribute: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            rule: rule.into(),
        }
    }

    pub(crate) fn table(rule: impl Into<String>) -> Self {
        Self {
            attribute: None,
            rule: rule.into(),
        }
    }
}

/// All errors produced by models, the pipeline and the database adapters.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),

    /// An item failed alias resolution, type checking, validation or the
    /// required/nullable check.
    #[error("{0}")]
    ItemInput(String),

    /// A where-query or update input could not be turned into an expression.
    #[error("{message}: {value}")]
    InvalidExpression { message: String, value: String },

    /// The retry budget ran out with requests still unprocessed.
    #[error("batch operation gave up after {attempts} attempt(s) with {} unprocessed request(s)", remaining.len())]
    BatchExhausted {
        attempts: u32,
        remaining: Vec<BatchRequest>,
    },

    /// The store acknowledged an update without returning the updated record.
    #[error("update on table '{0}' returned no record")]
    MissingUpdateResult(String),

    #[error("connection to the database was refused")]
    ConnectionRefused(#[source] anyhow::Error),

    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("table '{table}' did not become active after {polls} poll(s)")]
    TableNotReady { table: String, polls: u32 },

    /// Any other failure reported by the database client.
    #[error("database client error{}: {source}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Client {
        code: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// A user supplied validator failed instead of returning a verdict.
    #[error("validator failed: {0}")]
    Validator(#[source] anyhow::Error),

    #[error(transparent)]
    Build(#[from] aws_sdk_dynamodb::error::BuildError),

    #[error(transparent)]
    Serde(#[from] serde_dynamo::Error),
}

impl Error {
    pub(crate) fn item_input(message: impl Into<String>) -> Self {
        Error::ItemInput(message.into())
    }

    pub(crate) fn invalid_expression(
        message: impl Into<String>,
        value: &impl fmt::Debug,
    ) -> Self {
        Error::InvalidExpression {
            message: message.into(),
            value: format!("{value:?}"),
        }
    }

    /// Wraps an arbitrary client failure, keeping the store's error code.
    pub fn client(code: Option<&str>, source: impl Into<anyhow::Error>) -> Self {
        Error::Client {
            code: code.map(str::to_string),
            source: source.into(),
        }
    }

    /// Returns the store error code, if the error carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Client { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether a failed batch submission may be resubmitted as a whole.
    pub fn is_retryable(&self) -> bool {
        self.code()
            .is_some_and(|code| RETRYABLE_ERROR_CODES.contains(&code))
    }
}
