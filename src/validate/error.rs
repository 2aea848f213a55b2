//! Validation error types

use super::dialect::StatementType;
use crate::executor::DbError;
use std::io;
use thiserror::Error;

/// Transaction markers that do not pair up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("nested BEGIN not allowed (statement {index})")]
    NestedBegin { index: usize },
    #[error("COMMIT without BEGIN (statement {index})")]
    CommitWithoutBegin { index: usize },
    #[error("unterminated BEGIN block (opened at statement {index})")]
    UnterminatedBegin { index: usize },
}

/// Operator confirmation did not allow the statement through
#[derive(Debug, Error)]
pub enum ConfirmError {
    /// No callback configured, or the operator answered no
    #[error("confirmation required to skip automatic validation: {reason}")]
    Required { reason: String },
    /// The callback itself failed (e.g. stdin closed)
    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] io::Error),
}

/// Why a statement failed validation
#[derive(Debug, Error)]
pub enum ValidationCause {
    #[error(transparent)]
    Confirm(#[from] ConfirmError),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// A statement that did not pass validation
#[derive(Debug, Error)]
pub struct ValidationError {
    pub statement: String,
    pub reason: String,
    #[source]
    pub cause: Option<ValidationCause>,
    pub statement_type: StatementType,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {} ({})", self.statement_type, self.reason, cause)?,
            None => write!(f, "{}: {}", self.statement_type, self.reason)?,
        }
        write!(f, "\n  statement: {}", preview(&self.statement))
    }
}

impl ValidationError {
    /// True when the statement needs operator confirmation that was not given
    pub fn is_confirm_required(&self) -> bool {
        matches!(
            self.cause,
            Some(ValidationCause::Confirm(ConfirmError::Required { .. }))
        )
    }
}

fn preview(stmt: &str) -> String {
    const MAX: usize = 200;
    let one_line = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() > MAX {
        format!("{}...", one_line.chars().take(MAX).collect::<String>())
    } else {
        one_line
    }
}

/// Failure of a whole `validate_sql` call
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("database connection parameters are missing a DSN")]
    MissingDsn,
    #[error("empty SQL input")]
    Empty,
    #[error("SQL input too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("no statements found")]
    NoStatements,
    #[error("too many statements: {count} (limit {limit})")]
    TooManyStatements { count: usize, limit: usize },
    #[error(transparent)]
    Blocks(#[from] BlockError),
    #[error("could not open validation connection: {0}")]
    Connect(#[source] DbError),
    #[error("could not open validation transaction: {0}")]
    Transaction(#[source] DbError),
    #[error(transparent)]
    Statement(#[from] ValidationError),
}

impl ValidateError {
    /// The failing statement, when the failure is statement-specific
    pub fn statement(&self) -> Option<&ValidationError> {
        match self {
            ValidateError::Statement(e) => Some(e),
            _ => None,
        }
    }
}
