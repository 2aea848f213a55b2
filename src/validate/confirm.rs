//! Operator confirmation for statements that cannot be dry-run

use super::error::ConfirmError;
use std::io;
use std::sync::Arc;

/// Callback asked to approve a statement; receives the full prompt text
pub type ConfirmFn = Arc<dyn Fn(&str) -> io::Result<bool> + Send + Sync>;

/// Ask the operator to approve `stmt`, which could not be checked for `reason`
///
/// # Errors
///
/// `ConfirmError::Required` when no callback is configured or the answer is
/// negative, `ConfirmError::Prompt` when the callback fails. The answer is
/// final; nothing is retried.
pub fn fallback_confirm(confirm: Option<&ConfirmFn>, stmt: &str, reason: &str) -> Result<(), ConfirmError> {
    let Some(confirm) = confirm else {
        return Err(ConfirmError::Required {
            reason: reason.to_string(),
        });
    };

    if confirm(&format!("{reason}\n{stmt}"))? {
        Ok(())
    } else {
        Err(ConfirmError::Required {
            reason: reason.to_string(),
        })
    }
}
