use crate::core::{InvoiceError, InvoiceResult};
use crate::models::InvoiceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Analyze,
    Validate,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Analyze => "analyze",
            Action::Validate => "validate",
            Action::Export => "export",
        }
    }
}

/// Whether `action` may run on an invoice in `status`.
///
/// - analyze: anything but `validated` (validated values are frozen)
/// - validate: `processed`, or `validated` for an idempotent re-apply
/// - export: `validated` only
pub fn ensure_allowed(action: Action, status: InvoiceStatus) -> InvoiceResult<()> {
    use InvoiceStatus::*;

    let allowed = match action {
        Action::Analyze => matches!(status, Pending | Processed | Error),
        Action::Validate => matches!(status, Processed | Validated),
        Action::Export => status == Validated,
    };
    if allowed {
        Ok(())
    } else {
        Err(InvoiceError::InvalidTransition {
            action: action.as_str(),
            status,
        })
    }
}

pub fn after_analyze(succeeded: bool) -> InvoiceStatus {
    if succeeded {
        InvoiceStatus::Processed
    } else {
        InvoiceStatus::Error
    }
}
