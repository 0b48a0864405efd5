use std::num::NonZeroU16;

use crate::datatype::{DataType, ValueKind};

/// Fault code used when an action error carries no explicit code.
pub const ERROR_CODE_ACTION_FAILED: u16 = 501;
/// Fault code for argument values that fail coercion or validation.
pub const ERROR_CODE_INVALID_ARGS: u16 = 402;

#[derive(thiserror::Error, Debug)]
pub enum UpnpError {
    // Configuration errors. These abort server construction.
    #[error("state variable with the same name exists: {0}")]
    DuplicateStateVariable(String),
    #[error("action {action}: no such state variable: {state_variable}")]
    NoSuchStateVariable {
        action: String,
        state_variable: String,
    },
    #[error(
        "action {action}: argument {argument} declared as {declared:?}, but state variable {state_variable} is {data_type:?}"
    )]
    ArgumentTypeMismatch {
        action: String,
        argument: String,
        declared: ValueKind,
        state_variable: String,
        data_type: DataType,
    },
    #[error("action {action}: duplicate in-argument name: {argument}")]
    DuplicateArgumentName { action: String, argument: String },
    #[error("action with the same name exists: {0}")]
    DuplicateAction(String),
    #[error("duplicate UDN in device tree: {0}")]
    DuplicateUdn(String),
    #[error("unknown UPnP data type: {0}")]
    UnknownDataType(String),

    // Runtime errors surfaced as SOAP faults.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("{message}")]
    ActionFailed {
        code: Option<NonZeroU16>,
        message: String,
    },
}

impl UpnpError {
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn action_failed(message: impl Into<String>) -> Self {
        Self::ActionFailed {
            code: None,
            message: message.into(),
        }
    }

    /// An action error with an explicit UPnP error code. Code 0 counts as
    /// unset and falls through to 501 in the fault envelope.
    pub fn action_failed_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::ActionFailed {
            code: NonZeroU16::new(code),
            message: message.into(),
        }
    }

    /// The errorCode rendered into a SOAP fault for this error.
    pub fn fault_code(&self) -> u16 {
        match self {
            UpnpError::InvalidValue { .. } => ERROR_CODE_INVALID_ARGS,
            UpnpError::ActionFailed { code, .. } => {
                code.map(NonZeroU16::get).unwrap_or(ERROR_CODE_ACTION_FAILED)
            }
            _ => ERROR_CODE_ACTION_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        assert_eq!(UpnpError::invalid_value("X", "bad").fault_code(), 402);
        assert_eq!(UpnpError::action_failed("nope").fault_code(), 501);
        assert_eq!(
            UpnpError::action_failed_with_code(718, "conflict").fault_code(),
            718
        );
        // 0 means "unset", not "code zero".
        assert_eq!(
            UpnpError::action_failed_with_code(0, "nope").fault_code(),
            501
        );
    }
}
