use thiserror::Error;

use crate::domain::scan::ScanDirection;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("{resource} `{id}` was not found")]
    NotFound { resource: &'static str, id: String },
    #[error("{direction} content blocked by policy")]
    ContentPolicy { direction: ScanDirection },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("blocked by content policy ({direction})")]
    ContentPolicy { direction: ScanDirection, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Caller-facing text. Never includes the internal message, scan category or profile.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "Conversation not found",
            Self::ContentPolicy { direction: ScanDirection::Input, .. } => {
                "Your request couldn't be processed due to our content policy. Please rephrase your message and try again."
            }
            Self::ContentPolicy { direction: ScanDirection::Output, .. } => {
                "The response couldn't be displayed due to our content policy. Please try a different question."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ContentPolicy { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ContentPolicy { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::NotFound { resource, id } => {
                Self::NotFound { message: format!("{resource} `{id}`"), correlation_id }
            }
            ApplicationError::ContentPolicy { direction } => {
                Self::ContentPolicy { direction, correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::scan::ScanDirection;
    use crate::errors::{ApplicationError, InterfaceError};

    #[test]
    fn not_found_maps_with_correlation_id() {
        let interface = ApplicationError::NotFound { resource: "conversation", id: "abc".to_owned() }
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::NotFound {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "Conversation not found");
    }

    #[test]
    fn input_block_has_rephrase_message() {
        let interface = ApplicationError::ContentPolicy { direction: ScanDirection::Input }
            .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "Your request couldn't be processed due to our content policy. Please rephrase your message and try again."
        );
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn output_block_does_not_leak_detail() {
        let interface = ApplicationError::ContentPolicy { direction: ScanDirection::Output }
            .into_interface("req-3");

        let message = interface.user_message();
        assert!(message.starts_with("The response couldn't be displayed"));
        assert!(!message.contains("Profile"));
    }

    #[test]
    fn integration_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Integration("model endpoint timed out".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing script".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
