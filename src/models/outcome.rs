use std::fmt::{Display, Formatter, Result};

/// What the dispatcher decided about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Rejected(RejectReason),
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    MalformedPayload,
    MissingRecipient,
    MissingWelcomeFields,
    MissingResetCode,
    UnknownType,
    DeliveryFailed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedPayload => "malformed_payload",
            RejectReason::MissingRecipient => "missing_recipient",
            RejectReason::MissingWelcomeFields => "missing_welcome_fields",
            RejectReason::MissingResetCode => "missing_reset_code",
            RejectReason::UnknownType => "unknown_type",
            RejectReason::DeliveryFailed => "delivery_failed",
        }
    }

    /// Payload defects, as opposed to failures to send a valid job.
    pub fn is_payload_error(&self) -> bool {
        !matches!(self, RejectReason::DeliveryFailed)
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl Display for DispatchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DispatchOutcome::Handled => write!(f, "handled"),
            DispatchOutcome::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}
