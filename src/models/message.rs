use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::outcome::RejectReason;

pub const PASSWORD_RESET_SUBJECT: &str = "Password Reset Verification Code";

/// A job as it arrives on the wire. Nothing is guaranteed to be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationJob {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl NotificationJob {
    /// Accepts only a JSON object, never an array filling fields by position.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_slice(raw)?;
        serde_json::from_value(Value::Object(fields))
    }

    pub fn welcome(email: &str, subject: &str, text: &str) -> Self {
        Self {
            job_type: Some(JobType::Welcome.as_str().to_string()),
            email: Some(email.to_string()),
            subject: Some(subject.to_string()),
            text: Some(text.to_string()),
            code: None,
        }
    }

    pub fn password_reset(email: &str, code: &str) -> Self {
        Self {
            job_type: Some(JobType::PasswordReset.as_str().to_string()),
            email: Some(email.to_string()),
            code: Some(code.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Welcome,
    PasswordReset,
}

impl JobType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "welcome" => Some(JobType::Welcome),
            "password_reset" => Some(JobType::PasswordReset),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Welcome => "welcome",
            JobType::PasswordReset => "password_reset",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// A job that passed validation and can be handed to the email gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailJob {
    Welcome {
        email: String,
        subject: String,
        text: String,
    },
    PasswordReset {
        email: String,
        code: String,
    },
}

impl EmailJob {
    pub fn recipient(&self) -> &str {
        match self {
            EmailJob::Welcome { email, .. } | EmailJob::PasswordReset { email, .. } => email,
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            EmailJob::Welcome { .. } => JobType::Welcome,
            EmailJob::PasswordReset { .. } => JobType::PasswordReset,
        }
    }

    pub fn render(&self) -> OutgoingEmail {
        match self {
            EmailJob::Welcome {
                email,
                subject,
                text,
            } => OutgoingEmail {
                to: email.clone(),
                subject: subject.clone(),
                body: text.clone(),
            },
            EmailJob::PasswordReset { email, code } => OutgoingEmail {
                to: email.clone(),
                subject: PASSWORD_RESET_SUBJECT.to_string(),
                body: format!("Your verification code is: {}", code),
            },
        }
    }
}

// Empty strings count as missing.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

impl TryFrom<NotificationJob> for EmailJob {
    type Error = RejectReason;

    fn try_from(job: NotificationJob) -> Result<Self, Self::Error> {
        let email = present(job.email).ok_or(RejectReason::MissingRecipient)?;

        let job_type = job
            .job_type
            .as_deref()
            .and_then(JobType::from_tag)
            .ok_or(RejectReason::UnknownType)?;

        match job_type {
            JobType::Welcome => match (present(job.subject), present(job.text)) {
                (Some(subject), Some(text)) => Ok(EmailJob::Welcome {
                    email,
                    subject,
                    text,
                }),
                _ => Err(RejectReason::MissingWelcomeFields),
            },
            JobType::PasswordReset => {
                let code = present(job.code).ok_or(RejectReason::MissingResetCode)?;
                Ok(EmailJob::PasswordReset { email, code })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}
