//! Invitation emails: an email message plus invitation details.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::email::{has_email_fields, EmailMessage};
use super::wire::{parse_timestamp, timestamp};
use super::{has_identity, normalize, Envelope, Message, Validator};
use crate::error::EnvelopeError;

pub const CODE: &str = "code";
pub const BY_NAME: &str = "by-name";
pub const BY_EMAIL: &str = "by-email";
pub const MESSAGE: &str = "message";
pub const OBJECT_NAME: &str = "objectname";
pub const EXPIRATION: &str = "expiration";

/// Code, inviting user, target object and expiration are all set.
pub fn has_invite_fields(envelope: &Envelope) -> bool {
    let params = envelope.params();
    [CODE, BY_NAME, OBJECT_NAME]
        .iter()
        .all(|key| params.get_str(key).is_some_and(|v| !v.is_empty()))
        && params.get_str(EXPIRATION).and_then(parse_timestamp).is_some()
}

/// An invitation to join an object (store, organization, …), sent as email.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteMessage {
    email: EmailMessage,
}

impl InviteMessage {
    /// Create an `invite:<object-type>` message.
    pub fn new(object_type: &str, code: &str) -> Result<Self, EnvelopeError> {
        Self::with_id(&Uuid::new_v4().to_string(), object_type, code)
    }

    pub fn with_id(id: &str, object_type: &str, code: &str) -> Result<Self, EnvelopeError> {
        let object_type = normalize(object_type);
        if object_type.is_empty() {
            return Err(EnvelopeError::MissingField("object type"));
        }

        let envelope = Envelope::with_id(id, &format!("invite:{}", object_type))?;
        let mut message = Self {
            email: EmailMessage::wrap(envelope, "invite")?,
        };
        message.set_code(code)?;
        Ok(message)
    }

    pub fn email(&self) -> &EmailMessage {
        &self.email
    }

    pub fn email_mut(&mut self) -> &mut EmailMessage {
        &mut self.email
    }

    pub fn into_envelope(self) -> Envelope {
        self.email.into_envelope()
    }

    fn text(&self, key: &str) -> &str {
        self.envelope().params().get_str(key).unwrap_or_default()
    }

    fn set_required(&mut self, key: &'static str, value: String) -> Result<(), EnvelopeError> {
        if value.is_empty() {
            return Err(EnvelopeError::MissingField(key));
        }
        self.envelope_mut().set_parameter(key, value, true)
    }

    pub fn code(&self) -> &str {
        self.text(CODE)
    }

    pub fn set_code(&mut self, code: &str) -> Result<(), EnvelopeError> {
        self.set_required(CODE, normalize(code))
    }

    /// Display name of the inviting user.
    pub fn by_user(&self) -> &str {
        self.text(BY_NAME)
    }

    pub fn set_by_user(&mut self, name: &str) -> Result<(), EnvelopeError> {
        self.set_required(BY_NAME, name.trim().to_string())
    }

    pub fn by_email(&self) -> &str {
        self.text(BY_EMAIL)
    }

    pub fn set_by_email(&mut self, email: &str) -> Result<(), EnvelopeError> {
        self.set_required(BY_EMAIL, normalize(email))
    }

    /// Personal note to the invitee.
    pub fn message(&self) -> &str {
        self.text(MESSAGE)
    }

    pub fn set_message(&mut self, message: &str) -> Result<(), EnvelopeError> {
        self.envelope_mut().set_optional_parameter(MESSAGE, message)
    }

    pub fn object_name(&self) -> &str {
        self.text(OBJECT_NAME)
    }

    pub fn set_object_name(&mut self, name: &str) -> Result<(), EnvelopeError> {
        self.set_required(OBJECT_NAME, name.trim().to_string())
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.envelope()
            .params()
            .get_str(EXPIRATION)
            .and_then(parse_timestamp)
    }

    pub fn set_expiration(&mut self, expiration: DateTime<Utc>) -> Result<(), EnvelopeError> {
        self.envelope_mut()
            .set_parameter(EXPIRATION, timestamp(&expiration), true)
    }
}

impl Message for InviteMessage {
    const VALIDATORS: &'static [Validator] = &[has_identity, has_email_fields, has_invite_fields];

    fn envelope(&self) -> &Envelope {
        self.email.envelope()
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        self.email.envelope_mut()
    }
}

impl TryFrom<Envelope> for InviteMessage {
    type Error = EnvelopeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        Ok(Self {
            email: EmailMessage::wrap(envelope, "invite")?,
        })
    }
}
