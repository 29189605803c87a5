//! Versioned message envelope exchanged over the broker.
//!
//! ## Wire shape
//!
//! ```text
//! {"version":1,"id":"…","type":"email:welcome","params":{…},"props":{…},
//!  "created":"2022-01-01T00:00:00Z","queue":{"count":1,"errorcode":500,…}}
//! ```
//!
//! Email and invitation messages are views over the same envelope. They keep
//! their fields under reserved keys of the parameter map, so every kind of
//! message goes through one encoder.

pub mod email;
pub mod invite;
mod wire;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::pathmap::PathMap;

pub use email::EmailMessage;
pub use invite::InviteMessage;

/// Trim and lower-case an identifier, type, address or header name.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Current time at the precision kept on the wire.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// One validity predicate in a message's validator chain.
pub type Validator = fn(&Envelope) -> bool;

/// Base predicate shared by every message kind.
pub fn has_identity(envelope: &Envelope) -> bool {
    !envelope.id.is_empty() && !envelope.kind.is_empty()
}

/// Anything that travels as an [`Envelope`].
///
/// `VALIDATORS` is ordered base first; a message is valid only when every
/// predicate holds.
pub trait Message {
    const VALIDATORS: &'static [Validator];

    fn envelope(&self) -> &Envelope;

    fn envelope_mut(&mut self) -> &mut Envelope;

    fn is_valid(&self) -> bool {
        Self::VALIDATORS.iter().all(|check| check(self.envelope()))
    }

    /// Encode to the JSON wire format, stamping `created` if still unset.
    fn to_vec(&mut self) -> Result<Vec<u8>, EnvelopeError> {
        if !self.is_valid() {
            return Err(EnvelopeError::Invalid);
        }
        self.envelope_mut().encode()
    }
}

/// Error state recorded by a consumer that failed to process a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: i64,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// The unit of work exchanged over the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    version: u32,
    id: String,
    kind: String,
    params: PathMap,
    props: PathMap,
    created: Option<DateTime<Utc>>,
    requeue_count: u32,
    error: Option<ErrorRecord>,
}

impl Envelope {
    /// Create an envelope of the given type with a fresh random id.
    pub fn new(kind: &str) -> Result<Self, EnvelopeError> {
        Self::with_id(&Uuid::new_v4().to_string(), kind)
    }

    /// Create an envelope with a caller-supplied id.
    pub fn with_id(id: &str, kind: &str) -> Result<Self, EnvelopeError> {
        let id = normalize(id);
        if id.is_empty() {
            return Err(EnvelopeError::InvalidId);
        }

        let kind = normalize(kind);
        if kind.is_empty() {
            return Err(EnvelopeError::InvalidType);
        }

        Ok(Self {
            version: 1,
            id,
            kind,
            params: PathMap::new(),
            props: PathMap::new(),
            created: Some(now()),
            requeue_count: 0,
            error: None,
        })
    }

    /// Create an `action:<kind>` envelope.
    pub fn action(kind: &str) -> Result<Self, EnvelopeError> {
        let kind = normalize(kind);
        if kind.is_empty() {
            return Err(EnvelopeError::InvalidType);
        }
        Self::new(&format!("action:{}", kind))
    }

    pub fn version(&self) -> u32 {
        self.version.max(1)
    }

    /// Returns the previous version.
    pub fn set_version(&mut self, version: u32) -> Result<u32, EnvelopeError> {
        if version == 0 {
            return Err(EnvelopeError::InvalidVersion);
        }
        Ok(std::mem::replace(&mut self.version, version))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the previous id.
    pub fn set_id(&mut self, id: &str) -> Result<String, EnvelopeError> {
        let id = normalize(id);
        if id.is_empty() {
            return Err(EnvelopeError::InvalidId);
        }
        Ok(std::mem::replace(&mut self.id, id))
    }

    /// The message type, e.g. `email:welcome`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the previous type.
    pub fn set_kind(&mut self, kind: &str) -> Result<String, EnvelopeError> {
        let kind = normalize(kind);
        if kind.is_empty() {
            return Err(EnvelopeError::InvalidType);
        }
        Ok(std::mem::replace(&mut self.kind, kind))
    }

    /// The type namespace before the first `:`, e.g. `email`.
    pub fn namespace(&self) -> &str {
        self.kind.split(':').next().unwrap_or_default()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    // Parameters

    pub fn params(&self) -> &PathMap {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut PathMap {
        &mut self.params
    }

    pub fn set_params(&mut self, params: PathMap) -> PathMap {
        std::mem::replace(&mut self.params, params)
    }

    pub fn has_parameter(&self, path: &str) -> bool {
        self.params.has(path)
    }

    pub fn parameter(&self, path: &str) -> Result<&Value, EnvelopeError> {
        Ok(self.params.get(path)?)
    }

    pub fn set_parameter(
        &mut self,
        path: &str,
        value: impl Into<Value>,
        force: bool,
    ) -> Result<(), EnvelopeError> {
        Ok(self.params.set(path, value, force)?)
    }

    pub fn clear_parameter(&mut self, path: &str) -> Result<(), EnvelopeError> {
        Ok(self.params.clear(path)?)
    }

    /// Store a trimmed string parameter; an empty value clears the key instead.
    pub(crate) fn set_optional_parameter(&mut self, path: &str, value: &str) -> Result<(), EnvelopeError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(self.params.clear(path)?);
        }
        Ok(self.params.set(path, value, true)?)
    }

    // Properties

    pub fn props(&self) -> &PathMap {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut PathMap {
        &mut self.props
    }

    pub fn set_props(&mut self, props: PathMap) -> PathMap {
        std::mem::replace(&mut self.props, props)
    }

    pub fn has_property(&self, path: &str) -> bool {
        self.props.has(path)
    }

    pub fn property(&self, path: &str) -> Result<&Value, EnvelopeError> {
        Ok(self.props.get(path)?)
    }

    pub fn set_property(
        &mut self,
        path: &str,
        value: impl Into<Value>,
        force: bool,
    ) -> Result<(), EnvelopeError> {
        Ok(self.props.set(path, value, force)?)
    }

    pub fn clear_property(&mut self, path: &str) -> Result<(), EnvelopeError> {
        Ok(self.props.clear(path)?)
    }

    // Queue control

    pub fn requeue_count(&self) -> u32 {
        self.requeue_count
    }

    /// Bump the requeue counter and return the new value.
    pub fn requeue(&mut self) -> u32 {
        self.requeue_count += 1;
        self.requeue_count
    }

    /// Zero the requeue counter and return the previous value.
    pub fn reset_count(&mut self) -> u32 {
        std::mem::take(&mut self.requeue_count)
    }

    /// Record a processing failure. `0` is reserved for "no error".
    pub fn set_error(&mut self, code: i64, message: &str) -> Result<(), EnvelopeError> {
        if code <= 0 {
            return Err(EnvelopeError::InvalidErrorCode(code));
        }

        let message = message.trim();
        if message.is_empty() {
            return Err(EnvelopeError::MissingErrorMessage);
        }

        self.error = Some(ErrorRecord {
            code,
            message: message.to_string(),
            time: now(),
        });
        Ok(())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    /// `0` when no error has been recorded.
    pub fn error_code(&self) -> i64 {
        self.error.as_ref().map_or(0, |e| e.code)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn error_time(&self) -> Option<DateTime<Utc>> {
        self.error.as_ref().map(|e| e.time)
    }

    // Wire format

    /// Decode an envelope from its JSON wire format.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        wire::decode(bytes)
    }

    fn encode(&mut self) -> Result<Vec<u8>, EnvelopeError> {
        let created = *self.created.get_or_insert_with(now);
        wire::encode(self, created)
    }
}

impl Message for Envelope {
    const VALIDATORS: &'static [Validator] = &[has_identity];

    fn envelope(&self) -> &Envelope {
        self
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_normalizes_type() {
        let envelope = Envelope::new("  Email:Welcome ").unwrap();

        assert_eq!(envelope.kind(), "email:welcome");
        assert_eq!(envelope.namespace(), "email");
        assert_eq!(envelope.version(), 1);
        assert!(envelope.created().is_some());
        assert!(envelope.is_valid());
        assert_eq!(envelope.id(), envelope.id().to_lowercase());
        assert!(Uuid::parse_str(envelope.id()).is_ok());
    }

    #[test]
    fn test_new_rejects_blank_type() {
        assert!(matches!(Envelope::new("   "), Err(EnvelopeError::InvalidType)));
        assert!(matches!(Envelope::action(""), Err(EnvelopeError::InvalidType)));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new("action:activate").unwrap();
        let b = Envelope::new("action:activate").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_action_prefix() {
        let envelope = Envelope::action("Activate").unwrap();
        assert_eq!(envelope.kind(), "action:activate");
    }

    #[test]
    fn test_with_id_normalizes() {
        let envelope = Envelope::with_id(" ABC-123 ", "action:x").unwrap();
        assert_eq!(envelope.id(), "abc-123");
        assert!(matches!(
            Envelope::with_id(" ", "action:x"),
            Err(EnvelopeError::InvalidId)
        ));
    }

    #[test]
    fn test_version() {
        let mut envelope = Envelope::new("action:x").unwrap();
        assert!(matches!(envelope.set_version(0), Err(EnvelopeError::InvalidVersion)));
        assert_eq!(envelope.set_version(3).unwrap(), 1);
        assert_eq!(envelope.version(), 3);
    }

    #[test]
    fn test_set_error_validation() {
        let mut envelope = Envelope::new("action:x").unwrap();

        assert!(matches!(
            envelope.set_error(0, "x"),
            Err(EnvelopeError::InvalidErrorCode(0))
        ));
        assert!(matches!(
            envelope.set_error(-5, "x"),
            Err(EnvelopeError::InvalidErrorCode(-5))
        ));
        assert!(matches!(
            envelope.set_error(404, ""),
            Err(EnvelopeError::MissingErrorMessage)
        ));
        assert!(!envelope.is_error());
        assert_eq!(envelope.error_code(), 0);
    }

    #[test]
    fn test_set_error_stamps_time() {
        let mut envelope = Envelope::new("action:x").unwrap();
        envelope.set_error(404, "not found").unwrap();

        assert!(envelope.is_error());
        assert_eq!(envelope.error_code(), 404);
        assert_eq!(envelope.error_message(), Some("not found"));
        assert!(envelope.error_time().is_some());
    }

    #[test]
    fn test_error_survives_requeue() {
        let mut envelope = Envelope::new("action:x").unwrap();
        envelope.set_error(500, "smtp timeout").unwrap();

        assert_eq!(envelope.requeue(), 1);
        assert_eq!(envelope.requeue(), 2);
        assert_eq!(envelope.error_code(), 500);

        assert_eq!(envelope.reset_count(), 2);
        assert_eq!(envelope.requeue_count(), 0);
        assert_eq!(envelope.error_code(), 500);
    }

    #[test]
    fn test_parameters_and_properties() {
        let mut envelope = Envelope::new("action:x").unwrap();
        envelope.set_parameter("user.id", 42, true).unwrap();
        envelope.set_property("trace.source", "api", true).unwrap();

        assert_eq!(envelope.parameter("user.id").unwrap(), &json!(42));
        assert!(envelope.has_property("trace.source"));
        assert!(!envelope.has_parameter("trace.source"));

        envelope.clear_parameter("user.id").unwrap();
        assert!(!envelope.has_parameter("user.id"));
        assert!(envelope.parameter("user.id").is_err());
    }

    #[test]
    fn test_encode_stamps_created_once() {
        let mut envelope = Envelope::new("action:x").unwrap();
        envelope.created = None;

        envelope.to_vec().unwrap();
        let first = envelope.created();
        assert!(first.is_some());

        envelope.to_vec().unwrap();
        assert_eq!(envelope.created(), first);
    }

    #[test]
    fn test_encode_rejects_invalid() {
        let mut envelope = Envelope::new("action:x").unwrap();
        envelope.id.clear();
        assert!(matches!(envelope.to_vec(), Err(EnvelopeError::Invalid)));
    }
}
