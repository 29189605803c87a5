//! Email messages: typed accessors over reserved parameter keys.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::{has_identity, normalize, Envelope, Message, Validator};
use crate::error::EnvelopeError;

pub const TEMPLATE: &str = "template";
pub const LOCALE: &str = "locale";
pub const TO: &str = "to";
pub const FROM: &str = "from";
pub const CC: &str = "cc";
pub const BCC: &str = "bcc";
pub const HEADERS: &str = "headers";

pub const DEFAULT_LOCALE: &str = "en_us";

/// Template and recipient are both set.
pub fn has_email_fields(envelope: &Envelope) -> bool {
    let params = envelope.params();
    params.get_str(TEMPLATE).is_some_and(|t| !t.is_empty())
        && params.get_str(TO).is_some_and(|t| !t.is_empty())
}

/// An envelope carrying an email to be rendered and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    envelope: Envelope,
}

impl EmailMessage {
    /// Create an `email:<kind>` message, or a plain `email` when `kind` is
    /// empty, in which case a template is required.
    pub fn new(kind: &str, template: &str) -> Result<Self, EnvelopeError> {
        Self::with_id(&Uuid::new_v4().to_string(), kind, template)
    }

    pub fn with_id(id: &str, kind: &str, template: &str) -> Result<Self, EnvelopeError> {
        let kind = normalize(kind);
        let template = normalize(template);

        let full_kind = if kind.is_empty() {
            if template.is_empty() {
                return Err(EnvelopeError::MissingField(TEMPLATE));
            }
            "email".to_string()
        } else {
            format!("email:{}", kind)
        };

        let mut message = Self {
            envelope: Envelope::with_id(id, &full_kind)?,
        };
        if !template.is_empty() {
            message.set_template(&template)?;
        }
        Ok(message)
    }

    /// Wrap an existing envelope whose type lives in `namespace`.
    pub(crate) fn wrap(envelope: Envelope, namespace: &'static str) -> Result<Self, EnvelopeError> {
        if envelope.namespace() != namespace {
            return Err(EnvelopeError::WrongType {
                expected: namespace,
                actual: envelope.kind().to_string(),
            });
        }
        Ok(Self { envelope })
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    fn text(&self, key: &str) -> &str {
        self.envelope.params().get_str(key).unwrap_or_default()
    }

    pub fn template(&self) -> &str {
        self.text(TEMPLATE)
    }

    pub fn set_template(&mut self, template: &str) -> Result<(), EnvelopeError> {
        let template = normalize(template);
        if template.is_empty() {
            return Err(EnvelopeError::MissingField(TEMPLATE));
        }
        self.envelope.set_parameter(TEMPLATE, template, true)
    }

    pub fn locale(&self) -> &str {
        match self.text(LOCALE) {
            "" => DEFAULT_LOCALE,
            locale => locale,
        }
    }

    pub fn set_locale(&mut self, locale: &str) -> Result<(), EnvelopeError> {
        self.envelope.set_optional_parameter(LOCALE, &normalize(locale))
    }

    pub fn to(&self) -> &str {
        self.text(TO)
    }

    pub fn set_to(&mut self, to: &str) -> Result<(), EnvelopeError> {
        let to = normalize(to);
        if to.is_empty() {
            return Err(EnvelopeError::MissingField(TO));
        }
        self.envelope.set_parameter(TO, to, true)
    }

    /// Sender address, or `default` when none was set.
    pub fn from_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.text(FROM) {
            "" => default,
            from => from,
        }
    }

    pub fn set_from(&mut self, from: &str) -> Result<(), EnvelopeError> {
        self.envelope.set_optional_parameter(FROM, &normalize(from))
    }

    pub fn cc(&self) -> &str {
        self.text(CC)
    }

    pub fn set_cc(&mut self, cc: &str) -> Result<(), EnvelopeError> {
        self.envelope.set_optional_parameter(CC, &normalize(cc))
    }

    pub fn bcc(&self) -> &str {
        self.text(BCC)
    }

    pub fn set_bcc(&mut self, bcc: &str) -> Result<(), EnvelopeError> {
        self.envelope.set_optional_parameter(BCC, &normalize(bcc))
    }

    pub fn headers(&self) -> Option<&Map<String, Value>> {
        self.envelope
            .params()
            .get(HEADERS)
            .ok()
            .and_then(Value::as_object)
    }

    pub fn has_header(&self, name: &str) -> bool {
        header_path(name).is_ok_and(|path| self.envelope.has_parameter(&path))
    }

    pub fn header(&self, name: &str) -> &str {
        header_path(name)
            .ok()
            .and_then(|path| self.envelope.params().get_str(&path))
            .unwrap_or_default()
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), EnvelopeError> {
        let path = header_path(name)?;
        self.envelope.set_optional_parameter(&path, value)
    }

    pub fn clear_header(&mut self, name: &str) -> Result<(), EnvelopeError> {
        let path = header_path(name)?;
        self.envelope.clear_parameter(&path)
    }

    pub fn clear_headers(&mut self) -> Result<(), EnvelopeError> {
        self.envelope.clear_parameter(HEADERS)
    }
}

fn header_path(name: &str) -> Result<String, EnvelopeError> {
    let name = normalize(name);
    if name.is_empty() || name.contains('.') {
        return Err(EnvelopeError::InvalidHeader(name));
    }
    Ok(format!("{}.{}", HEADERS, name))
}

impl Message for EmailMessage {
    const VALIDATORS: &'static [Validator] = &[has_identity, has_email_fields];

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

impl TryFrom<Envelope> for EmailMessage {
    type Error = EnvelopeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        Self::wrap(envelope, "email")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn welcome() -> EmailMessage {
        let mut message = EmailMessage::new("Welcome", "Welcome-V2").unwrap();
        message.set_to(" Someone@Example.COM ").unwrap();
        message
    }

    #[test]
    fn test_new_sets_type_and_template() {
        let message = welcome();

        assert_eq!(message.envelope().kind(), "email:welcome");
        assert_eq!(message.template(), "welcome-v2");
        assert_eq!(message.to(), "someone@example.com");
        assert!(message.is_valid());
    }

    #[test]
    fn test_untyped_email_requires_template() {
        assert!(matches!(
            EmailMessage::new("", " "),
            Err(EnvelopeError::MissingField(TEMPLATE))
        ));

        let message = EmailMessage::new("", "reset").unwrap();
        assert_eq!(message.envelope().kind(), "email");
    }

    #[test]
    fn test_validity_layers_on_base() {
        let mut message = EmailMessage::new("welcome", "").unwrap();
        assert!(message.envelope().is_valid());
        assert!(!message.is_valid());

        message.set_template("welcome").unwrap();
        assert!(!message.is_valid());

        message.set_to("a@b.com").unwrap();
        assert!(message.is_valid());
    }

    #[test]
    fn test_fields_live_in_parameters() {
        let mut message = welcome();
        message.set_cc("CC@Example.com").unwrap();
        message.set_header("X-Trace", " abc ").unwrap();

        let params = message.envelope().params();
        assert_eq!(params.get("cc").unwrap(), &json!("cc@example.com"));
        assert_eq!(params.get("headers.x-trace").unwrap(), &json!("abc"));
        assert_eq!(params.get("to").unwrap(), &json!("someone@example.com"));
    }

    #[test]
    fn test_optional_fields_clear_on_empty() {
        let mut message = welcome();
        message.set_bcc("audit@example.com").unwrap();
        assert_eq!(message.bcc(), "audit@example.com");

        message.set_bcc("  ").unwrap();
        assert_eq!(message.bcc(), "");
        assert!(!message.envelope().has_parameter(BCC));
    }

    #[test]
    fn test_locale_and_from_defaults() {
        let mut message = welcome();
        assert_eq!(message.locale(), DEFAULT_LOCALE);
        assert_eq!(message.from_or("no-reply@example.com"), "no-reply@example.com");

        message.set_locale("PT_BR").unwrap();
        message.set_from("Support@Example.com").unwrap();
        assert_eq!(message.locale(), "pt_br");
        assert_eq!(message.from_or("no-reply@example.com"), "support@example.com");
    }

    #[test]
    fn test_headers() {
        let mut message = welcome();
        message.set_header("Reply-To", "help@example.com").unwrap();
        message.set_header("X-Campaign", "spring").unwrap();

        assert!(message.has_header("reply-to"));
        assert_eq!(message.header("REPLY-TO"), "help@example.com");
        assert_eq!(message.headers().unwrap().len(), 2);

        message.clear_header("reply-to").unwrap();
        assert!(!message.has_header("reply-to"));

        message.clear_headers().unwrap();
        assert!(message.headers().is_none());

        assert!(matches!(
            message.set_header("x.bad", "v"),
            Err(EnvelopeError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_try_from_checks_namespace() {
        let envelope = Envelope::new("action:activate").unwrap();
        assert!(matches!(
            EmailMessage::try_from(envelope),
            Err(EnvelopeError::WrongType { expected: "email", .. })
        ));

        let envelope = welcome().into_envelope();
        let message = EmailMessage::try_from(envelope).unwrap();
        assert_eq!(message.to(), "someone@example.com");
    }

    #[test]
    fn test_invalid_email_does_not_encode() {
        let mut message = EmailMessage::new("welcome", "welcome").unwrap();
        assert!(matches!(message.to_vec(), Err(EnvelopeError::Invalid)));

        message.set_to("a@b.com").unwrap();
        let decoded = Envelope::from_slice(&message.to_vec().unwrap()).unwrap();
        let decoded = EmailMessage::try_from(decoded).unwrap();
        assert_eq!(decoded, message);
    }
}
