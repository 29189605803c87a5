//! AMQP connection URI construction.
//!
//! Builds `amqp://[user[:password]@]host[:port][/vhost][?options]` following
//! https://www.rabbitmq.com/uri-spec.html. Nothing here touches the network.

use serde_json::Value;
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::config::ServerCredentials;
use crate::error::UriError;

pub const SCHEME: &str = "amqp";

/// Identity used when a server record carries no user or password.
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";

/// Build the connection URI for one server record.
pub fn build(server: &ServerCredentials) -> Result<String, UriError> {
    let host = server.host.trim();
    if host.is_empty() {
        return Err(UriError::MissingHost);
    }

    let user = if server.user.is_empty() {
        debug!(host = %host, default = DEFAULT_USER, "amqp_uri_default_user");
        DEFAULT_USER
    } else {
        server.user.as_str()
    };

    let password = if server.password.is_empty() {
        debug!(host = %host, "amqp_uri_default_password");
        DEFAULT_PASSWORD
    } else {
        server.password.as_str()
    };

    let (user, password) = encode_userinfo(user, password)?;
    let mut uri = format!("{}://{}:{}@{}", SCHEME, user, password, host);

    if server.port != 0 {
        uri.push_str(&format!(":{}", server.port));
    }

    if !server.vhost.is_empty() {
        uri.push('/');
        uri.push_str(&server.vhost);
    }

    if !server.options.is_empty() {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &server.options {
            query.append_pair(name, &option_value(value));
        }
        uri.push('?');
        uri.push_str(&query.finish());
    }

    Ok(uri)
}

/// Percent-encode user and password with the URL userinfo set.
fn encode_userinfo(user: &str, password: &str) -> Result<(String, String), UriError> {
    let mut url = Url::parse("amqp://userinfo").map_err(|_| UriError::InvalidCredentials)?;
    url.set_username(user)
        .map_err(|_| UriError::InvalidCredentials)?;
    url.set_password(Some(password))
        .map_err(|_| UriError::InvalidCredentials)?;

    Ok((
        url.username().to_string(),
        url.password().unwrap_or_default().to_string(),
    ))
}

fn option_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
