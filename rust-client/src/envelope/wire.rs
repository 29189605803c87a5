//! JSON encoding of [`Envelope`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize, Envelope, ErrorRecord};
use crate::error::EnvelopeError;
use crate::pathmap::PathMap;

#[derive(Serialize)]
struct WireOut<'a> {
    version: u32,
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "is_empty_map")]
    params: &'a PathMap,
    #[serde(skip_serializing_if = "is_empty_map")]
    props: &'a PathMap,
    created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueBlock>,
}

/// Queue control block; only present once a message was requeued or failed.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueBlock {
    #[serde(default, skip_serializing_if = "is_zero")]
    count: u32,
    #[serde(default, skip_serializing_if = "is_zero_code")]
    errorcode: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errortime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errormsg: Option<String>,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    params: PathMap,
    #[serde(default)]
    props: PathMap,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    queue: Option<QueueBlock>,
}

fn is_empty_map(map: &&PathMap) -> bool {
    map.is_empty()
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_code(value: &i64) -> bool {
    *value <= 0
}

pub(crate) fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub(super) fn encode(envelope: &Envelope, created: DateTime<Utc>) -> Result<Vec<u8>, EnvelopeError> {
    let queue = if envelope.requeue_count > 0 || envelope.error.is_some() {
        let mut block = QueueBlock {
            count: envelope.requeue_count,
            ..Default::default()
        };
        if let Some(error) = &envelope.error {
            block.errorcode = error.code;
            block.errortime = Some(timestamp(&error.time));
            block.errormsg = Some(error.message.clone());
        }
        Some(block)
    } else {
        None
    };

    let out = WireOut {
        version: envelope.version(),
        id: &envelope.id,
        kind: &envelope.kind,
        params: &envelope.params,
        props: &envelope.props,
        created: timestamp(&created),
        queue,
    };

    serde_json::to_vec(&out).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

pub(super) fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let wire: WireIn =
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let id = normalize(&wire.id);
    if id.is_empty() {
        return Err(EnvelopeError::Malformed("missing id".to_string()));
    }

    let kind = normalize(&wire.kind);
    if kind.is_empty() {
        return Err(EnvelopeError::Malformed("missing type".to_string()));
    }

    let created = wire
        .created
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            parse_timestamp(&raw)
                .ok_or_else(|| EnvelopeError::Malformed(format!("invalid created timestamp {:?}", raw)))
        })
        .transpose()?;

    let mut requeue_count = 0;
    let mut error = None;
    if let Some(queue) = wire.queue {
        requeue_count = queue.count;

        if queue.errorcode > 0 {
            let time = match queue.errortime.as_deref() {
                Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                    EnvelopeError::Malformed(format!("invalid error timestamp {:?}", raw))
                })?,
                None => super::now(),
            };
            error = Some(ErrorRecord {
                code: queue.errorcode,
                message: queue.errormsg.unwrap_or_default(),
                time,
            });
        }
    }

    Ok(Envelope {
        version: wire.version,
        id,
        kind,
        params: wire.params,
        props: wire.props,
        created,
        requeue_count,
        error,
    })
}
