//! Attachment storage and the `_attachments` member of document bodies.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value, json};

use couchlayer_core::{
    attachment::{Attachment, AttachmentMeta, Md5Sum},
    error::{DriverError, DriverResult},
};

use crate::tree::AttachmentMap;

/// Attachment content as stored with a revision. Shared between revisions
/// that carry the attachment over unchanged.
#[derive(Debug)]
pub(crate) struct StoredAttachment {
    pub content_type: String,
    pub data: Arc<[u8]>,
    pub digest: Md5Sum,
}

impl StoredAttachment {
    pub fn new(content_type: impl Into<String>, data: Arc<[u8]>, digest: Md5Sum) -> Self {
        Self { content_type: content_type.into(), data, digest }
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn meta(&self) -> AttachmentMeta {
        AttachmentMeta {
            content_type: self.content_type.clone(),
            digest: self.digest,
            length: self.length(),
        }
    }

    /// A buffered [`Attachment`] handing out the stored bytes.
    pub fn to_attachment(&self, filename: &str) -> Attachment {
        Attachment::from_bytes(filename, self.content_type.clone(), self.data.clone())
            .with_digest(self.digest)
    }

    /// The stub rendered in `_attachments` when content is not requested.
    pub fn stub(&self) -> Value {
        json!({
            "content_type": self.content_type,
            "digest": self.digest.to_digest(),
            "length": self.length(),
            "stub": true,
        })
    }

    /// The inline form, with base64 `data`.
    pub fn inline(&self) -> Value {
        json!({
            "content_type": self.content_type,
            "digest": self.digest.to_digest(),
            "length": self.length(),
            "data": STANDARD.encode(&self.data),
        })
    }
}

/// Renders an attachment map for a document body.
pub(crate) fn render(attachments: &AttachmentMap, inline: bool) -> Value {
    let rendered = attachments
        .iter()
        .map(|(name, attachment)| {
            let value = if inline { attachment.inline() } else { attachment.stub() };
            (name.clone(), value)
        })
        .collect::<Map<_, _>>();

    Value::Object(rendered)
}

/// Resolves the `_attachments` member of an incoming body.
///
/// Entries with base64 `data` are decoded and hashed. Entries marked
/// `"stub": true` keep the attachment of the same name from the parent
/// revision and fail if the parent has none. Attachments the body does not
/// mention are dropped.
pub(crate) fn resolve(raw: &Map<String, Value>, parent: &AttachmentMap) -> DriverResult<AttachmentMap> {
    let mut resolved = AttachmentMap::new();

    for (name, entry) in raw {
        let entry = entry
            .as_object()
            .ok_or_else(|| bad_attachment(name, "expected an object"))?;

        if entry.get("stub").and_then(Value::as_bool).unwrap_or(false) {
            let existing = parent
                .get(name)
                .ok_or_else(|| bad_attachment(name, "stub refers to a missing attachment"))?;
            resolved.insert(name.clone(), existing.clone());
            continue;
        }

        let data = entry
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_attachment(name, "missing data"))?;
        let data: Arc<[u8]> = STANDARD
            .decode(data)
            .map_err(|err| bad_attachment(name, &format!("invalid base64: {err}")))?
            .into();

        let content_type = entry
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream");
        let digest = Md5Sum::compute(&data);

        resolved.insert(name.clone(), Arc::new(StoredAttachment::new(content_type, data, digest)));
    }

    Ok(resolved)
}

fn bad_attachment(name: &str, reason: &str) -> DriverError {
    DriverError::BadRequest(format!("Invalid attachment {name}: {reason}"))
}
