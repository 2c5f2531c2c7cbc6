//! Attachments and their checksums.
//!
//! An [`Attachment`] carries a filename, a content type and content that is either
//! already in memory or still behind a reader. Content is read at most once: the
//! first read buffers the bytes, and every later read (directly through
//! [`Attachment::bytes`], or indirectly through serialization) is served from that
//! buffer. The underlying reader is never assumed to be seekable.

use std::{
    fmt,
    io::{Cursor, Read},
    sync::Arc,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::{Serialize, Serializer, ser::{Error as _, SerializeStruct}};

use crate::error::{DriverError, DriverResult};

const READ_CHUNK_SIZE: usize = 32 * 1024;

/// A 128-bit MD5 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Md5Sum(pub [u8; 16]);

impl Md5Sum {
    /// Computes the checksum of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    pub(crate) fn from_hasher(hasher: Md5) -> Self {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hasher.finalize());
        Md5Sum(out)
    }

    /// Lowercase hex form of the checksum.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The `md5-<base64>` digest string used in attachment stubs.
    pub fn to_digest(&self) -> String {
        format!("md5-{}", STANDARD.encode(self.0))
    }
}

impl fmt::Display for Md5Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Metadata describing an attachment without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub content_type: String,
    pub digest: Md5Sum,
    pub length: u64,
}

enum Content {
    Unread(Box<dyn Read + Send>),
    Buffered(Arc<[u8]>),
    Consumed,
}

/// A named binary payload bound (or about to be bound) to a document revision.
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::attachment::Attachment;
///
/// let att = Attachment::new("foo.txt", "text/plain", std::io::Cursor::new("test attachment\n"));
/// let first = att.bytes()?;
/// let json = serde_json::to_value(&att)?;
/// assert_eq!(json["data"], "dGVzdCBhdHRhY2htZW50Cg==");
/// assert_eq!(first, att.bytes()?);
/// ```
pub struct Attachment {
    /// Filename, unique within the owning revision.
    pub filename: String,
    /// MIME type of the content.
    pub content_type: String,
    digest: Option<Md5Sum>,
    content: Mutex<Content>,
}

impl Attachment {
    /// Creates an attachment whose content will be pulled from `reader` on first use.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        reader: impl Read + Send + 'static,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            digest: None,
            content: Mutex::new(Content::Unread(Box::new(reader))),
        }
    }

    /// Creates an attachment from content that is already in memory.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            digest: None,
            content: Mutex::new(Content::Buffered(data.into())),
        }
    }

    /// Attaches a checksum the backend already knows, so it is not recomputed.
    pub fn with_digest(mut self, digest: Md5Sum) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Returns the attachment content, reading and buffering it on first call.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] naming this attachment if the underlying reader
    /// fails. A failed read leaves the attachment without content.
    pub fn bytes(&self) -> DriverResult<Arc<[u8]>> {
        let mut content = self.content.lock();

        match &mut *content {
            Content::Buffered(data) => Ok(data.clone()),
            Content::Consumed => Err(self.io_error(std::io::Error::other("attachment content not read"))),
            Content::Unread(reader) => {
                let mut buf = Vec::new();
                let read = reader.read_to_end(&mut buf);

                match read {
                    Ok(_) => {
                        let data: Arc<[u8]> = buf.into();
                        *content = Content::Buffered(data.clone());
                        Ok(data)
                    }
                    Err(err) => {
                        *content = Content::Consumed;
                        Err(self.io_error(err))
                    }
                }
            }
        }
    }

    /// Returns a reader over the (buffered) content.
    pub fn reader(&self) -> DriverResult<Cursor<Arc<[u8]>>> {
        Ok(Cursor::new(self.bytes()?))
    }

    /// Returns the MD5 checksum, computing it from the content if it is not known.
    pub fn digest(&self) -> DriverResult<Md5Sum> {
        match self.digest {
            Some(digest) => Ok(digest),
            None => Ok(Md5Sum::compute(&self.bytes()?)),
        }
    }

    /// Consumes the attachment, reading its content to completion while computing
    /// the checksum incrementally.
    ///
    /// This is a blocking read; async callers should run it on a blocking pool.
    pub fn into_content(self) -> DriverResult<(Arc<[u8]>, Md5Sum)> {
        let name = self.filename;

        match self.content.into_inner() {
            Content::Buffered(data) => {
                let digest = self.digest.unwrap_or_else(|| Md5Sum::compute(&data));
                Ok((data, digest))
            }
            Content::Consumed => Err(DriverError::Io {
                name,
                source: std::io::Error::other("attachment content not read"),
            }),
            Content::Unread(mut reader) => {
                let mut hasher = Md5::new();
                let mut data = Vec::new();
                let mut chunk = vec![0u8; READ_CHUNK_SIZE];

                loop {
                    let read = match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(read) => read,
                        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(source) => return Err(DriverError::Io { name, source }),
                    };

                    hasher.update(&chunk[..read]);
                    data.extend_from_slice(&chunk[..read]);
                }

                Ok((data.into(), Md5Sum::from_hasher(hasher)))
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> DriverError {
        DriverError::Io { name: self.filename.clone(), source }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.content.lock() {
            Content::Unread(_) => "unread".to_string(),
            Content::Buffered(data) => format!("{} bytes", data.len()),
            Content::Consumed => "consumed".to_string(),
        };

        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("digest", &self.digest)
            .field("content", &state)
            .finish()
    }
}

/// Serializes as `{"content_type": ..., "data": <base64>}`.
///
/// Unread content is read and buffered first; a read failure becomes a
/// serialization error that names the attachment.
impl Serialize for Attachment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.bytes().map_err(S::Error::custom)?;

        let mut state = serializer.serialize_struct("Attachment", 2)?;
        state.serialize_field("content_type", &self.content_type)?;
        state.serialize_field("data", &STANDARD.encode(&data))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ErrorReader;

    impl Read for ErrorReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("errorReader"))
        }
    }

    /// Hands out its content once and reports end of stream afterwards.
    struct OneShotReader {
        data: &'static [u8],
        drained: bool,
    }

    impl OneShotReader {
        fn new(data: &'static [u8]) -> Self {
            Self { data, drained: false }
        }
    }

    impl Read for OneShotReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.drained {
                return Ok(0);
            }

            let len = self.data.len().min(buf.len());
            buf[..len].copy_from_slice(&self.data[..len]);
            self.data = &self.data[len..];
            self.drained = self.data.is_empty();
            Ok(len)
        }
    }

    #[test]
    fn bytes_reads_the_stream() {
        let att = Attachment::new("test.txt", "text/plain", Cursor::new("test content"));

        assert_eq!(&*att.bytes().unwrap(), b"test content");
    }

    #[test]
    fn buffered_read_is_idempotent() {
        let att = Attachment::new("test.txt", "text/plain", OneShotReader::new(b"test content"));

        let first = att.bytes().unwrap();
        let second = att.bytes().unwrap();

        assert_eq!(first, second);
        assert_eq!(&*second, b"test content");
    }

    #[test]
    fn read_then_marshal_yields_same_bytes() {
        let att = Attachment::new("foo.txt", "text/plain", OneShotReader::new(b"test attachment\n"));

        let direct = att.bytes().unwrap();
        let marshaled = serde_json::to_value(&att).unwrap();

        assert_eq!(
            marshaled,
            json!({ "content_type": "text/plain", "data": "dGVzdCBhdHRhY2htZW50Cg==" })
        );
        assert_eq!(&*direct, b"test attachment\n");
    }

    #[test]
    fn read_error_is_reported() {
        let att = Attachment::new("test.txt", "text/plain", ErrorReader);

        let err = att.bytes().unwrap_err();
        assert!(matches!(err, DriverError::Io { ref name, .. } if name == "test.txt"));
    }

    #[test]
    fn marshal_error_names_the_stream() {
        let att = Attachment::new("foo.txt", "text/plain", ErrorReader);

        let err = serde_json::to_string(&att).unwrap_err();
        assert!(err.to_string().contains("foo.txt"));
        assert!(err.to_string().contains("errorReader"));
    }

    #[test]
    fn into_content_hashes_incrementally() {
        let payload = vec![7u8; READ_CHUNK_SIZE * 2 + 13];
        let att = Attachment::new("big.bin", "application/octet-stream", Cursor::new(payload.clone()));

        let (data, digest) = att.into_content().unwrap();

        assert_eq!(&*data, payload.as_slice());
        assert_eq!(digest, Md5Sum::compute(&payload));
    }

    #[test]
    fn digest_formats() {
        let digest = Md5Sum::compute(b"");

        assert_eq!(digest.to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digest.to_digest(), "md5-1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
