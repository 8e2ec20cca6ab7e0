//! Wire values and framing shared by the inventory and transfer services.
//!
//! Framed values (the inventory payload and the transfer request) are sent
//! as a version byte, a big-endian u32 body length, and a JSON body. The
//! discovery datagram is deliberately not framed: its payload is the raw
//! advertised name.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Current framing version. Bump on any incompatible change.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on a frame body. An inventory of this size would describe
/// hundreds of thousands of files; anything larger is a corrupt peer.
const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

/// Metadata for one file as exchanged over the wire.
///
/// Identity is the file name alone: two records with the same name are "the
/// same file" regardless of size or content, and only `modified` decides
/// freshness. A namesake with an equal-or-newer timestamp is therefore never
/// re-fetched even if its bytes differ. Documented policy, kept from the
/// original protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified: u64,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, size: u64, modified: u64) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }

    /// Builds a record from a directory entry's metadata.
    pub fn from_metadata(name: String, meta: &std::fs::Metadata) -> Self {
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            name,
            size: meta.len(),
            modified,
        }
    }

    /// True when the name is a plain file name with no path components.
    /// Transfer requests that fail this are dropped.
    pub fn has_plain_name(&self) -> bool {
        let path = Path::new(&self.name);
        path.components().count() == 1 && path.file_name().is_some()
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for FileRecord {}

impl Hash for FileRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// The contents of one directory at a point in time. Recomputed on every
/// request, never cached.
pub type Inventory = Vec<FileRecord>;

/// Writes one framed value and flushes.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| Error::protocol(format!("encoding frame body: {}", e)))?;
    if body.len() as u64 > MAX_BODY_LEN as u64 {
        return Err(Error::protocol(format!(
            "frame body too large: {} bytes",
            body.len()
        )));
    }

    writer
        .write_u8(WIRE_VERSION)
        .await
        .map_err(Error::Connection)?;
    writer
        .write_u32(body.len() as u32)
        .await
        .map_err(Error::Connection)?;
    writer.write_all(&body).await.map_err(Error::Connection)?;
    writer.flush().await.map_err(Error::Connection)?;
    Ok(())
}

/// Reads one framed value.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let version = reader.read_u8().await.map_err(Error::Connection)?;
    if version != WIRE_VERSION {
        return Err(Error::protocol(format!(
            "unsupported wire version {} (expected {})",
            version, WIRE_VERSION
        )));
    }

    let len = reader.read_u32().await.map_err(Error::Connection)?;
    if len > MAX_BODY_LEN {
        return Err(Error::protocol(format!(
            "frame body too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(Error::Connection)?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::protocol(format!("decoding frame body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let inventory: Inventory = vec![
            FileRecord::new("report.txt", 500, 1_700_000_000_000),
            FileRecord::new("photo.jpg", 2048, 1_700_000_100_000),
        ];

        let mut wire = Vec::new();
        write_frame(&mut wire, &inventory).await.unwrap();

        let decoded: Inventory = read_frame(&mut wire.as_slice()).await.unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, "report.txt");
        assert_eq!(decoded[0].size, 500);
        assert_eq!(decoded[1].modified, 1_700_000_100_000);
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &FileRecord::new("a", 1, 1))
            .await
            .unwrap();
        wire[0] = 9;

        let err = read_frame::<_, FileRecord>(&mut wire.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut wire = vec![WIRE_VERSION];
        wire.extend_from_slice(&u32::MAX.to_be_bytes());

        let err = read_frame::<_, FileRecord>(&mut wire.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_a_protocol_error() {
        let body = b"not json";
        let mut wire = vec![WIRE_VERSION];
        wire.extend_from_slice(&(body.len() as u32).to_be_bytes());
        wire.extend_from_slice(body);

        let err = read_frame::<_, FileRecord>(&mut wire.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn record_identity_is_name_only() {
        let a = FileRecord::new("report.txt", 500, 100);
        let b = FileRecord::new("report.txt", 9999, 200);
        let c = FileRecord::new("other.txt", 500, 100);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn plain_name_check() {
        assert!(FileRecord::new("report.txt", 0, 0).has_plain_name());
        assert!(!FileRecord::new("../etc/passwd", 0, 0).has_plain_name());
        assert!(!FileRecord::new("a/b.txt", 0, 0).has_plain_name());
        assert!(!FileRecord::new("/abs.txt", 0, 0).has_plain_name());
        assert!(!FileRecord::new("", 0, 0).has_plain_name());
    }
}
