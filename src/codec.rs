//! Record codec: framed, self-describing messages over a byte stream.
//!
//! Every message is one frame (see `protocol_core::build_frame_header`)
//! carrying a JSON payload. Frames are written and read strictly in order.
//! A peer that closes the stream between frames produces `Ok(None)`; a peer
//! that closes inside a frame produces `ProtocolError::Truncated`.

use crate::error::ProtocolError;
use crate::protocol::{frame, timeouts::write_deadline_ms, HEADER_LEN};
use crate::protocol_core::{build_frame_header, parse_frame_header, validate_frame_size};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

/// The unit of transfer. `content == None` marks a bare directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative to the agent's search root, always `/`-separated.
    pub relative_path: String,
    #[serde(with = "content_base64")]
    pub content: Option<Vec<u8>>,
    pub origin_address: String,
    pub origin_host: String,
}

impl FileRecord {
    pub fn is_folder_marker(&self) -> bool {
        self.content.is_none()
    }

    pub fn content_len(&self) -> usize {
        self.content.as_ref().map_or(0, Vec::len)
    }
}

// Bytes travel as a base64 string; a folder marker is JSON null.
mod content_base64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match content {
            Some(bytes) => s.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|text| {
                general_purpose::STANDARD
                    .decode(text.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

/// Serialize `value` and prepend a frame header.
pub fn encode_frame<T: Serialize + ?Sized>(
    frame_type: u8,
    value: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(value)?;
    validate_frame_size(payload.len())?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&build_frame_header(frame_type, payload.len() as u32));
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Run `fut` with a deadline, mapping expiry to `ProtocolError::Timeout`.
pub async fn with_timeout<T, F>(what: &'static str, ms: u64, fut: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    match timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout(what, ms)),
    }
}

/// Read one frame. `Ok(None)` means the peer closed cleanly before a new
/// frame began.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(u8, Vec<u8>)>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut hdr[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: HEADER_LEN,
                got: filled,
            });
        }
        filled += n;
    }

    let (typ, len) = parse_frame_header(&hdr)?;
    let len = len as usize;
    validate_frame_size(len)?;

    let mut payload = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = reader.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated { expected: len, got });
        }
        got += n;
    }
    Ok(Some((typ, payload)))
}

/// Write one pre-encoded frame and flush it, bounded by a size-scaled deadline.
pub async fn write_frame<W>(writer: &mut W, encoded: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let ms = write_deadline_ms(encoded.len());
    with_timeout("frame write", ms, async {
        writer.write_all(encoded).await?;
        writer.flush().await?;
        Ok(())
    })
    .await
}

async fn read_expected<R, T>(reader: &mut R, expected: u8) -> Result<Option<T>, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        None => Ok(None),
        Some((typ, payload)) if typ == expected => decode_payload(&payload).map(Some),
        Some((typ, _)) => Err(ProtocolError::UnexpectedFrame { got: typ, expected }),
    }
}

/// Phase 1, collector side.
pub async fn send_patterns<W>(writer: &mut W, patterns: &[String]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_frame(frame::PATTERNS, patterns)?;
    write_frame(writer, &encoded).await
}

/// Phase 1, agent side. A close before the pattern set arrives is an error.
pub async fn recv_patterns<R>(reader: &mut R) -> Result<Vec<String>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    read_expected(reader, frame::PATTERNS)
        .await?
        .ok_or(ProtocolError::Closed("pattern set"))
}

/// Phase 2, agent side.
pub async fn send_record<W>(writer: &mut W, record: &FileRecord) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_frame(frame::RECORD, record)?;
    write_frame(writer, &encoded).await
}

/// Phase 2, collector side. `Ok(None)` is the end of the record stream.
pub async fn recv_record<R>(reader: &mut R) -> Result<Option<FileRecord>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    read_expected(reader, frame::RECORD).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_FRAME_SIZE;

    fn sample(path: &str, content: Option<&[u8]>) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            content: content.map(<[u8]>::to_vec),
            origin_address: "192.168.2.14".to_string(),
            origin_host: "LAB-PC 07".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_stream_round_trip_then_clean_eof() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let sent = vec![
            sample("Struktur Data 1", None),
            sample("Struktur Data 1/main.cpp", Some(b"int main() {}\n")),
            sample("Struktur Data 1/empty.py", Some(b"")),
            sample("bin/blob.c", Some(&[0u8, 255, 10, 13, 0])),
        ];

        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                for r in &sent {
                    send_record(&mut a, r).await.unwrap();
                }
                a.shutdown().await.unwrap();
            })
        };

        let mut received = Vec::new();
        while let Some(r) = recv_record(&mut b).await.unwrap() {
            received.push(r);
        }
        writer.await.unwrap();

        assert_eq!(received, sent);
        assert!(received[0].is_folder_marker());
        assert!(!received[2].is_folder_marker());
        assert_eq!(received[2].content_len(), 0);
    }

    #[test]
    fn test_largest_discoverable_file_encodes_into_one_frame() {
        use crate::fs_enum::{discover, DiscoveryOptions};
        use crate::pattern::PatternSet;
        use crate::protocol::MAX_FILE_BYTES;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("lab.c");
        std::fs::File::create(&path)
            .unwrap()
            .set_len(MAX_FILE_BYTES)
            .unwrap();

        let found: Vec<_> = discover(
            tmp.path(),
            &PatternSet::new(vec!["lab".to_string()]),
            &DiscoveryOptions::default(),
        )
        .collect();
        assert_eq!(found.len(), 1);

        let mut record = sample("", None);
        record.relative_path = found[0].relative_path.clone();
        record.content = found[0].content.clone();
        let encoded = encode_frame(frame::RECORD, &record).unwrap();
        assert!(encoded.len() - HEADER_LEN <= MAX_FRAME_SIZE);
    }

    #[test]
    fn test_folder_marker_is_null_and_empty_file_is_empty_string() {
        let marker = serde_json::to_value(sample("dir", None)).unwrap();
        assert!(marker["content"].is_null());
        let empty = serde_json::to_value(sample("f", Some(b""))).unwrap();
        assert_eq!(empty["content"], "");
        let data = serde_json::to_value(sample("f", Some(b"hi"))).unwrap();
        assert_eq!(data["content"], "aGk=");
        assert_eq!(data["origin_host"], "LAB-PC 07");
    }

    #[tokio::test]
    async fn test_patterns_exchange() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let patterns = vec!["Struktur Data".to_string(), "basis data".to_string()];
        send_patterns(&mut a, &patterns).await.unwrap();
        assert_eq!(recv_patterns(&mut b).await.unwrap(), patterns);
    }

    #[tokio::test]
    async fn test_close_before_patterns_is_error() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        assert!(matches!(
            recv_patterns(&mut b).await,
            Err(ProtocolError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_record_is_error_not_eof() {
        let encoded = encode_frame(frame::RECORD, &sample("a.c", Some(b"abcdef"))).unwrap();
        for cut in [3, HEADER_LEN, encoded.len() - 1] {
            let (mut a, mut b) = tokio::io::duplex(4096);
            a.write_all(&encoded[..cut]).await.unwrap();
            drop(a);
            assert!(
                matches!(
                    recv_record(&mut b).await,
                    Err(ProtocolError::Truncated { .. })
                ),
                "cut at {cut}"
            );
        }
    }

    #[tokio::test]
    async fn test_unexpected_frame_type() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        send_patterns(&mut a, &["x".to_string()]).await.unwrap();
        assert!(matches!(
            recv_record(&mut b).await,
            Err(ProtocolError::UnexpectedFrame {
                got: frame::PATTERNS,
                expected: frame::RECORD
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_allocation() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let hdr = build_frame_header(frame::RECORD, (MAX_FRAME_SIZE + 1) as u32);
        a.write_all(&hdr).await.unwrap();
        assert!(matches!(
            recv_record(&mut b).await,
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_base64_content_is_payload_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = br#"{"relative_path":"a","content":"!!not base64!!","origin_address":"","origin_host":""}"#;
        a.write_all(&build_frame_header(frame::RECORD, body.len() as u32))
            .await
            .unwrap();
        a.write_all(body).await.unwrap();
        assert!(matches!(
            recv_record(&mut b).await,
            Err(ProtocolError::Json(_))
        ));
    }
}
