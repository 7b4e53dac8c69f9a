//! Dropwatch wire protocol implementation.
//!
//! Each file is delivered over its own TCP connection. The client writes a
//! header, streams the raw file body, then reads a single response.
//!
//! ## Header Format
//!
//! ```text
//! ┌──────────────┬──────────────────┬────────────────────────┐
//! │ Name length  │    File name     │       File size        │
//! │   4 bytes    │     N bytes      │       16 bytes         │
//! │ i32 (native) │      UTF-8       │ ASCII decimal, padded  │
//! └──────────────┴──────────────────┴────────────────────────┘
//! ```
//!
//! - Name length: basename length in bytes, native byte order
//! - File name: basename only, never a directory component
//! - File size: decimal digits, left-justified and padded with spaces
//!
//! ## Response
//!
//! The endpoint answers `SUCCESS` or `FAILURE` in ASCII. Anything else is an
//! unknown response.

use std::path::Path;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Size of the name length field in bytes
pub const LENGTH_FIELD_LEN: usize = 4;

/// Size of the file size field in bytes
pub const SIZE_FIELD_LEN: usize = 16;

/// Largest name length accepted when decoding (64 KB)
pub const MAX_DECODED_NAME_LEN: usize = 64 * 1024;

/// Positive acknowledgement
pub const SUCCESS: &[u8] = b"SUCCESS";

/// Negative acknowledgement
pub const FAILURE: &[u8] = b"FAILURE";

/// Header sent before a file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Basename bytes (UTF-8)
    pub file_name: Vec<u8>,
    /// Body length in bytes
    pub file_size: u64,
}

impl FrameHeader {
    /// Create a header for a file name and size.
    #[must_use]
    pub fn new(file_name: &str, file_size: u64) -> Self {
        Self {
            file_name: file_name.as_bytes().to_vec(),
            file_size,
        }
    }

    /// Create a header from a path, keeping only its basename.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPath` if the path has no file name component
    /// or the name is not valid UTF-8.
    pub fn for_path(path: &Path, file_size: u64) -> Result<Self> {
        let name = path
            .file_name()
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let name = name.to_str().ok_or_else(|| {
            Error::InvalidPath(format!("file name is not UTF-8: {}", path.display()))
        })?;
        Ok(Self::new(name, file_size))
    }

    /// Basename as text, replacing invalid UTF-8.
    #[must_use]
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.file_name).into_owned()
    }

    /// Encoded length of this header in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        LENGTH_FIELD_LEN + self.file_name.len() + SIZE_FIELD_LEN
    }

    /// Encode the header to bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolError` if the name is longer than `i32::MAX`
    /// bytes or the size needs more than 16 digits.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let name_len = i32::try_from(self.file_name.len()).map_err(|_| {
            Error::ProtocolError(format!(
                "file name too long: {} bytes",
                self.file_name.len()
            ))
        })?;

        let size_field = format!("{:<width$}", self.file_size, width = SIZE_FIELD_LEN);
        if size_field.len() > SIZE_FIELD_LEN {
            return Err(Error::ProtocolError(format!(
                "file size {} does not fit in {SIZE_FIELD_LEN} characters",
                self.file_size
            )));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&name_len.to_ne_bytes());
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(size_field.as_bytes());
        Ok(buf)
    }

    /// Decode a header from the front of a buffer.
    ///
    /// Returns the header and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolError` if the buffer is incomplete or a field
    /// is malformed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < LENGTH_FIELD_LEN {
            return Err(Error::ProtocolError("incomplete header".to_string()));
        }

        let name_len = decode_name_len(&[buf[0], buf[1], buf[2], buf[3]])?;
        let total = LENGTH_FIELD_LEN + name_len + SIZE_FIELD_LEN;
        if buf.len() < total {
            return Err(Error::ProtocolError(format!(
                "incomplete header: need {total} bytes, have {}",
                buf.len()
            )));
        }

        let name_end = LENGTH_FIELD_LEN + name_len;
        let file_name = buf[LENGTH_FIELD_LEN..name_end].to_vec();
        let file_size = decode_size_field(&buf[name_end..total])?;

        Ok((
            Self {
                file_name,
                file_size,
            },
            total,
        ))
    }
}

fn decode_name_len(bytes: &[u8; LENGTH_FIELD_LEN]) -> Result<usize> {
    let raw = i32::from_ne_bytes(*bytes);
    let len = usize::try_from(raw)
        .map_err(|_| Error::ProtocolError(format!("negative name length: {raw}")))?;
    if len > MAX_DECODED_NAME_LEN {
        return Err(Error::ProtocolError(format!("name too long: {len} bytes")));
    }
    Ok(len)
}

fn decode_size_field(field: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .map_err(|_| Error::ProtocolError("size field is not ASCII".to_string()))?;
    text.trim_matches(' ')
        .parse()
        .map_err(|_| Error::ProtocolError(format!("invalid size field: {text:?}")))
}

/// Acknowledgement sent by the endpoint after the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// File stored
    Success,
    /// File rejected
    Failure,
}

impl Response {
    /// Wire bytes for this response.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Success => SUCCESS,
            Self::Failure => FAILURE,
        }
    }
}

/// Result of inspecting the bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Still a prefix of a recognized response
    Incomplete,
    /// A complete recognized response
    Complete(Response),
    /// Cannot become a recognized response
    Unknown,
}

/// Classify accumulated response bytes.
#[must_use]
pub fn classify_response(buf: &[u8]) -> ResponseState {
    if buf == SUCCESS {
        ResponseState::Complete(Response::Success)
    } else if buf == FAILURE {
        ResponseState::Complete(Response::Failure)
    } else if SUCCESS.starts_with(buf) || FAILURE.starts_with(buf) {
        ResponseState::Incomplete
    } else {
        ResponseState::Unknown
    }
}

/// Write an encoded header to a stream.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn write_header<W>(writer: &mut W, header: &FrameHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = header.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a complete header from a stream.
///
/// # Errors
///
/// Returns an error if reading fails or the header is malformed.
pub async fn read_header<R>(reader: &mut R) -> Result<FrameHeader>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_FIELD_LEN];
    reader.read_exact(&mut len_buf).await?;
    let name_len = decode_name_len(&len_buf)?;

    let mut file_name = vec![0u8; name_len];
    reader.read_exact(&mut file_name).await?;

    let mut size_buf = [0u8; SIZE_FIELD_LEN];
    reader.read_exact(&mut size_buf).await?;
    let file_size = decode_size_field(&size_buf)?;

    Ok(FrameHeader {
        file_name,
        file_size,
    })
}

/// Write a response to a stream.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_response<W>(writer: &mut W, response: Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the endpoint's response.
///
/// Bytes are accumulated while they remain a prefix of `SUCCESS` or
/// `FAILURE`. Once the buffer equals one of them, any bytes the peer has
/// already sent behind it are checked too: the reply must be exactly the
/// recognized value.
///
/// # Errors
///
/// Returns `Error::ConnectionLost` if the peer closes before sending
/// anything or the read fails, and `Error::UnknownResponse` for any other
/// byte sequence.
pub async fn read_response<R>(reader: &mut R) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(SUCCESS.len());
    let mut chunk = [0u8; 64];

    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;

        if n == 0 {
            if buf.is_empty() {
                return Err(Error::ConnectionLost(
                    "endpoint closed the connection before responding".to_string(),
                ));
            }
            return Err(unknown_response(&buf));
        }

        buf.extend_from_slice(&chunk[..n]);
        match classify_response(&buf) {
            ResponseState::Complete(response) => {
                return match reader.read(&mut chunk).now_or_never() {
                    Some(Ok(n)) if n > 0 => {
                        buf.extend_from_slice(&chunk[..n]);
                        Err(unknown_response(&buf))
                    }
                    _ => Ok(response),
                };
            }
            ResponseState::Unknown => return Err(unknown_response(&buf)),
            ResponseState::Incomplete => {}
        }
    }
}

fn unknown_response(buf: &[u8]) -> Error {
    Error::UnknownResponse(String::from_utf8_lossy(buf).into_owned())
}

/// Read the endpoint's response with a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if no decision is reached within `duration`,
/// otherwise the errors of [`read_response`].
pub async fn read_response_with_timeout<R>(reader: &mut R, duration: Duration) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    timeout(duration, read_response(reader))
        .await
        .map_err(|_| Error::Timeout(duration))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct NeverReadyReader;

    impl AsyncRead for NeverReadyReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new("a.txt", 5);
        let buf = header.encode().unwrap();

        assert_eq!(buf.len(), 4 + 5 + 16);
        assert_eq!(&buf[0..4], &5i32.to_ne_bytes());
        assert_eq!(&buf[4..9], b"a.txt");
        assert_eq!(&buf[9..], b"5               ");
    }

    #[test]
    fn test_header_decode_recovers_fields() {
        let header = FrameHeader::new("résumé.pdf", 1_234_567);
        let buf = header.encode().unwrap();

        let (decoded, consumed) = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.name_lossy(), "résumé.pdf");
    }

    #[test]
    fn test_header_decode_right_justified_size() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1i32.to_ne_bytes());
        buf.push(b'x');
        buf.extend_from_slice(format!("{:>16}", 42).as_bytes());

        let (decoded, _) = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded.file_size, 42);
    }

    #[test]
    fn test_header_for_path_uses_basename() {
        let header = FrameHeader::for_path(&PathBuf::from("/watch/dir/report.csv"), 9).unwrap();
        assert_eq!(header.file_name, b"report.csv");
        assert!(FrameHeader::for_path(Path::new("/"), 0).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_header_for_path_rejects_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new("/watch").join(OsStr::from_bytes(b"bad\xffname.txt"));
        match FrameHeader::for_path(&path, 3) {
            Err(Error::InvalidPath(reason)) => assert!(reason.contains("UTF-8")),
            other => panic!("expected InvalidPath, got {other:?}"),
        }
    }

    #[test]
    fn test_header_size_too_large() {
        let header = FrameHeader::new("big", 10_u64.pow(16));
        assert!(matches!(header.encode(), Err(Error::ProtocolError(_))));

        let header = FrameHeader::new("fits", 10_u64.pow(16) - 1);
        assert!(header.encode().is_ok());
    }

    #[test]
    fn test_header_empty_file() {
        let buf = FrameHeader::new("empty", 0).encode().unwrap();
        assert_eq!(&buf[9..], b"0               ");
    }

    #[test]
    fn test_header_decode_errors() {
        assert!(FrameHeader::decode(&[0, 0]).is_err());

        let mut negative = Vec::new();
        negative.extend_from_slice(&(-1i32).to_ne_bytes());
        negative.extend_from_slice(&[b' '; 16]);
        assert!(FrameHeader::decode(&negative).is_err());

        let truncated = FrameHeader::new("name", 7).encode().unwrap();
        assert!(FrameHeader::decode(&truncated[..truncated.len() - 1]).is_err());

        let mut garbage = Vec::new();
        garbage.extend_from_slice(&0i32.to_ne_bytes());
        garbage.extend_from_slice(b"12ab            ");
        assert!(FrameHeader::decode(&garbage).is_err());
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(classify_response(b""), ResponseState::Incomplete);
        assert_eq!(classify_response(b"SUC"), ResponseState::Incomplete);
        assert_eq!(classify_response(b"FAIL"), ResponseState::Incomplete);
        assert_eq!(
            classify_response(b"SUCCESS"),
            ResponseState::Complete(Response::Success)
        );
        assert_eq!(
            classify_response(b"FAILURE"),
            ResponseState::Complete(Response::Failure)
        );
        assert_eq!(classify_response(b"OK"), ResponseState::Unknown);
        assert_eq!(classify_response(b"success"), ResponseState::Unknown);
    }

    #[tokio::test]
    async fn test_header_stream_roundtrip() {
        let mut buffer = Vec::new();
        let header = FrameHeader::new("a.txt", 5);
        write_header(&mut buffer, &header).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let read = read_header(&mut cursor).await.unwrap();
        assert_eq!(read, header);
    }

    #[tokio::test]
    async fn test_read_response_success() {
        let mut reader: &[u8] = b"SUCCESS";
        assert_eq!(read_response(&mut reader).await.unwrap(), Response::Success);
    }

    #[tokio::test]
    async fn test_read_response_rejects_trailing_bytes() {
        for reply in [&b"SUCCESSFUL"[..], &b"SUCCESS\n"[..], &b"FAILURE!"[..]] {
            let mut reader = reply;
            match read_response(&mut reader).await {
                Err(Error::UnknownResponse(text)) => {
                    assert_eq!(text.as_bytes(), reply);
                }
                other => panic!("expected UnknownResponse for {reply:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_read_response_rejects_trailing_write() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"SUCCESS").await.unwrap();
        server.write_all(b"FUL").await.unwrap();

        match read_response(&mut client).await {
            Err(Error::UnknownResponse(text)) => assert_eq!(text, "SUCCESSFUL"),
            other => panic!("expected UnknownResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_response_exact_then_open() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b"SUCCESS").await.unwrap();

        assert_eq!(read_response(&mut client).await.unwrap(), Response::Success);
        drop(server);
    }

    #[tokio::test]
    async fn test_read_response_split_across_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            server.write_all(b"FAI").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"LURE").await.unwrap();
            server
        });

        let response = read_response(&mut client).await.unwrap();
        assert_eq!(response, Response::Failure);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_response_closed_without_data() {
        let mut reader: &[u8] = b"";
        match read_response(&mut reader).await {
            Err(Error::ConnectionLost(_)) => {}
            other => panic!("expected ConnectionLost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_response_unknown() {
        let mut reader: &[u8] = b"NOPE";
        match read_response(&mut reader).await {
            Err(Error::UnknownResponse(text)) => assert_eq!(text, "NOPE"),
            other => panic!("expected UnknownResponse, got {other:?}"),
        }

        let mut partial: &[u8] = b"SUCC";
        match read_response(&mut partial).await {
            Err(Error::UnknownResponse(text)) => assert_eq!(text, "SUCC"),
            other => panic!("expected UnknownResponse, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_response_subsecond_timeout() {
        let mut reader = NeverReadyReader;
        let result = read_response_with_timeout(&mut reader, Duration::from_millis(500)).await;

        match result {
            Err(e @ Error::Timeout(_)) => assert!(e.to_string().contains("500ms")),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_response_timeout() {
        let mut reader = NeverReadyReader;
        let result = read_response_with_timeout(&mut reader, Duration::from_secs(10)).await;

        match result {
            Err(Error::Timeout(waited)) => assert_eq!(waited, Duration::from_secs(10)),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
