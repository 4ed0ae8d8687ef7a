//! Allocation wire protocol.
//!
//! Line-oriented over a single opened stream: newline terminated, UTF-8, no
//! length prefix. The requester sends `START-PROGRAM <service-hash>` and
//! reads exactly one reply line, which must match the instance address
//! grammar `^(?:[0-9]{1,3}\.){3}[0-9]{1,3}:[0-9]{1,5}$` to be accepted. Any
//! other reply - including the allocator's `ERROR` token - counts as a
//! failure for that allocator.

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CMD_START_PROGRAM, MAX_LINE_LEN};
use crate::protocol::error::{FabricError, Result};

/// Grammar for a freshly allocated instance address: dotted-quad `host:port`.
static INSTANCE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}:[0-9]{1,5}$").unwrap());

/// Returns true if `reply` matches the instance address grammar.
///
/// The controller validates every allocator reply against this grammar and
/// treats any non-match as a failure for that allocator.
pub fn is_instance_addr(reply: &str) -> bool {
    INSTANCE_ADDR.is_match(reply)
}

/// A parsed allocation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocCommand {
    /// Spawn an instance of the service named by this hash.
    StartProgram { service_hash: String },
}

impl AllocCommand {
    /// Parse one command line. Unknown verbs and missing arguments yield
    /// `None`; the allocator answers those with the error token.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim_end().splitn(2, ' ');
        match (parts.next(), parts.next()) {
            (Some(CMD_START_PROGRAM), Some(hash)) if !hash.is_empty() => {
                Some(AllocCommand::StartProgram {
                    service_hash: hash.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Encode the command as a single wire line (without the newline).
    pub fn encode(&self) -> String {
        match self {
            AllocCommand::StartProgram { service_hash } => {
                format!("{} {}", CMD_START_PROGRAM, service_hash)
            }
        }
    }
}

/// Write one newline-terminated line and flush.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated line, bounded by [`MAX_LINE_LEN`].
///
/// Reads byte-at-a-time so nothing past the newline is consumed - the
/// remainder of the stream stays available to the caller. EOF after at least
/// one byte yields the partial line (peers may finish the stream instead of
/// sending a trailing newline); EOF on an empty buffer is a transport error.
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    loop {
        match reader.read_u8().await {
            Ok(b'\n') => break,
            Ok(byte) => {
                if buf.len() >= MAX_LINE_LEN {
                    return Err(FabricError::Protocol(format!(
                        "line exceeds {} bytes",
                        MAX_LINE_LEN
                    )));
                }
                buf.push(byte);
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if buf.is_empty() {
                    return Err(FabricError::Transport(
                        "stream closed before a line was received".to_string(),
                    ));
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    // Tolerate CRLF writers.
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| FabricError::Protocol("line is not UTF-8".to_string()))
}
