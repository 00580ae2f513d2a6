//! The 12-byte version handshake exchanged before any protocol traffic.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

/// The byte width of an encoded [`VersionTriple`]: three big-endian `u32`
/// fields.
pub const ENCODED_LEN: usize = 12;

/// This build's protocol version. Bump whenever a wire-incompatible change
/// is made to the envelope, multiplex framing, or request/response set.
pub const CURRENT: VersionTriple = VersionTriple {
    major: 1,
    minor: 0,
    patch: 0,
};

/// A (major, minor, patch) version triple, encoded on the wire as three
/// consecutive big-endian `u32` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTriple {
    /// Incompatible wire-format changes.
    pub major: u32,
    /// Backwards-compatible additions.
    pub minor: u32,
    /// Backwards-compatible fixes.
    pub patch: u32,
}

impl VersionTriple {
    /// Encodes this triple as 12 big-endian bytes.
    #[must_use]
    pub fn encode(self) -> [u8; ENCODED_LEN] {
        let mut bytes = [0u8; ENCODED_LEN];
        bytes[0..4].copy_from_slice(&self.major.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.minor.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.patch.to_be_bytes());
        bytes
    }

    /// Decodes a triple from exactly [`ENCODED_LEN`] bytes.
    #[must_use]
    pub fn decode(bytes: [u8; ENCODED_LEN]) -> Self {
        Self {
            major: u32::from_be_bytes(bytes[0..4].try_into().expect("4-byte slice")),
            minor: u32::from_be_bytes(bytes[4..8].try_into().expect("4-byte slice")),
            patch: u32::from_be_bytes(bytes[8..12].try_into().expect("4-byte slice")),
        }
    }
}

/// Writes `local`'s encoded version, then reads and returns the peer's.
/// Used by whichever side sends first.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] on a connection failure and
/// [`ProtocolError::VersionMismatch`] if the peer's triple differs in any
/// component.
pub async fn send_then_receive<S: AsyncWrite + AsyncRead + Unpin>(
    stream: &mut S,
    local: VersionTriple,
) -> Result<VersionTriple, ProtocolError> {
    stream.write_all(&local.encode()).await?;
    stream.flush().await?;
    receive_and_check(stream, local).await
}

/// Reads the peer's encoded version first, then writes `local`'s. Used by
/// whichever side receives first.
///
/// # Errors
///
/// Same as [`send_then_receive`].
pub async fn receive_then_send<S: AsyncWrite + AsyncRead + Unpin>(
    stream: &mut S,
    local: VersionTriple,
) -> Result<VersionTriple, ProtocolError> {
    let remote = read_triple(stream).await?;
    stream.write_all(&local.encode()).await?;
    stream.flush().await?;
    check_match(local, remote)?;
    Ok(remote)
}

async fn receive_and_check<S: AsyncRead + Unpin>(
    stream: &mut S,
    local: VersionTriple,
) -> Result<VersionTriple, ProtocolError> {
    let remote = read_triple(stream).await?;
    check_match(local, remote)?;
    Ok(remote)
}

async fn read_triple<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<VersionTriple, ProtocolError> {
    let mut bytes = [0u8; ENCODED_LEN];
    stream.read_exact(&mut bytes).await?;
    Ok(VersionTriple::decode(bytes))
}

fn check_match(local: VersionTriple, remote: VersionTriple) -> Result<(), ProtocolError> {
    if local != remote {
        tracing::error!(?local, ?remote, "version handshake mismatch");
        return Err(ProtocolError::VersionMismatch { local, remote });
    }
    Ok(())
}
