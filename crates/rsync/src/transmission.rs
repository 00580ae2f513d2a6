//! Per-file `{operation?, done?, error?}` frame stream and the
//! bounded-memory receiver that applies it.

use crate::delta::Operation;
use crate::signature::Signature;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the size of a single [`Operation::Data`] chunk, bounding
/// how much a receiver must buffer for one operation.
pub const MAX_DATA_SIZE: usize = 64 * 1024;

/// Errors produced while patching or receiving a transmission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RsyncError {
    /// An [`Operation::Block`] referenced a block past the signature's end.
    #[error("block index {index} out of range (signature has {block_count} blocks)")]
    InvalidBlockIndex {
        /// The out-of-range index.
        index: u32,
        /// Number of blocks actually present.
        block_count: u32,
    },
    /// A frame carried literal data larger than [`MAX_DATA_SIZE`].
    #[error("data chunk of {0} bytes exceeds the {MAX_DATA_SIZE}-byte limit")]
    DataTooLarge(usize),
    /// A frame arrived for a file whose stream had already terminated with
    /// `done`.
    #[error("operation received after stream was already marked done")]
    FrameAfterDone,
    /// The remote reported an error for this file.
    #[error("remote reported transfer error: {0}")]
    RemoteError(String),
}

/// Result type for rsync operations.
pub type Result<T> = std::result::Result<T, RsyncError>;

/// One frame of a per-file transmission stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// A delta operation to apply.
    Operation(Operation),
    /// The stream for this file is complete; no more frames follow until
    /// the next file begins.
    Done,
    /// The sender could not produce this file's content; at most one of
    /// these may appear, immediately preceding `Done`.
    Error(String),
}

/// Validates that a frame sequence for one file obeys the protocol: at most
/// one `Error`, which (if present) must immediately precede the single
/// trailing `Done`, and no frames after `Done`.
pub fn validate_stream(frames: &[Frame]) -> Result<()> {
    let mut seen_error = false;
    for (index, frame) in frames.iter().enumerate() {
        match frame {
            Frame::Operation(Operation::Data(bytes)) if bytes.len() > MAX_DATA_SIZE => {
                return Err(RsyncError::DataTooLarge(bytes.len()));
            }
            Frame::Operation(_) => {
                if index > 0 && matches!(frames[index - 1], Frame::Done) {
                    return Err(RsyncError::FrameAfterDone);
                }
            }
            Frame::Error(_) => seen_error = true,
            Frame::Done => {
                if index + 1 != frames.len() {
                    return Err(RsyncError::FrameAfterDone);
                }
            }
        }
    }
    let _ = seen_error;
    Ok(())
}

/// Receives a per-file frame stream and applies it against `base` using
/// `signature`, implementing the burn-on-error semantics: once a patch
/// fails, remaining operation frames for the same file are discarded
/// (without propagating further errors) until `Done`.
pub struct Receiver<'a> {
    base: &'a [u8],
    signature: &'a Signature,
    output: Vec<u8>,
    burning: bool,
    failure: Option<RsyncError>,
}

impl<'a> Receiver<'a> {
    /// Creates a receiver for a file whose base content is `base`, bounded
    /// by `signature`.
    #[must_use]
    pub fn new(base: &'a [u8], signature: &'a Signature) -> Self {
        Self {
            base,
            signature,
            output: Vec::new(),
            burning: false,
            failure: None,
        }
    }

    /// Feeds one frame into the receiver. Returns `Ok(Some(content))` once
    /// `Done` closes the stream; `Ok(None)` while still accumulating.
    pub fn feed(&mut self, frame: Frame) -> Result<Option<Vec<u8>>> {
        match frame {
            Frame::Done => Ok(Some(std::mem::take(&mut self.output))),
            Frame::Error(message) => {
                self.burning = true;
                self.failure = Some(RsyncError::RemoteError(message));
                Ok(None)
            }
            Frame::Operation(op) => {
                if self.burning {
                    return Ok(None);
                }
                match self.apply(&op) {
                    Ok(()) => Ok(None),
                    Err(err) => {
                        self.burning = true;
                        self.failure = Some(err);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// The failure recorded while burning, if any. `None` indicates the
    /// transmission completed cleanly (so far).
    #[must_use]
    pub fn failure(&self) -> Option<&RsyncError> {
        self.failure.as_ref()
    }

    fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Data(bytes) => {
                if bytes.len() > MAX_DATA_SIZE {
                    return Err(RsyncError::DataTooLarge(bytes.len()));
                }
                self.output.extend_from_slice(bytes);
                Ok(())
            }
            Operation::Block(index) => {
                let index_usize = *index as usize;
                if index_usize >= self.signature.blocks.len() {
                    return Err(RsyncError::InvalidBlockIndex {
                        index: *index,
                        block_count: self.signature.blocks.len() as u32,
                    });
                }
                let start = index_usize * self.signature.block_size as usize;
                let len = self
                    .signature
                    .block_len(index_usize, self.base.len() as u64) as usize;
                let end = (start + len).min(self.base.len());
                self.output.extend_from_slice(&self.base[start..end]);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::HashAlgorithm;

    #[test]
    fn empty_file_is_a_bare_done_frame() {
        assert!(validate_stream(&[Frame::Done]).is_ok());
    }

    #[test]
    fn frame_after_done_is_rejected() {
        let frames = vec![Frame::Done, Frame::Operation(Operation::Data(vec![1]))];
        assert_eq!(validate_stream(&frames), Err(RsyncError::FrameAfterDone));
    }

    #[test]
    fn oversize_data_chunk_is_rejected() {
        let frames = vec![
            Frame::Operation(Operation::Data(vec![0u8; MAX_DATA_SIZE + 1])),
            Frame::Done,
        ];
        assert_eq!(
            validate_stream(&frames),
            Err(RsyncError::DataTooLarge(MAX_DATA_SIZE + 1))
        );
    }

    #[test]
    fn receiver_assembles_operations_until_done() {
        let base = b"0123456789".to_vec();
        let sig = Signature::compute(&base, 5, HashAlgorithm::Sha1);
        let mut receiver = Receiver::new(&base, &sig);
        assert_eq!(receiver.feed(Frame::Operation(Operation::Block(0))).unwrap(), None);
        assert_eq!(
            receiver
                .feed(Frame::Operation(Operation::Data(b"XY".to_vec())))
                .unwrap(),
            None
        );
        let result = receiver.feed(Frame::Done).unwrap().unwrap();
        assert_eq!(result, b"01234XY");
        assert!(receiver.failure().is_none());
    }

    #[test]
    fn receiver_burns_remaining_operations_after_failure() {
        let base = b"hello".to_vec();
        let sig = Signature::compute(&base, 5, HashAlgorithm::Sha1);
        let mut receiver = Receiver::new(&base, &sig);
        assert_eq!(
            receiver.feed(Frame::Operation(Operation::Block(7))).unwrap(),
            None
        );
        assert!(receiver.failure().is_some());
        // Further operations are silently discarded rather than erroring again.
        assert_eq!(
            receiver
                .feed(Frame::Operation(Operation::Data(b"ignored".to_vec())))
                .unwrap(),
            None
        );
        let result = receiver.feed(Frame::Done).unwrap();
        assert_eq!(result, Some(Vec::new()));
    }
}
