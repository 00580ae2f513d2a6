//! The DEFLATE-compressed duplex wrapper.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::TransportError;

/// The fixed DEFLATE level used in both directions of an agent connection.
pub const COMPRESSION_LEVEL: u32 = 6;

const READ_CHUNK: usize = 8 * 1024;

/// Wraps a duplex connection with raw-DEFLATE compression at
/// [`COMPRESSION_LEVEL`], flushing a `Z_SYNC_FLUSH` boundary on every
/// [`tokio::io::AsyncWriteExt::flush`] call so each flushed write is fully
/// decompressible by the peer without waiting for more data.
///
/// [`CompressedStream::close`], [`CompressedStream::local_addr`], and
/// [`CompressedStream::peer_addr`] always fail: this connection has no
/// socket-level identity of its own. Callers end the connection by
/// dropping it (closing the underlying transport) or terminating the
/// process on the other end.
pub struct CompressedStream<S> {
    inner: S,
    compress: Compress,
    decompress: Decompress,
    write_buf: Vec<u8>,
    read_raw: Vec<u8>,
    read_plain: Vec<u8>,
    inner_eof: bool,
}

impl<S> CompressedStream<S> {
    /// Wraps `inner` with a fresh compressor and decompressor pair at
    /// [`COMPRESSION_LEVEL`], using raw DEFLATE framing (no zlib
    /// header/trailer).
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            compress: Compress::new(Compression::new(COMPRESSION_LEVEL), false),
            decompress: Decompress::new(false),
            write_buf: Vec::new(),
            read_raw: Vec::new(),
            read_plain: Vec::new(),
            inner_eof: false,
        }
    }

    /// Unwraps the stream, discarding any buffered but undrained
    /// compressed output. Callers that need a clean shutdown should
    /// `flush`/`shutdown` the stream first.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Not supported: this connection does not correspond to a real
    /// socket, so there is no independent way to close it other than
    /// dropping the stream or ending the underlying transport process.
    ///
    /// # Errors
    ///
    /// Always returns [`TransportError::Unsupported`].
    pub fn close(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("Close"))
    }

    /// Not supported: see [`CompressedStream::close`].
    ///
    /// # Errors
    ///
    /// Always returns [`TransportError::Unsupported`].
    pub fn set_deadline(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("SetDeadline"))
    }

    /// Not supported: see [`CompressedStream::close`].
    ///
    /// # Errors
    ///
    /// Always returns [`TransportError::Unsupported`].
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Err(TransportError::Unsupported("LocalAddr"))
    }

    /// Not supported: see [`CompressedStream::close`].
    ///
    /// # Errors
    ///
    /// Always returns [`TransportError::Unsupported`].
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Err(TransportError::Unsupported("RemoteAddr"))
    }
}

impl<S: AsyncWrite + Unpin> CompressedStream<S> {
    fn drain_write_buf(
        inner: &mut S,
        write_buf: &mut Vec<u8>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        while !write_buf.is_empty() {
            match Pin::new(&mut *inner).poll_write(cx, write_buf) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write a compressed frame to the transport",
                    )));
                }
                Poll::Ready(Ok(n)) => {
                    write_buf.drain(0..n);
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CompressedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_plain.is_empty() {
                let take = buf.remaining().min(this.read_plain.len());
                buf.put_slice(&this.read_plain[..take]);
                this.read_plain.drain(0..take);
                return Poll::Ready(Ok(()));
            }

            if !this.read_raw.is_empty() {
                let consumed = decompress_chunk(
                    &mut this.decompress,
                    &this.read_raw,
                    &mut this.read_plain,
                )?;
                this.read_raw.drain(0..consumed);
                if !this.read_plain.is_empty() {
                    continue;
                }
                if consumed == 0 && this.inner_eof {
                    return Poll::Ready(Ok(()));
                }
            }

            if this.inner_eof {
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut read_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut this.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        this.inner_eof = true;
                    } else {
                        this.read_raw.extend_from_slice(filled);
                    }
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CompressedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx))?;
        compress_chunk(&mut this.compress, buf, &mut this.write_buf)?;
        // Opportunistic: try to push the freshly compressed bytes out now,
        // but a full internal buffer is not an error, only lost overlap.
        if let Poll::Ready(Err(error)) =
            Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx)
        {
            return Poll::Ready(Err(error));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx))?;
        compress_flush(&mut this.compress, &mut this.write_buf, FlushCompress::Sync)?;
        ready!(Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx))?;
        compress_flush(&mut this.compress, &mut this.write_buf, FlushCompress::Finish)?;
        ready!(Self::drain_write_buf(&mut this.inner, &mut this.write_buf, cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

fn compress_chunk(compress: &mut Compress, input: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
    let mut consumed = 0usize;
    while consumed < input.len() {
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        let status = compress
            .compress_vec(&input[consumed..], output, FlushCompress::None)
            .map_err(to_io_error)?;
        consumed += usize::try_from(compress.total_in() - before_in).unwrap_or(usize::MAX);
        let produced = compress.total_out() - before_out;
        if consumed < input.len() && produced == 0 && status == Status::BufError {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "compressor made no progress on a non-empty input",
            ));
        }
    }
    Ok(())
}

fn compress_flush(
    compress: &mut Compress,
    output: &mut Vec<u8>,
    flush: FlushCompress,
) -> io::Result<()> {
    loop {
        let before_out = compress.total_out();
        let status = compress
            .compress_vec(&[], output, flush)
            .map_err(to_io_error)?;
        let produced = compress.total_out() - before_out;
        match status {
            Status::StreamEnd => return Ok(()),
            _ if produced == 0 => return Ok(()),
            _ => continue,
        }
    }
}

/// Decompresses as much of `input` as yields forward progress, appending
/// plaintext to `output` and returning the number of input bytes consumed.
/// A return of `0` with non-empty `input` means the buffered bytes do not
/// yet contain a complete flush boundary and more must be read from the
/// connection.
fn decompress_chunk(
    decompress: &mut Decompress,
    input: &[u8],
    output: &mut Vec<u8>,
) -> io::Result<usize> {
    let before_in = decompress.total_in();
    decompress
        .decompress_vec(input, output, FlushDecompress::None)
        .map_err(to_io_error_decompress)?;
    Ok(usize::try_from(decompress.total_in() - before_in).unwrap_or(usize::MAX))
}

fn to_io_error(error: flate2::CompressError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

fn to_io_error_decompress(error: flate2::DecompressError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}
