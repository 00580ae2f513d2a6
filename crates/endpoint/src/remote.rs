//! The remote endpoint: an [`Endpoint`](crate::Endpoint) implementation
//! that proxies every call over a framed RPC connection to an agent
//! process.

use crate::{EndpointError, Result, ScanReport, SupplyFrame, TransitionReport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use model::Entry;
use protocol::envelope::{Request, Response};
use protocol::multiplex::MessageCodec;
use reconcile::Change;
use rsync::{Frame, Signature};
use stage::{StageRequest, StageResponse};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use transport::CompressedStream;

struct Halves<S> {
    writer: FramedWrite<WriteHalf<CompressedStream<S>>, MessageCodec<Request>>,
    reader: FramedRead<ReadHalf<CompressedStream<S>>, MessageCodec<Response>>,
}

/// A remote endpoint reached over `S` (typically a transport process's
/// stdin/stdout, joined by [`transport::Joined`]). Holds both halves of
/// the framed connection behind one lock so a whole request/response
/// exchange — including a multi-frame `Supply` reply — is serialized
/// against concurrent calls, matching the agent's single-threaded
/// dispatch loop.
pub struct RemoteEndpoint<S> {
    halves: Mutex<Halves<S>>,
}

impl<S> RemoteEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Performs the client-side version handshake over `connection`, then
    /// wraps it as a compressed, framed endpoint connection.
    pub async fn handshake(connection: S) -> Result<Self> {
        let mut compressed = CompressedStream::new(connection);
        protocol::version::send_then_receive(&mut compressed, protocol::version::CURRENT).await?;
        let (read_half, write_half) = tokio::io::split(compressed);
        Ok(Self {
            halves: Mutex::new(Halves {
                writer: FramedWrite::new(write_half, MessageCodec::new()),
                reader: FramedRead::new(read_half, MessageCodec::new()),
            }),
        })
    }

    async fn roundtrip(&self, request: Request) -> Result<Response> {
        let mut halves = self.halves.lock().await;
        halves.writer.send(request).await?;
        let response = halves
            .reader
            .next()
            .await
            .ok_or(EndpointError::ConnectionClosed)??;
        Ok(response)
    }
}

#[async_trait]
impl<S> super::Endpoint for RemoteEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn poll(&self, cancellation: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = cancellation.cancelled() => Err(EndpointError::Cancelled),
            response = self.roundtrip(Request::Poll) => {
                match response? {
                    Response::Poll => Ok(()),
                    Response::Error(message) => Err(EndpointError::Remote(message)),
                    _ => Err(EndpointError::UnexpectedResponse("poll")),
                }
            }
        }
    }

    async fn scan(&self, baseline: Option<Entry>, cancellation: &CancellationToken) -> Result<ScanReport> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        match self.roundtrip(Request::Scan { baseline }).await? {
            Response::Scan {
                snapshot,
                preserves_executability,
                decomposes_unicode,
                error: None,
            } => Ok(ScanReport {
                snapshot,
                preserves_executability,
                decomposes_unicode,
            }),
            Response::Scan { error: Some(message), .. } => Err(EndpointError::Remote(message)),
            Response::Error(message) => Err(EndpointError::Remote(message)),
            _ => Err(EndpointError::UnexpectedResponse("scan")),
        }
    }

    async fn stage(
        &self,
        requests: Vec<StageRequest>,
        cancellation: &CancellationToken,
    ) -> Result<StageResponse> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        match self.roundtrip(Request::Stage { requests }).await? {
            Response::Stage(response) => Ok(response),
            Response::Error(message) => Err(EndpointError::Remote(message)),
            _ => Err(EndpointError::UnexpectedResponse("stage")),
        }
    }

    async fn supply(
        &self,
        paths: Vec<String>,
        signatures: HashMap<String, Signature>,
        sink: mpsc::UnboundedSender<SupplyFrame>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        let mut pending: std::collections::HashSet<String> = paths.iter().cloned().collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut halves = self.halves.lock().await;
        halves.writer.send(Request::Supply { paths, signatures }).await?;

        while !pending.is_empty() {
            if cancellation.is_cancelled() {
                return Err(EndpointError::Cancelled);
            }
            let response = halves
                .reader
                .next()
                .await
                .ok_or(EndpointError::ConnectionClosed)??;
            match response {
                Response::SupplyFrame { path, frame } => {
                    if matches!(frame, Frame::Done) {
                        pending.remove(&path);
                    }
                    if sink.send(SupplyFrame { path, frame }).is_err() {
                        return Ok(());
                    }
                }
                Response::Error(message) => return Err(EndpointError::Remote(message)),
                _ => return Err(EndpointError::UnexpectedResponse("supply")),
            }
        }
        Ok(())
    }

    async fn receive(
        &self,
        path: String,
        digest: Vec<u8>,
        signature: Signature,
        frames: Vec<Frame>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        match self
            .roundtrip(Request::Receive {
                path,
                digest,
                signature,
                frames,
            })
            .await?
        {
            Response::Receive => Ok(()),
            Response::Error(message) => Err(EndpointError::Remote(message)),
            _ => Err(EndpointError::UnexpectedResponse("receive")),
        }
    }

    async fn transition(&self, changes: Vec<Change>, cancellation: &CancellationToken) -> Result<TransitionReport> {
        if cancellation.is_cancelled() {
            return Err(EndpointError::Cancelled);
        }
        match self.roundtrip(Request::Transition { changes }).await? {
            Response::Transition { applied, problems } => Ok(TransitionReport {
                applied,
                problems: problems
                    .into_iter()
                    .map(|problem| crate::TransitionProblem {
                        path: problem.path,
                        reason: problem.reason,
                    })
                    .collect(),
            }),
            Response::Error(message) => Err(EndpointError::Remote(message)),
            _ => Err(EndpointError::UnexpectedResponse("transition")),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        match self.roundtrip(Request::Shutdown).await? {
            Response::Shutdown => Ok(()),
            Response::Error(message) => Err(EndpointError::Remote(message)),
            _ => Err(EndpointError::UnexpectedResponse("shutdown")),
        }
    }
}
