//! Session bridge between one WebSocket client and its egress

use crate::credential::CredentialOracle;
use crate::dns::{DnsResolver, DnsTunnel, DNS_PORT};
use crate::egress::{EgressDispatcher, EgressStrategy};
use crate::error::DropReason;
use crate::protocol::{decode_opening_frame, Command, ResponsePrefixer};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, trace};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Default buffer size for data transfer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Shared, immutable collaborators of every session
pub struct SessionContext {
    /// Credential check for opening frames
    pub oracle: Arc<CredentialOracle>,

    /// TCP egress
    pub dispatcher: EgressDispatcher,

    /// Upstream for tunneled DNS
    pub resolver: Arc<dyn DnsResolver>,

    /// Read buffer size for the egress stream
    pub buffer_size: usize,
}

/// Where inbound bytes go once the opening frame is decoded
enum Route {
    /// Opening frame not seen yet
    Pending,

    /// Established TCP egress
    Tcp {
        writer: OwnedWriteHalf,
        downlink: JoinHandle<()>,
    },

    /// DNS tunnel
    Dns(DnsTunnel),
}

impl Route {
    async fn close(self) {
        match self {
            Route::Pending => {}
            Route::Tcp {
                mut writer,
                downlink,
            } => {
                let _ = writer.shutdown().await;
                downlink.abort();
            }
            Route::Dns(tunnel) => tunnel.close(),
        }
    }
}

/// How a session ended
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed or errored
    ClientClosed,

    /// Egress stream ended or errored
    RemoteClosed,

    /// Dropped silently
    Dropped(DropReason),
}

/// One client connection, end to end
pub struct Session {
    ctx: Arc<SessionContext>,
    strategies: Vec<EgressStrategy>,
    route: Route,
    ws_sender: mpsc::Sender<WsMessage>,
    remote_closed: Arc<Notify>,
}

impl Session {
    /// Run a session over an accepted WebSocket until either side closes.
    ///
    /// `early_data`, when present, is processed as the first inbound message.
    pub async fn run<S>(
        ctx: Arc<SessionContext>,
        strategies: Vec<EgressStrategy>,
        ws: WebSocketStream<S>,
        early_data: Option<Vec<u8>>,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sink, mut ws_stream) = ws.split();
        let (ws_sender, ws_receiver) = mpsc::channel(100);
        let writer = tokio::spawn(write_to_client(ws_sink, ws_receiver));

        let mut session = Session {
            ctx,
            strategies,
            route: Route::Pending,
            ws_sender,
            remote_closed: Arc::new(Notify::new()),
        };

        let end = session.pump_inbound(&mut ws_stream, early_data).await;

        let Session {
            route, ws_sender, ..
        } = session;
        route.close().await;
        drop(ws_sender);

        match &end {
            SessionEnd::Dropped(reason) => {
                debug!("Session dropped: {}", reason);
                // No close frame: the connection just goes away
                writer.abort();
            }
            _ => {
                trace!("Session ended: {:?}", end);
                let _ = writer.await;
            }
        }

        end
    }

    async fn pump_inbound<S>(
        &mut self,
        ws_stream: &mut SplitStream<WebSocketStream<S>>,
        early_data: Option<Vec<u8>>,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(data) = early_data {
            trace!("Processing {} bytes of early data", data.len());
            if let Err(reason) = self.handle_inbound(data).await {
                return SessionEnd::Dropped(reason);
            }
        }

        let remote_closed = self.remote_closed.clone();
        loop {
            let msg = tokio::select! {
                msg = ws_stream.next() => msg,
                _ = remote_closed.notified() => return SessionEnd::RemoteClosed,
            };

            match msg {
                Some(Ok(WsMessage::Binary(data))) => {
                    if let Err(reason) = self.handle_inbound(data).await {
                        return SessionEnd::Dropped(reason);
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::ClientClosed,
                Some(Ok(other)) => {
                    trace!("Ignoring non-binary WebSocket message ({} bytes)", other.len());
                }
                Some(Err(e)) => {
                    debug!("WebSocket error: {}", e);
                    return SessionEnd::ClientClosed;
                }
            }
        }
    }

    /// Route one inbound message. Messages are handled strictly in order.
    async fn handle_inbound(&mut self, data: Vec<u8>) -> Result<(), DropReason> {
        if let Route::Pending = self.route {
            return self.open(data).await;
        }

        match &mut self.route {
            Route::Dns(tunnel) => {
                tunnel.feed(&data).await;
                Ok(())
            }
            Route::Tcp { writer, .. } => {
                if let Err(e) = writer.write_all(&data).await {
                    debug!("Failed to write to egress: {}", e);
                    self.remote_closed.notify_one();
                }
                Ok(())
            }
            Route::Pending => Ok(()),
        }
    }

    /// Decode the opening frame and set up the route
    async fn open(&mut self, frame: Vec<u8>) -> Result<(), DropReason> {
        let cmd = decode_opening_frame(&frame, &self.ctx.oracle)?;
        let payload = &frame[cmd.payload_offset..];
        let header = cmd.response_header();
        let host = cmd.address.host();

        match cmd.command {
            Command::Udp => {
                if cmd.port != DNS_PORT {
                    return Err(DropReason::UnsupportedUdpPort(cmd.port));
                }
                debug!("DNS tunnel opened via {}", host);

                let mut tunnel =
                    DnsTunnel::start(self.ctx.resolver.clone(), header, self.ws_sender.clone());
                tunnel.feed(payload).await;
                self.route = Route::Dns(tunnel);
            }
            Command::Tcp => {
                let stream = self
                    .ctx
                    .dispatcher
                    .connect(&self.strategies, &host, cmd.port)
                    .await?;
                let (reader, mut writer) = stream.into_split();

                if !payload.is_empty() {
                    if let Err(e) = writer.write_all(payload).await {
                        debug!("Failed to write initial payload to {}:{}: {}", host, cmd.port, e);
                        self.remote_closed.notify_one();
                    }
                }

                let downlink = tokio::spawn(copy_to_client(
                    reader,
                    self.ws_sender.clone(),
                    ResponsePrefixer::new(header),
                    self.ctx.buffer_size,
                    self.remote_closed.clone(),
                ));
                self.route = Route::Tcp { writer, downlink };
            }
        }

        Ok(())
    }
}

/// Forward egress bytes to the client, prefixing the first chunk
async fn copy_to_client(
    mut reader: OwnedReadHalf,
    ws_sender: mpsc::Sender<WsMessage>,
    mut prefixer: ResponsePrefixer,
    buffer_size: usize,
    remote_closed: Arc<Notify>,
) {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let frame = prefixer.wrap(&buffer[..n]);
                if ws_sender.send(WsMessage::Binary(frame)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Failed to read from egress: {}", e);
                break;
            }
        }
    }

    remote_closed.notify_one();
}

/// Drain the outbound queue into the WebSocket, then close it
async fn write_to_client<S>(
    mut ws_sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut receiver: mpsc::Receiver<WsMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = receiver.recv().await {
        if let Err(e) = ws_sink.send(msg).await {
            error!("Failed to send message: {}", e);
            break;
        }
    }

    let _ = ws_sink.close().await;
}
