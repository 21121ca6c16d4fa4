//! DNS tunneling over the session
//!
//! UDP payload to port 53 is a stream of `[u16 length][query]` records. Each
//! query is resolved through a DNS-over-HTTPS endpoint and the answer is sent
//! back as `[u16 length][answer]`, the first record of the session carrying
//! the response header in front.

use crate::error::DnsError;
use crate::protocol::{ResponseHeader, ResponsePrefixer};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Default DoH endpoint
pub const DEFAULT_DOH_URL: &str = "https://1.1.1.1/dns-query";

/// Default timeout for one DoH request
pub const DEFAULT_DOH_TIMEOUT: Duration = Duration::from_secs(5);

/// Only UDP to this port is tunneled
pub const DNS_PORT: u16 = 53;

/// Media type of a raw DNS message
pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Resolves one raw DNS query into one raw DNS answer
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, query: Bytes) -> Result<Bytes, DnsError>;
}

/// RFC 8484 POST resolver
pub struct DohResolver {
    client: reqwest::Client,
    url: String,
}

impl DohResolver {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(DohResolver {
            client,
            url: url.to_string(),
        })
    }

    /// Resolver endpoint
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DnsResolver for DohResolver {
    async fn resolve(&self, query: Bytes) -> Result<Bytes, DnsError> {
        let response = self
            .client
            .post(&self.url)
            .header(http::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(http::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?)
    }
}

/// Reassembles length-prefixed records from arbitrarily split chunks
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: BytesMut,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every record it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while self.buffer.len() >= 2 {
            let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if self.buffer.len() < 2 + len {
                break;
            }
            self.buffer.advance(2);
            records.push(self.buffer.split_to(len).freeze());
        }
        records
    }

    /// Bytes of an incomplete record still buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Prefix `payload` with its 16-bit big-endian length
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>, DnsError> {
    let len = u16::try_from(payload.len()).map_err(|_| DnsError::ResponseTooLarge(payload.len()))?;
    let mut record = Vec::with_capacity(2 + payload.len());
    record.extend_from_slice(&len.to_be_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

/// DNS side of a session: demultiplexes queries and resolves them in order
pub struct DnsTunnel {
    decoder: RecordDecoder,
    queries: mpsc::Sender<Bytes>,
    worker: JoinHandle<()>,
}

impl DnsTunnel {
    /// Start the resolver worker; answers go to `ws_sender`
    pub fn start(
        resolver: Arc<dyn DnsResolver>,
        header: ResponseHeader,
        ws_sender: mpsc::Sender<WsMessage>,
    ) -> Self {
        let (queries, rx) = mpsc::channel(64);
        let worker = tokio::spawn(resolve_queries(
            resolver,
            rx,
            ResponsePrefixer::new(header),
            ws_sender,
        ));

        DnsTunnel {
            decoder: RecordDecoder::new(),
            queries,
            worker,
        }
    }

    /// Feed raw UDP payload from the client
    pub async fn feed(&mut self, chunk: &[u8]) {
        for query in self.decoder.feed(chunk) {
            if query.is_empty() {
                trace!("Skipping empty DNS record");
                continue;
            }
            if self.queries.send(query).await.is_err() {
                debug!("DNS worker gone, dropping query");
                return;
            }
        }
    }

    /// Stop resolving; queued queries are discarded
    pub fn close(self) {
        self.worker.abort();
    }
}

async fn resolve_queries(
    resolver: Arc<dyn DnsResolver>,
    mut queries: mpsc::Receiver<Bytes>,
    mut prefixer: ResponsePrefixer,
    ws_sender: mpsc::Sender<WsMessage>,
) {
    while let Some(query) = queries.recv().await {
        trace!("Resolving DNS query ({} bytes)", query.len());

        let answer = match resolver.resolve(query).await {
            Ok(answer) => answer,
            Err(e) => {
                debug!("DNS query failed: {}", e);
                continue;
            }
        };

        let record = match encode_record(&answer) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping DNS answer: {}", e);
                continue;
            }
        };

        if ws_sender
            .send(WsMessage::Binary(prefixer.wrap(&record)))
            .await
            .is_err()
        {
            break;
        }
    }
}
