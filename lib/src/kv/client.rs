use std::collections::HashMap;
use std::pin::Pin;

use log::{debug, trace};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use super::proto::{Cursor, Op, Pair};
use super::{DatabaseReader, KeyValue, KvError};

type PairStream = Pin<Box<dyn Stream<Item = Result<Pair, tonic::Status>> + Send>>;

/// Connection to the KV server. Cheap to clone; every [`Self::begin`] opens
/// an independent consistent read transaction.
#[derive(Clone)]
pub struct RemoteKv {
    grpc: tonic::client::Grpc<Channel>,
}

impl RemoteKv {
    pub async fn connect(endpoint: &str) -> Result<Self, KvError> {
        let channel = Endpoint::from_shared(endpoint.to_owned())
            .map_err(KvError::Transport)?
            .connect()
            .await?;
        Ok(Self {
            grpc: tonic::client::Grpc::new(channel),
        })
    }

    /// Open the bidirectional stream and read the transaction id announced
    /// by the server.
    pub async fn begin(&mut self) -> Result<RemoteTransaction, KvError> {
        self.grpc
            .ready()
            .await
            .map_err(|error| tonic::Status::unavailable(error.to_string()))?;

        let (requests, receiver) = mpsc::channel::<Cursor>(8);
        let codec: tonic::codec::ProstCodec<Cursor, Pair> = tonic::codec::ProstCodec::default();
        let response = self
            .grpc
            .streaming(
                tonic::Request::new(ReceiverStream::new(receiver)),
                PathAndQuery::from_static("/remote.KV/Tx"),
                codec,
            )
            .await?;
        let pairs = response.into_inner();

        RemoteTransaction::start(requests, Box::pin(pairs)).await
    }
}

struct TxChannel {
    requests: mpsc::Sender<Cursor>,
    responses: PairStream,
    /// One cursor per table is enough for the read patterns here.
    cursors: HashMap<String, u32>,
}

impl TxChannel {
    /// One write followed by one read. The stream carries no request ids;
    /// serialization is what matches replies to callers.
    async fn round_trip(&mut self, request: Cursor) -> Result<Pair, KvError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| KvError::StreamClosed)?;
        match self.responses.next().await {
            Some(Ok(pair)) => Ok(pair),
            Some(Err(status)) => Err(KvError::Io(status)),
            None => Err(KvError::StreamClosed),
        }
    }
}

/// One consistent read transaction. Cursor operations from concurrent
/// callers queue on the internal lock; the wire sees one operation at a
/// time.
pub struct RemoteTransaction {
    tx_id: u64,
    channel: Mutex<TxChannel>,
}

impl RemoteTransaction {
    pub(crate) async fn start(
        requests: mpsc::Sender<Cursor>,
        mut responses: PairStream,
    ) -> Result<Self, KvError> {
        let first = match responses.next().await {
            Some(Ok(pair)) => pair,
            Some(Err(status)) => return Err(KvError::Io(status)),
            None => return Err(KvError::StreamClosed),
        };
        trace!("KV transaction started: tx_id={}", first.tx_id);
        Ok(Self {
            tx_id: first.tx_id,
            channel: Mutex::new(TxChannel {
                requests,
                responses,
                cursors: HashMap::new(),
            }),
        })
    }

    #[must_use]
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    async fn op(&self, op: Op, cursor: u32, k: Vec<u8>, v: Vec<u8>) -> Result<Pair, KvError> {
        let mut channel = self.channel.lock().await;
        channel
            .round_trip(Cursor {
                op: op as i32,
                bucket_name: String::new(),
                cursor,
                k,
                v,
            })
            .await
    }

    pub async fn open_cursor(&self, table: &str) -> Result<u32, KvError> {
        let mut channel = self.channel.lock().await;
        let pair = channel
            .round_trip(Cursor {
                op: Op::Open as i32,
                bucket_name: table.to_owned(),
                cursor: 0,
                k: Vec::new(),
                v: Vec::new(),
            })
            .await?;
        trace!("opened cursor {} on {table}", pair.cursor_id);
        Ok(pair.cursor_id)
    }

    /// Cached cursor for `table`, opened on first use.
    async fn cursor_for(&self, table: &str) -> Result<u32, KvError> {
        {
            let channel = self.channel.lock().await;
            if let Some(cursor) = channel.cursors.get(table) {
                return Ok(*cursor);
            }
        }
        let cursor = self.open_cursor(table).await?;
        self.channel
            .lock()
            .await
            .cursors
            .insert(table.to_owned(), cursor);
        Ok(cursor)
    }

    pub async fn seek(&self, cursor: u32, key: &[u8]) -> Result<KeyValue, KvError> {
        let pair = self.op(Op::Seek, cursor, key.to_vec(), Vec::new()).await?;
        Ok(KeyValue {
            key: pair.k,
            value: pair.v,
        })
    }

    pub async fn seek_exact(&self, cursor: u32, key: &[u8]) -> Result<KeyValue, KvError> {
        let pair = self
            .op(Op::SeekExact, cursor, key.to_vec(), Vec::new())
            .await?;
        Ok(KeyValue {
            key: pair.k,
            value: pair.v,
        })
    }

    pub async fn seek_both(
        &self,
        cursor: u32,
        key: &[u8],
        subkey: &[u8],
    ) -> Result<Vec<u8>, KvError> {
        let pair = self
            .op(Op::SeekBoth, cursor, key.to_vec(), subkey.to_vec())
            .await?;
        Ok(pair.v)
    }

    pub async fn seek_both_exact(
        &self,
        cursor: u32,
        key: &[u8],
        subkey: &[u8],
    ) -> Result<KeyValue, KvError> {
        let pair = self
            .op(Op::SeekBothExact, cursor, key.to_vec(), subkey.to_vec())
            .await?;
        Ok(KeyValue {
            key: pair.k,
            value: pair.v,
        })
    }

    pub async fn next(&self, cursor: u32) -> Result<KeyValue, KvError> {
        let pair = self.op(Op::Next, cursor, Vec::new(), Vec::new()).await?;
        Ok(KeyValue {
            key: pair.k,
            value: pair.v,
        })
    }

    pub async fn last(&self, cursor: u32) -> Result<KeyValue, KvError> {
        let pair = self.op(Op::Last, cursor, Vec::new(), Vec::new()).await?;
        Ok(KeyValue {
            key: pair.k,
            value: pair.v,
        })
    }

    pub async fn close_cursor(&self, cursor: u32) -> Result<(), KvError> {
        self.op(Op::Close, cursor, Vec::new(), Vec::new()).await?;
        Ok(())
    }

    /// Cursor handle bound to this transaction.
    pub async fn cursor(&self, table: &str) -> Result<RemoteCursor<'_>, KvError> {
        let cursor_id = self.open_cursor(table).await?;
        Ok(RemoteCursor {
            transaction: self,
            cursor_id,
        })
    }

    /// End the transaction by closing the request stream; the server tears
    /// the snapshot down when the stream completes.
    pub async fn end(self) {
        debug!("KV transaction ended: tx_id={}", self.tx_id);
        drop(self.channel);
    }
}

pub struct RemoteCursor<'a> {
    transaction: &'a RemoteTransaction,
    cursor_id: u32,
}

impl RemoteCursor<'_> {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.cursor_id
    }

    pub async fn seek(&self, key: &[u8]) -> Result<KeyValue, KvError> {
        self.transaction.seek(self.cursor_id, key).await
    }

    pub async fn seek_exact(&self, key: &[u8]) -> Result<KeyValue, KvError> {
        self.transaction.seek_exact(self.cursor_id, key).await
    }

    pub async fn next(&self) -> Result<KeyValue, KvError> {
        self.transaction.next(self.cursor_id).await
    }

    pub async fn close(self) -> Result<(), KvError> {
        self.transaction.close_cursor(self.cursor_id).await
    }
}

#[async_trait::async_trait]
impl DatabaseReader for RemoteTransaction {
    async fn get(&self, table: &str, key: &[u8]) -> Result<KeyValue, KvError> {
        let cursor = self.cursor_for(table).await?;
        self.seek(cursor, key).await
    }

    async fn get_one(&self, table: &str, key: &[u8]) -> Result<Vec<u8>, KvError> {
        let cursor = self.cursor_for(table).await?;
        Ok(self.seek_exact(cursor, key).await?.value)
    }

    async fn get_both_range(
        &self,
        table: &str,
        key: &[u8],
        subkey: &[u8],
    ) -> Result<Option<Vec<u8>>, KvError> {
        let cursor = self.cursor_for(table).await?;
        let value = self.seek_both(cursor, key, subkey).await?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    async fn last(&self, table: &str) -> Result<KeyValue, KvError> {
        let cursor = self.cursor_for(table).await?;
        RemoteTransaction::last(self, cursor).await
    }
}
