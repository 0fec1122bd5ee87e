//! Fan-out primitives: unary scalar fan-out, streamed fan-in merge, and
//! per-shard streaming writers.
//!
//! All three drive every shard concurrently and keep per-shard results in
//! their own slot; aggregation happens once, after the last shard finished.

use std::future::Future;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::proto::store_service_client::StoreServiceClient;
use crate::proto::{Count, Statement};

/// Outcome of a scalar fan-out: the sum of all successful replies plus the
/// failure of the lowest-indexed failing shard, if any.
#[derive(Debug)]
pub struct ScalarOutcome {
    pub value: i64,
    pub error: Option<ShardError>,
}

impl ScalarOutcome {
    /// Fold into an RPC reply. A non-OK status carries no response payload
    /// on the wire, so the partial sum rides the error message instead.
    pub fn into_count(self) -> Result<Count, Status> {
        match self.error {
            None => Ok(Count { value: self.value }),
            Some(error) => Err(error.with_partial(self.value)),
        }
    }
}

/// A failure observed on one shard.
#[derive(Debug)]
pub struct ShardError {
    pub shard: usize,
    pub status: Status,
}

impl ShardError {
    /// The shard's status, annotated with the shard index and the count
    /// aggregated from the shards that did succeed.
    pub fn with_partial(self, partial: i64) -> Status {
        Status::new(
            self.status.code(),
            format!(
                "shard {} failed (partial count {}): {}",
                self.shard,
                partial,
                self.status.message()
            ),
        )
    }
}

/// Reduce per-shard scalar replies: successes are summed, failures
/// contribute zero, and the error of the lowest-indexed failing shard is
/// retained.
pub fn aggregate_counts(results: Vec<Result<i64, Status>>) -> ScalarOutcome {
    let mut value = 0i64;
    let mut error = None;
    for (shard, result) in results.into_iter().enumerate() {
        match result {
            Ok(count) => value += count,
            Err(status) => {
                if error.is_none() {
                    error = Some(ShardError { shard, status });
                }
            }
        }
    }
    ScalarOutcome { value, error }
}

/// Issue the same unary call against every shard in parallel and aggregate
/// the `Count` replies.
///
/// `call` issues one operation against one shard, which makes this generic
/// over the store contract without method-pointer machinery.
pub async fn scalar_fanout<R, F, Fut>(channels: &[Channel], request: R, call: F) -> ScalarOutcome
where
    R: Clone,
    F: Fn(StoreServiceClient<Channel>, R) -> Fut,
    Fut: Future<Output = Result<Response<Count>, Status>>,
{
    let calls = channels.iter().map(|channel| {
        let client = StoreServiceClient::new(channel.clone());
        call(client, request.clone())
    });
    let results = join_all(calls)
        .await
        .into_iter()
        .map(|result| result.map(|response| response.into_inner().value))
        .collect();
    aggregate_counts(results)
}

/// Open a streaming read on every shard and merge the records into one
/// channel-backed stream.
///
/// The channel is the serialized output sink: every shard drain task owns a
/// sender clone and records are forwarded whole, so per-shard order is
/// preserved and no record interleaves with another. Cross-shard ordering is
/// arbitrary. A shard failure stops only that shard's drain; the merge
/// completes with whatever the remaining shards return. Dropping the
/// receiver (caller went away) fails the pending sends and tears the drain
/// tasks down, releasing the shard streams.
pub fn merge_statements(
    channels: &[Channel],
    pattern: Statement,
    buffer: usize,
) -> ReceiverStream<Result<Statement, Status>> {
    let (tx, rx) = mpsc::channel(buffer);

    for (shard, channel) in channels.iter().enumerate() {
        let mut client = StoreServiceClient::new(channel.clone());
        let pattern = pattern.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut stream = match client.get_statements(Request::new(pattern)).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    warn!(shard, %status, "failed to open statement stream");
                    return;
                }
            };
            let mut count = 0u64;
            loop {
                match stream.message().await {
                    Ok(Some(stmt)) => {
                        if tx.send(Ok(stmt)).await.is_err() {
                            return;
                        }
                        count += 1;
                    }
                    Ok(None) => break,
                    Err(status) => {
                        warn!(shard, %status, "statement stream failed mid-read");
                        return;
                    }
                }
            }
            debug!(shard, count, "statement stream drained");
        });
    }

    ReceiverStream::new(rx)
}

/// Per-shard client-streaming calls, each fed through a bounded channel.
///
/// Records written through [`send`](Self::send) and
/// [`broadcast`](Self::broadcast) reach a shard in write order. Dropping the
/// senders half-closes every upload stream; [`finish`](Self::finish) does
/// that and then awaits each shard's terminal reply, in shard order.
pub struct ShardStreams<T, R> {
    senders: Vec<Option<mpsc::Sender<T>>>,
    replies: Vec<JoinHandle<Result<R, Status>>>,
}

impl<T, R> ShardStreams<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Open one call per shard. `start` issues the RPC with the channel's
    /// receive half as the request stream.
    pub fn open<F, Fut>(channels: &[Channel], buffer: usize, start: F) -> Self
    where
        F: Fn(StoreServiceClient<Channel>, ReceiverStream<T>) -> Fut,
        Fut: Future<Output = Result<Response<R>, Status>> + Send + 'static,
    {
        let mut senders = Vec::with_capacity(channels.len());
        let mut replies = Vec::with_capacity(channels.len());
        for channel in channels {
            let client = StoreServiceClient::new(channel.clone());
            let (tx, rx) = mpsc::channel(buffer);
            let call = start(client, ReceiverStream::new(rx));
            senders.push(Some(tx));
            replies.push(tokio::spawn(
                async move { call.await.map(Response::into_inner) },
            ));
        }
        Self { senders, replies }
    }

    /// Write a record to one shard. A shard that hung up mid-stream has its
    /// sender dropped, so later records for it are suppressed; the failure
    /// surfaces through its terminal reply.
    pub async fn send(&mut self, shard: usize, record: T) {
        if let Some(tx) = &self.senders[shard] {
            if tx.send(record).await.is_err() {
                warn!(shard, "shard stream closed mid-write");
                self.senders[shard] = None;
            }
        }
    }

    /// Write a record to every shard.
    pub async fn broadcast(&mut self, record: T)
    where
        T: Clone,
    {
        for shard in 0..self.senders.len() {
            self.send(shard, record.clone()).await;
        }
    }

    /// Half-close every upload stream and await the terminal replies.
    pub async fn finish(mut self) -> Vec<Result<R, Status>> {
        self.senders.clear();
        let mut results = Vec::with_capacity(self.replies.len());
        for reply in self.replies.drain(..) {
            results.push(match reply.await {
                Ok(result) => result,
                Err(join_error) => Err(Status::internal(join_error.to_string())),
            });
        }
        results
    }
}
