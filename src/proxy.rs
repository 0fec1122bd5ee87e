//! The sharding proxy: the public store surface, fanned out over a fixed
//! set of backend shards.

use std::pin::Pin;

use tokio_stream::Stream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use crate::config::{DEFAULT_MERGE_BUFFER, DEFAULT_WRITE_BUFFER};
use crate::fanout::{
    aggregate_counts, merge_statements, scalar_fanout, ShardError, ShardStreams,
};
use crate::proto::store_service_server::StoreService;
use crate::proto::{
    update_request, ContextRequest, Count, Namespace, Statement, UpdateRequest, UpdateResponse,
};
use crate::rdf::statement_shard;

type StatementStream = Pin<Box<dyn Stream<Item = Result<Statement, Status>> + Send + 'static>>;

/// Sharding proxy over an ordered, immutable list of backend shards.
///
/// Statements live on exactly one shard chosen by content hash; namespaces
/// are replicated to every shard. Channels are created lazily, so an
/// unreachable backend surfaces as a per-request shard failure rather than
/// a start-up error.
#[derive(Clone, Debug)]
pub struct ShardingProxy {
    channels: Vec<Channel>,
}

impl ShardingProxy {
    /// Build a proxy over the given backend addresses (`http://host:port`).
    /// Index i in the list always designates the same backend.
    #[allow(clippy::result_large_err)]
    pub fn connect(backends: &[String]) -> Result<Self, Status> {
        if backends.is_empty() {
            return Err(Status::invalid_argument("no shard addresses configured"));
        }
        let mut channels = Vec::with_capacity(backends.len());
        for addr in backends {
            let endpoint = Endpoint::from_shared(addr.clone())
                .map_err(|err| Status::invalid_argument(err.to_string()))?;
            channels.push(endpoint.connect_lazy());
        }
        Ok(Self { channels })
    }

    pub fn shard_count(&self) -> usize {
        self.channels.len()
    }
}

/// Namespace writes are broadcast, so every shard reports the same number;
/// shard 0's reply is representative. Summing would overcount by the shard
/// count.
#[allow(clippy::result_large_err)]
fn first_count(results: Vec<Result<Count, Status>>) -> Result<Count, Status> {
    let value = results
        .first()
        .and_then(|result| result.as_ref().ok())
        .map(|count| count.value)
        .unwrap_or(0);
    for (shard, result) in results.into_iter().enumerate() {
        if let Err(status) = result {
            return Err(ShardError { shard, status }.with_partial(value));
        }
    }
    Ok(Count { value })
}

/// Statement writes are routed, so per-shard counts are disjoint and sum to
/// the total.
#[allow(clippy::result_large_err)]
fn summed_count(results: Vec<Result<Count, Status>>) -> Result<Count, Status> {
    aggregate_counts(
        results
            .into_iter()
            .map(|result| result.map(|count| count.value))
            .collect(),
    )
    .into_count()
}

/// Statement counters are summed across shards; namespace mutations are
/// broadcast, so shard 0's namespace counters are representative.
#[allow(clippy::result_large_err)]
fn aggregate_update(results: Vec<Result<UpdateResponse, Status>>) -> Result<UpdateResponse, Status> {
    let mut total = UpdateResponse::default();
    let mut first_error: Option<ShardError> = None;
    for (shard, result) in results.into_iter().enumerate() {
        match result {
            Ok(response) => {
                if shard == 0 {
                    total.added_namespaces = response.added_namespaces;
                    total.removed_namespaces = response.removed_namespaces;
                }
                total.added_statements += response.added_statements;
                total.removed_statements += response.removed_statements;
            }
            Err(status) => {
                if first_error.is_none() {
                    first_error = Some(ShardError { shard, status });
                }
            }
        }
    }
    match first_error {
        None => Ok(total),
        Some(error) => {
            Err(error.with_partial(total.added_statements + total.removed_statements))
        }
    }
}

#[tonic::async_trait]
impl StoreService for ShardingProxy {
    async fn add_namespaces(
        &self,
        request: Request<Streaming<Namespace>>,
    ) -> Result<Response<Count>, Status> {
        let mut inbound = request.into_inner();
        let mut streams = ShardStreams::open(
            &self.channels,
            DEFAULT_WRITE_BUFFER,
            |mut client, outbound| async move { client.add_namespaces(outbound).await },
        );

        loop {
            match inbound.message().await {
                Ok(Some(ns)) => streams.broadcast(ns).await,
                Ok(None) => break,
                Err(status) => {
                    // Finalize the shard streams even when the caller's
                    // stream broke.
                    streams.finish().await;
                    return Err(Status::invalid_argument(status.to_string()));
                }
            }
        }

        first_count(streams.finish().await).map(Response::new)
    }

    async fn add_statements(
        &self,
        request: Request<Streaming<Statement>>,
    ) -> Result<Response<Count>, Status> {
        let mut inbound = request.into_inner();
        let shard_count = self.channels.len();
        let mut streams = ShardStreams::open(
            &self.channels,
            DEFAULT_WRITE_BUFFER,
            |mut client, outbound| async move { client.add_statements(outbound).await },
        );

        loop {
            match inbound.message().await {
                Ok(Some(stmt)) => {
                    let bucket = statement_shard(&stmt, shard_count);
                    streams.send(bucket, stmt).await;
                }
                Ok(None) => break,
                Err(status) => {
                    streams.finish().await;
                    return Err(Status::invalid_argument(status.to_string()));
                }
            }
        }

        summed_count(streams.finish().await).map(Response::new)
    }

    type GetStatementsStream = StatementStream;

    async fn get_statements(
        &self,
        request: Request<Statement>,
    ) -> Result<Response<Self::GetStatementsStream>, Status> {
        let pattern = request.into_inner();
        let merged = merge_statements(&self.channels, pattern, DEFAULT_MERGE_BUFFER);
        Ok(Response::new(Box::pin(merged)))
    }

    async fn remove_statements(
        &self,
        request: Request<Statement>,
    ) -> Result<Response<Count>, Status> {
        // The pattern may match statements on any shard; counts are disjoint
        // because each statement lives on exactly one shard.
        let pattern = request.into_inner();
        scalar_fanout(&self.channels, pattern, |mut client, pattern| async move {
            client.remove_statements(Request::new(pattern)).await
        })
        .await
        .into_count()
        .map(Response::new)
    }

    async fn update(
        &self,
        request: Request<Streaming<UpdateRequest>>,
    ) -> Result<Response<UpdateResponse>, Status> {
        let mut inbound = request.into_inner();
        let shard_count = self.channels.len();
        let mut streams = ShardStreams::open(
            &self.channels,
            DEFAULT_WRITE_BUFFER,
            |mut client, outbound| async move { client.update(outbound).await },
        );

        loop {
            match inbound.message().await {
                Ok(Some(req)) => match &req.update {
                    Some(update_request::Update::StmtAdded(stmt))
                    | Some(update_request::Update::StmtRemoved(stmt)) => {
                        let bucket = statement_shard(stmt, shard_count);
                        streams.send(bucket, req).await;
                    }
                    Some(update_request::Update::NsAdded(_))
                    | Some(update_request::Update::NsRemoved(_)) => {
                        streams.broadcast(req).await;
                    }
                    None => {
                        debug!("dropping update request with no payload");
                    }
                },
                Ok(None) => break,
                Err(status) => {
                    streams.finish().await;
                    return Err(Status::invalid_argument(status.to_string()));
                }
            }
        }

        aggregate_update(streams.finish().await).map(Response::new)
    }

    async fn clear(
        &self,
        request: Request<ContextRequest>,
    ) -> Result<Response<Count>, Status> {
        let contexts = request.into_inner();
        scalar_fanout(
            &self.channels,
            contexts,
            |mut client, contexts| async move { client.clear(Request::new(contexts)).await },
        )
        .await
        .into_count()
        .map(Response::new)
    }

    async fn size(&self, request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        let contexts = request.into_inner();
        scalar_fanout(
            &self.channels,
            contexts,
            |mut client, contexts| async move { client.size(Request::new(contexts)).await },
        )
        .await
        .into_count()
        .map(Response::new)
    }
}
