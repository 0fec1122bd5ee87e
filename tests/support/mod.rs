//! Test backends and spawn helpers: an in-memory shard speaking the full
//! store contract, plus stub shards for aggregation and failure scenarios.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::Stream;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status, Streaming};

use tristore::proto::store_service_client::StoreServiceClient;
use tristore::proto::store_service_server::{StoreService, StoreServiceServer};
use tristore::proto::{
    update_request, ContextRequest, Count, Namespace, Resource, Statement, UpdateRequest,
    UpdateResponse,
};
use tristore::rdf;
use tristore::ShardingProxy;

pub type StatementStream =
    Pin<Box<dyn Stream<Item = Result<Statement, Status>> + Send + 'static>>;

/// Shard contents, shared with the test through an `Arc` so assertions can
/// look at what each shard actually received.
#[derive(Debug, Default)]
pub struct ShardState {
    pub namespaces: Vec<Namespace>,
    pub statements: Vec<Statement>,
}

/// Pattern match with unset fields as wildcards.
fn matches(pattern: &Statement, stmt: &Statement) -> bool {
    fn field<T: PartialEq>(pattern: &Option<T>, value: &Option<T>) -> bool {
        match pattern {
            None => true,
            Some(_) => pattern == value,
        }
    }
    field(&pattern.subject, &stmt.subject)
        && field(&pattern.predicate, &stmt.predicate)
        && field(&pattern.object, &stmt.object)
        && field(&pattern.context, &stmt.context)
}

fn in_contexts(contexts: &[Resource], stmt: &Statement) -> bool {
    contexts.is_empty() || stmt.context.as_ref().is_some_and(|c| contexts.contains(c))
}

/// In-memory shard backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryShard {
    state: Arc<Mutex<ShardState>>,
}

impl MemoryShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspecting (or preloading) this shard's contents.
    pub fn handle(&self) -> Arc<Mutex<ShardState>> {
        self.state.clone()
    }
}

#[tonic::async_trait]
impl StoreService for MemoryShard {
    async fn add_namespaces(
        &self,
        request: Request<Streaming<Namespace>>,
    ) -> Result<Response<Count>, Status> {
        let mut stream = request.into_inner();
        let mut added = 0i64;
        while let Some(ns) = stream.message().await? {
            self.state.lock().unwrap().namespaces.push(ns);
            added += 1;
        }
        Ok(Response::new(Count { value: added }))
    }

    async fn add_statements(
        &self,
        request: Request<Streaming<Statement>>,
    ) -> Result<Response<Count>, Status> {
        let mut stream = request.into_inner();
        let mut added = 0i64;
        while let Some(stmt) = stream.message().await? {
            self.state.lock().unwrap().statements.push(stmt);
            added += 1;
        }
        Ok(Response::new(Count { value: added }))
    }

    type GetStatementsStream = StatementStream;

    async fn get_statements(
        &self,
        request: Request<Statement>,
    ) -> Result<Response<Self::GetStatementsStream>, Status> {
        let pattern = request.into_inner();
        let results: Vec<Result<Statement, Status>> = self
            .state
            .lock()
            .unwrap()
            .statements
            .iter()
            .filter(|stmt| matches(&pattern, stmt))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Response::new(Box::pin(tokio_stream::iter(results))))
    }

    async fn remove_statements(
        &self,
        request: Request<Statement>,
    ) -> Result<Response<Count>, Status> {
        let pattern = request.into_inner();
        let mut state = self.state.lock().unwrap();
        let before = state.statements.len();
        state.statements.retain(|stmt| !matches(&pattern, stmt));
        Ok(Response::new(Count {
            value: (before - state.statements.len()) as i64,
        }))
    }

    async fn update(
        &self,
        request: Request<Streaming<UpdateRequest>>,
    ) -> Result<Response<UpdateResponse>, Status> {
        let mut stream = request.into_inner();
        let mut response = UpdateResponse::default();
        while let Some(req) = stream.message().await? {
            let mut state = self.state.lock().unwrap();
            match req.update {
                Some(update_request::Update::StmtAdded(stmt)) => {
                    state.statements.push(stmt);
                    response.added_statements += 1;
                }
                Some(update_request::Update::StmtRemoved(stmt)) => {
                    let before = state.statements.len();
                    state.statements.retain(|existing| existing != &stmt);
                    response.removed_statements += (before - state.statements.len()) as i64;
                }
                Some(update_request::Update::NsAdded(ns)) => {
                    state.namespaces.push(ns);
                    response.added_namespaces += 1;
                }
                Some(update_request::Update::NsRemoved(ns)) => {
                    let before = state.namespaces.len();
                    state.namespaces.retain(|existing| existing != &ns);
                    response.removed_namespaces += (before - state.namespaces.len()) as i64;
                }
                None => {}
            }
        }
        Ok(Response::new(response))
    }

    async fn clear(&self, request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        let contexts = request.into_inner().context;
        let mut state = self.state.lock().unwrap();
        let before = state.statements.len();
        state.statements.retain(|stmt| !in_contexts(&contexts, stmt));
        Ok(Response::new(Count {
            value: (before - state.statements.len()) as i64,
        }))
    }

    async fn size(&self, request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        let contexts = request.into_inner().context;
        let state = self.state.lock().unwrap();
        let value = state
            .statements
            .iter()
            .filter(|stmt| in_contexts(&contexts, stmt))
            .count() as i64;
        Ok(Response::new(Count { value }))
    }
}

/// Stub shard answering every scalar operation with a fixed count.
#[derive(Debug, Clone)]
pub struct FixedCountShard {
    pub value: i64,
}

#[tonic::async_trait]
impl StoreService for FixedCountShard {
    async fn add_namespaces(
        &self,
        _request: Request<Streaming<Namespace>>,
    ) -> Result<Response<Count>, Status> {
        Ok(Response::new(Count { value: self.value }))
    }

    async fn add_statements(
        &self,
        _request: Request<Streaming<Statement>>,
    ) -> Result<Response<Count>, Status> {
        Ok(Response::new(Count { value: self.value }))
    }

    type GetStatementsStream = StatementStream;

    async fn get_statements(
        &self,
        _request: Request<Statement>,
    ) -> Result<Response<Self::GetStatementsStream>, Status> {
        Ok(Response::new(Box::pin(tokio_stream::iter(Vec::new()))))
    }

    async fn remove_statements(
        &self,
        _request: Request<Statement>,
    ) -> Result<Response<Count>, Status> {
        Ok(Response::new(Count { value: self.value }))
    }

    async fn update(
        &self,
        _request: Request<Streaming<UpdateRequest>>,
    ) -> Result<Response<UpdateResponse>, Status> {
        Ok(Response::new(UpdateResponse::default()))
    }

    async fn clear(&self, _request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        Ok(Response::new(Count { value: self.value }))
    }

    async fn size(&self, _request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        Ok(Response::new(Count { value: self.value }))
    }
}

/// Stub shard failing every operation with `unavailable`.
#[derive(Debug, Clone, Default)]
pub struct FailingShard;

impl FailingShard {
    fn down<T>() -> Result<Response<T>, Status> {
        Err(Status::unavailable("shard down"))
    }
}

#[tonic::async_trait]
impl StoreService for FailingShard {
    async fn add_namespaces(
        &self,
        _request: Request<Streaming<Namespace>>,
    ) -> Result<Response<Count>, Status> {
        Self::down()
    }

    async fn add_statements(
        &self,
        _request: Request<Streaming<Statement>>,
    ) -> Result<Response<Count>, Status> {
        Self::down()
    }

    type GetStatementsStream = StatementStream;

    async fn get_statements(
        &self,
        _request: Request<Statement>,
    ) -> Result<Response<Self::GetStatementsStream>, Status> {
        Self::down()
    }

    async fn remove_statements(
        &self,
        _request: Request<Statement>,
    ) -> Result<Response<Count>, Status> {
        Self::down()
    }

    async fn update(
        &self,
        _request: Request<Streaming<UpdateRequest>>,
    ) -> Result<Response<UpdateResponse>, Status> {
        Self::down()
    }

    async fn clear(&self, _request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        Self::down()
    }

    async fn size(&self, _request: Request<ContextRequest>) -> Result<Response<Count>, Status> {
        Self::down()
    }
}

/// Serve any store implementation on an ephemeral port.
pub async fn spawn_backend<S>(service: S) -> anyhow::Result<(SocketAddr, JoinHandle<()>)>
where
    S: StoreService,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(StoreServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("backend server");
    });
    Ok((addr, handle))
}

/// Spawn `count` in-memory shards, returning their addresses and state
/// handles in shard order.
pub async fn spawn_memory_shards(
    count: usize,
) -> anyhow::Result<(Vec<SocketAddr>, Vec<Arc<Mutex<ShardState>>>)> {
    let mut addrs = Vec::with_capacity(count);
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let shard = MemoryShard::new();
        handles.push(shard.handle());
        let (addr, _server) = spawn_backend(shard).await?;
        addrs.push(addr);
    }
    Ok((addrs, handles))
}

/// Spawn a sharding proxy over the given backend addresses. The proxy
/// speaks the same contract as the shards, so it is served the same way.
pub async fn spawn_proxy(shards: &[SocketAddr]) -> anyhow::Result<SocketAddr> {
    let backends: Vec<String> = shards.iter().map(|addr| format!("http://{}", addr)).collect();
    let proxy = ShardingProxy::connect(&backends)?;
    let (addr, _server) = spawn_backend(proxy).await?;
    Ok(addr)
}

pub async fn connect(addr: SocketAddr) -> anyhow::Result<StoreServiceClient<Channel>> {
    Ok(StoreServiceClient::connect(format!("http://{}", addr)).await?)
}

/// A simple URI-only statement.
pub fn stmt(subject: &str, predicate: &str, object: &str) -> Statement {
    rdf::statement(
        rdf::uri(subject),
        rdf::uri(predicate),
        rdf::resource_value(rdf::uri(object)),
        None,
    )
}

/// A URI statement inside a named graph.
pub fn stmt_in(subject: &str, predicate: &str, object: &str, context: &str) -> Statement {
    rdf::statement(
        rdf::uri(subject),
        rdf::uri(predicate),
        rdf::resource_value(rdf::uri(object)),
        Some(rdf::uri(context)),
    )
}
