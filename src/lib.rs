//! # tristore
//!
//! A sharding proxy for an RDF quad store. The proxy presents one logical
//! store endpoint while transparently distributing data across a fixed,
//! ordered set of backend shards that speak the same RPC contract:
//!
//! - statements are routed to exactly one shard by a stable content hash,
//! - namespaces are replicated to every shard,
//! - streamed reads are fanned in from all shards into one output stream,
//! - numeric replies are aggregated (summed, or taken from shard 0 for
//!   broadcast data).
//!
//! The shard set is immutable for the lifetime of the proxy. There is no
//! replication, no rebalancing, and no cross-shard transaction.

pub mod config;
pub mod fanout;
pub mod import;
pub mod proxy;
pub mod rdf;

pub mod proto {
    tonic::include_proto!("tristore");
}

pub use proxy::ShardingProxy;
