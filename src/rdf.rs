//! Content hashing, shard routing, and term constructors for RDF records.

use std::hash::Hasher;

use prost::Message;
use rustc_hash::FxHasher;

use crate::proto::{resource, value, Literal, Namespace, Resource, Statement, Value};

/// Stable 64-bit content hash of a record.
///
/// FxHash64 over the record's canonical protobuf encoding. prost emits
/// fields in tag order, so equal records encode to equal bytes, and the
/// hash algorithm is seedless, so the same record hashes identically across
/// processes and restarts. The write path and any later routed-removal path
/// therefore agree on placement.
pub fn record_hash<M: Message>(record: &M) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(&record.encode_to_vec());
    hasher.finish()
}

/// Mix hash bits for better distribution with small modulo values.
/// Uses fibonacci hashing to reduce clustering.
#[inline]
fn mix_hash(hash: u64) -> u64 {
    const GOLDEN_RATIO: u64 = 0x9E3779B97F4A7C15;
    hash.wrapping_mul(GOLDEN_RATIO)
}

/// Shard index for a statement: mixed content hash, high bits, mod N.
///
/// This is the single routing function: AddStatements and both statement
/// arms of Update go through it, which keeps placement consistent between
/// writes and routed removals.
pub fn statement_shard(stmt: &Statement, shard_count: usize) -> usize {
    ((mix_hash(record_hash(stmt)) >> 32) as usize) % shard_count
}

/// URI resource.
pub fn uri(value: impl Into<String>) -> Resource {
    Resource {
        resource: Some(resource::Resource::Uri(value.into())),
    }
}

/// Blank node resource.
pub fn bnode(id: impl Into<String>) -> Resource {
    Resource {
        resource: Some(resource::Resource::Bnode(id.into())),
    }
}

/// A resource in object position.
pub fn resource_value(resource: Resource) -> Value {
    Value {
        value: Some(value::Value::Resource(resource)),
    }
}

/// A literal in object position. Language and datatype are left empty.
pub fn literal(content: impl Into<String>) -> Value {
    Value {
        value: Some(value::Value::Literal(Literal {
            content: content.into(),
            language: String::new(),
            datatype: String::new(),
        })),
    }
}

/// A language-tagged literal.
pub fn literal_lang(content: impl Into<String>, language: impl Into<String>) -> Value {
    Value {
        value: Some(value::Value::Literal(Literal {
            content: content.into(),
            language: language.into(),
            datatype: String::new(),
        })),
    }
}

/// A datatyped literal.
pub fn literal_typed(content: impl Into<String>, datatype: impl Into<String>) -> Value {
    Value {
        value: Some(value::Value::Literal(Literal {
            content: content.into(),
            language: String::new(),
            datatype: datatype.into(),
        })),
    }
}

/// Assemble a statement. `context` is the optional named graph.
pub fn statement(
    subject: Resource,
    predicate: Resource,
    object: Value,
    context: Option<Resource>,
) -> Statement {
    Statement {
        subject: Some(subject),
        predicate: Some(predicate),
        object: Some(object),
        context,
    }
}

/// A namespace binding.
pub fn namespace(prefix: impl Into<String>, uri: impl Into<String>) -> Namespace {
    Namespace {
        prefix: prefix.into(),
        uri: uri.into(),
    }
}
