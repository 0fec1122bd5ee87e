//! Bulk import: a line-based N-Quads reader feeding two concurrent upload
//! streams (namespaces and statements).
//!
//! The accepted grammar is the line-oriented N-Quads subset plus Turtle
//! `@prefix` directives: one statement or directive per line, `#` comments
//! and blank lines skipped. Prefixes are not expanded; they are forwarded
//! to the store as namespace bindings.

use std::io::BufRead;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;

use crate::config::DEFAULT_WRITE_BUFFER;
use crate::proto::store_service_client::StoreServiceClient;
use crate::proto::{Namespace, Resource, Statement, Value};
use crate::rdf;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRecord {
    Namespace(Namespace),
    Statement(Statement),
}

/// Counts reported by the two upload streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub namespaces: i64,
    pub statements: i64,
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, prefix: &str) -> bool {
        match self.rest.strip_prefix(prefix) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn uri(&mut self) -> Result<String> {
        if !self.eat("<") {
            bail!("expected '<', found {:?}", self.rest);
        }
        let end = self.rest.find('>').context("unterminated URI")?;
        let uri = self.rest[..end].to_string();
        self.rest = &self.rest[end + 1..];
        Ok(uri)
    }

    fn resource(&mut self) -> Result<Resource> {
        if self.rest.starts_with('<') {
            return Ok(rdf::uri(self.uri()?));
        }
        if self.eat("_:") {
            let end = self
                .rest
                .find(|c: char| c.is_whitespace())
                .unwrap_or(self.rest.len());
            if end == 0 {
                bail!("empty blank node label");
            }
            let label = self.rest[..end].to_string();
            self.rest = &self.rest[end..];
            return Ok(rdf::bnode(label));
        }
        bail!("expected URI or blank node, found {:?}", self.rest);
    }

    fn object(&mut self) -> Result<Value> {
        if self.rest.starts_with('"') {
            self.literal()
        } else {
            Ok(rdf::resource_value(self.resource()?))
        }
    }

    fn literal(&mut self) -> Result<Value> {
        self.rest = &self.rest[1..];
        let source = self.rest;
        let mut content = String::new();
        let mut iter = source.char_indices();
        let mut end = None;
        while let Some((idx, c)) = iter.next() {
            match c {
                '\\' => match iter.next() {
                    Some((_, 'n')) => content.push('\n'),
                    Some((_, 't')) => content.push('\t'),
                    Some((_, 'r')) => content.push('\r'),
                    Some((_, '"')) => content.push('"'),
                    Some((_, '\\')) => content.push('\\'),
                    _ => bail!("unsupported escape in literal"),
                },
                '"' => {
                    end = Some(idx);
                    break;
                }
                c => content.push(c),
            }
        }
        let end = end.context("unterminated literal")?;
        self.rest = &source[end + 1..];

        if self.eat("@") {
            let tag_end = self
                .rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '-')
                .unwrap_or(self.rest.len());
            if tag_end == 0 {
                bail!("empty language tag");
            }
            let language = self.rest[..tag_end].to_string();
            self.rest = &self.rest[tag_end..];
            return Ok(rdf::literal_lang(content, language));
        }
        if self.eat("^^") {
            let datatype = self.uri()?;
            return Ok(rdf::literal_typed(content, datatype));
        }
        Ok(rdf::literal(content))
    }

    fn terminator(&mut self) -> Result<()> {
        self.skip_ws();
        if !self.eat(".") {
            bail!("expected '.', found {:?}", self.rest);
        }
        self.skip_ws();
        if !self.is_empty() {
            bail!("trailing characters after '.': {:?}", self.rest);
        }
        Ok(())
    }
}

fn parse_prefix(cursor: &mut Cursor) -> Result<Namespace> {
    cursor.skip_ws();
    let colon = cursor.rest.find(':').context("expected ':' in @prefix")?;
    let prefix = cursor.rest[..colon].trim();
    if prefix.contains(char::is_whitespace) || prefix.contains('<') {
        bail!("malformed prefix name {:?}", prefix);
    }
    let prefix = prefix.to_string();
    cursor.rest = &cursor.rest[colon + 1..];
    cursor.skip_ws();
    let uri = cursor.uri()?;
    cursor.terminator()?;
    Ok(rdf::namespace(prefix, uri))
}

fn parse_statement(cursor: &mut Cursor) -> Result<Statement> {
    cursor.skip_ws();
    let subject = cursor.resource().context("subject")?;
    cursor.skip_ws();
    let predicate = rdf::uri(cursor.uri().context("predicate")?);
    cursor.skip_ws();
    let object = cursor.object().context("object")?;
    cursor.skip_ws();
    let context = if cursor.rest.starts_with('.') {
        None
    } else {
        Some(cursor.resource().context("context")?)
    };
    cursor.terminator()?;
    Ok(rdf::statement(subject, predicate, object, context))
}

/// Parse one input line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ImportRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut cursor = Cursor::new(trimmed);
    if cursor.eat("@prefix") {
        return Ok(Some(ImportRecord::Namespace(parse_prefix(&mut cursor)?)));
    }
    Ok(Some(ImportRecord::Statement(parse_statement(&mut cursor)?)))
}

/// Stream a dataset to the store over two concurrent upload calls, one for
/// namespaces and one for statements, and report both terminal counts.
///
/// A malformed line aborts the import with a line-numbered error; records
/// already uploaded stay uploaded (the store offers no cross-stream
/// transaction).
pub async fn import_dataset<R: BufRead>(
    client: &StoreServiceClient<Channel>,
    reader: R,
) -> Result<ImportStats> {
    let (ns_tx, ns_rx) = mpsc::channel::<Namespace>(DEFAULT_WRITE_BUFFER);
    let (stmt_tx, stmt_rx) = mpsc::channel::<Statement>(DEFAULT_WRITE_BUFFER);

    let mut ns_client = client.clone();
    let ns_call =
        tokio::spawn(async move { ns_client.add_namespaces(ReceiverStream::new(ns_rx)).await });
    let mut stmt_client = client.clone();
    let stmt_call =
        tokio::spawn(async move { stmt_client.add_statements(ReceiverStream::new(stmt_rx)).await });

    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("line {}", number + 1))?;
        match parse_line(&line).with_context(|| format!("line {}", number + 1))? {
            Some(ImportRecord::Namespace(ns)) => {
                ns_tx
                    .send(ns)
                    .await
                    .map_err(|_| anyhow!("namespace upload stream closed early"))?;
            }
            Some(ImportRecord::Statement(stmt)) => {
                stmt_tx
                    .send(stmt)
                    .await
                    .map_err(|_| anyhow!("statement upload stream closed early"))?;
            }
            None => {}
        }
    }
    drop(ns_tx);
    drop(stmt_tx);

    let namespaces = ns_call.await??.into_inner().value;
    let statements = stmt_call.await??.into_inner().value;
    Ok(ImportStats {
        namespaces,
        statements,
    })
}
