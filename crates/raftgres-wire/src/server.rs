//! Query port: accepts PostgreSQL clients and feeds their statements to
//! the replicated log.
//!
//! Every connection is served by its own [`Session`]. There is no
//! authentication and no transaction state; each simple query is one log
//! entry and is answered once it has been applied locally.

use std::io;

use bytes::BytesMut;
use raftgres_raft::{IngressError, QueryIngress};
use raftgres_sql::{Outcome, ParseError, QueryError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{
    self, BackendMessage, FieldDescription, FrontendMessage, INT8_OID, TEXT_OID, WireError,
};

const SERVER_VERSION: &str = "14.0 (raftgres)";

/// Accept clients on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    ingress: QueryIngress,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut next_pid: i32 = 1;
    info!(addr = ?listener.local_addr()?, "query port listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let pid = next_pid;
                next_pid = next_pid.wrapping_add(1).max(1);
                let session = Session::new(stream, ingress.clone(), pid);
                tokio::spawn(async move {
                    debug!(%peer, pid, "client connected");
                    if let Err(e) = session.run().await {
                        warn!(%peer, pid, error = %e, "session ended with error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("query port shutting down");
                return Ok(());
            }
        }
    }
}

/// One client connection.
pub struct Session<S> {
    stream: S,
    ingress: QueryIngress,
    pid: i32,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ingress: QueryIngress, pid: i32) -> Self {
        Self {
            stream,
            ingress,
            pid,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Drive the connection until the client leaves.
    pub async fn run(mut self) -> Result<(), WireError> {
        if !self.startup().await? {
            return Ok(());
        }

        loop {
            let Some(message) = self.next_message().await? else {
                return Ok(());
            };
            match message {
                FrontendMessage::Query(text) => self.simple_query(&text).await,
                FrontendMessage::Terminate => return Ok(()),
                FrontendMessage::Unsupported(tag) => {
                    debug!(pid = self.pid, tag = %char::from(tag), "unsupported message");
                    self.push(BackendMessage::ErrorResponse {
                        code: "0A000".to_string(),
                        message: format!("unsupported message type '{}'", char::from(tag)),
                    });
                    self.push(BackendMessage::ReadyForQuery);
                }
                other => {
                    return Err(WireError::Malformed(format!(
                        "unexpected message after startup: {other:?}"
                    )));
                }
            }
            self.flush().await?;
        }
    }

    /// Negotiate the connection. Returns `false` if the client went away
    /// or only wanted to cancel.
    async fn startup(&mut self) -> Result<bool, WireError> {
        loop {
            let message = loop {
                if let Some(message) = codec::decode_startup(&mut self.read_buf)? {
                    break message;
                }
                if !self.fill().await? {
                    return Ok(false);
                }
            };

            match message {
                FrontendMessage::EncryptionRequest => {
                    self.push(BackendMessage::EncryptionRefused);
                    self.flush().await?;
                }
                FrontendMessage::CancelRequest => return Ok(false),
                FrontendMessage::Startup { parameters } => {
                    let user = parameters
                        .iter()
                        .find(|(k, _)| k == "user")
                        .map(|(_, v)| v.as_str())
                        .unwrap_or("");
                    debug!(pid = self.pid, user, "startup");

                    self.push(BackendMessage::AuthenticationOk);
                    self.push(BackendMessage::ParameterStatus {
                        name: "server_version".to_string(),
                        value: SERVER_VERSION.to_string(),
                    });
                    self.push(BackendMessage::ParameterStatus {
                        name: "client_encoding".to_string(),
                        value: "UTF8".to_string(),
                    });
                    self.push(BackendMessage::BackendKeyData {
                        process_id: self.pid,
                        secret_key: 0,
                    });
                    self.push(BackendMessage::ReadyForQuery);
                    self.flush().await?;
                    return Ok(true);
                }
                other => {
                    return Err(WireError::Malformed(format!(
                        "unexpected startup message: {other:?}"
                    )));
                }
            }
        }
    }

    async fn simple_query(&mut self, text: &str) {
        if text.trim().trim_end_matches(';').trim().is_empty() {
            self.push(BackendMessage::EmptyQueryResponse);
            self.push(BackendMessage::ReadyForQuery);
            return;
        }

        match self.ingress.submit(text).await {
            Ok(outcome) => self.push_outcome(outcome),
            Err(e) => {
                debug!(pid = self.pid, error = %e, "query failed");
                self.push(BackendMessage::ErrorResponse {
                    code: sqlstate(&e).to_string(),
                    message: e.to_string(),
                });
            }
        }
        self.push(BackendMessage::ReadyForQuery);
    }

    fn push_outcome(&mut self, outcome: Outcome) {
        let tag = outcome.command_tag();
        if let Outcome::Selected(result) = outcome {
            if i16::try_from(result.field_names.len()).is_err() {
                self.push(BackendMessage::ErrorResponse {
                    code: "54011".to_string(),
                    message: format!("too many columns: {}", result.field_names.len()),
                });
                return;
            }
            let fields = result
                .field_names
                .into_iter()
                .zip(&result.field_types)
                .map(|(name, type_name)| FieldDescription {
                    name,
                    type_oid: type_oid(type_name),
                })
                .collect();
            self.push(BackendMessage::RowDescription(fields));
            for row in result.rows {
                let values = row
                    .into_iter()
                    .map(|cell| cell.map(|value| value.to_string()))
                    .collect();
                self.push(BackendMessage::DataRow(values));
            }
        }
        self.push(BackendMessage::CommandComplete(tag));
    }

    async fn next_message(&mut self) -> Result<Option<FrontendMessage>, WireError> {
        loop {
            if let Some(message) = codec::decode_message(&mut self.read_buf)? {
                return Ok(Some(message));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Read more bytes; `false` on EOF.
    async fn fill(&mut self) -> Result<bool, WireError> {
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        Ok(n > 0)
    }

    fn push(&mut self, message: BackendMessage) {
        if let Err(e) = codec::encode(&message, &mut self.write_buf) {
            warn!(pid = self.pid, error = %e, "cannot encode response");
            self.push(BackendMessage::ErrorResponse {
                code: "54011".to_string(),
                message: e.to_string(),
            });
        }
    }

    async fn flush(&mut self) -> Result<(), WireError> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.write_buf.clear();
        Ok(())
    }
}

/// Row description OID for a column type name.
fn type_oid(type_name: &str) -> i32 {
    let bare = type_name.strip_prefix("pg_catalog.").unwrap_or(type_name);
    match bare.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "int" | "integer" | "smallint" | "bigint" => INT8_OID,
        _ => TEXT_OID,
    }
}

fn sqlstate(err: &IngressError) -> &'static str {
    match err {
        IngressError::Parse(ParseError::Syntax(_)) => "42601",
        IngressError::Parse(ParseError::MultipleStatements(_)) => "0A000",
        IngressError::Query(QueryError::UnknownTable(_)) => "42P01",
        IngressError::Query(QueryError::UnknownField(_)) => "42703",
        IngressError::Query(QueryError::UnsupportedValue(_) | QueryError::Unsupported(_)) => {
            "0A000"
        }
        IngressError::NotLeader { .. } => "25006",
        IngressError::Consensus(_) => "08006",
    }
}
