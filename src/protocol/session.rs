//! Per-connection state machine.
//!
//! A [`Session`] owns one connection's transport and everything the protocol
//! remembers between messages: who is logged in, whether an explicit
//! transaction is open, and the result rows still waiting to be pulled.
//! Messages are handled strictly one at a time; each one is processed to
//! completion and its response flushed before the next is read.
use std::{
    io::{Read, Write},
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use log::{debug, error, info, trace, warn};

use crate::{
    auth::{AuthBridge, AuthError, AuthResult},
    config::ServerConfig,
    executor::{Capabilities, QueryExecutor, QueryResult},
    map,
    packstream::{self, Map, Value},
};

use super::{
    ChunkedTransport, FailureCode, QueryClass, Request, Response, TransportError, Version,
    handshake, request::decode_message, shaping::shape_value,
};

const QUERY_LOG_LIMIT: usize = 200;
const ROUTING_TTL: i64 = 300;

/// Everything sessions share: settings, the executor, and the auth bridge.
pub struct ServerContext {
    pub config: ServerConfig,
    pub executor: Arc<dyn QueryExecutor>,
    pub auth: Option<AuthBridge>,
}

/// Coarse view of where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Ready,
    Streaming,
    InTransaction,
    /// Only reachable when `ignore_after_failure` is set.
    Failed,
    Closed,
}

/// What the connection loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Rows of the last result, shaped for the wire, not yet pulled.
struct ResultCursor {
    rows: Vec<Vec<Value>>,
    next: usize,
}

impl ResultCursor {
    fn remaining(&self) -> usize {
        self.rows.len() - self.next
    }

    /// Moves the next row out; each row is sent exactly once.
    fn take_row(&mut self) -> Vec<Value> {
        let row = mem::take(&mut self.rows[self.next]);
        self.next += 1;
        row
    }
}

pub struct Session<R: Read, W: Write> {
    transport: ChunkedTransport<R, W>,
    context: Arc<ServerContext>,
    capabilities: Capabilities,
    connection_id: String,
    peer: String,

    version: Option<Version>,
    auth_result: Option<AuthResult>,

    in_transaction: bool,
    tx_metadata: Option<Map>,
    commits: u64,

    cursor: Option<ResultCursor>,
    query_id: i64,
    last_query: QueryClass,
    pending_flush: bool,

    failed: bool,
    closed: bool,
    torn_down: bool,
}

impl<R: Read, W: Write> Session<R, W> {
    /// Sets up a session and, when the executor supports it, switches it to
    /// deferred flushing for the session's lifetime.
    pub fn new(
        transport: ChunkedTransport<R, W>,
        context: Arc<ServerContext>,
        connection_id: u64,
        peer: impl Into<String>,
    ) -> Self {
        let capabilities = context.executor.capabilities();
        if capabilities.deferred_flush {
            context.executor.set_deferred_flush(true);
        }

        Self {
            transport,
            context,
            capabilities,
            connection_id: format!("bolt-{connection_id}"),
            peer: peer.into(),
            version: None,
            auth_result: None,
            in_transaction: false,
            tx_metadata: None,
            commits: 0,
            cursor: None,
            query_id: 0,
            last_query: QueryClass::of(""),
            pending_flush: false,
            failed: false,
            closed: false,
            torn_down: false,
        }
    }

    /// Runs the connection to completion: handshake, then messages until
    /// GOODBYE or a transport fault. Session teardown happens either way,
    /// including when a handler panics.
    pub fn run(mut self) -> Result<(), TransportError> {
        let outcome = self.serve();
        self.teardown();
        outcome
    }

    fn serve(&mut self) -> Result<(), TransportError> {
        let version = handshake::negotiate(&mut self.transport)?;
        debug!("[{}] negotiated Bolt {version} with {}", self.connection_id, self.peer);
        self.version = Some(version);

        while self.step()? == Flow::Continue {}
        Ok(())
    }

    /// Reads and handles one message.
    pub fn step(&mut self) -> Result<Flow, TransportError> {
        let message = self.transport.read_message()?;
        if message.is_empty() {
            trace!("[{}] empty message", self.connection_id);
            return Ok(Flow::Continue);
        }

        let structure = decode_message(message)?;
        match Request::try_from(structure) {
            Ok(request) => self.handle(request),
            Err(e) => self.respond(Response::failure(FailureCode::InvalidRequest, e.to_string())),
        }
    }

    pub fn handle(&mut self, request: Request) -> Result<Flow, TransportError> {
        trace!("[{}] received {}", self.connection_id, request.signature());

        if self.failed
            && self.context.config.ignore_after_failure
            && !matches!(request, Request::Reset | Request::Goodbye)
        {
            return self.respond(Response::Ignored);
        }

        match request {
            Request::Hello { extra } => self.hello(extra),
            Request::Goodbye => {
                debug!("[{}] goodbye from {}", self.connection_id, self.peer);
                self.closed = true;
                Ok(Flow::Close)
            }
            Request::Reset => self.reset(),
            Request::Run {
                query, parameters, ..
            } => self.run_query(query, parameters),
            Request::Pull { n } => self.pull(n),
            Request::Discard { .. } => {
                self.cursor = None;
                self.respond(Response::success())
            }
            Request::Begin { extra } => self.begin(extra),
            Request::Commit => self.commit(),
            Request::Rollback => self.rollback(),
            Request::Route { .. } => self.respond(Response::Success(map! {
                "rt" => map! {
                    "ttl" => ROUTING_TTL,
                    "servers" => Value::List(vec![]),
                },
            })),
            Request::Unknown(signature) => self.respond(Response::failure(
                FailureCode::UnsupportedMessage,
                format!("unsupported message type 0x{:02X}", u8::from(signature)),
            )),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.failed && self.context.config.ignore_after_failure {
            SessionState::Failed
        } else if self.auth_result.is_none() {
            SessionState::Unauthenticated
        } else if self.in_transaction {
            SessionState::InTransaction
        } else if self.cursor.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Ready
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn transaction_metadata(&self) -> Option<&Map> {
        self.tx_metadata.as_ref()
    }

    pub fn auth_result(&self) -> Option<&AuthResult> {
        self.auth_result.as_ref()
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    fn respond(&mut self, response: Response) -> Result<Flow, TransportError> {
        if response.is_failure() {
            self.failed = true;
        }
        self.transport.write_chunk(&response.to_bytes())?;
        Ok(Flow::Continue)
    }

    fn hello(&mut self, extra: Map) -> Result<Flow, TransportError> {
        let scheme = Request::hello_field(&extra, "scheme");
        let principal = Request::hello_field(&extra, "principal");
        let credentials = Request::hello_field(&extra, "credentials");
        debug!(
            "[{}] HELLO from {} ({})",
            self.connection_id,
            self.peer,
            Request::hello_field(&extra, "user_agent")
        );

        let context = Arc::clone(&self.context);
        let result = match &context.auth {
            Some(bridge) => bridge.authenticate(scheme, principal, credentials),
            None if context.config.require_auth => {
                return self.respond(Response::failure(
                    FailureCode::Unauthorized,
                    "authentication required but not configured",
                ));
            }
            None => Ok(AuthResult::development()),
        };

        match result {
            Ok(result) => {
                info!(
                    "[{}] authenticated {} with roles {:?} from {}",
                    self.connection_id, result.username, result.roles, self.peer
                );
                self.auth_result = Some(result);
                let meta = map! {
                    "server" => self.context.config.server_agent.as_str(),
                    "connection_id" => self.connection_id.as_str(),
                    "hints" => Map::new(),
                };
                self.respond(Response::Success(meta))
            }
            Err(e) => {
                warn!(
                    "[{}] authentication failed for {principal:?} from {}: {e}",
                    self.connection_id, self.peer
                );
                self.auth_result = None;
                let message = match e {
                    AuthError::InvalidCredentials(_) | AuthError::InvalidToken(_) => {
                        "invalid credentials".to_string()
                    }
                    other => other.to_string(),
                };
                self.respond(Response::failure(FailureCode::Unauthorized, message))
            }
        }
    }

    /// Connections without an identity may only proceed when no
    /// authenticator is configured and authentication is not required.
    fn check_authenticated(&self) -> Option<Response> {
        let must_login = self.context.auth.is_some() || self.context.config.require_auth;
        (self.auth_result.is_none() && must_login)
            .then(|| Response::failure(FailureCode::Unauthorized, "not authenticated"))
    }

    fn run_query(&mut self, query: String, parameters: Map) -> Result<Flow, TransportError> {
        if let Some(failure) = self.check_authenticated() {
            return self.respond(failure);
        }

        let class = QueryClass::of(&query);
        let missing = self.auth_result.as_ref().and_then(|identity| {
            class
                .required_permissions()
                .find(|p| !identity.has_permission(*p))
        });
        if let Some(missing) = missing {
            return self.respond(Response::failure(
                FailureCode::Forbidden,
                format!("operation requires {missing} permission"),
            ));
        }

        if self.context.config.log_queries {
            let user = self
                .auth_result
                .as_ref()
                .map_or("unknown", |r| r.username.as_str());
            if parameters.is_empty() {
                info!("{user}@{}: {}", self.peer, truncate(&query, QUERY_LOG_LIMIT));
            } else {
                info!(
                    "{user}@{}: {} (params: {})",
                    self.peer,
                    truncate(&query, QUERY_LOG_LIMIT),
                    Value::Map(parameters.clone())
                );
            }
        }

        let QueryResult { columns, rows } = match self.context.executor.execute(&query, &parameters)
        {
            Ok(result) => result,
            Err(e) => {
                debug!("[{}] query failed: {e}", self.connection_id);
                return self.respond(Response::failure(FailureCode::StatementFailed, e.to_string()));
            }
        };

        let rows: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(shape_value).collect())
            .collect();
        if let Err(e) = rows.iter().flatten().try_for_each(packstream::check_encodable) {
            warn!("[{}] unencodable result: {e}", self.connection_id);
            return self.respond(Response::failure(FailureCode::ResultUnencodable, e.to_string()));
        }

        self.pending_flush |= class.write;
        self.last_query = class;
        self.query_id += 1;
        self.cursor = Some(ResultCursor { rows, next: 0 });

        // Drivers only expect a qid inside explicit transactions.
        let mut meta = map! {
            "fields" => columns,
            "t_first" => 0i64,
        };
        if self.in_transaction {
            meta.insert("qid".into(), Value::Integer(self.query_id));
        }
        self.respond(Response::Success(meta))
    }

    fn pull(&mut self, n: Option<usize>) -> Result<Flow, TransportError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return self.respond(Response::success());
        };

        let count = n.map_or(cursor.remaining(), |n| n.min(cursor.remaining()));
        let batched = count > self.context.config.record_batch_threshold;
        for _ in 0..count {
            let bytes = Response::Record(cursor.take_row()).to_bytes();
            if batched {
                self.transport.queue_chunk(&bytes)?;
            } else {
                self.transport.write_chunk(&bytes)?;
            }
        }

        if cursor.remaining() > 0 {
            return self.respond(Response::Success(map! { "has_more" => true }));
        }

        self.cursor = None;
        self.flush_pending_writes();

        self.respond(Response::Success(map! {
            "bookmark" => "boltwire:tx:auto",
            "type" => self.last_query.type_code(),
            "t_last" => 0i64,
            "db" => self.context.config.database_name.as_str(),
        }))
    }

    fn flush_pending_writes(&mut self) {
        if !mem::take(&mut self.pending_flush) || !self.capabilities.deferred_flush {
            return;
        }
        if let Err(e) = self.context.executor.flush() {
            warn!("[{}] deferred flush failed: {e}", self.connection_id);
        }
    }

    fn begin(&mut self, extra: Map) -> Result<Flow, TransportError> {
        if let Some(failure) = self.check_authenticated() {
            return self.respond(failure);
        }
        if self.in_transaction {
            return self.respond(Response::failure(
                FailureCode::TransactionActive,
                "a transaction is already open",
            ));
        }

        if self.capabilities.transactions
            && let Err(e) = self.context.executor.begin_transaction(&extra)
        {
            return self.respond(Response::failure(FailureCode::BeginFailed, e.to_string()));
        }

        self.in_transaction = true;
        self.tx_metadata = Some(extra);
        self.respond(Response::success())
    }

    fn commit(&mut self) -> Result<Flow, TransportError> {
        if !self.in_transaction {
            return self.respond(Response::failure(
                FailureCode::TransactionNotFound,
                "no transaction to commit",
            ));
        }

        let outcome = if self.capabilities.transactions {
            self.context.executor.commit_transaction()
        } else {
            Ok(())
        };
        self.clear_transaction();

        match outcome {
            Ok(()) => {
                self.commits += 1;
                let bookmark = format!("boltwire:bookmark:{}", self.commits);
                self.respond(Response::Success(map! { "bookmark" => bookmark }))
            }
            Err(e) => self.respond(Response::failure(FailureCode::CommitFailed, e.to_string())),
        }
    }

    /// Rolling back with nothing open succeeds without touching the executor.
    fn rollback(&mut self) -> Result<Flow, TransportError> {
        if !self.in_transaction {
            return self.respond(Response::success());
        }

        let outcome = if self.capabilities.transactions {
            self.context.executor.rollback_transaction()
        } else {
            Ok(())
        };
        self.clear_transaction();

        match outcome {
            Ok(()) => self.respond(Response::success()),
            Err(e) => self.respond(Response::failure(FailureCode::RollbackFailed, e.to_string())),
        }
    }

    fn reset(&mut self) -> Result<Flow, TransportError> {
        self.abandon_transaction();
        self.cursor = None;
        self.failed = false;
        self.respond(Response::success())
    }

    /// Best-effort rollback; local state is cleared whatever the executor says.
    fn abandon_transaction(&mut self) {
        if self.in_transaction
            && self.capabilities.transactions
            && let Err(e) = self.context.executor.rollback_transaction()
        {
            warn!("[{}] rollback failed: {e}", self.connection_id);
        }
        self.clear_transaction();
    }

    fn clear_transaction(&mut self) {
        self.in_transaction = false;
        self.tx_metadata = None;
    }

    /// Releases what the session holds on the executor. Runs once.
    fn teardown(&mut self) {
        if mem::replace(&mut self.torn_down, true) {
            return;
        }
        self.abandon_transaction();
        if self.capabilities.deferred_flush {
            if let Err(e) = self.context.executor.flush() {
                warn!("[{}] flush on close failed: {e}", self.connection_id);
            }
            self.context.executor.set_deferred_flush(false);
        }
        self.closed = true;
    }
}

impl<R: Read, W: Write> Drop for Session<R, W> {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.teardown();
            return;
        }
        // A second panic while unwinding would abort the process.
        if panic::catch_unwind(AssertUnwindSafe(|| self.teardown())).is_err() {
            error!("[{}] teardown panicked", self.connection_id);
        }
    }
}

fn truncate(query: &str, limit: usize) -> String {
    if query.len() <= limit {
        return query.to_string();
    }
    let mut end = limit;
    while !query.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &query[..end])
}
