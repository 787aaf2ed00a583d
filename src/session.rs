use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::{SessionError, SessionResult, TransportError};
use crate::protocol::{
    Action, BookRequest, HEADER_SIZE, OpCode, RESPONSE_BODY_SIZE, Response, SessionState,
};
use crate::transport::Connection;

const LOGIN_REQ_BASE: u16 = 0;
const QUERY_REQ_BASE: u16 = 100;
const BOOK_REQ_BASE: u16 = 200;

/// Per-connection request-id counters, one per operation kind.
#[derive(Debug, Clone)]
pub struct RequestIds {
    login: u16,
    query: u16,
    book: u16,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self {
            login: LOGIN_REQ_BASE,
            query: QUERY_REQ_BASE,
            book: BOOK_REQ_BASE,
        }
    }
}

impl RequestIds {
    pub fn next(&mut self, opcode: OpCode) -> u16 {
        let counter = match opcode {
            OpCode::Login => &mut self.login,
            OpCode::QueryAvailability => &mut self.query,
            OpCode::BookTicket => &mut self.book,
            OpCode::ResponseSuccess | OpCode::ResponseFailure => return 0,
        };
        let id = *counter;
        *counter = counter.wrapping_add(1);
        id
    }
}

/// Who a worker acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub index: usize,
    pub user_id: u32,
}

/// Result of the single application operation. An `Err` here means the
/// operation was abandoned; the session itself still completed.
pub type OperationResult = SessionResult<Response>;

/// One worker's connection: login, one query or booking, close.
pub struct SessionClient<S = TcpStream> {
    identity: WorkerIdentity,
    codec: Codec,
    io_timeout: Duration,
    conn: Option<Connection<S>>,
    state: SessionState,
    session_id: u32,
    ids: RequestIds,
}

impl SessionClient<TcpStream> {
    /// Connect to the configured server and arm the I/O timeouts.
    pub async fn connect(
        config: &ClientConfig,
        codec: Codec,
        identity: WorkerIdentity,
    ) -> SessionResult<Self> {
        let mut client = Self::new(codec, identity, config.io_timeout());
        match Connection::connect(&config.host, config.port, config.connect_timeout()).await {
            Ok(conn) => {
                client.attach(conn);
                Ok(client)
            }
            Err(e) => {
                error!(
                    worker = identity.index,
                    user_id = identity.user_id,
                    "[w{}] Connect failed: {e}",
                    identity.index
                );
                Err(e.into())
            }
        }
    }
}

impl<S> SessionClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(codec: Codec, identity: WorkerIdentity, io_timeout: Duration) -> Self {
        Self {
            identity,
            codec,
            io_timeout,
            conn: None,
            state: SessionState::Disconnected,
            session_id: 0,
            ids: RequestIds::default(),
        }
    }

    /// Take ownership of an open connection: `Disconnected -> Connected`.
    pub fn attach(&mut self, mut conn: Connection<S>) {
        conn.set_io_timeout(self.io_timeout);
        self.conn = Some(conn);
        self.state = SessionState::Connected;
        debug!("[w{}] Connected", self.identity.index);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server-assigned session id; 0 before login.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    /// Log in, perform `action`, close.
    ///
    /// The outer `Err` is fatal for the worker (connect or login failed, no
    /// operation was sent). The inner result is the operation's outcome.
    pub async fn run(&mut self, action: Action) -> SessionResult<OperationResult> {
        self.login().await?;
        let outcome = match action {
            Action::Query => self.query().await,
            Action::Book { num_tickets } => self.book(num_tickets).await,
        };
        self.finish().await;
        Ok(outcome)
    }

    /// `Connected -> Authenticated`. Any failure aborts the session.
    pub async fn login(&mut self) -> SessionResult<u32> {
        self.require_state("login", SessionState::Connected).await?;
        info!("[w{}] Logging in (user {})", self.identity.index, self.identity.user_id);

        let result = self.round_trip(OpCode::Login, None).await.and_then(|resp| {
            match resp.opcode {
                Some(OpCode::ResponseSuccess) => Ok(resp.header.session_id),
                Some(OpCode::ResponseFailure) => Err(SessionError::Rejected {
                    op: OpCode::Login,
                    message: resp.body.message,
                }),
                _ => Err(SessionError::UnexpectedOpcode {
                    expected: "login response",
                    actual: resp.header.opcode,
                }),
            }
        });

        match result {
            Ok(session_id) => {
                self.session_id = session_id;
                self.state = SessionState::Authenticated;
                info!(
                    session_id,
                    user_id = self.identity.user_id,
                    "[w{}] Login successful",
                    self.identity.index
                );
                Ok(session_id)
            }
            Err(e) => {
                error!(
                    opcode = %OpCode::Login,
                    kind = %e.kind(),
                    user_id = self.identity.user_id,
                    "[w{}] Login failed: {e}",
                    self.identity.index
                );
                self.abort().await;
                Err(e)
            }
        }
    }

    /// Ask how many tickets remain.
    pub async fn query(&mut self) -> OperationResult {
        self.require_state("query", SessionState::Authenticated).await?;
        info!(
            session_id = self.session_id,
            "[w{}] Querying availability",
            self.identity.index
        );

        let resp = self.round_trip(OpCode::QueryAvailability, None).await?;
        info!(
            remaining_tickets = resp.body.remaining_tickets,
            message = %resp.body.message,
            "[w{}] Query answered",
            self.identity.index
        );
        Ok(resp)
    }

    /// Book `num_tickets` for this worker's user. Any verified response that
    /// is not RESPONSE_SUCCESS is a failed booking, not an error.
    pub async fn book(&mut self, num_tickets: u32) -> OperationResult {
        self.require_state("book", SessionState::Authenticated).await?;
        let body = BookRequest {
            num_tickets,
            user_id: self.identity.user_id,
        };
        info!(
            num_tickets,
            user_id = body.user_id,
            session_id = self.session_id,
            "[w{}] Booking tickets",
            self.identity.index
        );

        let resp = self.round_trip(OpCode::BookTicket, Some(&body)).await?;
        let status = if resp.is_success() { "SUCCESS" } else { "FAIL" };
        info!(
            status,
            remaining_tickets = resp.body.remaining_tickets,
            message = %resp.body.message,
            "[w{}] Booking answered",
            self.identity.index
        );
        Ok(resp)
    }

    /// `Authenticated -> Completed`, closing the connection.
    pub async fn finish(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close().await;
        }
        self.conn = None;
        if !self.state.is_terminal() {
            self.state = SessionState::Completed;
        }
    }

    async fn abort(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close().await;
        }
        self.conn = None;
        self.state = SessionState::Aborted;
    }

    /// One synchronous request/response exchange.
    async fn round_trip(
        &mut self,
        opcode: OpCode,
        body: Option<&BookRequest>,
    ) -> SessionResult<Response> {
        let req_id = self.ids.next(opcode);
        let session_id = self.session_id;
        let frame = self.codec.encode_request(opcode, req_id, session_id, body);

        let result = self.exchange(&frame).await;
        match &result {
            Ok(resp) => {
                if resp.header.req_id != req_id {
                    warn!(
                        %opcode,
                        req_id,
                        got_req_id = resp.header.req_id,
                        session_id,
                        "[w{}] Response req_id does not match request",
                        self.identity.index
                    );
                }
            }
            Err(e) => {
                error!(
                    %opcode,
                    req_id,
                    session_id,
                    kind = %e.kind(),
                    "[w{}] Request failed: {e}",
                    self.identity.index
                );
            }
        }
        result
    }

    async fn exchange(&mut self, frame: &[u8]) -> SessionResult<Response> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        conn.write_exact(frame).await?;

        // Sizes come from the response schema, never from packet_len.
        let mut header = [0u8; HEADER_SIZE];
        conn.read_into(&mut header).await?;
        let mut body = [0u8; RESPONSE_BODY_SIZE];
        conn.read_into(&mut body).await?;

        Ok(self.codec.decode_response(&header, &body)?)
    }

    /// A call in the wrong state is unrecoverable for this session.
    async fn require_state(&mut self, op: &'static str, want: SessionState) -> SessionResult<()> {
        if self.state == want {
            return Ok(());
        }
        let err = SessionError::InvalidState {
            op,
            state: self.state,
        };
        warn!("[w{}] {err}", self.identity.index);
        if !self.state.is_terminal() {
            self.abort().await;
        }
        Err(err)
    }
}
