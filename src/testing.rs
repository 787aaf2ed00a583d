//! Loopback booking server and frame helpers for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::{Codec, Request, checksum};
use crate::protocol::{HEADER_SIZE, Header, OpCode, RESPONSE_BODY_SIZE, ResponseBody};

/// A canned answer to one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub opcode: OpCode,
    pub session_id: u32,
    pub body: ResponseBody,
}

impl Reply {
    pub fn success(session_id: u32, remaining: u32, message: &str) -> Self {
        Self {
            opcode: OpCode::ResponseSuccess,
            session_id,
            body: ResponseBody::new(remaining, message),
        }
    }

    pub fn failure(session_id: u32, remaining: u32, message: &str) -> Self {
        Self {
            opcode: OpCode::ResponseFailure,
            ..Self::success(session_id, remaining, message)
        }
    }
}

/// Read one request frame, sizing the body from the header's opcode.
pub async fn read_request<S>(codec: &Codec, stream: &mut S) -> Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let body_len = codec
        .peek_header(&header)
        .opcode()
        .map(OpCode::request_body_size)
        .unwrap_or(0);
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;
    Ok(codec.decode_request(&header, &body)?)
}

/// Answer `req`, echoing its req_id.
pub async fn write_reply<S>(codec: &Codec, stream: &mut S, req: &Request, reply: Reply) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = codec.encode_response(reply.opcode, req.header.req_id, reply.session_id, &reply.body);
    stream.write_all(&frame).await?;
    Ok(())
}

/// A correctly sealed response frame whose opcode may be any raw value.
pub fn encode_raw_response(
    codec: &Codec,
    opcode: u16,
    req_id: u16,
    session_id: u32,
    body: &ResponseBody,
) -> Vec<u8> {
    let mut header = Header::new(OpCode::ResponseSuccess, req_id, session_id, RESPONSE_BODY_SIZE);
    header.opcode = opcode;
    let mut body = body.to_bytes();
    header.checksum = checksum(&header.to_bytes()).wrapping_add(checksum(&body));

    let mut frame = header.to_bytes().to_vec();
    codec.obfuscate(&mut frame);
    codec.obfuscate(&mut body);
    frame.extend_from_slice(&body);
    frame
}

/// Requests seen by a [`MockServer`], by opcode.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub logins: AtomicUsize,
    pub queries: AtomicUsize,
    pub bookings: AtomicUsize,
}

struct ServerState {
    codec: Codec,
    tickets: Mutex<u32>,
    next_session: AtomicU32,
    reject_logins: bool,
    stats: ServerStats,
}

/// Minimal booking server on 127.0.0.1 with per-connection session ids.
pub struct MockServer {
    port: u16,
    state: Arc<ServerState>,
}

impl MockServer {
    pub async fn start(codec: Codec, tickets: u32) -> Result<Self> {
        Self::spawn(codec, tickets, false).await
    }

    /// A server that answers every login with RESPONSE_FAILURE.
    pub async fn start_rejecting(codec: Codec) -> Result<Self> {
        Self::spawn(codec, 0, true).await
    }

    async fn spawn(codec: Codec, tickets: u32, reject_logins: bool) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(ServerState {
            codec,
            tickets: Mutex::new(tickets),
            next_session: AtomicU32::new(1000),
            reject_logins,
            stats: ServerStats::default(),
        });

        let st = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let st = st.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(&st, stream).await {
                        debug!("mock server connection ended: {e}");
                    }
                });
            }
        });

        Ok(Self { port, state })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> &ServerStats {
        &self.state.stats
    }

    pub async fn tickets_left(&self) -> u32 {
        *self.state.tickets.lock().await
    }
}

async fn serve_connection(state: &ServerState, mut stream: TcpStream) -> Result<()> {
    let codec = &state.codec;
    let mut session_id = 0u32;

    loop {
        let req = match read_request(codec, &mut stream).await {
            Ok(req) => req,
            Err(_) => return Ok(()),
        };

        let reply = match req.opcode {
            OpCode::Login => {
                state.stats.logins.fetch_add(1, Ordering::SeqCst);
                if state.reject_logins {
                    Reply::failure(0, 0, "login denied")
                } else {
                    session_id = state.next_session.fetch_add(1, Ordering::SeqCst);
                    Reply::success(session_id, 0, "welcome")
                }
            }
            _ if session_id == 0 || req.header.session_id != session_id => {
                Reply::failure(0, 0, "invalid session")
            }
            OpCode::QueryAvailability => {
                state.stats.queries.fetch_add(1, Ordering::SeqCst);
                let left = *state.tickets.lock().await;
                Reply::success(session_id, left, "OK")
            }
            OpCode::BookTicket => {
                state.stats.bookings.fetch_add(1, Ordering::SeqCst);
                let wanted = req.book.map(|b| b.num_tickets).unwrap_or(0);
                let mut tickets = state.tickets.lock().await;
                if wanted > 0 && wanted <= *tickets {
                    *tickets -= wanted;
                    Reply::success(session_id, *tickets, "booked")
                } else {
                    Reply::failure(session_id, *tickets, "sold out")
                }
            }
            OpCode::ResponseSuccess | OpCode::ResponseFailure => {
                Reply::failure(session_id, 0, "unexpected opcode")
            }
        };

        write_reply(codec, &mut stream, &req, reply).await?;
    }
}
