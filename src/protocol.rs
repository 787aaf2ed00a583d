use std::fmt;

/// Unique identifier for one harness run, used to tag log records.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string()[..8].to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Wire layout (little-endian) ──
//
//  0        4      6      8            12           16
//  +--------+------+------+------------+------------+
//  | pkt_len|opcode|req_id| session_id |  checksum  |
//  +--------+------+------+------------+------------+

pub const HEADER_SIZE: usize = 16;
pub const MESSAGE_SIZE: usize = 64;
pub const RESPONSE_BODY_SIZE: usize = 4 + MESSAGE_SIZE;
pub const BOOK_REQUEST_SIZE: usize = 8;

const OFF_PACKET_LEN: usize = 0;
const OFF_OPCODE: usize = 4;
const OFF_REQ_ID: usize = 6;
const OFF_SESSION_ID: usize = 8;
pub(crate) const OFF_CHECKSUM: usize = 12;

/// Operation codes carried in the header's opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpCode {
    Login = 0x0001,
    QueryAvailability = 0x0002,
    BookTicket = 0x0003,
    ResponseSuccess = 0x0080,
    ResponseFailure = 0x0081,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Login),
            0x0002 => Some(Self::QueryAvailability),
            0x0003 => Some(Self::BookTicket),
            0x0080 => Some(Self::ResponseSuccess),
            0x0081 => Some(Self::ResponseFailure),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Size of the body that follows a request header with this opcode.
    pub fn request_body_size(self) -> usize {
        match self {
            Self::BookTicket => BOOK_REQUEST_SIZE,
            _ => 0,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Login => "LOGIN",
            Self::QueryAvailability => "QUERY_AVAILABILITY",
            Self::BookTicket => "BOOK_TICKET",
            Self::ResponseSuccess => "RESPONSE_SUCCESS",
            Self::ResponseFailure => "RESPONSE_FAILURE",
        };
        write!(f, "{name}")
    }
}

/// Fixed-size frame header, always sent first.
///
/// `opcode` is kept raw so a frame can be checksummed before its opcode is
/// interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub packet_len: u32,
    pub opcode: u16,
    pub req_id: u16,
    pub session_id: u32,
    pub checksum: u32,
}

impl Header {
    pub fn new(opcode: OpCode, req_id: u16, session_id: u32, body_len: usize) -> Self {
        Self {
            packet_len: (HEADER_SIZE + body_len) as u32,
            opcode: opcode.as_u16(),
            req_id,
            session_id,
            checksum: 0,
        }
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u16(self.opcode)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[OFF_PACKET_LEN..OFF_PACKET_LEN + 4].copy_from_slice(&self.packet_len.to_le_bytes());
        buf[OFF_OPCODE..OFF_OPCODE + 2].copy_from_slice(&self.opcode.to_le_bytes());
        buf[OFF_REQ_ID..OFF_REQ_ID + 2].copy_from_slice(&self.req_id.to_le_bytes());
        buf[OFF_SESSION_ID..OFF_SESSION_ID + 4].copy_from_slice(&self.session_id.to_le_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            packet_len: read_u32(buf, OFF_PACKET_LEN),
            opcode: read_u16(buf, OFF_OPCODE),
            req_id: read_u16(buf, OFF_REQ_ID),
            session_id: read_u32(buf, OFF_SESSION_ID),
            checksum: read_u32(buf, OFF_CHECKSUM),
        }
    }
}

/// Body carried by every response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    pub remaining_tickets: u32,
    pub message: String,
}

impl ResponseBody {
    pub fn new(remaining_tickets: u32, message: &str) -> Self {
        Self {
            remaining_tickets,
            message: message.to_string(),
        }
    }

    /// Messages longer than `MESSAGE_SIZE - 1` bytes are truncated so the
    /// field always keeps a terminating NUL.
    pub fn to_bytes(&self) -> [u8; RESPONSE_BODY_SIZE] {
        let mut buf = [0u8; RESPONSE_BODY_SIZE];
        buf[0..4].copy_from_slice(&self.remaining_tickets.to_le_bytes());
        let msg = self.message.as_bytes();
        let n = msg.len().min(MESSAGE_SIZE - 1);
        buf[4..4 + n].copy_from_slice(&msg[..n]);
        buf
    }

    pub fn from_bytes(buf: &[u8; RESPONSE_BODY_SIZE]) -> Self {
        let field = &buf[4..];
        let end = field.iter().position(|&b| b == 0).unwrap_or(MESSAGE_SIZE);
        Self {
            remaining_tickets: read_u32(buf, 0),
            message: String::from_utf8_lossy(&field[..end]).into_owned(),
        }
    }
}

/// Body of a BOOK_TICKET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookRequest {
    pub num_tickets: u32,
    pub user_id: u32,
}

impl BookRequest {
    pub fn to_bytes(&self) -> [u8; BOOK_REQUEST_SIZE] {
        let mut buf = [0u8; BOOK_REQUEST_SIZE];
        buf[0..4].copy_from_slice(&self.num_tickets.to_le_bytes());
        buf[4..8].copy_from_slice(&self.user_id.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BOOK_REQUEST_SIZE]) -> Self {
        Self {
            num_tickets: read_u32(buf, 0),
            user_id: read_u32(buf, 4),
        }
    }
}

/// A decoded response frame.
///
/// `opcode` is `None` when the frame verified but carries a value this client
/// does not know; the raw value stays in `header.opcode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: Header,
    pub opcode: Option<OpCode>,
    pub body: ResponseBody,
}

impl Response {
    /// Only RESPONSE_SUCCESS counts; every other opcode is a failed outcome.
    pub fn is_success(&self) -> bool {
        self.opcode == Some(OpCode::ResponseSuccess)
    }
}

/// What a worker does after logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Query,
    Book { num_tickets: u32 },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Book { num_tickets } => write!(f, "book({num_tickets})"),
        }
    }
}

/// Lifecycle of one worker's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = Header {
            packet_len: 24,
            opcode: OpCode::BookTicket.as_u16(),
            req_id: 200,
            session_id: 42,
            checksum: 0x0102_0304,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[24, 0, 0, 0]);
        assert_eq!(&bytes[4..6], &[3, 0]);
        assert_eq!(&bytes[6..8], &[200, 0]);
        assert_eq!(&bytes[8..12], &[42, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[4, 3, 2, 1]);
        assert_eq!(Header::from_bytes(&bytes), header);
    }

    #[test]
    fn new_header_counts_body_in_packet_len() {
        let header = Header::new(OpCode::BookTicket, 200, 42, BOOK_REQUEST_SIZE);
        assert_eq!(header.packet_len as usize, HEADER_SIZE + BOOK_REQUEST_SIZE);
        assert_eq!(header.checksum, 0);
        assert_eq!(header.opcode(), Some(OpCode::BookTicket));
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(OpCode::from_u16(0x7777), None);
    }

    #[test]
    fn message_stops_at_first_nul() {
        let mut bytes = ResponseBody::new(7, "OK").to_bytes();
        bytes[10] = b'x';
        let body = ResponseBody::from_bytes(&bytes);
        assert_eq!(body.remaining_tickets, 7);
        assert_eq!(body.message, "OK");
    }

    #[test]
    fn long_message_is_truncated_with_terminator() {
        let long = "a".repeat(100);
        let bytes = ResponseBody::new(0, &long).to_bytes();
        assert_eq!(bytes[RESPONSE_BODY_SIZE - 1], 0);
        let body = ResponseBody::from_bytes(&bytes);
        assert_eq!(body.message.len(), MESSAGE_SIZE - 1);
    }

    #[test]
    fn book_request_layout() {
        let req = BookRequest {
            num_tickets: 3,
            user_id: 555,
        };
        let bytes = req.to_bytes();
        assert_eq!(bytes, [3, 0, 0, 0, 0x2b, 0x02, 0, 0]);
        assert_eq!(BookRequest::from_bytes(&bytes), req);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Authenticated.is_terminal());
    }
}
