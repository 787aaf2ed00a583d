//! Frame codec: additive checksum plus XOR obfuscation.
//!
//! A frame is a fixed header optionally followed by a fixed-size body. The
//! header's checksum field holds `checksum(header with zeroed checksum) +
//! checksum(body)`. Header and body are then obfuscated as two separate
//! regions, each starting at key offset 0, so either can be decoded on its
//! own.
//!
//! Neither layer is a security control. The obfuscation keeps casual
//! corruption from looking like valid data and the checksum catches any
//! single-byte change. It does not catch compensating changes (one byte +1,
//! another -1) or bytes swapped in position.

use tracing::warn;

use crate::error::CodecError;
use crate::protocol::{
    BookRequest, HEADER_SIZE, Header, OFF_CHECKSUM, OpCode, RESPONSE_BODY_SIZE, Response,
    ResponseBody,
};

/// Wrapping sum of every byte in `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// A decoded request frame, as seen by the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: Header,
    pub opcode: OpCode,
    pub book: Option<BookRequest>,
}

/// Encoder/decoder bound to one shared obfuscation key.
#[derive(Debug, Clone)]
pub struct Codec {
    key: Vec<u8>,
}

impl Codec {
    pub fn new(key: Vec<u8>) -> Result<Self, CodecError> {
        if key.is_empty() {
            return Err(CodecError::EmptyKey);
        }
        Ok(Self { key })
    }

    /// XOR `region` with the repeating key. Applying it twice is a no-op.
    pub fn obfuscate(&self, region: &mut [u8]) {
        for (b, k) in region.iter_mut().zip(self.key.iter().cycle()) {
            *b ^= k;
        }
    }

    pub fn deobfuscate(&self, region: &mut [u8]) {
        self.obfuscate(region);
    }

    /// Build the wire bytes for a client request.
    pub fn encode_request(
        &self,
        opcode: OpCode,
        req_id: u16,
        session_id: u32,
        body: Option<&BookRequest>,
    ) -> Vec<u8> {
        let body = body.map(|b| b.to_bytes().to_vec()).unwrap_or_default();
        let header = Header::new(opcode, req_id, session_id, body.len());
        self.seal(header, body)
    }

    /// Build the wire bytes for a server response.
    pub fn encode_response(
        &self,
        opcode: OpCode,
        req_id: u16,
        session_id: u32,
        body: &ResponseBody,
    ) -> Vec<u8> {
        let header = Header::new(opcode, req_id, session_id, RESPONSE_BODY_SIZE);
        self.seal(header, body.to_bytes().to_vec())
    }

    fn seal(&self, mut header: Header, mut body: Vec<u8>) -> Vec<u8> {
        header.checksum = 0;
        let sum = checksum(&header.to_bytes()).wrapping_add(checksum(&body));
        header.checksum = sum;

        let mut frame = header.to_bytes().to_vec();
        self.obfuscate(&mut frame);
        self.obfuscate(&mut body);
        frame.extend_from_slice(&body);
        frame
    }

    /// Deobfuscate a header without verifying it.
    ///
    /// Only useful to learn which body schema follows; nothing in the result
    /// may be trusted until the whole frame passes [`Codec::decode_request`]
    /// or [`Codec::decode_response`].
    pub fn peek_header(&self, wire: &[u8; HEADER_SIZE]) -> Header {
        let mut plain = *wire;
        self.deobfuscate(&mut plain);
        Header::from_bytes(&plain)
    }

    /// Decode and verify a response frame read off the wire.
    ///
    /// The opcode is not judged here: what counts as acceptable depends on
    /// which request the frame answers.
    pub fn decode_response(
        &self,
        header_wire: &[u8; HEADER_SIZE],
        body_wire: &[u8; RESPONSE_BODY_SIZE],
    ) -> Result<Response, CodecError> {
        let mut body = *body_wire;
        let header = self.verify(header_wire, &mut body)?;

        if header.packet_len as usize != HEADER_SIZE + RESPONSE_BODY_SIZE {
            warn!(
                packet_len = header.packet_len,
                req_id = header.req_id,
                "response packet_len disagrees with schema, ignoring"
            );
        }

        Ok(Response {
            opcode: header.opcode(),
            header,
            body: ResponseBody::from_bytes(&body),
        })
    }

    /// Decode and verify a request frame. `body_wire` must be exactly the
    /// size implied by the header's opcode.
    pub fn decode_request(
        &self,
        header_wire: &[u8; HEADER_SIZE],
        body_wire: &[u8],
    ) -> Result<Request, CodecError> {
        let mut body = body_wire.to_vec();
        let header = self.verify(header_wire, &mut body)?;
        let opcode =
            OpCode::from_u16(header.opcode).ok_or(CodecError::UnknownOpcode(header.opcode))?;

        let book = match opcode {
            OpCode::BookTicket => {
                let bytes: [u8; 8] = body.as_slice().try_into().map_err(|_| {
                    CodecError::BodySize {
                        expected: opcode.request_body_size(),
                        actual: body.len(),
                    }
                })?;
                Some(BookRequest::from_bytes(&bytes))
            }
            _ if !body.is_empty() => {
                return Err(CodecError::BodySize {
                    expected: 0,
                    actual: body.len(),
                });
            }
            _ => None,
        };

        Ok(Request {
            header,
            opcode,
            book,
        })
    }

    /// Deobfuscate both regions and check the checksum. `body` is
    /// deobfuscated in place.
    fn verify(&self, header_wire: &[u8; HEADER_SIZE], body: &mut [u8]) -> Result<Header, CodecError> {
        let mut plain = *header_wire;
        self.deobfuscate(&mut plain);
        self.deobfuscate(body);

        let header = Header::from_bytes(&plain);
        let received = header.checksum;
        plain[OFF_CHECKSUM..OFF_CHECKSUM + 4].fill(0);
        let computed = checksum(&plain).wrapping_add(checksum(body));

        if computed != received {
            return Err(CodecError::ChecksumMismatch { received, computed });
        }
        Ok(header)
    }
}
