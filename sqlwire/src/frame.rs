//! Stream transport framing.
//!
//! Request frame, client to server:
//!
//! ```text
//! | info: u8 | slot: u16 LE | length: u32 LE | payload |
//! ```
//!
//! Response frame, server to client:
//!
//! ```text
//! | info: u8 | slot: u16 LE | writer: u8 | length: u32 LE | payload |
//! ```
//!
//! where `writer` is only present for [`ResponseInfo::ResultSetPayload`].
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::ext::{FmtExt, UsizeExt};

/// Frames larger than this are rejected as corrupted stream.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const REQUEST_HEADER_LEN: usize = 1 + 2 + 4;
const RESPONSE_HEADER_LEN: usize = 1 + 2 + 4;
const WRITER_LEN: usize = 1;

/// Request frame kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestInfo {
    SessionHello = 1,
    SessionPayload = 2,
    ResultSetByeOk = 3,
}

/// Response frame kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseInfo {
    SessionPayload = 1,
    ResultSetPayload = 2,
    HelloOk = 3,
    HelloNg = 4,
    ResultSetHello = 5,
    ResultSetBye = 6,
    SessionBodyHead = 7,
}

impl RequestInfo {
    pub fn from_u8(info: u8) -> Option<Self> {
        let info = match info {
            1 => Self::SessionHello,
            2 => Self::SessionPayload,
            3 => Self::ResultSetByeOk,
            _ => return None,
        };
        Some(info)
    }
}

impl ResponseInfo {
    pub fn from_u8(info: u8) -> Option<Self> {
        let info = match info {
            1 => Self::SessionPayload,
            2 => Self::ResultSetPayload,
            3 => Self::HelloOk,
            4 => Self::HelloNg,
            5 => Self::ResultSetHello,
            6 => Self::ResultSetBye,
            7 => Self::SessionBodyHead,
            _ => return None,
        };
        Some(info)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionPayload => "SessionPayload",
            Self::ResultSetPayload => "ResultSetPayload",
            Self::HelloOk => "HelloOk",
            Self::HelloNg => "HelloNg",
            Self::ResultSetHello => "ResultSetHello",
            Self::ResultSetBye => "ResultSetBye",
            Self::SessionBodyHead => "SessionBodyHead",
        }
    }
}

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
    pub info: RequestInfo,
    pub slot: u16,
    pub payload: Bytes,
}

/// Frame sent by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    pub info: ResponseInfo,
    /// Response box for session frames, result set index for result set frames.
    pub slot: u16,
    /// Writer id, only meaningful for [`ResponseInfo::ResultSetPayload`].
    pub writer: u8,
    pub payload: Bytes,
}

impl RequestFrame {
    pub fn new(info: RequestInfo, slot: u16, payload: impl Into<Bytes>) -> Self {
        Self { info, slot, payload: payload.into() }
    }

    /// Write frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(REQUEST_HEADER_LEN + self.payload.len());
        buf.put_u8(self.info as u8);
        buf.put_u16_le(self.slot);
        buf.put_u32_le(self.payload.len().to_u32());
        buf.put_slice(&self.payload);
    }

    /// Split one frame from the front of `buf`.
    ///
    /// Returns [`None`] if `buf` does not yet contain a whole frame.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(mut header) = buf.get(..REQUEST_HEADER_LEN) else {
            return Ok(None);
        };
        let info = header.get_u8();
        let info = RequestInfo::from_u8(info).ok_or(ProtocolError::UnknownInfo(info))?;
        let slot = header.get_u16_le();
        let len = payload_len(header.get_u32_le())?;

        if buf.len() < REQUEST_HEADER_LEN + len {
            buf.reserve(REQUEST_HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(REQUEST_HEADER_LEN);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Self { info, slot, payload }))
    }
}

impl ResponseFrame {
    pub fn new(info: ResponseInfo, slot: u16, payload: impl Into<Bytes>) -> Self {
        Self { info, slot, writer: 0, payload: payload.into() }
    }

    /// Result set chunk from `writer`, empty `payload` marks end of record.
    pub fn result_set_payload(index: u16, writer: u8, payload: impl Into<Bytes>) -> Self {
        Self { info: ResponseInfo::ResultSetPayload, slot: index, writer, payload: payload.into() }
    }

    fn header_len(info: ResponseInfo) -> usize {
        match info {
            ResponseInfo::ResultSetPayload => RESPONSE_HEADER_LEN + WRITER_LEN,
            _ => RESPONSE_HEADER_LEN,
        }
    }

    /// Write frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::header_len(self.info) + self.payload.len());
        buf.put_u8(self.info as u8);
        buf.put_u16_le(self.slot);
        if let ResponseInfo::ResultSetPayload = self.info {
            buf.put_u8(self.writer);
        }
        buf.put_u32_le(self.payload.len().to_u32());
        buf.put_slice(&self.payload);
    }

    /// Split one frame from the front of `buf`.
    ///
    /// Returns [`None`] if `buf` does not yet contain a whole frame.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(&info) = buf.first() else {
            return Ok(None);
        };
        let info = ResponseInfo::from_u8(info).ok_or(ProtocolError::UnknownInfo(info))?;
        let header_len = Self::header_len(info);

        let Some(mut header) = buf.get(1..header_len) else {
            return Ok(None);
        };
        let slot = header.get_u16_le();
        let writer = match info {
            ResponseInfo::ResultSetPayload => header.get_u8(),
            _ => 0,
        };
        let len = payload_len(header.get_u32_le())?;

        if buf.len() < header_len + len {
            buf.reserve(header_len + len - buf.len());
            return Ok(None);
        }

        buf.advance(header_len);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Self { info, slot, writer, payload }))
    }
}

fn payload_len(len: u32) -> Result<usize, ProtocolError> {
    let len = len as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(len)
}

/// An error when peer does not follow the wire protocol.
pub enum ProtocolError {
    /// Frame kind byte is not assigned.
    UnknownInfo(u8),
    /// Frame length exceed [`MAX_PAYLOAD_LEN`].
    FrameTooLarge(usize),
    /// Response for a response box that is not owned.
    UnknownSlot(u16),
    /// Frame is not expected at this point.
    Unexpected {
        found: ResponseInfo,
        phase: &'static str,
    },
    /// Server refused the session.
    HandshakeRefused(String),
}

impl ProtocolError {
    pub(crate) fn refused(reason: &[u8]) -> Self {
        Self::HandshakeRefused(reason.lossy().to_string())
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownInfo(info) => write!(f, "unknown frame kind `{info}`"),
            Self::FrameTooLarge(len) => write!(f, "frame of {len} bytes exceed maximum payload length"),
            Self::UnknownSlot(slot) => write!(f, "response for free response box `{slot}`"),
            Self::Unexpected { found, phase } => {
                write!(f, "unexpected frame `{}` in `{phase}`", found.name())
            }
            Self::HandshakeRefused(reason) => write!(f, "session refused: {reason}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
