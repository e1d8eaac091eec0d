//! Length-prefixed wire framing
//!
//! All integers are little-endian unsigned 32-bit.
//!
//! Request frame:
//! ```text
//! totalLen:u32 | argc:u32 | argLen:u32 argBytes… | argLen:u32 argBytes… | …
//! ```
//! `totalLen` counts every byte after itself and is capped at 4096. Each
//! argument is a UTF-8 string.
//!
//! Response frame:
//! ```text
//! totalLen:u32 | rescode:u32 | payload…
//! ```
//! with rescode 0 = OK, 1 = ERR, 2 = NOT_FOUND.

use thiserror::Error;

/// Maximum bytes after the length prefix, both directions.
pub const MAX_MSG: usize = 4096;
/// Maximum argument count in one request.
pub const MAX_ARGS: usize = 1024;

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResCode {
    Ok,
    Err,
    NotFound,
}

impl ResCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ResCode::Ok => 0,
            ResCode::Err => 1,
            ResCode::NotFound => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ResCode::Ok),
            1 => Some(ResCode::Err),
            2 => Some(ResCode::NotFound),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame exceeds {MAX_MSG} bytes")]
    FrameTooLong,

    #[error("request carries more than {MAX_ARGS} arguments")]
    TooManyArgs,

    #[error("malformed frame")]
    Malformed,

    #[error("argument is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a full request frame (length prefix included).
pub fn encode_request<S: AsRef<str>>(args: &[S]) -> Result<Vec<u8>, ProtocolError> {
    if args.len() > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs);
    }
    let body_len = 4 + args
        .iter()
        .map(|arg| 4 + arg.as_ref().len())
        .sum::<usize>();
    if body_len > MAX_MSG {
        return Err(ProtocolError::FrameTooLong);
    }

    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        let bytes = arg.as_ref().as_bytes();
        frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(bytes);
    }
    Ok(frame)
}

/// Decode a request body (the bytes after `totalLen`) into its argument
/// vector. Trailing garbage, short buffers, and over-long counts are all
/// rejected.
pub fn parse_request(body: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if body.len() < 4 {
        return Err(ProtocolError::Malformed);
    }
    let argc = read_u32(body, 0) as usize;
    if argc > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs);
    }

    let mut args = Vec::with_capacity(argc);
    let mut pos = 4usize;
    for _ in 0..argc {
        if pos + 4 > body.len() {
            return Err(ProtocolError::Malformed);
        }
        let len = read_u32(body, pos) as usize;
        pos += 4;
        if pos + len > body.len() {
            return Err(ProtocolError::Malformed);
        }
        let arg = std::str::from_utf8(&body[pos..pos + len])
            .map_err(|_| ProtocolError::InvalidUtf8)?;
        args.push(arg.to_string());
        pos += len;
    }

    if pos != body.len() {
        return Err(ProtocolError::Malformed);
    }
    Ok(args)
}

/// Encode a full response frame (length prefix included).
pub fn encode_response(code: ResCode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let body_len = 4 + payload.len();
    if body_len > MAX_MSG {
        return Err(ProtocolError::FrameTooLong);
    }
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&code.as_u32().to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a response body (the bytes after `totalLen`).
pub fn parse_response(body: &[u8]) -> Result<(ResCode, Vec<u8>), ProtocolError> {
    if body.len() < 4 {
        return Err(ProtocolError::Malformed);
    }
    let code = ResCode::from_u32(read_u32(body, 0)).ok_or(ProtocolError::Malformed)?;
    Ok((code, body[4..].to_vec()))
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}
