//! PostgreSQL protocol 3.0 framing, simple-query subset.
//!
//! Frontend messages are decoded incrementally out of a `BytesMut` read
//! buffer: a decode call returns `Ok(None)` until a whole frame is
//! buffered. Backend messages are encoded straight into an output buffer.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Protocol version 3.0 as sent in a startup packet.
pub const PROTOCOL_VERSION_3: u32 = 196608;
const SSL_REQUEST_CODE: u32 = 80877103;
const GSSENC_REQUEST_CODE: u32 = 80877104;
const CANCEL_REQUEST_CODE: u32 = 80877102;

/// Frames larger than this are refused rather than buffered.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Type OIDs used in row descriptions.
pub const INT8_OID: i32 = 20;
pub const TEXT_OID: i32 = 25;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid frame length {0}")]
    FrameLength(usize),

    #[error("unsupported protocol version {0:#x}")]
    ProtocolVersion(u32),

    #[error("too many columns: {0}")]
    TooManyColumns(usize),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-to-server messages this server understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Encryption negotiation (SSL or GSS); always declined.
    EncryptionRequest,
    Startup {
        parameters: Vec<(String, String)>,
    },
    CancelRequest,
    /// Simple query.
    Query(String),
    Terminate,
    /// Any other tagged message; answered with an error.
    Unsupported(u8),
}

/// Column of a row description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: i32,
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Single byte refusing encryption.
    EncryptionRefused,
    AuthenticationOk,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// Always idle: there are no transactions.
    ReadyForQuery,
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<String>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse { code: String, message: String },
}

/// Decode the first packet of a connection, which carries no tag byte.
pub fn decode_startup(buf: &mut BytesMut) -> Result<Option<FrontendMessage>, WireError> {
    if buf.len() < 8 {
        return Ok(None);
    }
    let len = read_len(buf, 0)?;
    if len < 8 {
        return Err(WireError::FrameLength(len));
    }
    if buf.len() < len {
        return Ok(None);
    }

    let mut frame = buf.split_to(len);
    frame.advance(4);
    let code = frame.get_u32();
    match code {
        SSL_REQUEST_CODE | GSSENC_REQUEST_CODE => Ok(Some(FrontendMessage::EncryptionRequest)),
        CANCEL_REQUEST_CODE => Ok(Some(FrontendMessage::CancelRequest)),
        PROTOCOL_VERSION_3 => {
            let mut parameters = Vec::new();
            loop {
                let key = read_cstr(&mut frame)?;
                if key.is_empty() {
                    break;
                }
                let value = read_cstr(&mut frame)?;
                parameters.push((key, value));
            }
            Ok(Some(FrontendMessage::Startup { parameters }))
        }
        other => Err(WireError::ProtocolVersion(other)),
    }
}

/// Decode one tagged message.
pub fn decode_message(buf: &mut BytesMut) -> Result<Option<FrontendMessage>, WireError> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let len = read_len(buf, 1)?;
    if len < 4 {
        return Err(WireError::FrameLength(len));
    }
    if buf.len() < len + 1 {
        return Ok(None);
    }

    let tag = buf[0];
    let mut frame = buf.split_to(len + 1);
    frame.advance(5);
    let message = match tag {
        b'Q' => FrontendMessage::Query(read_cstr(&mut frame)?),
        b'X' => FrontendMessage::Terminate,
        other => FrontendMessage::Unsupported(other),
    };
    Ok(Some(message))
}

/// Append `msg` to `out`. Nothing is written when `msg` cannot be
/// represented on the wire.
pub fn encode(msg: &BackendMessage, out: &mut BytesMut) -> Result<(), WireError> {
    match msg {
        BackendMessage::RowDescription(fields) => {
            let count = column_count(fields.len())?;
            framed(out, b'T', |b| {
                b.put_i16(count);
                for field in fields {
                    put_cstr(b, &field.name);
                    b.put_i32(0); // table oid
                    b.put_i16(0); // column attribute number
                    b.put_i32(field.type_oid);
                    b.put_i16(-1); // variable size
                    b.put_i32(-1); // type modifier
                    b.put_i16(0); // text format
                }
            });
        }
        BackendMessage::DataRow(values) => {
            let count = column_count(values.len())?;
            framed(out, b'D', |b| {
                b.put_i16(count);
                for value in values {
                    match value {
                        Some(text) => {
                            b.put_i32(text.len() as i32);
                            b.put_slice(text.as_bytes());
                        }
                        None => b.put_i32(-1),
                    }
                }
            });
        }
        other => encode_fixed(other, out),
    }
    Ok(())
}

fn column_count(len: usize) -> Result<i16, WireError> {
    i16::try_from(len).map_err(|_| WireError::TooManyColumns(len))
}

/// Messages whose layout cannot overflow a field.
fn encode_fixed(msg: &BackendMessage, out: &mut BytesMut) {
    match msg {
        BackendMessage::EncryptionRefused => out.put_u8(b'N'),
        BackendMessage::AuthenticationOk => framed(out, b'R', |b| b.put_i32(0)),
        BackendMessage::ParameterStatus { name, value } => framed(out, b'S', |b| {
            put_cstr(b, name);
            put_cstr(b, value);
        }),
        BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        } => framed(out, b'K', |b| {
            b.put_i32(*process_id);
            b.put_i32(*secret_key);
        }),
        BackendMessage::ReadyForQuery => framed(out, b'Z', |b| b.put_u8(b'I')),
        BackendMessage::RowDescription(_) | BackendMessage::DataRow(_) => {}
        BackendMessage::CommandComplete(tag) => framed(out, b'C', |b| put_cstr(b, tag)),
        BackendMessage::EmptyQueryResponse => framed(out, b'I', |_| {}),
        BackendMessage::ErrorResponse { code, message } => framed(out, b'E', |b| {
            b.put_u8(b'S');
            put_cstr(b, "ERROR");
            b.put_u8(b'V');
            put_cstr(b, "ERROR");
            b.put_u8(b'C');
            put_cstr(b, code);
            b.put_u8(b'M');
            put_cstr(b, message);
            b.put_u8(0);
        }),
    }
}

/// Write a tagged message, back-filling its length.
fn framed(out: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    out.put_u8(tag);
    let len_pos = out.len();
    out.put_i32(0);
    body(out);
    let len = (out.len() - len_pos) as i32;
    out[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_u8(0);
}

/// Big-endian frame length at `offset`, bounded by [`MAX_FRAME_LEN`].
fn read_len(buf: &BytesMut, offset: usize) -> Result<usize, WireError> {
    let raw = [
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ];
    let len = u32::from_be_bytes(raw) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameLength(len));
    }
    Ok(len)
}

fn read_cstr(frame: &mut BytesMut) -> Result<String, WireError> {
    let end = frame
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::Malformed("unterminated string".to_string()))?;
    let bytes = frame.split_to(end);
    frame.advance(1);
    String::from_utf8(bytes.to_vec()).map_err(|e| WireError::Malformed(e.to_string()))
}
