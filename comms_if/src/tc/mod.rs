//! # Telecommand module
//!
//! This module provides the record codec used on the command channel. Every record is a run of
//! ASCII fields separated by [`DELIMITER`] and terminated by [`TERMINATOR`]:
//!
//! ```text
//! <NAME>#<param1>#<param2>#...#<paramN>\n
//! ```
//!
//! Commands (ground to tank) and responses/telemetry (tank to ground) share this framing. A
//! response carries its status as the first field after the name:
//!
//! ```text
//! CMD_MOTOR#OK#2000#2000\n
//! CMD_SONIC#ERR#Timeout\n
//! ```
//!
//! A line which can't be attributed to any known command is answered with the bare protocol
//! error record `ERR#<reason>\n`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cmd;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cmd::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Field delimiter.
pub const DELIMITER: char = '#';

/// Record terminator.
pub const TERMINATOR: char = '\n';

/// Default maximum length of a single line in bytes, including the terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 256;

/// Name of the record sent when a line can't be attributed to any command.
pub const PROTOCOL_ERROR_NAME: &str = "ERR";

const STATUS_OK: &str = "OK";
const STATUS_ERR: &str = "ERR";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single decoded command, i.e. an instruction sent to the tank by the ground.
///
/// The name is not checked against the vocabulary here, see [`Command::parse`] for that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// The name (tag) of the command
    pub name: String,

    /// Ordered parameters
    pub params: Vec<String>,
}

/// A response or telemetry record sent by the tank.
///
/// Unsolicited telemetry is framed exactly like a reply, so the ground side must correlate by
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub name: String,
    pub status: Status,
    pub payload: Vec<String>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Status of a response record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Err,
}

/// Errors produced while encoding a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("The record name is empty")]
    EmptyName,

    #[error("The field {0:?} contains a delimiter or line terminator")]
    InvalidField(String),
}

/// Errors produced while decoding a received line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("The line is empty")]
    Empty,

    #[error("The record has an empty name")]
    EmptyName,

    #[error("The line is {len} bytes long, the maximum is {max}")]
    Oversized { len: usize, max: usize },

    #[error("The line contains non-ASCII data")]
    NotAscii,

    #[error("The response {0:?} has no status field")]
    MissingStatus(String),

    #[error("The response status {0:?} is neither OK nor ERR")]
    BadStatus(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CommandRecord {
    pub fn new<S: Into<String>>(name: S, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Encode this record into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(&self.name, &self.params)
    }

    /// Decode a single received line.
    pub fn decode(line: &[u8], max_len: usize) -> Result<Self, DecodeError> {
        let mut fields = split_fields(line, max_len)?;

        // split_fields always returns at least one field
        let name = fields.remove(0);
        if name.is_empty() {
            return Err(DecodeError::EmptyName);
        }

        Ok(Self {
            name,
            params: fields,
        })
    }
}

impl ResponseRecord {
    /// Build a successful response.
    pub fn ok<S: Into<String>>(name: S, payload: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Ok,
            payload,
        }
    }

    /// Build a failed response carrying the given reason token.
    pub fn err<S: Into<String>>(name: S, reason: ErrReason) -> Self {
        Self {
            name: name.into(),
            status: Status::Err,
            payload: vec![reason.as_str().into()],
        }
    }

    /// Build the bare `ERR#<reason>` record.
    pub fn protocol_error(reason: ErrReason) -> Self {
        Self::err(PROTOCOL_ERROR_NAME, reason)
    }

    /// True if this is the bare protocol error record.
    pub fn is_protocol_error(&self) -> bool {
        self.name == PROTOCOL_ERROR_NAME
    }

    /// The reason token of an `ERR` response, if present.
    pub fn reason(&self) -> Option<&str> {
        match self.status {
            Status::Err => self.payload.first().map(|s| s.as_str()),
            Status::Ok => None,
        }
    }

    /// Encode this record into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.is_protocol_error() {
            return encode(&self.name, &self.payload);
        }

        let mut fields = Vec::with_capacity(self.payload.len() + 1);
        fields.push(match self.status {
            Status::Ok => STATUS_OK.to_string(),
            Status::Err => STATUS_ERR.to_string(),
        });
        fields.extend(self.payload.iter().cloned());

        encode(&self.name, &fields)
    }

    /// Decode a single received line.
    pub fn decode(line: &[u8], max_len: usize) -> Result<Self, DecodeError> {
        let mut fields = split_fields(line, max_len)?.into_iter();

        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(DecodeError::EmptyName);
        }

        if name == PROTOCOL_ERROR_NAME {
            return Ok(Self {
                name,
                status: Status::Err,
                payload: fields.collect(),
            });
        }

        let status = match fields.next() {
            Some(s) if s == STATUS_OK => Status::Ok,
            Some(s) if s == STATUS_ERR => Status::Err,
            Some(s) => return Err(DecodeError::BadStatus(s)),
            None => return Err(DecodeError::MissingStatus(name)),
        };

        Ok(Self {
            name,
            status,
            payload: fields.collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Encode a record as `name#p1#...#pN\n`.
///
/// No field may contain the delimiter or a line terminator.
pub fn encode<S: AsRef<str>>(name: &str, params: &[S]) -> Result<Vec<u8>, EncodeError> {
    if name.is_empty() {
        return Err(EncodeError::EmptyName);
    }
    check_field(name)?;

    let mut len = name.len() + 1;
    for p in params {
        check_field(p.as_ref())?;
        len += p.as_ref().len() + 1;
    }

    let mut out = String::with_capacity(len);
    out.push_str(name);
    for p in params {
        out.push(DELIMITER);
        out.push_str(p.as_ref());
    }
    out.push(TERMINATOR);

    Ok(out.into_bytes())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_field(field: &str) -> Result<(), EncodeError> {
    if field.contains(|c: char| c == DELIMITER || c == TERMINATOR || c == '\r') {
        Err(EncodeError::InvalidField(field.to_string()))
    } else {
        Ok(())
    }
}

/// Strip the terminator and split a line into its fields.
fn split_fields(line: &[u8], max_len: usize) -> Result<Vec<String>, DecodeError> {
    if line.len() > max_len {
        return Err(DecodeError::Oversized {
            len: line.len(),
            max: max_len,
        });
    }

    let mut body = line;
    if let Some((&b'\n', rest)) = body.split_last() {
        body = rest;
    }
    if let Some((&b'\r', rest)) = body.split_last() {
        body = rest;
    }

    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    if !body.is_ascii() {
        return Err(DecodeError::NotAscii);
    }

    // ASCII is always valid UTF-8
    let text = String::from_utf8_lossy(body);

    Ok(text.split(DELIMITER).map(String::from).collect())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn params(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_motor() {
        assert_eq!(
            encode("CMD_MOTOR", &["1000", "-1000"]).unwrap(),
            b"CMD_MOTOR#1000#-1000\n".to_vec()
        );
        assert_eq!(encode::<&str>("CMD_STOP", &[]).unwrap(), b"CMD_STOP\n".to_vec());
    }

    #[test]
    fn test_encode_rejects_delimiters() {
        assert_eq!(
            encode("CMD_LED", &["1#2"]),
            Err(EncodeError::InvalidField("1#2".into()))
        );
        assert_eq!(
            encode("CMD_LED", &["1\n"]),
            Err(EncodeError::InvalidField("1\n".into()))
        );
        assert_eq!(encode::<&str>("", &[]), Err(EncodeError::EmptyName));
    }

    #[test]
    fn test_round_trip() {
        let records = vec![
            CommandRecord::new("CMD_MOTOR", params(&["2000", "-2000"])),
            CommandRecord::new("CMD_SERVO", params(&["0", "90"])),
            CommandRecord::new("CMD_STOP", vec![]),
            CommandRecord::new("CMD_LED", params(&["", "255", "0", "0"])),
        ];

        for r in records {
            let bytes = r.encode().unwrap();
            assert_eq!(CommandRecord::decode(&bytes, DEFAULT_MAX_LINE_LEN).unwrap(), r);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            CommandRecord::decode(b"\n", DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::Empty)
        );
        assert_eq!(
            CommandRecord::decode(b"#1#2\n", DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::EmptyName)
        );
        assert_eq!(
            CommandRecord::decode("CMD_MOTOR#é\n".as_bytes(), DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::NotAscii)
        );

        let long = vec![b'A'; 300];
        assert_eq!(
            CommandRecord::decode(&long, DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::Oversized { len: 300, max: 256 })
        );
    }

    #[test]
    fn test_decode_strips_crlf() {
        let r = CommandRecord::decode(b"CMD_SERVO#1#45\r\n", DEFAULT_MAX_LINE_LEN).unwrap();
        assert_eq!(r.name, "CMD_SERVO");
        assert_eq!(r.params, params(&["1", "45"]));
    }

    #[test]
    fn test_response_encoding() {
        let ok = ResponseRecord::ok("CMD_SONIC", params(&["25.5"]));
        assert_eq!(ok.encode().unwrap(), b"CMD_SONIC#OK#25.5\n".to_vec());

        let err = ResponseRecord::err("CMD_SONIC", ErrReason::Timeout);
        assert_eq!(err.encode().unwrap(), b"CMD_SONIC#ERR#Timeout\n".to_vec());
        assert_eq!(err.reason(), Some("Timeout"));

        let proto = ResponseRecord::protocol_error(ErrReason::DecodeError);
        assert_eq!(proto.encode().unwrap(), b"ERR#DecodeError\n".to_vec());
    }

    #[test]
    fn test_response_decoding() {
        let r = ResponseRecord::decode(b"CMD_MOTOR#OK#2000#2000\n", DEFAULT_MAX_LINE_LEN)
            .unwrap();
        assert_eq!(r, ResponseRecord::ok("CMD_MOTOR", params(&["2000", "2000"])));

        let r = ResponseRecord::decode(b"ERR#DecodeError\n", DEFAULT_MAX_LINE_LEN).unwrap();
        assert!(r.is_protocol_error());
        assert_eq!(r.reason(), Some("DecodeError"));

        assert_eq!(
            ResponseRecord::decode(b"CMD_MOTOR\n", DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::MissingStatus("CMD_MOTOR".into()))
        );
        assert_eq!(
            ResponseRecord::decode(b"CMD_MOTOR#MAYBE\n", DEFAULT_MAX_LINE_LEN),
            Err(DecodeError::BadStatus("MAYBE".into()))
        );
    }
}
