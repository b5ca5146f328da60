//! Blynk legacy wire protocol.
//!
//! Wire format:
//! ```text
//! ┌─────────┬────────────┬─────────────────┬────────────────────────┐
//! │ cmd u8  │ msg id u16 │ length u16      │ body, `\0` separated   │
//! └─────────┴────────────┴─────────────────┴────────────────────────┘
//! ```
//! Integers are big endian. A response frame has no body; its length
//! field carries the status code instead.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LEN: usize = 5;

/// Upper bound for an inbound body (protects against memory exhaustion).
pub const MAX_BODY_LEN: usize = 1024;

pub const STATUS_OK: u16 = 200;

const CMD_RESPONSE: u8 = 0;
const CMD_PING: u8 = 6;
const CMD_HARDWARE: u8 = 20;
const CMD_HW_LOGIN: u8 = 29;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame body of {0} bytes exceeds limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response { id: u16, status: u16 },
    Login { id: u16, token: String },
    Ping { id: u16 },
    /// Hardware command, body split at `\0`.
    Hardware { id: u16, args: Vec<String> },
    /// Any command this client does not handle.
    Other { command: u8, id: u16, body: Vec<u8> },
}

impl Frame {
    pub fn id(&self) -> u16 {
        match self {
            Frame::Response { id, .. }
            | Frame::Login { id, .. }
            | Frame::Ping { id }
            | Frame::Hardware { id, .. }
            | Frame::Other { id, .. } => *id,
        }
    }

    /// Virtual pin write `vw\0<pin>\0<value>`.
    pub fn virtual_write(id: u16, pin: u8, value: &str) -> Self {
        Frame::Hardware {
            id,
            args: vec!["vw".to_string(), pin.to_string(), value.to_string()],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (command, id, body): (u8, u16, Vec<u8>) = match self {
            Frame::Response { id, status } => {
                let mut out = Vec::with_capacity(HEADER_LEN);
                out.push(CMD_RESPONSE);
                out.extend_from_slice(&id.to_be_bytes());
                out.extend_from_slice(&status.to_be_bytes());
                return out;
            }
            Frame::Login { id, token } => (CMD_HW_LOGIN, *id, token.as_bytes().to_vec()),
            Frame::Ping { id } => (CMD_PING, *id, Vec::new()),
            Frame::Hardware { id, args } => (CMD_HARDWARE, *id, args.join("\0").into_bytes()),
            Frame::Other { command, id, body } => (*command, *id, body.clone()),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(command);
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// Split a header into `(command, id, length)`.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> (u8, u16, u16) {
    (
        header[0],
        u16::from_be_bytes([header[1], header[2]]),
        u16::from_be_bytes([header[3], header[4]]),
    )
}

fn decode(command: u8, id: u16, body: Vec<u8>) -> Frame {
    match command {
        CMD_PING => Frame::Ping { id },
        CMD_HW_LOGIN => Frame::Login {
            id,
            token: String::from_utf8_lossy(&body).into_owned(),
        },
        CMD_HARDWARE => Frame::Hardware {
            id,
            args: String::from_utf8_lossy(&body)
                .split('\0')
                .map(str::to_string)
                .collect(),
        },
        _ => Frame::Other { command, id, body },
    }
}

/// Read exactly one frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (command, id, length) = parse_header(&header);

    if command == CMD_RESPONSE {
        return Ok(Frame::Response { id, status: length });
    }

    let length = length as usize;
    if length > MAX_BODY_LEN {
        return Err(ProtocolError::TooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(decode(command, id, body))
}

/// Virtual pin request carried by a hardware frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinRequest {
    Write { pin: u8, value: String },
    Read { pin: u8 },
}

impl PinRequest {
    /// Parse `vw <pin> <value>` or `vr <pin>`. Other hardware commands
    /// (digital and analog pins) are not used and yield `None`.
    pub fn from_args(args: &[String]) -> Option<Self> {
        let (op, rest) = args.split_first()?;
        let pin = rest.first()?.parse().ok()?;
        match op.as_str() {
            "vw" => Some(PinRequest::Write {
                pin,
                value: rest.get(1)?.clone(),
            }),
            "vr" => Some(PinRequest::Read { pin }),
            _ => None,
        }
    }
}
