//! Wire frame: the self-describing binary envelope exchanged over the relay
//! (spec §6). Grounded in `jmux-proto`'s `bytes::{Buf, BufMut}` style of
//! explicit, length-prefixed (de)serialization rather than a generic codec
//! crate, since the envelope's `props` field is an open string→value map and
//! doesn't fit a fixed struct layout.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol discriminator (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Shell,
    FileTransfer,
    PortForward,
    MenderClient,
    Unknown(u16),
}

impl From<u16> for Proto {
    fn from(v: u16) -> Self {
        match v {
            1 => Proto::Shell,
            2 => Proto::FileTransfer,
            3 => Proto::PortForward,
            4 => Proto::MenderClient,
            other => Proto::Unknown(other),
        }
    }
}

impl From<Proto> for u16 {
    fn from(p: Proto) -> Self {
        match p {
            Proto::Shell => 1,
            Proto::FileTransfer => 2,
            Proto::PortForward => 3,
            Proto::MenderClient => 4,
            Proto::Unknown(v) => v,
        }
    }
}

/// Shell protocol (`proto = 1`) message kinds.
pub mod shell_kind {
    pub const NEW_SESSION: &str = "NewSession";
    pub const START_SHELL: &str = "StartShell";
    pub const STOP_SHELL: &str = "StopShell";
    pub const SHELL_DATA: &str = "ShellData";
    pub const PING: &str = "Ping";
    pub const PONG: &str = "Pong";
    pub const ERROR: &str = "Error";
}

/// File transfer protocol (`proto = 2`) message kinds and well-known props.
pub mod file_kind {
    pub const GET_FILE: &str = "GetFile";
    pub const PUT_FILE: &str = "PutFile";
    pub const FILE_CHUNK: &str = "FileChunk";
    pub const ACK: &str = "ACK";
    pub const ERROR: &str = "Error";

    pub const PROP_PATH: &str = "path";
    pub const PROP_UID: &str = "uid";
    pub const PROP_GID: &str = "gid";
    pub const PROP_MODE: &str = "mode";
    pub const PROP_SIZE: &str = "size";
}

/// Mender client protocol (`proto = 4`) message kinds.
pub mod mender_kind {
    pub const CHECK_UPDATE: &str = "CheckUpdate";
    pub const SEND_INVENTORY: &str = "SendInventory";
}

/// A property value. Kept as a small closed set rather than arbitrary
/// `serde_json::Value` so that file-transfer metadata (uid/gid/mode/size)
/// round-trips as integers instead of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Text(String),
    Int(i64),
    Bytes(Vec<u8>),
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Text(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Text(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

pub type Props = HashMap<String, PropValue>;

/// The self-describing message envelope (spec §3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub proto: Proto,
    pub kind: String,
    pub session_id: Option<Uuid>,
    pub props: Props,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: need {need} more byte(s)")]
    Truncated { need: usize },
    #[error("invalid utf-8 in frame field")]
    InvalidUtf8,
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("invalid properties payload: {0}")]
    InvalidProps(String),
}

impl Frame {
    pub fn new(proto: Proto, kind: impl Into<String>, session_id: Option<Uuid>) -> Self {
        Self {
            proto,
            kind: kind.into(),
            session_id,
            props: Props::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Encode as: u16 proto | u16 len+kind | u16 len+sid | u32 len+props(json) | u32 len+body.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16(self.proto.into());

        put_short_str(&mut buf, &self.kind);

        let sid_str = self.session_id.map(|id| id.to_string()).unwrap_or_default();
        put_short_str(&mut buf, &sid_str);

        let props_json = serde_json::to_vec(&self.props).unwrap_or_default();
        buf.put_u32(props_json.len() as u32);
        buf.put_slice(&props_json);

        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);

        buf
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, FrameError> {
        need(&buf, 2)?;
        let proto = Proto::from(buf.get_u16());

        let kind = get_short_str(&mut buf)?;

        let sid_str = get_short_str(&mut buf)?;
        let session_id = if sid_str.is_empty() {
            None
        } else {
            Some(Uuid::parse_str(&sid_str).map_err(|_| FrameError::InvalidSessionId(sid_str))?)
        };

        need(&buf, 4)?;
        let props_len = buf.get_u32() as usize;
        need(&buf, props_len)?;
        let props: Props = if props_len == 0 {
            Props::new()
        } else {
            let mut raw = vec![0u8; props_len];
            buf.copy_to_slice(&mut raw);
            serde_json::from_slice(&raw).map_err(|e| FrameError::InvalidProps(e.to_string()))?
        };

        need(&buf, 4)?;
        let body_len = buf.get_u32() as usize;
        need(&buf, body_len)?;
        let mut body = vec![0u8; body_len];
        buf.copy_to_slice(&mut body);

        Ok(Frame {
            proto,
            kind,
            session_id,
            props,
            body: Bytes::from(body),
        })
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), FrameError> {
    if buf.remaining() < n {
        Err(FrameError::Truncated { need: n - buf.remaining() })
    } else {
        Ok(())
    }
}

fn put_short_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_short_str(buf: &mut impl Buf) -> Result<String, FrameError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8)
}
