use serde::Deserialize;

use crate::types::job::Job;
use crate::types::serialisable::WireSerialisable;

/// A command sent by a client after the handshake.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `PUSH {job json}`
    Push(Box<Job>),
    /// `POP q1 q2 …` — queues scanned in argument order.
    Pop(Vec<String>),
    /// `ACK <jid>` or `ACK {"jid":"…"}`
    Ack(String),
    /// `FAIL {json}`
    Fail(FailPayload),
    /// `BEAT {"wid":"…"}`
    Beat(BeatPayload),
    /// `INFO`
    Info,
    /// `STORE stats`
    StoreStats,
    /// `STORE backup`
    StoreBackup,
    /// `END`
    End,
}

/// The body of a `FAIL` command.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FailPayload {
    pub jid: String,
    #[serde(default)]
    pub errtype: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub backtrace: Vec<String>,
}

/// The body of a `BEAT` command.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BeatPayload {
    pub wid: String,
}

/// A server response in the RESP-style subset of the wire protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// `+OK\r\n`
    Ok,
    /// `$<len>\r\n<bytes>\r\n`
    Bulk(Vec<u8>),
    /// `$-1\r\n`
    Null,
    /// `-ERR <message>\r\n`
    Error(String),
}

impl WireSerialisable for Response {
    fn serialise_wire(&self) -> Vec<u8> {
        match self {
            Response::Ok => b"+OK\r\n".to_vec(),
            Response::Bulk(payload) => {
                let mut out = format!("${}\r\n", payload.len()).into_bytes();
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
                out
            },
            Response::Null => b"$-1\r\n".to_vec(),
            Response::Error(message) => format!("-ERR {message}\r\n").into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        assert_eq!(Response::Ok.serialise_wire(), b"+OK\r\n");
        assert_eq!(Response::Null.serialise_wire(), b"$-1\r\n");
        assert_eq!(
            Response::Bulk(b"{\"jid\":\"j1\"}".to_vec()).serialise_wire(),
            b"$12\r\n{\"jid\":\"j1\"}\r\n"
        );
        assert_eq!(
            Response::Error("Unknown command FOO".into()).serialise_wire(),
            b"-ERR Unknown command FOO\r\n"
        );
    }

    #[test]
    fn test_empty_bulk_is_not_null() {
        assert_eq!(Response::Bulk(Vec::new()).serialise_wire(), b"$0\r\n\r\n");
    }
}
