use serde::{Deserialize, Serialize};

/// Worker identity as presented in the `AHOY` handshake.
///
/// Only `wid` is mandatory; everything else is advisory metadata. The
/// password is checked during the handshake and scrubbed before the record
/// is retained anywhere.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientWorker {
    #[serde(default)]
    pub wid: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub pid: Option<u64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// An out-of-band instruction handed back to a worker in response to a BEAT.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Signal {
    #[default]
    None,
    Quiet,
    Terminate,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::None => "",
            Signal::Quiet => "quiet",
            Signal::Terminate => "terminate",
        }
    }
}

// This impl is used when delivering a pending signal as a BEAT response.
impl Serialize for Signal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ahoy_payload_parses_with_missing_fields() {
        let w: ClientWorker = serde_json::from_str(r#"{"wid":"w1"}"#).unwrap();
        assert_eq!(w.wid, "w1");
        assert!(w.hostname.is_none());
        assert!(w.labels.is_empty());

        // A payload without a wid still parses; validation happens later so
        // the handshake can log a precise reason before closing.
        let w: ClientWorker = serde_json::from_str(r#"{"hostname":"h"}"#).unwrap();
        assert!(w.wid.is_empty());
    }
}
