//! implements a parser for request lines of the TCP protocol.
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::types::protocol::Command;
use crate::util::valid_queue_name;

/// Provides a custom, minimal, zero-copy parser of byte slices.
struct ParseState<'a> {
    from: &'a [u8],
}

impl ParseState<'_> {
    /// Asserts there's no more input to take, returning `result` if so, and
    /// a `BadFormat` error otherwise.
    fn expect_done_and<R>(&self, result: R) -> Result<R, Error> {
        if self.from.is_empty() {
            Ok(result)
        } else {
            Err(Error::BadFormat("trailing bytes after command"))
        }
    }

    /// Consumes from the input, expecting a token of non-zero length.
    fn expect_next_token(&mut self) -> Result<&[u8], Error> {
        let token = self
            .next_token()
            .ok_or(Error::BadFormat("missing argument"))?;

        if token.is_empty() {
            Err(Error::BadFormat("empty argument"))
        } else {
            Ok(token)
        }
    }

    /// Consumes from the input, expecting a space then a queue name.
    fn expect_next_queue(&mut self) -> Result<String, Error> {
        self.expect_space()?;

        let token = self.expect_next_token()?;
        let name = std::str::from_utf8(token)
            .map_err(|_| Error::BadFormat("queue name is not UTF-8"))?;

        if valid_queue_name(name) {
            Ok(name.to_string())
        } else {
            Err(Error::BadFormat("invalid queue name"))
        }
    }

    /// Consumes the remainder of the input as a JSON object payload. The
    /// payload must start with `{`.
    fn expect_json_rest<D: DeserializeOwned>(&mut self) -> Result<D, Error> {
        self.expect_space()?;

        if self.from.first() != Some(&b'{') {
            return Err(Error::BadFormat("expected a JSON object payload"));
        }

        let parsed = serde_json::from_slice(self.from)?;
        self.from = &self.from[self.from.len()..];
        Ok(parsed)
    }

    /// Consumes a space.
    fn expect_space(&mut self) -> Result<(), Error> {
        match self.from.first() {
            Some(b' ') => {
                self.from = &self.from[1..];
                Ok(())
            },
            _ => Err(Error::BadFormat("expected a space separator")),
        }
    }

    /// Consumes from this ParseState until reaching a space byte or the end
    /// of the input. It returns None at the end of the input. On consecutive
    /// space bytes, it returns a zero-length slice.
    fn next_token(&mut self) -> Option<&[u8]> {
        if self.from.is_empty() {
            return None;
        }

        let idx = self
            .from
            .iter()
            .position(|c| *c == b' ')
            .unwrap_or(self.from.len());

        let token = &self.from[..idx];
        self.from = &self.from[idx..];

        Some(token)
    }

    /// True once all input has been consumed.
    fn at_end(&self) -> bool {
        self.from.is_empty()
    }
}

impl<'a> From<&'a [u8]> for ParseState<'a> {
    fn from(from: &'a [u8]) -> Self {
        ParseState { from }
    }
}

// Parsing is implemented to fulfil the TryFrom trait.
impl TryFrom<&[u8]> for Command {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        use Command::*;

        let mut ps: ParseState = value.into();

        match ps.expect_next_token()? {
            b"END" => ps.expect_done_and(End),
            b"INFO" => ps.expect_done_and(Info),

            b"PUSH" => Ok(Push(Box::new(ps.expect_json_rest()?))),
            b"FAIL" => Ok(Fail(ps.expect_json_rest()?)),
            b"BEAT" => Ok(Beat(ps.expect_json_rest()?)),

            // The argument is either a bare jid token or a JSON object with
            // a "jid" member; both forms are accepted.
            b"ACK" => {
                #[derive(serde::Deserialize)]
                struct AckPayload {
                    jid: String,
                }

                if ps.from.starts_with(b" {") {
                    let payload: AckPayload = ps.expect_json_rest()?;
                    Ok(Ack(payload.jid))
                } else {
                    ps.expect_space()?;
                    let jid = ps.expect_next_token()?;
                    let jid = std::str::from_utf8(jid)
                        .map_err(|_| Error::BadFormat("jid is not UTF-8"))?
                        .to_string();
                    ps.expect_done_and(Ack(jid))
                }
            },

            // Zero queue arguments is legal and yields a null pop.
            b"POP" => {
                let mut queues = Vec::new();
                while !ps.at_end() {
                    queues.push(ps.expect_next_queue()?);
                }
                Ok(Pop(queues))
            },

            b"STORE" => {
                ps.expect_space()?;
                let sub = ps.expect_next_token()?;
                if sub.eq_ignore_ascii_case(b"stats") {
                    ps.expect_done_and(StoreStats)
                } else if sub.eq_ignore_ascii_case(b"backup") {
                    ps.expect_done_and(StoreBackup)
                } else {
                    Err(Error::UnknownStoreCommand(
                        String::from_utf8_lossy(sub).into_owned(),
                    ))
                }
            },

            verb => Err(Error::UnknownCommand(
                String::from_utf8_lossy(verb).into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::{BeatPayload, FailPayload};

    // Asserts the line parses into the given command successfully.
    #[track_caller]
    fn ok(line: &[u8], res: Command) {
        assert_eq!(Command::try_from(line).unwrap(), res);
    }

    // Asserts the line fails to parse with a BadFormat error.
    #[track_caller]
    fn bf(line: &[u8]) {
        assert!(matches!(
            Command::try_from(line),
            Err(Error::BadFormat(_))
        ));
    }

    // Asserts the line fails to parse with an UnknownCommand error.
    #[track_caller]
    fn uc(line: &[u8]) {
        assert!(matches!(
            Command::try_from(line),
            Err(Error::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_command() {
        use Command::*;

        // Check silly non-commands
        bf(b"");
        bf(b" ");
        uc(b"syntax-error");
        uc(b"push {}"); // verbs are case-sensitive

        ok(b"END", End);
        bf(b"END trailing");
        ok(b"INFO", Info);

        // PUSH takes a JSON object and nothing else.
        let cmd = Command::try_from(
            &b"PUSH {\"jid\":\"j1\",\"jobtype\":\"T\",\"args\":[1]}"[..],
        )
        .unwrap();
        match cmd {
            Push(job) => {
                assert_eq!(job.jid, "j1");
                assert_eq!(job.jobtype, "T");
                assert_eq!(job.queue, "default");
            },
            other => panic!("expected Push, got {other:?}"),
        }
        bf(b"PUSH");
        bf(b"PUSH notjson");
        assert!(matches!(
            Command::try_from(&b"PUSH {\"jid\":}"[..]),
            Err(Error::Json(_))
        ));
        // Required members enforced at parse time.
        assert!(matches!(
            Command::try_from(&b"PUSH {\"jid\":\"j1\"}"[..]),
            Err(Error::Json(_))
        ));

        // POP takes zero or more queue names.
        ok(b"POP", Pop(vec![]));
        ok(b"POP default", Pop(vec!["default".into()]));
        ok(
            b"POP critical default low",
            Pop(vec!["critical".into(), "default".into(), "low".into()]),
        );
        bf(b"POP -bad");
        bf(b"POP a  b"); // consecutive spaces produce an empty token

        // ACK accepts a bare jid or a JSON object.
        ok(b"ACK j1", Ack("j1".into()));
        ok(b"ACK {\"jid\":\"j1\"}", Ack("j1".into()));
        bf(b"ACK");
        bf(b"ACK j1 j2");

        ok(
            b"FAIL {\"jid\":\"j1\",\"errtype\":\"E\",\"message\":\"boom\"}",
            Fail(FailPayload {
                jid: "j1".into(),
                errtype: Some("E".into()),
                message: Some("boom".into()),
                backtrace: vec![],
            }),
        );
        bf(b"FAIL j1");

        ok(
            b"BEAT {\"wid\":\"w1\"}",
            Beat(BeatPayload { wid: "w1".into() }),
        );
        bf(b"BEAT w1");

        ok(b"STORE stats", StoreStats);
        ok(b"STORE STATS", StoreStats);
        ok(b"STORE backup", StoreBackup);
        assert!(matches!(
            Command::try_from(&b"STORE frobnicate"[..]),
            Err(Error::UnknownStoreCommand(s)) if s == "frobnicate"
        ));
        bf(b"STORE");
    }
}
