//! Per-connection session handling: the AHOY handshake followed by the
//! command dispatch loop. Commands on one connection are processed
//! strictly in order; concurrency comes from running many sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::error::{Error, Result};
use crate::line_reader::LineReader;
use crate::types::protocol::{Command, Response};
use crate::types::serialisable::WireSerialisable;
use crate::types::worker::{ClientWorker, Signal};
use crate::util;

use super::ServerState;

/// The handshake must complete within this long of the connection opening.
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(1);

#[instrument(name = "session", err, fields(peer = %peer), skip_all)]
pub(crate) async fn begin(
    state: Arc<ServerState>,
    cancel: CancellationToken,
    _session_hold: mpsc::Sender<()>,
    conn: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("accepted connection");

    conn.set_nodelay(true)?;

    let (read_half, mut write_half) = conn.into_split();
    let mut reader = LineReader::from(read_half);

    let ret = handle(&state, &cancel, &mut reader, &mut write_half).await;

    write_half.shutdown().await?;

    debug!("closed connection");

    ret
}

async fn handle(
    state: &ServerState,
    cancel: &CancellationToken,
    reader: &mut LineReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    // AWAIT_HANDSHAKE: the first line must be a valid AHOY within the
    // deadline. Anything else closes the socket with no response.
    let line = match timeout(HANDSHAKE_DEADLINE, reader.read_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => {
            debug!("peer closed before handshake");
            return Ok(());
        },
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            info!("no AHOY within handshake deadline");
            return Ok(());
        },
    };

    let Some(wid) = handshake(state, &line) else {
        return Ok(());
    };

    write_response(writer, cancel, &Response::Ok).await?;

    // READY: dispatch complete command lines until END, EOF, socket error,
    // or server shutdown. Command errors are reported to the client and do
    // not end the session.
    loop {
        let line = select! {
            l = reader.read_line() => l?,
            _ = cancel.cancelled() => return Ok(()),
        };
        let Some(line) = line else {
            return Ok(());
        };

        trace!(cmd = util::bytes_to_human_str(&line), "processing command");

        let resp = match Command::try_from(&line[..]) {
            Ok(Command::End) => return Ok(()),
            Ok(cmd) => apply(state, &wid, cmd).await,
            Err(e) => Response::Error(e.to_string()),
        };

        write_response(writer, cancel, &resp).await?;
    }
}

/// Validates an AHOY line and registers the worker. Returns the wid on
/// success; on any failure the caller closes the connection silently.
fn handshake(state: &ServerState, line: &[u8]) -> Option<String> {
    let Some(payload) = line.strip_prefix(b"AHOY ") else {
        info!(line = util::bytes_to_human_str(line), "invalid handshake preamble");
        return None;
    };

    if payload.first() != Some(&b'{') {
        info!("handshake payload is not a JSON object");
        return None;
    }

    let client: ClientWorker = match serde_json::from_slice(payload) {
        Ok(client) => client,
        Err(error) => {
            info!(%error, "invalid handshake payload");
            return None;
        },
    };

    if let Some(required) = &state.opts.password {
        if client.password.as_deref() != Some(required.as_str()) {
            info!("handshake password mismatch");
            return None;
        }
    }

    if client.wid.is_empty() {
        info!("handshake missing wid");
        return None;
    }

    let wid = client.wid.clone();
    state.registry.register(client);
    Some(wid)
}

async fn apply(state: &ServerState, wid: &str, cmd: Command) -> Response {
    let result: Result<Response> = match cmd {
        Command::Push(job) => state.push(*job).await.map(|()| Response::Ok),
        Command::Pop(queues) => state.pop(wid, &queues).await.map(|popped| match popped {
            Some(job) => Response::Bulk(job),
            None => Response::Null,
        }),
        Command::Ack(jid) => state.ack(&jid).await.map(|()| Response::Ok),
        Command::Fail(fail) => state.fail(fail).await.map(|()| Response::Ok),
        Command::Beat(beat) => match state.beat(&beat.wid) {
            Ok(Signal::None) => Ok(Response::Ok),
            Ok(signal) => serde_json::to_vec(&serde_json::json!({ "signal": signal }))
                .map(Response::Bulk)
                .map_err(Error::from),
            Err(e) => Err(e),
        },
        Command::Info => state.info().await.map(Response::Bulk),
        Command::StoreStats => state.store_stats().await.map(Response::Bulk),
        Command::StoreBackup => Err(Error::BackupUnsupported),
        // END never reaches here; the session loop terminates on it.
        Command::End => Ok(Response::Ok),
    };

    match result {
        Ok(resp) => resp,
        Err(error) => Response::Error(error.to_string()),
    }
}

/// Writes a response with cancel safety: a shutdown mid-write abandons the
/// session rather than blocking shutdown on a slow peer.
async fn write_response(
    writer: &mut OwnedWriteHalf,
    cancel: &CancellationToken,
    resp: &Response,
) -> Result<()> {
    let wire = resp.serialise_wire();
    let mut buf = &wire[..];
    select! {
        n = writer.write_all_buf(&mut buf) => n?,
        _ = cancel.cancelled() => {},
    };
    Ok(())
}
