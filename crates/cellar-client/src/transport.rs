//! Worker transport.
//!
//! One task owns the socket and services calls strictly one at a time,
//! which gives the protocol's per-connection ordering guarantee for
//! free: a response always answers the oldest outstanding request.

use cellar_common::{Error, Result};
use cellar_proto::{read_frame, write_frame, Request, Response};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

struct Call {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
}

/// Handle to a live connection. Cloning shares the connection; the
/// socket closes once every clone is gone and the queue drains.
#[derive(Clone)]
pub struct Transport {
    tx: mpsc::Sender<Call>,
}

impl Transport {
    /// Open a connection to the master.
    pub async fn connect(endpoint: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{endpoint}: {e}")))?;
        stream.set_nodelay(true).ok();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_loop(stream, rx));
        debug!(%endpoint, "transport connected");
        Ok(Self { tx })
    }

    /// Issue one request and wait for its response.
    ///
    /// A server-reported failure comes back as the typed error it
    /// crossed the wire as.
    pub async fn call(&self, request: Request) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Call {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ConnectionFailed("transport closed".into()))?;
        let response = reply_rx
            .await
            .map_err(|_| Error::ConnectionFailed("transport closed".into()))??;
        match response {
            Response::Error(err) => Err(err.into_error()),
            response => Ok(response),
        }
    }
}

async fn run_loop(stream: TcpStream, mut rx: mpsc::Receiver<Call>) {
    let (mut reader, mut writer) = stream.into_split();

    while let Some(call) = rx.recv().await {
        let result = async {
            write_frame(&mut writer, &call.request).await?;
            match read_frame::<_, Response>(&mut reader).await? {
                Some(response) => Ok(response),
                None => Err(Error::ConnectionFailed("server closed the connection".into())),
            }
        }
        .await;

        let failed = result.is_err();
        let _ = call.reply.send(result);
        if failed {
            break;
        }
    }

    // The socket is gone or the connection broke; fail whatever is
    // still queued instead of leaving callers hanging.
    drop(reader);
    drop(writer);
    while let Some(call) = rx.recv().await {
        let _ = call
            .reply
            .send(Err(Error::ConnectionFailed("connection lost".into())));
    }
}
