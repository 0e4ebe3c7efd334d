use std::{io, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time,
};
use tokio_util::sync::CancellationToken;

use super::{JsonApi, Request};
use crate::{envelope::Envelope, error::ApiError};

/// How long the daemon backs off after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A source of client connections.
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Waits for the next connection.
    ///
    /// # Returns
    /// The stream and a printable peer address.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, String)>> + Send {
        async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            Ok((stream, addr.to_string()))
        }
    }
}

/// Accepts connections speaking the line protocol, one task per connection.
pub struct Daemon<L: Listener = TcpListener> {
    listener: L,
    api: JsonApi,
    tasks: JoinSet<io::Result<()>>,
}

impl<L: Listener> Daemon<L> {
    /// Creates a new `Daemon`.
    ///
    /// # Arguments
    /// * `listener` - A bound listener.
    /// * `api` - The api every request is served by.
    pub fn new(listener: L, api: JsonApi) -> Self {
        Self {
            listener,
            api,
            tasks: JoinSet::new(),
        }
    }

    /// Serves connections until `shutdown` is cancelled, then closes every open connection.
    ///
    /// A failed accept is logged and retried, it never stops the daemon.
    pub async fn run(mut self, shutdown: CancellationToken) -> io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    info!("client connected from {addr}");

                    let api = self.api.clone();
                    let (rx, tx) = tokio::io::split(stream);
                    self.tasks.spawn(async move { serve_connection(rx, tx, &api).await });
                }
                Some(res) = self.tasks.join_next() => {
                    match res {
                        Ok(Err(e)) => warn!("connection failed: {e}"),
                        Err(e) => warn!("connection task failed: {e}"),
                        Ok(Ok(())) => {}
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.tasks.shutdown().await;
        Ok(())
    }
}

/// Serves request lines from `rx` until it closes, answering one envelope line each.
///
/// # Arguments
/// * `rx` - The receiving end of the connection.
/// * `tx` - The sending end of the connection.
/// * `api` - The api serving the requests.
pub async fn serve_connection<R, W>(rx: R, mut tx: W, api: &JsonApi) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(rx).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!(call = format!("{:?}", request.call).as_str(); "request received");
                api.handle(request).await
            }
            Err(e) => Envelope::error(&ApiError::BadRequest(e.to_string())),
        };

        let mut out = envelope.to_json();
        out.push('\n');
        tx.write_all(out.as_bytes()).await?;
        tx.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::{
        io::{DuplexStream, duplex},
        sync::mpsc,
    };

    use super::*;
    use crate::registry::Registry;

    /// Hands out whatever the test pushes, then waits forever.
    struct Scripted {
        rx: mpsc::UnboundedReceiver<io::Result<DuplexStream>>,
    }

    impl Listener for Scripted {
        type Stream = DuplexStream;

        fn accept(&mut self) -> impl Future<Output = io::Result<(DuplexStream, String)>> + Send {
            async move {
                match self.rx.recv().await {
                    Some(res) => res.map(|stream| (stream, "scripted".to_string())),
                    None => std::future::pending().await,
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_daemon_survives_a_failed_accept() -> io::Result<()> {
        const BUF_SIZE: usize = 4096;

        let (tx, rx) = mpsc::unbounded_channel();
        let api = JsonApi::new(Arc::new(Registry::new(16)));
        let daemon = Daemon::new(Scripted { rx }, api);
        let shutdown = CancellationToken::new();
        let daemon_task = tokio::spawn(daemon.run(shutdown.clone()));

        let (client, server) = duplex(BUF_SIZE);
        tx.send(Err(io::Error::from(io::ErrorKind::ConnectionAborted)))
            .unwrap();
        tx.send(Ok(server)).unwrap();

        let (cl_rx, mut cl_tx) = tokio::io::split(client);
        let mut lines = BufReader::new(cl_rx).lines();

        cl_tx.write_all(b"{\"call\":\"info\"}\n").await?;
        let v: Value = serde_json::from_str(&lines.next_line().await?.unwrap()).unwrap();
        assert_eq!(v["status"]["code"], 200);

        shutdown.cancel();
        daemon_task.await.unwrap()
    }
}
