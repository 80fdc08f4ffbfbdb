//! Per-connection request/response loop.
//!
//! Each accepted connection is served by one task running [`run`]. The
//! client sends one filename per line and receives the file's contents
//! line by line; `disconnect` ends the session cleanly. Failures inside a
//! session never reach the accept loop or other sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task;
use tracing::{error, info, warn};

use crate::protocol;
use crate::resolver::{Resolved, RootSet};
use crate::state::AppState;

/// Consecutive request-read failures tolerated before the session is
/// forcibly ended. Prevents a session task from spinning forever when its
/// client is force-stopped.
pub const MAX_ERROR_COUNT: u32 = 5;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client sent the disconnect sentinel.
    Disconnected,
    /// The connection was lost or the failure threshold was reached.
    Aborted,
}

/// Serves one accepted connection to completion, then releases the
/// reader, the writer, and the socket, logging release failures instead
/// of propagating them.
pub async fn run(stream: TcpStream, peer: SocketAddr, state: AppState) -> Outcome {
    let peer = peer.to_string();
    info!(%peer, "established connection to client");

    let (reader, mut writer) = stream.into_split();
    let outcome = serve(reader, &mut writer, &peer, &state.roots).await;

    // Flushes and sends FIN; dropping both halves closes the socket.
    if let Err(e) = writer.shutdown().await {
        warn!(%peer, error = %e, "could not close connection socket");
    } else {
        info!(%peer, "closed connection socket");
    }
    outcome
}

/// The request/response state machine, generic over the transport so
/// tests can drive it with in-memory streams.
pub async fn serve<R, W>(reader: R, writer: &mut W, peer: &str, roots: &Arc<RootSet>) -> Outcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = BufReader::new(reader).lines();
    let mut failures: u32 = 0;

    info!(%peer, "waiting for a request");
    loop {
        if failures == MAX_ERROR_COUNT {
            warn!(%peer, "too many failures, ending communication");
            return Outcome::Aborted;
        }

        let request = match requests.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(%peer, "lost connection to client");
                return Outcome::Aborted;
            }
            Err(e) => {
                warn!(%peer, error = %e, "could not read request from network");
                failures += 1;
                continue;
            }
        };

        if request == protocol::DISCONNECT_CMD {
            info!(%peer, "client disconnected");
            return Outcome::Disconnected;
        }
        info!(%peer, file = %request, "file requested");

        let resolved = resolve(roots, request).await;
        let sent = match resolved {
            Resolved::NotFound => send_line(writer, protocol::NO_SUCH_FILE).await,
            Resolved::Found(path) => match File::open(&path).await {
                Ok(file) => stream_lines(writer, file, peer).await,
                Err(e) => {
                    // Resolved but unreadable; the client only ever learns
                    // "found" vs "not found".
                    warn!(%peer, path = %path.display(), error = %e, "could not open resolved file");
                    send_line(writer, protocol::NO_SUCH_FILE).await
                }
            },
        };
        if let Err(e) = sent {
            warn!(%peer, error = %e, "could not send response to client");
        }

        info!(%peer, "waiting for a new request");
    }
}

/// Lookups do synchronous filesystem I/O, so they run off the async
/// runtime.
async fn resolve(roots: &Arc<RootSet>, filename: String) -> Resolved {
    let roots = Arc::clone(roots);
    match task::spawn_blocking(move || roots.resolve(&filename)).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "lookup task failed");
            Resolved::NotFound
        }
    }
}

/// Streams the file to the client one line at a time, flushing each line
/// so the client can start consuming before the transfer completes. The
/// file handle is released on return regardless of outcome.
async fn stream_lines<W, F>(writer: &mut W, file: F, peer: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    F: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(file).lines();
    match lines.next_line().await {
        Ok(None) => {
            info!(%peer, "no content to send");
            send_line(writer, protocol::NO_CONTENT).await
        }
        Ok(Some(first)) => {
            info!(%peer, "sending contents");
            send_line(writer, &first).await?;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => send_line(writer, &line).await?,
                    Ok(None) => {
                        info!(%peer, "sending complete");
                        return Ok(());
                    }
                    Err(e) => {
                        // Content already sent stays sent; the trailing
                        // sentinel tells the client the rest is missing.
                        warn!(%peer, error = %e, "file read failed mid-stream");
                        return send_line(writer, protocol::FILE_READ_FAILED).await;
                    }
                }
            }
        }
        Err(e) => {
            warn!(%peer, error = %e, "file read failed");
            send_line(writer, protocol::FILE_READ_FAILED).await
        }
    }
}

async fn send_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt, ReadBuf};

    fn empty_roots() -> Arc<RootSet> {
        Arc::new(RootSet::load(Vec::new()))
    }

    async fn read_response(reader: &mut (impl AsyncRead + Unpin)) -> String {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn disconnect_sentinel_ends_session_cleanly() {
        let (client, server) = duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let roots = empty_roots();
        let session = tokio::spawn(async move {
            serve(server_read, &mut server_write, "test", &roots).await
        });

        client_write.write_all(b"disconnect\n").await.unwrap();
        drop(client_write);

        assert_eq!(session.await.unwrap(), Outcome::Disconnected);
        assert_eq!(read_response(&mut client_read).await, "");
    }

    #[tokio::test]
    async fn peer_eof_aborts_session() {
        let (client, server) = duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        drop(client);

        let roots = empty_roots();
        let outcome = serve(server_read, &mut server_write, "test", &roots).await;
        assert_eq!(outcome, Outcome::Aborted);
    }

    #[tokio::test]
    async fn missing_file_gets_sentinel_and_session_survives() {
        let (client, server) = duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let roots = empty_roots();
        let session = tokio::spawn(async move {
            serve(server_read, &mut server_write, "test", &roots).await
        });

        client_write.write_all(b"missing.txt\n").await.unwrap();
        client_write.write_all(b"also-missing.txt\n").await.unwrap();
        client_write.write_all(b"disconnect\n").await.unwrap();
        drop(client_write);

        assert_eq!(session.await.unwrap(), Outcome::Disconnected);
        let response = read_response(&mut client_read).await;
        let expected = format!("{0}\n{0}\n", protocol::NO_SUCH_FILE);
        assert_eq!(response, expected);
    }

    #[tokio::test]
    async fn streams_file_lines_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
        let roots = Arc::new(RootSet::load(vec![dir.path().to_path_buf()]));

        let (client, server) = duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let session = tokio::spawn(async move {
            serve(server_read, &mut server_write, "test", &roots).await
        });

        client_write.write_all(b"notes.txt\n").await.unwrap();
        client_write.write_all(b"disconnect\n").await.unwrap();
        drop(client_write);

        assert_eq!(session.await.unwrap(), Outcome::Disconnected);
        assert_eq!(read_response(&mut client_read).await, "alpha\nbeta\n");
    }

    #[tokio::test]
    async fn empty_file_gets_no_content_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let roots = Arc::new(RootSet::load(vec![dir.path().to_path_buf()]));

        let (client, server) = duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let session = tokio::spawn(async move {
            serve(server_read, &mut server_write, "test", &roots).await
        });

        client_write.write_all(b"empty.txt\n").await.unwrap();
        client_write.write_all(b"disconnect\n").await.unwrap();
        drop(client_write);

        assert_eq!(session.await.unwrap(), Outcome::Disconnected);
        let response = read_response(&mut client_read).await;
        assert_eq!(response, format!("{}\n", protocol::NO_CONTENT));
    }

    enum Step {
        Data(&'static [u8]),
        Fail,
    }

    /// A reader that follows a script of payloads and recoverable read
    /// errors, then reports EOF.
    struct ScriptedReader {
        steps: VecDeque<Step>,
    }

    impl ScriptedReader {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
            }
        }

        fn failures_then(failures: u32, data: &'static [u8]) -> Self {
            let mut steps: VecDeque<Step> = (0..failures).map(|_| Step::Fail).collect();
            steps.push_back(Step::Data(data));
            Self { steps }
        }
    }

    impl AsyncRead for ScriptedReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut().steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf.put_slice(bytes);
                    Poll::Ready(Ok(()))
                }
                Some(Step::Fail) => {
                    Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "boom")))
                }
                None => Poll::Ready(Ok(())),
            }
        }
    }

    #[tokio::test]
    async fn read_failures_below_threshold_do_not_abort() {
        let (_client, server) = duplex(64);
        let (_, mut server_write) = tokio::io::split(server);
        let reader = ScriptedReader::failures_then(MAX_ERROR_COUNT - 1, b"disconnect\n");

        let roots = empty_roots();
        let outcome = serve(reader, &mut server_write, "test", &roots).await;
        assert_eq!(outcome, Outcome::Disconnected);
    }

    #[tokio::test]
    async fn aborts_at_exactly_the_failure_threshold() {
        let (_client, server) = duplex(64);
        let (_, mut server_write) = tokio::io::split(server);
        // The pending disconnect line must never be reached.
        let reader = ScriptedReader::failures_then(MAX_ERROR_COUNT, b"disconnect\n");

        let roots = empty_roots();
        let outcome = serve(reader, &mut server_write, "test", &roots).await;
        assert_eq!(outcome, Outcome::Aborted);
    }

    #[tokio::test]
    async fn midstream_read_failure_sends_sentinel_after_partial_content() {
        let (client, server) = duplex(1024);
        let (_, mut server_write) = tokio::io::split(server);
        let (mut client_read, client_write) = tokio::io::split(client);
        drop(client_write);

        let file = ScriptedReader::new([Step::Data(b"alpha\n"), Step::Fail]);
        stream_lines(&mut server_write, file, "test").await.unwrap();
        drop(server_write);

        let response = read_response(&mut client_read).await;
        assert_eq!(response, format!("alpha\n{}\n", protocol::FILE_READ_FAILED));
    }
}
