//! Persistent request/response transport to an ASR worker process.
//!
//! The worker is a long-lived child speaking a length-prefixed protocol
//! over its standard streams (or newline-delimited JSON for script
//! workers launched without framed IO). Many requests may be in flight
//! at once: each carries a transport-chosen id, responses are matched
//! back by that id, and completion order is unconstrained. Write order
//! is serialized through a single writer task so two concurrent
//! requests can never interleave their header/json/binary segments.

use crate::defaults;
use crate::error::{DictflowError, Result};
use crate::ipc::frame::{self, FrameDecoder};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};

/// How request/response bytes are laid out on the worker's pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// `u32 json_len · u32 binary_len · json · binary` requests,
    /// `u32 json_len · json` responses.
    Framed,
    /// One JSON object per line in both directions; binary payloads are
    /// the caller's responsibility (base64 inside the JSON body).
    JsonLines,
}

/// How to launch a worker child process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub wire_mode: WireMode,
}

type PendingMap = HashMap<String, oneshot::Sender<Result<Value>>>;

struct WriteJob {
    id: String,
    bytes: Vec<u8>,
}

struct TransportShared {
    pending: Mutex<PendingMap>,
    stderr_tail: Mutex<Vec<u8>>,
    exited: watch::Sender<Option<(Option<i32>, Option<i32>)>>,
}

impl TransportShared {
    /// Fails one in-flight request, if it is still waiting.
    fn fail_request(&self, id: &str, error: DictflowError) {
        let sender = self.pending.lock().unwrap().remove(id);
        if let Some(tx) = sender {
            let _ = tx.send(Err(error));
        }
    }

    /// Completes one in-flight request with the worker's response.
    fn complete_request(&self, id: &str, outcome: Result<Value>) {
        let sender = self.pending.lock().unwrap().remove(id);
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::debug!(id, "response for unknown or timed-out request"),
        }
    }

    /// Fails every outstanding request. The map is swapped out under the
    /// lock so late responses cannot race a half-cleared table.
    fn fail_all(&self, make_error: impl Fn() -> DictflowError) {
        let drained = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, tx) in drained {
            let _ = tx.send(Err(make_error()));
        }
    }
}

/// Transport to one worker process.
pub struct WorkerTransport {
    command: WorkerCommand,
    shared: Arc<TransportShared>,
    write_tx: Mutex<Option<mpsc::Sender<WriteJob>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited_rx: watch::Receiver<Option<(Option<i32>, Option<i32>)>>,
    next_id: AtomicU64,
}

impl WorkerTransport {
    pub fn new(command: WorkerCommand) -> Self {
        let (exited, exited_rx) = watch::channel(None);
        Self {
            command,
            shared: Arc::new(TransportShared {
                pending: Mutex::new(HashMap::new()),
                stderr_tail: Mutex::new(Vec::new()),
                exited,
            }),
            write_tx: Mutex::new(None),
            kill_tx: Mutex::new(None),
            exited_rx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns the worker child and wires its standard streams.
    /// Idempotent: a second call on a started transport does nothing.
    pub fn start(&self) -> Result<()> {
        if self.write_tx.lock().unwrap().is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DictflowError::WorkerSpawn {
                message: format!("{}: {}", self.command.program, e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| DictflowError::WorkerSpawn {
            message: "worker stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| DictflowError::WorkerSpawn {
            message: "worker stdout unavailable".to_string(),
        })?;
        let stderr = child.stderr.take();

        self.wire_streams(stdin, stdout, stderr);

        // Exit monitor: owns the child, reports (code, signal), and
        // escalates to SIGKILL when stop() gives up on the grace period.
        let shared = self.shared.clone();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        *self.kill_tx.lock().unwrap() = Some(kill_tx);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let (code, signal) = match status {
                Ok(status) => {
                    #[cfg(unix)]
                    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                    #[cfg(not(unix))]
                    let signal = None;
                    (status.code(), signal)
                }
                Err(e) => {
                    tracing::warn!("worker wait failed: {}", e);
                    (None, None)
                }
            };

            tracing::debug!(?code, ?signal, "worker exited");
            shared.fail_all(|| DictflowError::WorkerExited { code, signal });
            let _ = shared.exited.send(Some((code, signal)));
        });

        Ok(())
    }

    /// Wires an already-connected stream pair (and optional stderr).
    /// Split out from `start` so tests can drive the transport over
    /// in-memory pipes.
    fn wire_streams<W, R, E>(&self, stdin: W, stdout: R, stderr: Option<E>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel::<WriteJob>(32);
        *self.write_tx.lock().unwrap() = Some(write_tx);

        tokio::spawn(writer_loop(stdin, write_rx, self.shared.clone()));

        match self.command.wire_mode {
            WireMode::Framed => {
                tokio::spawn(framed_reader_loop(stdout, self.shared.clone()));
            }
            WireMode::JsonLines => {
                tokio::spawn(line_reader_loop(stdout, self.shared.clone()));
            }
        }

        if let Some(stderr) = stderr {
            tokio::spawn(stderr_tail_loop(stderr, self.shared.clone()));
        }
    }

    /// Sends one request and waits for its correlated response.
    ///
    /// `payload` must be a JSON object; the transport adds the `id`
    /// field. `binary` rides as the frame's binary tail (framed mode
    /// only). Errors and timeouts affect only this request.
    pub async fn request(
        &self,
        mut payload: Value,
        timeout: Duration,
        binary: Option<&[u8]>,
    ) -> Result<Value> {
        let write_tx = self
            .write_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DictflowError::IpcClosed {
                message: "transport not started".to_string(),
            })?;

        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("request")
            .to_string();

        let object = payload
            .as_object_mut()
            .ok_or_else(|| DictflowError::IpcProtocol {
                message: "request payload must be a JSON object".to_string(),
            })?;
        object.insert("id".to_string(), Value::String(id.clone()));

        let bytes = match self.command.wire_mode {
            WireMode::Framed => {
                let json = serde_json::to_vec(&payload).map_err(|e| DictflowError::IpcProtocol {
                    message: format!("request serialization failed: {}", e),
                })?;
                frame::encode_request(&json, binary.unwrap_or(&[]))
            }
            WireMode::JsonLines => {
                if binary.is_some() {
                    return Err(DictflowError::IpcProtocol {
                        message: "json-line transport cannot carry a binary tail".to_string(),
                    });
                }
                let mut line =
                    serde_json::to_vec(&payload).map_err(|e| DictflowError::IpcProtocol {
                        message: format!("request serialization failed: {}", e),
                    })?;
                line.push(b'\n');
                line
            }
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap()
            .insert(id.clone(), response_tx);

        if write_tx.send(WriteJob { id: id.clone(), bytes }).await.is_err() {
            self.shared.fail_request(
                &id,
                DictflowError::IpcClosed {
                    message: "worker write channel closed".to_string(),
                },
            );
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DictflowError::IpcClosed {
                message: "transport dropped the request".to_string(),
            }),
            Err(_) => {
                // Forget the request so a late response is discarded.
                self.shared.pending.lock().unwrap().remove(&id);
                Err(DictflowError::IpcTimeout {
                    action,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stops the worker: closes its stdin (workers exit on EOF), waits
    /// for the grace period, then kills.
    pub async fn stop(&self) {
        let had_writer = self.write_tx.lock().unwrap().take().is_some();
        if !had_writer {
            return;
        }

        let mut exited_rx = self.exited_rx.clone();
        let graceful = tokio::time::timeout(
            Duration::from_millis(defaults::WORKER_STOP_GRACE_MS),
            exited_rx.wait_for(|status| status.is_some()),
        )
        .await;

        if graceful.is_err()
            && let Some(kill_tx) = self.kill_tx.lock().unwrap().take()
        {
            tracing::debug!("worker did not exit within grace period, killing");
            let _ = kill_tx.send(());
        }
    }

    /// Last stderr output from the worker, for diagnostics.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.shared.stderr_tail.lock().unwrap()).into_owned()
    }

    /// Exit status, if the worker has terminated.
    pub fn exit_status(&self) -> Option<(Option<i32>, Option<i32>)> {
        *self.exited_rx.borrow()
    }
}

/// Single-writer task: the only place worker stdin is touched, so the
/// segments of concurrent requests can never interleave. A failed write
/// fails the request that produced it and nothing else.
async fn writer_loop<W: AsyncWrite + Unpin>(
    mut stdin: W,
    mut write_rx: mpsc::Receiver<WriteJob>,
    shared: Arc<TransportShared>,
) {
    while let Some(job) = write_rx.recv().await {
        let result = async {
            stdin.write_all(&job.bytes).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::debug!(id = %job.id, "worker write failed: {}", e);
            shared.fail_request(
                &job.id,
                DictflowError::IpcClosed {
                    message: format!("write failed: {}", e),
                },
            );
        }
    }
    // Channel closed: stdin drops here, signalling EOF to the worker.
}

/// Interprets one response JSON payload and completes its request.
fn dispatch_response(shared: &TransportShared, json: &[u8]) {
    let parsed: Value = match serde_json::from_slice(json) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("discarding unparseable worker response: {}", e);
            return;
        }
    };

    let Some(id) = parsed.get("id").and_then(Value::as_str).map(str::to_string) else {
        tracing::warn!("discarding worker response without id");
        return;
    };

    let outcome = if parsed.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    } else {
        let message = parsed
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("worker reported failure")
            .to_string();
        Err(DictflowError::Asr { message })
    };

    shared.complete_request(&id, outcome);
}

async fn framed_reader_loop<R: AsyncRead + Unpin>(mut stdout: R, shared: Arc<TransportShared>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(json)) => dispatch_response(&shared, &json),
                        Ok(None) => break,
                        Err(e) => {
                            // Length prefix is garbage: resync is
                            // impossible, abandon the stream.
                            tracing::error!("worker stream corrupted: {}", e);
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn line_reader_loop<R: AsyncRead + Unpin>(stdout: R, shared: Arc<TransportShared>) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            dispatch_response(&shared, trimmed.as_bytes());
        }
    }
}

async fn stderr_tail_loop<R: AsyncRead + Unpin>(mut stderr: R, shared: Arc<TransportShared>) {
    let mut buf = vec![0u8; 1024];
    while let Ok(n) = stderr.read(&mut buf).await {
        if n == 0 {
            break;
        }
        let mut tail = shared.stderr_tail.lock().unwrap();
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > defaults::STDERR_TAIL_BYTES {
            let excess = tail.len() - defaults::STDERR_TAIL_BYTES;
            tail.drain(..excess);
        }
    }
}
