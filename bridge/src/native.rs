//! Native transport: one long-lived duplex connection to the companion
//! process, framed the way browsers frame native messaging (32-bit length
//! prefix followed by UTF-8 JSON).

use native_messaging::host::{self, NmError};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::envelope::{NativeCall, NativeFrame, NativeReply};
use crate::error::BridgeError;

/// The controller's view of the native peer.
pub trait NativeChannel: Send + Sync {
    /// Sends one call and waits at most `timeout` for its reply payload.
    fn request(&self, call: &NativeCall, timeout: Duration) -> Result<Value, BridgeError>;

    fn is_connected(&self) -> bool;

    fn shutdown(&self) {}
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Sender<NativeReply>>>,
    connected: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Sender<NativeReply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the peer gone and fails every waiting caller.
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::warn!("Native peer disconnected");
        }
        self.pending().clear();
    }
}

/// The peer's stdin. Remembers whether a write failed because the pipe is
/// gone, as opposed to failing for this frame only.
struct PeerWriter {
    inner: Box<dyn Write + Send>,
    hung_up: bool,
}

impl PeerWriter {
    fn track<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ) {
                self.hung_up = true;
            }
        }
        result
    }
}

impl Write for PeerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf);
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.track(result)
    }
}

pub struct NativePort {
    shared: Arc<Shared>,
    writer: Mutex<PeerWriter>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
}

impl NativePort {
    /// Launches the companion and connects to its stdio.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, BridgeError> {
        log::info!("Starting native peer: {} {:?}", program, args);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "peer stdin missing"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "peer stdout missing"))?;

        let port = Self::from_streams(stdout, stdin);
        *port.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        Ok(port)
    }

    /// Connects over an arbitrary stream pair. Replies are read on a
    /// dedicated thread until the reader reaches EOF.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let reader_shared = Arc::clone(&shared);
        thread::spawn(move || read_replies(reader, reader_shared));

        NativePort {
            shared,
            writer: Mutex::new(PeerWriter {
                inner: Box::new(writer),
                hung_up: false,
            }),
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// `ChannelUnavailable` only when the peer hung up. Any other failure
    /// belongs to this frame alone; a dead peer is still noticed by the reader.
    fn write_frame(&self, frame: &NativeFrame) -> Result<(), BridgeError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let result = host::send_json(&mut *writer, frame);
        match result {
            Ok(_) => Ok(()),
            Err(NmError::Disconnected) => Err(BridgeError::ChannelUnavailable),
            Err(_) if writer.hung_up => Err(BridgeError::ChannelUnavailable),
            Err(e) => Err(BridgeError::NativeMessaging(e.to_string())),
        }
    }
}

fn read_replies<R: Read>(mut reader: R, shared: Arc<Shared>) {
    loop {
        match host::decode_message_opt(&mut reader, host::MAX_FROM_BROWSER) {
            Ok(Some(json_str)) => match serde_json::from_str::<NativeReply>(&json_str) {
                Ok(reply) => {
                    let waiter = shared.pending().remove(&reply.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => log::warn!("Dropping reply {} with no waiting request", reply.id),
                    }
                }
                Err(e) => log::error!("Malformed reply from native peer: {}", e),
            },
            Ok(None) | Err(NmError::Disconnected) => break,
            Err(e) => {
                log::error!("Error reading from native peer: {}", e);
                break;
            }
        }
    }
    shared.disconnect();
}

impl NativeChannel for NativePort {
    fn request(&self, call: &NativeCall, timeout: Duration) -> Result<Value, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::ChannelUnavailable);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.shared.pending().insert(id, tx);
        if !self.is_connected() {
            self.shared.pending().remove(&id);
            return Err(BridgeError::ChannelUnavailable);
        }

        let frame = NativeFrame {
            id,
            envelope: call.to_envelope(),
        };
        log::debug!("-> native #{} {}", id, frame.envelope.kind);
        if let Err(e) = self.write_frame(&frame) {
            log::error!("Failed to write to native peer: {}", e);
            match e {
                BridgeError::ChannelUnavailable => self.shared.disconnect(),
                _ => {
                    self.shared.pending().remove(&id);
                }
            }
            return Err(e);
        }

        let reply = match rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                self.shared.pending().remove(&id);
                return Err(BridgeError::Timeout(timeout.as_millis()));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(BridgeError::ChannelUnavailable),
        };
        log::debug!("<- native #{} success={}", id, reply.success);

        if reply.success {
            Ok(reply.payload.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::PeerError(
                reply.error.unwrap_or_else(|| "unspecified failure".to_string()),
            ))
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shared.disconnect();
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut child) = child.take() {
            log::info!("Stopping native peer");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        self.shutdown();
    }
}
