//! Server stdout capture.
//!
//! In quiet mode the server's stdout is piped and drained by a background
//! thread into a shared buffer, so a chatty server never blocks on a full pipe
//! and the text is available for failure diagnostics.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Where the server's stdout goes.
#[derive(Debug)]
pub struct OutputCapture {
    /// Shared buffer filled by the drain thread (exclusive access only).
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    inherited: bool,
}

impl OutputCapture {
    /// Output goes straight to the harness's own stdout; nothing is kept.
    pub fn inherited() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            reader: None,
            inherited: true,
        }
    }

    /// Drain `source` on a background thread until EOF.
    pub fn drain<R>(mut source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let reader = std::thread::Builder::new()
            .name("server-stdout".to_string())
            .spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match source.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut buf = sink.lock().unwrap_or_else(|e| e.into_inner());
                            buf.extend_from_slice(&chunk[..n]);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("Stopped reading server output: {}", e);
                            break;
                        }
                    }
                }
            });

        let reader = match reader {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Could not start output reader thread: {}", e);
                None
            }
        };

        Self {
            buffer,
            reader,
            inherited: false,
        }
    }

    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    /// Everything captured so far. Always empty when output is inherited.
    pub fn snapshot(&self) -> String {
        let buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Wait up to `timeout` for the drain thread to hit EOF, then snapshot.
    ///
    /// EOF arrives once the server (and anything it forked) closed stdout.
    pub fn collect(&mut self, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        if let Some(reader) = self.reader.take() {
            while !reader.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                self.reader = Some(reader);
            }
        }
        self.snapshot()
    }
}
