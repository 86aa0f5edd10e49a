use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Output buffer that keeps at most `cap` bytes.
///
/// Reading continues after the cap is reached so the child never blocks on a
/// full pipe; the excess is counted and discarded.
#[derive(Debug)]
pub struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    total: usize,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap.min(READ_CHUNK)),
            cap,
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = self.cap.saturating_sub(self.data.len());
        if room > 0 {
            let take = room.min(chunk.len());
            self.data.extend_from_slice(&chunk[..take]);
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.total > self.cap
    }

    /// Bytes seen, including discarded ones
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Lossy UTF-8 text plus the truncation marker when over the cap
    pub fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.is_truncated() {
            text.push_str(&truncation_marker(self.cap));
        }
        text
    }
}

pub fn truncation_marker(cap: usize) -> String {
    format!("\n... [output truncated at {} bytes]", cap)
}

pub type SharedBuffer = Arc<Mutex<CappedBuffer>>;

pub fn shared(cap: usize) -> SharedBuffer {
    Arc::new(Mutex::new(CappedBuffer::new(cap)))
}

/// Read a stream to EOF into a shared buffer
pub async fn drain<R>(mut reader: R, buffer: SharedBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = match buffer.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.push(&chunk[..n]);
            }
        }
    }
}

/// Snapshot a shared buffer as (text, truncated)
pub fn snapshot(buffer: &SharedBuffer) -> (String, bool) {
    let guard = match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    (guard.render(), guard.is_truncated())
}
