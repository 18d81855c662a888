use crate::core::errors::PoisonedLockExt;
use std::sync::Mutex;

/// Recycles page-sized buffers between evicted cache entries and page reads.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_size: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buffer_size,
            max_size,
        }
    }

    pub fn get(&self) -> Vec<u8> {
        let mut buffers = self.buffers.lock().recover_poison();
        buffers.pop().unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }

        let mut buffers = self.buffers.lock().recover_poison();
        if buffers.len() < self.max_size {
            buf.fill(0);
            buffers.push(buf);
        }
    }

    /// Get the current number of buffers in the pool
    pub fn len(&self) -> usize {
        self.buffers.lock().recover_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
