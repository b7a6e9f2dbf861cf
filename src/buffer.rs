//! Shared frame buffer pool.
//!
//! The acquisition loop borrows empty buffers from a [`FrameBufferPool`],
//! fills them with a header plus image data and hands them back with
//! [`FrameBufferPool::notify_frame_ready`]. The pool is an external
//! collaborator as far as the camera controller is concerned: the controller
//! never frees buffers, it only borrows them for the duration of a fill.
//!
//! [`SharedBufferPool`] is the in-process implementation used by the daemon
//! and the tests. A [`SharedBuffer`] that is dropped without being notified
//! (for example after an image wait timeout) returns to the free list, so a
//! dropped frame does not shrink the pool.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// A buffer borrowed from a pool.
pub struct SharedBuffer {
    id: usize,
    data: Arc<Mutex<Vec<u8>>>,
    free_list: Option<Arc<Mutex<VecDeque<usize>>>>,
}

impl SharedBuffer {
    /// Create a standalone buffer with no backing free list.
    pub fn new(id: usize, data: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            id,
            data,
            free_list: None,
        }
    }

    fn with_free_list(
        id: usize,
        data: Arc<Mutex<Vec<u8>>>,
        free_list: Arc<Mutex<VecDeque<usize>>>,
    ) -> Self {
        Self {
            id,
            data,
            free_list: Some(free_list),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap()
    }

    /// Consume the buffer without returning it to the free list.
    ///
    /// Used by pools when the buffer moves to the ready queue.
    pub fn dismiss(mut self) -> usize {
        self.free_list = None;
        self.id
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if let Some(free_list) = self.free_list.take() {
            free_list.lock().unwrap().push_back(self.id);
        }
    }
}

/// A frame that has been filled and handed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyFrame {
    pub buffer_id: usize,
    pub frame_number: u32,
}

/// External pool of shared frame buffers.
pub trait FrameBufferPool: Send + Sync {
    /// Borrow an empty buffer, or `None` when the pool is exhausted.
    fn get_empty_buffer(&self) -> Option<SharedBuffer>;

    /// Mark a filled buffer as ready for the downstream pipeline.
    fn notify_frame_ready(&self, buffer: SharedBuffer, frame_number: u32);
}

/// In-process buffer pool with a free list and a ready-frame channel.
pub struct SharedBufferPool {
    buffers: Vec<Arc<Mutex<Vec<u8>>>>,
    free_list: Arc<Mutex<VecDeque<usize>>>,
    ready_tx: Mutex<Sender<ReadyFrame>>,
}

impl SharedBufferPool {
    /// Create a pool of `count` buffers of `size` bytes each.
    ///
    /// Returns the pool and the receiving end of the ready-frame queue.
    pub fn new(count: usize, size: usize) -> (Arc<Self>, Receiver<ReadyFrame>) {
        let buffers = (0..count)
            .map(|_| Arc::new(Mutex::new(vec![0u8; size])))
            .collect();
        let free_list = Arc::new(Mutex::new((0..count).collect::<VecDeque<_>>()));
        let (ready_tx, ready_rx) = channel();
        let pool = Arc::new(Self {
            buffers,
            free_list,
            ready_tx: Mutex::new(ready_tx),
        });
        (pool, ready_rx)
    }

    /// Access a buffer's backing storage by id.
    pub fn buffer(&self, buffer_id: usize) -> Arc<Mutex<Vec<u8>>> {
        self.buffers[buffer_id].clone()
    }

    /// Return a consumed buffer to the free list.
    pub fn release(&self, buffer_id: usize) {
        self.free_list.lock().unwrap().push_back(buffer_id);
    }

    pub fn free_count(&self) -> usize {
        self.free_list.lock().unwrap().len()
    }
}

impl FrameBufferPool for SharedBufferPool {
    fn get_empty_buffer(&self) -> Option<SharedBuffer> {
        let id = self.free_list.lock().unwrap().pop_front()?;
        Some(SharedBuffer::with_free_list(
            id,
            self.buffers[id].clone(),
            self.free_list.clone(),
        ))
    }

    fn notify_frame_ready(&self, buffer: SharedBuffer, frame_number: u32) {
        let buffer_id = buffer.dismiss();
        let notify = self.ready_tx.lock().unwrap().send(ReadyFrame {
            buffer_id,
            frame_number,
        });
        if notify.is_err() {
            // Downstream consumer has gone away: recycle the buffer so the
            // acquisition loop can keep running.
            log::warn!("Ready frame {frame_number} dropped: no consumer attached");
            self.release(buffer_id);
        }
    }
}
