//! Per-extension serialization buffer.

use crate::shared_memory::SharedBuffer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity buffer one extension reads and writes its payloads through.
///
/// A request writes its payload here and the reply overwrites it. At most one call per
/// extension per instance is in flight: the initiator's call lock guarantees it on the client
/// side, and the service only touches it while handling that one call.
#[derive(Debug)]
pub struct SerializationContext {
    buffer: Arc<SharedBuffer>,
    data_size: AtomicUsize,
}

impl SerializationContext {
    pub fn new(buffer: Arc<SharedBuffer>) -> Self {
        Self {
            buffer,
            data_size: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the peer maps the same memory.
    pub fn is_shared(&self) -> bool {
        self.buffer.is_shared()
    }

    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    /// Size of the payload currently held.
    pub fn data_size(&self) -> usize {
        self.data_size.load(Ordering::Acquire)
    }

    pub fn set_data_size(&self, size: usize) {
        self.data_size.store(size.min(self.capacity()), Ordering::Release);
    }

    pub fn write_at(&self, offset: usize, data: &[u8]) -> bool {
        self.buffer.write(offset, data)
    }

    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> bool {
        self.buffer.read(offset, dst)
    }

    pub fn write_i32(&self, offset: usize, value: i32) -> bool {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        let mut bytes = [0u8; 4];
        self.read_at(offset, &mut bytes)
            .then(|| i32::from_le_bytes(bytes))
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> bool {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let mut bytes = [0u8; 4];
        self.read_at(offset, &mut bytes)
            .then(|| u32::from_le_bytes(bytes))
    }

    pub fn write_f64(&self, offset: usize, value: f64) -> bool {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn read_f64(&self, offset: usize) -> Option<f64> {
        let mut bytes = [0u8; 8];
        self.read_at(offset, &mut bytes)
            .then(|| f64::from_le_bytes(bytes))
    }

    /// Writes `value` into a NUL-padded field of `field_len` bytes, truncating if needed.
    pub fn write_str(&self, offset: usize, field_len: usize, value: &str) -> bool {
        if offset
            .checked_add(field_len)
            .map_or(true, |end| end > self.capacity())
        {
            return false;
        }
        let mut bytes = value.as_bytes();
        if bytes.len() >= field_len {
            // Keep room for the terminator and cut on a char boundary.
            let mut cut = field_len.saturating_sub(1);
            while cut > 0 && !value.is_char_boundary(cut) {
                cut -= 1;
            }
            bytes = &bytes[..cut];
        }
        self.with_data_mut(|data| {
            let field = &mut data[offset..offset + field_len];
            field[..bytes.len()].copy_from_slice(bytes);
            field[bytes.len()..].fill(0);
        });
        true
    }

    /// Reads a NUL-padded field. Invalid UTF-8 is replaced.
    pub fn read_str(&self, offset: usize, field_len: usize) -> Option<String> {
        if offset.checked_add(field_len)? > self.capacity() {
            return None;
        }
        Some(self.with_data(|data| {
            let field = &data[offset..offset + field_len];
            let end = field.iter().position(|b| *b == 0).unwrap_or(field_len);
            String::from_utf8_lossy(&field[..end]).into_owned()
        }))
    }

    /// Replaces the payload with `data`. Returns `false` if it does not fit.
    pub fn copy_from(&self, data: &[u8]) -> bool {
        if !self.write_at(0, data) {
            return false;
        }
        self.set_data_size(data.len());
        true
    }

    /// Copies out the current payload.
    pub fn to_vec(&self) -> Vec<u8> {
        let size = self.data_size();
        self.with_data(|data| data[..size].to_vec())
    }

    /// Runs `f` over the whole buffer.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        // SAFETY: one call per extension at a time, see the type documentation.
        f(unsafe { self.buffer.as_slice() })
    }

    /// Runs `f` over the whole buffer, mutably.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        // SAFETY: one call per extension at a time, see the type documentation.
        f(unsafe { self.buffer.as_mut_slice() })
    }
}
