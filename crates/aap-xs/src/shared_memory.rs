//! Shared memory for port and extension buffers.
//!
//! Exactly one side of a connection creates each backing file; the other side only maps it.
//! The creator removes the backing when its last mapping is dropped.

use crate::error::{Result, XsError};
use crate::port::PortInfo;
use crate::protocol::BufferHandle;
use memmap2::{MmapMut, MmapOptions};
use std::cell::UnsafeCell;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a buffer allocation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationResult {
    Success,
    FailedLocalAlloc,
    FailedBackingCreate,
    FailedMap,
}

impl AllocationResult {
    pub fn is_success(self) -> bool {
        self == AllocationResult::Success
    }
}

impl fmt::Display for AllocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationResult::Success => write!(f, "success"),
            AllocationResult::FailedLocalAlloc => write!(f, "failed to allocate local buffer list"),
            AllocationResult::FailedBackingCreate => {
                write!(f, "failed to create or open shared memory backing")
            }
            AllocationResult::FailedMap => write!(f, "failed to map shared memory"),
        }
    }
}

/// Directory holding shared-memory backing files.
pub fn default_shm_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let shm = PathBuf::from("/dev/shm");
        if shm.is_dir() {
            return shm;
        }
    }
    std::env::temp_dir()
}

/// One mapped region.
///
/// Uses `UnsafeCell` because the region is written through shared references from both sides
/// of the connection. Callers keep a single writer per region at a time: the instance state
/// decides whether the control thread or the audio thread owns an extension buffer, and port
/// buffers are only touched inside `process`.
pub struct SharedBuffer {
    mmap: UnsafeCell<MmapMut>,
    name: Option<String>,
    path: Option<PathBuf>,
    len: usize,
    /// Creator releases the backing on drop.
    owns_memory: bool,
}

impl SharedBuffer {
    /// Creates a file-backed region named `name` under `directory`.
    pub fn create(
        directory: &Path,
        name: &str,
        size: usize,
    ) -> std::result::Result<Self, AllocationResult> {
        use std::io::Write as _;

        let path = directory.join(name);
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path).map_err(|e| {
            tracing::error!(path = %path.display(), "Failed to create shared memory file: {}", e);
            AllocationResult::FailedBackingCreate
        })?;

        let sized = file.set_len(size as u64).and_then(|_| (&file).flush());
        if let Err(e) = sized {
            tracing::error!(path = %path.display(), size, "Failed to set shared memory size: {}", e);
            let _ = std::fs::remove_file(&path);
            return Err(AllocationResult::FailedBackingCreate);
        }

        // SAFETY: the file was just created with owner-only permissions and is only resized by
        // its creator, so the mapping stays valid for the life of this buffer.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            tracing::error!(path = %path.display(), "Failed to map shared memory: {}", e);
            let _ = std::fs::remove_file(&path);
            AllocationResult::FailedMap
        })?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: Some(name.to_string()),
            path: Some(path),
            len: size,
            owns_memory: true,
        })
    }

    /// Maps a region created by the peer.
    pub fn open(
        directory: &Path,
        handle: &BufferHandle,
    ) -> std::result::Result<Self, AllocationResult> {
        let path = directory.join(&handle.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                tracing::error!(path = %path.display(), "Failed to open shared memory file: {}", e);
                AllocationResult::FailedBackingCreate
            })?;

        // SAFETY: the peer created the file and keeps it alive until it disposes its instance,
        // which happens after this side has unmapped.
        let mmap = unsafe { MmapOptions::new().len(handle.size).map_mut(&file) }.map_err(|e| {
            tracing::error!(path = %path.display(), "Failed to map shared memory: {}", e);
            AllocationResult::FailedMap
        })?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: Some(handle.name.clone()),
            path: Some(path),
            len: handle.size,
            owns_memory: false,
        })
    }

    /// Process-local region with no backing file.
    pub fn anonymous(size: usize) -> std::result::Result<Self, AllocationResult> {
        let mmap = MmapMut::map_anon(size.max(1)).map_err(|e| {
            tracing::error!(size, "Failed to allocate local buffer: {}", e);
            AllocationResult::FailedLocalAlloc
        })?;
        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: None,
            path: None,
            len: size,
            owns_memory: true,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn owns_memory(&self) -> bool {
        self.owns_memory
    }

    /// Whether the peer can map this buffer.
    pub fn is_shared(&self) -> bool {
        self.path.is_some()
    }

    pub fn handle(&self) -> Option<BufferHandle> {
        self.name.as_ref().map(|name| BufferHandle {
            name: name.clone(),
            size: self.len,
        })
    }

    /// Copies `data` in at `offset`. Returns `false` if it does not fit.
    pub fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()).filter(|end| *end <= self.len) else {
            return false;
        };
        // SAFETY: single writer per region, see the type documentation.
        let bytes = unsafe { self.as_mut_slice() };
        bytes[offset..end].copy_from_slice(data);
        true
    }

    /// Copies `dst.len()` bytes out from `offset`. Returns `false` if out of range.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(dst.len()).filter(|end| *end <= self.len) else {
            return false;
        };
        // SAFETY: reads race only with the peer's writes to regions it owns this cycle.
        let bytes = unsafe { self.as_slice() };
        dst.copy_from_slice(&bytes[offset..end]);
        true
    }

    /// # Safety
    ///
    /// No other reference obtained from [`as_mut_slice`](Self::as_mut_slice) may be alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        &(&(*self.mmap.get()))[..self.len]
    }

    /// # Safety
    ///
    /// The caller must be the only user of the region while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        &mut (&mut (*self.mmap.get()))[..self.len]
    }
}

// SAFETY: access goes through the single-writer protocol documented on the type. The mapped
// region itself is plain memory shared at the OS level.
unsafe impl Sync for SharedBuffer {}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owns_memory", &self.owns_memory)
            .finish()
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if self.owns_memory {
            if let Some(path) = &self.path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Hands out serialization buffers for extensions during dispatcher setup.
pub trait SharedMemoryRequester {
    fn request_extension_buffer(&mut self, uri: &str, size: usize) -> Result<Arc<SharedBuffer>>;

    /// Drops a buffer handed out by a setup that later failed.
    fn release_extension_buffer(&mut self, _uri: &str) {}
}

/// Which allocation protocol a store follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// Creates backing storage and publishes handles.
    Client,
    /// Maps handles published by the client.
    Service,
}

static NEXT_STORE_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Buffers of one plugin instance, keyed by port index or extension URI.
pub struct SharedBufferStore {
    role: StoreRole,
    directory: PathBuf,
    prefix: String,
    ports: Vec<Arc<SharedBuffer>>,
    extensions: Vec<(String, Arc<SharedBuffer>)>,
}

impl SharedBufferStore {
    pub fn new(role: StoreRole, prefix: &str) -> Self {
        Self::with_directory(role, prefix, default_shm_directory())
    }

    pub fn with_directory(role: StoreRole, prefix: &str, directory: impl Into<PathBuf>) -> Self {
        let serial = NEXT_STORE_SERIAL.fetch_add(1, Ordering::Relaxed);
        Self {
            role,
            directory: directory.into(),
            prefix: format!("{}{}_{}", prefix, std::process::id(), serial),
            ports: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Creates, maps and records one buffer per port. Replaces any previous port buffers.
    pub fn allocate_client_buffers(
        &mut self,
        ports: &[PortInfo],
        num_frames: usize,
        default_control_buffer_size: usize,
    ) -> AllocationResult {
        if self.role != StoreRole::Client {
            tracing::error!("allocate_client_buffers() called on a service store");
            return AllocationResult::FailedBackingCreate;
        }
        self.ports.clear();

        let mut buffers = Vec::new();
        if buffers.try_reserve_exact(ports.len()).is_err() {
            return AllocationResult::FailedLocalAlloc;
        }
        for (index, port) in ports.iter().enumerate() {
            let size = port.buffer_size(num_frames, default_control_buffer_size);
            let name = format!("{}_port{}", self.prefix, index);
            match SharedBuffer::create(&self.directory, &name, size) {
                Ok(buffer) => buffers.push(Arc::new(buffer)),
                // Already-created buffers are released as `buffers` drops.
                Err(result) => return result,
            }
        }
        tracing::debug!(ports = buffers.len(), num_frames, "Allocated client port buffers");
        self.ports = buffers;
        AllocationResult::Success
    }

    /// Maps the peer's port buffers, in port order. Replaces any previous port buffers.
    pub fn allocate_service_buffers(&mut self, handles: &[BufferHandle]) -> AllocationResult {
        if self.role != StoreRole::Service {
            tracing::error!("allocate_service_buffers() called on a client store");
            return AllocationResult::FailedMap;
        }
        self.ports.clear();

        let mut buffers = Vec::with_capacity(handles.len());
        for handle in handles {
            match SharedBuffer::open(&self.directory, handle) {
                Ok(buffer) => buffers.push(Arc::new(buffer)),
                Err(result) => return result,
            }
        }
        self.ports = buffers;
        AllocationResult::Success
    }

    /// Handles to publish to the peer, in port order.
    pub fn handles(&self) -> Vec<BufferHandle> {
        self.ports.iter().filter_map(|b| b.handle()).collect()
    }

    pub fn port(&self, index: usize) -> Option<&Arc<SharedBuffer>> {
        self.ports.get(index)
    }

    pub fn ports(&self) -> &[Arc<SharedBuffer>] {
        &self.ports
    }

    /// Maps an extension buffer created by the peer and records it under `uri`.
    pub fn add_extension_buffer(
        &mut self,
        uri: &str,
        handle: &BufferHandle,
    ) -> Result<Arc<SharedBuffer>> {
        let buffer = SharedBuffer::open(&self.directory, handle).map_err(XsError::Allocation)?;
        let buffer = Arc::new(buffer);
        self.extensions.retain(|(u, _)| u != uri);
        self.extensions.push((uri.to_string(), Arc::clone(&buffer)));
        Ok(buffer)
    }

    pub fn extension_buffer(&self, uri: &str) -> Option<&Arc<SharedBuffer>> {
        self.extensions
            .iter()
            .find_map(|(u, b)| (u == uri).then_some(b))
    }

    /// `(uri, handle)` for every shareable extension buffer.
    pub fn extension_handles(&self) -> Vec<(String, BufferHandle)> {
        self.extensions
            .iter()
            .filter_map(|(uri, b)| b.handle().map(|h| (uri.clone(), h)))
            .collect()
    }

    /// Unmaps everything; backing files this side created are released once unused.
    pub fn dispose(&mut self) {
        tracing::debug!(
            ports = self.ports.len(),
            extensions = self.extensions.len(),
            "Disposing shared buffers"
        );
        self.ports.clear();
        self.extensions.clear();
    }

    fn extension_buffer_name(&self, uri: &str) -> String {
        let slug: String = uri
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_ext_{}", self.prefix, slug)
    }
}

impl SharedMemoryRequester for SharedBufferStore {
    fn request_extension_buffer(&mut self, uri: &str, size: usize) -> Result<Arc<SharedBuffer>> {
        let buffer = match self.role {
            StoreRole::Client => {
                let name = self.extension_buffer_name(uri);
                Arc::new(
                    SharedBuffer::create(&self.directory, &name, size)
                        .map_err(XsError::Allocation)?,
                )
            }
            StoreRole::Service => match self.extension_buffer(uri) {
                Some(mapped) => return Ok(Arc::clone(mapped)),
                None => {
                    tracing::debug!(uri, "No peer extension buffer, using a local one");
                    Arc::new(SharedBuffer::anonymous(size).map_err(XsError::Allocation)?)
                }
            },
        };
        self.extensions.retain(|(u, _)| u != uri);
        self.extensions.push((uri.to_string(), Arc::clone(&buffer)));
        Ok(buffer)
    }

    fn release_extension_buffer(&mut self, uri: &str) {
        self.extensions.retain(|(u, _)| u != uri);
    }
}

impl Drop for SharedBufferStore {
    fn drop(&mut self) {
        self.dispose();
    }
}
