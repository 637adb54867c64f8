//! The plugin ABI as seen by the service side.

use aap_xs::{PluginExtensions, PortInfo, SharedBuffer};
use std::sync::Arc;

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Port buffers handed to a plugin, in port order.
///
/// The buffers are shared with the client. They are only touched from `prepare` and `process`,
/// while the client waits for the call to return.
#[derive(Debug, Clone, Default)]
pub struct PluginBuffer {
    num_frames: usize,
    buffers: Vec<Arc<SharedBuffer>>,
}

impl PluginBuffer {
    pub fn new(num_frames: usize, buffers: Vec<Arc<SharedBuffer>>) -> Self {
        Self {
            num_frames,
            buffers,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, port: usize) -> Option<&Arc<SharedBuffer>> {
        self.buffers.get(port)
    }

    /// Copies samples of an audio port into `dst`. Returns the number of samples copied.
    pub fn read_audio(&self, port: usize, dst: &mut [f32]) -> usize {
        self.with_port(port, |bytes| {
            let mut copied = 0;
            for (sample, chunk) in dst.iter_mut().zip(bytes.chunks_exact(SAMPLE_SIZE)) {
                *sample = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                copied += 1;
            }
            copied
        })
        .unwrap_or(0)
    }

    /// Copies `src` into an audio port. Returns the number of samples written.
    pub fn write_audio(&self, port: usize, src: &[f32]) -> usize {
        self.with_port_mut(port, |bytes| {
            let mut written = 0;
            for (chunk, sample) in bytes.chunks_exact_mut(SAMPLE_SIZE).zip(src) {
                chunk.copy_from_slice(&sample.to_ne_bytes());
                written += 1;
            }
            written
        })
        .unwrap_or(0)
    }

    /// Runs `f` over the raw bytes of one port.
    pub fn with_port<R>(&self, port: usize, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let buffer = self.buffers.get(port)?;
        // SAFETY: port buffers are only accessed by the side currently running `process`.
        Some(f(unsafe { buffer.as_slice() }))
    }

    /// Runs `f` over the raw bytes of one port, mutably.
    pub fn with_port_mut<R>(&self, port: usize, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let buffer = self.buffers.get(port)?;
        // SAFETY: as in `with_port`; `f` holds the only reference.
        Some(f(unsafe { buffer.as_mut_slice() }))
    }
}

/// A plugin hosted by a [`LocalPluginInstance`](crate::LocalPluginInstance).
///
/// Extensions are exposed through the [`PluginExtensions`] supertrait; an extension the plugin
/// does not implement is answered with default values.
pub trait AudioPlugin: PluginExtensions + Send {
    /// Port layout. Must match the layout the client instantiates with.
    fn ports(&self) -> Vec<PortInfo>;

    fn prepare(&mut self, buffer: &PluginBuffer) {
        let _ = buffer;
    }

    fn activate(&mut self) {}

    fn process(&mut self, buffer: &PluginBuffer, frame_count: usize, timeout_ns: u64);

    fn deactivate(&mut self) {}
}

/// Creates plugins by id on the service side.
pub trait PluginFactory: Send + Sync {
    fn create(&self, plugin_id: &str, sample_rate: u32) -> Option<Box<dyn AudioPlugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(&str, u32) -> Option<Box<dyn AudioPlugin>> + Send + Sync,
{
    fn create(&self, plugin_id: &str, sample_rate: u32) -> Option<Box<dyn AudioPlugin>> {
        self(plugin_id, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(sizes: &[usize]) -> PluginBuffer {
        let buffers = sizes
            .iter()
            .map(|size| Arc::new(SharedBuffer::anonymous(*size).unwrap()))
            .collect();
        PluginBuffer::new(4, buffers)
    }

    #[test]
    fn test_audio_copy_is_clamped_to_port() {
        let buffer = buffer_with(&[16, 8]);
        assert_eq!(buffer.write_audio(0, &[0.5, -0.25, 1.0, 0.0, 9.0]), 4);

        let mut out = [0.0f32; 6];
        assert_eq!(buffer.read_audio(0, &mut out), 4);
        assert_eq!(&out[..4], &[0.5, -0.25, 1.0, 0.0]);

        assert_eq!(buffer.read_audio(1, &mut out), 2);
        assert_eq!(buffer.read_audio(2, &mut out), 0);
        assert_eq!(buffer.num_frames(), 4);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_factory_from_closure() {
        struct Silence;
        impl PluginExtensions for Silence {}
        impl AudioPlugin for Silence {
            fn ports(&self) -> Vec<PortInfo> {
                Vec::new()
            }
            fn process(&mut self, _: &PluginBuffer, _: usize, _: u64) {}
        }

        let factory = |id: &str, _rate: u32| -> Option<Box<dyn AudioPlugin>> {
            (id == "org.example.silence").then(|| Box::new(Silence) as Box<dyn AudioPlugin>)
        };
        assert!(factory.create("org.example.silence", 48000).is_some());
        assert!(factory.create("org.example.other", 48000).is_none());
    }
}
