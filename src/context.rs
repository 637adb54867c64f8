//! Per-application host context.

use crate::error::Result;
use aap_core::HostConfig;
use aap_xs::shared_memory::default_shm_directory;
use aap_xs::{ExtensionRegistry, UridMapping, XsError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Everything instances of one application share: configuration, the frozen extension
/// registry, and instance id allocation.
///
/// Owned by the embedder and passed to every instance constructor. Client and service contexts
/// that talk to each other must use the same shared-memory directory.
#[derive(Debug)]
pub struct HostContext {
    config: HostConfig,
    registry: Arc<ExtensionRegistry>,
    shm_directory: PathBuf,
    next_instance_id: AtomicI32,
}

impl HostContext {
    /// Context with every standard extension registered.
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_registry(config, ExtensionRegistry::standard()?)
    }

    pub fn with_registry(config: HostConfig, registry: ExtensionRegistry) -> Result<Self> {
        config.validate()?;
        if !registry.is_frozen() {
            return Err(XsError::ProtocolError("extension registry must be frozen".into()).into());
        }
        Ok(Self {
            config,
            registry: Arc::new(registry),
            shm_directory: default_shm_directory(),
            next_instance_id: AtomicI32::new(1),
        })
    }

    /// Where shared-memory backing files live.
    pub fn with_shm_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.shm_directory = directory.into();
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn urid_mapping(&self) -> &UridMapping {
        self.registry.urid_mapping()
    }

    pub fn shm_directory(&self) -> &Path {
        &self.shm_directory
    }

    pub fn allocate_instance_id(&self) -> i32 {
        self.next_instance_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aap_xs::extensions::presets::PRESETS_EXTENSION_URI;

    #[test]
    fn test_standard_context() {
        let context = HostContext::new(HostConfig::default()).unwrap();
        assert_eq!(context.registry().len(), 6);
        assert_ne!(context.urid_mapping().get_urid(PRESETS_EXTENSION_URI), 0);

        let first = context.allocate_instance_id();
        assert_eq!(context.allocate_instance_id(), first + 1);
    }

    #[test]
    fn test_rejects_invalid_config_and_open_registry() {
        let config = HostConfig {
            max_pending_callbacks: 0,
            ..Default::default()
        };
        assert!(HostContext::new(config).is_err());

        match HostContext::with_registry(HostConfig::default(), ExtensionRegistry::new()) {
            Err(crate::Error::Xs(XsError::ProtocolError(_))) => {}
            _ => panic!("Expected ProtocolError"),
        }
    }
}
