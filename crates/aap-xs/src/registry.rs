//! Extension definitions and the process-wide registry.
//!
//! The registry is filled during setup, then frozen. After [`ExtensionRegistry::freeze`] it is
//! only read, so lookups from the audio thread need no locking.

use crate::error::{Result, XsError};
use crate::extensions::{gui, midi, parameters, presets, state, urid};
use crate::urid::{UridMapping, UNMAPPED};

/// The closed set of standard extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    State,
    Presets,
    Parameters,
    Midi,
    Gui,
    Urid,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 6] = [
        ExtensionKind::State,
        ExtensionKind::Presets,
        ExtensionKind::Parameters,
        ExtensionKind::Midi,
        ExtensionKind::Gui,
        ExtensionKind::Urid,
    ];

    pub const fn uri(self) -> &'static str {
        match self {
            ExtensionKind::State => state::STATE_EXTENSION_URI,
            ExtensionKind::Presets => presets::PRESETS_EXTENSION_URI,
            ExtensionKind::Parameters => parameters::PARAMETERS_EXTENSION_URI,
            ExtensionKind::Midi => midi::MIDI_EXTENSION_URI,
            ExtensionKind::Gui => gui::GUI_EXTENSION_URI,
            ExtensionKind::Urid => urid::URID_EXTENSION_URI,
        }
    }

    /// Serialization buffer capacity the extension's payloads need.
    pub const fn data_capacity(self) -> usize {
        match self {
            ExtensionKind::State => state::STATE_SHARED_MEMORY_SIZE,
            ExtensionKind::Presets => presets::PRESETS_SHARED_MEMORY_SIZE,
            ExtensionKind::Parameters => parameters::PARAMETERS_SHARED_MEMORY_SIZE,
            ExtensionKind::Midi => midi::MIDI_SHARED_MEMORY_SIZE,
            ExtensionKind::Gui => gui::GUI_SHARED_MEMORY_SIZE,
            ExtensionKind::Urid => urid::URID_SHARED_MEMORY_SIZE,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uri() == uri)
    }
}

/// One registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionDefinition {
    pub kind: ExtensionKind,
    pub uri: &'static str,
    /// Assigned when the definition is added to a registry.
    pub urid: u8,
    pub data_capacity: usize,
}

impl ExtensionDefinition {
    pub const fn new(kind: ExtensionKind) -> Self {
        Self {
            kind,
            uri: kind.uri(),
            urid: UNMAPPED,
            data_capacity: kind.data_capacity(),
        }
    }

    pub const fn with_data_capacity(mut self, data_capacity: usize) -> Self {
        self.data_capacity = data_capacity;
        self
    }
}

/// Catalog of extension definitions, keyed by URI and URID.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    definitions: Vec<ExtensionDefinition>,
    urids: UridMapping,
    frozen: bool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every standard extension, already frozen.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        for kind in ExtensionKind::ALL {
            registry.add(ExtensionDefinition::new(kind))?;
        }
        registry.freeze();
        Ok(registry)
    }

    /// Copies `definition` in, interning its URI. Returns the assigned URID.
    pub fn add(&mut self, mut definition: ExtensionDefinition) -> Result<u8> {
        if self.frozen {
            tracing::error!(
                uri = definition.uri,
                "Extension registry is already frozen, definition ignored"
            );
            return Err(XsError::RegistryFrozen(definition.uri.to_string()));
        }
        let urid = self
            .urids
            .try_add(definition.uri)
            .ok_or_else(|| XsError::UridTableFull(definition.uri.to_string()))?;
        definition.urid = urid;
        match self.definitions.iter_mut().find(|d| d.urid == urid) {
            Some(existing) => *existing = definition,
            None => self.definitions.push(definition),
        }
        Ok(urid)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get_by_uri(&self, uri: &str) -> Option<&ExtensionDefinition> {
        self.get_by_urid(self.urids.get_urid(uri))
    }

    pub fn get_by_urid(&self, urid: u8) -> Option<&ExtensionDefinition> {
        if urid == UNMAPPED {
            return None;
        }
        self.definitions.iter().find(|d| d.urid == urid)
    }

    pub fn urid_mapping(&self) -> &UridMapping {
        &self.urids
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
