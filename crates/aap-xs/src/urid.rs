//! URI to URID interning.
//!
//! Realtime messages refer to extensions by a one-byte URID. Entries are never removed, so a
//! URID stays valid for the life of the table.

use std::borrow::Cow;

/// URID reserved for "not mapped".
pub const UNMAPPED: u8 = 0;

/// Number of mappable URIDs (1..=254).
pub const MAX_URID_ENTRIES: usize = 254;

/// Append-only URI/URID table.
#[derive(Debug, Default, Clone)]
pub struct UridMapping {
    /// `uris[i]` holds the URI of URID `i + 1`. `None` marks a slot padded by `force_add`.
    uris: Vec<Option<Cow<'static, str>>>,
}

impl UridMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `uri`, returning its URID. Re-adding an existing URI returns the existing URID.
    ///
    /// Returns `None` when the table is full.
    pub fn try_add(&mut self, uri: impl Into<Cow<'static, str>>) -> Option<u8> {
        let uri = uri.into();
        let existing = self.get_urid(&uri);
        if existing != UNMAPPED {
            return Some(existing);
        }
        if self.uris.len() >= MAX_URID_ENTRIES {
            tracing::warn!(uri = %uri, "URID table is full");
            return None;
        }
        self.uris.push(Some(uri));
        Some(self.uris.len() as u8)
    }

    /// Returns the URID of `uri`, or [`UNMAPPED`].
    pub fn get_urid(&self, uri: &str) -> u8 {
        // Catalog URIs are usually the very same static strings.
        if let Some(i) = self.uris.iter().position(|u| {
            u.as_deref()
                .is_some_and(|s| std::ptr::eq(s.as_ptr(), uri.as_ptr()) && s.len() == uri.len())
        }) {
            return i as u8 + 1;
        }
        self.uris
            .iter()
            .position(|u| u.as_deref() == Some(uri))
            .map_or(UNMAPPED, |i| i as u8 + 1)
    }

    pub fn get_uri(&self, urid: u8) -> Option<&str> {
        if urid == UNMAPPED {
            return None;
        }
        self.uris.get(urid as usize - 1)?.as_deref()
    }

    /// Maps `uri` to a URID dictated by the peer, padding any unused slots before it.
    ///
    /// Returns `false` if `urid` is [`UNMAPPED`], out of range, or already bound to another URI.
    pub fn force_add(&mut self, urid: u8, uri: impl Into<Cow<'static, str>>) -> bool {
        let uri = uri.into();
        if urid == UNMAPPED || urid as usize > MAX_URID_ENTRIES {
            tracing::error!(urid, uri = %uri, "URID out of range");
            return false;
        }
        let index = urid as usize - 1;
        if self.uris.len() <= index {
            self.uris.resize(index + 1, None);
        }
        match &self.uris[index] {
            Some(existing) if existing.as_ref() != uri.as_ref() => {
                tracing::error!(urid, existing = %existing, uri = %uri, "URID already mapped");
                false
            }
            _ => {
                self.uris[index] = Some(uri);
                true
            }
        }
    }

    /// Number of slots in use, including padded ones.
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    /// Iterates `(urid, uri)` pairs in URID order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.uris
            .iter()
            .enumerate()
            .filter_map(|(i, u)| u.as_deref().map(|s| (i as u8 + 1, s)))
    }
}
