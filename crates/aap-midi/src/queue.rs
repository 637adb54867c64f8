//! Hand-off of UMP input from non-realtime threads to the audio thread.

use aap_core::NanoSleepMutex;

use crate::buffer::{MidiBufferHeader, MidiBufferViewMut};
use crate::merge::{merge_ump_sequences, MergeResult};
use crate::ump::{self, JR_TICKS_PER_SECOND};

const NANOS_PER_SECOND: u64 = 1_000_000_000;
/// One JR tick is exactly 32 us.
const NANOS_PER_JR_TICK: u64 = NANOS_PER_SECOND / JR_TICKS_PER_SECOND as u64;

/// Converts a nanosecond offset into JR ticks.
#[inline]
pub fn nanos_to_jr_ticks(nanos: u64) -> u64 {
    nanos / NANOS_PER_JR_TICK
}

struct PendingEvents {
    data: Box<[u8]>,
    len: usize,
    /// Tick offset of the last event, so timestamps are written as deltas.
    last_ticks: u64,
}

/// Timestamped UMP input queue.
///
/// Producers append under [`NanoSleepMutex::lock`]; the realtime consumer only ever uses
/// `try_lock` and sees an empty queue when that fails.
pub struct MidiEventQueue {
    inner: NanoSleepMutex<PendingEvents>,
}

impl MidiEventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NanoSleepMutex::new(PendingEvents {
                data: vec![0u8; capacity].into_boxed_slice(),
                len: 0,
                last_ticks: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `ump` at `timestamp_nanos` from the start of the current cycle.
    ///
    /// Returns `false` (appending nothing) when the queue is full.
    pub fn push(&self, ump: &[u8], timestamp_nanos: u64) -> bool {
        let mut pending = self.inner.lock();
        let ticks = nanos_to_jr_ticks(timestamp_nanos);
        let mut delta = ticks.saturating_sub(pending.last_ticks);

        let chunks = delta.div_ceil(JR_TICKS_PER_SECOND as u64) as usize;
        if pending.len + chunks * 4 + ump.len() > pending.data.len() {
            tracing::warn!(
                capacity = pending.data.len(),
                "MIDI input queue full, event dropped"
            );
            return false;
        }

        let mut pos = pending.len;
        while delta > 0 {
            let chunk = delta.min(JR_TICKS_PER_SECOND as u64);
            ump::write_word(&mut pending.data, pos, ump::jr_timestamp(0, chunk as u16));
            pos += 4;
            delta -= chunk;
        }
        pending.data[pos..pos + ump.len()].copy_from_slice(ump);
        pending.len = pos + ump.len();
        pending.last_ticks = pending.last_ticks.max(ticks);
        true
    }

    /// Appends `ump` without a timestamp.
    pub fn push_untimed(&self, ump: &[u8]) -> bool {
        let mut pending = self.inner.lock();
        let pos = pending.len;
        if pos + ump.len() > pending.data.len() {
            tracing::warn!(capacity = pending.data.len(), "UMP queue full, event dropped");
            return false;
        }
        pending.data[pos..pos + ump.len()].copy_from_slice(ump);
        pending.len = pos + ump.len();
        true
    }

    /// Copies the queued events into the MIDI port buffer `dst` and resets the queue.
    ///
    /// Realtime-safe. When the lock is contended the port receives an empty sequence.
    pub fn drain_into(&self, dst: &mut [u8]) -> usize {
        let mut midi = MidiBufferViewMut::new(dst);
        let Some(mut pending) = self.inner.try_lock() else {
            midi.set_header(MidiBufferHeader::default());
            return 0;
        };
        let len = pending.len.min(midi.capacity());
        midi.body_mut()[..len].copy_from_slice(&pending.data[..len]);
        midi.set_header(MidiBufferHeader {
            time_options: 0,
            length: len as u32,
            reserved: [0; 6],
        });
        pending.len = 0;
        pending.last_ticks = 0;
        len
    }

    /// Merges the queued events into the sequence already in the MIDI port buffer `port`,
    /// using `scratch` as the merge destination, then resets the queue.
    ///
    /// Realtime-safe. When the lock is contended the port is left untouched.
    pub fn merge_into(&self, port: &mut [u8], scratch: &mut [u8]) -> MergeResult {
        let Some(mut pending) = self.inner.try_lock() else {
            return MergeResult::default();
        };
        if pending.len == 0 {
            return MergeResult::default();
        }
        let mut midi = MidiBufferViewMut::new(port);
        let capacity = midi.capacity().min(scratch.len());
        let result = merge_ump_sequences(
            &mut scratch[..capacity],
            midi.ump(),
            &pending.data[..pending.len],
        );
        midi.replace(&scratch[..result.len]);
        pending.len = 0;
        pending.last_ticks = 0;
        if result.dropped > 0 {
            tracing::warn!(dropped = result.dropped, "Queued UMP did not fit the port buffer");
        }
        result
    }
}
