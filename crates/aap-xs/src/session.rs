//! Tunnel sessions: the per-instance state around the codec.
//!
//! - [`InitiatorSession`]: encodes outgoing calls and matches incoming replies to pending
//!   callbacks (client side)
//! - [`RecipientSession`]: decodes incoming requests and collects encoded replies (service side)
//! - [`AapxsProcessor`]: decode only, for passive routers
//!
//! Each session owns scratch buffers sized for the largest payload, allocated up front. The
//! scan and completion paths run on the audio thread and do not allocate.

use crate::codec::{decode_aapxs_sysex8, encode_aapxs_sysex8, AapxsCall};
use crate::dispatcher::{ReplyCallback, ReplyInfo};
use crate::error::{Result, XsError};
use aap_midi::sysex8::{Sysex8Packet, SYSEX8_STATUS_CONTINUE, SYSEX8_STATUS_END, SYSEX8_STATUS_START};
use aap_midi::ump::{self, MESSAGE_TYPE_SYSEX8_MDS};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Walks `ump` and hands every AAPXS call to `f`. Returns the number of calls found.
///
/// Once a multi-packet call has been decoded, the remaining packets of its stream are
/// skipped so they are not scanned again.
fn scan_aapxs(ump: &[u8], parse: &mut [u8], mut f: impl FnMut(&AapxsCall<'_>)) -> usize {
    let mut offset = 0;
    let mut found = 0;
    // Group of the multi-packet call whose tail is being skipped.
    let mut skipping: Option<u8> = None;

    while let Some(word0) = ump::read_word(ump, offset) {
        let size = ump::message_size_for_type(ump::message_type(word0));
        if offset + size > ump.len() {
            break;
        }
        if ump::message_type(word0) == MESSAGE_TYPE_SYSEX8_MDS {
            if let Some(packet) = Sysex8Packet::read(ump, offset) {
                let tail = packet.status() == SYSEX8_STATUS_CONTINUE
                    || packet.status() == SYSEX8_STATUS_END;
                if tail && skipping == Some(packet.group()) && packet.stream_id() == 0 {
                    if packet.status() == SYSEX8_STATUS_END {
                        skipping = None;
                    }
                    offset += size;
                    continue;
                }
                if let Some((call, _)) = decode_aapxs_sysex8(ump, offset, parse) {
                    if packet.status() == SYSEX8_STATUS_START {
                        skipping = Some(call.group);
                    }
                    f(&call);
                    found += 1;
                }
            }
        }
        offset += size;
    }
    found
}

/// A callback waiting for the reply to `request_id`.
pub struct PendingCallback {
    pub request_id: u32,
    pub callback: ReplyCallback,
}

/// Registers pending callbacks from non-realtime threads.
#[derive(Clone)]
pub struct PendingRegistrar {
    tx: Sender<PendingCallback>,
    /// Callbacks registered and not yet completed, whether still in the channel or parked in
    /// the slot table. Never exceeds `capacity`, so the table always has a free slot.
    outstanding: Arc<AtomicUsize>,
    capacity: usize,
}

impl PendingRegistrar {
    /// Parks `callback` until the reply to `request_id` is completed. Register before the
    /// request can reach the peer.
    ///
    /// Fails with [`PendingCallbacksFull`](XsError::PendingCallbacksFull) while `capacity`
    /// callbacks are outstanding; the rejected callback is dropped on the calling thread.
    pub fn register(&self, request_id: u32, callback: ReplyCallback) -> Result<()> {
        let capacity = self.capacity;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| XsError::PendingCallbacksFull(capacity))?;
        self.tx
            .try_send(PendingCallback {
                request_id,
                callback,
            })
            .map_err(|_| {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                XsError::PendingCallbacksFull(capacity)
            })
    }
}

/// Client side of the tunnel.
pub struct InitiatorSession {
    scratch: Box<[u8]>,
    parse: Box<[u8]>,
    /// Owned by the audio thread. `None` marks a free slot.
    pending: Vec<Option<PendingCallback>>,
    registrations: Receiver<PendingCallback>,
    outstanding: Arc<AtomicUsize>,
    registrar: PendingRegistrar,
}

impl InitiatorSession {
    pub fn new(data_max_size: usize, max_pending_callbacks: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(max_pending_callbacks);
        let outstanding = Arc::new(AtomicUsize::new(0));
        Self {
            scratch: vec![0u8; data_max_size].into_boxed_slice(),
            parse: vec![0u8; data_max_size].into_boxed_slice(),
            pending: (0..max_pending_callbacks).map(|_| None).collect(),
            registrations: rx,
            outstanding: Arc::clone(&outstanding),
            registrar: PendingRegistrar {
                tx,
                outstanding,
                capacity: max_pending_callbacks,
            },
        }
    }

    pub fn registrar(&self) -> PendingRegistrar {
        self.registrar.clone()
    }

    /// Scratch capacity; the largest flat payload a call may have.
    pub fn data_max_size(&self) -> usize {
        self.scratch.len()
    }

    /// Callbacks parked in the slot table.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| p.is_some()).count()
    }

    /// Encodes one call into `dst`. Returns the bytes written, 0 if it does not fit.
    pub fn add_session(
        &mut self,
        dst: &mut [u8],
        group: u8,
        request_id: u32,
        uri: &str,
        opcode: i32,
        data: &[u8],
    ) -> usize {
        encode_aapxs_sysex8(dst, &mut self.scratch, group, request_id, uri, opcode, data)
    }

    fn accept_registrations(&mut self) {
        while let Ok(entry) = self.registrations.try_recv() {
            // The registrar's outstanding count keeps a slot free for every entry.
            if let Some(slot) = self.pending.iter_mut().find(|slot| slot.is_none()) {
                *slot = Some(entry);
            }
        }
    }

    /// Scans `ump` for AAPXS messages.
    ///
    /// Replies (opcode >= 0) go to `on_reply`, which should store the reply payload; the
    /// matching pending callback fires afterwards. Requests from the peer (opcode < 0) go to
    /// `on_request`. Returns the number of messages handled.
    ///
    /// A fired callback is consumed here, so its box is freed on the calling (audio) thread.
    /// Callbacks built by [`InitiatorInstance`](crate::InitiatorInstance) only capture a
    /// channel sender whose channel outlives it on the waiting side.
    pub fn complete_session(
        &mut self,
        ump: &[u8],
        on_reply: &mut dyn FnMut(&AapxsCall<'_>),
        on_request: &mut dyn FnMut(&AapxsCall<'_>),
    ) -> usize {
        self.accept_registrations();
        let Self {
            parse,
            pending,
            outstanding,
            ..
        } = self;
        scan_aapxs(ump, parse, |call| {
            if call.opcode < 0 {
                on_request(call);
                return;
            }
            on_reply(call);
            let slot = pending.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|p| p.request_id == call.request_id)
            });
            match slot.and_then(Option::take) {
                Some(entry) => {
                    outstanding.fetch_sub(1, Ordering::AcqRel);
                    (entry.callback)(ReplyInfo {
                        request_id: call.request_id,
                        opcode: call.opcode,
                        data_size: call.data.len(),
                    })
                }
                None => tracing::trace!(
                    uri = call.uri,
                    opcode = call.opcode,
                    request_id = call.request_id,
                    "Reply without a pending callback"
                ),
            }
        })
    }
}

/// Where a recipient handler writes its replies.
pub struct Replies<'a> {
    scratch: &'a mut [u8],
    buffer: &'a mut [u8],
    len: &'a mut usize,
}

impl Replies<'_> {
    /// Encodes the reply to `call` carrying `data`. Returns `false` when it does not fit.
    pub fn add_reply(&mut self, call: &AapxsCall<'_>, data: &[u8]) -> bool {
        let written = encode_aapxs_sysex8(
            &mut self.buffer[*self.len..],
            self.scratch,
            call.group,
            call.request_id,
            call.uri,
            call.opcode,
            data,
        );
        if written == 0 {
            tracing::error!(
                uri = call.uri,
                opcode = call.opcode,
                request_id = call.request_id,
                "AAPXS reply does not fit"
            );
            return false;
        }
        *self.len += written;
        true
    }
}

/// Service side of the tunnel.
pub struct RecipientSession {
    scratch: Box<[u8]>,
    parse: Box<[u8]>,
    replies: Box<[u8]>,
    replies_len: usize,
}

impl RecipientSession {
    pub fn new(data_max_size: usize, reply_capacity: usize) -> Self {
        Self {
            scratch: vec![0u8; data_max_size].into_boxed_slice(),
            parse: vec![0u8; data_max_size].into_boxed_slice(),
            replies: vec![0u8; reply_capacity].into_boxed_slice(),
            replies_len: 0,
        }
    }

    /// Hands every AAPXS call in `ump` to `handler`. Returns the number of calls handled.
    pub fn process(
        &mut self,
        ump: &[u8],
        handler: &mut dyn FnMut(&AapxsCall<'_>, &mut Replies<'_>),
    ) -> usize {
        let Self {
            scratch,
            parse,
            replies,
            replies_len,
        } = self;
        scan_aapxs(ump, parse, |call| {
            let mut out = Replies {
                scratch: &mut scratch[..],
                buffer: &mut replies[..],
                len: &mut *replies_len,
            };
            handler(call, &mut out);
        })
    }

    /// Encoded replies collected since the last [`clear_replies`](Self::clear_replies).
    pub fn replies(&self) -> &[u8] {
        &self.replies[..self.replies_len]
    }

    pub fn clear_replies(&mut self) {
        self.replies_len = 0;
    }
}

/// Decode-only session.
pub struct AapxsProcessor {
    parse: Box<[u8]>,
}

impl AapxsProcessor {
    pub fn new(data_max_size: usize) -> Self {
        Self {
            parse: vec![0u8; data_max_size].into_boxed_slice(),
        }
    }

    pub fn process(&mut self, ump: &[u8], callback: &mut dyn FnMut(&AapxsCall<'_>)) -> usize {
        scan_aapxs(ump, &mut self.parse, |call| callback(call))
    }
}
