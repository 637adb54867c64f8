//! Timestamp-ordered merge of two UMP sequences.
//!
//! Both inputs carry JR timestamps (or delta clockstamps) relative to the start of the cycle.
//! The merged output regenerates JR timestamps from the accumulated tick times.

use crate::ump::{self, UmpIter};

/// Result of [`merge_ump_sequences`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Bytes written to the destination.
    pub len: usize,
    /// Queued events that did not fit.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    time: u32,
    start: usize,
    len: usize,
    group: u8,
}

/// Walks a sequence event by event, folding timestamps into absolute tick times.
struct EventCursor<'a> {
    data: &'a [u8],
    iter: UmpIter<'a>,
    time: u32,
    peeked: Option<Event>,
}

impl<'a> EventCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        let mut cursor = Self {
            data,
            iter: UmpIter::new(data),
            time: 0,
            peeked: None,
        };
        cursor.advance();
        cursor
    }

    fn advance(&mut self) {
        self.peeked = None;
        for message in self.iter.by_ref() {
            let word0 = message.word(0);
            if let Some(ticks) = ump::timestamp_ticks(word0) {
                self.time = self.time.saturating_add(ticks);
                continue;
            }
            self.peeked = Some(Event {
                time: self.time,
                start: message.offset,
                len: message.len(),
                group: ump::group(word0),
            });
            return;
        }
    }

    fn peek(&self) -> Option<Event> {
        self.peeked
    }

    fn bytes(&self, event: &Event) -> &'a [u8] {
        &self.data[event.start..event.start + event.len]
    }
}

/// Bytes needed to emit every remaining event of `data`, with timestamps relative to each
/// previous event of the same source.
fn remaining_cost(data: &[u8]) -> usize {
    let mut cursor = EventCursor::new(data);
    let mut prev = 0;
    let mut cost = 0;
    while let Some(event) = cursor.peek() {
        cost += ump::timestamp_cost(event.time - prev) + event.len;
        prev = event.time;
        cursor.advance();
    }
    cost
}

fn emit(dst: &mut [u8], pos: usize, last_time: u32, event: &Event, bytes: &[u8]) -> usize {
    let ts = ump::write_timestamps(dst, pos, event.group, event.time.saturating_sub(last_time));
    let start = pos + ts;
    dst[start..start + bytes.len()].copy_from_slice(bytes);
    ts + bytes.len()
}

/// Merges `buffered` (events already in the port) with `queued` (events from non-realtime
/// producers) into `dst`, in non-decreasing time order.
///
/// Events of equal time keep `buffered` first. Space for the remaining buffered events is
/// always reserved, so only queued events can be dropped. Does not allocate.
pub fn merge_ump_sequences(dst: &mut [u8], buffered: &[u8], queued: &[u8]) -> MergeResult {
    let mut result = MergeResult::default();
    let mut reserved = remaining_cost(buffered);
    let mut prev_buffered_time = 0u32;
    let mut last_time = 0u32;
    let mut pos = 0usize;

    let mut a = EventCursor::new(buffered);
    let mut b = EventCursor::new(queued);

    loop {
        let take_buffered = match (a.peek(), b.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(x), Some(y)) => x.time <= y.time,
        };

        if take_buffered {
            let Some(event) = a.peek() else { break };
            let planned = ump::timestamp_cost(event.time - prev_buffered_time) + event.len;
            let actual = ump::timestamp_cost(event.time.saturating_sub(last_time)) + event.len;
            if pos + actual > dst.len() {
                // Only reachable when the buffered events alone exceed the destination.
                tracing::error!(capacity = dst.len(), "Merged MIDI sequence overflow");
                break;
            }
            pos += emit(dst, pos, last_time, &event, a.bytes(&event));
            reserved = reserved.saturating_sub(planned);
            prev_buffered_time = event.time;
            last_time = last_time.max(event.time);
            a.advance();
        } else {
            let Some(event) = b.peek() else { break };
            let cost = ump::timestamp_cost(event.time.saturating_sub(last_time)) + event.len;
            // Buffered events after this one restart from this event's time.
            let rest = match a.peek() {
                Some(next) => {
                    reserved - ump::timestamp_cost(next.time - prev_buffered_time)
                        + ump::timestamp_cost(next.time.saturating_sub(event.time))
                }
                None => 0,
            };
            if pos + cost + rest <= dst.len() {
                pos += emit(dst, pos, last_time, &event, b.bytes(&event));
                last_time = last_time.max(event.time);
            } else {
                result.dropped += 1;
            }
            b.advance();
        }
    }

    result.len = pos;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Builds a sequence of `(delta_ticks, note)` MIDI 1.0 note-ons.
    fn sequence(events: &[(u16, u8)]) -> Vec<u8> {
        let mut out = vec![0u8; events.len() * 8];
        let mut pos = 0;
        for (delta, note) in events {
            if *delta > 0 {
                ump::write_word(&mut out, pos, ump::jr_timestamp(0, *delta));
                pos += 4;
            }
            ump::write_word(&mut out, pos, 0x2090_0040 | ((*note as u32) << 8));
            pos += 4;
        }
        out.truncate(pos);
        out
    }

    /// Returns `(absolute_time, note)` for every note in a sequence.
    fn notes(data: &[u8]) -> Vec<(u32, u8)> {
        let mut time = 0;
        let mut out = Vec::new();
        for message in UmpIter::new(data) {
            let word0 = message.word(0);
            match ump::timestamp_ticks(word0) {
                Some(ticks) => time += ticks,
                None => out.push((time, ((word0 >> 8) & 0x7F) as u8)),
            }
        }
        out
    }

    #[test]
    fn test_interleaves_by_time() {
        let buffered = sequence(&[(0, 1), (10, 2)]);
        let queued = sequence(&[(5, 3), (10, 4)]);
        let mut dst = [0u8; 64];
        let result = merge_ump_sequences(&mut dst, &buffered, &queued);
        assert_eq!(result.dropped, 0);
        assert_eq!(
            notes(&dst[..result.len]),
            vec![(0, 1), (5, 3), (10, 2), (15, 4)]
        );
    }

    #[test]
    fn test_buffered_first_on_ties() {
        let buffered = sequence(&[(4, 1)]);
        let queued = sequence(&[(4, 2)]);
        let mut dst = [0u8; 32];
        let result = merge_ump_sequences(&mut dst, &buffered, &queued);
        assert_eq!(notes(&dst[..result.len]), vec![(4, 1), (4, 2)]);
    }

    #[test]
    fn test_drops_queued_before_buffered() {
        let buffered = sequence(&[(0, 1), (0, 2)]);
        let queued = sequence(&[(0, 3)]);
        let mut dst = [0u8; 8];
        let result = merge_ump_sequences(&mut dst, &buffered, &queued);
        assert_eq!(result.dropped, 1);
        assert_eq!(notes(&dst[..result.len]), vec![(0, 1), (0, 2)]);
    }

    #[test]
    fn test_empty_inputs() {
        let mut dst = [0u8; 8];
        assert_eq!(merge_ump_sequences(&mut dst, &[], &[]), MergeResult::default());
    }

    fn arb_sequence() -> impl Strategy<Value = Vec<(u16, u8)>> {
        prop::collection::vec((0u16..200, 0u8..128), 0..16)
    }

    proptest! {
        #[test]
        fn merged_output_is_ordered_and_keeps_buffered(
            buffered in arb_sequence(),
            queued in arb_sequence(),
            capacity in 0usize..64,
        ) {
            let buffered_bytes = sequence(&buffered);
            let queued_bytes = sequence(&queued);
            let capacity = buffered_bytes.len() + capacity * 4;
            let mut dst = vec![0u8; capacity];
            let result = merge_ump_sequences(&mut dst, &buffered_bytes, &queued_bytes);
            prop_assert!(result.len <= capacity);

            let merged = notes(&dst[..result.len]);
            prop_assert!(merged.windows(2).all(|w| w[0].0 <= w[1].0));

            for event in notes(&buffered_bytes) {
                prop_assert!(merged.contains(&event));
            }
            prop_assert_eq!(merged.len() + result.dropped, buffered.len() + queued.len());
        }
    }
}
