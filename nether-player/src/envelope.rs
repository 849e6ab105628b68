//! Envelope generators
//!
//! IT and XM walk the same node lists differently. IT evaluates the value
//! before advancing and treats loops as "jump back once past the end node";
//! XM advances first, holds on the sustain node and snaps back exactly when
//! the loop end is reached. Values are kept shifted by [`ENVELOPE_SHIFT`].

use nether_tracker::TrackerEnvelope;

use crate::voice::{EnvelopeCursor, ENVELOPE_SHIFT};

fn node_count(envelope: &TrackerEnvelope) -> i32 {
    envelope.nodes.len() as i32
}

fn tick_at(envelope: &TrackerEnvelope, node: i32) -> i32 {
    envelope.node_tick(node.max(0) as usize)
}

fn value_at(envelope: &TrackerEnvelope, node: i32) -> i32 {
    envelope.node_value(node.max(0) as usize) << ENVELOPE_SHIFT
}

/// Linear interpolation between `next_node - 1` and `next_node`
fn interpolate(envelope: &TrackerEnvelope, next_node: i32, tick: i32) -> i32 {
    let next_node = next_node.max(1);
    let ys = value_at(envelope, next_node - 1);
    let ts = tick_at(envelope, next_node - 1);
    let te = tick_at(envelope, next_node);
    if ts == te {
        return ys;
    }
    let ye = value_at(envelope, next_node);
    ys + (ye - ys) * (tick - ts) / (te - ts)
}

/// Point `next_node` at the first node at or after the cursor's tick
pub(crate) fn recalculate_node(cursor: &mut EnvelopeCursor, envelope: &TrackerEnvelope) {
    let last = node_count(envelope) - 1;
    cursor.next_node = (0..last)
        .find(|&i| cursor.tick <= tick_at(envelope, i))
        .unwrap_or(last)
        .max(0);
}

/// Evaluate and advance an IT envelope by one tick
///
/// `sustained` is true while the key is still held. Returns true once a
/// non-looping envelope has run past its last node.
pub(crate) fn step_it(envelope: &TrackerEnvelope, cursor: &mut EnvelopeCursor, sustained: bool) -> bool {
    let n = node_count(envelope);
    if n == 0 {
        return false;
    }
    let last = n - 1;

    cursor.value = if cursor.tick <= 0 {
        value_at(envelope, 0)
    } else if cursor.tick >= tick_at(envelope, last) {
        value_at(envelope, last)
    } else {
        interpolate(envelope, cursor.next_node, cursor.tick)
    };

    cursor.tick += 1;
    recalculate_node(cursor, envelope);

    if envelope.has_sustain() && sustained {
        let sus_start = envelope.sus_loop_start as i32;
        if cursor.tick > tick_at(envelope, envelope.sus_loop_end as i32) {
            cursor.next_node = (sus_start + 1).min(n);
            cursor.tick = tick_at(envelope, sus_start);
        }
        false
    } else if envelope.has_loop() {
        let loop_start = envelope.loop_start as i32;
        if cursor.tick > tick_at(envelope, envelope.loop_end as i32) {
            cursor.next_node = (loop_start + 1).min(n);
            cursor.tick = tick_at(envelope, loop_start);
        }
        false
    } else {
        cursor.tick > tick_at(envelope, last)
    }
}

/// Value of an XM envelope at the cursor position
pub(crate) fn xm_value(envelope: &TrackerEnvelope, cursor: &EnvelopeCursor) -> i32 {
    let n = node_count(envelope);
    if cursor.next_node <= 0 {
        value_at(envelope, 0)
    } else if cursor.next_node >= n {
        value_at(envelope, n - 1)
    } else {
        interpolate(envelope, cursor.next_node, cursor.tick)
    }
}

/// Advance an XM envelope by one tick and refresh its value
pub(crate) fn step_xm(envelope: &TrackerEnvelope, cursor: &mut EnvelopeCursor, sustained: bool) {
    let n = node_count(envelope);
    if !envelope.is_enabled() || n == 0 {
        return;
    }

    let sus_start = envelope.sus_loop_start as i32;
    if envelope.has_sustain()
        && sustained
        && sus_start < n
        && cursor.tick == tick_at(envelope, sus_start)
    {
        return;
    }
    if cursor.tick >= tick_at(envelope, n - 1) {
        return;
    }

    cursor.tick += 1;
    while cursor.next_node < n && cursor.tick > tick_at(envelope, cursor.next_node) {
        cursor.next_node += 1;
    }

    let loop_end = envelope.loop_end as i32;
    if envelope.has_loop() && loop_end < n && cursor.tick == tick_at(envelope, loop_end) {
        cursor.next_node = (envelope.loop_start as i32).clamp(0, n - 1);
        cursor.tick = tick_at(envelope, cursor.next_node);
    }

    cursor.value = xm_value(envelope, cursor);
}
