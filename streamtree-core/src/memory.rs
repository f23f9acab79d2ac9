//! Memory estimation for the active front of a streaming tree.
//!
//! A union tree only keeps vertices whose topology is still unresolved, so
//! its footprint is governed by the size of that front rather than by the
//! input. The estimate here is deliberately pessimistic and is logged when a
//! tree is cleaned up.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Safety multiplier applied to the raw estimate (3/2).
const SAFETY_MULTIPLIER_NUMERATOR: u64 = 3;
const SAFETY_MULTIPLIER_DENOMINATOR: u64 = 2;

/// Arena slot for one vertex: id, value, height key, child, inline parent
/// list, branch id, flags and owner counters, plus the slot enum tag.
const VERTEX_SLOT_BYTES: u64 = 104;

/// Hash map entry mapping a global id to its slot, with load-factor slack.
const INDEX_ENTRY_BYTES: u64 = 32;

/// Branch membership entry: height key plus slot, with ordered-map overhead.
const BRANCH_ENTRY_BYTES: u64 = 48;

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Returns a conservative estimate (in bytes) of the memory held by a union
/// tree whose active front holds `live_vertices` vertices, stored in blocks
/// of `1 << block_bits` slots.
///
/// The estimate covers the vertex arena rounded up to whole blocks, the
/// id-to-slot index and branch membership. Segmentation storage is excluded
/// because it scales with the input rather than with the front.
///
/// # Examples
///
/// ```
/// use streamtree_core::estimate_front_bytes;
///
/// assert_eq!(estimate_front_bytes(0, 12), 0);
/// assert!(estimate_front_bytes(10, 4) < estimate_front_bytes(10_000, 4));
/// ```
#[must_use]
pub fn estimate_front_bytes(live_vertices: usize, block_bits: u32) -> u64 {
    if live_vertices == 0 {
        return 0;
    }

    let n = u64::try_from(live_vertices).unwrap_or(u64::MAX);
    let block = 1_u64.checked_shl(block_bits).unwrap_or(u64::MAX);

    // Arena grows in whole blocks.
    let slots = n.div_ceil(block).saturating_mul(block);
    let arena = slots.saturating_mul(VERTEX_SLOT_BYTES);

    let index = n.saturating_mul(INDEX_ENTRY_BYTES);
    let branches = n.saturating_mul(BRANCH_ENTRY_BYTES);

    arena
        .saturating_add(index)
        .saturating_add(branches)
        .saturating_mul(SAFETY_MULTIPLIER_NUMERATOR)
        .saturating_div(SAFETY_MULTIPLIER_DENOMINATOR)
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Formats a byte count as a human-readable string using binary units.
///
/// # Examples
///
/// ```
/// use streamtree_core::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1536), "1.5 KiB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];

    for (unit, scale) in UNITS {
        if bytes >= scale {
            // Tenths computed in integers so large counts stay exact.
            let tenths = u128::from(bytes) * 10 / u128::from(scale);
            return format!("{}.{} {unit}", tenths / 10, tenths % 10);
        }
    }
    format!("{bytes} B")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
