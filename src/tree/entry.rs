//! Encoding of one token's offsets into a fixed 16-byte leaf slot.
//!
//! Slot layout (big-endian):
//!
//! ```text
//! 0..8   token (order-preserving i64)
//! 8      entry type tag
//! 9      aux (high offset bits for SIMPLE, value count for PACKED/FACTORED)
//! 10..16 48-bit payload
//! ```
//!
//! `Packed` and `Factored` split the payload into `48 / n` bit lanes, most
//! significant lane first. `Overflow` stores a word index into the leaf's
//! overflow area, which holds `[n, o1, .., on]`.

use core::convert::TryFrom;

use smallvec::SmallVec;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{IndexError, Result};

use super::format::{ENTRY_LEN, OVERFLOW_WORD_LEN};
use super::offsets::OffsetSet;

const PAYLOAD_BITS: u32 = 48;
const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;
const SIMPLE_LIMIT: u64 = 1 << 56;
const MAX_INLINE: usize = 4;

/// Tag describing how an entry's offsets are stored.
///
/// Ordinals are persisted and must never be renumbered.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntryType {
    /// One offset stored inline.
    Simple = 0,
    /// Two to four narrow offsets packed inline.
    Packed = 1,
    /// Up to four offsets stored as deltas from the leaf base.
    Factored = 2,
    /// Full-width offsets stored in the leaf overflow area.
    Overflow = 3,
}

impl EntryType {
    /// All variants in ordinal order.
    pub const ALL: [EntryType; 4] = [
        EntryType::Simple,
        EntryType::Packed,
        EntryType::Factored,
        EntryType::Overflow,
    ];

    /// Returns the persisted ordinal.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Resolves a persisted ordinal.
    pub fn from_ordinal(ordinal: u8) -> Result<Self> {
        Self::try_from(ordinal)
    }
}

impl TryFrom<u8> for EntryType {
    type Error = IndexError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EntryType::Simple),
            1 => Ok(EntryType::Packed),
            2 => Ok(EntryType::Factored),
            3 => Ok(EntryType::Overflow),
            _ => Err(IndexError::CorruptFormat("unknown entry type")),
        }
    }
}

fn lane_bits(n: usize) -> u32 {
    PAYLOAD_BITS / n as u32
}

fn lanes_fit(values: impl Iterator<Item = u64>, n: usize) -> bool {
    let limit = 1u64 << lane_bits(n);
    values.into_iter().all(|v| v < limit)
}

fn fits_inline(offsets: &OffsetSet) -> bool {
    match offsets.len() {
        1 => offsets.as_slice()[0] < SIMPLE_LIMIT,
        n @ 2..=MAX_INLINE => lanes_fit(offsets.iter(), n),
        _ => false,
    }
}

/// Chooses the leaf factoring base: the smallest offset among entries that
/// cannot be stored `Simple` or `Packed`, or 0 when every entry fits inline.
pub fn block_base<'a>(sets: impl IntoIterator<Item = &'a OffsetSet>) -> u64 {
    sets.into_iter()
        .filter(|set| !fits_inline(set))
        .filter_map(OffsetSet::min)
        .min()
        .unwrap_or(0)
}

/// Picks the smallest encoding that reproduces `offsets` under `base`.
pub fn classify(offsets: &OffsetSet, base: u64) -> EntryType {
    let n = offsets.len();
    if n == 1 && offsets.as_slice()[0] < SIMPLE_LIMIT {
        return EntryType::Simple;
    }
    if (2..=MAX_INLINE).contains(&n) && lanes_fit(offsets.iter(), n) {
        return EntryType::Packed;
    }
    if (1..=MAX_INLINE).contains(&n)
        && offsets.min().is_some_and(|min| min >= base)
        && lanes_fit(offsets.iter().map(|o| o - base), n)
    {
        return EntryType::Factored;
    }
    EntryType::Overflow
}

/// Overflow words an entry consumes under `base`.
pub fn overflow_words(offsets: &OffsetSet, base: u64) -> usize {
    match classify(offsets, base) {
        EntryType::Overflow => 1 + offsets.len(),
        _ => 0,
    }
}

fn pack(values: impl Iterator<Item = u64>, n: usize) -> u64 {
    let bits = lane_bits(n);
    let mut payload = 0u64;
    for (lane, v) in values.enumerate() {
        let shift = bits * (n - 1 - lane) as u32;
        payload |= v << shift;
    }
    payload
}

fn unpack(payload: u64, n: usize) -> SmallVec<[u64; 4]> {
    let bits = lane_bits(n);
    let mask = (1u64 << bits) - 1;
    (0..n)
        .map(|lane| (payload >> (bits * (n - 1 - lane) as u32)) & mask)
        .collect()
}

/// Appends the slot for `(token, offsets)` to `slot_out` and any overflow words
/// to `overflow`. `overflow` must hold only this leaf's words so far.
pub fn encode(
    token: i64,
    offsets: &OffsetSet,
    base: u64,
    slot_out: &mut Vec<u8>,
    overflow: &mut Vec<u64>,
) -> EntryType {
    debug_assert!(!offsets.is_empty(), "stored tokens carry offsets");
    let kind = classify(offsets, base);
    let n = offsets.len();
    let (aux, payload) = match kind {
        EntryType::Simple => {
            let v = offsets.as_slice()[0];
            ((v >> PAYLOAD_BITS) as u8, v & PAYLOAD_MASK)
        }
        EntryType::Packed => (n as u8, pack(offsets.iter(), n)),
        EntryType::Factored => (n as u8, pack(offsets.iter().map(|o| o - base), n)),
        EntryType::Overflow => {
            let start = overflow.len() as u64;
            overflow.push(n as u64);
            overflow.extend(offsets.iter());
            (0, start)
        }
    };

    let mut slot = [0u8; ENTRY_LEN];
    ord::put_i64_be(&mut slot[..8], token);
    slot[8] = kind.ordinal();
    slot[9] = aux;
    slot[10..16].copy_from_slice(&payload.to_be_bytes()[2..]);
    slot_out.extend_from_slice(&slot);
    kind
}

/// Reads only the token key of a slot.
pub fn decode_token(slot: &[u8]) -> i64 {
    ord::get_i64_be(slot)
}

/// Decodes a slot back into its token and offsets. `overflow` is the leaf's
/// overflow area as raw bytes.
pub fn decode(slot: &[u8], base: u64, overflow: &[u8]) -> Result<(i64, OffsetSet)> {
    if slot.len() < ENTRY_LEN {
        return Err(IndexError::CorruptFormat("entry slot truncated"));
    }
    let token = decode_token(slot);
    let kind = EntryType::try_from(slot[8])?;
    let aux = slot[9];
    let mut payload_bytes = [0u8; 8];
    payload_bytes[2..].copy_from_slice(&slot[10..16]);
    let payload = u64::from_be_bytes(payload_bytes);

    let offsets = match kind {
        EntryType::Simple => OffsetSet::single(((aux as u64) << PAYLOAD_BITS) | payload),
        EntryType::Packed | EntryType::Factored => {
            let n = aux as usize;
            let min_n = if kind == EntryType::Packed { 2 } else { 1 };
            if n < min_n || n > MAX_INLINE {
                return Err(IndexError::CorruptFormat("inline entry count out of range"));
            }
            let mut values = unpack(payload, n);
            if kind == EntryType::Factored {
                for v in values.iter_mut() {
                    *v = v
                        .checked_add(base)
                        .ok_or(IndexError::CorruptFormat("factored offset overflows"))?;
                }
            }
            if values.windows(2).any(|w| w[0] >= w[1]) {
                return Err(IndexError::CorruptFormat("inline offsets not ascending"));
            }
            OffsetSet::from_sorted(values)
        }
        EntryType::Overflow => decode_overflow(payload, overflow)?,
    };
    Ok((token, offsets))
}

fn decode_overflow(start: u64, overflow: &[u8]) -> Result<OffsetSet> {
    let words = (overflow.len() / OVERFLOW_WORD_LEN) as u64;
    if start >= words {
        return Err(IndexError::CorruptFormat("overflow locator out of range"));
    }
    let mut cur = Cursor::new(&overflow[start as usize * OVERFLOW_WORD_LEN..]);
    let n = cur.u64()?;
    if n == 0 || n > words - start - 1 {
        return Err(IndexError::CorruptFormat("overflow run exceeds leaf"));
    }
    let mut values: SmallVec<[u64; 4]> = SmallVec::with_capacity(n as usize);
    let mut prev: Option<u64> = None;
    for _ in 0..n {
        let v = cur.u64()?;
        if prev.is_some_and(|p| p >= v) {
            return Err(IndexError::CorruptFormat("overflow offsets not ascending"));
        }
        prev = Some(v);
        values.push(v);
    }
    Ok(OffsetSet::from_sorted(values))
}
