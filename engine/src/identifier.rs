//! Dense, totally ordered identifiers for CRDT elements.
//!
//! Two forms are produced here:
//!
//! - **Triplex** ids are sequences of `(path, version, store)` triplets. New
//!   ids can always be generated strictly between two existing ones, which
//!   is what sequence fields use to order their elements.
//! - **Duplex** ids are a single `(version, store)` pair. Atomic fields only
//!   need causal precedence (version first, store id as tie-break), not
//!   positional ordering.
//!
//! Both forms are fixed-width lowercase hex, so plain string comparison
//! matches the numeric ordering of their components.

use crate::{StoreId, Version};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest value of the 48-bit path component.
pub const MAX_PATH: u64 = (1 << 48) - 1;

/// Largest value of the 48-bit version component.
pub const MAX_VERSION: u64 = (1 << 48) - 1;

const PATH_WIDTH: usize = 12;
const VERSION_WIDTH: usize = 12;
const STORE_WIDTH: usize = 8;
const TRIPLET_WIDTH: usize = PATH_WIDTH + VERSION_WIDTH + STORE_WIDTH;
const DUPLEX_WIDTH: usize = VERSION_WIDTH + STORE_WIDTH;

/// An opaque identifier, ordered by byte comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wrap an already-encoded identifier string.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of triplets in a triplex id.
    pub fn triplet_count(&self) -> usize {
        self.0.len() / TRIPLET_WIDTH
    }

    /// Decode the triplet at `index`, if present.
    pub fn triplet(&self, index: usize) -> Option<Triplet> {
        let start = index * TRIPLET_WIDTH;
        let chunk = self.0.get(start..start + TRIPLET_WIDTH)?;
        Triplet::decode(chunk)
    }

    /// The largest version embedded in this identifier.
    pub fn max_version(&self) -> Version {
        if self.0.len() == DUPLEX_WIDTH {
            return self.0.get(..VERSION_WIDTH).and_then(parse_hex).unwrap_or(0);
        }
        (0..self.triplet_count())
            .filter_map(|i| self.triplet(i))
            .map(|t| t.version)
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// One `(path, version, store)` level of a triplex id.
///
/// Field order matches the encoded order, so the derived ordering agrees
/// with string comparison of the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Triplet {
    pub path: u64,
    pub version: Version,
    pub store: StoreId,
}

impl Triplet {
    /// The virtual triplet standing in for an exhausted lower bound.
    pub const ZERO: Triplet = Triplet {
        path: 0,
        version: 0,
        store: 0,
    };

    /// Sorts after every real triplet; stands in for an unbounded upper bound.
    const UNBOUNDED: Triplet = Triplet {
        path: MAX_PATH + 1,
        version: 0,
        store: 0,
    };

    fn encode(&self) -> String {
        format!(
            "{:012x}{:012x}{:08x}",
            self.path & MAX_PATH,
            self.version & MAX_VERSION,
            self.store
        )
    }

    /// Decode one encoded triplet. Anything but hex digits yields `None`.
    fn decode(chunk: &str) -> Option<Self> {
        Some(Self {
            path: parse_hex(chunk.get(..PATH_WIDTH)?)?,
            version: parse_hex(chunk.get(PATH_WIDTH..PATH_WIDTH + VERSION_WIDTH)?)?,
            store: parse_hex(chunk.get(PATH_WIDTH + VERSION_WIDTH..)?)? as StoreId,
        })
    }
}

fn parse_hex(digits: &str) -> Option<u64> {
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Create a duplex id from a version and store id.
pub fn create_duplex_id(version: Version, store: StoreId) -> Identifier {
    Identifier(format!("{:012x}{:08x}", version & MAX_VERSION, store))
}

/// Create a triplex id which sorts strictly between `lower` and `upper`.
///
/// `None` bounds are unbounded. The caller must ensure `lower < upper`.
pub fn create_triplex_id(
    version: Version,
    store: StoreId,
    lower: Option<&Identifier>,
    upper: Option<&Identifier>,
) -> Identifier {
    let mut rng = rand::thread_rng();
    let mut id = String::new();

    let lower_count = lower.map_or(0, Identifier::triplet_count);
    let mut upper = upper;
    let levels = lower_count.max(upper.map_or(0, Identifier::triplet_count));

    for level in 0..levels {
        let low = lower
            .and_then(|l| l.triplet(level))
            .unwrap_or(Triplet::ZERO);
        let high = upper
            .and_then(|u| u.triplet(level))
            .unwrap_or(Triplet::UNBOUNDED);

        // Shared prefix.
        if low == high {
            id.push_str(&low.encode());
            continue;
        }

        if high.path - low.path > 1 {
            let path = random_path(&mut rng, low.path + 1, high.path - 1);
            id.push_str(&triplet(path, version, store));
            return Identifier(id);
        }

        // No room at this level: descend below `low` with no upper limit.
        id.push_str(&low.encode());
        upper = None;
    }

    let path = random_path(&mut rng, 1, MAX_PATH);
    id.push_str(&triplet(path, version, store));
    Identifier(id)
}

/// Create `n` strictly increasing triplex ids between `lower` and `upper`.
///
/// Rather than chaining each id off the previous one as the lower bound,
/// every id after the first extends the first one, each generated above the
/// one before it. The extra level makes those ids one or two triplets
/// longer, but no id from another replica can sort inside the batch unless
/// it was generated from one of the batch's own ids, so concurrent batches
/// inserted at the same place never interleave.
pub fn create_triplex_ids(
    n: usize,
    version: Version,
    store: StoreId,
    lower: Option<&Identifier>,
    upper: Option<&Identifier>,
) -> Vec<Identifier> {
    let mut ids = Vec::with_capacity(n);
    if n == 0 {
        return ids;
    }

    let first = create_triplex_id(version, store, lower, upper);
    let ceiling = upper
        .and_then(|u| u.0.strip_prefix(first.as_str()))
        .filter(|rest| !rest.is_empty())
        .map(Identifier::from_encoded);

    let mut previous: Option<Identifier> = None;
    for _ in 1..n {
        let suffix = create_triplex_id(version, store, previous.as_ref(), ceiling.as_ref());
        ids.push(Identifier(format!("{}{}", first.0, suffix.0)));
        previous = Some(suffix);
    }
    ids.insert(0, first);
    ids
}

fn triplet(path: u64, version: Version, store: StoreId) -> String {
    Triplet {
        path,
        version,
        store,
    }
    .encode()
}

/// Pick a path in `[min, max]`, biased towards `min`.
///
/// The spread is the square root of the gap, so repeated appends into a
/// large empty interval leave most of it free.
fn random_path(rng: &mut impl Rng, min: u64, max: u64) -> u64 {
    let spread = ((max - min) as f64).sqrt();
    let offset = (rng.gen::<f64>() * spread).round() as u64;
    min + offset.min(max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn duplex_orders_by_version_then_store() {
        let a = create_duplex_id(1, 9);
        let b = create_duplex_id(2, 1);
        let c = create_duplex_id(2, 3);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.as_str().len(), DUPLEX_WIDTH);
        assert_eq!(c.max_version(), 2);
    }

    #[test]
    fn unbounded_id_has_one_triplet() {
        let id = create_triplex_id(7, 3, None, None);
        assert_eq!(id.triplet_count(), 1);
        let t = id.triplet(0).unwrap();
        assert_eq!(t.version, 7);
        assert_eq!(t.store, 3);
        assert!(t.path >= 1);
    }

    #[test]
    fn id_between_adjacent_paths_descends() {
        let lower = Identifier(triplet(10, 1, 1));
        let upper = Identifier(triplet(11, 1, 2));
        let id = create_triplex_id(2, 5, Some(&lower), Some(&upper));
        assert!(lower < id && id < upper);
        assert_eq!(id.triplet_count(), 2);
        assert_eq!(id.triplet(0), lower.triplet(0));
    }

    #[test]
    fn id_between_prefix_and_zero_path_extension() {
        let lower = Identifier(triplet(10, 1, 1));
        let upper = Identifier(format!("{}{}", lower.as_str(), triplet(1, 4, 4)));
        let id = create_triplex_id(5, 2, Some(&lower), Some(&upper));
        assert!(lower < id && id < upper, "{lower} < {id} < {upper}");
    }

    #[test]
    fn identical_triplets_are_copied_as_prefix() {
        let shared = triplet(100, 1, 1);
        let lower = Identifier(format!("{shared}{}", triplet(5, 1, 1)));
        let upper = Identifier(format!("{shared}{}", triplet(500, 1, 1)));
        let id = create_triplex_id(2, 2, Some(&lower), Some(&upper));
        assert!(id.as_str().starts_with(&shared));
        assert!(lower < id && id < upper);
    }

    #[test]
    fn batch_is_strictly_increasing_within_bounds() {
        let lower = create_triplex_id(1, 1, None, None);
        let upper = create_triplex_id(1, 1, Some(&lower), None);
        let ids = create_triplex_ids(50, 2, 2, Some(&lower), Some(&upper));
        assert_eq!(ids.len(), 50);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| &lower < id && id < &upper));
    }

    #[test]
    fn concurrent_batches_do_not_interleave() {
        for _ in 0..200 {
            let a = create_triplex_ids(6, 1, 1, None, None);
            let b = create_triplex_ids(4, 1, 2, None, None);
            let mut all: Vec<(&Identifier, char)> = a
                .iter()
                .map(|id| (id, 'a'))
                .chain(b.iter().map(|id| (id, 'b')))
                .collect();
            all.sort();
            let order: String = all.iter().map(|(_, tag)| *tag).collect();
            assert!(order == "aaaaaabbbb" || order == "bbbbaaaaaa", "{order}");
        }
    }

    #[test]
    fn max_version_scans_all_triplets() {
        let id = Identifier(format!("{}{}", triplet(3, 9, 1), triplet(4, 2, 1)));
        assert_eq!(id.max_version(), 9);
    }

    #[test]
    fn malformed_ids_decode_to_nothing() {
        // 32 bytes, but multi-byte characters straddle the field boundaries.
        let bad = Identifier::from_encoded("é".repeat(16));
        assert_eq!(bad.triplet_count(), 1);
        assert_eq!(bad.triplet(0), None);
        assert_eq!(bad.max_version(), 0);

        let not_hex = Identifier::from_encoded("z".repeat(TRIPLET_WIDTH));
        assert_eq!(not_hex.triplet(0), None);
        assert_eq!(Identifier::from_encoded("é".repeat(10)).max_version(), 0);

        let below = create_triplex_id(1, 1, None, Some(&bad));
        assert!(below < bad);
        let above = create_triplex_id(1, 1, Some(&bad), None);
        assert_eq!(above.triplet_count(), 1);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = create_duplex_id(1, 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
    }

    proptest! {
        #[test]
        fn repeated_inserts_stay_sorted(positions in prop::collection::vec(0usize..64, 1..120)) {
            let mut ids: Vec<Identifier> = Vec::new();
            for (step, position) in positions.into_iter().enumerate() {
                let index = position % (ids.len() + 1);
                let lower = index.checked_sub(1).map(|i| &ids[i]);
                let upper = ids.get(index);
                let id = create_triplex_id(step as u64 + 1, (step % 3) as u32, lower, upper);
                if let Some(lower) = lower {
                    prop_assert!(lower < &id);
                }
                if let Some(upper) = upper {
                    prop_assert!(&id < upper);
                }
                ids.insert(index, id);
            }
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
