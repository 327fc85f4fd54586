//! Core identifiers, bit-level layouts, and the signature key.
//!
//! This module defines the **fundamental types and bit layouts** shared by
//! every subsystem of the store: entity handles, table and component
//! identifiers, and the fixed-width signature key used to deduplicate
//! archetype tables.
//!
//! ## Entity representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | unused | generation | index |
//!   63..48   47..40       31..0
//! ```
//!
//! - **Index** is the entity's position in the world's dense record array.
//!   Index 0 is reserved and never allocated, so the zero ID is always
//!   invalid.
//! - **Generation** is a one-byte counter bumped whenever an index is
//!   reused, which makes handles to destroyed entities detectably stale.
//!
//! All field access is explicit shift/mask arithmetic; the layout constants
//! are validated with compile-time assertions.
//!
//! ## Signature keys
//!
//! A table's identity is the exact set of component IDs it stores, encoded
//! as a fixed-size bit array ([`SignatureKey`]). Keys:
//!
//! - are plain `[u64; 4]` words (one bit per possible component ID),
//! - compare and hash by value, making them usable as map keys,
//! - support subset tests for query matching,
//! - allow iteration over their set bits in ascending component order.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index of an entity's record within the world directory.
pub type IndexID = u32;
/// Generation counter detecting stale entity handles.
pub type GenerationID = u8;

/// Unique identifier for an archetype table.
pub type TableID = u16;
/// An entity's position within its table's column arrays.
pub type SlotID = u32;

/// Unique identifier for a component type.
pub type ComponentID = u16;

/// Number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the directory index.
pub const INDEX_BITS: Bits = 32;
/// Number of bits reserved for the generation counter.
pub const GENERATION_BITS: Bits = 8;
/// Bit offset of the generation byte within an [`EntityID`].
pub const GENERATION_SHIFT: Bits = 40;

const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (GENERATION_SHIFT >= INDEX_BITS) as usize];
const _: [(); 1] = [(); ((GENERATION_SHIFT + GENERATION_BITS) <= ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityID {
    if bits == 0 { 0 } else { ((1 as EntityID) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = mask(INDEX_BITS);
/// Mask selecting the generation portion after shifting.
pub const GENERATION_MASK: EntityID = mask(GENERATION_BITS);

/// Packs an index and generation into an [`EntityID`].
#[inline]
pub const fn make_entity_id(index: IndexID, generation: GenerationID) -> EntityID {
    ((generation as EntityID) << GENERATION_SHIFT) | (index as EntityID)
}

/// Extracts the directory index from an [`EntityID`].
#[inline]
pub const fn entity_index(id: EntityID) -> IndexID {
    (id & INDEX_MASK) as IndexID
}

/// Extracts the generation counter from an [`EntityID`].
#[inline]
pub const fn entity_generation(id: EntityID) -> GenerationID {
    ((id >> GENERATION_SHIFT) & GENERATION_MASK) as GenerationID
}

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;
/// Number of `u64` words in a [`SignatureKey`].
pub const KEY_WORDS: usize = COMPONENT_CAP / 64;

/// Fixed-width bit-set encoding which component IDs a signature contains.
///
/// ## Purpose
/// Two tables are the same archetype if and only if their keys are equal;
/// the key is therefore the index into the world's Signature→Table map and
/// the hot path of table lookup. Equality is a plain word compare.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct SignatureKey {
    /// Packed component bit words.
    pub words: [u64; KEY_WORDS],
}

impl SignatureKey {
    /// Builds a key from a list of component IDs.
    pub fn from_ids(component_ids: &[ComponentID]) -> Self {
        let mut key = Self::default();
        for &component_id in component_ids {
            key.set(component_id);
        }
        key
    }

    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let word = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        self.words[word] |= 1u64 << bit;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let word = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        self.words[word] &= !(1u64 << bit);
    }

    /// Returns `true` if `component_id` is present in this key.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let word = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        (self.words[word] >> bit) & 1 == 1
    }

    /// Returns `true` if every component in `other` is present in `self`.
    #[inline]
    pub fn contains_all(&self, other: &SignatureKey) -> bool {
        for (mine, theirs) in self.words.iter().zip(other.words.iter()) {
            if (mine & theirs) != *theirs {
                return false;
            }
        }
        true
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Iterates over the component IDs set in this key, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let base = word_index * 64;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((base + tz) as ComponentID)
            })
        })
    }
}
