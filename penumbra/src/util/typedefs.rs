use std::{
    collections::{HashMap, HashSet},
    hash::BuildHasherDefault,
};

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

pub type FastBuildHasher = BuildHasherDefault<FxHasher>;
/// Hash map designed for small keys
pub type FastHashMap<K, V> = HashMap<K, V, FastBuildHasher>;
pub type FastHashSet<K> = HashSet<K, FastBuildHasher>;
/// Insertion ordered map, iterated in the order keys first arrived.
pub type FastIndexMap<K, V> = IndexMap<K, V, FastBuildHasher>;
pub type FastIndexSet<K> = IndexSet<K, FastBuildHasher>;
