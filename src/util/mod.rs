pub mod vec2;

use rustc_hash::FxBuildHasher;

/// Hash map with a fixed (unseeded) hasher.
///
/// Iteration order depends only on the insertion history, so two rooms fed the
/// same inputs walk their tables in the same order.
pub type FxMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
