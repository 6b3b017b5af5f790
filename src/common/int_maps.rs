// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hash map aliases
//!
//! - `FxMap`/`FxSet` for small integer keys (session ids, range ids)
//! - `KeyMap` for composite value keys such as unique index keys (AHash)
//! - `ConcurrentInt64Map` for the row-action registry keyed by row id
//!   (sharded DashMap, lock-free reads)

use ahash::AHashMap;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

/// Type alias for FxHash's BuildHasher
pub type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Fast single-threaded map for integer keys
pub type FxMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Fast single-threaded set for integer keys
pub type FxSet<K> = HashSet<K, FxBuildHasher>;

/// Fast hash map for composite keys
///
/// AHash handles text and multi-part keys better than FxHash.
pub type KeyMap<K, V> = AHashMap<K, V>;

/// Concurrent hash map for i64 keys
///
/// Uses DashMap with FxHash for fast concurrent access.
/// Provides sharded, lock-free reads and fine-grained locking for writes.
pub type ConcurrentInt64Map<V> = DashMap<i64, V, FxBuildHasher>;

/// Create a new ConcurrentInt64Map with default capacity
#[inline]
pub fn new_concurrent_int64_map<V>() -> ConcurrentInt64Map<V> {
    DashMap::with_hasher(FxBuildHasher::default())
}
