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

//! Common utilities
//!
//! - [`int_maps`] - Hash map aliases for integer keys, including the
//!   concurrent map backing the row-action registry

pub mod int_maps;

// Re-export main types for convenience
pub use int_maps::{
    new_concurrent_int64_map, ConcurrentInt64Map, FxBuildHasher, FxMap, FxSet, KeyMap,
};
