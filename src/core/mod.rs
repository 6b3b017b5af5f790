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

//! Core types shared by the planner and the transaction manager
//!
//! - [`Operator`] - Comparison operators (=, !=, >, <, etc.)
//! - [`IsolationLevel`] - Transaction isolation levels
//! - [`Value`] - Runtime values used as literals and row cells
//! - [`Error`] - Error type for all operations

pub mod error;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use types::{IsolationLevel, Operator};
pub use value::Value;
