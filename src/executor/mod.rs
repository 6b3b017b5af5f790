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

//! Reference executor for resolved plans
//!
//! Left-deep nested loops over in-memory rows. Used to check that a
//! resolved plan returns the same rows as the query as written.

mod nested_loop;
mod row_source;

pub use nested_loop::{execute_plan, execute_unplanned};
pub use row_source::{JoinedRow, Row, TableRows};
