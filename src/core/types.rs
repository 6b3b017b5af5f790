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

//! Core type definitions
//!
//! This module defines the fundamental types: Operator, IsolationLevel

use std::fmt;
use std::str::FromStr;

use super::error::Error;

/// Comparison operators for predicates
///

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operator {
    /// Equality (=)
    Eq = 0,

    /// Inequality (!=)
    Ne = 1,

    /// Greater than (>)
    Gt = 2,

    /// Greater than or equal (>=)
    Gte = 3,

    /// Less than (<)
    Lt = 4,

    /// Less than or equal (<=)
    Lte = 5,

    /// IS NULL check
    IsNull = 6,

    /// IS NOT NULL check
    IsNotNull = 7,
}

impl Operator {
    /// Returns true if this operator bounds an index scan from below
    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Gte | Operator::IsNotNull)
    }

    /// Returns true if this operator bounds an index scan from above
    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Lte)
    }

    /// Operator to use when the operands are swapped (`5 < a` becomes `a > 5`)
    pub fn swap(&self) -> Self {
        match self {
            Operator::Gt => Operator::Lt,
            Operator::Gte => Operator::Lte,
            Operator::Lt => Operator::Gt,
            Operator::Lte => Operator::Gte,
            other => *other,
        }
    }

    /// Returns the negation of this operator
    pub fn negate(&self) -> Self {
        match self {
            Operator::Eq => Operator::Ne,
            Operator::Ne => Operator::Eq,
            Operator::Gt => Operator::Lte,
            Operator::Gte => Operator::Lt,
            Operator::Lt => Operator::Gte,
            Operator::Lte => Operator::Gt,
            Operator::IsNull => Operator::IsNotNull,
            Operator::IsNotNull => Operator::IsNull,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Eq => write!(f, "="),
            Operator::Ne => write!(f, "!="),
            Operator::Gt => write!(f, ">"),
            Operator::Gte => write!(f, ">="),
            Operator::Lt => write!(f, "<"),
            Operator::Lte => write!(f, "<="),
            Operator::IsNull => write!(f, "IS NULL"),
            Operator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "IS NULL" | "ISNULL" => Ok(Operator::IsNull),
            "IS NOT NULL" | "ISNOTNULL" => Ok(Operator::IsNotNull),
            _ => Err(Error::invalid_argument(format!("unknown operator: {}", s))),
        }
    }
}

/// Transaction isolation level
///
/// Decides the visibility threshold used by row-action reads and whether a
/// write-write conflict may be waited out (`Redo`) or must abort.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Sees uncommitted changes of other sessions
    ReadUncommitted = 0,

    /// Sees changes committed before the current statement started
    #[default]
    ReadCommitted = 1,

    /// Sees changes committed before the transaction started
    RepeatableRead = 2,

    /// Same visibility as RepeatableRead
    Serializable = 3,
}

impl IsolationLevel {
    /// Returns true when reads are pinned to the transaction start timestamp.
    /// Conflicts at these levels can never be retried.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "READ UNCOMMITTED" | "READUNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ COMMITTED" | "READCOMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" | "REPEATABLEREAD" | "SNAPSHOT ISOLATION" => {
                Ok(IsolationLevel::RepeatableRead)
            }
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(Error::invalid_argument(format!(
                "unknown isolation level: {}",
                s
            ))),
        }
    }
}
