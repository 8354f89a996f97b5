// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
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

//! Issuer status conditions.
//!
//! Conditions are held in a map keyed by type, so an issuer can never carry
//! two conditions of the same type. On the wire the status keeps the
//! familiar `{"conditions": [...]}` list shape.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The kind of a condition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionType(Cow<'static, str>);

impl ConditionType {
    /// The issuer can sign certificate requests.
    pub const READY: ConditionType = ConditionType(Cow::Borrowed("Ready"));

    /// A condition type with a custom name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tri-state value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition has not been evaluated yet.
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A single status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    /// Current status.
    pub status: ConditionStatus,

    /// When `status` last changed.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<OffsetDateTime>,

    /// Machine-readable reason for the last evaluation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable detail of the last evaluation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Status subresource of an issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusRepr", into = "StatusRepr")]
pub struct IssuerStatus {
    conditions: BTreeMap<ConditionType, Condition>,
}

#[derive(Serialize, Deserialize)]
struct StatusRepr {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<Condition>,
}

impl From<StatusRepr> for IssuerStatus {
    fn from(repr: StatusRepr) -> Self {
        let mut conditions = BTreeMap::new();
        for condition in repr.conditions {
            // The first entry of a type wins.
            conditions
                .entry(condition.condition_type.clone())
                .or_insert(condition);
        }
        Self { conditions }
    }
}

impl From<IssuerStatus> for StatusRepr {
    fn from(status: IssuerStatus) -> Self {
        Self {
            conditions: status.conditions.into_values().collect(),
        }
    }
}

impl IssuerStatus {
    /// Set a condition, stamping the transition time with the current time.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set_condition_at(
            condition_type,
            status,
            reason,
            message,
            OffsetDateTime::now_utc(),
        );
    }

    /// Set a condition as of `now`.
    ///
    /// `reason` and `message` are always replaced. The transition time is
    /// only touched when the condition is created or its status changes,
    /// and it never moves backwards.
    pub fn set_condition_at(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: OffsetDateTime,
    ) {
        let condition = self
            .conditions
            .entry(condition_type.clone())
            .or_insert_with(|| Condition {
                condition_type,
                status,
                last_transition_time: Some(now),
                reason: String::new(),
                message: String::new(),
            });

        if condition.status != status {
            condition.status = status;
            condition.last_transition_time = Some(match condition.last_transition_time {
                Some(previous) if previous >= now => previous + time::Duration::nanoseconds(1),
                _ => now,
            });
        }
        condition.reason = reason.into();
        condition.message = message.into();
    }

    /// Look up a condition by type.
    pub fn get_condition(&self, condition_type: &ConditionType) -> Option<&Condition> {
        self.conditions.get(condition_type)
    }

    /// The Ready condition, if the issuer has been seen before.
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.get_condition(&ConditionType::READY)
    }

    /// Set the Ready condition.
    pub fn set_ready(
        &mut self,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set_condition(ConditionType::READY, status, reason, message);
    }

    /// True iff a Ready condition exists with status True.
    pub fn is_ready(&self) -> bool {
        self.ready_condition()
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Iterate over the conditions in type order.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }
}
