//! Canonical policy document model.
//!
//! Declared statements (`PolicyStatementEntry`, camelCase as operators write
//! them) are marshaled into a `PolicyDocument` whose JSON form uses the
//! identity service's own key names. The remote side diffs and versions the
//! document as an opaque byte string, so marshaling must be deterministic:
//! statement, action and resource order is preserved as declared, while
//! principals and conditions are normalized into sorted maps.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Policy language version stamped into every marshaled document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar or list value, as accepted by principal and condition blocks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Values in declared order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(value) => vec![value.as_str()],
            Self::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// Sorted, de-duplicated form; a single value collapses to a scalar.
    /// Returns `None` when no values remain.
    pub fn normalized(&self) -> Option<Self> {
        let mut values: Vec<String> = self.values().into_iter().map(str::to_string).collect();
        values.sort();
        values.dedup();
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::One),
            _ => Some(Self::Many(values)),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for OneOrMany {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

/// Conditions keyed by operator, then by condition key.
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, OneOrMany>>;

/// One statement as declared on a Policy, Role or AssumeRolePolicy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatementEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub principal: BTreeMap<String, OneOrMany>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: ConditionBlock,
}

impl PolicyStatementEntry {
    pub fn new(effect: Effect) -> Self {
        Self {
            sid: String::new(),
            effect,
            principal: BTreeMap::new(),
            actions: Vec::new(),
            resources: Vec::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn allow() -> Self {
        Self::new(Effect::Allow)
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = sid.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn with_principal(mut self, kind: impl Into<String>, value: impl Into<OneOrMany>) -> Self {
        self.principal.insert(kind.into(), value.into());
        self
    }

    pub fn with_condition(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<OneOrMany>,
    ) -> Self {
        self.conditions
            .entry(operator.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// One statement in the identity service's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatementEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub principal: BTreeMap<String, OneOrMany>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

/// A versioned, ordered list of statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    #[serde(default)]
    pub statement: Vec<StatementEntry>,
}

impl PolicyDocument {
    /// Canonical JSON bytes sent to the identity service.
    pub fn to_json(&self) -> String {
        // Only strings, vectors and string-keyed maps: serialization is infallible.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a document previously produced by `to_json` (or by the remote side).
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Hex SHA-256 of the canonical JSON, used as a content version token.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.to_json().as_bytes());
        hash.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Recover declared statements from a document.
    pub fn statements(&self) -> Vec<PolicyStatementEntry> {
        self.statement
            .iter()
            .map(|entry| PolicyStatementEntry {
                sid: entry.sid.clone(),
                effect: entry.effect,
                principal: entry.principal.clone(),
                actions: entry.action.clone(),
                resources: entry.resource.clone(),
                conditions: entry.condition.clone(),
            })
            .collect()
    }

    /// Append statements after the declared ones.
    pub fn extend(&mut self, statements: &[PolicyStatementEntry]) {
        self.statement.extend(statements.iter().map(marshal_entry));
    }
}

/// Marshal declared statements into a canonical document.
pub fn marshal(statements: &[PolicyStatementEntry]) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: statements.iter().map(marshal_entry).collect(),
    }
}

fn marshal_entry(entry: &PolicyStatementEntry) -> StatementEntry {
    StatementEntry {
        sid: entry.sid.clone(),
        effect: entry.effect,
        principal: entry
            .principal
            .iter()
            .filter_map(|(kind, value)| value.normalized().map(|value| (kind.clone(), value)))
            .collect(),
        action: entry.actions.clone(),
        resource: entry.resources.clone(),
        condition: normalize_conditions(&entry.conditions),
    }
}

/// Canonical nested condition map: operators and keys sorted, list values
/// sorted and de-duplicated, empty blocks dropped.
pub fn normalize_conditions(conditions: &ConditionBlock) -> ConditionBlock {
    let mut out = BTreeMap::new();
    for (operator, comparisons) in conditions {
        let mut block = BTreeMap::new();
        for (key, value) in comparisons {
            if let Some(value) = value.normalized() {
                block.insert(key.clone(), value);
            }
        }
        if !block.is_empty() {
            out.insert(operator.clone(), block);
        }
    }
    out
}
