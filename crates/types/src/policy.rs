//! The policy model: versioned policies, the evaluation context, decisions,
//! and the two-reviewer approval records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::execution::Resources;

/// Lifecycle of a policy version. The evaluator only loads the latest
/// `active` version per policy id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVersionStatus {
    Draft,
    Active,
    Retired,
}

/// The effect a rule or aggregate decision carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEffect {
    Allow,
    Deny,
    RequireApproval,
}

impl DecisionEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }

    /// Aggregates per-policy effects: `deny` dominates `require_approval`
    /// dominates `allow`. An empty iterator yields `allow`.
    pub fn aggregate<I: IntoIterator<Item = DecisionEffect>>(effects: I) -> DecisionEffect {
        let mut agg = DecisionEffect::Allow;
        for e in effects {
            match e {
                DecisionEffect::Deny => return DecisionEffect::Deny,
                DecisionEffect::RequireApproval => agg = DecisionEffect::RequireApproval,
                DecisionEffect::Allow => {}
            }
        }
        agg
    }
}

impl std::fmt::Display for DecisionEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The conditions a rule matches against the policy context. All present
/// conditions must hold for the rule to fire (AND semantics). This fixed
/// set is the whole evaluation contract; there is no policy DSL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleMatch {
    /// Fires when the requested GPU count exceeds this ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus_above: Option<u32>,
    /// Fires when the image digest reference does not start with any of
    /// these registry prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_not_in: Option<Vec<String>>,
    /// Fires when the dataset quality differs from this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_quality_not: Option<String>,
    /// Fires when the git ref does not start with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref_not_prefixed: Option<String>,
    /// Fires when the actor holds none of these roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_missing_any_role: Option<Vec<String>>,
}

/// One rule in a policy version. First firing rule wins within a version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    pub rule_id: String,
    pub effect: DecisionEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, rename = "match")]
    pub matcher: RuleMatch,
}

/// The evaluable body of a policy version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySpec {
    #[serde(default = "PolicySpec::default_effect")]
    pub default_effect: DecisionEffect,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl PolicySpec {
    fn default_effect() -> DecisionEffect {
        DecisionEffect::Allow
    }
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self {
            default_effect: DecisionEffect::Allow,
            rules: Vec::new(),
        }
    }
}

/// A versioned, immutable policy document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyVersion {
    pub policy_version_id: String,
    pub policy_id: String,
    pub version: u32,
    pub status: PolicyVersionStatus,
    pub spec: PolicySpec,
    pub spec_sha256: String,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

/// The actor on whose behalf a run is submitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextActor {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextDataset {
    pub id: String,
    pub version: String,
    pub sha256: String,
    pub quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextGit {
    pub repo: String,
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextImage {
    pub r#ref: String,
    pub digest: String,
}

/// Everything a policy can see about a submission. Canonically serialized
/// and hashed into `context_sha256` before evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyContext {
    pub actor: ContextActor,
    pub dataset: ContextDataset,
    pub experiment_id: String,
    pub git: ContextGit,
    pub image: ContextImage,
    pub resources: Resources,
    /// Free-form extras: image execution ref, SCM governance snapshot, etc.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

/// The outcome of evaluating one policy against one context. Immutable;
/// shared across runs via `decision_id` references but never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDecision {
    pub decision_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub policy_id: String,
    pub policy_version_id: String,
    pub policy_sha256: String,
    pub context_sha256: String,
    pub decision: DecisionEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

/// Lifecycle of an approval: `pending → approved | denied`, exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

/// A pending two-reviewer gate created for one `require_approval` decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub approval_id: String,
    pub decision_id: String,
    pub run_id: String,
    pub status: ApprovalStatus,
    pub requested_by: String,
    #[serde(with = "codec::ts")]
    pub requested_at: DateTime<Utc>,
    #[serde(default, with = "codec::ts::option", skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub integrity_sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_dominates() {
        use DecisionEffect::*;
        assert_eq!(DecisionEffect::aggregate([Allow, RequireApproval, Deny]), Deny);
        assert_eq!(DecisionEffect::aggregate([Allow, RequireApproval]), RequireApproval);
        assert_eq!(DecisionEffect::aggregate([Allow, Allow]), Allow);
        assert_eq!(DecisionEffect::aggregate([]), Allow);
    }

    #[test]
    fn rule_match_defaults_to_empty() {
        let spec: PolicySpec = serde_json::from_str(
            r#"{"rules":[{"rule_id":"gpu_cap","effect":"deny","match":{"gpus_above":8}}]}"#,
        )
        .unwrap();
        assert_eq!(spec.default_effect, DecisionEffect::Allow);
        assert_eq!(spec.rules[0].matcher.gpus_above, Some(8));
        assert!(spec.rules[0].matcher.registry_not_in.is_none());
    }
}
