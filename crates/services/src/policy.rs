//! The policy evaluator.
//!
//! Evaluation itself is a pure function over `(spec, context)` so it can be
//! tested without the store. [`evaluate`] loads the latest active version
//! of every policy, hashes the canonical context, and produces one sealed
//! `PolicyDecision` per policy; the caller persists them in its own
//! transaction.

use chrono::{DateTime, Utc};

use animus_api::store::MetaStore;
use animus_types::codec;
use animus_types::error::CoreError;
use animus_types::ids;
use animus_types::policy::{
    DecisionEffect, PolicyContext, PolicyDecision, PolicyRule, PolicySpec, RuleMatch,
};

/// The outcome of evaluating every active policy against one context.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub aggregate: DecisionEffect,
    pub decisions: Vec<PolicyDecision>,
    pub context_sha256: String,
}

impl EvaluationOutcome {
    /// The rule id of the first decision carrying the aggregate effect.
    pub fn deciding_rule(&self) -> Option<String> {
        self.decisions
            .iter()
            .find(|d| d.decision == self.aggregate)
            .and_then(|d| d.rule_id.clone())
    }
}

/// Whether a rule fires against the context. All present conditions must
/// hold; a rule with no conditions always fires (catch-all).
fn rule_fires(matcher: &RuleMatch, ctx: &PolicyContext) -> bool {
    if let Some(cap) = matcher.gpus_above {
        if ctx.resources.gpu_count <= cap {
            return false;
        }
    }
    if let Some(registries) = &matcher.registry_not_in {
        if registries.iter().any(|p| ctx.image.r#ref.starts_with(p.as_str())) {
            return false;
        }
    }
    if let Some(expected) = &matcher.dataset_quality_not {
        if &ctx.dataset.quality == expected {
            return false;
        }
    }
    if let Some(prefix) = &matcher.git_ref_not_prefixed {
        if ctx
            .git
            .r#ref
            .as_deref()
            .map(|r| r.starts_with(prefix.as_str()))
            .unwrap_or(false)
        {
            return false;
        }
    }
    if let Some(roles) = &matcher.actor_missing_any_role {
        if ctx.actor.roles.iter().any(|r| roles.contains(r)) {
            return false;
        }
    }
    true
}

/// Evaluates one policy spec against a context. Pure: first firing rule
/// wins, otherwise the version's default effect applies.
pub fn evaluate_spec<'a>(
    spec: &'a PolicySpec,
    ctx: &PolicyContext,
) -> (DecisionEffect, Option<&'a PolicyRule>) {
    for rule in &spec.rules {
        if rule_fires(&rule.matcher, ctx) {
            return (rule.effect, Some(rule));
        }
    }
    (spec.default_effect, None)
}

/// Evaluates every active policy version against the context, producing
/// sealed decision records ready to persist. An empty policy set yields
/// `allow` with no decisions.
pub async fn evaluate(
    store: &dyn MetaStore,
    ctx: &PolicyContext,
    run_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<EvaluationOutcome, CoreError> {
    let context_sha256 = codec::integrity_sha256(ctx)?;
    let versions = store.active_policy_versions().await?;

    let mut decisions = Vec::with_capacity(versions.len());
    for version in &versions {
        let (effect, rule) = evaluate_spec(&version.spec, ctx);
        let mut decision = PolicyDecision {
            decision_id: ids::new_id("dec"),
            run_id: run_id.map(|r| r.to_string()),
            policy_id: version.policy_id.clone(),
            policy_version_id: version.policy_version_id.clone(),
            policy_sha256: version.spec_sha256.clone(),
            context_sha256: context_sha256.clone(),
            decision: effect,
            rule_id: rule.map(|r| r.rule_id.clone()),
            reason: rule.and_then(|r| r.reason.clone()),
            created_at: at,
            integrity_sha256: String::new(),
        };
        decision.integrity_sha256 = codec::record_integrity(&decision)?;
        decisions.push(decision);
    }

    let aggregate = DecisionEffect::aggregate(decisions.iter().map(|d| d.decision));
    Ok(EvaluationOutcome {
        aggregate,
        decisions,
        context_sha256,
    })
}

/// Seals a policy spec into a version record body hash.
pub fn spec_sha256(spec: &PolicySpec) -> Result<String, CoreError> {
    Ok(codec::integrity_sha256(spec)?)
}

/// A new policy version as received from the API surface.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PolicyUpsertRequest {
    pub version: u32,
    pub status: animus_types::policy::PolicyVersionStatus,
    pub spec: PolicySpec,
}

/// Installs or replaces a policy version. Admin capability required.
pub async fn upsert_version(
    core: &crate::Core,
    actor: &animus_api::identity::Actor,
    policy_id: &str,
    request: PolicyUpsertRequest,
) -> Result<animus_types::policy::PolicyVersion, CoreError> {
    use animus_types::error::AuthError;
    use animus_types::policy::PolicyVersion;

    if !actor.is_admin() {
        return Err(AuthError::Unauthorized("policy administration requires the admin role".into()).into());
    }
    if policy_id.trim().is_empty() {
        return Err(animus_types::error::ValidationError::InvalidSpec(
            "policy id is required".into(),
        )
        .into());
    }

    let now = Utc::now();
    let mut version = PolicyVersion {
        policy_version_id: format!("{policy_id}_v{}", request.version),
        policy_id: policy_id.to_string(),
        version: request.version,
        status: request.status,
        spec_sha256: spec_sha256(&request.spec)?,
        spec: request.spec,
        created_at: now,
        integrity_sha256: String::new(),
    };
    version.integrity_sha256 = codec::record_integrity(&version)?;

    let mut tx = core.store.begin().await?;
    tx.upsert_policy_version(version.clone()).await?;
    tx.insert_audit_event(crate::audit::audit_event(
        &actor.subject,
        "policy.version_upserted",
        "policy_version",
        &version.policy_version_id,
        serde_json::json!({"policy_id": policy_id, "version": version.version}),
        now,
    )?)
    .await?;
    tx.commit().await?;
    Ok(version)
}
