//! Merge validator reports into one deterministic remediation plan.

use std::cmp::Ordering;

use serde::Serialize;

use crate::finding::{Concern, Finding};

/// Deduplicated findings, ranked by severity and split at the must-fix line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationPlan {
    pub must_fix: Vec<Finding>,
    pub optional: Vec<Finding>,
}

impl RemediationPlan {
    pub fn is_converged(&self) -> bool {
        self.must_fix.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.must_fix.is_empty() && self.optional.is_empty()
    }

    pub fn len(&self) -> usize {
        self.must_fix.len() + self.optional.len()
    }

    /// Every finding, must-fix first.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.must_fix.iter().chain(&self.optional)
    }

    /// Findings owned by `concern`, optionally including the optional bucket.
    pub fn for_concern(&self, concern: Concern, include_optional: bool) -> Vec<Finding> {
        let optional: &[Finding] = if include_optional { &self.optional } else { &[] };
        self.must_fix
            .iter()
            .chain(optional)
            .filter(|f| f.concern == concern)
            .cloned()
            .collect()
    }
}

/// Plan order: severity descending, then target, concern, description, fix.
fn plan_order(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.target.cmp(&b.target))
        .then_with(|| a.concern.cmp(&b.concern))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.fix.cmp(&b.fix))
}

fn same_discrepancy(a: &Finding, b: &Finding) -> bool {
    if a.target != b.target || a.fix != b.fix {
        return false;
    }
    a.fix.is_some() || a.description == b.description
}

/// Merge `reports`. Findings sharing a target and suggested fix collapse into
/// the most severe one; findings without a fix only collapse when their
/// descriptions match too. The result does not depend on report order.
pub fn synthesize<I>(reports: I) -> RemediationPlan
where
    I: IntoIterator<Item = Vec<Finding>>,
{
    let mut all: Vec<Finding> = reports.into_iter().flatten().collect();
    all.sort_by(plan_order);

    let mut kept: Vec<Finding> = Vec::with_capacity(all.len());
    for finding in all {
        let duplicate = kept.iter().any(|k| same_discrepancy(k, &finding));
        if !duplicate {
            kept.push(finding);
        }
    }

    let (must_fix, optional) = kept.into_iter().partition(Finding::is_must_fix);
    RemediationPlan { must_fix, optional }
}
