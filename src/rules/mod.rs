pub mod finding;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::ScanContext;

pub use finding::{
    Category, Impact, RecommendationInfo, RecommendationResult, RecommendationType, ServiceResult,
};

/// Detail recorded when a predicate panics.
pub const EVAL_FAILED: &str = "<evaluation failed>";

pub const CAF_URL: &str = "https://learn.microsoft.com/en-us/azure/cloud-adoption-framework/ready/azure-best-practices/resource-abbreviations";
pub const TAGS_URL: &str = "https://learn.microsoft.com/en-us/azure/azure-resource-manager/management/tag-resources?tabs=json";

/// Predicate over one resource. Plain function pointers cannot capture
/// clients or other live state.
pub type EvalFn<T> = fn(&T, &ScanContext) -> (bool, String);

/// A declarative compliance check over resources of type `T`.
pub struct Recommendation<T> {
    pub id: &'static str,
    pub resource_type: &'static str,
    pub category: Category,
    pub impact: Impact,
    pub recommendation_type: RecommendationType,
    pub recommendation: &'static str,
    pub learn_more_url: &'static str,
    pub eval: EvalFn<T>,
}

impl<T> Recommendation<T> {
    pub fn info(&self) -> RecommendationInfo {
        RecommendationInfo {
            id: self.id.to_string(),
            resource_type: self.resource_type.to_string(),
            category: self.category,
            impact: self.impact,
            recommendation_type: self.recommendation_type,
            recommendation: self.recommendation.to_string(),
            learn_more_url: self.learn_more_url.to_string(),
        }
    }
}

// Manual impls: a derive would require `T: Clone`.
impl<T> Clone for Recommendation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            resource_type: self.resource_type,
            category: self.category,
            impact: self.impact,
            recommendation_type: self.recommendation_type,
            recommendation: self.recommendation,
            learn_more_url: self.learn_more_url,
            eval: self.eval,
        }
    }
}

impl<T> std::fmt::Debug for Recommendation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recommendation")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("category", &self.category)
            .field("impact", &self.impact)
            .finish_non_exhaustive()
    }
}

/// A plugin's rule set, keyed by recommendation id.
pub type RecommendationSet<T> = BTreeMap<&'static str, Recommendation<T>>;

pub fn recommendation_set<T>(
    recommendations: impl IntoIterator<Item = Recommendation<T>>,
) -> RecommendationSet<T> {
    recommendations.into_iter().map(|r| (r.id, r)).collect()
}

pub fn describe<T>(recommendations: &RecommendationSet<T>) -> BTreeMap<String, RecommendationInfo> {
    recommendations
        .values()
        .map(|r| (r.id.to_string(), r.info()))
        .collect()
}

/// Run every recommendation once against `target`.
///
/// The output has exactly the key set of `recommendations`. A panicking
/// predicate yields a non-compliant result carrying [`EVAL_FAILED`] and the
/// remaining predicates still run.
pub fn evaluate<T>(
    recommendations: &RecommendationSet<T>,
    target: &T,
    ctx: &ScanContext,
) -> BTreeMap<String, RecommendationResult> {
    recommendations
        .values()
        .map(|rec| {
            let outcome = catch_unwind(AssertUnwindSafe(|| (rec.eval)(target, ctx)));
            let (not_compliant, result) = match outcome {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    tracing::error!(
                        recommendation = rec.id,
                        reason = %reason,
                        "recommendation predicate panicked"
                    );
                    (true, EVAL_FAILED.to_string())
                }
            };
            (
                rec.id.to_string(),
                RecommendationResult::from_info(rec.info(), not_compliant, result),
            )
        })
        .collect()
}

/// Cloud Adoption Framework abbreviation check.
pub fn caf_compliant(name: Option<&str>, abbreviation: &str) -> bool {
    name.map(|n| n.starts_with(abbreviation)).unwrap_or(false)
}
