//! Threshold heuristics over live resource readings

use crate::config::PredictionRules;
use crate::models::{Prediction, SystemSnapshot};
use serde_json::json;

/// Emit one prediction for every rule whose resource is above its threshold.
///
/// Rules are evaluated independently of the health score and in order.
pub fn evaluate_predictions(snapshot: &SystemSnapshot, rules: &PredictionRules) -> Vec<Prediction> {
    rules
        .rules
        .iter()
        .filter_map(|rule| {
            let value = rule.resource.read(snapshot);
            (value > rule.above).then(|| {
                Prediction::new(
                    rule.kind.clone(),
                    json!({
                        "metric": rule.resource.to_string(),
                        "value": value,
                        "threshold": rule.above,
                        "severity": rule.severity,
                        "message": format!(
                            "{} usage at {:.1}% exceeds {:.1}%",
                            rule.resource, value, rule.above
                        ),
                    }),
                    rule.confidence,
                )
            })
        })
        .collect()
}
