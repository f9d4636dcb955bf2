//! Provider scoring
//!
//! Cost, performance and preference scores plus the weighted total used by
//! the scored selection strategy. Token counts are estimated at four
//! characters per token; there is no tokenizer.

use serde::Serialize;

use crate::config::ScoringWeights;
use crate::models::{Provider, RequestPreferences, RoutingPriority, ServiceMetrics};

/// Responses slower than this score zero on latency
const RESPONSE_TIME_CEILING_MS: f64 = 5000.0;
/// Estimated cost at which the cost score reaches zero
const COST_CEILING: f64 = 10.0;

/// Estimated token count of a prompt
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 + 3) / 4
}

/// Estimated cost of sending `tokens` to a provider
pub fn estimate_cost(provider: &Provider, tokens: u64) -> f64 {
    tokens as f64 * provider.pricing.cost_per_token + provider.pricing.cost_per_request
}

pub fn cost_score(estimated_cost: f64) -> f64 {
    (1.0 - estimated_cost / COST_CEILING).max(0.0)
}

/// Average of the latency score and availability
pub fn performance_score(metrics: Option<&ServiceMetrics>) -> f64 {
    let (average_response_time, availability) = metrics
        .map(|m| (m.average_response_time, m.availability))
        .unwrap_or((0.0, 1.0));

    let response_time_score =
        (1.0 - average_response_time.min(RESPONSE_TIME_CEILING_MS) / RESPONSE_TIME_CEILING_MS).max(0.0);
    (response_time_score + availability) / 2.0
}

pub fn preference_score(
    provider: &Provider,
    cost_score: f64,
    preferences: Option<&RequestPreferences>,
) -> f64 {
    let mut score: f64 = 0.5;
    let Some(preferences) = preferences else {
        return score;
    };

    if preferences.preferred_service.as_deref() == Some(provider.id.as_str()) {
        score += 0.3;
    } else {
        match preferences.priority {
            Some(RoutingPriority::Cost) if cost_score >= 0.8 => score += 0.2,
            Some(RoutingPriority::Quality)
                if provider.capabilities.quality_scores.overall >= 0.85 =>
            {
                score += 0.2
            }
            _ => {}
        }
    }

    score.min(1.0)
}

/// Score components for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub provider_id: String,
    pub quality: f64,
    pub cost: f64,
    pub performance: f64,
    pub preference: f64,
    pub total: f64,
    pub estimated_cost: f64,
}

/// Weighted provider scorer
#[derive(Debug, Clone, Default)]
pub struct ProviderScorer {
    weights: ScoringWeights,
}

impl ProviderScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        provider: &Provider,
        metrics: Option<&ServiceMetrics>,
        prompt_tokens: u64,
        preferences: Option<&RequestPreferences>,
    ) -> ScoreBreakdown {
        let estimated_cost = estimate_cost(provider, prompt_tokens);
        let quality = provider.capabilities.quality_scores.overall;
        let cost = cost_score(estimated_cost);
        let performance = performance_score(metrics);
        let preference = preference_score(provider, cost, preferences);

        let total = self.weights.quality * quality
            + self.weights.cost * cost
            + self.weights.performance * performance
            + self.weights.preference * preference;

        ScoreBreakdown {
            provider_id: provider.id.clone(),
            quality,
            cost,
            performance,
            preference,
            total,
            estimated_cost,
        }
    }

    /// Highest-scoring provider; the earliest candidate wins a tie
    pub fn best<'a, F>(
        &self,
        candidates: &'a [Provider],
        metrics_for: F,
        prompt_tokens: u64,
        preferences: Option<&RequestPreferences>,
    ) -> Option<(&'a Provider, ScoreBreakdown)>
    where
        F: Fn(&str) -> Option<ServiceMetrics>,
    {
        let mut best: Option<(&'a Provider, ScoreBreakdown)> = None;

        for provider in candidates {
            let metrics = metrics_for(&provider.id);
            let breakdown = self.score(provider, metrics.as_ref(), prompt_tokens, preferences);
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| breakdown.total > current.total);
            if better {
                best = Some((provider, breakdown));
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceType;
    use crate::registry::tests::test_provider;

    fn metrics(average_response_time: f64, availability: f64) -> ServiceMetrics {
        ServiceMetrics {
            average_response_time,
            availability,
            ..Default::default()
        }
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("Write a blog about coffee"), 7);
    }

    #[test]
    fn test_cost_score_floor() {
        assert_eq!(cost_score(0.0), 1.0);
        assert!((cost_score(2.5) - 0.75).abs() < 1e-9);
        assert_eq!(cost_score(25.0), 0.0);
    }

    #[test]
    fn test_performance_score() {
        assert_eq!(performance_score(None), 1.0);
        assert!((performance_score(Some(&metrics(2500.0, 1.0))) - 0.75).abs() < 1e-9);
        assert!((performance_score(Some(&metrics(9000.0, 0.5))) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_preference_score() {
        let provider = test_provider("a", ServiceType::BlogWriter);

        assert_eq!(preference_score(&provider, 1.0, None), 0.5);

        let preferred = RequestPreferences {
            preferred_service: Some("a".to_string()),
            priority: Some(RoutingPriority::Cost),
        };
        assert!((preference_score(&provider, 1.0, Some(&preferred)) - 0.8).abs() < 1e-9);

        let cheap = RequestPreferences {
            preferred_service: None,
            priority: Some(RoutingPriority::Cost),
        };
        assert!((preference_score(&provider, 0.9, Some(&cheap)) - 0.7).abs() < 1e-9);
        assert_eq!(preference_score(&provider, 0.5, Some(&cheap)), 0.5);

        let quality = RequestPreferences {
            preferred_service: None,
            priority: Some(RoutingPriority::Quality),
        };
        assert!((preference_score(&provider, 0.5, Some(&quality)) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_total() {
        let scorer = ProviderScorer::default();
        let provider = test_provider("a", ServiceType::BlogWriter);
        let breakdown = scorer.score(&provider, Some(&metrics(0.0, 1.0)), 0, None);

        let expected = 0.3 * 0.86 + 0.25 * 1.0 + 0.25 * 1.0 + 0.2 * 0.5;
        assert!((breakdown.total - expected).abs() < 1e-9);
    }

    #[test]
    fn test_lower_latency_wins_at_equal_quality() {
        let scorer = ProviderScorer::default();
        let candidates = vec![
            test_provider("slow", ServiceType::BlogWriter),
            test_provider("fast", ServiceType::BlogWriter),
        ];

        let (winner, breakdown) = scorer
            .best(
                &candidates,
                |id| {
                    Some(if id == "slow" {
                        metrics(1000.0, 1.0)
                    } else {
                        metrics(500.0, 1.0)
                    })
                },
                10,
                None,
            )
            .unwrap();

        assert_eq!(winner.id, "fast");
        assert_eq!(breakdown.provider_id, "fast");
    }

    #[test]
    fn test_first_candidate_wins_tie() {
        let scorer = ProviderScorer::default();
        let candidates = vec![
            test_provider("first", ServiceType::BlogWriter),
            test_provider("second", ServiceType::BlogWriter),
        ];

        let (winner, _) = scorer.best(&candidates, |_| None, 10, None).unwrap();
        assert_eq!(winner.id, "first");
    }
}
