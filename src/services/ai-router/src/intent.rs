//! Keyword-based intent classification

use serde::Serialize;

use crate::models::ServiceType;

/// What the prompt is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    BlogWriting,
    Outreach,
    SeoOptimization,
    SocialMedia,
    ContentGeneration,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::BlogWriting => "blog-writing",
            Intent::Outreach => "outreach",
            Intent::SeoOptimization => "seo-optimization",
            Intent::SocialMedia => "social-media",
            Intent::ContentGeneration => "content-generation",
        }
    }

    /// Provider category serving this intent
    pub fn service_type(&self) -> ServiceType {
        match self {
            Intent::BlogWriting => ServiceType::BlogWriter,
            Intent::Outreach => ServiceType::Outreach,
            Intent::SeoOptimization => ServiceType::SeoOptimizer,
            Intent::SocialMedia => ServiceType::SocialMedia,
            Intent::ContentGeneration => ServiceType::ContentGenerator,
        }
    }

    /// Intent implied by an explicit service type
    pub fn from_service_type(service_type: ServiceType) -> Self {
        match service_type {
            ServiceType::BlogWriter => Intent::BlogWriting,
            ServiceType::Outreach => Intent::Outreach,
            ServiceType::SeoOptimizer => Intent::SeoOptimization,
            ServiceType::SocialMedia => Intent::SocialMedia,
            _ => Intent::ContentGeneration,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
}

// Checked in order; the first list with a hit wins.
const RULES: &[(Intent, f64, &[&str])] = &[
    (
        Intent::BlogWriting,
        0.8,
        &["blog", "article", "post", "content writing"],
    ),
    (
        Intent::Outreach,
        0.75,
        &["email", "outreach", "cold", "prospect", "follow up"],
    ),
    (
        Intent::SeoOptimization,
        0.7,
        &["seo", "keyword", "search engine", "ranking", "optimize"],
    ),
    (
        Intent::SocialMedia,
        0.7,
        &["social", "tweet", "linkedin", "instagram", "facebook"],
    ),
];

pub fn classify(prompt: &str) -> Classification {
    let prompt = prompt.to_lowercase();

    RULES
        .iter()
        .find(|(_, _, keywords)| keywords.iter().any(|keyword| prompt.contains(keyword)))
        .map(|(intent, confidence, _)| Classification {
            intent: *intent,
            confidence: *confidence,
        })
        .unwrap_or(Classification {
            intent: Intent::ContentGeneration,
            confidence: 0.5,
        })
}
