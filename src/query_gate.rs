//! Keeps off-topic questions away from the answer model.
//!
//! A cheap keyword pass accepts most in-domain questions without any external
//! call. Questions that miss every keyword go to the model with a yes/no
//! classification prompt, which catches paraphrases like "What is a googly?".

use std::time::Duration;

use tracing::{debug, warn};

use crate::llm::TextGenerator;
use crate::{Error, Result};

/// Everything that ties the gate and the answer prompts to one topic.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub keywords: Vec<String>,
    /// `{query}` is replaced with the user's question.
    pub classifier_prompt: String,
    pub affirmative_token: String,
    pub rejection_message: String,
    /// `{context}` and `{query}` are replaced.
    pub answer_prompt: String,
    /// Used when retrieval produced no context. `{query}` is replaced.
    pub answer_prompt_without_context: String,
    /// Returned instead of an answer when generation fails.
    pub fallback_response: String,
}

const CRICKET_KEYWORDS: &[&str] = &[
    "cricket", "bat", "ball", "wicket", "run", "over", "innings", "bowler",
    "batsman", "batter", "fielder", "umpire", "test match", "odi", "t20",
    "ipl", "world cup", "stadium", "pitch", "boundary", "six", "four",
    "lbw", "catch", "stump", "bail", "crease", "spinner", "fast bowler",
    "all-rounder", "captain", "team", "series", "tournament", "player",
    "score", "century", "half-century", "maiden", "no-ball", "wide",
    "bcci", "icc", "match", "game", "sport",
];

const CRICKET_ONLY: &str = "Sorry, I can only answer questions related to cricket. Please ask about cricket players, matches, rules, statistics, or anything related to the sport of cricket.";

impl DomainConfig {
    pub fn cricket() -> Self {
        Self {
            keywords: CRICKET_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            classifier_prompt: "You are a classifier that determines if a question is related to cricket (the sport).\n\n\
                Question: \"{query}\"\n\n\
                Respond with ONLY \"YES\" if the question is about cricket (players, matches, rules, history, statistics, teams, tournaments, equipment, etc.) or \"NO\" if it's about something else.\n\n\
                Response:"
                .to_string(),
            affirmative_token: "YES".to_string(),
            rejection_message: CRICKET_ONLY.to_string(),
            answer_prompt: "You are a cricket expert assistant. Based on the following cricket context: \"{context}\"\n\n\
                Question: \"{query}\"\n\n\
                Provide a helpful and accurate response about cricket. Stay focused on cricket-related information only."
                .to_string(),
            answer_prompt_without_context: "You are a cricket expert assistant. Answer this cricket question: \"{query}\"\n\n\
                Provide a helpful and informative response about cricket. Stay focused on cricket-related information only."
                .to_string(),
            fallback_response: CRICKET_ONLY.to_string(),
        }
    }

    pub fn render_answer_prompt(&self, query: &str, context: &str) -> String {
        if context.is_empty() {
            self.answer_prompt_without_context.replace("{query}", query)
        } else {
            self.answer_prompt
                .replace("{context}", context)
                .replace("{query}", query)
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self::cricket()
    }
}

pub struct DomainGate {
    config: DomainConfig,
    lowered_keywords: Vec<String>,
    timeout: Duration,
}

impl DomainGate {
    pub fn new(config: DomainConfig, timeout: Duration) -> Self {
        let lowered_keywords = config.keywords.iter().map(|k| k.to_lowercase()).collect();
        Self {
            config,
            lowered_keywords,
            timeout,
        }
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Stage one: case-insensitive substring match against the keyword list.
    pub fn matches_keyword(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.lowered_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Both stages. The classifier only runs when no keyword matched.
    ///
    /// A failed or timed-out classifier leaves the keyword verdict standing,
    /// which at that point is a rejection.
    pub async fn is_in_domain(&self, text: &str, classifier: &dyn TextGenerator) -> bool {
        if self.matches_keyword(text) {
            debug!("query accepted by keyword match");
            return true;
        }

        let prompt = self.config.classifier_prompt.replace("{query}", text);
        match tokio::time::timeout(self.timeout, classifier.generate(&prompt)).await {
            Ok(Ok(answer)) => {
                let accepted = answer
                    .trim()
                    .to_uppercase()
                    .contains(&self.config.affirmative_token.to_uppercase());
                debug!(accepted, "query classified by model");
                accepted
            }
            Ok(Err(e)) => {
                warn!(error = %e, "domain classifier failed, keeping keyword verdict");
                false
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "domain classifier timed out, keeping keyword verdict");
                false
            }
        }
    }

    pub async fn ensure_in_domain(&self, text: &str, classifier: &dyn TextGenerator) -> Result<()> {
        if self.is_in_domain(text, classifier).await {
            Ok(())
        } else {
            Err(Error::OutOfDomain(self.config.rejection_message.clone()))
        }
    }
}
