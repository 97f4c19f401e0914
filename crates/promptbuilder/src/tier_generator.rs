//! Produces `(tier1, tier2)` from a turn's `tier3` body. Delegates to the
//! configured LLM Provider via a structured sub-prompt when one is
//! available, falling back to a rule-based generator on any LLM error or
//! unparsable reply. Never fails the enclosing request — the fallback
//! always produces usable output. Results are cached per `turn_id` so
//! repeated renders within a process run are deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use cce_domain::cancel::CancelToken;
use cce_domain::turn::Role;
use cce_providers::{CompleteOptions, LlmProvider};
use parking_lot::Mutex;

const MAX_TIER1_WORDS: usize = 20;
const MAX_TIER1_CHARS: usize = 200;

pub struct GeneratedTiers {
    pub tier1: String,
    pub tier2: String,
    /// Set when the LLM path was unavailable, errored, or produced an
    /// unparsable reply and the rule-based fallback was used instead.
    pub fallback_used: bool,
}

pub struct TierGenerator {
    llm: Option<Arc<dyn LlmProvider>>,
    cache: Mutex<HashMap<String, (String, String)>>,
}

impl TierGenerator {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            llm,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn generate(
        &self,
        turn_id: &str,
        tier3: &str,
        role: Role,
        cancel: &CancelToken,
    ) -> GeneratedTiers {
        if let Some((tier1, tier2)) = self.cache.lock().get(turn_id).cloned() {
            return GeneratedTiers {
                tier1,
                tier2,
                fallback_used: false,
            };
        }

        let (tier1, tier2, fallback_used) = match &self.llm {
            Some(llm) => match self.try_llm(llm, tier3, role, cancel).await {
                Some((t1, t2)) => (t1, t2, false),
                None => {
                    let (t1, t2) = rule_based(tier3);
                    (t1, t2, true)
                }
            },
            None => {
                let (t1, t2) = rule_based(tier3);
                (t1, t2, true)
            }
        };

        self.cache
            .lock()
            .insert(turn_id.to_string(), (tier1.clone(), tier2.clone()));

        GeneratedTiers {
            tier1,
            tier2,
            fallback_used,
        }
    }

    async fn try_llm(
        &self,
        llm: &Arc<dyn LlmProvider>,
        tier3: &str,
        role: Role,
        cancel: &CancelToken,
    ) -> Option<(String, String)> {
        let prompt = format!(
            "Summarize the following {role} turn into exactly two labeled lines.\n\
             TIER1: a compact shorthand of at most {MAX_TIER1_WORDS} words.\n\
             TIER2: a one-to-two sentence summary.\n\
             Respond with only those two lines, nothing else.\n\n\
             --- BEGIN TURN TEXT ---\n{tier3}\n--- END TURN TEXT ---"
        );

        let reply = llm
            .complete(&prompt, &CompleteOptions::default(), cancel)
            .await
            .ok()?;

        parse_tier_reply(&reply)
    }
}

fn parse_tier_reply(reply: &str) -> Option<(String, String)> {
    let mut tier1 = None;
    let mut tier2 = None;
    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("TIER1:") {
            tier1 = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("TIER2:") {
            tier2 = Some(rest.trim().to_string());
        }
    }
    match (tier1, tier2) {
        (Some(t1), Some(t2)) if !t1.is_empty() && !t2.is_empty() => Some((t1, t2)),
        _ => None,
    }
}

/// `tier1 = first-N-words`, `tier2 = first-sentence`, per the contract's
/// rule-based fallback.
fn rule_based(tier3: &str) -> (String, String) {
    let words: Vec<&str> = tier3.split_whitespace().take(MAX_TIER1_WORDS).collect();
    let mut tier1 = words.join(" ");
    if tier1.len() > MAX_TIER1_CHARS {
        let boundary = (0..=MAX_TIER1_CHARS.min(tier1.len()))
            .rev()
            .find(|&i| tier1.is_char_boundary(i))
            .unwrap_or(0);
        tier1.truncate(boundary);
    }
    if tier1.is_empty() {
        tier1 = "(empty)".to_string();
    }

    let first_sentence_end = tier3
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(tier3.len());
    let mut tier2 = tier3[..first_sentence_end].trim().to_string();
    if tier2.is_empty() {
        tier2 = tier1.clone();
    }

    (tier1, tier2)
}
