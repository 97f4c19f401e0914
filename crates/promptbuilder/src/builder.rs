//! Deterministic prompt assembly: static instructions, tier explainer,
//! user-fact block, optional episodic injection, tiered history, current
//! message — in that fixed order, with oldest-first in-prompt degradation
//! toward tier1 when the running estimate exceeds the configured budget.

use cce_domain::turn::Turn;

use crate::injection::{
    format_current_message, format_episodic_injection, format_turn, format_user_facts,
    STATIC_INSTRUCTIONS, TIER_EXPLAINER,
};
use crate::report::PromptReport;
use crate::tokens::estimate_tokens;

pub struct PromptBuilder {
    pub token_budget: u32,
}

impl PromptBuilder {
    pub fn new(token_budget: u32) -> Self {
        Self { token_budget }
    }

    /// `turns` must already be in insertion order. `episodic_injection` is
    /// the staged block from the previous loop iteration's Action Handler,
    /// if any — consuming it here is the caller's responsibility (clear the
    /// staged slot after this call returns).
    pub fn build(
        &self,
        turns: &[Turn],
        user_facts_block: &str,
        episodic_injection: Option<&str>,
        current_user_text: &str,
    ) -> (String, PromptReport) {
        let mut effective_tiers: Vec<u8> = turns.iter().map(|t| t.required_tier).collect();

        let (mut prompt, mut tokens) =
            self.render(turns, &effective_tiers, user_facts_block, episodic_injection, current_user_text);

        let mut turns_degraded = 0;
        for i in 0..effective_tiers.len() {
            if tokens <= self.token_budget {
                break;
            }
            if effective_tiers[i] > 1 {
                effective_tiers[i] = 1;
                turns_degraded += 1;
                let (p, t) = self.render(
                    turns,
                    &effective_tiers,
                    user_facts_block,
                    episodic_injection,
                    current_user_text,
                );
                prompt = p;
                tokens = t;
            }
        }

        let report = PromptReport {
            turns_included: turns.len(),
            turns_degraded,
            user_facts_block_chars: user_facts_block.len(),
            episodic_block_chars: episodic_injection.map(str::len).unwrap_or(0),
            total_estimated_tokens: tokens,
        };

        (prompt, report)
    }

    fn render(
        &self,
        turns: &[Turn],
        effective_tiers: &[u8],
        user_facts_block: &str,
        episodic_injection: Option<&str>,
        current_user_text: &str,
    ) -> (String, u32) {
        let mut out = String::new();
        out.push_str(STATIC_INSTRUCTIONS);
        out.push('\n');
        out.push_str(TIER_EXPLAINER);

        if !user_facts_block.is_empty() {
            out.push_str(&format_user_facts(user_facts_block));
        }

        if let Some(block) = episodic_injection {
            if !block.is_empty() {
                out.push_str(&format_episodic_injection(block));
            }
        }

        for (turn, &tier) in turns.iter().zip(effective_tiers) {
            out.push_str(&format_turn(
                &turn.turn_id,
                &turn.role.to_string(),
                tier,
                turn.rendered_at(tier),
            ));
        }

        out.push_str(&format_current_message(current_user_text));

        let tokens = estimate_tokens(&out);
        (out, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cce_domain::turn::{Role, TurnMetadata};
    use chrono::Utc;

    fn turn(id: &str, tier: u8, text_tier3: &str) -> Turn {
        Turn {
            turn_id: id.into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            role: Role::User,
            tier1: "k=v".into(),
            tier2: "summary".into(),
            tier3: text_tier3.into(),
            required_tier: tier,
            created_at: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    #[test]
    fn empty_session_builds_prelude_facts_and_current_message_only() {
        let builder = PromptBuilder::new(30_000);
        let (prompt, report) = builder.build(&[], "", None, "hello");
        assert!(prompt.contains(STATIC_INSTRUCTIONS));
        assert!(prompt.contains("CURRENT_USER_MESSAGE"));
        assert!(prompt.contains("hello"));
        assert_eq!(report.turns_included, 0);
        assert_eq!(report.turns_degraded, 0);
    }

    #[test]
    fn identical_inputs_produce_byte_identical_prompts() {
        let builder = PromptBuilder::new(30_000);
        let turns = vec![turn("t1", 2, "full text one")];
        let (a, _) = builder.build(&turns, "k=v", None, "hi");
        let (b, _) = builder.build(&turns, "k=v", None, "hi");
        assert_eq!(a, b);
    }

    #[test]
    fn over_budget_degrades_oldest_turns_toward_tier1() {
        let builder = PromptBuilder::new(10);
        let turns = vec![
            turn("t1", 3, &"x".repeat(200)),
            turn("t2", 3, &"y".repeat(200)),
        ];
        let (prompt, report) = builder.build(&turns, "", None, "hi");
        assert!(report.turns_degraded > 0);
        // Degraded turns render their tier1 text, not their tier3 text.
        assert!(prompt.contains("k=v"));
    }

    #[test]
    fn never_drops_a_turn_even_when_far_over_budget() {
        let builder = PromptBuilder::new(1);
        let turns = vec![turn("t1", 3, &"z".repeat(500))];
        let (prompt, report) = builder.build(&turns, "", None, "hi");
        assert_eq!(report.turns_included, 1);
        assert!(prompt.contains("TURN: t1"));
    }

    #[test]
    fn episodic_injection_only_appears_when_provided() {
        let builder = PromptBuilder::new(30_000);
        let (without, _) = builder.build(&[], "", None, "hi");
        assert!(!without.contains("EPISODIC_CONTEXT"));
        let (with, _) = builder.build(&[], "", Some("dog's name is Rust"), "hi");
        assert!(with.contains("EPISODIC_CONTEXT"));
        assert!(with.contains("dog's name is Rust"));
    }
}
