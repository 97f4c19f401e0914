//! Conversation Orchestrator: the per-turn procedure that ties the Tier
//! Store, Tier Generator, Prompt Builder, Action Handler and Pruner
//! together. Conceptually one instance exists per `(user_id, session_id)`;
//! in practice the type below is stateless and shared, since `loop_count`
//! and the staged injection block are local to a single `run_turn` call —
//! the Session Manager's lock map is what actually enforces "at most one
//! turn in flight per session at a time."

use std::sync::Arc;
use std::time::Duration;

use cce_domain::cancel::CancelToken;
use cce_domain::error::Result;
use cce_domain::trace::TraceEvent;
use cce_domain::turn::{ChatStatus, Role, Turn, TurnMetadata};
use cce_memory::UserFactStore;
use cce_promptbuilder::{PromptBuilder, TierGenerator};
use cce_providers::{CompleteOptions, LlmProvider};
use cce_sessions::{SessionRegistry, TierStore};
use chrono::Utc;

use crate::action_handler::{ActionHandler, AnswerFields, Outcome as ActionOutcome};
use crate::pruner::Pruner;

pub struct TurnResult {
    pub assistant_text: String,
    pub status: ChatStatus,
}

pub struct Orchestrator {
    tier_store: Arc<TierStore>,
    user_fact_store: Arc<UserFactStore>,
    session_registry: Arc<SessionRegistry>,
    tier_generator: Arc<TierGenerator>,
    prompt_builder: Arc<PromptBuilder>,
    action_handler: Arc<ActionHandler>,
    pruner: Arc<Pruner>,
    llm: Arc<dyn LlmProvider>,
    llm_call_timeout: Duration,
    prompt_token_budget: u32,
    max_loop: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tier_store: Arc<TierStore>,
        user_fact_store: Arc<UserFactStore>,
        session_registry: Arc<SessionRegistry>,
        tier_generator: Arc<TierGenerator>,
        prompt_builder: Arc<PromptBuilder>,
        action_handler: Arc<ActionHandler>,
        pruner: Arc<Pruner>,
        llm: Arc<dyn LlmProvider>,
        llm_call_timeout: Duration,
        prompt_token_budget: u32,
        max_loop: u32,
    ) -> Self {
        Self {
            tier_store,
            user_fact_store,
            session_registry,
            tier_generator,
            prompt_builder,
            action_handler,
            pruner,
            llm,
            llm_call_timeout,
            prompt_token_budget,
            max_loop,
        }
    }

    pub async fn run_turn(
        &self,
        user_id: &str,
        session_id: &str,
        user_text: &str,
        cancel: &CancelToken,
    ) -> Result<TurnResult> {
        let user_turn_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "turn",
            user_id = %user_id,
            session_id = %session_id,
            turn_id = %user_turn_id,
            loop_count = tracing::field::Empty,
        );
        let _enter = span.enter();

        let gen = self
            .tier_generator
            .generate(&user_turn_id, user_text, Role::User, cancel)
            .await;
        let user_turn = Turn {
            turn_id: user_turn_id.clone(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role: Role::User,
            tier1: gen.tier1,
            tier2: gen.tier2,
            tier3: user_text.to_string(),
            required_tier: 1,
            created_at: Utc::now(),
            metadata: TurnMetadata {
                tier_fallback: gen.fallback_used,
                ..Default::default()
            },
        };
        self.tier_store.append(session_id, user_turn.clone())?;
        self.session_registry
            .set_title_if_absent(user_id, session_id, user_text);
        TraceEvent::TurnIngested {
            session_id: session_id.to_string(),
            turn_id: user_turn_id.clone(),
            role: "user".to_string(),
            tier_fallback: user_turn.metadata.tier_fallback,
        }
        .emit();

        self.pruner.prune(user_id, session_id, self.prompt_token_budget)?;

        let mut loop_count: u32 = 0;
        let mut staged_injection: Option<String> = None;

        loop {
            span.record("loop_count", loop_count);

            if cancel.is_cancelled() {
                return Ok(self.finish_as_error(user_id, session_id, "cancelled"));
            }

            let turns = self.tier_store.list(session_id);
            let user_facts_block = self.user_fact_store.render_block(user_id);
            let (prompt, report) = self.prompt_builder.build(
                &turns,
                &user_facts_block,
                staged_injection.as_deref(),
                user_text,
            );
            staged_injection = None;

            TraceEvent::PromptBuilt {
                session_id: session_id.to_string(),
                turn_id: user_turn_id.clone(),
                estimated_tokens: report.total_estimated_tokens as usize,
                turns_included: report.turns_included,
                turns_degraded: report.turns_degraded,
            }
            .emit();

            let reply = match tokio::time::timeout(
                self.llm_call_timeout,
                self.llm.complete(&prompt, &CompleteOptions::default(), cancel),
            )
            .await
            {
                Err(_elapsed) => {
                    TraceEvent::LlmCallFailed {
                        session_id: session_id.to_string(),
                        provider: self.llm.provider_id().to_string(),
                        reason: "timeout".to_string(),
                    }
                    .emit();
                    return Ok(self.finish_as_error(user_id, session_id, "llm call timed out"));
                }
                Ok(Err(e)) => {
                    TraceEvent::LlmCallFailed {
                        session_id: session_id.to_string(),
                        provider: self.llm.provider_id().to_string(),
                        reason: e.to_string(),
                    }
                    .emit();
                    return Ok(self.finish_as_error(user_id, session_id, &e.to_string()));
                }
                Ok(Ok(text)) => text,
            };

            if cancel.is_cancelled() {
                return Ok(self.finish_as_error(user_id, session_id, "cancelled"));
            }

            let outcome = self
                .action_handler
                .handle(&reply, user_id, session_id, cancel)
                .await;

            match outcome {
                ActionOutcome::Answer(fields) => {
                    return self
                        .finalize_answer(user_id, session_id, &user_turn_id, fields, cancel, false)
                        .await;
                }
                ActionOutcome::Reprompt { injection } => {
                    loop_count += 1;
                    if loop_count > self.max_loop {
                        let fields = AnswerFields {
                            tier3: reply,
                            direct_tier1_tier2: None,
                            parse_fallback: true,
                            contains_search_results: false,
                        };
                        return self
                            .finalize_answer(user_id, session_id, &user_turn_id, fields, cancel, true)
                            .await;
                    }
                    staged_injection = injection;
                }
                ActionOutcome::Fail(reason) => {
                    return Ok(self.finish_as_error(user_id, session_id, &reason));
                }
            }
        }
    }

    async fn finalize_answer(
        &self,
        user_id: &str,
        session_id: &str,
        _parent_turn_id: &str,
        fields: AnswerFields,
        cancel: &CancelToken,
        forced_break: bool,
    ) -> Result<TurnResult> {
        let assistant_turn_id = uuid::Uuid::new_v4().to_string();
        let (tier1, tier2, tier_fallback) = match fields.direct_tier1_tier2 {
            Some((t1, t2)) => (t1, t2, false),
            None => {
                let gen = self
                    .tier_generator
                    .generate(&assistant_turn_id, &fields.tier3, Role::Assistant, cancel)
                    .await;
                (gen.tier1, gen.tier2, gen.fallback_used)
            }
        };

        let turn = Turn {
            turn_id: assistant_turn_id,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role: Role::Assistant,
            tier1,
            tier2,
            tier3: fields.tier3.clone(),
            required_tier: 1,
            created_at: Utc::now(),
            metadata: TurnMetadata {
                contains_search_results: fields.contains_search_results,
                forced_break,
                tier_fallback,
                parse_fallback: fields.parse_fallback,
            },
        };
        self.tier_store.append(session_id, turn)?;
        self.session_registry.touch(user_id, session_id);

        Ok(TurnResult {
            assistant_text: fields.tier3,
            status: if forced_break {
                ChatStatus::ForcedBreak
            } else {
                ChatStatus::Ok
            },
        })
    }

    fn finish_as_error(&self, user_id: &str, session_id: &str, reason: &str) -> TurnResult {
        self.session_registry.touch(user_id, session_id);
        TurnResult {
            assistant_text: reason.to_string(),
            status: ChatStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cce_memory::EpisodicStore;
    use cce_providers::SearchProvider;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Always replies with a `[SEARCH_EPISODIC:]` directive, forcing the
    /// Action Handler to return `Reprompt` on every call regardless of
    /// what the (empty) episodic store holds.
    struct AlwaysReprompt {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LlmProvider for AlwaysReprompt {
        async fn complete(
            &self,
            _prompt: &str,
            _opts: &CompleteOptions,
            _cancel: &CancelToken,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("[SEARCH_EPISODIC: anything]".to_string())
        }

        fn provider_id(&self) -> &str {
            "stub-always-reprompt"
        }
    }

    fn setup(max_loop: u32) -> (Orchestrator, Arc<AlwaysReprompt>) {
        let dir = tempfile::tempdir().unwrap();
        let tier_store = Arc::new(TierStore::open(&dir.path().join("tiers")).unwrap());
        let user_fact_store = Arc::new(UserFactStore::open(&dir.path().join("facts")).unwrap());
        let session_registry = Arc::new(SessionRegistry::open(&dir.path().join("sessions")).unwrap());
        let episodic_store = Arc::new(EpisodicStore::open(&dir.path().join("episodes")).unwrap());
        std::mem::forget(dir);

        let tier_generator = Arc::new(TierGenerator::new(None));
        let prompt_builder = Arc::new(PromptBuilder::new(4_000));
        let search: Option<Arc<dyn SearchProvider>> = None;
        let action_handler = Arc::new(ActionHandler::new(
            search,
            tier_store.clone(),
            user_fact_store.clone(),
            episodic_store.clone(),
        ));
        let pruner = Arc::new(Pruner::new(tier_store.clone(), episodic_store, 5, 0));
        let llm = Arc::new(AlwaysReprompt { calls: AtomicU32::new(0) });

        let orchestrator = Orchestrator::new(
            tier_store,
            user_fact_store,
            session_registry,
            tier_generator,
            prompt_builder,
            action_handler,
            pruner,
            llm.clone(),
            Duration::from_secs(5),
            4_000,
            max_loop,
        );
        (orchestrator, llm)
    }

    /// Scenario: with `max_loop=2`, a reply that always reprompts must still
    /// produce exactly 3 LLM calls (the initial call plus 2 re-prompts)
    /// before the loop bound forces a break.
    #[tokio::test]
    async fn max_loop_two_yields_exactly_three_llm_calls() {
        let (orchestrator, llm) = setup(2);
        let cancel = CancelToken::new();
        let result = orchestrator
            .run_turn("u1", "s1", "hello", &cancel)
            .await
            .unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result.status, ChatStatus::ForcedBreak));
    }

    #[tokio::test]
    async fn max_loop_zero_still_makes_one_llm_call() {
        let (orchestrator, llm) = setup(0);
        let cancel = CancelToken::new();
        let result = orchestrator
            .run_turn("u1", "s1", "hello", &cancel)
            .await
            .unwrap();
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.status, ChatStatus::ForcedBreak));
    }
}
