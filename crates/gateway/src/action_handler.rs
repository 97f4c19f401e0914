//! Parses directives out of an LLM reply and decides the next step: answer,
//! reprompt (after performing the interrupting directive's side effect), or
//! fail. Non-interrupting directives (`REMEMBER`/`FORGET`) are applied
//! unconditionally before that decision is made; interrupting directives
//! (`SEARCH`/`REQUEST_TIER`/`SEARCH_EPISODIC`) take priority over a plain
//! answer, and the first one by text offset wins when more than one appears.

use std::sync::Arc;
use std::sync::OnceLock;

use cce_domain::cancel::CancelToken;
use cce_memory::{EpisodicStore, UserFactStore};
use cce_providers::SearchProvider;
use cce_sessions::TierStore;
use cce_sessions::tier_store::LookupOutcome;
use regex::Regex;

const EPISODIC_SEARCH_K: usize = 3;

pub struct AnswerFields {
    pub tier3: String,
    /// Present when the reply carried all three labeled fields directly;
    /// absent when the reply had to be treated as raw tier3 text.
    pub direct_tier1_tier2: Option<(String, String)>,
    pub parse_fallback: bool,
    /// Set when this answer was produced directly from search results
    /// rather than the model's own reply text.
    pub contains_search_results: bool,
}

pub enum Outcome {
    Answer(AnswerFields),
    Reprompt { injection: Option<String> },
    Fail(String),
}

enum Directive {
    Search(String),
    RequestTier(u8, String),
    SearchEpisodic(String),
    Remember(String),
    Forget(String),
}

impl Directive {
    fn is_interrupting(&self) -> bool {
        matches!(
            self,
            Directive::Search(_) | Directive::RequestTier(_, _) | Directive::SearchEpisodic(_)
        )
    }
}

pub struct ActionHandler {
    search: Option<Arc<dyn SearchProvider>>,
    tier_store: Arc<TierStore>,
    user_facts: Arc<UserFactStore>,
    episodic: Arc<EpisodicStore>,
}

impl ActionHandler {
    pub fn new(
        search: Option<Arc<dyn SearchProvider>>,
        tier_store: Arc<TierStore>,
        user_facts: Arc<UserFactStore>,
        episodic: Arc<EpisodicStore>,
    ) -> Self {
        Self {
            search,
            tier_store,
            user_facts,
            episodic,
        }
    }

    pub async fn handle(
        &self,
        reply: &str,
        user_id: &str,
        session_id: &str,
        cancel: &CancelToken,
    ) -> Outcome {
        let directives = parse_directives(reply);

        for (_, directive) in &directives {
            match directive {
                Directive::Remember(fact) => self.apply_remember(user_id, fact),
                Directive::Forget(target) => {
                    let _ = self.user_facts.forget(user_id, target);
                }
                _ => {}
            }
        }

        if let Some((_, directive)) = directives.iter().find(|(_, d)| d.is_interrupting()) {
            return match directive {
                Directive::Search(query) => self.handle_search(query, cancel).await,
                Directive::SearchEpisodic(query) => self.handle_search_episodic(user_id, query),
                Directive::RequestTier(tier, turn_id) => {
                    self.handle_request_tier(session_id, *tier, turn_id)
                }
                Directive::Remember(_) | Directive::Forget(_) => unreachable!(),
            };
        }

        Outcome::Answer(parse_answer(reply))
    }

    /// `SEARCH` is answered directly from the search collaborator's result:
    /// the Action Handler calls it exactly once and returns an answer, never
    /// a reprompt, so no second LLM call is made for a search turn.
    async fn handle_search(&self, query: &str, cancel: &CancelToken) -> Outcome {
        let Some(search) = &self.search else {
            return Outcome::Fail("a [SEARCH:] directive was issued but no search provider is configured".into());
        };
        match search.search(query, cancel).await {
            Ok(hits) if hits.is_empty() => Outcome::Answer(AnswerFields {
                tier3: format!("No search results were found for: {query}"),
                direct_tier1_tier2: None,
                parse_fallback: true,
                contains_search_results: true,
            }),
            Ok(hits) => {
                let block = hits
                    .iter()
                    .map(|h| format!("{} — {}\n{}", h.title, h.url, h.snippet))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Outcome::Answer(AnswerFields {
                    tier3: block,
                    direct_tier1_tier2: None,
                    parse_fallback: true,
                    contains_search_results: true,
                })
            }
            Err(e) => Outcome::Fail(e.to_string()),
        }
    }

    fn handle_search_episodic(&self, user_id: &str, query: &str) -> Outcome {
        let hits = self.episodic.search(user_id, query, EPISODIC_SEARCH_K);
        let block = if hits.is_empty() {
            format!("No archived context was found for: {query}")
        } else {
            hits.iter()
                .map(|e| e.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        Outcome::Reprompt {
            injection: Some(block),
        }
    }

    fn handle_request_tier(&self, session_id: &str, tier: u8, turn_id: &str) -> Outcome {
        match self.tier_store.set_required_tier(session_id, turn_id, tier) {
            Ok(LookupOutcome::Ok) => Outcome::Reprompt { injection: None },
            Ok(LookupOutcome::NotFound) => {
                Outcome::Fail(format!("[REQUEST_TIER:] referenced unknown turn_id {turn_id}"))
            }
            Err(e) => Outcome::Fail(e.to_string()),
        }
    }

    fn apply_remember(&self, user_id: &str, fact: &str) {
        let (key, value) = derive_key_value(fact);
        let _ = self.user_facts.upsert(user_id, &key, &value);
    }
}

fn derive_key_value(fact: &str) -> (String, String) {
    if let Some((key, value)) = fact.split_once(':') {
        let key = key.trim();
        if !key.is_empty() && key.len() <= 40 {
            return (slugify(key), value.trim().to_string());
        }
    }
    (slugify(fact), fact.trim().to_string())
}

fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "fact".to_string()
    } else {
        slug
    }
}

fn parse_answer(reply: &str) -> AnswerFields {
    match parse_labeled_fields(reply) {
        Some((tier1, tier2, tier3)) => AnswerFields {
            tier3,
            direct_tier1_tier2: Some((tier1, tier2)),
            parse_fallback: false,
            contains_search_results: false,
        },
        None => AnswerFields {
            tier3: reply.trim().to_string(),
            direct_tier1_tier2: None,
            parse_fallback: true,
            contains_search_results: false,
        },
    }
}

fn parse_labeled_fields(reply: &str) -> Option<(String, String, String)> {
    let mut tier1 = None;
    let mut tier2 = None;
    let mut tier3 = None;
    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("tier1:").or_else(|| line.strip_prefix("TIER1:")) {
            tier1 = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("tier2:").or_else(|| line.strip_prefix("TIER2:")) {
            tier2 = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("tier3:").or_else(|| line.strip_prefix("TIER3:")) {
            tier3 = Some(rest.trim().to_string());
        }
    }
    match (tier1, tier2, tier3) {
        (Some(t1), Some(t2), Some(t3)) if !t1.is_empty() && !t2.is_empty() && !t3.is_empty() => {
            Some((t1, t2, t3))
        }
        _ => None,
    }
}

fn search_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[SEARCH:\s*([^\]]*)\]").unwrap())
}

fn request_tier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[REQUEST_TIER:\s*(\d+)\s*:\s*([^\]]+)\]").unwrap())
}

fn search_episodic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[SEARCH_EPISODIC:\s*([^\]]*)\]").unwrap())
}

fn remember_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[REMEMBER:\s*([^\]]*)\]").unwrap())
}

fn forget_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[FORGET:\s*([^\]]*)\]").unwrap())
}

fn parse_directives(reply: &str) -> Vec<(usize, Directive)> {
    let mut found = Vec::new();

    for caps in search_re().captures_iter(reply) {
        let m = caps.get(0).unwrap();
        found.push((m.start(), Directive::Search(caps[1].trim().to_string())));
    }
    for caps in request_tier_re().captures_iter(reply) {
        let m = caps.get(0).unwrap();
        if let Ok(tier) = caps[1].parse::<u8>() {
            found.push((
                m.start(),
                Directive::RequestTier(tier.clamp(1, 3), caps[2].trim().to_string()),
            ));
        }
    }
    for caps in search_episodic_re().captures_iter(reply) {
        let m = caps.get(0).unwrap();
        found.push((m.start(), Directive::SearchEpisodic(caps[1].trim().to_string())));
    }
    for caps in remember_re().captures_iter(reply) {
        let m = caps.get(0).unwrap();
        found.push((m.start(), Directive::Remember(caps[1].trim().to_string())));
    }
    for caps in forget_re().captures_iter(reply) {
        let m = caps.get(0).unwrap();
        found.push((m.start(), Directive::Forget(caps[1].trim().to_string())));
    }

    found.sort_by_key(|(offset, _)| *offset);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use cce_domain::turn::{Role, Turn, TurnMetadata};
    use cce_providers::SearchHit;
    use chrono::Utc;

    struct StubSearch(Vec<SearchHit>);

    #[async_trait::async_trait]
    impl SearchProvider for StubSearch {
        async fn search(&self, _query: &str, _cancel: &CancelToken) -> cce_domain::error::Result<Vec<SearchHit>> {
            Ok(self.0.clone())
        }
    }

    fn store() -> (Arc<TierStore>, Arc<UserFactStore>, Arc<EpisodicStore>) {
        let dir = tempfile::tempdir().unwrap();
        let tier = Arc::new(TierStore::open(&dir.path().join("tiers")).unwrap());
        let facts = Arc::new(UserFactStore::open(&dir.path().join("facts")).unwrap());
        let episodic = Arc::new(EpisodicStore::open(&dir.path().join("episodes")).unwrap());
        std::mem::forget(dir);
        (tier, facts, episodic)
    }

    fn turn(id: &str) -> Turn {
        Turn {
            turn_id: id.into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            role: Role::User,
            tier1: "k=v".into(),
            tier2: "summary".into(),
            tier3: "full text".into(),
            required_tier: 1,
            created_at: Utc::now(),
            metadata: TurnMetadata::default(),
        }
    }

    #[tokio::test]
    async fn plain_reply_with_labeled_fields_is_an_answer() {
        let (tier, facts, episodic) = store();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        let reply = "TIER1: short\nTIER2: a summary.\nTIER3: the full answer text.";
        match handler.handle(reply, "u1", "s1", &cancel).await {
            Outcome::Answer(fields) => {
                assert_eq!(fields.tier3, "the full answer text.");
                assert!(!fields.parse_fallback);
                assert_eq!(fields.direct_tier1_tier2, Some(("short".into(), "a summary.".into())));
            }
            _ => panic!("expected an answer"),
        }
    }

    #[tokio::test]
    async fn unlabeled_reply_falls_back_to_raw_text() {
        let (tier, facts, episodic) = store();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        match handler.handle("just a plain reply", "u1", "s1", &cancel).await {
            Outcome::Answer(fields) => {
                assert_eq!(fields.tier3, "just a plain reply");
                assert!(fields.parse_fallback);
                assert!(fields.direct_tier1_tier2.is_none());
            }
            _ => panic!("expected an answer"),
        }
    }

    #[tokio::test]
    async fn search_without_provider_fails() {
        let (tier, facts, episodic) = store();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        match handler.handle("[SEARCH: weather today]", "u1", "s1", &cancel).await {
            Outcome::Fail(_) => {}
            _ => panic!("expected fail"),
        }
    }

    #[tokio::test]
    async fn search_with_hits_answers_directly_without_reprompt() {
        let (tier, facts, episodic) = store();
        let search: Arc<dyn SearchProvider> = Arc::new(StubSearch(vec![SearchHit {
            title: "Weather".into(),
            url: "https://example.com/weather".into(),
            snippet: "Sunny, 72F.".into(),
        }]));
        let handler = ActionHandler::new(Some(search), tier, facts, episodic);
        let cancel = CancelToken::new();
        match handler.handle("[SEARCH: weather today]", "u1", "s1", &cancel).await {
            Outcome::Answer(fields) => {
                assert!(fields.contains_search_results);
                assert!(fields.tier3.contains("Sunny, 72F."));
            }
            _ => panic!("expected search to answer directly, not reprompt"),
        }
    }

    #[tokio::test]
    async fn search_with_no_hits_answers_directly_without_reprompt() {
        let (tier, facts, episodic) = store();
        let search: Arc<dyn SearchProvider> = Arc::new(StubSearch(vec![]));
        let handler = ActionHandler::new(Some(search), tier, facts, episodic);
        let cancel = CancelToken::new();
        match handler.handle("[SEARCH: weather today]", "u1", "s1", &cancel).await {
            Outcome::Answer(fields) => {
                assert!(fields.contains_search_results);
                assert!(fields.tier3.contains("weather today"));
            }
            _ => panic!("expected search to answer directly even with no hits"),
        }
    }

    #[tokio::test]
    async fn request_tier_escalates_and_reprompts() {
        let (tier, facts, episodic) = store();
        tier.append("s1", turn("t1")).unwrap();
        let handler = ActionHandler::new(None, tier.clone(), facts, episodic);
        let cancel = CancelToken::new();
        let reply = "[REQUEST_TIER:3:t1]";
        match handler.handle(reply, "u1", "s1", &cancel).await {
            Outcome::Reprompt { injection } => assert!(injection.is_none()),
            _ => panic!("expected reprompt"),
        }
        assert_eq!(tier.list("s1")[0].required_tier, 3);
    }

    #[tokio::test]
    async fn request_tier_unknown_turn_fails() {
        let (tier, facts, episodic) = store();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        match handler.handle("[REQUEST_TIER:2:ghost]", "u1", "s1", &cancel).await {
            Outcome::Fail(_) => {}
            _ => panic!("expected fail"),
        }
    }

    #[tokio::test]
    async fn remember_and_forget_apply_before_answer() {
        let (tier, facts, episodic) = store();
        let handler = ActionHandler::new(None, tier, facts.clone(), episodic);
        let cancel = CancelToken::new();
        handler
            .handle("[REMEMBER: dog_name: Biscuit]\nTIER1: ok\nTIER2: ok.\nTIER3: ok.", "u1", "s1", &cancel)
            .await;
        assert_eq!(facts.get("u1", "dog_name").unwrap().value, "Biscuit");
    }

    #[tokio::test]
    async fn interrupting_beats_answer_even_with_remember_present() {
        let (tier, facts, episodic) = store();
        tier.append("s1", turn("t1")).unwrap();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        let reply = "[REMEMBER: k: v]\n[REQUEST_TIER:2:t1]\nTIER1: x\nTIER2: x.\nTIER3: x.";
        match handler.handle(reply, "u1", "s1", &cancel).await {
            Outcome::Reprompt { .. } => {}
            _ => panic!("expected reprompt to win over answer fields"),
        }
    }

    #[tokio::test]
    async fn first_interrupting_directive_by_offset_wins() {
        let (tier, facts, episodic) = store();
        tier.append("s1", turn("t1")).unwrap();
        let handler = ActionHandler::new(None, tier, facts, episodic);
        let cancel = CancelToken::new();
        // SEARCH appears first in text, REQUEST_TIER second — SEARCH should win,
        // and since no provider is configured it fails.
        let reply = "[SEARCH: x] [REQUEST_TIER:2:t1]";
        match handler.handle(reply, "u1", "s1", &cancel).await {
            Outcome::Fail(_) => {}
            _ => panic!("expected the first (SEARCH) directive to take priority"),
        }
    }

    #[test]
    fn derive_key_value_from_explicit_form() {
        assert_eq!(
            derive_key_value("dog_name: Biscuit"),
            ("dog_name".to_string(), "Biscuit".to_string())
        );
    }

    #[test]
    fn derive_key_value_slugifies_plain_fact() {
        let (key, value) = derive_key_value("User's favorite color is blue");
        assert_eq!(key, "user_s_favorite_color_is_blue");
        assert_eq!(value, "User's favorite color is blue");
    }
}
