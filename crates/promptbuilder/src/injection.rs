//! Formatting for the prompt's delimited sections. Every section uses the
//! same machine-inspectable `=== NAME ===` / `--- BEGIN ---` / `--- END ---`
//! envelope so a reviewer (human or the model itself) can tell sections
//! apart without ambiguity.

pub const STATIC_INSTRUCTIONS: &str = "\
You are a conversational assistant with tiered memory of this session. \
Answer the user directly and concisely.";

pub const TIER_EXPLAINER: &str = "\
=== TIER SYSTEM ===
Each prior turn below is shown at its current tier: tier1 is a compact \
shorthand, tier2 is a one-to-two sentence summary, tier3 is the full \
original text. If you need the full text of a turn shown below at a \
lower tier, emit `[REQUEST_TIER:3:<turn_id>]` and you will be re-prompted \
with that turn expanded. To search prior archived turns not shown below, \
emit `[SEARCH_EPISODIC: <query>]`. To look something up on the web, emit \
`[SEARCH: <query>]`. To remember a durable fact about the user, emit \
`[REMEMBER: <fact>]`; to delete one, emit `[FORGET: <key-or-query>]`. \
Respond with three labeled fields: tier1, tier2, tier3.
=== END_TIER_SYSTEM ===
";

pub fn format_turn(turn_id: &str, role: &str, tier: u8, text: &str) -> String {
    format!(
        "\
=== TURN: {turn_id} ===
ROLE: {role}
TIER: {tier}
--- BEGIN ---
{text}
--- END ---
"
    )
}

pub fn format_user_facts(block: &str) -> String {
    format!(
        "\
=== USER_FACTS ===
{block}
=== END_USER_FACTS ===
"
    )
}

pub fn format_episodic_injection(block: &str) -> String {
    format!(
        "\
=== EPISODIC_CONTEXT ===
{block}
=== END_EPISODIC_CONTEXT ===
"
    )
}

pub fn format_current_message(text: &str) -> String {
    format!(
        "\
=== CURRENT_USER_MESSAGE ===
{text}
=== END_CURRENT_USER_MESSAGE ===
"
    )
}
