// src/config/mod.rs
// Central configuration for colloquy, assembled from environment variables.
//
// Unlike a "required env or panic" style, every tunable here has a default
// and a documented clamp range (see SPEC_FULL.md §6) — non-finite or
// out-of-range values degrade to the nearest legal value rather than
// aborting startup.

use std::env;

/// Parse an env var as `T`, clamp to `[min, max]`, defaulting on any parse
/// failure or absence.
pub fn env_parsed_clamped<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy,
{
    let parsed = env::var(key).ok().and_then(|v| v.parse::<T>().ok());
    match parsed {
        Some(v) if v < min => min,
        Some(v) if v > max => max,
        Some(v) => v,
        None => default,
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Memory engine caps and compaction tunables (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub lexical_keep: usize,
    pub prompt_token_limit: usize,
    pub semantic_keep: usize,
    pub prompt_semantic_limit: usize,
    pub summary_window: i64,
    pub min_turns_for_summary: i64,
    pub meso_group: usize,
    pub macro_group: usize,
    pub conflict_keep: usize,
    pub prompt_conflict_limit: usize,
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        Self {
            lexical_keep: env_parsed_clamped("LEXICAL_KEEP", 180, 50, 500),
            prompt_token_limit: env_parsed_clamped("PROMPT_TOKEN_LIMIT", 50, 10, 200),
            semantic_keep: env_parsed_clamped("SEMANTIC_KEEP", 240, 50, 800),
            prompt_semantic_limit: env_parsed_clamped("PROMPT_SEMANTIC_LIMIT", 24, 8, 120),
            summary_window: env_parsed_clamped("SUMMARY_WINDOW", 40, 10, 200),
            min_turns_for_summary: env_parsed_clamped("MIN_TURNS_FOR_SUMMARY", 40, 10, 400),
            meso_group: env_parsed_clamped("MESO_GROUP", 4, 2, 12),
            macro_group: env_parsed_clamped("MACRO_GROUP", 3, 2, 10),
            conflict_keep: env_parsed_clamped("CONFLICT_KEEP", 160, 30, 600),
            prompt_conflict_limit: env_parsed_clamped("PROMPT_CONFLICT_LIMIT", 14, 3, 80),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Turn-orchestrator guardrails.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub moderator_interval: i64,
    pub max_generation_ms: i64,
    pub max_repetition_streak: i64,
    pub llm_request_timeout_ms: u64,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            moderator_interval: env_parsed_clamped("MODERATOR_INTERVAL", 6, 2, 20),
            max_generation_ms: env_parsed_clamped("MAX_GENERATION_MS", 30_000, 3_000, 120_000),
            max_repetition_streak: env_parsed_clamped("MAX_REPETITION_STREAK", 2, 1, 5),
            llm_request_timeout_ms: env_parsed_clamped(
                "LLM_REQUEST_TIMEOUT_MS",
                10_000,
                1_000,
                60_000,
            ),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Top-level configuration composing all domain configs.
#[derive(Debug, Clone)]
pub struct ColloquyConfig {
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub database_path: String,
    pub log_filter: String,
}

impl ColloquyConfig {
    pub fn from_env() -> Self {
        Self {
            memory: MemoryConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
            database_path: env_or("DATABASE_PATH", "./data/colloquy.sqlite3"),
            log_filter: env_or("RUST_LOG", "colloquy=info"),
        }
    }
}

impl Default for ColloquyConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_above_max() {
        unsafe { env::set_var("TEST_LEXICAL_KEEP", "9999") };
        let v: usize = env_parsed_clamped("TEST_LEXICAL_KEEP", 180, 50, 500);
        assert_eq!(v, 500);
        unsafe { env::remove_var("TEST_LEXICAL_KEEP") };
    }

    #[test]
    fn defaults_on_parse_failure() {
        unsafe { env::set_var("TEST_LEXICAL_KEEP2", "abc") };
        let v: usize = env_parsed_clamped("TEST_LEXICAL_KEEP2", 180, 50, 500);
        assert_eq!(v, 180);
        unsafe { env::remove_var("TEST_LEXICAL_KEEP2") };
    }

    #[test]
    fn defaults_when_absent() {
        let v: usize = env_parsed_clamped("TEST_TOTALLY_ABSENT_VAR", 7, 1, 10);
        assert_eq!(v, 7);
    }

    #[test]
    fn clamps_below_min() {
        unsafe { env::set_var("TEST_LEXICAL_KEEP3", "1") };
        let v: usize = env_parsed_clamped("TEST_LEXICAL_KEEP3", 180, 50, 500);
        assert_eq!(v, 50);
        unsafe { env::remove_var("TEST_LEXICAL_KEEP3") };
    }
}
