//! Knowledge Provider (optional external collaborator), §4.6.5/§6/§9.
//!
//! Best-effort LLM-based reasoning enrichment. Its answer contributes only a bounded
//! confidence delta in `[-20, +20]` and never blocks signal generation — if the provider fails
//! or times out, the Scoring Engine proceeds with the raw confidence (§4.6.5).

use async_trait::async_trait;

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct KnowledgeAnswer {
    pub success: bool,
    pub answer: String,
    pub source: String,
    pub similar_cases_count: u32,
}

#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    async fn query_historical_cases(
        &self,
        symbol: &str,
        signal_type: &str,
        market_condition: &str,
    ) -> EngineResult<KnowledgeAnswer>;
}

/// Parses a free-text `answer` into a bounded confidence adjustment, §6. Looks for the first
/// explicit signed integer in the text and clamps it; defaults to 0 if none is found — an
/// absent adjustment is the safe, no-op outcome the caller falls back to on any parse failure.
pub fn parse_confidence_adjustment(answer: &str) -> i32 {
    for token in answer.split(|c: char| c.is_whitespace() || c == ',' || c == '.') {
        let trimmed = token.trim_start_matches('+');
        if let Ok(v) = trimmed.parse::<i32>() {
            return v.clamp(-20, 20);
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_adjustment() {
        assert_eq!(parse_confidence_adjustment("Similar cases suggest +15 confidence"), 15);
    }

    #[test]
    fn parses_negative_adjustment() {
        assert_eq!(parse_confidence_adjustment("Historical pattern implies -8"), -8);
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(parse_confidence_adjustment("extreme case +99"), 20);
        assert_eq!(parse_confidence_adjustment("extreme case -99"), -20);
    }

    #[test]
    fn defaults_to_zero_when_no_number_present() {
        assert_eq!(parse_confidence_adjustment("no clear signal here"), 0);
    }
}
