//! Model-backed consensus scoring.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use saloon_coordination::negotiation::consensus::substance;
use saloon_coordination::negotiation::{AgentError, ConsensusStrategy, Proposal};

use super::ChatProvider;

static VERDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(agree|disagree)\b\s*[:=]?\s*([01](?:\.\d+)?)?")
        .expect("VERDICT regex should compile")
});

const JUDGE_PREAMBLE: &str = "\
You are an impartial judge for a team of writers negotiating one artifact. \
Decide whether the proposals below express the same artifact, ignoring trivial \
differences in punctuation, capitalisation and formatting.

Reply with exactly one line:
AGREE <confidence>     if they express the same artifact
DISAGREE <confidence>  otherwise
where <confidence> is a number between 0 and 1 saying how sure you are.";

/// Asks a provider whether the window agrees.
///
/// `AGREE c` scores `c`, `DISAGREE c` scores `1 - c`. A missing confidence
/// counts as certain.
pub struct ModelJudge {
    provider: Arc<dyn ChatProvider>,
}

impl ModelJudge {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    fn user_prompt(window: &[Proposal]) -> String {
        let mut prompt = String::from("Proposals, oldest first:\n");
        for (i, proposal) in window.iter().enumerate() {
            prompt.push_str(&format!(
                "\n--- Proposal {} ({}, {}) ---\n{}\n",
                i + 1,
                proposal.agent_id,
                proposal.role,
                substance(&proposal.content)
            ));
        }
        prompt
    }
}

/// Agreement score from a judge reply.
pub fn parse_verdict(reply: &str) -> Result<f64, AgentError> {
    let captures = VERDICT.captures(reply).ok_or_else(|| {
        AgentError::Malformed(format!("judge gave no AGREE/DISAGREE verdict: {}", reply.trim()))
    })?;
    let confidence = match captures.get(2) {
        Some(m) => m
            .as_str()
            .parse::<f64>()
            .map_err(|e| AgentError::Malformed(format!("bad judge confidence: {}", e)))?
            .clamp(0.0, 1.0),
        None => 1.0,
    };
    if captures[1].eq_ignore_ascii_case("agree") {
        Ok(confidence)
    } else {
        Ok(1.0 - confidence)
    }
}

#[async_trait]
impl ConsensusStrategy for ModelJudge {
    fn name(&self) -> &str {
        "model_judge"
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn score(&self, window: &[Proposal]) -> Result<f64, AgentError> {
        let reply = self
            .provider
            .complete(JUDGE_PREAMBLE, &Self::user_prompt(window))
            .await?;
        parse_verdict(&reply)
    }
}
