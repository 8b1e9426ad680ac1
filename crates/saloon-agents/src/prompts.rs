//! Persona preambles and per-turn prompts for the writing team.
//!
//! Every preamble asks the agent to put commentary inside its own tag
//! (`<zero>...</zero>`), the artifact inside `<content>...</content>`, and to
//! finish with `Consensus: True` or `Consensus: False`.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes.

use saloon_coordination::negotiation::{AgentProfile, AgentRequest, ContentKind, Role};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Most recent proposals quoted back to the agent each turn.
const HISTORY_WINDOW: usize = 6;

/// Character of one team member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    /// Commentary tag, e.g. `zero` for `<zero>...</zero>`.
    pub tag: String,
    pub role: Role,
    pub description: &'static str,
    pub tone: &'static str,
}

impl Persona {
    pub fn profile(&self, agent_id: &str) -> AgentProfile {
        AgentProfile::new(agent_id, format!("{} Tone: {}", self.description, self.tone))
    }
}

/// Built-in personas, or a generic one derived from the role.
pub fn persona_for(name: &str, role: Role) -> Persona {
    let (description, tone) = match name.to_ascii_lowercase().as_str() {
        "zero" => (
            "an enthusiastic and earnest writer who brings fresh, creative ideas",
            "enthusiastic, creative, positive and earnest",
        ),
        "gustave" => (
            "a refined and eloquent editor who perfects language and structure",
            "sophisticated, eloquent, thoughtful and nuanced",
        ),
        "camille" => (
            "a balanced and insightful reviewer who bridges differing perspectives",
            "balanced, insightful, thoughtful and clear",
        ),
        _ => match role {
            Role::Creative => (
                "a creative writer who proposes bold new ideas",
                "energetic and imaginative",
            ),
            Role::Reviewer => (
                "a careful reviewer who weighs strengths and weaknesses",
                "measured and constructive",
            ),
            Role::Editor => (
                "a meticulous editor who polishes the final wording",
                "precise and composed",
            ),
        },
    };
    Persona {
        name: name.to_string(),
        tag: tag_for(name),
        role,
        description,
        tone,
    }
}

fn tag_for(name: &str) -> String {
    let tag: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if tag.is_empty() {
        "agent".to_string()
    } else {
        tag
    }
}

fn role_duty(role: Role, kind: ContentKind) -> &'static str {
    match (role, kind) {
        (Role::Creative, ContentKind::Title) => {
            "Propose catchy, memorable titles. If a previous suggestion exists, evaluate it and either build on it or offer a creative alternative."
        }
        (Role::Creative, ContentKind::Toc) => {
            "Propose a structure that covers the topic comprehensively with a logical flow from beginning to end."
        }
        (Role::Creative, ContentKind::Section) => {
            "Draft vivid, engaging prose. If a previous draft exists, improve it with fresh examples and energy."
        }
        (Role::Reviewer, ContentKind::Title) => {
            "Weigh each suggestion for both marketability and intellectual appeal, and look for the middle ground between creativity and clarity."
        }
        (Role::Reviewer, ContentKind::Toc) => {
            "Check balance across chapters, gaps in coverage and whether the progression suits both newcomers and experts."
        }
        (Role::Reviewer, ContentKind::Section) => {
            "Check accuracy, clarity and coherence with the chapter, then fold your corrections into a complete revised draft."
        }
        (Role::Editor, ContentKind::Title) => {
            "Refine the proposed title with elegant, precise language. Consider rhythm and cadence, and avoid cliches."
        }
        (Role::Editor, ContentKind::Toc) => {
            "Refine the organization and wording of the structure. Chapter and section titles should be clear but engaging."
        }
        (Role::Editor, ContentKind::Section) => {
            "Polish the draft for flow, precision and style without losing its substance."
        }
    }
}

fn artifact_rules(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Title => "\
Inside <content> write a single line of the form `Book Title: <title>`. \
Keep titles concise (typically 2-7 words); add a subtitle only if it adds clarity.",
        ContentKind::Toc => "\
Inside <content> write only valid JSON with this shape:
[
  {\"title\": \"Chapter Title\", \"sections\": [
    {\"title\": \"Section Title\", \"subsections\": [{\"title\": \"Subsection Title\"}]}
  ]}
]
Include an introduction chapter and keep the depth to two or three levels.",
        ContentKind::Section => "\
Inside <content> write the complete section text in Markdown. \
Use subheadings where they help; never include commentary inside <content>.",
    }
}

fn task_line(request: &AgentRequest) -> String {
    match request.kind {
        ContentKind::Title => format!(
            "Let's collaborate on a title for a book about: {}",
            request.topic
        ),
        ContentKind::Toc => format!(
            "Let's collaborate on a detailed table of contents for a book about {}.",
            request.topic
        ),
        ContentKind::Section => format!(
            "Let's collaborate on writing one section of a book about {}.",
            request.topic
        ),
    }
}

/// Builds the system preamble and the user message for one agent turn.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    /// System preamble for `request.agent_id` in its role.
    pub fn system_prompt(&self, request: &AgentRequest) -> String {
        let persona = persona_for(&request.agent_id, request.role);
        let character = if request.persona.is_empty() {
            format!("{} Tone: {}", persona.description, persona.tone)
        } else {
            request.persona.clone()
        };
        format!(
            "You are {name}, {character}\n\
             You are the {role} of a small writing team working on a {kind}.\n\n\
             ## Your duty\n{duty}\n\n\
             ## Response format\n\
             1. Begin with your commentary wrapped in <{tag}>your commentary</{tag}> tags.\n\
             2. Then give your full proposal wrapped in <content>...</content> tags.\n\
             3. End with a consensus marker on its own line: `Consensus: True` if the latest \
             proposal from the team is already in its optimal form, otherwise `Consensus: False`.\n\
             If you accept the previous proposal unchanged, repeat it inside <content> and mark \
             `Consensus: True`.\n\n\
             ## Artifact\n{rules}\n",
            name = persona.name,
            character = character,
            role = request.role,
            kind = kind_label(request.kind),
            duty = role_duty(request.role, request.kind),
            tag = persona.tag,
            rules = artifact_rules(request.kind),
        )
    }

    /// Task, requirements, recent proposals and any correction hint.
    pub fn user_prompt(&self, request: &AgentRequest) -> String {
        let mut prompt = task_line(request);

        let mut requirements: Vec<String> = request.constraints.notes.clone();
        match (request.constraints.min_words, request.constraints.max_words) {
            (Some(min), Some(max)) => {
                requirements.push(format!("The content should be between {} and {} words.", min, max))
            }
            (Some(min), None) => requirements.push(format!("Write at least {} words.", min)),
            (None, Some(max)) => requirements.push(format!("Write at most {} words.", max)),
            (None, None) => {}
        }
        if !requirements.is_empty() {
            prompt.push_str("\n\n## Requirements\n");
            for line in &requirements {
                prompt.push_str("- ");
                prompt.push_str(line);
                prompt.push('\n');
            }
        }

        let skip = request.history.len().saturating_sub(HISTORY_WINDOW);
        if request.history.is_empty() {
            prompt.push_str("\nNo proposals yet. Make the opening proposal.\n");
        } else {
            prompt.push_str("\n## Proposals so far\n");
            for proposal in request.history.iter().skip(skip) {
                prompt.push_str(&format!(
                    "\n[round {}] {} ({}):\n{}\n",
                    proposal.round_index + 1,
                    proposal.agent_id,
                    proposal.role,
                    proposal.content
                ));
            }
        }

        if let Some(hint) = &request.correction_hint {
            prompt.push_str("\n## Correction\n");
            prompt.push_str(hint);
            prompt.push('\n');
        }
        prompt
    }
}

fn kind_label(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Title => "book title",
        ContentKind::Toc => "table of contents",
        ContentKind::Section => "book section",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saloon_coordination::negotiation::{Constraints, Proposal};

    fn request(kind: ContentKind, role: Role, agent: &str) -> AgentRequest {
        AgentRequest {
            session_id: "s-1".into(),
            kind,
            topic: "time travel".into(),
            role,
            agent_id: agent.into(),
            persona: String::new(),
            history: Vec::new(),
            constraints: Constraints::default(),
            correction_hint: None,
            round_index: 0,
        }
    }

    #[test]
    fn test_builtin_persona_tags() {
        assert_eq!(persona_for("Zero", Role::Creative).tag, "zero");
        assert_eq!(persona_for("Gustave", Role::Editor).tag, "gustave");
        assert!(persona_for("Camille", Role::Reviewer).tone.contains("balanced"));
        assert_eq!(persona_for("!!", Role::Editor).tag, "agent");
    }

    #[test]
    fn test_unknown_persona_falls_back_to_role() {
        let persona = persona_for("Iris", Role::Reviewer);
        assert_eq!(persona.tag, "iris");
        assert!(persona.description.contains("reviewer"));
    }

    #[test]
    fn test_system_prompt_format_rules() {
        let prompt = PromptBuilder::new().system_prompt(&request(ContentKind::Title, Role::Creative, "Zero"));
        assert!(prompt.starts_with("You are Zero"));
        assert!(prompt.contains("<zero>your commentary</zero>"));
        assert!(prompt.contains("<content>"));
        assert!(prompt.contains("Consensus: True"));
        assert!(prompt.contains("Book Title:"));
    }

    #[test]
    fn test_toc_prompt_carries_json_shape() {
        let prompt = PromptBuilder::new().system_prompt(&request(ContentKind::Toc, Role::Editor, "Gustave"));
        assert!(prompt.contains("\"subsections\""));
    }

    #[test]
    fn test_user_prompt_opening_turn() {
        let prompt = PromptBuilder::new().user_prompt(&request(ContentKind::Title, Role::Creative, "Zero"));
        assert!(prompt.starts_with("Let's collaborate on a title for a book about: time travel"));
        assert!(prompt.contains("opening proposal"));
    }

    #[test]
    fn test_user_prompt_history_and_requirements() {
        let mut req = request(ContentKind::Section, Role::Editor, "Gustave");
        req.constraints = Constraints::words(500, 2000).with_note("Section 1.2: Paradoxes");
        req.history = (0..8)
            .map(|i| Proposal::new("Zero", Role::Creative, format!("draft {}", i), i / 2))
            .collect();
        req.correction_hint = Some("Your previous answer was rejected.".into());
        let prompt = PromptBuilder::new().user_prompt(&req);
        assert!(prompt.contains("- Section 1.2: Paradoxes"));
        assert!(prompt.contains("between 500 and 2000 words"));
        assert!(!prompt.contains("draft 1\n"));
        assert!(prompt.contains("draft 7"));
        assert!(prompt.contains("## Correction"));
    }
}
