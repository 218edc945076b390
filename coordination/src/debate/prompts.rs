//! Prompt text for debate roles.

use std::fmt::Write;

use serde_json::Value;

use super::state::DebateRound;

fn material_block(material: &Value) -> String {
    match material {
        Value::Null => "(no material provided)".to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn proponent_prompt(
    topic: &str,
    material: &Value,
    round: u32,
    required: u32,
    previous_opponent: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are the proponent in round {round} of a structured debate on {topic}.\n\
         Argue FOR the position using the material below.\n\
         Give at least {required} distinct arguments as a numbered list.\n\n\
         ## Material\n{}\n",
        material_block(material)
    );
    if let Some(rebuttal) = previous_opponent {
        let _ = write!(
            prompt,
            "\n## Opponent's last argument\n{rebuttal}\n\nAddress it point by point.\n"
        );
    }
    prompt
}

pub fn opponent_prompt(
    topic: &str,
    material: &Value,
    round: u32,
    required: u32,
    proponent: &str,
) -> String {
    format!(
        "You are the opponent in round {round} of a structured debate on {topic}.\n\
         Argue AGAINST the position using the material below.\n\
         Give at least {required} distinct arguments as a numbered list.\n\n\
         ## Material\n{}\n\n\
         ## Proponent's argument this round\n{proponent}\n\nRebut it directly.\n",
        material_block(material)
    )
}

pub fn arbiter_prompt(
    topic: &str,
    rounds: &[DebateRound],
    proponent_total: u32,
    opponent_total: u32,
) -> String {
    let mut prompt = format!(
        "You are the arbiter of a {}-round debate on {topic}.\n\
         Weigh both sides and produce a clear recommendation with rationale.\n\n",
        rounds.len()
    );
    for r in rounds {
        let _ = write!(
            prompt,
            "## Round {} (required {} arguments)\n\
             ### Proponent ({} arguments)\n{}\n\
             ### Opponent ({} arguments)\n{}\n\n",
            r.round,
            r.required_arguments,
            r.proponent_argument_count,
            r.proponent_output,
            r.opponent_argument_count,
            r.opponent_output,
        );
    }
    let _ = write!(
        prompt,
        "## Tally\nproponent: {proponent_total} arguments, opponent: {opponent_total} arguments\n"
    );
    prompt
}
