//! ============================================================================
//! Prompt Assembler - Bounded prompt text for one generation call
//! ============================================================================
//! Section order is fixed: speaker-prefix directive, persona instructions,
//! recalled passages, recent conversation, then a `{name}:` cue.
//! ============================================================================

/// Build the prompt, never exceeding `budget_chars` characters.
///
/// When over budget, recent lines are dropped oldest first, then recalled
/// passages from the least relevant end, then the instructions are cut.
pub fn assemble(
    instructions: &str,
    relevant_history: &[String],
    recent_buffer: &[String],
    persona_name: &str,
    budget_chars: usize,
) -> String {
    let mut recent: &[String] = recent_buffer;
    let mut relevant: &[String] = relevant_history;

    loop {
        let prompt = render(persona_name, instructions, relevant, recent);
        if prompt.chars().count() <= budget_chars {
            return prompt;
        }
        if !recent.is_empty() {
            recent = &recent[1..];
        } else if !relevant.is_empty() {
            relevant = &relevant[..relevant.len() - 1];
        } else {
            break;
        }
    }

    let overhead = render(persona_name, "", &[], &[]).chars().count();
    if overhead <= budget_chars {
        let kept: String = instructions.chars().take(budget_chars - overhead).collect();
        return render(persona_name, &kept, &[], &[]);
    }

    // Even the frame does not fit; keep the tail so the cue survives
    let frame = render(persona_name, "", &[], &[]);
    frame.chars().skip(overhead - budget_chars).collect()
}

fn render(name: &str, instructions: &str, relevant: &[String], recent: &[String]) -> String {
    format!(
        "ONLY generate plain sentences without prefix of who is speaking. DO NOT use {name}: prefix.\n\n\
         {instructions}\n\n\
         Below are relevant details about {name}'s past and the conversation you are in.\n\
         {relevant}\n\n\n\
         {recent}\n\
         {name}:",
        name = name,
        instructions = instructions,
        relevant = relevant.join("\n"),
        recent = recent.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(prefix: &str, n: usize, width: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}:{}", prefix, i, "x".repeat(width))).collect()
    }

    #[test]
    fn test_section_order() {
        let prompt = assemble(
            "You are Ada Lovelace.",
            &["Ada wrote about engines.".to_string()],
            &["Ada: Hello.".to_string(), "User: Hi".to_string()],
            "Ada",
            10_000,
        );

        let directive = prompt.find("DO NOT use Ada: prefix").unwrap();
        let instructions = prompt.find("You are Ada Lovelace.").unwrap();
        let relevant = prompt.find("Ada wrote about engines.").unwrap();
        let recent = prompt.find("Ada: Hello.\nUser: Hi").unwrap();
        assert!(directive < instructions && instructions < relevant && relevant < recent);
        assert!(prompt.ends_with("User: Hi\nAda:"));
    }

    #[test]
    fn test_drops_recent_before_relevant() {
        let relevant = vec!["important passage".to_string()];
        let recent = lines("User: old", 10, 20);
        let full = assemble("instr", &relevant, &recent, "Ada", usize::MAX);
        let budget = full.chars().count() - 30;

        let prompt = assemble("instr", &relevant, &recent, "Ada", budget);
        assert!(prompt.chars().count() <= budget);
        assert!(prompt.contains("important passage"));
        assert!(!prompt.contains("User: old0:"));
        assert!(prompt.contains("User: old9:"));
    }

    #[test]
    fn test_drops_least_relevant_passage_after_recent() {
        let relevant = vec!["best".to_string(), "worst".repeat(50)];
        let recent = lines("User: ", 3, 10);
        let base = assemble("instr", &relevant[..1], &[], "Ada", usize::MAX);

        let prompt = assemble("instr", &relevant, &recent, "Ada", base.chars().count());
        assert_eq!(prompt, base);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let instructions = "I".repeat(5_000);
        let relevant = lines("passage", 50, 200);
        let recent = lines("User: line", 200, 100);

        for budget in [0, 10, 150, 500, 2_000, 12_000, 40_000] {
            let prompt = assemble(&instructions, &relevant, &recent, "Ada", budget);
            assert!(
                prompt.chars().count() <= budget,
                "budget {} produced {} chars",
                budget,
                prompt.chars().count()
            );
        }
    }

    #[test]
    fn test_truncates_instructions_last() {
        let prompt = assemble(&"I".repeat(1_000), &[], &[], "Ada", 300);
        assert_eq!(prompt.chars().count(), 300);
        assert!(prompt.ends_with("Ada:"));
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let recent = vec!["User: héllo wörld ✓".to_string()];
        let full = assemble("instr", &[], &recent, "Zoë", usize::MAX);
        let prompt = assemble("instr", &[], &recent, "Zoë", full.chars().count());
        assert_eq!(prompt, full);
    }
}
