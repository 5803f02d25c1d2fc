use crate::core::message::Message;

pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_INSTRUCTION: &str = "Generate a short title of at most six words for the conversation below. \
Return only the title, without quotes or trailing punctuation.";
const EXCERPT_CHARS: usize = 1500;
const MAX_TITLE_CHARS: usize = 80;

/// One-shot prompt asking for a title summarizing the first exchange.
pub fn title_prompt(user: &str, assistant: &str) -> Vec<Message> {
    let prompt = format!(
        "{TITLE_INSTRUCTION}\n\nUser: {}\n\nAssistant: {}",
        excerpt(user),
        excerpt(assistant)
    );
    vec![Message::user(prompt)]
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

/// Normalizes a model-produced title: first non-empty line, no wrapping
/// quotes or markdown, no `Title:` label, no trailing period.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line
        .strip_prefix("Title:")
        .or_else(|| line.strip_prefix("title:"))
        .unwrap_or(line)
        .trim();
    let cleaned = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '*' | '#' | '`'))
        .trim()
        .trim_end_matches('.')
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.chars().take(MAX_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_both_sides_of_the_exchange() {
        let prompt = title_prompt("How do lifetimes work?", "They describe borrows.");
        assert_eq!(prompt.len(), 1);
        assert!(prompt[0].content.starts_with(TITLE_INSTRUCTION));
        assert!(prompt[0].content.contains("User: How do lifetimes work?"));
        assert!(prompt[0].content.ends_with("Assistant: They describe borrows."));
    }

    #[test]
    fn long_turns_are_truncated() {
        let long = "x".repeat(EXCERPT_CHARS + 50);
        let prompt = title_prompt(&long, "ok");
        assert!(prompt[0].content.contains('…'));
    }

    #[test]
    fn titles_are_cleaned() {
        assert_eq!(clean_title("\"Rust Lifetimes.\"").as_deref(), Some("Rust Lifetimes"));
        assert_eq!(clean_title("\n  Title: **Borrowing**\nextra").as_deref(), Some("Borrowing"));
        assert_eq!(clean_title("“Quoted”").as_deref(), Some("Quoted"));
        assert!(clean_title("  \n \"\" ").is_none());
    }
}
