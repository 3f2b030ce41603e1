use crate::models::{ChatMessage, Role};

/// Windowed conversation buffer used to condense follow-up questions.
#[derive(Debug, Clone, Copy)]
pub struct ConversationMemory {
    window: usize,
}

impl ConversationMemory {
    /// `window` is measured in turns (one user message plus its answer).
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// The most recent messages that fit in the window, oldest first.
    pub fn recent<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let keep = self.window.saturating_mul(2);
        &history[history.len().saturating_sub(keep)..]
    }

    /// Render the window as `Human:` / `Assistant:` lines.
    pub fn render(&self, history: &[ChatMessage]) -> String {
        self.recent(history)
            .iter()
            .map(|message| {
                let speaker = match message.role {
                    Role::User => "Human",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, message.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("What is the leave policy?"),
            ChatMessage::assistant("18 days of paid leave."),
            ChatMessage::user("Can I carry it forward?"),
            ChatMessage::assistant("Up to 10 days."),
        ]
    }

    #[test]
    fn test_render_labels_speakers() {
        let rendered = ConversationMemory::new(5).render(&history());
        assert_eq!(
            rendered,
            "Human: What is the leave policy?\nAssistant: 18 days of paid leave.\nHuman: Can I carry it forward?\nAssistant: Up to 10 days."
        );
    }

    #[test]
    fn test_window_keeps_latest_turns() {
        let memory = ConversationMemory::new(1);
        let history = history();
        let recent = memory.recent(&history);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "Can I carry it forward?");
    }

    #[test]
    fn test_zero_window_renders_nothing() {
        assert!(ConversationMemory::new(0).render(&history()).is_empty());
    }
}
