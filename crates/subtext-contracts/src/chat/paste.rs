use super::command_parser::SessionCommand;
use super::command_registry::TEXT_COMMAND;

/// A line holding only this ends a `/paste` block.
pub const PASTE_TERMINATOR: &str = ".";

/// Lines collected after `/paste`, analyzed as one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteBuffer {
    lines: Vec<String>,
}

impl PasteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one input line. Returns `true` when the line was the terminator.
    pub fn push_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim() == PASTE_TERMINATOR {
            return true;
        }
        self.lines.push(line.to_string());
        false
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The block as a single text-analysis command, line breaks kept.
    pub fn finish(self) -> SessionCommand {
        let text = self.lines.join("\n");
        let mut command = SessionCommand::new(TEXT_COMMAND.action, &text);
        command.text = Some(text.trim().to_string());
        command
    }
}
