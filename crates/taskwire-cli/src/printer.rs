//! Plain-text transcript output

use std::collections::HashMap;
use std::io::{self, Write};

use taskwire_api::{Message, ToolMessage, UserApprovalStatus};
use taskwire_session::{SessionState, SessionUpdate};

/// Truncate a string to a max number of characters on one line
fn preview(s: &str, max_chars: usize) -> String {
    let line = s.replace('\n', " ");
    match line.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolShown {
    Called,
    Settled,
}

/// Prints session updates incrementally
pub struct Printer<W: Write> {
    out: W,
    /// Assistant message being streamed and how many chars of it are printed
    streaming: Option<(usize, usize)>,
    line_open: bool,
    tools: HashMap<String, ToolShown>,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streaming: None,
            line_open: false,
            tools: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print a whole transcript, e.g. when a task is opened
    pub fn transcript(&mut self, messages: &[Message]) -> io::Result<()> {
        for message in messages {
            match message {
                Message::User(user) => writeln!(self.out, "> {}", user.content.text())?,
                Message::Assistant(assistant) => {
                    if let Some(content) = assistant.content.as_deref().filter(|c| !c.is_empty()) {
                        writeln!(self.out, "{}", content)?;
                    }
                }
                Message::Tool(tool) => self.tool(tool)?,
                Message::System(_) => {}
            }
        }
        self.out.flush()
    }

    /// Print one session update
    pub fn update(&mut self, update: &SessionUpdate) -> io::Result<()> {
        match update {
            SessionUpdate::MessageUpserted { index, message } => self.upsert(*index, message)?,
            SessionUpdate::Pruned { .. } => {
                self.end_line()?;
                self.streaming = None;
            }
            SessionUpdate::PermissionRequired { tool_call_id } => {
                self.end_line()?;
                writeln!(
                    self.out,
                    "[approval needed for {}: /approve or /deny]",
                    tool_call_id
                )?;
            }
            SessionUpdate::UserResponseRequired { tool_name } => {
                self.end_line()?;
                writeln!(
                    self.out,
                    "[{} is waiting for your answer: /answer <id> <text>]",
                    tool_name
                )?;
            }
            SessionUpdate::Finished { interrupted } => {
                self.end_line()?;
                if *interrupted {
                    writeln!(self.out, "[task interrupted]")?;
                }
            }
            SessionUpdate::Failed { message } => {
                self.end_line()?;
                writeln!(self.out, "[error: {}] (/retry to try again)", message)?;
            }
            SessionUpdate::Notice { message } => {
                self.end_line()?;
                writeln!(self.out, "[{}]", message)?;
            }
            SessionUpdate::StateChanged { to, .. } => {
                if !to.is_busy() {
                    self.end_line()?;
                }
                if *to == SessionState::Idle {
                    self.streaming = None;
                }
            }
            SessionUpdate::Usage { .. } => {}
        }
        self.out.flush()
    }

    fn upsert(&mut self, index: usize, message: &Message) -> io::Result<()> {
        match message {
            Message::Assistant(assistant) => {
                let text = assistant.content.as_deref().unwrap_or("");
                let printed = match self.streaming {
                    Some((i, n)) if i == index => n,
                    _ => {
                        self.end_line()?;
                        0
                    }
                };

                let total = text.chars().count();
                if total > printed {
                    let new_text: String = text.chars().skip(printed).collect();
                    write!(self.out, "{}", new_text)?;
                    self.line_open = !new_text.ends_with('\n');
                }
                self.streaming = Some((index, total.max(printed)));
                Ok(())
            }
            Message::Tool(tool) => {
                self.end_line()?;
                self.tool(tool)
            }
            Message::User(_) | Message::System(_) => Ok(()),
        }
    }

    fn tool(&mut self, tool: &ToolMessage) -> io::Result<()> {
        if tool.name.is_empty() {
            return Ok(());
        }

        let shown = self.tools.get(&tool.tool_call_id).copied();
        if shown.is_none() {
            writeln!(
                self.out,
                "[{} {}] {}",
                tool.name,
                tool.tool_call_id,
                preview(&tool.arguments, 60)
            )?;
            self.tools
                .insert(tool.tool_call_id.clone(), ToolShown::Called);
        }

        let outcome = match (&tool.result, &tool.error) {
            (_, Some(error)) => Some(format!("error: {}", preview(error, 80))),
            (Some(result), None) => Some(preview(result, 80)),
            (None, None) => match tool.metadata.user_approval {
                Some(UserApprovalStatus::Denied) => Some("denied".to_string()),
                _ => None,
            },
        };
        if let Some(outcome) = outcome {
            if shown != Some(ToolShown::Settled) {
                writeln!(self.out, "  -> {}", outcome)?;
                self.tools
                    .insert(tool.tool_call_id.clone(), ToolShown::Settled);
            }
        }
        Ok(())
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        Ok(())
    }
}
