//! Slash commands for interactive mode

use taskwire_api::ReviewStatus;

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Run the agent again without a new message
    Retry,
    /// Cancel the active stream
    Cancel,
    /// Approve or deny a tool call; `None` means the latest pending one
    Review {
        tool_call_id: Option<String>,
        status: ReviewStatus,
        auto_approve: bool,
    },
    /// Answer a tool that asked a question
    Answer { tool_call_id: String, answer: String },
    /// Show or select the agent
    Agent(Option<i64>),
    /// Show token usage
    Usage,
    /// Show a message to the user (not sent to the task)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; returns `None` for plain input
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "retry" | "r" => CommandResult::Retry,

        "cancel" => CommandResult::Cancel,

        "approve" | "a" => review(args, ReviewStatus::Approved),

        "deny" | "d" => review(args, ReviewStatus::Denied),

        "answer" => match args.split_once(char::is_whitespace) {
            Some((tool_call_id, answer)) if !answer.trim().is_empty() => CommandResult::Answer {
                tool_call_id: tool_call_id.to_string(),
                answer: answer.trim().to_string(),
            },
            _ => CommandResult::Message("Usage: /answer <tool_call_id> <answer>".to_string()),
        },

        "agent" => {
            if args.is_empty() {
                CommandResult::Agent(None)
            } else {
                match args.parse::<i64>() {
                    Ok(id) => CommandResult::Agent(Some(id)),
                    Err(_) => CommandResult::Message(format!("Invalid agent id: {}", args)),
                }
            }
        }

        "usage" | "u" => CommandResult::Usage,

        _ => CommandResult::Unknown(command),
    })
}

fn review(args: &str, status: ReviewStatus) -> CommandResult {
    let mut tool_call_id = None;
    let mut auto_approve = false;
    for arg in args.split_whitespace() {
        match arg {
            "--auto" => auto_approve = true,
            id => tool_call_id = Some(id.to_string()),
        }
    }
    CommandResult::Review {
        tool_call_id,
        status,
        auto_approve,
    }
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?               Show this help message
  /retry, /r                  Run the agent again (after an error, or to resume)
  /cancel                     Cancel the running stream (Ctrl-C does the same)
  /approve, /a [id] [--auto]  Approve a tool call (latest pending if no id)
  /deny, /d [id]              Deny a tool call (latest pending if no id)
  /answer <id> <text>         Answer a tool that asked you a question
  /agent [id]                 Show or select the agent running this task
  /usage, /u                  Show token usage
  /quit, /exit, /q            Exit taskwire

Anything else is sent to the task as a new message."#
        .to_string()
}
