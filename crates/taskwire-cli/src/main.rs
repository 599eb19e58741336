//! taskwire - terminal client for streamed agent tasks

mod commands;
mod config;
mod printer;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use taskwire_api::{
    AgentId, Endpoints, Message, MessageContent, SseTransport, TaskClient, TaskId,
    UserApprovalStatus, UserMessage,
};
use taskwire_session::{SessionState, SessionUpdate, TaskSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandResult;
use crate::config::Config;
use crate::printer::Printer;

/// taskwire - drive an agent task from the terminal
#[derive(Parser, Debug)]
#[command(name = "taskwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task to open
    #[arg(short, long)]
    task: Option<i64>,

    /// Task server API root (default: from config, then http://localhost:8000/api)
    #[arg(long)]
    base_url: Option<String>,

    /// Agent to run the task with (overrides the task's own agent)
    #[arg(short, long)]
    agent: Option<i64>,

    /// Send a single message, stream the reply and exit
    #[arg(short = 'c', long)]
    message: Option<String>,

    /// Minimum milliseconds between transcript redraws
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the transcript on stdout stays clean
    let filter = if args.verbose {
        EnvFilter::new("taskwire=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(base_url) = args.base_url {
        config.base_url = Some(base_url);
    }
    if let Some(ms) = args.throttle_ms {
        config.throttle_ms = Some(ms);
    }
    let task_id = args
        .task
        .map(TaskId)
        .ok_or_else(|| anyhow!("--task is required"))?;

    let http = reqwest::Client::builder()
        .default_headers(header_map(&config)?)
        .build()
        .context("Failed to build HTTP client")?;
    let endpoints = Endpoints::new(config.base_url())?;
    let client = TaskClient::with_client(endpoints.clone(), http.clone());
    let transport = Arc::new(SseTransport::with_client(http));

    let mut session = TaskSession::load(
        &client,
        task_id,
        endpoints,
        transport,
        config.session_config(),
    )
    .await
    .with_context(|| format!("Failed to load task {}", task_id))?;

    // Command line wins, then the task's own agent, then the config
    match (args.agent, session.agent_id(), config.agent_id) {
        (Some(agent), _, _) => session.set_agent(AgentId(agent)),
        (None, None, Some(agent)) => session.set_agent(AgentId(agent)),
        _ => {}
    }

    if let Some(message) = args.message {
        return run_single(&mut session, message).await;
    }

    run_interactive(&mut session, &config).await
}

fn header_map(config: &Config) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name in config: {}", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {}", name))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn user_message(text: &str) -> UserMessage {
    UserMessage {
        id: None,
        content: MessageContent::Text(text.to_string()),
    }
}

/// Print every update received so far
fn print_updates(
    printer: &mut Printer<io::Stdout>,
    updates: &mut broadcast::Receiver<SessionUpdate>,
) -> io::Result<()> {
    loop {
        match updates.try_recv() {
            Ok(update) => printer.update(&update)?,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "update receiver lagged");
            }
            Err(_) => return Ok(()),
        }
    }
}

enum Wake {
    Line(Option<String>),
    Interrupt,
    Stepped,
}

async fn run_single(session: &mut TaskSession, message: String) -> anyhow::Result<()> {
    let mut printer = Printer::new(io::stdout());
    let mut updates = session.subscribe();

    session.continue_task(Some(user_message(&message)))?;
    while !session.is_settled() {
        let wake = tokio::select! {
            _ = tokio::signal::ctrl_c() => Wake::Interrupt,
            _ = session.step() => Wake::Stepped,
        };
        if let Wake::Interrupt = wake {
            session.cancel();
        }
        print_updates(&mut printer, &mut updates)?;
    }
    print_updates(&mut printer, &mut updates)?;

    if session.state() == SessionState::Error {
        anyhow::bail!("{}", session.last_error().unwrap_or("task failed"));
    }
    Ok(())
}

async fn run_interactive(session: &mut TaskSession, config: &Config) -> anyhow::Result<()> {
    let mut printer = Printer::new(io::stdout());
    let mut updates = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        let task = session.task();
        let agent = session
            .agent_id()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "none".to_string());
        eprintln!("taskwire: task {} \"{}\" (agent {})", task.id, task.title, agent);
        eprintln!("Type /help for commands.");
        eprintln!();
    }
    printer.transcript(session.messages())?;
    prompt()?;

    loop {
        let settled = session.is_settled();
        let wake = tokio::select! {
            line = lines.next_line() => Wake::Line(line?),
            _ = tokio::signal::ctrl_c() => Wake::Interrupt,
            _ = session.step(), if !settled => Wake::Stepped,
        };
        let stepped = matches!(wake, Wake::Stepped);

        match wake {
            Wake::Line(None) => break,
            Wake::Line(Some(line)) => {
                if !handle_input(line.trim(), session, config)? {
                    break;
                }
            }
            Wake::Interrupt => {
                if session.state().is_busy() {
                    session.cancel();
                    eprintln!("[cancelled]");
                } else {
                    break;
                }
            }
            Wake::Stepped => {}
        }

        print_updates(&mut printer, &mut updates)?;
        let idle = !session.state().is_busy();
        if idle && (!stepped || session.is_settled()) {
            prompt()?;
        }
    }

    session.cancel();
    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Handle one line of input. Returns `false` to exit.
fn handle_input(input: &str, session: &mut TaskSession, config: &Config) -> anyhow::Result<bool> {
    if input.is_empty() {
        return Ok(true);
    }

    let Some(command) = commands::execute_command(input) else {
        report(session.continue_task(Some(user_message(input))));
        return Ok(true);
    };

    match command {
        CommandResult::Exit => return Ok(false),
        CommandResult::Message(msg) => println!("{}", msg),
        CommandResult::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
        CommandResult::Retry => report(session.continue_task(None)),
        CommandResult::Cancel => session.cancel(),
        CommandResult::Review {
            tool_call_id,
            status,
            auto_approve,
        } => match tool_call_id.or_else(|| latest_pending_approval(session.messages())) {
            Some(id) => report(session.review_tool(
                id,
                status,
                auto_approve || config.auto_approve.unwrap_or(false),
            )),
            None => println!("No tool call is waiting for approval."),
        },
        CommandResult::Answer {
            tool_call_id,
            answer,
        } => report(session.answer_tool(tool_call_id, answer)),
        CommandResult::Agent(None) => match session.agent_id() {
            Some(agent) => println!("Agent: {}", agent),
            None => println!("No agent selected. Use /agent <id>."),
        },
        CommandResult::Agent(Some(agent)) => {
            session.set_agent(AgentId(agent));
            println!("Agent set to {}", agent);
        }
        CommandResult::Usage => {
            let usage = session.usage();
            println!(
                "[{} in, {} out, {} total | context {}]",
                usage.input_tokens, usage.output_tokens, usage.total_tokens, usage.max_tokens
            );
        }
    }
    Ok(true)
}

/// Refused actions are already reported as session notices
fn report(result: taskwire_session::Result<()>) {
    if let Err(e) = result {
        if !e.is_dispatch() {
            eprintln!("Error: {}", e);
        }
    }
}

fn latest_pending_approval(messages: &[Message]) -> Option<String> {
    messages.iter().rev().find_map(|m| {
        m.as_tool()
            .filter(|tool| tool.metadata.user_approval == Some(UserApprovalStatus::Pending))
            .map(|tool| tool.tool_call_id.clone())
    })
}
