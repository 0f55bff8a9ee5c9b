//! `skillrun chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use skillrun_agent::{AgentLoop, EventBridge, TurnOutcome};
use skillrun_config::{AppConfig, CliConfig};
use skillrun_core::event::StreamEvent;
use skillrun_core::message::{Conversation, SystemMetadata};
use tokio::io::{AsyncBufReadExt, BufReader};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub async fn run(config: AppConfig, message: Option<String>) -> anyhow::Result<()> {
    let agent = super::build_agent(&config)?;
    let metadata = config.system_metadata().context("Invalid system metadata")?;
    let session = Session {
        agent,
        bridge: EventBridge::from_config(&config.server),
        system_prompt: config.active_model().system_message.clone(),
        metadata,
        show_tool_calls: config.tools.show_tool_calls,
        cli: config.cli.clone(),
    };

    let mut conversation = session.new_conversation();

    if let Some(message) = message {
        let (_, outcome) = session.turn(conversation, message).await;
        if !matches!(outcome, Some(TurnOutcome::Finished { .. })) {
            anyhow::bail!("Turn did not finish");
        }
        return Ok(());
    }

    println!();
    println!("  skillrun: interactive mode");
    println!("  Provider:  {}", config.llm_provider);
    println!("  Model:     {}", config.active_model().model);
    println!("  Tools:     {}", session.agent.allowed_tools().names().join(", "));
    println!("  Type '{}' or Ctrl+D to quit.", session.cli.exit_command);
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", session.cli.user_prefix);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == session.cli.exit_command {
            break;
        }

        let (next, _) = session.turn(conversation, input.to_string()).await;
        conversation = next;
        println!();
    }

    println!("Goodbye!");
    Ok(())
}

struct Session {
    agent: Arc<AgentLoop>,
    bridge: EventBridge,
    system_prompt: String,
    metadata: SystemMetadata,
    show_tool_calls: bool,
    cli: CliConfig,
}

impl Session {
    fn new_conversation(&self) -> Conversation {
        Conversation::new(&self.system_prompt, &self.metadata)
    }

    /// Run one turn on a worker and print its events as they arrive.
    /// Hands the conversation back, or a fresh one if the worker died.
    async fn turn(&self, mut conversation: Conversation, message: String) -> (Conversation, Option<TurnOutcome>) {
        let agent = Arc::clone(&self.agent);
        let (mut stream, handle) = self.bridge.start(move |sink| async move {
            let outcome = agent.run_turn(&mut conversation, &message, &sink).await;
            (conversation, outcome)
        });

        while let Some(event) = stream.next_event().await {
            let Some(line) = render(&event, &self.cli, self.show_tool_calls) else {
                continue;
            };
            if matches!(event, StreamEvent::Error { .. } | StreamEvent::ToolError { .. }) {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }

        match handle.join().await {
            Some((conversation, outcome)) => (conversation, Some(outcome)),
            None => (self.new_conversation(), None),
        }
    }
}

/// Terminal text for one event; `None` for events not shown.
fn render(event: &StreamEvent, cli: &CliConfig, show_tool_calls: bool) -> Option<String> {
    match event {
        StreamEvent::Thinking { content } => Some(format!("{DIM}{content}{RESET}")),
        StreamEvent::Content { content } => Some(format!("{}{content}", cli.ai_prefix)),
        StreamEvent::ToolCall { name, arguments, .. } if show_tool_calls => {
            Some(format!("{DIM}  -> {name}({arguments}){RESET}"))
        }
        StreamEvent::ToolResult { tool_name, result } if show_tool_calls => {
            Some(format!("{DIM}  <- {tool_name}: {result}{RESET}"))
        }
        StreamEvent::Console { level, message, .. } if show_tool_calls => {
            Some(format!("{DIM}  [console.{level}] {message}{RESET}"))
        }
        StreamEvent::ToolError { message } => Some(format!("  [tool error] {message}")),
        StreamEvent::Error { message } => Some(format!("  [error] {message}")),
        _ => None,
    }
}
