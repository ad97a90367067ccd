use std::io::Write;

use a2ascope_agents::{
    ExportFormat, HttpTransport, MessageStatus, RpcMethod, SessionDriver, StoreEventKind,
    export_conversation, to_curl,
};
use a2ascope_common::AgentId;
use anyhow::Result;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::App;
use crate::render;

const LOG_TAIL: usize = 10;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Quit,
    Help,
    New,
    Retry,
    Tasks,
    Logs,
    Curl,
    Export(String),
    Method(String),
    Unknown(String),
}

impl Command {
    /// `None` for plain chat text.
    fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().unwrap_or_default().to_string();
        Some(match name {
            "quit" | "exit" | "q" => Command::Quit,
            "help" | "?" => Command::Help,
            "new" => Command::New,
            "retry" => Command::Retry,
            "tasks" => Command::Tasks,
            "logs" => Command::Logs,
            "curl" => Command::Curl,
            "export" => Command::Export(if arg.is_empty() { "md".to_string() } else { arg }),
            "method" => Command::Method(arg),
            other => Command::Unknown(other.to_string()),
        })
    }
}

fn print_help() {
    println!("  /new             start a new conversation");
    println!("  /retry           resend the message behind the last failed reply");
    println!("  /tasks           list tasks seen in this session");
    println!("  /logs            show recent requests");
    println!("  /curl            print the last request as a curl command");
    println!("  /export json|md  save the conversation");
    println!("  /method <name>   message/send or message/stream");
    println!("  /quit            leave");
}

pub async fn run(app: &App, driver: SessionDriver<HttpTransport>, id: AgentId) -> Result<()> {
    let store = app.store();
    if let Some(card) = store.card(&id) {
        let (url, method) = store
            .read(&id, |s| (s.endpoint_url().map(str::to_string), s.method))
            .unwrap_or((None, RpcMethod::MessageSend));
        println!(
            "Chatting with {} at {} using {}. Type /help for commands.",
            card.name.bold(),
            url.unwrap_or_default(),
            method
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", render::role_label(a2ascope_agents::ChatRole::User));
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            None => exchange(&driver, &id, Some(line)).await,
            Some(Command::Quit) => break,
            Some(Command::Help) => print_help(),
            Some(Command::New) => {
                store.new_conversation(&id);
                println!("{}", "New conversation started.".dimmed());
            }
            Some(Command::Retry) => exchange(&driver, &id, None).await,
            Some(Command::Tasks) => {
                let tasks = store.tasks(&id);
                if tasks.is_empty() {
                    println!("{}", "No tasks yet.".dimmed());
                }
                tasks.iter().for_each(render::print_task);
            }
            Some(Command::Logs) => {
                let logs = store.logs(&id);
                let skip = logs.len().saturating_sub(LOG_TAIL);
                logs.iter().skip(skip).for_each(render::print_log);
            }
            Some(Command::Curl) => match store.logs(&id).last() {
                Some(entry) => println!("{}", to_curl(entry)),
                None => println!("{}", "No requests yet.".dimmed()),
            },
            Some(Command::Export(format)) => {
                let result = format
                    .parse::<ExportFormat>()
                    .and_then(|f| export_conversation(store, &id, f, &app.exports_dir()));
                match result {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(e) => render::print_error(&e),
                }
            }
            Some(Command::Method(name)) => {
                match name.parse::<RpcMethod>().and_then(|m| store.set_method(&id, m)) {
                    Ok(()) => println!("{}", format!("Method set to {name}.").dimmed()),
                    Err(e) => render::print_error(&e),
                }
            }
            Some(Command::Unknown(name)) => {
                println!("Unknown command /{name}. Type /help for commands.");
            }
        }
    }
    Ok(())
}

/// Send `text`, or retry the last failed reply when `text` is `None`,
/// printing task transitions while the exchange runs.
async fn exchange(driver: &SessionDriver<HttpTransport>, id: &AgentId, text: Option<&str>) {
    let store = driver.store();
    let mut events = store.subscribe();

    let send = async {
        match text {
            Some(text) => driver.send(id, text).await.map(Some),
            None => match driver.last_failed_reply(id) {
                Some(failed) => driver.retry(id, &failed).await.map(Some),
                None => Ok(None),
            },
        }
    };
    tokio::pin!(send);

    let mut shown_state = None;
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            event = events.recv() => {
                let Ok(event) = event else { continue };
                if &event.agent_id != id || event.kind != StoreEventKind::Tasks {
                    continue;
                }
                let latest = store
                    .read(id, |s| s.messages.last().and_then(|m| m.task_state.clone()))
                    .flatten();
                if latest.is_some() && latest != shown_state {
                    if let Some(state) = &latest {
                        println!("  {}", format!("[{state}]").dimmed());
                    }
                    shown_state = latest;
                }
            }
        }
    };

    match result {
        Ok(Some(outcome)) => {
            debug!("exchange finished with {:?}", outcome.status);
            render::print_reply(&outcome.content, outcome.status == MessageStatus::Error);
            if outcome.is_error() {
                println!("{}", "Type /retry to send it again.".dimmed());
            }
        }
        Ok(None) => println!("{}", "Nothing to retry.".dimmed()),
        Err(e) => render::print_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
        assert_eq!(Command::parse("/export json"), Some(Command::Export("json".into())));
        assert_eq!(Command::parse("/export"), Some(Command::Export("md".into())));
        assert_eq!(
            Command::parse("/method message/stream"),
            Some(Command::Method("message/stream".into()))
        );
        assert_eq!(Command::parse("/frobnicate"), Some(Command::Unknown("frobnicate".into())));
    }
}
