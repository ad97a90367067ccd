use a2ascope_agents::chat::{LogStatus, RpcLogEntry};
use a2ascope_agents::{AgentCard, ChatRole, RegisteredAgent, TrackedTask};
use a2ascope_common::Error;
use colored::Colorize;

pub fn print_card(card: &AgentCard) {
    println!("{} {}", card.name.bold(), format!("({})", card.id).dimmed());
    if let Some(description) = &card.description {
        println!("  {description}");
    }
    if let Some(version) = &card.version {
        println!("  version: {version}");
    }
    if let Some(org) = card.provider.as_ref().and_then(|p| p.organization.as_deref()) {
        println!("  provider: {org}");
    }
    println!(
        "  streaming: {}  push notifications: {}",
        yes_no(card.capabilities.streaming),
        yes_no(card.capabilities.push_notifications)
    );

    println!("  endpoints:");
    for endpoint in &card.endpoints {
        println!(
            "    [{}] {} {} ({})",
            endpoint.id, endpoint.name, endpoint.url, endpoint.protocol
        );
    }
    if !card.skills.is_empty() {
        println!("  skills:");
        for skill in &card.skills {
            match &skill.description {
                Some(d) => println!("    - {}: {d}", skill.name),
                None => println!("    - {}", skill.name),
            }
        }
    }
}

pub fn print_agent_line(agent: &RegisteredAgent) {
    let card = &agent.card;
    println!(
        "{}  {}  {} endpoint(s)  streaming={}  auth={}",
        card.name.bold(),
        card.id.to_string().dimmed(),
        card.endpoints.len(),
        yes_no(card.capabilities.streaming),
        agent.auth.kind()
    );
}

/// Print an error as the sentence a user should see; card problems get
/// one line each.
pub fn print_error(error: &Error) {
    match error {
        Error::InvalidCard(problems) => {
            eprintln!("{}", "Invalid agent card:".red().bold());
            for problem in problems {
                eprintln!("  - {problem}");
            }
        }
        other => eprintln!("{} {}", "Error:".red().bold(), other.user_message()),
    }
}

pub fn print_reply(content: &str, is_error: bool) {
    let label = role_label(ChatRole::Assistant);
    if is_error {
        println!("{label} {}", content.red());
    } else {
        println!("{label} {content}");
    }
}

pub fn role_label(role: ChatRole) -> String {
    match role {
        ChatRole::User => format!("{}>", role.label().to_lowercase()).cyan().to_string(),
        ChatRole::Assistant => format!("{}>", "agent").green().to_string(),
    }
}

pub fn print_task(task: &TrackedTask) {
    let state = task.state.to_string();
    let state = if task.state.is_terminal() {
        state.bold()
    } else {
        state.yellow()
    };
    print!("task {} {state}", task.task_id);
    if let Some(message) = &task.message {
        print!(": {message}");
    }
    println!(
        "  {}",
        format!("(updated {})", task.last_updated.format("%H:%M:%S")).dimmed()
    );
}

pub fn print_log(entry: &RpcLogEntry) {
    let status = match entry.status {
        Some(LogStatus::Success) => "ok".green(),
        Some(LogStatus::Error) => "error".red(),
        None => "pending".yellow(),
    };
    let method = entry
        .request_payload
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("?");
    let http = entry
        .http_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let duration = entry
        .duration_ms
        .map(|d| format!("{d}ms"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} {status} {method} {} http={http} {duration}",
        entry.started_at.format("%H:%M:%S"),
        entry.endpoint_url
    );
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
