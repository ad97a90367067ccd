mod chat;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use a2ascope_agents::a2a::Headers;
use a2ascope_agents::{
    A2ATransport, AgentAuthConfig, AgentRegistry, AgentStore, HttpTransport, RpcMethod,
    SessionDriver, StoreEventKind, TaskClient, TaskPoller, bearer_auth_headers,
    normalize_agent_card, parse_card_text, to_curl, validate_auth, well_known_card_url,
};
use a2ascope_common::AgentId;
use a2ascope_config::{AppConfig, ConfigLoader};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "a2ascope",
    version,
    about = "a2ascope - inspect, chat with, and debug A2A agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Use this directory instead of the default config directory
    #[arg(long, global = true, env = "A2ASCOPE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and validate an agent card without registering it
    Card {
        /// Agent base URL or card URL
        url: String,

        /// Bearer token for the card request
        #[arg(long)]
        bearer: Option<String>,
    },

    /// Register an agent from its URL or a saved card file
    Register {
        /// Agent base URL or card URL
        #[arg(required_unless_present = "file")]
        url: Option<String>,

        /// Read the card from a JSON file instead
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// List registered agents
    Agents,

    /// Remove a registered agent
    Remove { id: String },

    /// Send one message and print the reply
    Send {
        /// Agent id or name
        id: String,

        text: String,

        /// message/send or message/stream
        #[arg(long)]
        method: Option<String>,

        /// Endpoint id from the card, or a URL to send to instead
        #[arg(long)]
        endpoint: Option<String>,

        /// Print the request as a curl command
        #[arg(long)]
        curl: bool,
    },

    /// Interactive chat with an agent
    Chat {
        /// Agent id or name
        id: String,

        /// message/send or message/stream
        #[arg(long)]
        method: Option<String>,
    },

    /// Inspect tasks
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Fetch a task once
    Get {
        id: String,
        task_id: String,

        /// Resolve the endpoint from the agent's card URL (bearer auth only;
        /// the agent must have been registered from a URL)
        #[arg(long)]
        via_card: bool,
    },
    /// Poll a task until it finishes
    Poll {
        id: String,
        task_id: String,

        /// Seconds between polls (defaults to config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Args, Default)]
struct AuthArgs {
    /// Send `Authorization: Bearer <token>`
    #[arg(long, conflicts_with_all = ["api_key_header", "header"])]
    bearer: Option<String>,

    /// Header name carrying an API key
    #[arg(long, requires = "api_key_value", conflicts_with = "header")]
    api_key_header: Option<String>,

    /// API key value
    #[arg(long, requires = "api_key_header")]
    api_key_value: Option<String>,

    /// Extra header as NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE")]
    header: Vec<String>,
}

impl AuthArgs {
    fn into_auth(self) -> Result<AgentAuthConfig> {
        if let Some(token) = self.bearer {
            return Ok(AgentAuthConfig::Bearer { token });
        }
        if let Some(header_name) = self.api_key_header {
            return Ok(AgentAuthConfig::ApiKey {
                header_name,
                header_value: self.api_key_value.unwrap_or_default(),
            });
        }
        if self.header.is_empty() {
            return Ok(AgentAuthConfig::None);
        }
        let mut headers = Headers::new();
        for pair in &self.header {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("header '{pair}' must look like NAME=VALUE"))?;
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
        Ok(AgentAuthConfig::Custom { headers })
    }
}

/// Loaded configuration and the shared engine pieces.
pub(crate) struct App {
    config: AppConfig,
    data_dir: PathBuf,
    registry: AgentRegistry,
    store: Arc<AgentStore>,
    transport: Arc<HttpTransport>,
}

impl App {
    fn new(loader: &ConfigLoader, config: AppConfig) -> Result<Self> {
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| loader.config_dir().to_path_buf());
        let registry = AgentRegistry::new(data_dir.join("agents.json"));
        let default_method: RpcMethod = config.chat.default_method.parse()?;
        let store = Arc::new(AgentStore::with_agents(registry.load()?, default_method));
        let transport = Arc::new(HttpTransport::new(&config.client)?);

        Ok(Self {
            config,
            data_dir,
            registry,
            store,
            transport,
        })
    }

    fn driver(&self) -> SessionDriver<HttpTransport> {
        SessionDriver::new(Arc::clone(&self.transport), Arc::clone(&self.store))
    }

    fn task_client(&self) -> Arc<TaskClient<HttpTransport>> {
        Arc::new(TaskClient::new(
            Arc::clone(&self.transport),
            Some(self.config.tasks.history_length),
        ))
    }

    pub(crate) fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    pub(crate) fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    fn save(&self) -> Result<()> {
        self.registry
            .save_store(&self.store)
            .with_context(|| format!("failed to save {}", self.registry.path().display()))
    }

    /// Look an agent up by id, then by case-insensitive name.
    fn resolve_agent(&self, query: &str) -> Result<AgentId> {
        let id = AgentId::new(query);
        if self.store.contains(&id) {
            return Ok(id);
        }
        let matches: Vec<AgentId> = self
            .store
            .agents()
            .into_iter()
            .filter(|a| a.card.name.eq_ignore_ascii_case(query))
            .map(|a| a.card.id)
            .collect();
        match matches.as_slice() {
            [only] => Ok(only.clone()),
            [] => bail!("no registered agent matches '{query}' (see `a2ascope agents`)"),
            _ => bail!("'{query}' matches several agents; use the agent id"),
        }
    }

    fn apply_method(&self, id: &AgentId, method: Option<&str>) -> Result<()> {
        if let Some(method) = method {
            self.store.set_method(id, method.parse()?)?;
        }
        Ok(())
    }
}

/// Base URLs get the well-known card path; explicit `.json` URLs are kept.
fn card_url(input: &str) -> String {
    if input.trim_end_matches('/').ends_with(".json") {
        input.to_string()
    } else {
        well_known_card_url(input)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    loader.ensure_dirs()?;
    let config = loader.load()?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .with_writer(std::io::stderr)
        .init();

    let app = App::new(&loader, config)?;

    match cli.command {
        Commands::Card { url, bearer } => {
            let url = card_url(&url);
            let auth = bearer.map(|token| AgentAuthConfig::Bearer { token });
            let payload = app
                .transport
                .fetch_card(&url, &bearer_auth_headers(auth.as_ref()))
                .await?;
            match normalize_agent_card(&payload, Some(&url)) {
                Ok(card) => render::print_card(&card),
                Err(e) => {
                    render::print_error(&e);
                    bail!("agent card at {url} is invalid");
                }
            }
        }
        Commands::Register { url, file, auth } => {
            let auth = auth.into_auth()?;
            validate_auth(Some(&auth))?;

            let card = match (url, file) {
                (_, Some(path)) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    parse_card_text(&text, None)
                }
                (Some(url), None) => {
                    let url = card_url(&url);
                    let payload = app
                        .transport
                        .fetch_card(&url, &bearer_auth_headers(Some(&auth)))
                        .await?;
                    normalize_agent_card(&payload, Some(&url))
                }
                (None, None) => bail!("give an agent URL or --file"),
            };
            let card = match card {
                Ok(card) => card,
                Err(e) => {
                    render::print_error(&e);
                    bail!("agent was not registered");
                }
            };

            let name = card.name.clone();
            let id = app.store.register(card, auth);
            app.save()?;
            println!("{} {name} ({id})", "Registered".green().bold());
        }
        Commands::Agents => {
            let agents = app.store.agents();
            if agents.is_empty() {
                println!("No agents registered. Add one with `a2ascope register <url>`.");
            }
            for agent in agents {
                render::print_agent_line(&agent);
            }
        }
        Commands::Remove { id } => {
            let id = app.resolve_agent(&id)?;
            app.store.remove(&id);
            app.save()?;
            println!("Removed {id}");
        }
        Commands::Send {
            id,
            text,
            method,
            endpoint,
            curl,
        } => {
            let id = app.resolve_agent(&id)?;
            app.apply_method(&id, method.as_deref())?;
            if let Some(endpoint) = endpoint {
                let known = app
                    .store
                    .card(&id)
                    .is_some_and(|c| c.endpoint(&endpoint).is_some());
                if known {
                    app.store.select_endpoint(&id, &endpoint)?;
                } else {
                    app.store.set_endpoint_override(&id, Some(&endpoint))?;
                }
            }

            let outcome = app.driver().send(&id, &text).await?;
            if curl {
                if let Some(log) = app.store.log(&id, &outcome.log_id) {
                    eprintln!("{}", to_curl(&log));
                }
            }
            render::print_reply(&outcome.content, outcome.is_error());
            if outcome.is_error() {
                bail!(
                    "{}",
                    app.store
                        .last_error(&id)
                        .unwrap_or_else(|| "the agent reported an error".to_string())
                );
            }
        }
        Commands::Chat { id, method } => {
            let id = app.resolve_agent(&id)?;
            app.apply_method(&id, method.as_deref())?;
            chat::run(&app, app.driver(), id).await?;
        }
        Commands::Task { action } => match action {
            TaskCommands::Get {
                id,
                task_id,
                via_card,
            } => {
                let id = app.resolve_agent(&id)?;
                let client = app.task_client();
                let fetched = if via_card {
                    let card = app
                        .store
                        .card(&id)
                        .ok_or_else(|| anyhow!("agent {id} is not registered"))?;
                    let auth = app.store.auth(&id);
                    client
                        .fetch_task(&app.store, &id, &card.url, &task_id, None, auth.as_ref())
                        .await?
                } else {
                    client.fetch_and_track(&app.store, &id, &task_id).await?
                };
                match fetched {
                    Some(task) => render::print_task(&task),
                    None => println!("A fetch for {task_id} is already running."),
                }
            }
            TaskCommands::Poll {
                id,
                task_id,
                interval,
            } => {
                let id = app.resolve_agent(&id)?;
                let period = interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| app.config.tasks.poll_interval());
                poll_task(&app, &id, &task_id, period).await?;
            }
        },
    }

    Ok(())
}

async fn poll_task(app: &App, id: &AgentId, task_id: &str, period: Duration) -> Result<()> {
    let poller = TaskPoller::new(app.task_client(), Arc::clone(&app.store), period);
    let mut events = app.store.subscribe();
    poller.start(id, task_id);
    println!("Polling {task_id} every {}s (Ctrl-C to stop)", period.as_secs());

    let mut check = tokio::time::interval(Duration::from_millis(500));
    let mut last_state = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                poller.stop_all();
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { continue };
                if event.kind != StoreEventKind::Tasks || &event.agent_id != id {
                    continue;
                }
                let task = app.store.tasks(id).into_iter().find(|t| t.task_id == task_id);
                if let Some(task) = task {
                    if last_state.as_ref() != Some(&task.state) {
                        render::print_task(&task);
                        last_state = Some(task.state.clone());
                    }
                }
            }
            _ = check.tick() => {
                if !poller.is_polling(id, task_id) {
                    break;
                }
            }
        }
    }

    if let Some(log) = app.store.logs(id).last() {
        if log.status == Some(a2ascope_agents::chat::LogStatus::Error) {
            bail!("last poll failed: {}", log.response_payload.clone().unwrap_or_default());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pairs_become_custom_auth() {
        let args = AuthArgs {
            header: vec!["X-Tenant=acme".into(), "X-Key = k=v".into()],
            ..AuthArgs::default()
        };
        let AgentAuthConfig::Custom { headers } = args.into_auth().unwrap() else {
            panic!("expected custom auth");
        };
        assert_eq!(headers["X-Tenant"], "acme");
        assert_eq!(headers["X-Key"], "k=v");
    }

    #[test]
    fn malformed_header_is_rejected() {
        let args = AuthArgs {
            header: vec!["no-equals".into()],
            ..AuthArgs::default()
        };
        assert!(args.into_auth().is_err());
    }

    #[test]
    fn card_urls() {
        assert_eq!(
            card_url("https://a.example"),
            "https://a.example/.well-known/agent-card.json"
        );
        assert_eq!(card_url("https://a.example/card.json"), "https://a.example/card.json");
    }

    #[test]
    fn cli_parses_register_with_api_key() {
        let cli = Cli::try_parse_from([
            "a2ascope",
            "register",
            "https://a.example",
            "--api-key-header",
            "X-Key",
            "--api-key-value",
            "secret",
        ])
        .unwrap();
        let Commands::Register { url, auth, .. } = cli.command else {
            panic!("expected register");
        };
        assert_eq!(url.as_deref(), Some("https://a.example"));
        assert_eq!(
            auth.into_auth().unwrap(),
            AgentAuthConfig::ApiKey {
                header_name: "X-Key".into(),
                header_value: "secret".into()
            }
        );
    }

    #[test]
    fn cli_parses_task_get_via_card() {
        let cli = Cli::try_parse_from(["a2ascope", "task", "get", "echo", "t-1", "--via-card"]).unwrap();
        let Commands::Task {
            action: TaskCommands::Get { task_id, via_card, .. },
        } = cli.command
        else {
            panic!("expected task get");
        };
        assert_eq!(task_id, "t-1");
        assert!(via_card);
    }

    #[test]
    fn app_loads_saved_agents_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_dir(dir.path());
        loader.ensure_dirs().unwrap();
        let app = App::new(&loader, AppConfig::default()).unwrap();
        assert!(app.store.is_empty());

        let card = normalize_agent_card(
            &serde_json::json!({ "name": "Echo", "url": "https://e.example" }),
            None,
        )
        .unwrap();
        app.store.register(card, AgentAuthConfig::None);
        app.save().unwrap();

        let reloaded = App::new(&loader, AppConfig::default()).unwrap();
        assert_eq!(reloaded.resolve_agent("echo").unwrap().as_str(), "Echo");
        assert!(reloaded.resolve_agent("nobody").is_err());
    }
}
