use std::path::{Path, PathBuf};

use a2ascope_common::{AgentId, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::AgentAuthConfig;
use crate::card::normalize_agent_card;
use crate::store::{AgentStore, RegisteredAgent};

const REGISTRY_VERSION: u32 = 1;

/// On-disk form of one agent. The card is kept as published and
/// normalized again on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAgent {
    id: AgentId,
    url: String,
    card: Value,
    #[serde(default)]
    auth: AgentAuthConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    agents: Vec<StoredAgent>,
}

/// Registered agents persisted as `agents.json`.
pub struct AgentRegistry {
    path: PathBuf,
}

impl AgentRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved agents. A missing file is an empty registry; entries
    /// whose card no longer validates are skipped.
    pub fn load(&self) -> Result<Vec<RegisteredAgent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: RegistryFile = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "failed to parse agent registry {}: {e}",
                self.path.display()
            ))
        })?;

        let mut agents = Vec::with_capacity(file.agents.len());
        for stored in file.agents {
            match normalize_agent_card(&stored.card, Some(&stored.url)) {
                Ok(mut card) => {
                    card.id = stored.id;
                    agents.push(RegisteredAgent {
                        card,
                        auth: stored.auth,
                    });
                }
                Err(e) => warn!("skipping saved agent '{}': {e}", stored.id),
            }
        }
        info!(
            "loaded {} agents from {}",
            agents.len(),
            self.path.display()
        );
        Ok(agents)
    }

    pub fn save(&self, agents: &[RegisteredAgent]) -> Result<()> {
        let file = RegistryFile {
            version: REGISTRY_VERSION,
            agents: agents
                .iter()
                .map(|agent| StoredAgent {
                    id: agent.card.id.clone(),
                    url: agent.card.url.clone(),
                    card: agent.card.raw.clone(),
                    auth: agent.auth.clone(),
                })
                .collect(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Save everything currently registered in `store`.
    pub fn save_store(&self, store: &AgentStore) -> Result<()> {
        self.save(&store.agents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_then_load_restores_cards_and_auth() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path().join("agents.json"));
        let card = normalize_agent_card(
            &json!({ "name": "Echo", "url": "https://echo.example/rpc", "skills": ["echo"] }),
            Some("https://echo.example/.well-known/agent-card.json"),
        )
        .unwrap();
        let store = AgentStore::default();
        store.register(card, AgentAuthConfig::Bearer { token: "tok".into() });

        registry.save_store(&store).unwrap();
        let loaded = registry.load().unwrap();

        assert_eq!(loaded.len(), 1);
        let agent = &loaded[0];
        assert_eq!(agent.card.id.as_str(), "https://echo.example/.well-known/agent-card.json");
        assert_eq!(agent.card.name, "Echo");
        assert_eq!(agent.card.endpoints[0].url, "https://echo.example/rpc");
        assert_eq!(agent.card.skills.len(), 1);
        assert_eq!(agent.auth, AgentAuthConfig::Bearer { token: "tok".into() });
    }

    #[test]
    fn name_based_ids_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(dir.path().join("agents.json"));
        let card = normalize_agent_card(&json!({ "name": "Pasted", "url": "https://p.example" }), None).unwrap();
        registry
            .save(&[RegisteredAgent { card, auth: AgentAuthConfig::None }])
            .unwrap();

        let loaded = registry.load().unwrap();
        assert_eq!(loaded[0].card.id.as_str(), "Pasted");
    }

    #[test]
    fn missing_file_is_empty_and_invalid_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let registry = AgentRegistry::new(&path);
        assert!(registry.load().unwrap().is_empty());

        std::fs::write(
            &path,
            json!({
                "version": 1,
                "agents": [
                    { "id": "broken", "url": "https://b.example", "card": { "description": "no name" } },
                    { "id": "ok", "url": "https://ok.example", "card": { "name": "Ok", "url": "https://ok.example" } }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let loaded = registry.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].card.id.as_str(), "ok");
        assert_eq!(loaded[0].auth, AgentAuthConfig::None);
    }

    #[test]
    fn corrupt_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(AgentRegistry::new(path).load(), Err(Error::Config(_))));
    }
}
