//! SkillBridge configuration loader.

use anyhow::Result;
use reqwest::Url;
use sb_relay::{RelaySettings, SkillDescriptor, SkillRegistry};
use sb_schema::AppId;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub host: HostConfig,
    pub token_service: TokenServiceConfig,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// App id of this host; sent with every relay post.
    pub app_id: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoint skills use to call back into this host.
    pub host_endpoint: String,
    /// Auth connection used for every token exchange.
    pub connection_name: String,
}

fn default_port() -> u16 {
    36000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenServiceConfig {
    pub endpoint: String,
    #[serde(default = "default_token_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_token_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillEntry {
    pub id: String,
    pub app_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// App ids allowed to call the channel-service endpoints. `*` allows any
    /// caller. An empty list falls back to the registered skills' app ids.
    #[serde(default)]
    pub allowed_callers: Vec<String>,
}

impl BridgeConfig {
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let (cfg, _path) = Self::load_with_path(path).await?;
        Ok(cfg)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: BridgeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SKILLBRIDGE_APP_ID") {
            if !v.trim().is_empty() {
                self.host.app_id = v;
            }
        }
        if let Ok(v) = std::env::var("SKILLBRIDGE_HOST_ENDPOINT") {
            if !v.trim().is_empty() {
                self.host.host_endpoint = v;
            }
        }
        if let Ok(v) = std::env::var("SKILLBRIDGE_TOKEN_ENDPOINT") {
            if !v.trim().is_empty() {
                self.token_service.endpoint = v;
            }
        }
        if let Ok(v) = std::env::var("SKILLBRIDGE_PORT") {
            if let Ok(port) = v.trim().parse() {
                self.host.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.app_id.trim().is_empty() {
            return Err(anyhow::anyhow!("host.app_id is required"));
        }
        if self.host.connection_name.trim().is_empty() {
            return Err(anyhow::anyhow!("host.connection_name is required"));
        }
        if self.host.port == 0 {
            return Err(anyhow::anyhow!("host.port must be > 0"));
        }
        Url::parse(&self.host.host_endpoint)
            .map_err(|e| anyhow::anyhow!("host.host_endpoint is not a valid url: {e}"))?;
        Url::parse(&self.token_service.endpoint)
            .map_err(|e| anyhow::anyhow!("token_service.endpoint is not a valid url: {e}"))?;
        if self.token_service.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("token_service.timeout_seconds must be > 0"));
        }

        let mut seen_app_ids = HashSet::new();
        for skill in &self.skills {
            if skill.id.trim().is_empty() {
                return Err(anyhow::anyhow!("skills entries require a non-empty id"));
            }
            if skill.app_id.trim().is_empty() {
                return Err(anyhow::anyhow!("skill {} requires an app_id", skill.id));
            }
            Url::parse(&skill.endpoint).map_err(|e| {
                anyhow::anyhow!("skill {} endpoint is not a valid url: {e}", skill.id)
            })?;
            if !seen_app_ids.insert(skill.app_id.trim().to_ascii_lowercase()) {
                return Err(anyhow::anyhow!(
                    "skill app_id {} is registered more than once",
                    skill.app_id
                ));
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<SkillRegistry> {
        let mut skills = Vec::with_capacity(self.skills.len());
        for entry in &self.skills {
            skills.push(SkillDescriptor {
                id: entry.id.clone(),
                app_id: AppId::new(entry.app_id.trim()),
                endpoint: Url::parse(&entry.endpoint)?,
            });
        }
        Ok(SkillRegistry::new(skills))
    }

    pub fn relay_settings(&self) -> Result<RelaySettings> {
        Ok(RelaySettings {
            bot_id: self.host.app_id.clone(),
            connection_name: self.host.connection_name.clone(),
            host_endpoint: Url::parse(&self.host.host_endpoint)?,
        })
    }

    pub fn token_endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&self.token_service.endpoint)?)
    }

    /// Callers permitted on the channel-service surface. Defaults to the
    /// registered skills when no explicit list is configured.
    pub fn effective_allowed_callers(&self) -> Vec<String> {
        let explicit: Vec<String> = self
            .security
            .allowed_callers
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !explicit.is_empty() {
            return explicit;
        }
        self.skills.iter().map(|s| s.app_id.clone()).collect()
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".skillbridge").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[host]
app_id = "host-app-id"
host_endpoint = "https://host.example/api/skills"
connection_name = "sso-connection"

[token_service]
endpoint = "https://token.example/exchange"

[[skills]]
id = "echo"
app_id = "1111-aaaa"
endpoint = "https://echo.skill.example/api/messages"
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg: BridgeConfig = toml::from_str(minimal_toml()).expect("parse config");
        cfg.validate().expect("config valid");
        assert_eq!(cfg.host.port, 36000);
        assert_eq!(cfg.token_service.timeout_seconds, 30);
        assert_eq!(cfg.skills.len(), 1);
    }

    #[test]
    fn registry_is_built_from_skill_entries() {
        let cfg: BridgeConfig = toml::from_str(minimal_toml()).expect("parse config");
        let registry = cfg.registry().expect("build registry");
        let skill = registry
            .lookup_by_app_id("1111-AAAA")
            .expect("lookup is case-insensitive");
        assert_eq!(skill.id, "echo");
    }

    #[test]
    fn allowed_callers_default_to_registered_skills() {
        let cfg: BridgeConfig = toml::from_str(minimal_toml()).expect("parse config");
        assert_eq!(cfg.effective_allowed_callers(), vec!["1111-aaaa".to_string()]);
    }

    #[test]
    fn explicit_allowed_callers_win() {
        let toml_str = format!(
            "{}\n[security]\nallowed_callers = [\"*\"]\n",
            minimal_toml()
        );
        let cfg: BridgeConfig = toml::from_str(&toml_str).expect("parse config");
        assert_eq!(cfg.effective_allowed_callers(), vec!["*".to_string()]);
    }

    #[test]
    fn duplicate_skill_app_ids_are_rejected() {
        let toml_str = format!(
            "{}\n[[skills]]\nid = \"dup\"\napp_id = \"1111-AAAA\"\nendpoint = \"https://dup.example\"\n",
            minimal_toml()
        );
        let cfg: BridgeConfig = toml::from_str(&toml_str).expect("parse config");
        let err = cfg.validate().expect_err("duplicate app ids must fail");
        assert!(err.to_string().contains("registered more than once"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let toml_str = minimal_toml().replace("https://echo.skill.example/api/messages", "not a url");
        let cfg: BridgeConfig = toml::from_str(&toml_str).expect("parse config");
        assert!(cfg.validate().is_err());
    }
}
