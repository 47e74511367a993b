use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment prefix; `ADMIN_MESSAGE_BROKER` maps to `broker`.
pub const ENV_PREFIX: &str = "ADMIN_MESSAGE_";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Broker implementation, see [`crate::broker::BrokerKind`].
    pub broker: String,
    /// Directory strategy, see [`crate::discovery::DirectoryKind`].
    pub targets_datasource: String,

    pub static_config: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
    pub s3_bucket: String,
    pub s3_object: String,
    pub s3_periodic_update: bool,
    pub s3_periodic_update_delay: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd_endpoint: Option<String>,
    pub sd_service_id: String,
    pub sd_periodic_update_delay: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tg_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tg_target_group_arn: Option<String>,
    pub tg_periodic_update_delay: u64,

    /// Bearer token attached to outbound pushes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    pub messages_path: String,

    pub node_ip: String,
    pub node_port: u16,
    pub use_tls: bool,

    pub push_timeout_ms: u64,
    pub backend_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: "http".into(),
            targets_datasource: "static".into(),
            static_config: "{}".into(),
            s3_endpoint: None,
            s3_bucket: "xyz-hub-admin-messaging".into(),
            s3_object: "instances.json".into(),
            s3_periodic_update: false,
            s3_periodic_update_delay: 0,
            sd_endpoint: None,
            sd_service_id: "xyz-hub".into(),
            sd_periodic_update_delay: 30_000,
            tg_endpoint: None,
            tg_target_group_arn: None,
            tg_periodic_update_delay: 30_000,
            jwt: None,
            messages_path: "/admin/messages".into(),
            node_ip: "127.0.0.1".into(),
            node_port: 8080,
            use_tls: false,
            push_timeout_ms: 5_000,
            backend_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("ADMIN_MESSAGE_JWT_FILE") {
            config.jwt = Some(std::fs::read_to_string(secret_file)?.trim().to_string());
        }

        if config.jwt.as_deref().is_some_and(str::is_empty) {
            config.jwt = None;
        }
        if !config.messages_path.starts_with('/') {
            config.messages_path.insert(0, '/');
        }
        if config.push_timeout_ms == 0 {
            anyhow::bail!("push_timeout_ms must be greater than zero");
        }

        Ok(config)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("admin-broker.toml"))
            .merge(Json::file("admin-broker.json"))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.broker, "http");
            assert_eq!(config.targets_datasource, "static");
            assert_eq!(config.static_config, "{}");
            assert_eq!(config.sd_periodic_update_delay, 30_000);
            assert_eq!(config.messages_path, "/admin/messages");
            assert!(config.jwt.is_none());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "admin-broker.toml",
                r#"
                    targets_datasource = "sd"
                    sd_service_id = "from-file"
                "#,
            )?;
            jail.set_env("ADMIN_MESSAGE_BROKER", "HttpMessageBroker");
            jail.set_env("ADMIN_MESSAGE_JWT", "secret");
            jail.set_env("ADMIN_MESSAGE_SD_SERVICE_ID", "from-env");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.broker, "HttpMessageBroker");
            assert_eq!(config.targets_datasource, "sd");
            assert_eq!(config.sd_service_id, "from-env");
            assert_eq!(config.jwt.as_deref(), Some("secret"));
            Ok(())
        });
    }

    #[test]
    fn jwt_from_secret_file() {
        Jail::expect_with(|jail| {
            jail.create_file("jwt.secret", "file-token\n")?;
            jail.set_env("ADMIN_MESSAGE_JWT_FILE", "jwt.secret");
            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.jwt.as_deref(), Some("file-token"));
            Ok(())
        });
    }

    #[test]
    fn zero_push_timeout_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("ADMIN_MESSAGE_PUSH_TIMEOUT_MS", "0");
            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn messages_path_is_rooted() {
        Jail::expect_with(|jail| {
            jail.set_env("ADMIN_MESSAGE_MESSAGES_PATH", "hub/admin/messages");
            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.messages_path, "/hub/admin/messages");
            Ok(())
        });
    }
}
