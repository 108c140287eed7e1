use serde::Deserialize;

/// Server configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind on (default "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// UDP port for control traffic.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Maximum concurrent players.
    #[serde(default = "default_max_users")]
    pub max_users: u16,

    /// Sent to every player in LOGIN_OK.
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// Server-wide join password. None means the server is open.
    #[serde(default)]
    pub server_password: Option<String>,

    /// Whether anyone may create unregistered channels, or only admins.
    #[serde(default = "default_allow_guest_channels")]
    pub allow_guest_channels: bool,

    /// Name of the channel bootstrapped as DEFAULT when the store holds
    /// no channels at all.
    #[serde(default = "default_channel_name")]
    pub default_channel_name: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_udp_port() -> u16 {
    8767
}

fn default_max_users() -> u16 {
    64
}

fn default_welcome_message() -> String {
    "Welcome to palaver.".into()
}

fn default_allow_guest_channels() -> bool {
    true
}

fn default_channel_name() -> String {
    "Lobby".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            udp_port: default_udp_port(),
            max_users: default_max_users(),
            welcome_message: default_welcome_message(),
            server_password: None,
            allow_guest_channels: default_allow_guest_channels(),
            default_channel_name: default_channel_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ServerConfig::default();
        assert_eq!(config.udp_port, 8767);
        assert_eq!(config.max_users, 64);
        assert!(config.server_password.is_none());
        assert!(config.allow_guest_channels);
        assert_eq!(config.default_channel_name, "Lobby");
    }

    #[test]
    fn config_toml_deserialization() {
        let toml = r#"
            udp_port = 9000
            max_users = 32
            welcome_message = "hi"
            server_password = "sekrit"
            allow_guest_channels = false
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.udp_port, 9000);
        assert_eq!(config.max_users, 32);
        assert_eq!(config.welcome_message, "hi");
        assert_eq!(config.server_password.as_deref(), Some("sekrit"));
        assert!(!config.allow_guest_channels);
        // unspecified fields fall back to defaults
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.default_channel_name, "Lobby");
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.udp_port, 8767);
    }
}
