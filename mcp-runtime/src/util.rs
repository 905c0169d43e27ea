use std::path::PathBuf;

use serde_json::Value;

pub const USER_AGENT: &str = concat!("buildlog-mcp/", env!("CARGO_PKG_VERSION"));

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// `~/.buildlog`, the directory the editor extension creates on install.
pub fn default_feed_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".buildlog")
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_crate_version() {
        assert!(USER_AGENT.starts_with("buildlog-mcp/"));
        assert!(USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn default_feed_dir_ends_with_buildlog() {
        assert!(default_feed_dir().ends_with(".buildlog"));
    }
}
