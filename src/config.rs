use std::env;

/// Server settings, read from the environment with defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Load the server configuration.
pub fn load() -> ServerConfig {
    let port = env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .expect("Invalid PORT");

    ServerConfig { port }
}
