use std::env;

/// Process configuration, read from the environment the way the deployment
/// tooling provides it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote KV endpoint, e.g. "http://127.0.0.1:9090".
    pub kv_url: String,
    /// Listen address of the RPC server.
    pub listen_addr: String,
    /// CPU worker threads reserved for replay.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kv_url: "http://127.0.0.1:9090".to_owned(),
            listen_addr: "0.0.0.0:8545".to_owned(),
            workers: 4,
        }
    }
}

#[must_use]
pub fn load_config_from_environment() -> Config {
    let defaults = Config::default();

    let kv_url = env::var("TRACED_KV_URL").unwrap_or(defaults.kv_url);
    let listen_addr = env::var("TRACED_LISTEN_ADDR").unwrap_or(defaults.listen_addr);
    let workers = env::var("TRACED_WORKERS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(defaults.workers);

    Config {
        kv_url,
        listen_addr,
        workers,
    }
}
