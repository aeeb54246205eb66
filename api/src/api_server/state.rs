use traced_lib::config::Config;
use traced_lib::kv::RemoteKv;

/// Process-wide server state: the configuration and the shared KV channel.
/// Each request opens its own read transaction over the channel.
pub struct State {
    pub config: Config,
    pub kv: RemoteKv,
}

impl State {
    #[must_use]
    pub fn new(config: Config, kv: RemoteKv) -> Self {
        Self { config, kv }
    }
}
