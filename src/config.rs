//! Configuration types.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of history turns a conversational prompt replays.
    /// History is trimmed to twice this many entries after each exchange.
    pub history_window: usize,
    /// Registry name of the always-available degraded provider.
    pub degraded_provider: String,
    /// Default completion token cap for seeded workers.
    pub default_max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            degraded_provider: "degraded".to_string(),
            default_max_tokens: 4096,
        }
    }
}
