//! Application-wide constants
//!
//! Defaults shared by the registry, runtime, tools, and server.

/// Persistence layout
pub mod storage {
    /// Directory name under the user's config directory
    pub const CONFIG_DIR_NAME: &str = "stick-ai";
    /// Environment variable that overrides the persistence root
    pub const HOME_ENV: &str = "STICK_HOME";
    pub const REGISTRY_FILE: &str = "registry.json";
    pub const AGENTS_DIR: &str = "agents";
    pub const PIDS_DIR: &str = "pids";
    pub const LOGS_DIR: &str = "logs";
    /// Per-agent metadata file inside `agents/<name>/`
    pub const AGENT_CONFIG_FILE: &str = "config.json";
    /// Agent definition file inside a project directory
    pub const PROJECT_DEFINITION_FILE: &str = "config/agent.json";
}

/// Agent server process
pub mod server {
    use std::time::Duration;

    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    /// Binary launched by the process manager
    pub const SERVER_BINARY_NAME: &str = "stick-agent-server";
    /// Environment variable overriding the server binary path
    pub const SERVER_BINARY_ENV: &str = "STICK_AGENT_SERVER_BIN";
    /// Maximum accepted request body
    pub const MAX_BODY_BYTES: usize = 1024 * 1024;
    /// How long callers wait for `/health` after spawning
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
    pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);
    pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
}

/// LLM provider defaults
pub mod ai {
    use std::time::Duration;

    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;

    pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

    pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
    pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
    pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
    pub const ANTHROPIC_VERSION: &str = "2023-06-01";

    pub const OLLAMA_DEFAULT_MODEL: &str = "llama3.2";
    pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
    pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Whole-request budget for non-streaming calls
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    /// Maximum silence between stream chunks
    pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
}

/// Tool sandbox limits
pub mod tools {
    use std::time::Duration;

    pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SHELL_MAX_OUTPUT: usize = 1024 * 1024;
    pub const SHELL_KILL_GRACE: Duration = Duration::from_millis(800);

    pub const FILE_MAX_READ: u64 = 10 * 1024 * 1024;

    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const HTTP_MAX_RESPONSE: usize = 10 * 1024 * 1024;
    pub const HTTP_USER_AGENT: &str = "stick-agent/1.0";
}
