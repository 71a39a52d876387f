use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use index::Neo4jStoreConfig;
use llm::OllamaConfig;
use query::PipelineConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "rag.toml";
pub const ENV_PREFIX: &str = "RAG_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub neo4j: Neo4jStoreConfig,
    pub ollama: OllamaConfig,
    /// Base URL of the course catalogue; the course tool is off when unset.
    pub courses_url: Option<String>,
    /// Pipeline tuning. Starts from the preset chosen by `mode`; any key
    /// set in the file or environment overrides that preset field.
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Small context, tight timeouts
    Accurate,  // Graph expansion, strict retrieval
    Balanced,  // Defaults
}

impl OperationMode {
    pub fn preset(self) -> PipelineConfig {
        match self {
            OperationMode::Fast => PipelineConfig::fast(),
            OperationMode::Accurate => PipelineConfig::accurate(),
            OperationMode::Balanced => PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig {
                bind: "0.0.0.0:3000".to_string(),
            },
            logging: LoggingConfig {
                format: LogFormat::Pretty,
                filter: "info".to_string(),
            },
            neo4j: Neo4jStoreConfig::default(),
            ollama: OllamaConfig::default(),
            courses_url: None,
            pipeline: OperationMode::Balanced.preset(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the `mode` preset, then `rag.toml` when present, then
    /// `RAG_*` variables (`RAG_NEO4J__PASSWORD`, `RAG_PIPELINE__FALLBACK`, ...).
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(CONFIG_FILE)).extract().map_err(Box::new)
    }

    pub fn figment(file: &Path) -> Figment {
        let mut overrides = Figment::new();
        if file.exists() {
            overrides = overrides.merge(Toml::file(file));
        }
        let overrides = overrides.merge(Env::prefixed(ENV_PREFIX).split("__"));

        // An invalid mode still fails the final extract.
        let mode = overrides
            .extract_inner::<OperationMode>("mode")
            .unwrap_or(OperationMode::Balanced);

        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Serialized::default("pipeline", mode.preset()))
            .merge(overrides)
    }
}
