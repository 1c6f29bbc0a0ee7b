use std::{collections::HashMap, env, path::PathBuf};

use crate::{
    error::ConfigError,
    policy::{Persona, ReplyTexts},
};

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_AI_MODEL: &str = "llama-3.3-70b-versatile";

/// Access token the platform issued for one page (or Instagram business account).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCredential {
    pub page_id: String,
    pub access_token: String,
}

/// Pages this deployment answers for. Events for any other page are ignored.
#[derive(Debug, Clone, Default)]
pub struct PageDirectory {
    tokens: HashMap<String, String>,
}

impl PageDirectory {
    /// Parses `page_id:token` pairs separated by commas or newlines.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut directory = Self::default();
        for pair in raw
            .split([',', '\n'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let Some((page_id, token)) = pair.split_once(':') else {
                return Err(ConfigError::Invalid {
                    key: "PAGE_TOKENS",
                    message: format!("expected page_id:token, got '{pair}'"),
                });
            };
            if page_id.trim().is_empty() || token.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "PAGE_TOKENS",
                    message: format!("empty page id or token in '{pair}'"),
                });
            }
            directory.insert(page_id.trim(), token.trim());
        }
        Ok(directory)
    }

    pub fn insert(&mut self, page_id: impl Into<String>, access_token: impl Into<String>) {
        self.tokens.insert(page_id.into(), access_token.into());
    }

    pub fn credential(&self, page_id: &str) -> Option<PageCredential> {
        self.tokens.get(page_id).map(|token| PageCredential {
            page_id: page_id.to_string(),
            access_token: token.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: String,
    pub verify_token: String,
    pub app_secret: String,
    pub pages: PageDirectory,
    pub graph_api_base: String,
    pub ai: AiConfig,
    pub products_path: Option<PathBuf>,
    pub media_storage_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub persona: Persona,
    pub reply_texts: ReplyTexts,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let port = match env_text("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::Invalid {
                key: "PORT",
                message: err.to_string(),
            })?,
            None => 5000,
        };
        let storage = match env_text("STORAGE").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE",
                    message: format!("expected 'postgres' or 'memory', got '{other}'"),
                })
            }
        };

        let default_persona = Persona::default();
        let default_texts = ReplyTexts::default();

        Ok(Self {
            port,
            storage,
            database_url: resolve_database_url(),
            verify_token: env_text("WEBHOOK_VERIFY_TOKEN").unwrap_or_default(),
            app_secret: env_text("META_APP_SECRET").unwrap_or_default(),
            pages: PageDirectory::parse(&env_text("PAGE_TOKENS").unwrap_or_default())?,
            graph_api_base: env_text("GRAPH_API_BASE")
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            ai: AiConfig {
                base_url: env_text("AI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_AI_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key: env_text("AI_API_KEY")
                    .or_else(|| env_text("GROQ_API_KEY"))
                    .unwrap_or_default(),
                model: env_text("AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            },
            products_path: env_text("PRODUCTS_PATH").map(PathBuf::from),
            media_storage_dir: env_text("MEDIA_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            public_base_url: env_text("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            persona: Persona {
                business_name: env_text("BUSINESS_NAME")
                    .unwrap_or(default_persona.business_name),
                offerings: env_text("BUSINESS_OFFERINGS")
                    .map(|raw| parse_offerings(&raw))
                    .filter(|lines| !lines.is_empty())
                    .unwrap_or(default_persona.offerings),
            },
            reply_texts: ReplyTexts {
                attachment_ack: env_text("ATTACHMENT_REPLY")
                    .unwrap_or(default_texts.attachment_ack),
                fallback: env_text("FALLBACK_REPLY").unwrap_or(default_texts.fallback),
            },
        })
    }
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `BUSINESS_OFFERINGS` lines, separated by `|` or newlines.
fn parse_offerings(raw: &str) -> Vec<String> {
    raw.split(['|', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn resolve_database_url() -> String {
    if let Some(url) = env_text("DATABASE_URL") {
        return url;
    }
    let host = env_text("POSTGRES_HOST")
        .or_else(|| env_text("PGHOST"))
        .unwrap_or_else(|| "localhost".to_string());
    let port = env_text("POSTGRES_PORT")
        .or_else(|| env_text("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = env_text("POSTGRES_USER")
        .or_else(|| env_text("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let password = env_text("POSTGRES_PASSWORD")
        .or_else(|| env_text("PGPASSWORD"))
        .unwrap_or_default();
    let db = env_text("POSTGRES_DB")
        .or_else(|| env_text("PGDATABASE"))
        .unwrap_or_else(|| "social_chat".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
