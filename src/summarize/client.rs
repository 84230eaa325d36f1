//! LLM client: provider abstraction + file cache + daily call budget.
//!
//! The provider does the real remote call; the caching wrapper is shared
//! between production and tests so both paths exercise the same budget and
//! cache logic. A cache hit never spends budget.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport failure: {0}")]
    Transport(String),

    #[error("llm API returned status {0}")]
    Status(u16),

    #[error("llm credentials missing (LLM_API_KEY)")]
    Unavailable,

    #[error("llm daily call budget exhausted")]
    BudgetExhausted,
}

/// Raw completion plus the provider-reported token spend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError>;
    fn provider_name(&self) -> &'static str;
}

pub type DynLlmClient = Arc<dyn LlmClient>;

// ------------------------------------------------------------
// OpenAI-backed provider
// ------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiClient {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let http = reqwest::Client::builder()
            .user_agent("pricing-radar/0.1 (batch pricing intelligence)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Unavailable);
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f64,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            total_tokens: u32,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            tokens_used: body.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Deterministic mock for tests and dry runs
// ------------------------------------------------------------

/// Returns scripted responses in order; repeats the last one when the script
/// runs out. An empty script fails every call.
pub struct MockLlmClient {
    script: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
}

impl MockLlmClient {
    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            script: Mutex::new(responses),
            cursor: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<LlmResponse, LlmError> {
        let script = self.script.lock().expect("mock script");
        if script.is_empty() {
            return Err(LlmError::Unavailable);
        }
        let mut cursor = self.cursor.lock().expect("mock cursor");
        let idx = (*cursor).min(script.len() - 1);
        *cursor += 1;
        Ok(LlmResponse {
            content: script[idx].clone(),
            tokens_used: 0,
        })
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching wrapper: prompt-hash file cache + daily call budget
// ------------------------------------------------------------

pub struct CachingLlmClient<P: LlmClient> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: LlmClient> CachingLlmClient<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit: u32) -> Self {
        let _ = fs::create_dir_all(&cache_dir);
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter,
        }
    }
}

#[async_trait]
impl<P: LlmClient> LlmClient for CachingLlmClient<P> {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmResponse, LlmError> {
        {
            let mut g = self.counter.lock().expect("poisoned counter");
            if g.is_expired() {
                g.reset_to_today();
                let _ = save_daily_counter(&self.cache_dir, &g);
            }
            if g.count >= self.daily_limit {
                return Err(LlmError::BudgetExhausted);
            }
        }

        let key = prompt_key(system, user);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            debug!(key = %key, "llm cache hit");
            return Ok(hit);
        }

        let fresh = self.inner.complete(system, user).await?;
        if !fresh.content.is_empty() {
            let _ = write_cache_file(&self.cache_dir, &key, &fresh);
            let mut g = self.counter.lock().expect("poisoned counter");
            g.count = g.count.saturating_add(1);
            let _ = save_daily_counter(&self.cache_dir, &g);
        }
        Ok(fresh)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

fn prompt_key(system: &str, user: &str) -> String {
    let mut hasher = DefaultHasher::new();
    system.hash(&mut hasher);
    user.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<LlmResponse> {
    let raw = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &LlmResponse) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).unwrap_or_else(|_| "{}".to_string());
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}
