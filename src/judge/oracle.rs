// src/judge/oracle.rs
//! Oracle abstraction + OpenAI-compatible provider + mock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OracleConfig;
use crate::error::OracleError;

pub const ENV_ORACLE_TEST_MODE: &str = "ORACLE_TEST_MODE";
pub const NO_REASON: &str = "no reason given";
pub const REASON_MAX_CHARS: usize = 200;
/// Used when a reply parses but carries no score at all.
pub const MISSING_SCORE: i64 = 50;

/// What the oracle is asked to judge.
#[derive(Debug, Clone, Copy)]
pub struct JudgmentRequest<'a> {
    pub criteria: &'a str,
    pub title: &'a str,
    /// Already truncated to the sample size.
    pub content: &'a str,
    /// Whether `content` comes from the full article rather than the feed summary.
    pub full_text: bool,
}

/// Raw oracle verdict. The score is not trusted to be in range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub score: i64,
    pub reason: String,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn judge(&self, req: &JudgmentRequest<'_>) -> Result<Judgment, OracleError>;
    /// Provider name for logs.
    fn name(&self) -> &str;
}

pub type DynOracle = Arc<dyn Oracle>;

/// Factory: build an oracle according to config and environment.
///
/// * `ORACLE_TEST_MODE=mock` returns a deterministic mock.
/// * `enabled = false` returns an oracle that refuses every call.
/// * Otherwise the OpenAI-compatible provider.
pub fn build_oracle(cfg: &OracleConfig) -> anyhow::Result<DynOracle> {
    if std::env::var(ENV_ORACLE_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockOracle::fixed(70, "mock judgment")));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledOracle));
    }
    tracing::info!(
        target: "judge",
        base_url = %cfg.base_url,
        model = %cfg.model,
        key_len = cfg.api_key.len(),
        "oracle configured"
    );
    Ok(Arc::new(OpenAiOracle::new(cfg)?))
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions
// ------------------------------------------------------------

pub struct OpenAiOracle {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

const SYSTEM_PROMPT: &str = "You are a strict reviewer of technology articles. Score each \
     article only against the selection criteria you are given. Even when only a feed summary \
     is available, give your best judgment. Reply with JSON only.";

impl OpenAiOracle {
    pub fn new(cfg: &OracleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feed-curator/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: cfg.completions_url(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }
}

pub fn build_prompt(req: &JudgmentRequest<'_>) -> String {
    let kind = if req.full_text {
        "full article"
    } else {
        "feed summary"
    };
    format!(
        "Judge whether this article matches the selection criteria.\n\n\
         ---\n[Selection criteria]\n{criteria}\n\n\
         ---\n[Title]\n{title}\n\n\
         ---\n[Content ({kind})]\n{content}\n\n\
         ---\n\
         1. Relevance score (integer 0-100):\n\
         \x20  90-100 direct hit with in-depth analysis\n\
         \x20  70-89 clearly relevant, substantive\n\
         \x20  50-69 partly relevant or thin\n\
         \x20  30-49 only mentions keywords\n\
         \x20  20-29 unrelated, or explicitly excluded by the criteria\n\
         \x20  0-19 spam, ads, pure PR\n\
         2. Reason: one sentence naming what raised or lowered the score.\n\n\
         Output exactly: {{\"score\": <integer>, \"reason\": \"<one sentence>\"}}",
        criteria = req.criteria,
        title = req.title,
        content = req.content,
    )
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn judge(&self, req: &JudgmentRequest<'_>) -> Result<Judgment, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::MissingApiKey);
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let prompt = build_prompt(req);
        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("empty choices".into()))?;
        parse_judgment(&content)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

/// Lenient reply parsing: tolerates code fences, float or string scores and a
/// missing reason. A reply without any JSON object is malformed.
pub fn parse_judgment(raw: &str) -> Result<Judgment, OracleError> {
    let trimmed = raw.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(a), Some(b)) if a < b => &trimmed[a..=b],
        _ => return Err(OracleError::Malformed("no JSON object in reply".into())),
    };
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))?;

    let score = match value.get("score") {
        None | Some(serde_json::Value::Null) => MISSING_SCORE,
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| OracleError::Malformed(format!("score {n}")))?,
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(|_| OracleError::Malformed(format!("score {s:?}")))?,
        Some(other) => return Err(OracleError::Malformed(format!("score {other}"))),
    };

    let reason = value
        .get("reason")
        .and_then(|r| r.as_str())
        .map(sanitize_reason)
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| NO_REASON.to_string());

    Ok(Judgment { score, reason })
}

/// Single line, collapsed whitespace, at most `REASON_MAX_CHARS` characters.
pub fn sanitize_reason(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(REASON_MAX_CHARS * 4));
    let mut count = 0usize;
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                count += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            count += 1;
            prev_space = false;
        }
        if count >= REASON_MAX_CHARS {
            break;
        }
    }
    out.trim().to_string()
}

// ------------------------------------------------------------
// Disabled + mock
// ------------------------------------------------------------

/// Refuses every call; the judge maps that to its error score.
pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    async fn judge(&self, _req: &JudgmentRequest<'_>) -> Result<Judgment, OracleError> {
        Err(OracleError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Fixed(Judgment),
    Fail,
}

/// Deterministic oracle for tests and local runs. Counts calls and remembers
/// the last request it saw.
#[derive(Debug)]
pub struct MockOracle {
    reply: MockReply,
    calls: AtomicUsize,
    last: Mutex<Option<RecordedRequest>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub criteria: String,
    pub title: String,
    pub content: String,
    pub full_text: bool,
}

impl MockOracle {
    pub fn fixed(score: i64, reason: &str) -> Self {
        Self::with_reply(MockReply::Fixed(Judgment {
            score,
            reason: reason.to_string(),
        }))
    }

    /// Every call fails with a malformed-response error.
    pub fn failing() -> Self {
        Self::with_reply(MockReply::Fail)
    }

    fn with_reply(reply: MockReply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.last.lock().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn judge(&self, req: &JudgmentRequest<'_>) -> Result<Judgment, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut g) = self.last.lock() {
            *g = Some(RecordedRequest {
                criteria: req.criteria.to_string(),
                title: req.title.to_string(),
                content: req.content.to_string(),
                full_text: req.full_text,
            });
        }
        match &self.reply {
            MockReply::Fixed(j) => Ok(j.clone()),
            MockReply::Fail => Err(OracleError::Malformed("mock failure".into())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
