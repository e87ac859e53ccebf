//! Text-generation collaborator: provider abstraction, an OpenAI-compatible
//! HTTP provider, and the gated wrapper that adds the concurrency limit,
//! per-call timeout, and retry-with-backoff the validator calls need.
//! Also home to the lenient parser for the validator's free-text replies.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::metrics;
use crate::signal::clamp01;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Trait object used by the detection engine (and tests).
pub trait TextGenerationService: Send + Sync {
    /// Generate free text for `prompt`. Failures and timeouts are normal;
    /// the caller degrades to "no LLM signal".
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynGenerator = Arc<dyn TextGenerationService>;

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// OpenAI-compatible chat-completions provider. Requires `OPENAI_API_KEY`;
/// the base URL defaults to an OpenAI-compatible gateway and can be
/// overridden with `OPENAI_BASE_URL`.
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_MODEL: &str = "deepseek-r1";

impl OpenAiCompatProvider {
    pub fn new(model_override: Option<&str>) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let http = reqwest::Client::builder()
            .user_agent("call-audit-engine/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            base_url,
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

impl TextGenerationService for OpenAiCompatProvider {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                anyhow::bail!("OPENAI_API_KEY not set");
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
                temperature: f32,
                max_tokens: u32,
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
                content: String,
            }

            let req = Req {
                model: &self.model,
                messages: vec![Msg {
                    role: "user",
                    content: prompt,
                }],
                temperature,
                max_tokens,
            };

            let resp = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("generation request failed with status {status}");
            }
            let body: Resp = resp.json().await?;
            let content = body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default();
            if content.is_empty() {
                anyhow::bail!("generation returned an empty choice");
            }
            Ok(content)
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai-compat"
    }
}

/// Always fails; used when LLM validation is disabled.
pub struct DisabledGenerator;

impl TextGenerationService for DisabledGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async { anyhow::bail!("text generation disabled") })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed-reply provider for tests and local runs.
#[derive(Clone)]
pub struct MockGenerator {
    pub reply: String,
}

impl TextGenerationService for MockGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        let out = self.reply.clone();
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Gated wrapper: concurrency limit + timeout + retry/backoff
// ------------------------------------------------------------

/// Wraps a provider with a small shared concurrency gate (the downstream
/// service is slow and rate-limited), a per-call timeout, and bounded
/// retries with exponential backoff. After retries are exhausted the error
/// surfaces to the caller, which treats it as "no LLM signal".
pub struct GatedGenerator<P> {
    inner: P,
    gate: Semaphore,
    call_timeout: Duration,
    base_delay: Duration,
    max_attempts: u32,
}

impl<P: TextGenerationService> GatedGenerator<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            gate: Semaphore::new(2),
            call_timeout: Duration::from_secs(100),
            base_delay: Duration::from_millis(1500),
            max_attempts: 3,
        }
    }

    /// Custom gate width and timings (tests shrink these).
    pub fn with_timing(
        mut self,
        permits: usize,
        call_timeout: Duration,
        base_delay: Duration,
    ) -> Self {
        self.gate = Semaphore::new(permits.max(1));
        self.call_timeout = call_timeout;
        self.base_delay = base_delay;
        self
    }

    async fn generate_impl(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<String> {
        let _permit = self.gate.acquire().await.expect("generator gate closed");

        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            let call = self.inner.generate(prompt, max_tokens, temperature);
            match tokio::time::timeout(self.call_timeout, call).await {
                Ok(Ok(content)) => {
                    debug!(provider = self.inner.provider_name(), attempt, "generation ok");
                    return Ok(content);
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = self.inner.provider_name(),
                        attempt, error = %e, "generation failed"
                    );
                    if attempt == self.max_attempts {
                        return Err(e);
                    }
                }
                Err(_) => {
                    warn!(
                        provider = self.inner.provider_name(),
                        attempt, "generation timed out"
                    );
                    if attempt == self.max_attempts {
                        anyhow::bail!("generation timed out after {attempt} attempts");
                    }
                }
            }
            metrics::llm_retry();
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        unreachable!("retry loop always returns")
    }
}

impl<P: TextGenerationService> TextGenerationService for GatedGenerator<P> {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(self.generate_impl(prompt, max_tokens, temperature))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

// ------------------------------------------------------------
// Validator reply parsing
// ------------------------------------------------------------

/// Structured reading of a validator's free-text reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSignal {
    pub hit: bool,
    pub confidence: f32,
    pub evidence: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The reply was blank.
    Empty,
    /// No recognizable field line was present.
    NoFields,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty validator reply"),
            ParseError::NoFields => write!(f, "validator reply had no recognizable fields"),
        }
    }
}

impl std::error::Error for ParseError {}

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.?\d*").expect("number regex"));

/// Parse the line-oriented validator reply (判定结果/置信度/证据片段/理由).
/// Tolerates full- and half-width colons and both `0.85` and `85%`
/// confidence spellings. Callers map an `Err` to the zero-confidence miss.
pub fn parse_validator_reply(reply: &str) -> Result<ParsedSignal, ParseError> {
    if reply.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parsed = ParsedSignal::default();
    let mut fields = 0usize;

    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = field_value(line, "判定结果") {
            parsed.hit = rest.contains('是');
            fields += 1;
        } else if let Some(rest) = field_value(line, "置信度") {
            if let Some(m) = NUMBER_RE.find(rest) {
                if let Ok(mut value) = m.as_str().parse::<f32>() {
                    if rest.contains('%') || (value > 1.0 && value <= 100.0) {
                        value /= 100.0;
                    }
                    parsed.confidence = clamp01(value);
                }
            }
            fields += 1;
        } else if let Some(rest) = field_value(line, "证据片段") {
            parsed.evidence = rest.trim().to_string();
            fields += 1;
        } else if let Some(rest) = field_value(line, "理由") {
            parsed.reasoning = rest.trim().to_string();
            fields += 1;
        }
    }

    if fields == 0 {
        return Err(ParseError::NoFields);
    }
    Ok(parsed)
}

/// `"置信度：0.8"` → `Some("0.8")`, accepting `：` or `:` after the label.
fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(label)?;
    rest.strip_prefix('：').or_else(|| rest.strip_prefix(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_confidence_reply() {
        let reply = "判定结果：是\n置信度：0.85\n证据片段：我是益盟操盘手专员\n理由：明确表明身份";
        let p = parse_validator_reply(reply).unwrap();
        assert!(p.hit);
        assert!((p.confidence - 0.85).abs() < 1e-6);
        assert_eq!(p.evidence, "我是益盟操盘手专员");
        assert_eq!(p.reasoning, "明确表明身份");
    }

    #[test]
    fn parses_percent_confidence_reply() {
        let p = parse_validator_reply("判定结果：否\n置信度：85%").unwrap();
        assert!(!p.hit);
        assert!((p.confidence - 0.85).abs() < 1e-6);

        // Bare 85 without a percent sign reads as a percentage too.
        let p = parse_validator_reply("置信度: 85").unwrap();
        assert!((p.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn half_width_colon_accepted() {
        let p = parse_validator_reply("判定结果: 是\n证据片段: quoted text").unwrap();
        assert!(p.hit);
        assert_eq!(p.evidence, "quoted text");
    }

    #[test]
    fn garbled_reply_is_an_error_not_a_guess() {
        assert_eq!(parse_validator_reply("   "), Err(ParseError::Empty));
        assert_eq!(
            parse_validator_reply("抱歉，我无法完成这个任务。"),
            Err(ParseError::NoFields)
        );
    }

    #[test]
    fn missing_confidence_defaults_to_zero() {
        let p = parse_validator_reply("判定结果：是\n证据片段：某句话").unwrap();
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let p = parse_validator_reply("置信度：250").unwrap();
        // 250 is neither a fraction nor a percentage; clamped to 1.0.
        assert!((p.confidence - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn gated_generator_retries_then_surfaces_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Flaky {
            calls: AtomicU32,
        }
        impl TextGenerationService for Flaky {
            fn generate<'a>(
                &'a self,
                _p: &'a str,
                _m: u32,
                _t: f32,
            ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
                Box::pin(async move {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("boom")
                })
            }
            fn provider_name(&self) -> &'static str {
                "flaky"
            }
        }

        let flaky = Flaky {
            calls: AtomicU32::new(0),
        };
        let gated = GatedGenerator::new(flaky).with_timing(
            2,
            Duration::from_millis(50),
            Duration::from_millis(1),
        );
        let err = gated.generate("q", 10, 0.1).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(gated.inner.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gate_caps_concurrent_calls_at_permit_count() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Slow {
            in_flight: AtomicU32,
            peak: AtomicU32,
        }
        impl TextGenerationService for Slow {
            fn generate<'a>(
                &'a self,
                _p: &'a str,
                _m: u32,
                _t: f32,
            ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
                Box::pin(async move {
                    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    self.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok("判定结果：否".to_string())
                })
            }
            fn provider_name(&self) -> &'static str {
                "slow"
            }
        }

        let gated = Arc::new(
            GatedGenerator::new(Slow {
                in_flight: AtomicU32::new(0),
                peak: AtomicU32::new(0),
            })
            .with_timing(2, Duration::from_secs(5), Duration::from_millis(1)),
        );

        let mut handles = Vec::new();
        for _ in 0..6 {
            let g = Arc::clone(&gated);
            handles.push(tokio::spawn(async move { g.generate("q", 10, 0.1).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(
            gated.inner.peak.load(Ordering::SeqCst) <= 2,
            "more than two calls ran concurrently: {}",
            gated.inner.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn stalled_provider_hits_the_timeout_branch() {
        struct Stalled;
        impl TextGenerationService for Stalled {
            fn generate<'a>(
                &'a self,
                _p: &'a str,
                _m: u32,
                _t: f32,
            ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("太迟了".to_string())
                })
            }
            fn provider_name(&self) -> &'static str {
                "stalled"
            }
        }

        let gated = GatedGenerator::new(Stalled).with_timing(
            2,
            Duration::from_millis(10),
            Duration::from_millis(1),
        );
        let err = gated.generate("q", 10, 0.1).await.unwrap_err();
        assert!(
            err.to_string().contains("timed out"),
            "expected a timeout error, got: {err}"
        );
    }

    #[tokio::test]
    async fn gated_generator_recovers_after_transient_failure() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Recovery {
            calls: AtomicU32,
        }
        impl TextGenerationService for Recovery {
            fn generate<'a>(
                &'a self,
                _p: &'a str,
                _m: u32,
                _t: f32,
            ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
                Box::pin(async move {
                    if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("transient")
                    }
                    Ok("判定结果：是".to_string())
                })
            }
            fn provider_name(&self) -> &'static str {
                "recovery"
            }
        }

        let gated = GatedGenerator::new(Recovery {
            calls: AtomicU32::new(0),
        })
        .with_timing(2, Duration::from_millis(50), Duration::from_millis(1));
        let out = gated.generate("q", 10, 0.1).await.unwrap();
        assert_eq!(out, "判定结果：是");
    }
}
