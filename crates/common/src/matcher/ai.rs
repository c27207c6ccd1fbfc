//! AI fallback tier
//!
//! The last tier before a step is blocked. The model is asked for a single instruction
//! as JSON; the reply is accepted only if it deserializes into an [`Instruction`] and
//! passes validation. Every verdict (accepted or rejected) is cached per step for the
//! lifetime of the [`MatchContext`], and calls stop once the session budget is spent.
//!
//! Without a client the tier runs in cache-only mode: seeded responses are served and
//! everything else passes through. [`CommandClient`] is the stock client; it hands the
//! prompt to an external program configured as `ai.command`.
//!
//! The deadline is enforced here, not trusted to the client: the call runs on a worker
//! thread and a reply that arrives after `ai.timeout_ms` is discarded.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::normalize::canonical_text;
use super::{CachedResponse, MatchContext, MatchOutcome, MatchTier, StepMatcher};
use crate::config::AiConfig;
use crate::ir::Instruction;

/// Confidence attached to AI-produced instructions
const AI_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),
}

/// One completion request
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub step: String,
    pub prompt: String,
    pub model: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AiCompletion {
    pub text: String,
    pub cost_usd: f64,
}

/// Completion provider. May block; the caller bounds it with `request.timeout`.
pub trait LlmClient: Send + Sync {
    fn complete(&self, request: &AiRequest) -> Result<AiCompletion, AiError>;
}

/// Runs a program per request, prompt on stdin, reply on stdout.
///
/// The model name, when configured, is exported as `ARTK_AI_MODEL`. The program
/// does not report cost, so each call is charged the configured estimate.
pub struct CommandClient {
    command: Vec<String>,
    cost_per_call_usd: f64,
}

impl CommandClient {
    pub fn new(command: Vec<String>, cost_per_call_usd: f64) -> Self {
        Self {
            command,
            cost_per_call_usd,
        }
    }

    pub fn from_config(config: &AiConfig) -> Option<Self> {
        (!config.command.is_empty())
            .then(|| Self::new(config.command.clone(), config.estimated_cost_per_call_usd))
    }
}

impl LlmClient for CommandClient {
    fn complete(&self, request: &AiRequest) -> Result<AiCompletion, AiError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AiError::Provider("ai.command is empty".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(model) = &request.model {
            command.env("ARTK_AI_MODEL", model);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AiError::Provider(format!("failed to start {program}: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .map_err(|e| AiError::Provider(format!("failed to send prompt: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| AiError::Provider(format!("failed to read reply: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AiError::Provider(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(AiCompletion {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
            cost_usd: self.cost_per_call_usd,
        })
    }
}

/// Run one completion on a worker thread, giving up at `request.timeout`.
/// A late reply is dropped with the worker.
fn complete_within(
    client: Arc<dyn LlmClient>,
    request: &AiRequest,
) -> Result<AiCompletion, AiError> {
    let (tx, rx) = mpsc::channel();
    let worker_request = request.clone();
    std::thread::Builder::new()
        .name("artk-ai".to_string())
        .spawn(move || {
            let _ = tx.send(client.complete(&worker_request));
        })
        .map_err(|e| AiError::Provider(format!("failed to start AI worker: {e}")))?;

    match rx.recv_timeout(request.timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(AiError::Timeout(request.timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(AiError::Provider(
            "AI worker exited without a reply".to_string(),
        )),
    }
}

/// Cache key for a step: SHA-256 of its canonical text
pub(crate) fn cache_key(step: &str) -> String {
    hex::encode(Sha256::digest(canonical_text(step).as_bytes()))
}

fn build_prompt(step: &str) -> String {
    format!(
        "Translate this end-to-end test step into exactly one JSON instruction.\n\
         Allowed types: goto, click, dblclick, fill, select, check, uncheck, press, hover, \
         expectVisible, expectHidden, expectText, expectUrl, expectTitle, expectToast, \
         waitForUrl, waitForResponse, waitForLoadState, waitForVisible, callModule.\n\
         Locators are {{\"strategy\": role|label|placeholder|text|testid|css|xpath, \
         \"value\": string, \"options\"?: {{\"name\"?: string, \"exact\"?: bool}}}}.\n\
         Fill values are {{\"type\": \"literal\", \"value\": string}}.\n\
         Reply with the JSON object only.\n\n\
         Step: {step}"
    )
}

/// Pull the first JSON object out of a reply that may carry prose or code fences
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_reply(text: &str) -> Result<Instruction, String> {
    let json = extract_json(text).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let instruction: Instruction =
        serde_json::from_str(json).map_err(|e| format!("reply is not a valid instruction: {e}"))?;
    if instruction.is_blocked() {
        return Err("model declined the step".to_string());
    }
    instruction.validate()?;
    Ok(instruction)
}

pub struct AiFallbackMatcher {
    config: AiConfig,
    client: Option<Arc<dyn LlmClient>>,
}

impl AiFallbackMatcher {
    pub fn new(config: AiConfig, client: Option<Arc<dyn LlmClient>>) -> Self {
        Self { config, client }
    }

    fn from_cache(&self, key: &str, ctx: &mut MatchContext) -> Option<Option<MatchOutcome>> {
        let cached = ctx.ai_cache.get(key)?.clone();
        ctx.ai_cache_hits += 1;
        Some(match cached {
            CachedResponse::Accepted(instruction) => Some(
                MatchOutcome::new(instruction, MatchTier::Ai, AI_CONFIDENCE).with_rule("cache"),
            ),
            CachedResponse::Rejected(reason) => {
                debug!(%reason, "cached AI rejection");
                None
            }
        })
    }
}

impl StepMatcher for AiFallbackMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Ai
    }

    fn try_match(&self, step: &str, ctx: &mut MatchContext) -> Option<MatchOutcome> {
        if !self.config.enabled {
            return None;
        }

        let key = cache_key(step);
        if let Some(outcome) = self.from_cache(&key, ctx) {
            return outcome;
        }

        let client = Arc::clone(self.client.as_ref()?);

        let projected = ctx.ai_spent_usd + self.config.estimated_cost_per_call_usd;
        if projected > self.config.max_session_cost_usd {
            warn!(
                spent = ctx.ai_spent_usd,
                limit = self.config.max_session_cost_usd,
                "AI budget exhausted, skipping fallback"
            );
            return None;
        }

        let request = AiRequest {
            step: step.to_string(),
            prompt: build_prompt(step),
            model: self.config.model.clone(),
            timeout: Duration::from_millis(self.config.timeout_ms),
        };

        ctx.ai_calls += 1;
        let completion = match complete_within(client, &request) {
            Ok(completion) => completion,
            Err(e) => {
                // transient, including a missed deadline; not cached so a later run may retry
                warn!(error = %e, "AI fallback failed");
                ctx.ai_spent_usd += self.config.estimated_cost_per_call_usd;
                return None;
            }
        };
        ctx.ai_spent_usd += completion.cost_usd;

        match parse_reply(&completion.text) {
            Ok(instruction) => {
                info!(kind = instruction.kind(), cost = completion.cost_usd, "AI resolved step");
                ctx.ai_cache
                    .insert(key, CachedResponse::Accepted(instruction.clone()));
                Some(MatchOutcome::new(instruction, MatchTier::Ai, AI_CONFIDENCE).with_rule("model"))
            }
            Err(reason) => {
                warn!(%reason, "AI reply rejected");
                ctx.ai_cache.insert(key, CachedResponse::Rejected(reason));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LocatorSpec, LocatorStrategy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct Scripted {
        reply: Result<String, ()>,
        cost: f64,
        calls: AtomicU32,
    }

    impl Scripted {
        fn ok(reply: &str, cost: f64) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                cost,
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                cost: 0.0,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl LlmClient for Scripted {
        fn complete(&self, request: &AiRequest) -> Result<AiCompletion, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(AiCompletion {
                    text: text.clone(),
                    cost_usd: self.cost,
                }),
                Err(()) => Err(AiError::Timeout(request.timeout)),
            }
        }
    }

    fn enabled() -> AiConfig {
        AiConfig {
            enabled: true,
            ..AiConfig::default()
        }
    }

    const CLICK_REPLY: &str = r#"Sure:
```json
{"type": "click", "locator": {"strategy": "testid", "value": "drop-zone"}}
```"#;

    #[test]
    fn test_disabled_never_calls() {
        let client = Scripted::ok(CLICK_REPLY, 0.01);
        let matcher = AiFallbackMatcher::new(AiConfig::default(), Some(client.clone() as Arc<dyn LlmClient>));
        assert!(matcher.try_match("Drag it", &mut MatchContext::new()).is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_accepts_valid_reply_and_caches() {
        let client = Scripted::ok(CLICK_REPLY, 0.01);
        let matcher = AiFallbackMatcher::new(enabled(), Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();

        let first = matcher.try_match("Drag the item", &mut ctx).unwrap();
        assert_eq!(
            first.instruction,
            Instruction::Click {
                locator: LocatorSpec::new(LocatorStrategy::Testid, "drop-zone")
            }
        );
        let second = matcher.try_match("drag the item.", &mut ctx).unwrap();
        assert_eq!(second.instruction, first.instruction);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.ai_cache_hits(), 1);
        assert!((ctx.ai_spent_usd() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_reply_rejected_and_cached() {
        let client = Scripted::ok(r#"{"type": "teleport"}"#, 0.01);
        let matcher = AiFallbackMatcher::new(enabled(), Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();
        assert!(matcher.try_match("Teleport home", &mut ctx).is_none());
        assert!(matcher.try_match("Teleport home", &mut ctx).is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_stops_calls() {
        let client = Scripted::ok(CLICK_REPLY, 0.2);
        let config = AiConfig {
            enabled: true,
            max_session_cost_usd: 0.25,
            estimated_cost_per_call_usd: 0.1,
            ..AiConfig::default()
        };
        let matcher = AiFallbackMatcher::new(config, Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();

        assert!(matcher.try_match("step one", &mut ctx).is_some());
        assert!(matcher.try_match("step two", &mut ctx).is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_passes_through() {
        let client = Scripted::failing();
        let matcher = AiFallbackMatcher::new(enabled(), Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();
        assert!(matcher.try_match("Drag it", &mut ctx).is_none());
        assert_eq!(ctx.ai_calls(), 1);
    }

    #[test]
    fn test_cache_only_mode_serves_seeded_responses() {
        let matcher = AiFallbackMatcher::new(enabled(), None);
        let mut ctx = MatchContext::new();
        let instruction = Instruction::Hover {
            locator: LocatorSpec::new(LocatorStrategy::Text, "Menu"),
        };
        ctx.seed_ai_response("Hover the menu", instruction.clone());

        let outcome = matcher.try_match("hover the menu", &mut ctx).unwrap();
        assert_eq!(outcome.instruction, instruction);
        assert!(matcher.try_match("something else", &mut ctx).is_none());
    }

    #[test]
    fn test_cache_key_is_canonical() {
        assert_eq!(cache_key("Click 'Save'."), cache_key("click 'Save'"));
        assert_ne!(cache_key("Click 'Save'"), cache_key("Click 'save'"));
    }

    struct Slow {
        delay: Duration,
        calls: AtomicU32,
    }

    impl LlmClient for Slow {
        fn complete(&self, _request: &AiRequest) -> Result<AiCompletion, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(AiCompletion {
                text: CLICK_REPLY.to_string(),
                cost_usd: 0.0,
            })
        }
    }

    #[test]
    fn test_slow_client_hits_deadline_and_is_charged() {
        let client = Arc::new(Slow {
            delay: Duration::from_secs(2),
            calls: AtomicU32::new(0),
        });
        let config = AiConfig {
            enabled: true,
            timeout_ms: 50,
            estimated_cost_per_call_usd: 0.05,
            ..AiConfig::default()
        };
        let matcher = AiFallbackMatcher::new(config, Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();

        let started = Instant::now();
        assert!(matcher.try_match("Drag it", &mut ctx).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ctx.ai_calls(), 1);
        assert!((ctx.ai_spent_usd() - 0.05).abs() < 1e-9);
        // A missed deadline is not cached as a verdict
        assert_eq!(ctx.ai_cache_hits(), 0);
    }

    #[test]
    fn test_repeated_timeouts_exhaust_budget() {
        let client = Arc::new(Slow {
            delay: Duration::from_secs(2),
            calls: AtomicU32::new(0),
        });
        let config = AiConfig {
            enabled: true,
            timeout_ms: 20,
            max_session_cost_usd: 0.15,
            estimated_cost_per_call_usd: 0.1,
            ..AiConfig::default()
        };
        let matcher = AiFallbackMatcher::new(config, Some(client.clone() as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();

        assert!(matcher.try_match("step one", &mut ctx).is_none());
        assert!(matcher.try_match("step two", &mut ctx).is_none());
        assert_eq!(ctx.ai_calls(), 1);
        assert!((ctx.ai_spent_usd() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_command_client_round_trip() {
        let reply = r#"{"type": "hover", "locator": {"strategy": "text", "value": "Menu"}}"#;
        let client = CommandClient::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cat > /dev/null; echo '{reply}'"),
            ],
            0.02,
        );
        let matcher = AiFallbackMatcher::new(enabled(), Some(Arc::new(client) as Arc<dyn LlmClient>));
        let mut ctx = MatchContext::new();

        let outcome = matcher.try_match("Point at the menu", &mut ctx).unwrap();
        assert_eq!(
            outcome.instruction,
            Instruction::Hover {
                locator: LocatorSpec::new(LocatorStrategy::Text, "Menu")
            }
        );
        assert!((ctx.ai_spent_usd() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_command_client_failure_is_provider_error() {
        let client = CommandClient::new(
            vec!["sh".to_string(), "-c".to_string(), "echo nope >&2; exit 3".to_string()],
            0.0,
        );
        let request = AiRequest {
            step: "x".to_string(),
            prompt: "x".to_string(),
            model: None,
            timeout: Duration::from_secs(5),
        };
        let err = client.complete(&request).unwrap_err();
        assert!(matches!(err, AiError::Provider(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn test_command_client_only_when_configured() {
        assert!(CommandClient::from_config(&AiConfig::default()).is_none());
        let config = AiConfig {
            command: vec!["llm".to_string()],
            ..AiConfig::default()
        };
        assert!(CommandClient::from_config(&config).is_some());
    }
}
