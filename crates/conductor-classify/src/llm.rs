use std::time::Duration;

use conductor_core::types::{ClassificationResult, PaneLifecycle};
use serde::Deserialize;
use serde_json::json;

use crate::error::ClassifyError;

const ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You read tmux pane text for a CLI worker. Infer the PTY state using four axes plus metadata.\n\
Return strict JSON matching:\n\
{\n\
  \"session_lifecycle\": \"<DISCONNECTED|LOGIN_OR_SETUP|ACTIVE_SESSION|TEARDOWN>\",\n\
  \"terminal_mode\": \"<CANONICAL|RAW|UNKNOWN>\",\n\
  \"foreground_role\": \"<SHELL|CHILD_COMMAND|MULTIPLEXER|UNKNOWN>\",\n\
  \"io_disposition\": \"<IDLE_AT_PROMPT|STREAMING_OUTPUT|SILENT_PROCESSING|BLOCKED_ON_INPUT|INTERRUPTIBLE_BUSY|UNKNOWN>\",\n\
  \"error_recent\": true,\n\
  \"state\": \"<READY|BUSY|NEEDS_CONFIRMATION|ERROR>\",\n\
  \"summary\": \"<short string>\",\n\
  \"actions_needed\": \"<string or null>\"\n\
}\n\
Axis definitions:\n\
1. session_lifecycle: DISCONNECTED (pane closed), LOGIN_OR_SETUP (ssh/login banners before shell), ACTIVE_SESSION (shell or process running), TEARDOWN (logout/shutdown).\n\
2. terminal_mode: CANONICAL (line-buffered shell), RAW (application controls keys / alternate screen), UNKNOWN.\n\
3. foreground_role: SHELL (bash/zsh prompt owns tty), CHILD_COMMAND (non-shell program), MULTIPLEXER (tmux/screen hosting another shell), UNKNOWN.\n\
4. io_disposition: IDLE_AT_PROMPT (prompt visible, safe to send command), STREAMING_OUTPUT (logs/progress flowing), SILENT_PROCESSING (command running quietly), BLOCKED_ON_INPUT (explicit prompt waiting for y/N/password/etc.), INTERRUPTIBLE_BUSY (async REPLs that keep processing yet accept new instructions), UNKNOWN.\n\
error_recent indicates whether the last command clearly failed (traceback, non-zero exit). Derive `state` from these axes and provide a concise summary and optional actions_needed instruction.";

/// Metadata passed alongside the snapshot so the model has pane context.
#[derive(Debug, Clone)]
pub struct ClassifyMeta {
    pub pane_id: String,
    pub cli_type: String,
}

/// Optional LLM-backed classifier, used as a richer alternative to the
/// regex classifier when an OpenRouter API key is configured.
pub struct OpenRouterClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

#[derive(Deserialize)]
struct ParsedVerdict {
    state: Option<String>,
    summary: Option<String>,
    actions_needed: Option<String>,
}

impl OpenRouterClassifier {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenRouterClassifier {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builder should not fail with default TLS config"),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub async fn classify(&self, snapshot: &str, meta: &ClassifyMeta) -> Result<ClassificationResult, ClassifyError> {
        if self.api_key.is_empty() {
            return Err(ClassifyError::MissingApiKey);
        }
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("CLI type: {}\nSnapshot:\n{}", meta.cli_type, snapshot) },
            ],
        });
        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let data: ChatResponse = response.json().await?;
        let content = data
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifyError::MalformedResponse("no choices in response".to_string()))?;
        let verdict: ParsedVerdict = serde_json::from_str(content)
            .map_err(|err| ClassifyError::MalformedResponse(format!("pane {}: {err}", meta.pane_id)))?;
        Ok(ClassificationResult {
            state: parse_state(verdict.state.as_deref()),
            summary: verdict.summary.unwrap_or_default().trim().to_string(),
            actions_needed: verdict.actions_needed,
        })
    }
}

fn parse_state(raw: Option<&str>) -> PaneLifecycle {
    match raw {
        Some("BUSY") => PaneLifecycle::Busy,
        Some("NEEDS_CONFIRMATION") => PaneLifecycle::NeedsConfirmation,
        Some("ERROR") => PaneLifecycle::Error,
        _ => PaneLifecycle::Ready,
    }
}
