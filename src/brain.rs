//! OpenAI chat-completions backed decider.
//!
//! Each decision is a single stateless request: the task, the page and the
//! numbered history go in as one user message, the offered actions go in as
//! function tools, and the first tool call that comes back is the intent.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::config::DeciderConfig;
use crate::decider::Decider;
use crate::error::DeciderError;
use crate::history::History;
use crate::types::{ActionIntent, ActionKind, ActionName, MAX_WAIT_SECS, PageSnapshot, Task};

/// Elements listed in the prompt.
const PROMPT_ELEMENTS: usize = 20;
/// Characters of visible text included in the prompt.
const PROMPT_TEXT_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real Chrome browser by calling exactly ONE of the provided functions per reply.

Rules:
1. Use the selectors listed under "Interactive elements" to target elements. They look like [data-eid="e3"].
2. After every action you will see the updated page. Decide the next step from what you see.
3. If an action failed, read the error and the visible elements listed with it and try something else.
4. Use ask_approval before anything irreversible: deleting data, paying, submitting personal details.
5. When the task is accomplished, call complete with a short summary.
6. If you need information only the user has, reply with a plain text question instead of a function call.
7. Only the functions provided are available right now. Keep steps minimal."#;

const ANALYZE_PROMPT: &str = "You are analysing a web page for a browser automation agent. Describe what the page is, \
which elements matter for the task and what the next steps should be. Answer in plain text.";

pub struct OpenAiDecider {
    client: Client,
    config: DeciderConfig,
}

impl OpenAiDecider {
    pub fn new(config: DeciderConfig) -> Result<Self, DeciderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeciderError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn complete(&self, body: Value) -> Result<Value, DeciderError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let reply: Value = response.json().await.map_err(|e| self.request_error(e))?;

        if !status.is_success() {
            let message = reply["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error")
                .to_string();
            warn!(status = status.as_u16(), "decider API error: {message}");
            return Err(DeciderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(reply)
    }

    fn request_error(&self, err: reqwest::Error) -> DeciderError {
        if err.is_timeout() {
            DeciderError::Timeout(self.config.request_timeout)
        } else {
            DeciderError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Decider for OpenAiDecider {
    async fn decide(
        &self,
        task: &Task,
        snapshot: &PageSnapshot,
        history: &History,
        vocabulary: &[ActionName],
    ) -> Result<Option<ActionIntent>, DeciderError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(task, snapshot, history)},
            ],
            "tools": build_tools(vocabulary),
            "tool_choice": "auto",
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        debug!(offered = vocabulary.len(), "requesting next action");
        let reply = self.complete(body).await?;
        parse_reply(&reply)
    }

    async fn analyze_page(&self, snapshot: &PageSnapshot, task: &str) -> Result<String, DeciderError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": ANALYZE_PROMPT},
                {"role": "user", "content": format!("Task: {task}\n\n{}", describe_page(snapshot))},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        let reply = self.complete(body).await?;
        reply["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| DeciderError::Decode("analysis reply has no content".to_string()))
    }
}

fn describe_page(snapshot: &PageSnapshot) -> String {
    let mut out = format!("URL: {}\nTitle: {}\n", snapshot.url, snapshot.title);
    if !snapshot.description.is_empty() {
        out.push_str(&format!("Description: {}\n", snapshot.description));
    }

    out.push_str("\nInteractive elements:\n");
    let elements = snapshot
        .interactive_elements
        .iter()
        .chain(snapshot.buttons.iter())
        .filter(|el| el.is_visible)
        .take(PROMPT_ELEMENTS);
    for el in elements {
        out.push_str(&format!("- {} <{}> \"{}\"\n", el.selector, el.tag, el.text));
    }
    for form in &snapshot.forms {
        let fields: Vec<&str> = form
            .inputs
            .iter()
            .map(|i| if i.label.is_empty() { i.name.as_str() } else { i.label.as_str() })
            .collect();
        out.push_str(&format!(
            "- form {} {} fields [{}] submit \"{}\"\n",
            form.method,
            form.action,
            fields.join(", "),
            form.submit_text
        ));
    }

    let text: String = snapshot.visible_text.chars().take(PROMPT_TEXT_CHARS).collect();
    out.push_str(&format!("\nPage text:\n{text}\n"));
    out
}

/// The user message for one decision.
pub fn build_prompt(task: &Task, snapshot: &PageSnapshot, history: &History) -> String {
    let mut out = format!("Task: {}\n\n{}", task.description, describe_page(snapshot));
    if !history.is_empty() {
        out.push_str("\nHistory:\n");
        for (i, entry) in history.entries().iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, entry.summary()));
        }
    }
    out.push_str("\nWhat is the next step?");
    out
}

fn string_param(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn function(name: ActionName, description: &str, properties: Value, required: &[&str]) -> Value {
    let mut properties = properties;
    if let Value::Object(props) = &mut properties {
        props.insert(
            "reasoning".to_string(),
            string_param("Why this step moves the task forward"),
        );
    }
    json!({
        "type": "function",
        "function": {
            "name": name.as_str(),
            "description": description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        },
    })
}

fn tool(name: ActionName) -> Value {
    match name {
        ActionName::Navigate => function(
            name,
            "Load a URL in the active tab",
            json!({"url": string_param("Absolute URL")}),
            &["url"],
        ),
        ActionName::Click => function(
            name,
            "Click an element",
            json!({"selector": string_param("Selector from the element list")}),
            &["selector"],
        ),
        ActionName::TypeText => function(
            name,
            "Replace the contents of an input with text",
            json!({
                "selector": string_param("Selector of the input"),
                "text": string_param("Text to type"),
            }),
            &["selector", "text"],
        ),
        ActionName::Scroll => function(
            name,
            "Scroll the page",
            json!({
                "direction": {"type": "string", "enum": ["up", "down"]},
                "amount": {"type": "integer", "description": "Pixels, 500 if omitted"},
            }),
            &["direction"],
        ),
        ActionName::Extract => function(
            name,
            "Read the full visible text of the page",
            json!({}),
            &[],
        ),
        ActionName::Wait => function(
            name,
            "Wait for the page to change",
            json!({"seconds": {"type": "integer", "minimum": 1, "maximum": MAX_WAIT_SECS}}),
            &["seconds"],
        ),
        ActionName::OpenTab => function(
            name,
            "Open a new tab, make it active and optionally load a URL",
            json!({"url": string_param("URL to load in the new tab")}),
            &[],
        ),
        ActionName::SwitchTab => function(
            name,
            "Make another open tab active",
            json!({"index": {"type": "integer", "description": "0 is the first tab"}}),
            &["index"],
        ),
        ActionName::Complete => function(
            name,
            "Finish the task",
            json!({"summary": string_param("What was achieved")}),
            &["summary"],
        ),
        ActionName::AskApproval => function(
            name,
            "Ask the user to confirm a risky action before it runs",
            json!({
                "action": {
                    "type": "string",
                    "enum": ["navigate", "click", "type_text", "scroll", "extract", "wait", "open_tab", "switch_tab"],
                },
                "parameters": {"type": "object", "description": "Arguments of that action"},
                "reason": string_param("What could go wrong"),
            }),
            &["action", "parameters", "reason"],
        ),
        ActionName::AskUser => function(
            name,
            "Ask the user a question",
            json!({"question": string_param("The question")}),
            &["question"],
        ),
    }
}

/// Function definitions for the offered vocabulary, in its order.
pub fn build_tools(vocabulary: &[ActionName]) -> Vec<Value> {
    vocabulary.iter().copied().map(tool).collect()
}

fn decode_error(err: serde_json::Error) -> DeciderError {
    DeciderError::Decode(err.to_string())
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Turn a function call into a typed intent. Missing or ill-typed arguments
/// are an error, never a default.
pub fn decode_call(name: &str, arguments: Value) -> Result<ActionIntent, DeciderError> {
    let Value::Object(mut args) = arguments else {
        return Err(DeciderError::Decode(format!(
            "arguments of {name} are not an object"
        )));
    };
    let reasoning = take_string(&mut args, "reasoning").unwrap_or_default();

    let kind = if name == ActionName::AskApproval.as_str() {
        let inner = take_string(&mut args, "action").ok_or_else(|| {
            DeciderError::Decode("ask_approval without an action".to_string())
        })?;
        let mut parameters = match args.remove("parameters") {
            Some(Value::Object(p)) => p,
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                return Err(DeciderError::Decode(
                    "ask_approval parameters are not an object".to_string(),
                ));
            }
        };
        parameters.insert("action".to_string(), Value::String(inner));
        let proposed: ActionKind =
            serde_json::from_value(Value::Object(parameters)).map_err(decode_error)?;
        ActionKind::AskApproval {
            proposed: Box::new(proposed),
            reason: take_string(&mut args, "reason").unwrap_or_default(),
        }
    } else {
        args.insert("action".to_string(), Value::String(name.to_string()));
        serde_json::from_value(Value::Object(args)).map_err(decode_error)?
    };

    Ok(ActionIntent::new(kind, reasoning))
}

/// Interpret a chat-completions reply.
///
/// A tool call becomes its intent, plain text becomes a question for the
/// operator and an empty reply means the model has nothing left to do.
pub fn parse_reply(reply: &Value) -> Result<Option<ActionIntent>, DeciderError> {
    let message = &reply["choices"][0]["message"];
    if message.is_null() {
        return Err(DeciderError::Decode("reply has no message".to_string()));
    }

    if let Some(call) = message["tool_calls"].as_array().and_then(|calls| calls.first()) {
        let name = call["function"]["name"]
            .as_str()
            .ok_or_else(|| DeciderError::Decode("tool call without a name".to_string()))?;
        let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
        let arguments: Value = serde_json::from_str(raw).map_err(decode_error)?;
        return decode_call(name, arguments).map(Some);
    }

    let content = message["content"].as_str().unwrap_or_default().trim();
    if content.is_empty() {
        return Ok(None);
    }
    Ok(Some(ActionIntent::new(
        ActionKind::AskUser {
            question: content.to_string(),
        },
        "",
    )))
}
