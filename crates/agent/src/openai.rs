use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use cafe_core::config::{LlmConfig, LlmProvider, OPENAI_DEFAULT_BASE_URL};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm::{
    execute_tool, ChatMessage, Fragment, FragmentStream, ReasoningLoop, ReasoningRequest,
    ToolInvocation,
};

const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Reasoning loop over an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiReasoningLoop {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
    max_iterations: u32,
}

impl OpenAiReasoningLoop {
    pub fn from_config(llm: &LlmConfig) -> Result<Self> {
        let base_url = match llm.provider {
            LlmProvider::Ollama if llm.base_url == OPENAI_DEFAULT_BASE_URL => OLLAMA_DEFAULT_BASE_URL,
            _ => llm.base_url.as_str(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .context("building chat completion client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: llm.api_key.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_retries: llm.max_retries,
            max_iterations: llm.max_iterations.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, request: &ReasoningRequest, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "stream": stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.function_schemas());
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let mut builder = self.client.post(&self.endpoint).json(body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key.expose_secret());
            }

            let failure = match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable {
                        bail!("chat completion failed with HTTP {status}: {text}");
                    }
                    anyhow!("chat completion failed with HTTP {status}: {text}")
                }
                Err(error) => anyhow::Error::new(error).context("chat completion request failed"),
            };

            if attempt >= self.max_retries {
                return Err(failure);
            }
            attempt += 1;
            warn!(
                event_name = "agent.llm.retry",
                attempt,
                max_retries = self.max_retries,
                error = %failure,
                "retrying chat completion"
            );
            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
        }
    }
}

#[async_trait]
impl ReasoningLoop for OpenAiReasoningLoop {
    async fn run(&self, request: ReasoningRequest) -> Result<String> {
        let mut messages = request.messages.clone();

        for _ in 0..self.max_iterations {
            let body = self.request_body(&request, &messages, false);
            let response: CompletionResponse =
                self.post(&body).await?.json().await.context("decoding chat completion")?;
            let message = response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message)
                .ok_or_else(|| anyhow!("chat completion returned no choices"))?;

            let tool_calls: Vec<ToolInvocation> = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect();
            let content = message.content.unwrap_or_default();

            if tool_calls.is_empty() {
                return Ok(content);
            }

            messages.push(ChatMessage::Assistant { content, tool_calls: tool_calls.clone() });
            for call in &tool_calls {
                let output = execute_tool(&request.tools, call).await;
                messages.push(ChatMessage::Tool { tool_call_id: call.id.clone(), content: output });
            }
        }

        bail!("reasoning loop reached {} iterations without a final answer", self.max_iterations)
    }

    fn stream(&self, request: ReasoningRequest) -> FragmentStream {
        let this = self.clone();

        Box::pin(async_stream::try_stream! {
            let mut messages = request.messages.clone();

            for _ in 0..this.max_iterations {
                let body = this.request_body(&request, &messages, true);
                let response = this.post(&body).await?;
                let mut events = response.bytes_stream().eventsource();
                let mut accumulator = StreamAccumulator::default();

                while let Some(event) = events.next().await {
                    let event = event.map_err(|error| anyhow!("chat completion stream failed: {error}"))?;
                    if event.data.trim() == "[DONE]" {
                        break;
                    }
                    let chunk: StreamChunk = serde_json::from_str(&event.data)
                        .map_err(|error| anyhow!("malformed chat completion chunk: {error}"))?;
                    for fragment in accumulator.push(chunk) {
                        yield fragment;
                    }
                }

                let (content, tool_calls) = accumulator.finish();
                if tool_calls.is_empty() {
                    return;
                }

                debug!(count = tool_calls.len(), "executing requested tools");
                messages.push(ChatMessage::Assistant { content, tool_calls: tool_calls.clone() });
                for call in &tool_calls {
                    let output = execute_tool(&request.tools, call).await;
                    yield Fragment::ToolResult { call_id: call.id.clone(), content: output.clone() };
                    messages.push(ChatMessage::Tool { tool_call_id: call.id.clone(), content: output });
                }
            }

            Err::<(), _>(anyhow!(
                "reasoning loop reached {} iterations without a final answer",
                this.max_iterations
            ))?;
        })
    }
}

fn message_to_wire(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => json!({"role": "user", "content": content}),
        ChatMessage::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({"role": "assistant", "content": content})
        }
        ChatMessage::Assistant { content, tool_calls } => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls
                .iter()
                .map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                }))
                .collect::<Vec<_>>(),
        }),
        ChatMessage::Tool { tool_call_id, content } => {
            json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Collects one streamed completion while forwarding its deltas as fragments.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, ToolInvocation>,
}

impl StreamAccumulator {
    fn push(&mut self, chunk: StreamChunk) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        for choice in chunk.choices {
            if let Some(deltas) = choice.delta.tool_calls {
                let mut forwarded = Vec::with_capacity(deltas.len());
                for delta in deltas {
                    let name = delta.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
                    let arguments =
                        delta.function.as_ref().and_then(|f| f.arguments.clone()).unwrap_or_default();
                    let id = delta.id.clone().unwrap_or_default();

                    let entry = self.calls.entry(delta.index).or_insert_with(|| ToolInvocation {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    if !id.is_empty() {
                        entry.id = id.clone();
                    }
                    entry.name.push_str(&name);
                    entry.arguments.push_str(&arguments);

                    forwarded.push(ToolInvocation { id, name, arguments });
                }
                fragments.push(Fragment::Model { content: String::new(), tool_calls: forwarded });
            }

            if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
                self.content.push_str(&content);
                fragments.push(Fragment::text(content));
            }
        }

        fragments
    }

    fn finish(self) -> (String, Vec<ToolInvocation>) {
        let calls = self.calls.into_values().filter(|call| !call.name.is_empty()).collect();
        (self.content, calls)
    }
}
