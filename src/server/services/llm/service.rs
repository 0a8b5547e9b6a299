use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use tracing::debug;

use super::types::{
    AssistantReply, ChatMessage, ChatRequest, ChatResponse, FunctionDefinition, Tool,
    ToolCallResponse,
};
use super::LlmError;

/// Client for the hosted chat model (OpenAI chat-completions dialect).
#[derive(Debug, Clone)]
pub struct LlmService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmService {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<LlmService> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))?;
        Ok(LlmService {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn create_tool(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Tool {
        Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }

    /// One-shot prompt with no tools; returns the assistant prose.
    pub async fn chat(&self, prompt: String) -> Result<String, LlmError> {
        let messages = [ChatMessage::user(prompt)];
        let reply = self.complete(&messages, None, None).await?;
        reply
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::Parse("model returned no content".to_string()))
    }

    /// Full exchange: the model may answer with prose, a tool-call batch,
    /// or both.
    pub async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<(Option<String>, Option<Vec<ToolCallResponse>>), LlmError> {
        let reply = self.complete(messages, Some(tools), Some("auto")).await?;
        Ok((reply.content, reply.tool_calls))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
        tool_choice: Option<&str>,
    ) -> Result<AssistantReply, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice,
            temperature: 0.7,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("status {status}: {body}")));
        }

        let mut parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        if parsed.choices.is_empty() {
            return Err(LlmError::Parse("response carried no choices".to_string()));
        }
        let choice = parsed.choices.remove(0);
        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or(""),
            tool_calls = choice
                .message
                .tool_calls
                .as_ref()
                .map(Vec::len)
                .unwrap_or(0),
            "model reply"
        );
        Ok(choice.message)
    }
}
