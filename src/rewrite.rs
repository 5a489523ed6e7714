//! 使用语言模型改写用户查询

use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics;

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
/// 模型输出的最大 token 数
pub const MAX_REWRITE_TOKENS: u32 = 200;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("请求语言模型失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("语言模型返回错误: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("无法解析语言模型响应: {0}")]
    Decode(String),
    #[error("语言模型没有返回任何内容")]
    EmptyCompletion,
}

#[async_trait]
pub trait QueryRewriter: Send + Sync {
    /// 返回模型第一条回复的原始内容，不做裁剪和校验
    async fn rewrite(&self, query: &str) -> Result<String, RewriteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// 构造改写请求的两条消息
pub fn rewrite_messages(query: &str) -> [ChatMessage; 2] {
    [
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Convert a user query into a textual representation capturing central semantic \
             meanings which is most suitable for finding best results in a search. Output only \
             a final query not more than {MAX_REWRITE_TOKENS} tokens size. Here is the original \
             query: {query}"
        )),
    ]
}

/// Azure OpenAI 的 chat completions 客户端
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    api_version: String,
}

impl ChatClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            api_version: api_version.into(),
        }
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, RewriteError> {
        let url = format!("{}/openai/deployments/{}/chat/completions", self.endpoint, self.model);
        debug!("请求语言模型: {}", url);

        let body = ChatRequest { messages, model: &self.model, max_tokens };
        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("api-version", &self.api_version)])
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await;
        metrics::observe_upstream("llm", start.elapsed().as_secs_f64());

        let response = response?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RewriteError::Status { status: status.as_u16(), body: text });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| RewriteError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(RewriteError::EmptyCompletion)
    }
}

#[async_trait]
impl QueryRewriter for ChatClient {
    async fn rewrite(&self, query: &str) -> Result<String, RewriteError> {
        self.complete(&rewrite_messages(query), MAX_REWRITE_TOKENS).await
    }
}
