use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    CreatePipeRequest, CreatePipeResponse, MemoryChunk, MemoryRetrieveRequest, Message,
    PipeRequest, PipeResponse,
};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};
use crate::prompts::{
    ANSWER_SYSTEM_PROMPT, GUARD_SYSTEM_PROMPT, PLANNER_SYSTEM_PROMPT, STUDENT_SQL_SYSTEM_PROMPT,
};

const DEFAULT_MODEL: &str = "openai:gpt-4o-mini";

/// Client for interacting with the Langbase Pipes and Memory APIs
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call a Langbase pipe with the given request
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        self.with_retries(&request.name, || {
            self.send_json(self.client.post(&url).json(&request))
        })
        .await
    }

    /// Retrieve the `top_k` closest chunks from a Langbase memory
    pub async fn retrieve_memory(
        &self,
        request: MemoryRetrieveRequest,
    ) -> LangbaseResult<Vec<MemoryChunk>> {
        let url = format!("{}/v1/memory/retrieve", self.base_url);
        let label = request
            .memory
            .first()
            .map(|m| m.name.clone())
            .unwrap_or_default();

        debug!(memory = %label, top_k = request.top_k, "Retrieving from Langbase memory");

        self.with_retries(&label, || {
            self.send_json(self.client.post(&url).json(&request))
        })
        .await
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let pipe_response: CreatePipeResponse =
            self.send_json(self.client.post(&url).json(&request)).await?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure a pipe exists with the given system prompt, creating it if needed
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
        json_output: bool,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_model(DEFAULT_MODEL)
            .with_upsert(true)
            .with_json_output(json_output)
            .with_temperature(0.0)
            .with_max_tokens(2000)
            .with_messages(vec![Message::system(system_prompt)]);

        match self.create_pipe(request).await {
            Ok(_) => {
                info!(pipe = %pipe_name, "Pipe ready");
                Ok(())
            }
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure every pipe the router calls exists
    pub async fn ensure_pipes(&self, pipes: &PipeConfig) -> LangbaseResult<()> {
        self.ensure_pipe(
            &pipes.planner,
            "Dry-run tool planner for university queries",
            PLANNER_SYSTEM_PROMPT,
            true,
        )
        .await?;
        self.ensure_pipe(
            &pipes.answer,
            "Answers university queries from supplied context",
            ANSWER_SYSTEM_PROMPT,
            false,
        )
        .await?;
        self.ensure_pipe(
            &pipes.student_sql,
            "Turns student data questions into read-only SQL",
            STUDENT_SQL_SYSTEM_PROMPT,
            true,
        )
        .await?;
        self.ensure_pipe(
            &pipes.guard,
            "Classifies student data requests as SAFE or MODIFY",
            GUARD_SYSTEM_PROMPT,
            false,
        )
        .await
    }

    /// Run `attempt` until it succeeds or the retry budget is spent, backing off exponentially
    async fn with_retries<T, F, Fut>(&self, label: &str, attempt: F) -> LangbaseResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = LangbaseResult<T>>,
    {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    target_name = %label,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match attempt().await {
                Ok(response) => {
                    info!(
                        target_name = %label,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        target_name = %label,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Send an authorized JSON request once and decode the body
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> LangbaseResult<T> {
        let response = builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}
