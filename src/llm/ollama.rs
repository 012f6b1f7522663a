//! Ollama `/api/generate` 클라이언트
//!
//! 스트리밍 없이 한 번에 응답을 받습니다. 재시도는 호출자(합성기)가
//! 청크별 시도 예산 안에서 결정하므로 여기서는 한 번만 보냅니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{list_models, model_matches, LlmClient};
use crate::config::LlmConfig;
use crate::error::LlmError;

/// Ollama 클라이언트
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    top_p: f32,
    timeout: Duration,
}

/// 엔드포인트 상태 점검 결과
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub endpoint: String,
    pub model: String,
    pub available_models: Vec<String>,
    pub model_present: bool,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    /// 설정으로 생성
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            timeout: config.timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 엔드포인트 연결 및 모델 설치 여부 확인
    pub async fn health_check(&self) -> Result<HealthReport, LlmError> {
        let available_models = list_models(&self.client, &self.endpoint).await?;
        let model_present = available_models
            .iter()
            .any(|m| model_matches(m, &self.model));

        Ok(HealthReport {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            available_models,
            model_present,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                top_p: self.top_p,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;

        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse(self.model.clone()));
        }

        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
