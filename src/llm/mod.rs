//! 로컬 LLM 클라이언트 모듈
//!
//! LLM은 동기 요청/응답 텍스트 완성 기능으로만 취급합니다.
//! 응답 파싱은 합성기(`synth`)의 책임이며 클라이언트는 문자열만 돌려줍니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let llm = OllamaClient::from_config(&config.llm)?;
//! let text = llm.complete("Convert this content...").await?;
//! ```

pub mod mock;
mod ollama;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LlmError;

pub use mock::{Scripted, ScriptedLlm};
pub use ollama::{HealthReport, OllamaClient};

// ============================================================================
// LlmClient Trait
// ============================================================================

/// 텍스트 완성 클라이언트
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 렌더링된 프롬프트로 한 번 호출
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// 클라이언트 이름 (로그용)
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Model Listing
// ============================================================================

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ollama에 설치된 모델 목록 (`GET /api/tags`)
pub async fn list_models(client: &reqwest::Client, endpoint: &str) -> Result<Vec<String>, LlmError> {
    let response = client
        .get(format!("{}/api/tags", endpoint.trim_end_matches('/')))
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let tags: TagsResponse =
        serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// 설치된 모델 이름이 요청한 모델과 같은지 (태그 생략 시 `:latest`)
pub fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    if !wanted.contains(':') {
        return installed == format!("{}:latest", wanted);
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matches() {
        assert!(model_matches("deepseek-r1:32b", "deepseek-r1:32b"));
        assert!(model_matches("llava:latest", "llava"));
        assert!(!model_matches("llava:13b", "llava"));
        assert!(!model_matches("deepseek-r1:7b", "deepseek-r1:32b"));
    }

    #[test]
    fn test_tags_response_parsing() {
        let body = r#"{"models":[{"name":"deepseek-r1:32b","size":1},{"name":"llava:latest"}]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(tags.models.len(), 2);
        assert_eq!(tags.models[1].name, "llava:latest");
    }
}
