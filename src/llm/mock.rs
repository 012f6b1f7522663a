//! 스크립트 기반 LLM (테스트용)
//!
//! 큐에 넣은 응답을 순서대로 돌려주고 호출 횟수를 셉니다.
//! 큐가 비면 기본 응답(없으면 빈 응답 오류)을 반환합니다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::LlmClient;
use crate::error::LlmError;

/// 스크립트 응답
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Timeout,
    Unreachable,
}

/// 큐 기반 LLM
#[derive(Debug, Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    default_reply: Option<String>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// 응답 목록으로 생성
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::new();
        for reply in replies {
            llm.push(Scripted::Reply(reply.into()));
        }
        llm
    }

    /// 큐가 비었을 때 돌려줄 응답
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    pub fn push(&self, step: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    /// 지금까지 호출 횟수
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 받은 프롬프트 기록
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Timeout) => Err(LlmError::Timeout(std::time::Duration::from_secs(0))),
            Some(Scripted::Unreachable) => Err(LlmError::Status {
                status: 503,
                body: "scripted outage".to_string(),
            }),
            None => self
                .default_reply
                .clone()
                .ok_or_else(|| LlmError::EmptyResponse("scripted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
