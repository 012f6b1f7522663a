//! 프롬프트 템플릿
//!
//! 템플릿 문구는 외부 설정입니다. `{doc_type}`, `{title}`, `{content}`
//! 자리표시자를 청크 값으로 채웁니다. 외부 파일은 `{content}`를 반드시 포함해야 합니다.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::knowledge::Chunk;

/// 기본 QA 변환 템플릿
pub const DEFAULT_TEMPLATE: &str = r#"Convert this cybersecurity content into question-answer pairs for training an AI assistant.

Create Q&A pairs that focus on:
- Technical procedures and methods
- Tools and commands
- Vulnerability concepts
- Step-by-step processes

Format EXACTLY like this:
Q: [specific question]
A: [detailed answer]

Q: [another question]
A: [another answer]

Document Type: {doc_type}
Title: {title}

Content:
{content}

Q&A Pairs:"#;

/// 렌더링 가능한 템플릿
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    /// 자리표시자를 뺀 지시문 (정규화), 답변 재진술 검사용
    instruction: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::build(DEFAULT_TEMPLATE.to_string())
    }
}

impl PromptTemplate {
    /// 템플릿 문자열로 생성 (`{content}` 필수)
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains("{content}") {
            bail!("Prompt template must contain a {{content}} placeholder");
        }
        Ok(Self::build(template))
    }

    /// 파일에서 템플릿 로드
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template: {:?}", path))?;
        Self::new(raw).with_context(|| format!("Invalid prompt template: {:?}", path))
    }

    /// 경로가 있으면 파일, 없으면 기본 템플릿
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    fn build(template: String) -> Self {
        let instruction = normalize(
            &template
                .replace("{doc_type}", " ")
                .replace("{title}", " ")
                .replace("{content}", " "),
        );
        Self {
            template,
            instruction,
        }
    }

    /// 청크로 프롬프트 렌더링
    pub fn render(&self, chunk: &Chunk) -> String {
        self.template
            .replace("{doc_type}", chunk.metadata.doc_type.as_str())
            .replace("{title}", chunk.metadata.title.as_deref().unwrap_or(""))
            .replace("{content}", &chunk.text)
    }

    /// 텍스트가 지시문을 그대로 옮긴 것인지
    pub fn is_restatement(&self, text: &str) -> bool {
        let text = normalize(text);
        !text.is_empty() && self.instruction.contains(&text)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// 소문자 + 공백 축약
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
