mod grammar;
mod http;
pub mod prompts;

use serde::Serialize;

pub use grammar::{
    FinalClassification, ResultKind, ValidationVerdict, parse_final, parse_resolvability,
    parse_sql, parse_terms, parse_validation,
};
pub use http::{CompletionClientConfig, DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL, HttpCompletionClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    TermExtraction,
    Resolvability,
    Generation,
    Correction,
    Validation,
    FinalClassification,
}

impl CallSite {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TermExtraction => "term_extraction",
            Self::Resolvability => "resolvability",
            Self::Generation => "generation",
            Self::Correction => "correction",
            Self::Validation => "validation",
            Self::FinalClassification => "final_classification",
        }
    }

    fn temperature(self) -> f32 {
        match self {
            Self::Generation | Self::FinalClassification => 0.2,
            Self::TermExtraction | Self::Resolvability | Self::Correction | Self::Validation => 0.1,
        }
    }

    fn max_tokens(self) -> u32 {
        match self {
            Self::TermExtraction => 60,
            Self::Resolvability => 200,
            Self::Validation => 400,
            Self::Generation | Self::Correction | Self::FinalClassification => 800,
        }
    }

    fn stop_sequences(self) -> Vec<String> {
        match self {
            Self::TermExtraction => vec!["\n\n".to_string()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub call_site: CallSite,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn for_call_site(call_site: CallSite, prompt: impl Into<String>) -> Self {
        Self {
            call_site,
            system: Some(prompts::system_prompt(call_site).to_string()),
            prompt: prompt.into(),
            temperature: call_site.temperature(),
            max_tokens: call_site.max_tokens(),
            stop: call_site.stop_sequences(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service unreachable: {0}")]
    Transport(String),

    #[error("completion service returned http {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion service returned an unreadable body: {0}")]
    InvalidBody(String),

    #[error("completion service returned an empty response")]
    EmptyResponse,
}

pub trait CompletionService: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}
