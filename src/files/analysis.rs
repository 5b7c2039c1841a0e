//! Prompts and report formatting for file analysis.

use std::fmt;
use std::time::Duration;

use super::mime::ContentClass;
use super::LoadedFile;
use crate::protocol::{SamplingRequest, SamplingResult};

/// Output budget for an analysis
pub const ANALYSIS_MAX_TOKENS: u32 = 2000;
/// Temperature for an analysis
pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
/// How long an analysis may wait for the responder
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(300);

/// Kind of analysis requested
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AnalysisType {
    /// Short summary
    #[default]
    Summarize,
    /// What the content is for
    Explain,
    /// Structure and patterns
    Analyze,
    /// Bullet-style key points
    ExtractKeyPoints,
    /// Anything else, kept verbatim for the report
    Other(String),
}

impl AnalysisType {
    /// Parse a user-supplied name
    pub fn parse(name: &str) -> Self {
        match name {
            "summarize" => Self::Summarize,
            "explain" => Self::Explain,
            "analyze" => Self::Analyze,
            "extract_key_points" => Self::ExtractKeyPoints,
            other => Self::Other(other.to_string()),
        }
    }

    /// Instruction for the model
    pub fn base_prompt(&self) -> &'static str {
        match self {
            Self::Summarize => "Please provide a clear and concise summary of this content.",
            Self::Explain => "Please explain what this content is about and its main purpose.",
            Self::Analyze => {
                "Please provide a detailed analysis of this content, including its structure, key components, and any notable patterns."
            },
            Self::ExtractKeyPoints => "Please extract the key points and main ideas from this content.",
            Self::Other(_) => "Please analyze this content and provide insights.",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summarize => write!(f, "summarize"),
            Self::Explain => write!(f, "explain"),
            Self::Analyze => write!(f, "analyze"),
            Self::ExtractKeyPoints => write!(f, "extract_key_points"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Build the sampling request for a file
pub fn analysis_request(
    file: &LoadedFile,
    analysis: &AnalysisType,
    custom_prompt: Option<&str>,
) -> SamplingRequest {
    let base = custom_prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| analysis.base_prompt());

    let description = match file.class {
        ContentClass::Text => format!("The content is a {} file named '{}'.", file.mime_type, file.name),
        ContentClass::Image => format!(
            "The content is an image file named '{}' of type {}.",
            file.name, file.mime_type
        ),
        ContentClass::Binary => format!(
            "The content is a binary file named '{}' of type {}, provided as base64-encoded data.",
            file.name, file.mime_type
        ),
    };

    SamplingRequest::new(file.to_content())
        .with_system_prompt(&format!("{base} {description}"))
        .with_max_tokens(ANALYSIS_MAX_TOKENS)
        .with_temperature(ANALYSIS_TEMPERATURE)
}

/// Render the analysis report
pub fn format_report(file: &LoadedFile, analysis: &AnalysisType, result: &SamplingResult) -> String {
    format!(
        "File Analysis Results\n\
         =====================\n\
         File: {}\n\
         Type: {}\n\
         Analysis: {}\n\
         Model: {}\n\n\
         {}",
        file.name, file.mime_type, analysis, result.model, result.content
    )
}
