use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ContentGeneratorError {
    #[error("content generator produced empty output")]
    Empty,
    #[error("content generator error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct GeneratedContent {
    pub subject: String,
    pub body_html: String,
}

/// The out-of-scope subject/body generator. The engine treats its output
/// as opaque beyond the non-empty, length-bounded contract.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, kind: &str) -> Result<GeneratedContent, ContentGeneratorError>;
}

pub mod fake {
    use super::*;

    /// Stand-in for the out-of-scope subject/body generator; see the note
    /// on `mail_client::fake::FakeMailClient`.
    pub struct FakeContentGenerator;

    #[async_trait]
    impl ContentGenerator for FakeContentGenerator {
        async fn generate(&self, kind: &str) -> Result<GeneratedContent, ContentGeneratorError> {
            Ok(GeneratedContent {
                subject: format!("warmup: {kind}"),
                body_html: "<p>checking in</p>".to_string(),
            })
        }
    }
}
