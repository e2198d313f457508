use crate::domain::model::{ClassifyMode, RawRow, RunReport};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn input_path(&self) -> &str;
    fn output_path(&self) -> &str;
    fn instruction(&self) -> Option<&str>;
    fn classify_mode(&self) -> ClassifyMode;
    fn workers(&self) -> usize;
}

/// Seam for the external generative-text service. The concrete client is an
/// Ollama HTTP call; tests substitute a scripted mock.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<RawRow>>;
    async fn transform(&self, rows: Vec<RawRow>) -> Result<RunReport>;
    async fn load(&self, report: RunReport) -> Result<String>;
}
