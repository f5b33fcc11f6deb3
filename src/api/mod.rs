pub mod client;
pub mod types;

use crate::error::Result;
use async_trait::async_trait;

pub use client::StoryboardClient;
pub use types::{BatchStatus, GenerationRequest, SubmitOutcome, TaskSnapshot, TaskStatus};

/// 生成后端。编排器只依赖这个 trait，测试中用内存实现替换。
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 提交单张图片生成
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome>;

    /// 查询单个任务状态
    async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot>;

    /// 一次查询多个任务的状态
    async fn batch_status(&self, task_ids: &[String]) -> Result<BatchStatus>;

    async fn translate(&self, text: &str) -> Result<String>;

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>>;
}
