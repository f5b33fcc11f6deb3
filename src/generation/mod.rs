mod batch;
mod poller;

#[cfg(test)]
mod fake;

use crate::api::{GenerationBackend, GenerationRequest, SubmitOutcome};
use crate::error::{Result, StoryboardError};
use crate::script::{self, FrameStatus, ScriptFrame};
use crate::workspace::Workspace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use batch::{BatchOutcome, BatchSummary};
pub use poller::PollOutcome;

/// 附加在提示词末尾的参考图说明
pub const REFERENCE_INSTRUCTION: &str =
    "参考图片的文件名即为角色名称，请根据文件名将参考图片与画面中的角色一一对应。";

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(600);

pub const MODELS: &[&str] = &["sora_image", "gemini-2.5-flash-image-preview"];
pub const IMAGE_SIZES: &[&str] = &["[16:9]", "[3:2]", "[1:1]", "[9:16]", "[2:3]"];

/// 轮询策略：固定间隔，固定上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        // 5 秒 x 100 次，不超过提交请求的 10 分钟超时
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 100,
        }
    }
}

impl PollPolicy {
    pub fn timeout_message(&self) -> String {
        format!(
            "Generation timed out after {} status checks ({}s)",
            self.max_attempts,
            self.interval.as_secs() * u64::from(self.max_attempts)
        )
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// 图片尺寸，如 `[16:9]`
    pub image_size: String,
    pub model: String,
    /// 提交前是否翻译提示词
    pub translate: bool,
    pub submit_timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZES[0].to_string(),
            model: MODELS[0].to_string(),
            translate: false,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

impl GenerationOptions {
    /// 请求体中的尺寸不带方括号
    pub fn request_image_size(&self) -> String {
        self.image_size.replace(['[', ']'], "")
    }
}

/// 组装最终提示词：替换后的文本 + 尺寸 + 参考图说明
pub fn build_prompt(display_prompt: &str, image_size: &str) -> String {
    let mut prompt = display_prompt.trim_end().to_string();
    if !image_size.trim().is_empty() {
        prompt.push(' ');
        prompt.push_str(image_size.trim());
    }
    prompt.push('\n');
    prompt.push_str(REFERENCE_INSTRUCTION);
    prompt
}

/// 生成编排：提交、轮询，并把结果写回工作区
pub struct Orchestrator<B: GenerationBackend> {
    backend: Arc<B>,
    options: GenerationOptions,
    policy: PollPolicy,
}

impl<B: GenerationBackend> Orchestrator<B> {
    pub fn new(backend: Arc<B>, options: GenerationOptions, policy: PollPolicy) -> Self {
        Self {
            backend,
            options,
            policy,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    fn request_for(&self, ws: &Workspace, frame: &ScriptFrame, display_prompt: &str) -> GenerationRequest {
        let mapping = ws.mapping();
        GenerationRequest {
            prompt: build_prompt(display_prompt, &self.options.image_size),
            image_size: self.options.request_image_size(),
            model: self.options.model.clone(),
            character_image_urls: script::reference_image_urls(frame, &mapping, ws.characters()),
        }
    }

    fn display_prompt(&self, ws: &Workspace, frame: &ScriptFrame) -> String {
        script::substitute(&frame.original_prompt, &ws.mapping(), ws.characters())
    }

    /// 提交请求，超时和传输错误都转为 Err
    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome> {
        match tokio::time::timeout(self.options.submit_timeout, self.backend.submit(request)).await {
            Ok(result) => result,
            Err(_) => Err(StoryboardError::Timeout(format!(
                "no response within {}s",
                self.options.submit_timeout.as_secs()
            ))),
        }
    }

    fn submit_error_message(&self, err: &StoryboardError) -> String {
        if err.is_timeout() {
            format!(
                "Generation request timed out after {} minutes",
                self.options.submit_timeout.as_secs() / 60
            )
        } else {
            format!("Generation failed: {}", err)
        }
    }

    /// 生成单个分镜，返回该次尝试的最终状态
    pub async fn generate_one(&self, ws: &Workspace, frame_number: i64) -> Result<FrameStatus> {
        let frame = ws.begin_generation(frame_number)?;

        let mut prompt = self.display_prompt(ws, &frame);
        if self.options.translate {
            let translated = self.backend.translate(&prompt).await;
            prompt = match translated {
                Ok(translated) => translated,
                Err(e) => {
                    warn!("Translation failed for frame {}, using original: {}", frame_number, e);
                    prompt
                }
            };
        }
        let request = self.request_for(ws, &frame, &prompt);
        info!("Generating frame {}", frame_number);

        let status = match self.submit(&request).await {
            Ok(SubmitOutcome::Completed { image_url }) => {
                info!("Frame {} completed immediately", frame_number);
                ws.complete(frame_number, image_url);
                FrameStatus::Completed
            }
            Ok(SubmitOutcome::Accepted { task_id }) => {
                info!("Frame {} accepted as task {}", frame_number, task_id);
                match self.poll_task(&task_id).await {
                    PollOutcome::Completed(image_url) => {
                        ws.complete(frame_number, image_url);
                        FrameStatus::Completed
                    }
                    PollOutcome::Failed(error) => {
                        ws.fail(frame_number, error);
                        FrameStatus::Failed
                    }
                    PollOutcome::TimedOut => {
                        ws.fail(frame_number, self.policy.timeout_message());
                        FrameStatus::Failed
                    }
                }
            }
            Ok(SubmitOutcome::Rejected { error }) => {
                warn!("Frame {} rejected: {}", frame_number, error);
                ws.fail(frame_number, error);
                FrameStatus::Failed
            }
            Err(e) => {
                let message = self.submit_error_message(&e);
                warn!("Frame {}: {}", frame_number, message);
                ws.fail(frame_number, message);
                FrameStatus::Failed
            }
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeBackend, FakeSubmit};
    use super::*;
    use crate::api::TaskStatus;
    use crate::script::Character;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    fn workspace(raw: &str) -> Workspace {
        let ws = Workspace::new(vec![
            Character {
                id: 1,
                name: "Alice".to_string(),
                image_url: Some("https://cdn/alice.png".to_string()),
                category: None,
                tags: Vec::new(),
            },
            Character {
                id: 2,
                name: "Bob".to_string(),
                image_url: Some("https://cdn/bob.png".to_string()),
                category: None,
                tags: Vec::new(),
            },
        ]);
        ws.load_script(None, raw);
        ws
    }

    fn orchestrator(backend: Arc<FakeBackend>) -> Orchestrator<FakeBackend> {
        Orchestrator::new(backend, GenerationOptions::default(), fast_policy())
    }

    #[test]
    fn test_build_prompt_appends_size_and_instruction() {
        let prompt = build_prompt("Alice 在街头 ", "[16:9]");
        assert_eq!(prompt, format!("Alice 在街头 [16:9]\n{}", REFERENCE_INSTRUCTION));
        let options = GenerationOptions::default();
        assert_eq!(options.request_image_size(), "16:9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_then_polled_to_completion() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("shot", FakeSubmit::accepted("t1"));
        backend.push_status("t1", TaskStatus::Processing, None);
        backend.push_status("t1", TaskStatus::Completed, Some("https://x/y.png"));

        let ws = workspace("1,shot");
        assert_eq!(ws.frame(1).unwrap().status, FrameStatus::Pending);
        let orch = orchestrator(backend.clone());
        let (status, midway) = tokio::join!(orch.generate_one(&ws, 1), async {
            // 第一次查询之前
            tokio::time::sleep(Duration::from_secs(1)).await;
            ws.frame(1).map(|f| f.status)
        });

        assert_eq!(midway, Some(FrameStatus::Generating));
        let status = status.unwrap();
        assert_eq!(status, FrameStatus::Completed);
        let frame = ws.frame(1).unwrap();
        assert_eq!(frame.status, FrameStatus::Completed);
        assert_eq!(frame.generated_images, vec!["https://x/y.png"]);
        assert_eq!(backend.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_frame_references_only() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("", FakeSubmit::completed("https://x/a.png"));

        let ws = workspace("1,角色A 独自站立\n2,角色B 出场");
        ws.set_mapping("角色A", 1);
        ws.set_mapping("角色B", 2);
        orchestrator(backend.clone()).generate_one(&ws, 1).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].character_image_urls, vec!["https://cdn/alice.png"]);
        assert!(requests[0].prompt.starts_with("Alice 独自站立 [16:9]\n"));
        assert_eq!(requests[0].image_size, "16:9");
        assert_eq!(requests[0].model, "sora_image");
    }

    #[tokio::test(start_paused = true)]
    async fn test_regeneration_appends_history() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("shot", FakeSubmit::completed("https://x/1.png"));
        let ws = workspace("1,shot");
        let orch = orchestrator(backend.clone());

        orch.generate_one(&ws, 1).await.unwrap();
        backend.on_submit("shot", FakeSubmit::rejected("quota exceeded"));
        orch.generate_one(&ws, 1).await.unwrap();
        backend.on_submit("shot", FakeSubmit::completed("https://x/2.png"));
        orch.generate_one(&ws, 1).await.unwrap();

        let frame = ws.frame(1).unwrap();
        assert_eq!(frame.generated_images, vec!["https://x/1.png", "https://x/2.png"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_and_failed_tasks() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("one", FakeSubmit::rejected("bad prompt"));
        backend.on_submit("two", FakeSubmit::accepted("t2"));
        backend.push_failed("t2", "content policy");
        let ws = workspace("1,one\n2,two");
        let orch = orchestrator(backend);

        assert_eq!(orch.generate_one(&ws, 1).await.unwrap(), FrameStatus::Failed);
        assert_eq!(ws.frame(1).unwrap().error.as_deref(), Some("bad prompt"));
        assert_eq!(orch.generate_one(&ws, 2).await.unwrap(), FrameStatus::Failed);
        assert_eq!(ws.frame(2).unwrap().error.as_deref(), Some("content policy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_ceiling_marks_timeout() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("slow", FakeSubmit::accepted("t3"));
        backend.push_status("t3", TaskStatus::Processing, None);
        let ws = workspace("1,slow");
        let orch = orchestrator(backend.clone());

        assert_eq!(orch.generate_one(&ws, 1).await.unwrap(), FrameStatus::Failed);
        let frame = ws.frame(1).unwrap();
        assert_eq!(frame.error, Some(fast_policy().timeout_message()));
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_timeout_and_transport_errors_differ() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("hang", FakeSubmit::Hang);
        backend.on_submit("down", FakeSubmit::TransportError);
        let ws = workspace("1,hang\n2,down");
        let orch = orchestrator(backend);

        orch.generate_one(&ws, 1).await.unwrap();
        orch.generate_one(&ws, 2).await.unwrap();
        let hang = ws.frame(1).unwrap().error.unwrap();
        let down = ws.frame(2).unwrap().error.unwrap();
        assert!(hang.contains("timed out"));
        assert!(down.starts_with("Generation failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_translation_failure_passes_prompt_through() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_submit("", FakeSubmit::completed("https://x/t.png"));
        backend.fail_translation();
        let ws = workspace("1,雨夜街道");
        let options = GenerationOptions {
            translate: true,
            ..GenerationOptions::default()
        };
        let orch = Orchestrator::new(backend.clone(), options, fast_policy());

        orch.generate_one(&ws, 1).await.unwrap();
        assert!(backend.requests()[0].prompt.starts_with("雨夜街道"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frame_is_an_error() {
        let backend = Arc::new(FakeBackend::new());
        let ws = workspace("1,shot");
        let result = orchestrator(backend).generate_one(&ws, 42).await;
        assert!(matches!(result, Err(StoryboardError::FrameNotFound(42))));
    }
}
