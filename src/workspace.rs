use crate::error::{Result, StoryboardError};
use crate::script::characters::{anchor_placeholders, extract_placeholders, resolve};
use crate::script::{self, Character, CharacterMapping, FrameStatus, ScriptFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// 可持久化的工作区状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceState {
    #[serde(default)]
    pub script_id: Option<i64>,
    #[serde(default)]
    pub frames: Vec<ScriptFrame>,
    #[serde(default)]
    pub mapping: CharacterMapping,
    /// 解析前的脚本原文，用于判断状态文件是否对应同一脚本
    #[serde(default)]
    pub source: String,
}

/// 分镜工作区：当前脚本的分镜、角色库和角色映射。
///
/// 所有对分镜的修改都按 `frame_number` 定位并只替换该分镜，锁不会跨越 await。
#[derive(Debug)]
pub struct Workspace {
    characters: Vec<Character>,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    pub fn new(characters: Vec<Character>) -> Self {
        Self {
            characters,
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    pub fn from_state(characters: Vec<Character>, state: WorkspaceState) -> Self {
        Self {
            characters,
            state: Mutex::new(state),
        }
    }

    /// 选择脚本：重新解析分镜并重置角色映射
    pub fn load_script(&self, script_id: Option<i64>, raw: &str) -> usize {
        let (frames, mapping) = script::parse(raw, &self.characters);
        let count = frames.len();
        let mut state = self.state.lock();
        *state = WorkspaceState {
            script_id,
            frames,
            mapping,
            source: raw.to_string(),
        };
        count
    }

    /// 状态来自同一脚本（id 与原文都一致）时可直接续用，保留已生成的图片
    pub fn is_same_script(&self, script_id: Option<i64>, raw: &str) -> bool {
        let state = self.state.lock();
        !state.frames.is_empty() && state.script_id == script_id && state.source == raw
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn snapshot(&self) -> WorkspaceState {
        self.state.lock().clone()
    }

    pub fn frames(&self) -> Vec<ScriptFrame> {
        self.state.lock().frames.clone()
    }

    pub fn frame(&self, frame_number: i64) -> Option<ScriptFrame> {
        self.state
            .lock()
            .frames
            .iter()
            .find(|f| f.frame_number == frame_number)
            .cloned()
    }

    pub fn mapping(&self) -> CharacterMapping {
        self.state.lock().mapping.clone()
    }

    /// 设置占位符对应的角色，id 为 0 表示取消映射
    pub fn set_mapping(&self, token: &str, character_id: i64) {
        let mut state = self.state.lock();
        if character_id == 0 {
            state.mapping.remove(token);
        } else {
            state.mapping.insert(token.to_string(), character_id);
        }
    }

    pub fn clear_mapping(&self) {
        self.state.lock().mapping.clear();
    }

    /// 所有分镜中出现的占位符，按首次出现排序
    pub fn placeholders(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut tokens: Vec<String> = Vec::new();
        for token in state.frames.iter().flat_map(|f| f.characters_in_frame.iter()) {
            if !tokens.contains(token) {
                tokens.push(token.clone());
            }
        }
        tokens
    }

    /// 占位符当前映射到的角色名，未映射时返回占位符本身
    pub fn character_name(&self, token: &str) -> String {
        let mapping = self.mapping();
        resolve(token, &mapping, &self.characters)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| token.to_string())
    }

    /// 展示用提示词，每次都由原始提示词和当前映射重新计算
    pub fn display_prompt(&self, frame_number: i64) -> Option<String> {
        let state = self.state.lock();
        let frame = state
            .frames
            .iter()
            .find(|f| f.frame_number == frame_number)?;
        Some(script::substitute(
            &frame.original_prompt,
            &state.mapping,
            &self.characters,
        ))
    }

    /// 保存手动编辑的提示词。已映射的角色名会被还原为占位符，之后修改映射仍然生效。
    pub fn edit_prompt(&self, frame_number: i64, edited: &str) -> Result<()> {
        let mut state = self.state.lock();
        let anchored = anchor_placeholders(edited, &state.mapping, &self.characters);
        let frame = state
            .frames
            .iter_mut()
            .find(|f| f.frame_number == frame_number)
            .ok_or(StoryboardError::FrameNotFound(frame_number))?;
        frame.prompt = edited.to_string();
        frame.characters_in_frame = extract_placeholders(&anchored);
        frame.original_prompt = anchored;
        debug!("Frame {} prompt edited", frame_number);
        Ok(())
    }

    /// 替换指定分镜，返回是否找到
    pub fn update_frame<F>(&self, frame_number: i64, f: F) -> bool
    where
        F: FnOnce(&mut ScriptFrame),
    {
        let mut state = self.state.lock();
        match state
            .frames
            .iter_mut()
            .find(|frame| frame.frame_number == frame_number)
        {
            Some(frame) => {
                f(frame);
                true
            }
            None => false,
        }
    }

    /// 标记分镜进入生成中；已在生成中的分镜拒绝重复提交
    pub fn begin_generation(&self, frame_number: i64) -> Result<ScriptFrame> {
        let mut state = self.state.lock();
        let frame = state
            .frames
            .iter_mut()
            .find(|f| f.frame_number == frame_number)
            .ok_or(StoryboardError::FrameNotFound(frame_number))?;
        if frame.status == FrameStatus::Generating {
            return Err(StoryboardError::FrameBusy(frame_number));
        }
        frame.status = FrameStatus::Generating;
        frame.error = None;
        Ok(frame.clone())
    }

    /// 追加新图片，历史图片保留
    pub fn complete(&self, frame_number: i64, image_url: String) {
        self.update_frame(frame_number, |frame| {
            frame.generated_images.push(image_url);
            frame.status = FrameStatus::Completed;
            frame.error = None;
        });
    }

    pub fn fail(&self, frame_number: i64, error: impl Into<String>) {
        let error = error.into();
        self.update_frame(frame_number, |frame| {
            frame.status = FrameStatus::Failed;
            frame.error = Some(error);
        });
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        info!("Workspace saved to: {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path, characters: Vec<Character>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let mut state: WorkspaceState = serde_json::from_str(&json)?;
        // 上次中断时仍在生成中的分镜无法恢复轮询
        for frame in state.frames.iter_mut() {
            if frame.status == FrameStatus::Generating {
                frame.status = FrameStatus::Failed;
                frame.error = Some("Generation interrupted".to_string());
            }
        }
        info!(
            "Workspace loaded from {} ({} frames)",
            path.display(),
            state.frames.len()
        );
        Ok(Self::from_state(characters, state))
    }
}
