pub mod characters;
pub mod encoding;
pub mod parser;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use characters::{extract_placeholders, reference_image_urls, substitute};
pub use parser::{parse, validate_script};

/// 分镜状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

/// 表示脚本中的一个分镜
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptFrame {
    /// 分镜序号（CSV 第一列）
    pub frame_number: i64,
    /// 场景序号，每 10 个分镜一组
    pub scene_number: i64,
    /// 当前提示词
    pub prompt: String,
    /// 替换角色名之前的提示词
    pub original_prompt: String,
    /// 提示词中出现的角色占位符，按首次出现排序
    pub characters_in_frame: Vec<String>,
    #[serde(default)]
    pub status: FrameStatus,
    /// 所有成功生成的图片，最后一张为当前图片
    #[serde(default)]
    pub generated_images: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScriptFrame {
    pub fn new(frame_number: i64, prompt: String) -> Self {
        let characters_in_frame = extract_placeholders(&prompt);
        Self {
            frame_number,
            scene_number: scene_number_for(frame_number),
            original_prompt: prompt.clone(),
            prompt,
            characters_in_frame,
            status: FrameStatus::Pending,
            generated_images: Vec::new(),
            error: None,
        }
    }

    pub fn current_image(&self) -> Option<&str> {
        self.generated_images.last().map(String::as_str)
    }

    pub fn has_image(&self) -> bool {
        !self.generated_images.is_empty()
    }
}

pub fn scene_number_for(frame_number: i64) -> i64 {
    (frame_number - 1).div_euclid(10) + 1
}

/// 角色库中的角色
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 脚本库中的脚本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub csv_content: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// 占位符 -> 角色 id，0 表示未设置
pub type CharacterMapping = BTreeMap<String, i64>;
