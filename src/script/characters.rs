use super::{Character, CharacterMapping, ScriptFrame};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// `角色：` 之后的 id：角色X、ASCII 标识符或不超过 8 个汉字
const ID_PATTERN: &str = r"角色[A-Z]|[A-Za-z0-9_-]+|[\x{4e00}-\x{9fa5}]{1,8}";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(&format!(r"角色(?:[:：]\s*({})|([A-Z]))", ID_PATTERN))
            .expect("placeholder regex should compile")
    })
}

/// 形如 `角色A` 的占位符，可以不带 `角色：` 前缀直接出现
fn is_role_token(token: &str) -> bool {
    token
        .strip_prefix("角色")
        .map(|rest| rest.len() == 1 && rest.chars().all(|c| c.is_ascii_uppercase()))
        .unwrap_or(false)
}

/// 提取提示词中的角色占位符，去重并保持首次出现的顺序
pub fn extract_placeholders(prompt: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(prompt) {
        let token = if let Some(letter) = caps.get(2) {
            format!("角色{}", letter.as_str())
        } else if let Some(id) = caps.get(1) {
            id.as_str().to_string()
        } else {
            continue;
        };
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// 按名称模糊匹配生成初始角色映射
pub fn seed_mapping(frames: &[ScriptFrame], characters: &[Character]) -> CharacterMapping {
    let mut mapping = CharacterMapping::new();
    for token in frames.iter().flat_map(|f| f.characters_in_frame.iter()) {
        if mapping.contains_key(token) {
            continue;
        }
        let token_lower = token.to_lowercase();
        let matched = characters.iter().find(|c| {
            let name_lower = c.name.trim().to_lowercase();
            !name_lower.is_empty()
                && (name_lower.contains(&token_lower) || token_lower.contains(&name_lower))
        });
        if let Some(character) = matched {
            mapping.insert(token.clone(), character.id);
        }
    }
    mapping
}

/// 查找占位符映射到的角色，0 或缺失视为未设置
pub fn resolve<'a>(
    token: &str,
    mapping: &CharacterMapping,
    characters: &'a [Character],
) -> Option<&'a Character> {
    let id = *mapping.get(token)?;
    if id == 0 {
        return None;
    }
    characters.iter().find(|c| c.id == id)
}

fn alternation(mut parts: Vec<&str>) -> String {
    // 长的优先，避免短 token 截断长 token
    parts.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    parts.dedup();
    parts
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

/// 将占位符替换为角色名称，`角色：` 前缀一并替换。
///
/// 自由 id 只在 `角色：` 之后替换；本身含占位符的角色名原样保留，重复替换结果不变。
pub fn substitute(prompt: &str, mapping: &CharacterMapping, characters: &[Character]) -> String {
    let resolved: HashMap<&str, &str> = mapping
        .keys()
        .filter_map(|token| {
            resolve(token, mapping, characters).map(|c| (token.as_str(), c.name.as_str()))
        })
        .collect();
    if resolved.is_empty() {
        return prompt.to_string();
    }

    let guarded: Vec<&str> = resolved
        .values()
        .copied()
        .filter(|name| placeholder_regex().is_match(name))
        .collect();
    let mut alternatives = Vec::new();
    if !guarded.is_empty() {
        alternatives.push(format!("(?P<name>{})", alternation(guarded)));
    }
    alternatives.push(format!(r"角色[:：]\s*(?P<id>{})", ID_PATTERN));
    alternatives.push(r"(?P<role>角色[A-Z])".to_string());
    let re = match Regex::new(&alternatives.join("|")) {
        Ok(re) => re,
        Err(_) => return prompt.to_string(),
    };

    re.replace_all(prompt, |caps: &regex::Captures| {
        let token = caps
            .name("id")
            .or_else(|| caps.name("role"))
            .map(|m| m.as_str());
        token
            .and_then(|t| resolved.get(t))
            .map(|name| name.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// 将已替换的角色名还原为占位符，用于手动编辑后的提示词；自由 id 还原为 `角色：id`
pub fn anchor_placeholders(
    prompt: &str,
    mapping: &CharacterMapping,
    characters: &[Character],
) -> String {
    let mut by_name: Vec<(&str, &str)> = Vec::new();
    for token in mapping.keys() {
        if let Some(character) = resolve(token, mapping, characters) {
            let name = character.name.as_str();
            if !name.is_empty() && !by_name.iter().any(|(n, _)| *n == name) {
                by_name.push((name, token.as_str()));
            }
        }
    }
    if by_name.is_empty() {
        return prompt.to_string();
    }

    let pattern = alternation(by_name.iter().map(|(name, _)| *name).collect());
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return prompt.to_string(),
    };
    re.replace_all(prompt, |caps: &regex::Captures| {
        let name = &caps[0];
        by_name
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, token)| {
                if is_role_token(token) {
                    token.to_string()
                } else {
                    format!("角色：{}", token)
                }
            })
            .unwrap_or_else(|| name.to_string())
    })
    .into_owned()
}

/// 当前分镜引用到的角色参考图，每个占位符一张
pub fn reference_image_urls(
    frame: &ScriptFrame,
    mapping: &CharacterMapping,
    characters: &[Character],
) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for token in extract_placeholders(&frame.original_prompt) {
        let url = resolve(&token, mapping, characters)
            .and_then(|c| c.image_url.as_deref())
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if let Some(url) = url {
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}
