use super::characters::seed_mapping;
use super::{Character, CharacterMapping, ScriptFrame};
use tracing::{debug, info};

/// 表头关键字（小写比较）
const HEADER_KEYWORDS: &[&str] = &["序号", "分镜", "scene", "描述", "prompt", "内容"];

fn normalize_newlines(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// 宽松的整数解析：可选符号加前导数字，后面的字符忽略（"12号" -> 12）
fn parse_sequence(field: &str) -> Option<i64> {
    let field = field.trim();
    let (sign, digits) = match field.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, field.strip_prefix('+').unwrap_or(field)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

fn is_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    if HEADER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    let first = line.split(',').next().unwrap_or("");
    !first.is_empty() && parse_sequence(first).is_none()
}

/// 读取引号字段，返回 (内容, 最后消耗的物理行下标)
fn read_quoted(lines: &[&str], start: usize, first_rest: &str) -> (String, usize) {
    let mut prompt = String::new();
    let mut line_idx = start;
    let mut remaining: &str = first_rest;

    loop {
        let mut chars = remaining.chars().peekable();
        let mut closed = false;
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    prompt.push('"');
                    chars.next();
                } else {
                    // 引号后的内容丢弃
                    closed = true;
                    break;
                }
            } else {
                prompt.push(c);
            }
        }

        if closed || line_idx + 1 >= lines.len() {
            return (prompt, line_idx);
        }
        prompt.push('\n');
        line_idx += 1;
        remaining = lines[line_idx];
    }
}

/// 将 CSV 脚本解析为分镜列表，并根据已有角色生成初始映射。
///
/// 解析是尽力而为的：序号无法解析的行会被跳过，不会返回错误。
pub fn parse(raw: &str, existing_characters: &[Character]) -> (Vec<ScriptFrame>, CharacterMapping) {
    let content = normalize_newlines(raw);
    let lines: Vec<&str> = content.split('\n').collect();

    let mut index = 0;
    if lines.first().map(|l| is_header(l)).unwrap_or(false) {
        debug!("Skipping header row: {}", lines[0]);
        index = 1;
    }

    let mut frames = Vec::new();
    let mut skipped = 0usize;
    while index < lines.len() {
        let line = lines[index];
        if line.trim().is_empty() {
            index += 1;
            continue;
        }

        let Some(comma) = line.find(',') else {
            skipped += 1;
            index += 1;
            continue;
        };
        let Some(frame_number) = parse_sequence(&line[..comma]) else {
            skipped += 1;
            index += 1;
            continue;
        };

        let rest = &line[comma + 1..];
        let trimmed = rest.trim();
        let (prompt, last_line) = match trimmed.strip_prefix('"') {
            Some(quoted) => read_quoted(&lines, index, quoted),
            None => (trimmed.to_string(), index),
        };

        frames.push(ScriptFrame::new(frame_number, prompt.trim().to_string()));
        index = last_line + 1;
    }

    if skipped > 0 {
        debug!("Skipped {} malformed script lines", skipped);
    }

    let mapping = seed_mapping(&frames, existing_characters);
    info!(
        "Parsed {} frames, {} characters auto-mapped",
        frames.len(),
        mapping.len()
    );
    (frames, mapping)
}

/// 上传前的格式检查：至少一行包含逗号的数据行
pub fn validate_script(content: &str) -> bool {
    let content = normalize_newlines(content);
    let lines: Vec<&str> = content
        .trim()
        .split('\n')
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return false;
    }

    let start = if is_header(lines[0]) { 1 } else { 0 };
    lines[start..].iter().any(|l| l.contains(','))
}
