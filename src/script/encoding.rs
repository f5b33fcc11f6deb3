use tracing::{debug, warn};

/// 解码上传的脚本文件：优先 UTF-8，出现乱码时尝试 GB18030（兼容 GBK/GB2312）
pub fn decode_script_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let (utf8, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        debug!("Script decoded as UTF-8");
        return utf8.into_owned();
    }

    let (gb, _, gb_errors) = encoding_rs::GB18030.decode(bytes);
    if !gb_errors {
        debug!("Script decoded as GB18030");
        return gb.into_owned();
    }

    warn!("Script encoding not recognised, using lossy UTF-8");
    utf8.into_owned()
}
