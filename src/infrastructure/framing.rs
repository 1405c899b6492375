//! BC 输出分帧
//!
//! BC 按行输出结果；超长结果会以 `\` + 换行折行。这里把增量读到的文本
//! 拼回完整行，并取出最后一个非空行作为本次请求的结果。

/// 从缓冲区中取出已完成的行，返回其中最后一个非空行（已 trim）
///
/// 未以换行结尾的残余部分留在缓冲区中，等待下一次读取。
pub fn take_result_line(buffer: &mut String) -> Option<String> {
    join_continuations(buffer);

    let last_newline = buffer.rfind('\n')?;
    let rest = buffer.split_off(last_newline + 1);
    let complete = std::mem::replace(buffer, rest);

    complete
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

/// 合并 BC 的续行符（`\` 紧跟换行）
fn join_continuations(buffer: &mut String) {
    if buffer.contains("\\\n") {
        *buffer = buffer.replace("\\\n", "");
    }
    if buffer.contains("\\\r\n") {
        *buffer = buffer.replace("\\\r\n", "");
    }
}
