//! 文本内嵌工具调用解析
//!
//! 模型有时不返回结构化 tool_calls，而是把调用批次写进正文：
//!
//! ```text
//! <｜tool▁calls▁begin｜><｜tool▁call▁begin｜>NAME<｜tool▁sep｜>{"k":"v"}<｜tool▁call▁end｜><｜tool▁calls▁end｜>
//! ```
//!
//! 观察到两族标记（全角竖线 `｜` + `▁`，以及 ASCII `|` + `_`），且括号内侧常被插入空格
//! （如 `< | tool_calls_begin | >`）。查找时在精确拼写与有限的空格变体中取最早出现者。

use std::sync::OnceLock;

use regex::Regex;

use crate::tools::value::{args_from_str, ArgMap};
use crate::tools::ToolCall;

/// 一族标记：竖线字符 + 五个标记名
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentinelFamily {
    pub bar: char,
    pub batch_begin: &'static str,
    pub batch_end: &'static str,
    pub call_begin: &'static str,
    pub call_end: &'static str,
    pub sep: &'static str,
}

impl SentinelFamily {
    pub const FULL_WIDTH: SentinelFamily = SentinelFamily {
        bar: '｜',
        batch_begin: "tool▁calls▁begin",
        batch_end: "tool▁calls▁end",
        call_begin: "tool▁call▁begin",
        call_end: "tool▁call▁end",
        sep: "tool▁sep",
    };

    pub const ASCII: SentinelFamily = SentinelFamily {
        bar: '|',
        batch_begin: "tool_calls_begin",
        batch_end: "tool_calls_end",
        call_begin: "tool_call_begin",
        call_end: "tool_call_end",
        sep: "tool_sep",
    };

    pub const ALL: [SentinelFamily; 2] = [SentinelFamily::FULL_WIDTH, SentinelFamily::ASCII];

    fn names(&self) -> [&'static str; 5] {
        [self.batch_begin, self.batch_end, self.call_begin, self.call_end, self.sep]
    }

    /// 规范拼写，如 `<｜tool▁sep｜>`
    pub fn canonical(&self, name: &str) -> String {
        format!("<{bar}{name}{bar}>", bar = self.bar)
    }

    /// 所有容忍的拼写（首项为规范拼写）
    fn variants(&self, name: &str) -> Vec<String> {
        let bar = self.bar;
        let openings = [
            format!("<{bar}"),
            format!("<{bar} "),
            format!("< {bar}"),
            format!("< {bar} "),
        ];
        let closings = [
            format!("{bar}>"),
            format!(" {bar}>"),
            format!("{bar} >"),
            format!(" {bar} >"),
        ];
        let mut out = Vec::with_capacity(openings.len() * closings.len());
        for open in &openings {
            for close in &closings {
                out.push(format!("{open}{name}{close}"));
            }
        }
        out
    }
}

/// 查找最早出现的标记，返回 (起始字节, 结束字节)；同一起点上规范拼写优先
pub fn find_marker(hay: &str, family: &SentinelFamily, name: &str) -> Option<(usize, usize)> {
    family
        .variants(name)
        .iter()
        .filter_map(|v| hay.find(v.as_str()).map(|start| (start, start + v.len())))
        .min_by_key(|(start, _)| *start)
}

/// 文本中是否还残留任何工具调用标记
pub fn contains_markers(text: &str) -> bool {
    SentinelFamily::ALL.iter().any(|family| {
        family
            .names()
            .iter()
            .any(|name| find_marker(text, family, name).is_some())
    })
}

/// 去掉所有残留标记（不属于任何批次的零散标记）
pub fn strip_markers(text: &str) -> String {
    if !contains_markers(text) {
        return text.trim().to_string();
    }
    let mut out = text.to_string();
    for family in &SentinelFamily::ALL {
        for name in family.names() {
            while let Some((start, end)) = find_marker(&out, family, name) {
                out.replace_range(start..end, "");
            }
        }
    }
    out.trim().to_string()
}

/// 一个批次的解析结果
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedBatch {
    pub calls: Vec<ToolCall>,
    /// 去掉整个批次后的正文
    pub stripped: String,
    /// 因分隔符缺失或 JSON 无法修复而跳过的调用数
    pub skipped: usize,
}

/// 提取正文中的第一个调用批次；没有批次起始标记时返回 None
pub fn extract_tool_calls(content: &str) -> Option<ParsedBatch> {
    let (family, (begin_start, begin_end)) = SentinelFamily::ALL
        .iter()
        .filter_map(|f| find_marker(content, f, f.batch_begin).map(|pos| (f, pos)))
        .min_by_key(|(_, (start, _))| *start)?;

    let after_begin = &content[begin_end..];
    // 缺少结束标记时批次延伸到正文末尾
    let (block, rest) = match find_marker(after_begin, family, family.batch_end) {
        Some((end_start, end_end)) => (&after_begin[..end_start], &after_begin[end_end..]),
        None => (after_begin, ""),
    };
    let stripped = format!("{}{}", &content[..begin_start], rest).trim().to_string();

    let mut calls = Vec::new();
    let mut skipped = 0;
    let mut remaining = block;
    while let Some((_, call_begin_end)) = find_marker(remaining, family, family.call_begin) {
        let after = &remaining[call_begin_end..];
        let (body, next) = match find_marker(after, family, family.call_end) {
            Some((call_end_start, call_end_end)) => (&after[..call_end_start], &after[call_end_end..]),
            None => (after, ""),
        };
        remaining = next;

        match parse_call(body, family) {
            Some(call) => calls.push(call),
            None => skipped += 1,
        }
    }

    tracing::debug!(
        calls = calls.len(),
        skipped,
        stripped_len = stripped.len(),
        "text-embedded tool calls extracted"
    );
    Some(ParsedBatch {
        calls,
        stripped,
        skipped,
    })
}

/// 单个调用：`NAME<sep>JSON`，或 DeepSeek 的 `function<sep>NAME\n```json ... ````
fn parse_call(body: &str, family: &SentinelFamily) -> Option<ToolCall> {
    let Some((sep_start, sep_end)) = find_marker(body, family, family.sep) else {
        tracing::warn!("skipping embedded tool call without separator");
        return None;
    };
    let head = body[..sep_start].trim();
    let tail = body[sep_end..].trim();

    let (name, raw_args) = if head == "function" || head.is_empty() {
        match tail.split_once('\n') {
            Some((name, args)) => (name.trim(), args),
            None => (tail, ""),
        }
    } else {
        (head, tail)
    };
    if name.is_empty() {
        tracing::warn!("skipping embedded tool call without name");
        return None;
    }

    let raw_args = strip_code_fence(raw_args);
    let arguments = match parse_args(raw_args) {
        Some(args) => args,
        None => {
            tracing::warn!(tool = %name, raw = %raw_args, "skipping embedded tool call with malformed arguments");
            return None;
        }
    };
    Some(ToolCall::text_embedded(name, arguments))
}

fn parse_args(raw: &str) -> Option<ArgMap> {
    if raw.is_empty() {
        return Some(ArgMap::new());
    }
    match args_from_str(raw) {
        Ok(args) => Some(args),
        Err(first) => {
            static WS: OnceLock<Regex> = OnceLock::new();
            let re = WS.get_or_init(|| Regex::new(r"\s+").unwrap());
            let repaired = re.replace_all(raw, " ");
            match args_from_str(&repaired) {
                Ok(args) => {
                    tracing::debug!("embedded tool arguments parsed after whitespace repair");
                    Some(args)
                }
                Err(second) => {
                    tracing::debug!(%first, %second, "embedded tool arguments unparseable");
                    None
                }
            }
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    // 去掉语言标注行（```json）
    let inner = match inner.split_once('\n') {
        Some((_, body)) => body,
        None => inner,
    };
    inner.trim_end().trim_end_matches("```").trim()
}
