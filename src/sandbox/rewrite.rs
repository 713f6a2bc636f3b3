//! 代码预处理：提取代码块、为开放式方法调用补上旁路参数

use std::sync::OnceLock;

use regex::Regex;

/// 追加到开放式方法调用末尾的脚本变量
pub const SIDE_CHANNEL_ARGS: &str = "object_cache, initial_query, api_session";
/// 旁路参数个数
pub const SIDE_CHANNEL_ARITY: usize = 3;

static FENCE: OnceLock<Regex> = OnceLock::new();

/// 从模型回复中取出代码：优先 ```rhai 代码块，其次任意代码块，否则原文
pub fn extract_code(reply: &str) -> String {
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\n(.*?)```")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    });
    let mut fallback = None;
    for caps in fence.captures_iter(reply) {
        let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if lang.eq_ignore_ascii_case("rhai") {
            return body.trim().to_string();
        }
        if fallback.is_none() {
            fallback = Some(body.trim().to_string());
        }
    }
    fallback.unwrap_or_else(|| reply.trim().to_string())
}

/// 为 `methods` 中每个方法的调用补上旁路参数；参数列表按括号配对截取，跳过字符串字面量
pub fn inject_side_channel(code: &str, methods: &[&str]) -> String {
    let mut out = code.to_string();
    for method in methods {
        let pattern = format!(r"\b{}\s*\(", regex::escape(method));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let mut rewritten = String::with_capacity(out.len());
        let mut cursor = 0;
        for m in re.find_iter(&out) {
            if m.start() < cursor {
                continue;
            }
            let Some(close) = closing_paren(&out, m.end()) else {
                continue;
            };
            // 参数里嵌套的同名调用也要补
            let inner = inject_side_channel(&out[m.end()..close], &[method]);
            let args = inner.trim();
            rewritten.push_str(&out[cursor..m.end()]);
            if args.ends_with("api_session") {
                rewritten.push_str(&inner);
            } else if args.is_empty() {
                rewritten.push_str(SIDE_CHANNEL_ARGS);
            } else {
                rewritten.push_str(args);
                rewritten.push_str(", ");
                rewritten.push_str(SIDE_CHANNEL_ARGS);
            }
            rewritten.push(')');
            cursor = close + 1;
        }
        rewritten.push_str(&out[cursor..]);
        out = rewritten;
    }
    out
}

/// `open_end` 处于左括号之后；返回与之配对的右括号位置
fn closing_paren(code: &str, open_end: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in code[open_end..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '`' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_end + i);
                }
            }
            _ => {}
        }
    }
    None
}
