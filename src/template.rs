//! Filename template expansion.
//!
//! Templates are plain strings with `<...>` tokens. Values derive from the
//! file's birth time, original name, extension, and the profile prefix:
//!
//! | token | value |
//! |---|---|
//! | `<date>` | `YYYY-MM-DD` |
//! | `<time>` | `HH-MM-SS` |
//! | `<datetime>` | `<date>_<time>` |
//! | `<original>` | basename without extension |
//! | `<ext>` | lowercased extension, with dot |
//! | `<prefix>` | profile prefix, trimmed, whitespace replaced by `_` |
//! | `<year>` .. `<second>` | zero-padded components |
//! | `<counter>` / `<counter:N>` | zero-padded counter (default width 3) |
//! | `<upper:var>` `<lower:var>` `<slug:var>` | transforms over any token |
//!
//! Unknown tokens pass through literally.

use std::path::Path;

use chrono::{DateTime, Datelike, Local, Timelike};
use regex::Regex;

/// Template used by the built-in profiles and legacy-config migration.
pub const DEFAULT_TEMPLATE: &str = "<prefix>_<datetime>";

/// Inputs for one expansion.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    /// Birth time of the source file, in local time.
    pub birthtime: DateTime<Local>,
    /// Full path of the source file.
    pub original_path: &'a Path,
    /// Extension with leading dot, original casing (may be empty).
    pub ext: &'a str,
    /// Profile prefix, raw.
    pub prefix: &'a str,
    /// Optional counter value for `<counter>` tokens.
    pub counter: Option<u32>,
}

/// Expand a template into a complete output filename.
///
/// When the template mentions `<ext>` the expansion is the final name;
/// otherwise the (lowercased) source extension is appended.
pub fn expand_name(template: &str, ctx: &TemplateContext) -> String {
    let expanded = apply_template(template, ctx);
    if template.contains("<ext>") {
        expanded
    } else {
        format!("{expanded}{}", ctx.ext.to_lowercase())
    }
}

/// Expand every known token in `template`, leaving unknown ones untouched.
pub fn apply_template(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('>') {
            Some(close) => {
                let token = &after_open[..close];
                match expand_token(token, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('<');
                        out.push_str(token);
                        out.push('>');
                    }
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Unbalanced '<': keep the remainder literally.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_token(token: &str, ctx: &TemplateContext) -> Option<String> {
    if let Some((head, tail)) = token.split_once(':') {
        return match head {
            "counter" => {
                let width: usize = tail.parse().ok()?;
                Some(format!("{:0width$}", ctx.counter.unwrap_or(1)))
            }
            "upper" => expand_token(tail, ctx).map(|v| v.to_uppercase()),
            "lower" => expand_token(tail, ctx).map(|v| v.to_lowercase()),
            "slug" => expand_token(tail, ctx).map(|v| slugify(&v)),
            _ => None,
        };
    }

    let t = ctx.birthtime;
    match token {
        "date" => Some(format!("{:04}-{:02}-{:02}", t.year(), t.month(), t.day())),
        "time" => Some(format!(
            "{:02}-{:02}-{:02}",
            t.hour(),
            t.minute(),
            t.second()
        )),
        "datetime" => Some(format!(
            "{:04}-{:02}-{:02}_{:02}-{:02}-{:02}",
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second()
        )),
        "original" => Some(
            ctx.original_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        "ext" => Some(ctx.ext.to_lowercase()),
        "prefix" => Some(sanitize_prefix(ctx.prefix)),
        "year" => Some(format!("{:04}", t.year())),
        "month" => Some(format!("{:02}", t.month())),
        "day" => Some(format!("{:02}", t.day())),
        "hour" => Some(format!("{:02}", t.hour())),
        "minute" => Some(format!("{:02}", t.minute())),
        "second" => Some(format!("{:02}", t.second())),
        "counter" => Some(format!("{:03}", ctx.counter.unwrap_or(1))),
        _ => None,
    }
}

/// Trim the prefix and replace every whitespace character with `_`.
pub fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn slugify(value: &str) -> String {
    let mapped: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// True when `basename` already has the canonical
/// `{prefix}_{YYYY-MM-DD}_{HH-MM-SS}[_N].{ext}` shape for `prefix`.
///
/// Used for idempotence: files named by a previous run are skipped instead
/// of being renamed again.
pub fn matches_default_format(basename: &str, prefix: &str) -> bool {
    let sanitized = sanitize_prefix(prefix);
    let pattern = format!(
        r"^{}_\d{{4}}-\d{{2}}-\d{{2}}_\d{{2}}-\d{{2}}-\d{{2}}(?:_\d+)?\.[^.]+$",
        regex::escape(&sanitized)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(basename))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    fn ctx_at<'a>(path: &'a Path, ext: &'a str, prefix: &'a str) -> TemplateContext<'a> {
        TemplateContext {
            birthtime: Local.with_ymd_and_hms(2025, 10, 30, 9, 0, 0).unwrap(),
            original_path: path,
            ext,
            prefix,
            counter: None,
        }
    }

    #[test]
    fn test_default_template_expansion() {
        let path = Path::new("/shots/Screenshot 2025-10-30 at 09.00.00.png");
        let ctx = ctx_at(path, ".png", "Screenshot");
        assert_eq!(
            expand_name(DEFAULT_TEMPLATE, &ctx),
            "Screenshot_2025-10-30_09-00-00.png"
        );
    }

    #[test]
    fn test_ext_token_suppresses_appending() {
        let path = Path::new("/shots/IMG.HEIC");
        let ctx = ctx_at(path, ".HEIC", "Photo");
        assert_eq!(expand_name("<prefix>_<date><ext>", &ctx), "Photo_2025-10-30.heic");
    }

    #[test]
    fn test_component_tokens() {
        let path = Path::new("/x/a.png");
        let ctx = ctx_at(path, ".png", "p");
        assert_eq!(
            apply_template("<year>/<month>/<day> <hour>:<minute>:<second>", &ctx),
            "2025/10/30 09:00:00"
        );
    }

    #[test]
    fn test_unknown_token_passes_through() {
        let path = Path::new("/x/a.png");
        let ctx = ctx_at(path, ".png", "p");
        assert_eq!(apply_template("<nope>_<date>", &ctx), "<nope>_2025-10-30");
    }

    #[test]
    fn test_unbalanced_bracket_kept_literal() {
        let path = Path::new("/x/a.png");
        let ctx = ctx_at(path, ".png", "p");
        assert_eq!(apply_template("<date>_<oops", &ctx), "2025-10-30_<oops");
    }

    #[test]
    fn test_counter_padding() {
        let path = Path::new("/x/a.png");
        let mut ctx = ctx_at(path, ".png", "p");
        ctx.counter = Some(7);
        assert_eq!(apply_template("<counter>", &ctx), "007");
        assert_eq!(apply_template("<counter:5>", &ctx), "00007");
        ctx.counter = None;
        assert_eq!(apply_template("<counter>", &ctx), "001");
    }

    #[test]
    fn test_transforms() {
        let path = Path::new("/x/My Photo Set.png");
        let ctx = ctx_at(path, ".png", "  Screen Shot ");
        assert_eq!(apply_template("<prefix>", &ctx), "Screen_Shot");
        assert_eq!(apply_template("<upper:prefix>", &ctx), "SCREEN_SHOT");
        assert_eq!(apply_template("<slug:original>", &ctx), "my-photo-set");
        assert_eq!(apply_template("<lower:original>", &ctx), "my photo set");
        // Unknown inner token keeps the whole token literal
        assert_eq!(apply_template("<upper:bogus>", &ctx), "<upper:bogus>");
    }

    #[test]
    fn test_matches_default_format() {
        assert!(matches_default_format(
            "Screenshot_2025-10-30_09-00-00.png",
            "Screenshot"
        ));
        assert!(matches_default_format(
            "Screenshot_2025-10-30_09-00-00_2.png",
            "Screenshot"
        ));
        assert!(matches_default_format(
            "Screen_Recording_2025-01-02_10-11-12.mov",
            "Screen Recording"
        ));
        assert!(!matches_default_format(
            "Screenshot 2025-10-30 at 09.00.00.png",
            "Screenshot"
        ));
        assert!(!matches_default_format(
            "Other_2025-10-30_09-00-00.png",
            "Screenshot"
        ));
    }
}
