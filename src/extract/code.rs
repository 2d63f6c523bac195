//! One-time passcode extraction for "quick copy" notifications.
//!
//! Two independent stages, tried in order:
//! 1. [`extract_labelled`]: a cue phrase ("验证码", "code", "OTP", ...)
//!    followed by separators and the code itself.
//! 2. [`extract_proximate`]: a numeric token with a cue phrase somewhere
//!    after it ("123 456 is your verification code").
//!
//! Best effort only. Misses and the occasional false positive are expected,
//! and nothing in here may fail a dispatch: a regex that fails to compile
//! degrades to "no code".

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Regex fragments announcing a one-time code. Extending this list is a data
/// change; the matching logic does not care how many entries it has.
pub const CUE_PHRASES: &[&str] = &[
    r"(?:代|授权|授權|验证|驗證|动态|動態|校验|校驗|确认|確認|激活|安全|认证|認證)[码碼]",
    r"[【\[].[】\]]",
    r"[Vv]erification\s?(?:[Cc]ode)?",
    r"[Pp]ass[Cc]ode",
    r"[Cc][Oo][Dd][Ee]",
    r"(?i:otp)",
    r"动态密码",
    r"一次性密码",
];

/// Broader, case-insensitive gate: does the text talk about a code at all?
const CODE_HINT: &str = r"(?i)(?:回复|reply\s?)?(?:验证码|授权码|校验码|检验码|确认码|激活码|动态码|安全码|(?:验证)?代码|校验代码|检验代码|激活代码|确认代码|动态代码|安全代码|登入码|认证码|识别码|短信口令|动态密码|交易码|上网密码|动态口令|随机码|驗證碼|授權碼|校驗碼|檢驗碼|確認碼|激活碼|動態碼|(?:驗證)?代碼|校驗代碼|檢驗代碼|確認代碼|激活代碼|動態代碼|登入碼|認證碼|識別碼|一次性密码|code|verification|otp|passcode)";

/// Separators allowed between a cue and its code: optional `G-`/`<#>`
/// prefix, up to three of `:` `：` whitespace `是` `为` `is`, and an
/// optional opening bracket.
const LEAD: &str = r"^\s?(?:G-|<#>)?(?:[:：\s是为]|[Ii][Ss]){0,3}[\(（\[【{「]?";

/// An alphanumeric code must not run straight into another cue.
const TRAILING_CUE: &str = r"^(?:[Vv]erification)?[Cc][Oo][Dd][Ee]";

/// Numeric token for the proximity stage: `NNN`, optional space, `N{1,3}`.
const PROXIMATE_TOKEN: &str = r"[0-9]{3}\s?[0-9]{1,3}";

const DIGIT_TOKEN_LEN: (usize, usize) = (4, 7);
const ALNUM_TOKEN_LEN: (usize, usize) = (5, 6);

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| warn!(pattern = name, error = %e, "Code extraction pattern failed to compile"))
        .ok()
}

static CUE_ANCHORED: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile("cue_anchored", &format!("^(?:{})", CUE_PHRASES.join("|"))));
static CUE_ANYWHERE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile("cue", &format!("(?:{})", CUE_PHRASES.join("|"))));
static CODE_HINT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile("code_hint", CODE_HINT));
static LEAD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile("lead", LEAD));
static TRAILING_CUE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile("trailing_cue", TRAILING_CUE));
static PROXIMATE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile("proximate", PROXIMATE_TOKEN));

/// Extract a verification code, trying the labelled stage first.
pub fn extract(text: &str) -> Option<String> {
    extract_labelled(text).or_else(|| extract_proximate(text))
}

/// Whether the text mentions a code at all. Cheap pre-check used before
/// asking a channel for quick-copy.
pub fn mentions_code(text: &str) -> bool {
    CODE_HINT_RE
        .as_ref()
        .is_some_and(|re| re.is_match(text))
}

/// Stage 1: code following a cue phrase.
///
/// When several cues appear the last viable one wins.
pub fn extract_labelled(text: &str) -> Option<String> {
    let cue = CUE_ANCHORED.as_ref()?;
    let lead = LEAD_RE.as_ref()?;

    let starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    for &start in starts.iter().rev() {
        let Some(cue_match) = cue.find(&text[start..]) else {
            continue;
        };
        let after_cue = &text[start + cue_match.end()..];
        let Some(lead_match) = lead.find(after_cue) else {
            continue;
        };
        let rest = &after_cue[lead_match.end()..];
        if let Some(token) = token_at(rest) {
            return Some(token);
        }
    }
    None
}

/// Stage 2: leftmost `NNN[ ]N{1,3}` token with a cue phrase somewhere after it.
pub fn extract_proximate(text: &str) -> Option<String> {
    let token = PROXIMATE_RE.as_ref()?;
    let cue = CUE_ANYWHERE.as_ref()?;

    let found = token.find(text)?;
    if !cue.is_match(&text[found.end()..]) {
        return None;
    }
    let code = found.as_str().trim();
    (!code.is_empty()).then(|| code.to_string())
}

/// Try the code shapes at the start of `rest`, longest first.
fn token_at(rest: &str) -> Option<String> {
    // 4-7 digits, spaces allowed inside (e.g. "88 77").
    let digit_ends = char_ends(rest, DIGIT_TOKEN_LEN.1, |c| {
        c.is_ascii_digit() || c.is_whitespace()
    });
    for len in (DIGIT_TOKEN_LEN.0..=digit_ends.len()).rev() {
        let end = digit_ends[len - 1];
        if ends_at_boundary(&rest[end..]) {
            let code = rest[..end].trim();
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
    }

    // 5-6 alphanumerics (e.g. "AB12C3").
    let alnum_ends = char_ends(rest, ALNUM_TOKEN_LEN.1, |c| c.is_ascii_alphanumeric());
    for len in (ALNUM_TOKEN_LEN.0..=alnum_ends.len()).rev() {
        let end = alnum_ends[len - 1];
        let after = &rest[end..];
        if runs_into_cue(after) || !ends_at_boundary(after) {
            continue;
        }
        return Some(rest[..end].to_string());
    }

    None
}

/// Byte offsets after each of the first `max` chars satisfying `accept`.
fn char_ends(s: &str, max: usize, accept: impl Fn(char) -> bool) -> Vec<usize> {
    s.char_indices()
        .take_while(|(_, c)| accept(*c))
        .take(max)
        .map(|(i, c)| i + c.len_utf8())
        .collect()
}

/// A code ends at end of text or at anything that is not an ASCII
/// letter/digit. Closing brackets are themselves non-alphanumeric.
fn ends_at_boundary(after: &str) -> bool {
    after
        .chars()
        .next()
        .is_none_or(|c| !c.is_ascii_alphanumeric())
}

fn runs_into_cue(after: &str) -> bool {
    after.starts_with(':')
        || TRAILING_CUE_RE
            .as_ref()
            .is_some_and(|re| re.is_match(after))
}
