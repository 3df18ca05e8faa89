//! Secret redaction for persisted command lines

/// Replacement for any sensitive flag value
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_FLAGS: &[&str] = &[
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "pat",
    "api_key",
    "apikey",
    "x_api_key",
    "secret",
    "password",
    "authorization",
    "cookie",
    "credential",
    "private_key",
    "passphrase",
    "client_secret",
    "set_cookie",
];

const HARMLESS_TOKEN_FLAGS: &[&str] = &["token_count", "token_type"];

/// Lowercase and fold `-`, whitespace and camel-case humps into single `_`
fn normalize_flag_name(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    let push_separator = |out: &mut String| {
        if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    };
    for (idx, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            push_separator(&mut out);
        } else if c.is_uppercase() {
            if idx > 0 {
                let prev = chars[idx - 1];
                let next_is_lower = chars.get(idx + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                    push_separator(&mut out);
                }
            }
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out.trim_matches('_').to_string()
}

fn has_segment(normalized: &str, segment: &str) -> bool {
    normalized.split('_').any(|part| part == segment)
}

fn has_segment_pair(normalized: &str, first: &str, second: &str) -> bool {
    let parts: Vec<&str> = normalized.split('_').collect();
    parts.windows(2).any(|pair| pair[0] == first && pair[1] == second)
}

/// Whether a flag name (without leading dashes) carries a secret
pub fn is_sensitive_flag(name: &str) -> bool {
    let normalized = normalize_flag_name(name);
    if normalized.is_empty() {
        return false;
    }
    if SENSITIVE_FLAGS.contains(&normalized.as_str()) {
        return true;
    }
    if HARMLESS_TOKEN_FLAGS.contains(&normalized.as_str()) {
        return false;
    }
    ["secret", "password", "credential", "passphrase"]
        .iter()
        .any(|segment| has_segment(&normalized, segment))
        || has_segment_pair(&normalized, "private", "key")
        || has_segment_pair(&normalized, "api", "key")
        || normalized.contains("access_token")
        || normalized.contains("refresh_token")
        || normalized.ends_with("_token")
}

/// Replace the value of every sensitive `--flag value` / `--flag=value`.
///
/// The argument after a sensitive flag is always treated as its value,
/// even when it starts with `-`.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            redact_next = false;
            out.push(REDACTED.to_string());
            continue;
        }

        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            out.push(arg.clone());
            continue;
        };
        match flag.split_once('=') {
            Some((name, _)) if is_sensitive_flag(name) => {
                out.push(format!("{}={}", &arg[..arg.len() - flag.len() + name.len()], REDACTED));
            }
            Some(_) => out.push(arg.clone()),
            None => {
                redact_next = is_sensitive_flag(flag);
                out.push(arg.clone());
            }
        }
    }
    out
}
