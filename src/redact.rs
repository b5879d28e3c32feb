use std::borrow::Cow;

const TOKEN_FIELDS: [&str; 3] = ["access_token", "refresh_token", "password"];

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '~' | '+' | '/' | '=' | '%')
}

/// Byte length of a JSON string body up to, not including, its closing
/// unescaped quote.
fn quoted_value_len(rest: &str) -> usize {
    let mut escaped = false;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return idx,
            _ => escaped = false,
        }
    }
    rest.len()
}

/// Replaces the value following `field` in JSON (`"field": "value"`) and
/// form (`field=value`) encodings.
fn redact_field(text: String, field: &str) -> String {
    if !text.contains(field) {
        return text;
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(field) {
        let end = idx + field.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        // Skip the separator (`"`, `:`, `=` and spaces) as-is.
        let sep_len: usize = rest
            .chars()
            .take_while(|c| matches!(c, '"' | ':' | '=' | ' '))
            .map(char::len_utf8)
            .sum();
        if sep_len == 0 {
            continue;
        }
        let separator = &rest[..sep_len];
        let quoted = separator.contains(':') && separator.ends_with('"');
        out.push_str(separator);
        rest = &rest[sep_len..];

        let consumed = if quoted {
            quoted_value_len(rest)
        } else {
            rest.chars()
                .take_while(|c| is_token_char(*c))
                .map(char::len_utf8)
                .sum()
        };
        if consumed > 0 {
            out.push_str("REDACTED");
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

fn redact_bearer(text: String) -> String {
    const PREFIX: &str = "bearer ";
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, PREFIX) else {
            out.push_str(rest);
            break;
        };
        let end = idx + PREFIX.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        let consumed: usize = rest
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();
        if consumed > 0 {
            out.push_str("REDACTED");
        }
        rest = &rest[consumed..];
    }
    out
}

pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_bearer(input.to_string());
    for field in TOKEN_FIELDS {
        value = redact_field(value, field);
    }

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
