//! `$NAME` / `${NAME}` expansion.
//!
//! Supported forms: `$NAME`, `${NAME}`, `${NAME:-default}` (unset or empty),
//! `${NAME-default}` (unset only) and `$$` for a literal dollar sign. Unknown
//! names expand to the empty string.

enum Token<'a> {
    Literal(&'a str),
    Dollar,
    Reference {
        name: &'a str,
        default: Option<Fallback<'a>>,
    },
}

struct Fallback<'a> {
    text: &'a str,
    when_empty: bool,
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let bytes = template.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' || i + 1 >= bytes.len() {
            i += 1;
            continue;
        }

        let next = bytes[i + 1];
        if next == b'$' {
            push_literal(&mut tokens, &template[literal_start..i]);
            tokens.push(Token::Dollar);
            i += 2;
            literal_start = i;
        } else if is_name_start(next) {
            push_literal(&mut tokens, &template[literal_start..i]);
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_name_char(bytes[end]) {
                end += 1;
            }
            tokens.push(Token::Reference {
                name: &template[start..end],
                default: None,
            });
            i = end;
            literal_start = i;
        } else if next == b'{' {
            let Some(close) = matching_brace(bytes, i + 1) else {
                i += 1;
                continue;
            };
            let body = &template[i + 2..close];
            let Some(token) = parse_braced(body) else {
                i += 1;
                continue;
            };
            push_literal(&mut tokens, &template[literal_start..i]);
            tokens.push(token);
            i = close + 1;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    push_literal(&mut tokens, &template[literal_start..]);
    tokens
}

fn push_literal<'a>(tokens: &mut Vec<Token<'a>>, text: &'a str) {
    if !text.is_empty() {
        tokens.push(Token::Literal(text));
    }
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, &b) in bytes[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_braced(body: &str) -> Option<Token<'_>> {
    let bytes = body.as_bytes();
    if bytes.is_empty() || !is_name_start(bytes[0]) {
        return None;
    }
    let mut end = 1;
    while end < bytes.len() && is_name_char(bytes[end]) {
        end += 1;
    }
    let name = &body[..end];
    let rest = &body[end..];

    let default = if rest.is_empty() {
        None
    } else if let Some(text) = rest.strip_prefix(":-") {
        Some(Fallback {
            text,
            when_empty: true,
        })
    } else if let Some(text) = rest.strip_prefix('-') {
        Some(Fallback {
            text,
            when_empty: false,
        })
    } else {
        return None;
    };

    Some(Token::Reference { name, default })
}

/// Expands every reference in `template` through `lookup`.
///
/// `lookup` returns `Ok(None)` for names that are not defined; it may fail,
/// which is how callers detect reference cycles.
pub fn expand<F, E>(template: &str, lookup: &mut F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<Option<String>, E>,
{
    let mut out = String::with_capacity(template.len());

    for token in tokenize(template) {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Dollar => out.push('$'),
            Token::Reference { name, default } => {
                let value = lookup(name)?;
                match (value, default) {
                    (Some(v), Some(d)) if d.when_empty && v.is_empty() => {
                        out.push_str(&expand(d.text, lookup)?);
                    }
                    (Some(v), _) => out.push_str(&v),
                    (None, Some(d)) => out.push_str(&expand(d.text, lookup)?),
                    (None, None) => {}
                }
            }
        }
    }

    Ok(out)
}

/// Names referenced by `template`, including those inside defaults.
pub fn references(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    collect_references(template, &mut names);
    names
}

fn collect_references(template: &str, names: &mut Vec<String>) {
    for token in tokenize(template) {
        if let Token::Reference { name, default } = token {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            if let Some(d) = default {
                collect_references(d.text, names);
            }
        }
    }
}
