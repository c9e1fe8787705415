use super::VarsError;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$")
            .expect("static regex")
    })
}

/// Parses `.env` content into ordered `(name, value)` pairs.
///
/// `path` is only used for error messages.
pub fn parse_dotenv(content: &str, path: &Path) -> Result<Vec<(String, String)>, VarsError> {
    let mut pairs = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let caps = line_regex()
            .captures(line)
            .ok_or_else(|| VarsError::DotEnvParse {
                path: path.to_path_buf(),
                line: index + 1,
                message: "expected NAME=value".to_string(),
            })?;

        let name = caps[1].to_string();
        let value = parse_value(&caps[2]).map_err(|message| VarsError::DotEnvParse {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        })?;
        pairs.push((name, value));
    }

    Ok(pairs)
}

fn parse_value(raw: &str) -> Result<String, String> {
    if let Some(rest) = raw.strip_prefix('\'') {
        let end = rest
            .find('\'')
            .ok_or_else(|| "unterminated single-quoted value".to_string())?;
        return Ok(rest[..end].to_string());
    }

    if let Some(rest) = raw.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return Ok(out),
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                other => out.push(other),
            }
        }
        return Err("unterminated double-quoted value".to_string());
    }

    let value = match raw.find(" #") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    Ok(value.trim().to_string())
}

/// Reads a `.env` file. A missing file yields no variables.
pub fn load_dotenv(path: &Path) -> Result<Vec<(String, String)>, VarsError> {
    if !path.is_file() {
        debug!(path = %path.display(), "No env file found");
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|source| VarsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let pairs = parse_dotenv(&content, path)?;
    debug!(path = %path.display(), count = pairs.len(), "Loaded env file");
    Ok(pairs)
}
