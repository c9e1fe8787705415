use std::borrow::Cow;

/// Text rendered in place of a masked value.
pub const MASK_PLACEHOLDER: &str = "***";

/// Replaces secret values in text before it is emitted anywhere.
#[derive(Debug, Clone, Default)]
pub struct Masker {
    secrets: Vec<String>,
}

impl Masker {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut masker = Self::default();
        for value in values {
            masker.add(value.as_ref());
        }
        masker
    }

    /// Registers a value. Multi-line values also register each of their lines,
    /// since output is masked line by line.
    pub fn add(&mut self, value: &str) {
        self.insert(value);
        if value.contains('\n') {
            for line in value.lines() {
                self.insert(line.trim_end_matches('\r'));
            }
        }
        // longest first: a shorter secret must not split a longer one
        self.secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    fn insert(&mut self, value: &str) {
        if value.trim().is_empty() || self.secrets.iter().any(|s| s == value) {
            return;
        }
        self.secrets.push(value.to_string());
    }

    pub fn merge(&mut self, other: &Masker) {
        for secret in &other.secrets {
            self.add(secret);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn mask<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.secrets.iter().any(|s| text.contains(s.as_str())) {
            return Cow::Borrowed(text);
        }

        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK_PLACEHOLDER);
            }
        }
        Cow::Owned(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_replaces_every_occurrence() {
        let masker = Masker::new(["s3cr3t"]);
        assert_eq!(masker.mask("a s3cr3t b s3cr3t"), "a *** b ***");
    }

    #[test]
    fn test_mask_borrows_when_clean() {
        let masker = Masker::new(["s3cr3t"]);
        assert!(matches!(masker.mask("nothing here"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_longest_value_wins_on_overlap() {
        let masker = Masker::new(["abc", "abcdef"]);
        assert_eq!(masker.mask("xabcdefx"), "x***x");
    }

    #[test]
    fn test_empty_and_blank_values_are_ignored() {
        let masker = Masker::new(["", "   "]);
        assert!(masker.is_empty());
        assert_eq!(masker.mask("a b"), "a b");
    }

    #[test]
    fn test_multiline_value_registers_lines() {
        let masker = Masker::new(["line-one\nline-two"]);
        assert_eq!(masker.mask("got line-two"), "got ***");
        assert_eq!(masker.len(), 3);
    }
}
