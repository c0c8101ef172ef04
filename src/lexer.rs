use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Literal,
    Comment, // {# ... #}
    Variable, // {{ ... }}
    Tag,     // {% ... %}
}

/// A single lexical unit. `text` is the trimmed inside of the delimiters
/// (empty for comments), or the verbatim run of literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line where the token starts.
    pub line: usize,
}

/// Single-pass tokenizer over the complete template source.
///
/// Yields tokens lazily in document order; after the first error it yields
/// nothing more.
#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    line: usize,
    failed: bool,
}

const DELIMITERS: [&str; 3] = ["{#", "{{", "{%"];

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            line: 1,
            failed: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        let consumed = &self.input[self.cursor..self.cursor + n];
        self.line += consumed.matches('\n').count();
        self.cursor += n;
    }

    pub fn next_token(&mut self) -> Option<Result<Token>> {
        if self.failed {
            return None;
        }
        let rest = self.remaining();
        if rest.is_empty() {
            return None;
        }
        let line = self.line;

        let next_tag = DELIMITERS.iter().filter_map(|d| rest.find(d)).min();
        match next_tag {
            Some(0) => {
                let (kind, close, delimiter) = match &rest[..2] {
                    "{#" => (TokenKind::Comment, "#}", "comment"),
                    "{{" => (TokenKind::Variable, "}}", "variable"),
                    _ => (TokenKind::Tag, "%}", "tag"),
                };
                let Some(end) = rest[2..].find(close) else {
                    self.failed = true;
                    return Some(Err(Error::Tokenize { line, delimiter }));
                };
                // Comment contents are dropped here and never looked at again.
                let text = match kind {
                    TokenKind::Comment => String::new(),
                    _ => rest[2..2 + end].trim().to_string(),
                };
                self.advance(2 + end + close.len());
                Some(Ok(Token { kind, text, line }))
            }
            Some(idx) => {
                let text = rest[..idx].to_string();
                self.advance(idx);
                Some(Ok(Token {
                    kind: TokenKind::Literal,
                    text,
                    line,
                }))
            }
            None => {
                let text = rest.to_string();
                self.advance(rest.len());
                Some(Ok(Token {
                    kind: TokenKind::Literal,
                    text,
                    line,
                }))
            }
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}
