//! Line-tracked tokenizer for the schema definition language.
//!
//! Produces a flat token stream plus a map of attachable comments keyed by
//! the line each comment run ends on. Doc comments are `///` line runs and
//! `/** ... */` blocks; with `alternate_comment_mode` every comment is
//! attachable.

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::util::quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// The tokenizer's output: tokens terminated by an EOF sentinel, and doc
/// comments keyed by their final line.
#[derive(Debug)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    pub comments: HashMap<usize, String>,
}

impl Tokenized {
    /// The comment attachable to a declaration starting on `line`, i.e. a
    /// comment run ending on the previous line.
    pub fn comment_for(&self, line: usize) -> Option<&str> {
        self.comments.get(&line.wrapping_sub(1)).map(|s| s.as_str())
    }
}

fn err(msg: String, line: usize, column: usize) -> SchemaError {
    SchemaError::Parse { msg, line, column }
}

pub fn tokenize(text: &str, alternate_comment_mode: bool) -> Result<Tokenized, SchemaError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut comments: HashMap<usize, String> = HashMap::new();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    let mut push_comment = |comments: &mut HashMap<usize, String>, end_line: usize, text: String| {
        // A run of consecutive comment lines collapses into one entry keyed
        // by the line the run ends on.
        if end_line > 0 {
            if let Some(previous) = comments.remove(&(end_line - 1)) {
                comments.insert(end_line, format!("{}\n{}", previous, text));
                return;
            }
        }
        comments.insert(end_line, text);
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                i += 1;
                line += 1;
                column = 1;
            }
            c if c.is_whitespace() => {
                i += 1;
                column += 1;
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '/' => {
                let mut j = i + 2;
                let doc = alternate_comment_mode || (j < chars.len() && chars[j] == '/');
                while doc && j < chars.len() && chars[j] == '/' {
                    j += 1;
                }
                let start = j;
                while j < chars.len() && chars[j] != '\n' {
                    j += 1;
                }
                if doc {
                    let body: String = chars[start..j].iter().collect();
                    push_comment(&mut comments, line, body.trim().to_owned());
                }
                i = j;
                column = 1;
            }
            '/' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                let doc = alternate_comment_mode || (i + 2 < chars.len() && chars[i + 2] == '*');
                let start_line = line;
                let mut j = i + 2 + if doc && !alternate_comment_mode { 1 } else { 0 };
                let body_start = j;
                let mut closed = false;
                while j < chars.len() {
                    if chars[j] == '*' && j + 1 < chars.len() && chars[j + 1] == '/' {
                        closed = true;
                        break;
                    }
                    if chars[j] == '\n' {
                        line += 1;
                        column = 1;
                    }
                    j += 1;
                }
                if !closed {
                    return Err(err("unterminated block comment".to_owned(), start_line, column));
                }
                if doc {
                    let body: String = chars[body_start..j].iter().collect();
                    let cleaned: Vec<String> = body
                        .lines()
                        .map(|l| l.trim().trim_start_matches('*').trim().to_owned())
                        .filter(|l| !l.is_empty())
                        .collect();
                    push_comment(&mut comments, line, cleaned.join("\n"));
                }
                i = j + 2;
                column += 2;
            }
            '"' | '\'' => {
                let delim = c;
                let start_line = line;
                let start_column = column;
                let mut j = i + 1;
                let mut value = String::new();
                loop {
                    if j >= chars.len() || chars[j] == '\n' {
                        return Err(err(
                            "unterminated string literal".to_owned(),
                            start_line,
                            start_column,
                        ));
                    }
                    let sc = chars[j];
                    if sc == delim {
                        j += 1;
                        break;
                    }
                    if sc == '\\' {
                        if j + 1 >= chars.len() {
                            return Err(err(
                                "unterminated string literal".to_owned(),
                                start_line,
                                start_column,
                            ));
                        }
                        value.push(match chars[j + 1] {
                            '0' => '\0',
                            'r' => '\r',
                            'n' => '\n',
                            't' => '\t',
                            // Unrecognized escapes pass the character through.
                            other => other,
                        });
                        j += 2;
                    } else {
                        value.push(sc);
                        j += 1;
                    }
                }
                column += j - i;
                i = j;
                tokens.push(Token {
                    text: value,
                    kind: TokenKind::Str,
                    line: start_line,
                    column: start_column,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let start_column = column;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                column += j - i;
                i = j;
                tokens.push(Token {
                    text: chars[start..j].iter().collect(),
                    kind: TokenKind::Ident,
                    line,
                    column: start_column,
                });
            }
            c if c.is_ascii_digit()
                || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) =>
            {
                let start = i;
                let start_column = column;
                let mut j = i;
                while j < chars.len() {
                    let nc = chars[j];
                    let part_of_number = nc.is_ascii_alphanumeric()
                        || nc == '.'
                        || ((nc == '+' || nc == '-')
                            && j > start
                            && matches!(chars[j - 1], 'e' | 'E'));
                    if !part_of_number {
                        break;
                    }
                    j += 1;
                }
                column += j - i;
                i = j;
                tokens.push(Token {
                    text: chars[start..j].iter().collect(),
                    kind: TokenKind::Number,
                    line,
                    column: start_column,
                });
            }
            ';' | ',' | '{' | '}' | '(' | ')' | '[' | ']' | '<' | '>' | '=' | '.' | '-' | '+'
            | ':' => {
                tokens.push(Token {
                    text: c.to_string(),
                    kind: TokenKind::Punct,
                    line,
                    column,
                });
                i += 1;
                column += 1;
            }
            other => {
                return Err(err(
                    format!("unexpected character {}", quote(&other.to_string())),
                    line,
                    column,
                ))
            }
        }
    }

    tokens.push(Token {
        text: String::new(),
        kind: TokenKind::Eof,
        line,
        column,
    });
    Ok(Tokenized { tokens, comments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        tokenize(input, false)
            .unwrap()
            .tokens
            .iter()
            .map(|t| t.text.clone())
            .collect()
    }

    #[test]
    fn tokenize_simple() {
        assert_eq!(
            texts("int32 x = 10;"),
            vec!["int32", "x", "=", "10", ";", ""]
        );
    }

    #[test]
    fn tokenize_tracks_lines() {
        let out = tokenize("a\nb\n  c", false).unwrap();
        assert_eq!(out.tokens[0].line, 1);
        assert_eq!(out.tokens[1].line, 2);
        assert_eq!(out.tokens[2].line, 3);
        assert_eq!(out.tokens[2].column, 3);
    }

    #[test]
    fn tokenize_strings() {
        let out = tokenize(r#"option name = "a\nb\q";"#, false).unwrap();
        let string_tok = out
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::Str)
            .unwrap();
        // \n decodes, the unrecognized \q passes q through.
        assert_eq!(string_tok.text, "a\nbq");
    }

    #[test]
    fn tokenize_single_quotes() {
        let out = tokenize("import 'other.proto';", false).unwrap();
        assert_eq!(out.tokens[1].text, "other.proto");
        assert_eq!(out.tokens[1].kind, TokenKind::Str);
    }

    #[test]
    fn tokenize_unterminated_string() {
        assert!(matches!(
            tokenize("option a = \"oops", false),
            Err(SchemaError::Parse { .. })
        ));
        assert!(matches!(
            tokenize("option a = \"oops\nnext\"", false),
            Err(SchemaError::Parse { .. })
        ));
    }

    #[test]
    fn tokenize_numbers() {
        assert_eq!(
            texts("1 0x1F 052 1.5 1e10 1.5e-3 -7"),
            vec!["1", "0x1F", "052", "1.5", "1e10", "1.5e-3", "-", "7", ""]
        );
    }

    #[test]
    fn plain_comments_are_dropped() {
        let out = tokenize("// plain\nmessage M {}", false).unwrap();
        assert!(out.comments.is_empty());
        assert_eq!(out.tokens[0].text, "message");
        assert_eq!(out.tokens[0].line, 2);
    }

    #[test]
    fn doc_comments_attach_to_next_line() {
        let out = tokenize("/// Greets.\nmessage M {}", false).unwrap();
        assert_eq!(out.comment_for(2), Some("Greets."));
    }

    #[test]
    fn doc_comment_runs_collapse() {
        let out = tokenize("/// one\n/// two\nmessage M {}", false).unwrap();
        assert_eq!(out.comment_for(3), Some("one\ntwo"));
    }

    #[test]
    fn block_doc_comments() {
        let out = tokenize("/**\n * Greets.\n */\nmessage M {}", false).unwrap();
        assert_eq!(out.comment_for(4), Some("Greets."));
    }

    #[test]
    fn alternate_mode_attaches_plain_comments() {
        let out = tokenize("// plain\nmessage M {}", true).unwrap();
        assert_eq!(out.comment_for(2), Some("plain"));
    }

    #[test]
    fn unexpected_character() {
        match tokenize("message M { @ }", false) {
            Err(SchemaError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
