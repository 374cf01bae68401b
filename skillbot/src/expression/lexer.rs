use crate::errors::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Is,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Assign,
    AddAssign,
    SubAssign,
    LParen,
    RParen,
    LSquare,
    RSquare,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
}

/// A token plus its byte offset in the source, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        offset,
        message: message.into(),
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    let mut depth = 0usize;

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            ' ' | '\t' | '\r' => continue,
            // newlines separate statements unless inside brackets
            '\n' if depth > 0 => continue,
            '\n' | ';' => Token::Semicolon,

            '0'..='9' => {
                let mut text = String::from(c);
                let mut is_float = false;
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '_' {
                        if ch != '_' {
                            text.push(ch);
                        }
                        chars.next();
                    } else if ch == '.' && !is_float {
                        is_float = true;
                        text.push(ch);
                        chars.next();
                    } else if (ch == 'e' || ch == 'E') && !text.contains('e') {
                        is_float = true;
                        text.push('e');
                        chars.next();
                        if let Some(&(_, sign)) = chars.peek() {
                            if sign == '-' || sign == '+' {
                                text.push(sign);
                                chars.next();
                            }
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    Token::Float(
                        text.parse()
                            .map_err(|_| syntax(offset, format!("bad number '{text}'")))?,
                    )
                } else {
                    Token::Int(
                        text.parse()
                            .map_err(|_| syntax(offset, format!("bad number '{text}'")))?,
                    )
                }
            }

            'a'..='z' | 'A'..='Z' | '_' => {
                let mut s = String::from(c);
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match s.as_str() {
                    "True" | "true" => Token::True,
                    "False" | "false" => Token::False,
                    "None" | "null" => Token::None,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "is" => Token::Is,
                    _ => Token::Ident(s),
                }
            }

            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => break,
                        }
                    } else {
                        s.push(ch);
                    }
                }
                if !closed {
                    return Err(syntax(offset, "unterminated string literal"));
                }
                Token::Str(s)
            }

            '+' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::AddAssign
                } else {
                    Token::Add
                }
            }
            '-' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::SubAssign
                } else {
                    Token::Sub
                }
            }
            '*' => Token::Mul,
            '/' => {
                if let Some(&(_, '/')) = chars.peek() {
                    chars.next();
                    Token::FloorDiv
                } else {
                    Token::Div
                }
            }
            '%' => Token::Modulo,
            '=' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::Equal
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::NotEqual
                } else {
                    Token::Not
                }
            }
            '<' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::LessEqual
                } else {
                    Token::Less
                }
            }
            '>' => {
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            '&' => match chars.next() {
                Some((_, '&')) => Token::And,
                _ => return Err(syntax(offset, "expected '&&'")),
            },
            '|' => match chars.next() {
                Some((_, '|')) => Token::Or,
                _ => return Err(syntax(offset, "expected '||'")),
            },
            '(' | '[' | '{' => {
                depth += 1;
                match c {
                    '(' => Token::LParen,
                    '[' => Token::LSquare,
                    _ => Token::LBrace,
                }
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                match c {
                    ')' => Token::RParen,
                    ']' => Token::RSquare,
                    _ => Token::RBrace,
                }
            }
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn words_and_symbols() {
        assert_eq!(
            kinds("not found and x >= 2.5"),
            vec![
                Token::Not,
                Token::Ident("found".into()),
                Token::And,
                Token::Ident("x".into()),
                Token::GreaterEqual,
                Token::Float(2.5),
            ]
        );
    }

    #[test]
    fn c_style_operators_are_aliases() {
        assert_eq!(kinds("!a && b || c"), kinds("not a and b or c"));
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(kinds(r#"'it\'s' "a\nb""#), vec![
            Token::Str("it's".into()),
            Token::Str("a\nb".into())
        ]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(tokenize("'abc"), Err(ExprError::Syntax { offset: 0, .. })));
    }
}
