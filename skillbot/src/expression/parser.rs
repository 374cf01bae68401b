// snippet        ::= statement ((";" | newline) statement)* ";"?
//
// statement      ::= target ("=" | "+=" | "-=") expression
//                  | expression
//
// target         ::= identifier ("[" expression "]" | "." identifier)*
//
// expression     ::= or_expr ("if" or_expr "else" expression)?
// or_expr        ::= and_expr (("or" | "||") and_expr)*
// and_expr       ::= not_expr (("and" | "&&") not_expr)*
// not_expr       ::= ("not" | "!") not_expr | comparison
// comparison     ::= additive (comp_op additive)*
// comp_op        ::= "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not" "in" | "is" | "is" "not"
// additive       ::= multiplicative (("+" | "-") multiplicative)*
// multiplicative ::= unary (("*" | "/" | "//" | "%") unary)*
// unary          ::= ("-" | "+") unary | postfix
// postfix        ::= factor ("[" slice "]" | "(" args ")" | "." identifier)*
// factor         ::= number | string | "True" | "False" | "None" | identifier
//                  | "(" expression ")" | "[" list "]" | "{" dict "}"

use super::lexer::{Spanned, Token};
use crate::errors::ExprError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    /// Chained comparison `a < b <= c`.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    Conditional {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Attr(Box<Expr>, String),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Index(Expr),
    Key(String),
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub path: Vec<Accessor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign(Target, AssignOp, Expr),
    Expr(Expr),
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, source_len: usize) -> Self {
        Parser {
            tokens,
            index: 0,
            end: source_len,
        }
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.index).map(|s| &s.token);
        self.index += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.index + ahead).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|s| s.offset)
            .unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(&expected) {
            self.next();
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn parse_statement(&mut self) -> Result<Statement, ExprError> {
        let expr = self.parse_expression()?;
        let op = match self.peek() {
            Some(Token::Assign) => AssignOp::Set,
            Some(Token::AddAssign) => AssignOp::Add,
            Some(Token::SubAssign) => AssignOp::Sub,
            _ => return Ok(Statement::Expr(expr)),
        };
        let rendered = format!("{expr:?}");
        let target = into_target(expr).ok_or(ExprError::InvalidTarget(rendered))?;
        self.next();
        let value = self.parse_expression()?;
        Ok(Statement::Assign(target, op, value))
    }

    fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        let body = self.parse_or()?;
        if let Some(Token::Ident(word)) = self.peek() {
            if word == "if" {
                self.next();
                let test = self.parse_or()?;
                match self.next() {
                    Some(Token::Ident(word)) if word == "else" => {}
                    _ => return Err(self.error("expected 'else'")),
                }
                let orelse = self.parse_expression()?;
                return Ok(Expr::Conditional {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                });
            }
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut ast = self.parse_and()?;
        while let Some(Token::Or) = self.peek() {
            self.next();
            let right = self.parse_and()?;
            ast = Expr::Or(Box::new(ast), Box::new(right));
        }
        Ok(ast)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut ast = self.parse_not()?;
        while let Some(Token::And) = self.peek() {
            self.next();
            let right = self.parse_not()?;
            ast = Expr::And(Box::new(ast), Box::new(right));
        }
        Ok(ast)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if let Some(Token::Not) = self.peek() {
            self.next();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();

        loop {
            let op = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Equal), _) => CompareOp::Eq,
                (Some(Token::NotEqual), _) => CompareOp::NotEq,
                (Some(Token::Less), _) => CompareOp::Lt,
                (Some(Token::LessEqual), _) => CompareOp::LtE,
                (Some(Token::Greater), _) => CompareOp::Gt,
                (Some(Token::GreaterEqual), _) => CompareOp::GtE,
                (Some(Token::In), _) => CompareOp::In,
                (Some(Token::Not), Some(Token::In)) => {
                    self.next();
                    CompareOp::NotIn
                }
                (Some(Token::Is), Some(Token::Not)) => {
                    self.next();
                    CompareOp::IsNot
                }
                (Some(Token::Is), _) => CompareOp::Is,
                _ => break,
            };
            self.next();
            rest.push((op, self.parse_additive()?));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut ast = self.parse_multiplicative()?;
        while let Some(Token::Add | Token::Sub) = self.peek() {
            let op = match self.next() {
                Some(Token::Add) => BinaryOp::Add,
                _ => BinaryOp::Sub,
            };
            let right = self.parse_multiplicative()?;
            ast = Expr::Binary(Box::new(ast), op, Box::new(right));
        }
        Ok(ast)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut ast = self.parse_unary()?;
        while let Some(Token::Mul | Token::Div | Token::FloorDiv | Token::Modulo) = self.peek() {
            let op = match self.next() {
                Some(Token::Mul) => BinaryOp::Mul,
                Some(Token::Div) => BinaryOp::Div,
                Some(Token::FloorDiv) => BinaryOp::FloorDiv,
                _ => BinaryOp::Mod,
            };
            let right = self.parse_unary()?;
            ast = Expr::Binary(Box::new(ast), op, Box::new(right));
        }
        Ok(ast)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Sub) => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(match inner {
                    Expr::Int(n) => Expr::Int(-n),
                    Expr::Float(f) => Expr::Float(-f),
                    other => Expr::Neg(Box::new(other)),
                })
            }
            Some(Token::Add) => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut ast = self.parse_factor()?;

        loop {
            match self.peek() {
                Some(Token::LSquare) => {
                    self.next();
                    ast = self.parse_subscript(ast)?;
                }
                Some(Token::LParen) => {
                    let Expr::Name(name) = ast else {
                        return Err(self.error("only named functions can be called"));
                    };
                    self.next();
                    let args = self.parse_args()?;
                    ast = Expr::Call(name, args);
                }
                Some(Token::Dot) => {
                    self.next();
                    let field = match self.next() {
                        Some(Token::Ident(field)) => field.clone(),
                        _ => return Err(self.error("expected a name after '.'")),
                    };
                    if let Some(Token::LParen) = self.peek() {
                        self.next();
                        let args = self.parse_args()?;
                        ast = Expr::Method(Box::new(ast), field, args);
                    } else {
                        ast = Expr::Attr(Box::new(ast), field);
                    }
                }
                _ => break,
            }
        }

        Ok(ast)
    }

    fn parse_subscript(&mut self, base: Expr) -> Result<Expr, ExprError> {
        let start = if let Some(Token::Colon) = self.peek() {
            None
        } else {
            Some(self.parse_expression()?)
        };

        if let Some(Token::Colon) = self.peek() {
            self.next();
            let stop = if let Some(Token::RSquare) = self.peek() {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            self.expect(Token::RSquare, "']'")?;
            return Ok(Expr::Slice(Box::new(base), start.map(Box::new), stop));
        }

        self.expect(Token::RSquare, "']'")?;
        match start {
            Some(index) => Ok(Expr::Index(Box::new(base), Box::new(index))),
            None => Err(self.error("empty subscript")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            args.push(self.parse_expression()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.next();
                }
                Some(Token::RParen) => {}
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(args)
    }

    fn parse_factor(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        let token = match self.next() {
            Some(token) => token.clone(),
            None => {
                return Err(ExprError::Syntax {
                    offset,
                    message: "unexpected end of expression".into(),
                })
            }
        };

        match token {
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Float(f) => Ok(Expr::Float(f)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::None => Ok(Expr::Null),
            Token::Ident(name) => Ok(Expr::Name(name)),

            Token::LParen => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }

            Token::LSquare => {
                let mut items = Vec::new();
                while self.peek() != Some(&Token::RSquare) {
                    items.push(self.parse_expression()?);
                    match self.peek() {
                        Some(Token::Comma) => {
                            self.next();
                        }
                        Some(Token::RSquare) => {}
                        _ => return Err(self.error("expected ',' or ']'")),
                    }
                }
                self.expect(Token::RSquare, "']'")?;
                Ok(Expr::List(items))
            }

            Token::LBrace => {
                let mut entries = Vec::new();
                while self.peek() != Some(&Token::RBrace) {
                    let key = self.parse_expression()?;
                    self.expect(Token::Colon, "':'")?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    match self.peek() {
                        Some(Token::Comma) => {
                            self.next();
                        }
                        Some(Token::RBrace) => {}
                        _ => return Err(self.error("expected ',' or '}'")),
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                Ok(Expr::Dict(entries))
            }

            other => Err(ExprError::Syntax {
                offset,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}

fn into_target(expr: Expr) -> Option<Target> {
    match expr {
        Expr::Name(name) => Some(Target {
            name,
            path: Vec::new(),
        }),
        Expr::Index(base, index) => {
            let mut target = into_target(*base)?;
            target.path.push(Accessor::Index(*index));
            Some(target)
        }
        Expr::Attr(base, key) => {
            let mut target = into_target(*base)?;
            target.path.push(Accessor::Key(key));
            Some(target)
        }
        _ => None,
    }
}

/// Parse a single expression. Trailing tokens are an error.
pub fn parse_expression(tokens: Vec<Spanned>, source_len: usize) -> Result<Expr, ExprError> {
    let mut parser = Parser::new(tokens, source_len);
    let expr = parser.parse_expression()?;
    while let Some(Token::Semicolon) = parser.peek() {
        parser.next();
    }
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

/// Parse a target such as `data["key"][0]`.
pub fn parse_target(tokens: Vec<Spanned>, source_len: usize) -> Result<Target, ExprError> {
    let expr = parse_expression(tokens, source_len)?;
    let rendered = format!("{expr:?}");
    into_target(expr).ok_or(ExprError::InvalidTarget(rendered))
}

pub fn parse_snippet(tokens: Vec<Spanned>, source_len: usize) -> Result<Vec<Statement>, ExprError> {
    let mut parser = Parser::new(tokens, source_len);
    let mut statements = Vec::new();

    while !parser.at_end() {
        if let Some(Token::Semicolon) = parser.peek() {
            parser.next();
            continue;
        }
        statements.push(parser.parse_statement()?);
        match parser.peek() {
            None | Some(Token::Semicolon) => {}
            Some(_) => return Err(parser.error("expected end of statement")),
        }
    }

    Ok(statements)
}
