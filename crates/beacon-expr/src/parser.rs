//! Recursive-descent parser
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or         := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := ("!" | "not") unary | comparison
//! comparison := postfix (cmp_op postfix)?
//! cmp_op     := "==" | "!=" | "in" | "not in" | "contains" | "startsWith" | "endsWith"
//! postfix    := primary ("[" string "]" | "." ident | "." method "(" or ")")*
//! primary    := string | number | "true" | "false" | list | "(" or ")" | ident
//! ```

use crate::ast::{BinaryOp, Expr, Literal};
use crate::error::ExprError;
use crate::lexer::{tokenize, Token, TokenKind};

/// Deepest nesting of groups, lists, indexes, negations and `&&`/`||` chains
pub const MAX_DEPTH: usize = 128;

const KEYWORDS: &[&str] = &["in", "not", "and", "or", "contains", "startsWith", "endsWith"];

/// Controls how identifiers are resolved
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Name of the label map variable
    pub binding: String,
    /// Resolve bare identifier paths (`severity_text`, `resource.host.name`) as keys
    pub bare_keys: bool,
}

impl CompileOptions {
    /// Options for store filters, where bare field names are allowed
    pub fn filter() -> Self {
        Self {
            bare_keys: true,
            ..Self::default()
        }
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            binding: "labels".to_string(),
            bare_keys: false,
        }
    }
}

/// A compiled predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Compile a routing expression over `labels`
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        Self::compile_with(source, &CompileOptions::default())
    }

    pub fn compile_with(source: &str, options: &CompileOptions) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        if matches!(tokens.first().map(|t| &t.kind), Some(TokenKind::Eof)) {
            return Err(ExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            options,
        };
        let root = parser.parse_or()?;
        let trailing = parser.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(ExprError::Parse {
                pos: trailing.pos,
                message: format!("unexpected {}", describe(&trailing.kind)),
            });
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.root
    }
}

/// Partially parsed postfix chain
enum Node {
    /// The bare label map variable
    Root,
    /// Dotted identifier path, filter mode only
    Path(String),
    Expr(Expr),
}

impl Node {
    fn into_expr(self, binding: &str) -> Result<Expr, ExprError> {
        match self {
            Node::Root => Err(ExprError::Unsupported(format!(
                "`{}` must be indexed with a key",
                binding
            ))),
            Node::Path(path) => Ok(Expr::Key(path)),
            Node::Expr(e) => Ok(e),
        }
    }
}

struct Parser<'o> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    options: &'o CompileOptions,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // tokenize always appends Eof, so the last token is a safe fallback
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ExprError> {
        let token = self.advance();
        if &token.kind == kind {
            Ok(token)
        } else {
            Err(ExprError::Parse {
                pos: token.pos,
                message: format!("expected {}, found {}", what, describe(&token.kind)),
            })
        }
    }

    fn deepen(&mut self) -> Result<(), ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run a nested rule, failing once nesting passes `MAX_DEPTH`
    fn nested<T>(
        &mut self,
        rule: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        let base = self.depth;
        self.deepen()?;
        let result = rule(self);
        self.depth = base;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::parse_or_chain)
    }

    fn parse_or_chain(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while matches!(self.peek().kind, TokenKind::OrOr) || self.peek().is_word("or") {
            self.advance();
            // chains nest to the left, one level per operand
            self.deepen()?;
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        while matches!(self.peek().kind, TokenKind::AndAnd) || self.peek().is_word("and") {
            self.advance();
            self.deepen()?;
            let right = self.parse_unary()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek().kind, TokenKind::Bang) || self.peek().is_word("not") {
            self.advance();
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_operand()?;

        let (op, width) = match &self.peek().kind {
            TokenKind::EqEq => (BinaryOp::Eq, 1),
            TokenKind::NotEq => (BinaryOp::NotEq, 1),
            TokenKind::Ident(w) if w == "in" => (BinaryOp::In, 1),
            TokenKind::Ident(w) if w == "not" && self.peek_at(1).is_word("in") => {
                (BinaryOp::NotIn, 2)
            }
            TokenKind::Ident(w) if w == "contains" => (BinaryOp::Contains, 1),
            TokenKind::Ident(w) if w == "startsWith" => (BinaryOp::StartsWith, 1),
            TokenKind::Ident(w) if w == "endsWith" => (BinaryOp::EndsWith, 1),
            _ => return Ok(left),
        };
        for _ in 0..width {
            self.advance();
        }

        let right = self.parse_operand()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_operand(&mut self) -> Result<Expr, ExprError> {
        let node = self.parse_postfix()?;
        node.into_expr(&self.options.binding)
    }

    fn parse_postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LBracket => {
                    let open = self.advance();
                    if !matches!(node, Node::Root) {
                        return Err(ExprError::Unsupported(format!(
                            "indexing at offset {} is only supported on `{}`",
                            open.pos, self.options.binding
                        )));
                    }
                    let key = match self.parse_or()? {
                        Expr::Literal(Literal::Str(s)) => s,
                        other => {
                            return Err(ExprError::Unsupported(format!(
                                "label key must be a string literal, found {}",
                                other
                            )))
                        }
                    };
                    self.expect(&TokenKind::RBracket, "']'")?;
                    node = Node::Expr(Expr::Key(key));
                }
                TokenKind::Dot => {
                    self.advance();
                    let name_token = self.advance();
                    let name_pos = name_token.pos;
                    let name = match name_token.kind {
                        TokenKind::Ident(name) => name,
                        other => {
                            return Err(ExprError::Parse {
                                pos: name_pos,
                                message: format!(
                                    "expected identifier after '.', found {}",
                                    describe(&other)
                                ),
                            })
                        }
                    };

                    if matches!(self.peek().kind, TokenKind::LParen) {
                        let receiver = node.into_expr(&self.options.binding)?;
                        node = Node::Expr(self.parse_method(receiver, &name, name_pos)?);
                        continue;
                    }

                    node = match node {
                        Node::Root => Node::Expr(Expr::Key(name)),
                        Node::Path(path) => Node::Path(format!("{}.{}", path, name)),
                        Node::Expr(_) => {
                            return Err(ExprError::Unsupported(format!(
                                "member access '.{}' on a value",
                                name
                            )))
                        }
                    };
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_method(&mut self, receiver: Expr, name: &str, pos: usize) -> Result<Expr, ExprError> {
        let op = match name {
            "contains" => BinaryOp::Contains,
            "startsWith" => BinaryOp::StartsWith,
            "endsWith" => BinaryOp::EndsWith,
            other => {
                return Err(ExprError::Unsupported(format!(
                    "method '{}' at offset {}",
                    other, pos
                )))
            }
        };

        self.expect(&TokenKind::LParen, "'('")?;
        let argument = self.parse_or()?;
        if matches!(self.peek().kind, TokenKind::Comma) {
            return Err(ExprError::Unsupported(format!(
                "method '{}' takes exactly one argument",
                name
            )));
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(Expr::binary(op, receiver, argument))
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Node::Expr(Expr::Literal(Literal::Str(s)))),
            TokenKind::Number(n) => Ok(Node::Expr(Expr::Literal(Literal::Number(n)))),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(Node::Expr(inner))
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek().kind, TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if matches!(self.peek().kind, TokenKind::Comma) {
                            self.advance();
                            if matches!(self.peek().kind, TokenKind::RBracket) {
                                break;
                            }
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Node::Expr(Expr::List(items)))
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(Node::Expr(Expr::Literal(Literal::Bool(true)))),
                "false" => Ok(Node::Expr(Expr::Literal(Literal::Bool(false)))),
                w if w == self.options.binding => Ok(Node::Root),
                w if KEYWORDS.contains(&w) => Err(ExprError::Parse {
                    pos: token.pos,
                    message: format!("unexpected keyword '{}'", w),
                }),
                _ if self.options.bare_keys => Ok(Node::Path(word.clone())),
                w => Err(ExprError::Unsupported(format!("unknown identifier '{}'", w))),
            },
            other => Err(ExprError::Parse {
                pos: token.pos,
                message: format!("expected operand, found {}", describe(&other)),
            }),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(w) => format!("'{}'", w),
        TokenKind::Str(s) => format!("string {:?}", s),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::LBracket => "'['".into(),
        TokenKind::RBracket => "']'".into(),
        TokenKind::LParen => "'('".into(),
        TokenKind::RParen => "')'".into(),
        TokenKind::Comma => "','".into(),
        TokenKind::Dot => "'.'".into(),
        TokenKind::EqEq => "'=='".into(),
        TokenKind::NotEq => "'!='".into(),
        TokenKind::AndAnd => "'&&'".into(),
        TokenKind::OrOr => "'||'".into(),
        TokenKind::Bang => "'!'".into(),
        TokenKind::Eof => "end of expression".into(),
    }
}
