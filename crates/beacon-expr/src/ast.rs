//! Expression tree

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    List(Vec<Expr>),
    /// Lookup of one label by name
    Key(String),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Label names referenced anywhere in the tree, in first-use order
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Key(k) => {
                if !out.contains(&k.as_str()) {
                    out.push(k);
                }
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_keys(out)),
            Expr::Not(inner) => inner.collect_keys(out),
            Expr::Binary { left, right, .. } => {
                left.collect_keys(out);
                right.collect_keys(out);
            }
            Expr::Literal(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Str(s)) => write!(f, "{:?}", s),
            Expr::Literal(Literal::Number(n)) => write!(f, "{}", n),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{}", b),
            Expr::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Expr::Key(k) => write!(f, "labels[{:?}]", k),
            Expr::Not(inner) => write!(f, "!({})", inner),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
        }
    }
}
