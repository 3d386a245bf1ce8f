//! Tokenizer, AST, and recursive-descent parser for the scoring DSL.
//!
//! The grammar is deliberately closed: arithmetic and comparisons over the
//! single variable `n`, nothing else. Anything outside it is a parse error,
//! so user-authored formulas can never execute arbitrary code.

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Var,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{num}'"))?;
                tokens.push(Token::Num(value));
            }
            'n' => {
                chars.next();
                // Reject identifiers that merely start with 'n' (e.g. "now").
                if let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        return Err(format!("unknown identifier starting at 'n{d}'"));
                    }
                }
                tokens.push(Token::Var);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err("expected '==' (single '=' is not valid)".to_string());
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err("expected '!=' after '!'".to_string());
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err("expected '&&' after '&'".to_string());
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err("expected '||' after '|'".to_string());
                }
            }
            _ if c.is_alphabetic() => {
                return Err(format!("unknown identifier starting at '{c}'"));
            }
            _ => {
                return Err(format!("unexpected character '{c}'"));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Arithmetic expression over the single variable `n`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate at a concrete `n`. Division by zero yields a non-finite
    /// value; the caller is responsible for rejecting it.
    pub fn eval(&self, n: f64) -> f64 {
        match self {
            Expr::Num(v) => *v,
            Expr::Var => n,
            Expr::Neg(e) => -e.eval(n),
            Expr::Add(a, b) => a.eval(n) + b.eval(n),
            Expr::Sub(a, b) => a.eval(n) - b.eval(n),
            Expr::Mul(a, b) => a.eval(n) * b.eval(n),
            Expr::Div(a, b) => a.eval(n) / b.eval(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        }
    }
}

/// Boolean predicate over `n`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Cmp(Expr, CmpOp, Expr),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    pub fn eval(&self, n: f64) -> bool {
        match self {
            Cond::Cmp(a, op, b) => op.apply(a.eval(n), b.eval(n)),
            Cond::And(a, b) => a.eval(n) && b.eval(n),
            Cond::Or(a, b) => a.eval(n) || b.eval(n),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, expected: Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos == self.tokens.len()
    }

    // --- Arithmetic ---

    fn parse_sum(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::Var) => Ok(Expr::Var),
            Some(Token::Minus) => {
                let inner = self.parse_factor()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.parse_sum()?;
                if !self.eat(Token::RParen) {
                    return Err("missing closing ')'".to_string());
                }
                Ok(inner)
            }
            _ => Err("expected a number, 'n', or '('".to_string()),
        }
    }

    // --- Conditions ---

    fn parse_or(&mut self) -> Result<Cond, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Cond::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Cond, String> {
        let mut lhs = self.parse_cmp_or_group()?;
        while self.eat(Token::AndAnd) {
            let rhs = self.parse_cmp_or_group()?;
            lhs = Cond::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// A parenthesized sub-condition or a comparison chain. '(' is ambiguous
    /// between the two ("(n+1)<5" vs "(n<5)"), so try the condition reading
    /// first and backtrack on failure.
    fn parse_cmp_or_group(&mut self) -> Result<Cond, String> {
        if self.peek() == Some(Token::LParen) {
            let saved = self.pos;
            self.pos += 1;
            if let Ok(inner) = self.parse_or() {
                if self.eat(Token::RParen) {
                    return Ok(inner);
                }
            }
            self.pos = saved;
        }
        self.parse_cmp()
    }

    /// One comparison, or a chained double inequality like `5<n<12`, which
    /// normalizes to `(5<n) && (n<12)`.
    fn parse_cmp(&mut self) -> Result<Cond, String> {
        let first = self.parse_sum()?;
        let op = self
            .cmp_op()
            .ok_or_else(|| "expected a comparison operator".to_string())?;
        let second = self.parse_sum()?;
        let mut cond = Cond::Cmp(first, op, second.clone());
        let mut prev = second;

        while let Some(op) = self.cmp_op() {
            let next = self.parse_sum()?;
            let link = Cond::Cmp(prev, op, next.clone());
            cond = Cond::And(Box::new(cond), Box::new(link));
            prev = next;
        }

        Ok(cond)
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek()? {
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::EqEq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }
}

/// Parse a complete arithmetic expression; trailing input is an error.
pub fn parse_expr(input: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(tokenize(input)?);
    let expr = parser.parse_sum()?;
    if !parser.at_end() {
        return Err(format!("unexpected trailing input in '{input}'"));
    }
    Ok(expr)
}

/// Parse a complete boolean condition; trailing input is an error.
pub fn parse_cond(input: &str) -> Result<Cond, String> {
    let mut parser = Parser::new(tokenize(input)?);
    let cond = parser.parse_or()?;
    if !parser.at_end() {
        return Err(format!("unexpected trailing input in '{input}'"));
    }
    Ok(cond)
}
