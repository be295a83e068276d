//! A hand-written recursive-descent parser for the path language, in the
//! style of a small hand-rolled JSONPath grammar: character-at-a-time,
//! explicit index cursor, no parser-combinator crate.

use crate::error::ExprError;
use crate::json::{PathArray, PathSegment};

use super::ast::{BinOp, CompiledPath, Expr, Segment, UnOp};

pub fn compile(source: &str) -> Result<CompiledPath, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut p = Parser { chars: &chars, pos: 0 };
    p.skip_ws();
    p.expect_char('$')?;
    let segments = p.parse_segments()?;
    p.skip_ws();
    if p.pos != p.chars.len() {
        return Err(ExprError::Syntax(format!(
            "trailing input at position {} in {source:?}",
            p.pos
        )));
    }
    Ok(CompiledPath {
        source: source.to_string(),
        segments,
    })
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ExprError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            other => Err(ExprError::Syntax(format!(
                "expected '{expected}', found {other:?} at position {}",
                self.pos
            ))),
        }
    }

    fn parse_segments(&mut self) -> Result<Vec<Segment>, ExprError> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        let inner = self.parse_one_dotted_or_bracket_segment()?;
                        out.push(Segment::Recursive(vec![inner]));
                    } else if self.peek() == Some('*') {
                        self.bump();
                        out.push(Segment::Wildcard);
                    } else {
                        let name = self.parse_ident()?;
                        out.push(Segment::Key(name));
                    }
                }
                Some('[') => {
                    out.push(self.parse_bracket_segment()?);
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn parse_one_dotted_or_bracket_segment(&mut self) -> Result<Segment, ExprError> {
        match self.peek() {
            Some('*') => {
                self.bump();
                Ok(Segment::Wildcard)
            }
            Some('[') => self.parse_bracket_segment(),
            _ => {
                let name = self.parse_ident()?;
                Ok(Segment::Key(name))
            }
        }
    }

    fn parse_ident(&mut self) -> Result<String, ExprError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ExprError::Syntax(format!(
                "expected an identifier at position {}",
                self.pos
            )));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_bracket_segment(&mut self) -> Result<Segment, ExprError> {
        self.expect_char('[')?;
        self.skip_ws();
        let segment = if self.peek() == Some('*') {
            self.bump();
            Segment::Wildcard
        } else if self.peek() == Some('?') {
            self.bump();
            self.skip_ws();
            self.expect_char('(')?;
            let expr = self.parse_expr()?;
            self.skip_ws();
            self.expect_char(')')?;
            Segment::Filter(expr)
        } else if self.peek() == Some('(') {
            if self.scan_bracket_content().0 {
                self.parse_expr_slice()?
            } else {
                let expr = self.parse_parenthesized()?;
                Segment::ExprIndex(vec![expr])
            }
        } else if self.peek() == Some('\'') || self.peek() == Some('"') {
            self.parse_key_or_multikey()?
        } else {
            let (is_slice, has_paren) = self.scan_bracket_content();
            if is_slice && has_paren {
                self.parse_expr_slice()?
            } else {
                self.parse_numeric_bracket_content()?
            }
        };
        self.skip_ws();
        self.expect_char(']')?;
        Ok(segment)
    }

    /// Looks ahead from the current position to the matching `]`, reporting
    /// whether the bracket contains a top-level `:` (a slice) and/or a
    /// top-level `(` (a dynamic bound) without consuming anything.
    fn scan_bracket_content(&self) -> (bool, bool) {
        let mut depth = 0i32;
        let mut is_slice = false;
        let mut has_paren = false;
        let mut j = self.pos;
        while let Some(c) = self.chars.get(j) {
            match c {
                '(' => {
                    has_paren = true;
                    depth += 1;
                }
                '[' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                ']' if depth > 0 => depth -= 1,
                ']' => break,
                ':' if depth == 0 => is_slice = true,
                _ => {}
            }
            j += 1;
        }
        (is_slice, has_paren)
    }

    /// A slice whose bounds may mix literal integers and parenthesized
    /// expressions, e.g. `[1:(n-1)]` or `[(a):(b):(c)]`.
    fn parse_expr_slice(&mut self) -> Result<Segment, ExprError> {
        let from = self.parse_slice_bound()?;
        self.skip_ws();
        self.expect_char(':')?;
        let to = self.parse_slice_bound()?;
        self.skip_ws();
        let step = if self.peek() == Some(':') {
            self.bump();
            self.parse_slice_bound()?
        } else {
            None
        };
        Ok(Segment::ExprSlice { from, to, step })
    }

    fn parse_slice_bound(&mut self) -> Result<Option<Expr>, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some(':') | Some(']') => Ok(None),
            Some('(') => Ok(Some(self.parse_parenthesized()?)),
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let i = self.parse_signed_int()?;
                Ok(Some(Expr::Literal(serde_json::json!(i))))
            }
            _ => Ok(None),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, ExprError> {
        let quote = self.bump().ok_or_else(|| ExprError::Syntax("unterminated string".into()))?;
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError::Syntax("unterminated string".into())),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| ExprError::Syntax("unterminated escape".into()))?;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }

    fn parse_key_or_multikey(&mut self) -> Result<Segment, ExprError> {
        let mut keys = vec![self.parse_quoted()?];
        self.skip_ws();
        while self.peek() == Some(',') {
            self.bump();
            self.skip_ws();
            keys.push(self.parse_quoted()?);
            self.skip_ws();
        }
        if keys.len() == 1 {
            Ok(Segment::Key(keys.pop().unwrap()))
        } else {
            Ok(Segment::MultiKey(keys))
        }
    }

    fn parse_signed_int(&mut self) -> Result<isize, ExprError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(ExprError::Syntax(format!(
                "expected an integer at position {}",
                self.pos
            )));
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        s.parse::<isize>()
            .map_err(|_| ExprError::Syntax(format!("invalid integer {s:?}")))
    }

    fn parse_numeric_bracket_content(&mut self) -> Result<Segment, ExprError> {
        // Look ahead for a slice (contains ':') vs union of indices.
        let save = self.pos;
        let is_slice = {
            let mut depth = 0i32;
            let mut found = false;
            let mut j = self.pos;
            while let Some(c) = self.chars.get(j) {
                match c {
                    '[' => depth += 1,
                    ']' if depth == 0 => break,
                    ']' => depth -= 1,
                    ':' if depth == 0 => {
                        found = true;
                        break;
                    }
                    ',' if depth == 0 => break,
                    _ => {}
                }
                j += 1;
            }
            found
        };
        if is_slice {
            self.pos = save;
            return self.parse_slice();
        }
        self.pos = save;
        let mut idxs = vec![self.parse_signed_int()?];
        self.skip_ws();
        while self.peek() == Some(',') {
            self.bump();
            self.skip_ws();
            idxs.push(self.parse_signed_int()?);
            self.skip_ws();
        }
        if idxs.len() == 1 {
            Ok(Segment::Index(idxs[0]))
        } else {
            Ok(Segment::MultiIndex(idxs))
        }
    }

    fn parse_slice(&mut self) -> Result<Segment, ExprError> {
        let from = self.parse_opt_int()?;
        self.skip_ws();
        self.expect_char(':')?;
        self.skip_ws();
        let to = self.parse_opt_int()?;
        self.skip_ws();
        let step = if self.peek() == Some(':') {
            self.bump();
            self.skip_ws();
            self.parse_opt_int()?
        } else {
            None
        };
        Ok(Segment::Slice { from, to, step })
    }

    fn parse_opt_int(&mut self) -> Result<Option<isize>, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == ':' || c == ']' => Ok(None),
            Some(c) if c.is_ascii_digit() || c == '-' => Ok(Some(self.parse_signed_int()?)),
            _ => Ok(None),
        }
    }

    fn parse_parenthesized(&mut self) -> Result<Expr, ExprError> {
        self.expect_char('(')?;
        let e = self.parse_expr()?;
        self.skip_ws();
        self.expect_char(')')?;
        Ok(e)
    }

    // ---- expression grammar ----
    // expr := or
    // or := and ('||' and)*
    // and := cmp ('&&' cmp)*
    // cmp := add (cmp_op add)?
    // add := mul (('+' | '-') mul)*
    // mul := unary (('*' | '/' | '%') unary)*
    // unary := ('!' | '-')? postfix
    // postfix := primary ('[' expr ']')*
    // primary := number | string | bool | null | self-path | '$' path | 'if' '(' expr ',' expr ',' expr ')' | '(' expr ')'

    pub(super) fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('|') && self.peek_at(1) == Some('|') {
                self.pos += 2;
                let rhs = self.parse_and()?;
                lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_cmp()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('&') && self.peek_at(1) == Some('&') {
                self.pos += 2;
                let rhs = self.parse_cmp()?;
                lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_add()?;
        self.skip_ws();
        let op = match (self.peek(), self.peek_at(1)) {
            (Some('='), Some('=')) => Some((BinOp::Eq, 2)),
            (Some('!'), Some('=')) => Some((BinOp::Neq, 2)),
            (Some('<'), Some('=')) => Some((BinOp::Le, 2)),
            (Some('>'), Some('=')) => Some((BinOp::Ge, 2)),
            (Some('<'), _) => Some((BinOp::Lt, 1)),
            (Some('>'), _) => Some((BinOp::Gt, 1)),
            _ => None,
        };
        if let Some((op, len)) = op {
            self.pos += len;
            let rhs = self.parse_add()?;
            Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    fn parse_add(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_mul()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.bump();
                    let rhs = self.parse_mul()?;
                    lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Some('-') => {
                    self.bump();
                    let rhs = self.parse_mul()?;
                    lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Some('/') => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                Some('%') => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mod, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('!') => {
                self.bump();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Some('-') => {
                self.bump();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut e = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('[') {
                self.bump();
                let idx = self.parse_expr()?;
                self.skip_ws();
                self.expect_char(']')?;
                e = Expr::Binary(BinOp::Subscript, Box::new(e), Box::new(idx));
            } else {
                break;
            }
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => self.parse_parenthesized(),
            Some('\'') | Some('"') => {
                let s = self.parse_quoted()?;
                Ok(Expr::Literal(serde_json::Value::String(s)))
            }
            Some(c) if c.is_ascii_digit() || (c == '-' && self.peek_at(1).map_or(false, |d| d.is_ascii_digit())) => {
                self.parse_number_literal()
            }
            Some('@') => {
                self.bump();
                self.parse_self_or_root_path(false)
            }
            Some('$') => {
                self.bump();
                self.parse_self_or_root_path(true)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.parse_ident()?;
                match ident.as_str() {
                    "self" => self.parse_self_or_root_path(false),
                    "true" => Ok(Expr::Literal(serde_json::Value::Bool(true))),
                    "false" => Ok(Expr::Literal(serde_json::Value::Bool(false))),
                    "null" => Ok(Expr::Literal(serde_json::Value::Null)),
                    "if" => {
                        self.skip_ws();
                        self.expect_char('(')?;
                        let cond = self.parse_expr()?;
                        self.skip_ws();
                        self.expect_char(',')?;
                        let then_branch = self.parse_expr()?;
                        self.skip_ws();
                        self.expect_char(',')?;
                        let else_branch = self.parse_expr()?;
                        self.skip_ws();
                        self.expect_char(')')?;
                        Ok(Expr::Conditional(
                            Box::new(cond),
                            Box::new(then_branch),
                            Box::new(else_branch),
                        ))
                    }
                    other => Err(ExprError::Syntax(format!("unknown identifier {other:?}"))),
                }
            }
            other => Err(ExprError::Syntax(format!(
                "unexpected character {other:?} at position {}",
                self.pos
            ))),
        }
    }

    fn parse_number_literal(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        let n: f64 = s
            .parse()
            .map_err(|_| ExprError::Syntax(format!("invalid number {s:?}")))?;
        Ok(Expr::Literal(serde_json::json!(n)))
    }

    /// Parses a chain of `.ident` / `[N]` / `['key']` steps following `@`,
    /// `self`, or `$`, producing an `Expr::Path`.
    fn parse_self_or_root_path(&mut self, absolute: bool) -> Result<Expr, ExprError> {
        let mut segments: PathArray = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    let name = self.parse_ident()?;
                    segments.push(PathSegment::Key(name));
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    if self.peek() == Some('\'') || self.peek() == Some('"') {
                        let k = self.parse_quoted()?;
                        segments.push(PathSegment::Key(k));
                    } else {
                        let i = self.parse_signed_int()?;
                        let idx = if i < 0 { return Err(ExprError::Syntax("negative index in expression path".into())) } else { i as usize };
                        segments.push(PathSegment::Index(idx));
                    }
                    self.skip_ws();
                    self.expect_char(']')?;
                }
                _ => break,
            }
        }
        Ok(Expr::Path { absolute, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_key_path() {
        let p = compile("$.foo.bar").unwrap();
        assert_eq!(p.segments, vec![Segment::Key("foo".into()), Segment::Key("bar".into())]);
    }

    #[test]
    fn compiles_index_and_slice() {
        let p = compile("$.items[2]").unwrap();
        assert_eq!(p.segments, vec![Segment::Key("items".into()), Segment::Index(2)]);
        let p = compile("$.items[1:3]").unwrap();
        assert_eq!(
            p.segments,
            vec![
                Segment::Key("items".into()),
                Segment::Slice { from: Some(1), to: Some(3), step: None }
            ]
        );
    }

    #[test]
    fn compiles_filter() {
        let p = compile("$.items[?(@.price < 10)]").unwrap();
        assert_eq!(p.segments.len(), 2);
        assert!(matches!(p.segments[1], Segment::Filter(_)));
    }

    #[test]
    fn compiles_recursive_descent() {
        let p = compile("$..foo").unwrap();
        assert_eq!(p.segments, vec![Segment::Recursive(vec![Segment::Key("foo".into())])]);
    }

    #[test]
    fn rejects_missing_root() {
        assert!(compile("foo.bar").is_err());
    }

    #[test]
    fn compiles_dynamic_slice_bounds() {
        let p = compile("$.items[1:(5 - 1)]").unwrap();
        assert_eq!(p.segments.len(), 2);
        assert!(matches!(
            p.segments[1],
            Segment::ExprSlice { from: Some(Expr::Literal(_)), to: Some(_), step: None }
        ));
    }

    #[test]
    fn compiles_parenthesized_index_expression() {
        let p = compile("$.items[(1 + 1)]").unwrap();
        assert_eq!(p.segments.len(), 2);
        assert!(matches!(p.segments[1], Segment::ExprIndex(_)));
    }
}
