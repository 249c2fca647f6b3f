//! Parser for the request subset the enforcement layer needs to see
//!
//! Queries: `{ name(func: f(pred, ...), orderasc: p, first: n) @filter(...)
//! @groupby(p) { fields } }` and `schema {}`. Mutations: one N-Quad per line.
//! Schema alters: one `pred: definition .` statement per line.

use crate::error::{AclError, Result};
use crate::request::{Field, Filter, Func, NQuad, Order, Query, QueryBlock, Request, SchemaQuery, SchemaUpdate};
use crate::reserved::normalize_schema;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    At,
    Ident(String),
    Str(String),
}

/// Deepest accepted nesting of filters, selections and argument lists
pub const MAX_DEPTH: usize = 64;

fn invalid(msg: impl Into<String>) -> AclError {
    AclError::InvalidRequest(msg.into())
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || "_.~-*/$+".contains(c)
}

fn tokenize(text: &str) -> Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(c) = chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ',' | ':' | '@' => {
                chars.next();
                toks.push(match c {
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    ',' => Tok::Comma,
                    ':' => Tok::Colon,
                    _ => Tok::At,
                });
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(e) => s.push(e),
                            None => return Err(invalid("unterminated string literal")),
                        },
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(invalid("unterminated string literal")),
                    }
                }
                toks.push(Tok::Str(s));
            }
            '<' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('>') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(invalid("unterminated <predicate>")),
                    }
                }
                toks.push(Tok::Ident(s));
            }
            c if is_ident_char(c) => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if !is_ident_char(ch) {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                toks.push(Tok::Ident(s));
            }
            other => return Err(invalid(format!("unexpected character {other:?}"))),
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(toks: Vec<Tok>) -> Self {
        Parser { toks, pos: 0, depth: 0 }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(invalid("query nesting too deep"));
        }
        self.depth += 1;
        let r = f(self);
        self.depth -= 1;
        r
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.toks.get(self.pos + n)
    }

    fn next(&mut self) -> Result<Tok> {
        let t = self.toks.get(self.pos).cloned().ok_or_else(|| invalid("unexpected end of input"))?;
        self.pos += 1;
        Ok(t)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        match self.next()? {
            t if t == tok => Ok(()),
            t => Err(invalid(format!("expected {tok:?}, found {t:?}"))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Ident(s) => Ok(s),
            t => Err(invalid(format!("expected a name, found {t:?}"))),
        }
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn skip_balanced(&mut self, open: Tok, close: Tok) -> Result<()> {
        self.expect(open.clone())?;
        let mut depth = 1;
        while depth > 0 {
            let t = self.next()?;
            if t == open {
                depth += 1;
            } else if t == close {
                depth -= 1;
            }
        }
        Ok(())
    }

    // value := Ident ['(' args ')'] | Str | '[' value, ... ']'
    fn value(&mut self) -> Result<String> {
        self.nested(Self::value_at)
    }

    fn value_at(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Ident(s) if self.peek() == Some(&Tok::LParen) => {
                let args = self.func_args()?;
                Ok(format!("{}({})", s, args.join(", ")))
            }
            Tok::Ident(s) | Tok::Str(s) => Ok(s),
            Tok::LBracket => {
                let mut items = Vec::new();
                while !self.eat(&Tok::RBracket) {
                    items.push(self.value()?);
                    self.eat(&Tok::Comma);
                }
                Ok(format!("[{}]", items.join(", ")))
            }
            t => Err(invalid(format!("expected a value, found {t:?}"))),
        }
    }

    fn func_args(&mut self) -> Result<Vec<String>> {
        self.expect(Tok::LParen)?;
        let mut args = Vec::new();
        while !self.eat(&Tok::RParen) {
            args.push(self.value()?);
            self.eat(&Tok::Comma);
        }
        Ok(args)
    }

    fn func(&mut self) -> Result<Func> {
        let name = self.ident()?;
        let args = self.func_args()?;
        Ok(Func { name, args })
    }

    // filter := and ('or' and)*
    fn filter_or(&mut self) -> Result<Filter> {
        let mut items = vec![self.filter_and()?];
        while self.peek_keyword("or") {
            self.pos += 1;
            items.push(self.filter_and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Filter::Or(items) })
    }

    fn filter_and(&mut self) -> Result<Filter> {
        let mut items = vec![self.filter_unary()?];
        while self.peek_keyword("and") {
            self.pos += 1;
            items.push(self.filter_unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Filter::And(items) })
    }

    fn filter_unary(&mut self) -> Result<Filter> {
        self.nested(Self::filter_unary_at)
    }

    fn filter_unary_at(&mut self) -> Result<Filter> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Filter::Not(Box::new(self.filter_unary()?)));
        }
        if self.eat(&Tok::LParen) {
            let inner = self.filter_or()?;
            self.expect(Tok::RParen)?;
            return Ok(inner);
        }
        Ok(Filter::Func(self.func()?))
    }

    fn filter_directive(&mut self) -> Result<Filter> {
        self.expect(Tok::LParen)?;
        let f = self.filter_or()?;
        self.expect(Tok::RParen)?;
        Ok(f)
    }

    fn name_list(&mut self) -> Result<Vec<String>> {
        self.expect(Tok::LParen)?;
        let mut names = Vec::new();
        while !self.eat(&Tok::RParen) {
            names.push(self.ident()?);
            self.eat(&Tok::Comma);
        }
        Ok(names)
    }

    // Any directive other than filter/groupby is not predicate-bearing and is dropped
    fn directives(&mut self, filter: &mut Option<Filter>, mut group_by: Option<&mut Vec<String>>) -> Result<()> {
        while self.eat(&Tok::At) {
            let name = self.ident()?;
            match name.as_str() {
                "filter" => *filter = Some(self.filter_directive()?),
                "groupby" => match group_by.as_mut() {
                    Some(g) => **g = self.name_list()?,
                    None => return Err(invalid("@groupby is only supported on query blocks")),
                },
                _ => {
                    if self.peek() == Some(&Tok::LParen) {
                        self.skip_balanced(Tok::LParen, Tok::RParen)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn block(&mut self) -> Result<QueryBlock> {
        let name = self.ident()?;
        self.expect(Tok::LParen)?;
        let mut root = None;
        let mut order = Vec::new();
        let mut args = Vec::new();
        while !self.eat(&Tok::RParen) {
            let key = self.ident()?;
            self.expect(Tok::Colon)?;
            match key.as_str() {
                "func" => root = Some(self.func()?),
                "orderasc" | "orderdesc" => order.push(Order { predicate: self.ident()?, desc: key == "orderdesc" }),
                _ => args.push((key, self.value()?)),
            }
            self.eat(&Tok::Comma);
        }
        let root = root.ok_or_else(|| invalid(format!("block {name} has no root function")))?;
        let mut block = QueryBlock { order, args, ..QueryBlock::new(name, root) };
        self.directives(&mut block.filter, Some(&mut block.group_by))?;
        self.expect(Tok::LBrace)?;
        block.fields = self.fields()?;
        Ok(block)
    }

    fn fields(&mut self) -> Result<Vec<Field>> {
        self.nested(Self::fields_at)
    }

    fn fields_at(&mut self) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        while !self.eat(&Tok::RBrace) {
            fields.push(self.field()?);
            self.eat(&Tok::Comma);
        }
        Ok(fields)
    }

    fn field(&mut self) -> Result<Field> {
        let mut field = Field::default();
        let first = self.ident()?;
        let name = if self.eat(&Tok::Colon) {
            field.alias = Some(first);
            self.ident()?
        } else {
            first
        };
        field.predicate = name;
        if self.peek() == Some(&Tok::LParen) {
            let is_args = matches!(self.peek_at(1), Some(Tok::Ident(_))) && self.peek_at(2) == Some(&Tok::Colon);
            if is_args {
                self.expect(Tok::LParen)?;
                while !self.eat(&Tok::RParen) {
                    let key = self.ident()?;
                    self.expect(Tok::Colon)?;
                    match key.as_str() {
                        "orderasc" | "orderdesc" => field.order.push(Order { predicate: self.ident()?, desc: key == "orderdesc" }),
                        _ => {
                            self.value()?;
                        }
                    }
                    self.eat(&Tok::Comma);
                }
            } else {
                self.expect(Tok::LParen)?;
                let inner = self.ident()?;
                self.expect(Tok::RParen)?;
                field.func = Some(std::mem::replace(&mut field.predicate, inner));
            }
        }
        self.directives(&mut field.filter, None)?;
        if self.eat(&Tok::LBrace) {
            field.children = self.fields()?;
        }
        Ok(field)
    }

    fn schema_query(&mut self) -> Result<SchemaQuery> {
        self.ident()?;
        let mut predicates = Vec::new();
        if self.eat(&Tok::LParen) {
            while !self.eat(&Tok::RParen) {
                let key = self.ident()?;
                self.expect(Tok::Colon)?;
                let value = self.value()?;
                if key == "pred" {
                    predicates = value
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                self.eat(&Tok::Comma);
            }
        }
        if self.peek() == Some(&Tok::LBrace) {
            self.skip_balanced(Tok::LBrace, Tok::RBrace)?;
        }
        Ok(SchemaQuery { predicates })
    }
}

/// Parse a query or schema-introspection request
pub fn parse_request(text: &str) -> Result<Request> {
    let mut p = Parser::new(tokenize(text)?);
    let request = if p.peek_keyword("schema") {
        Request::Schema(p.schema_query()?)
    } else {
        p.expect(Tok::LBrace)?;
        if p.peek_keyword("schema") {
            let schema = p.schema_query()?;
            p.expect(Tok::RBrace)?;
            Request::Schema(schema)
        } else {
            let mut blocks = Vec::new();
            while !p.eat(&Tok::RBrace) {
                blocks.push(p.block()?);
            }
            Request::Query(Query { blocks })
        }
    };
    if !p.at_end() {
        return Err(invalid("trailing input after request"));
    }
    Ok(request)
}

fn strip_angle(s: &str) -> &str {
    s.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(s)
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

/// Parse N-Quad lines (`<s> <p> object .`)
pub fn parse_nquads(text: &str) -> Result<Vec<NQuad>> {
    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let body = line
            .strip_suffix('.')
            .ok_or_else(|| invalid(format!("line {}: N-Quad must end with '.'", i + 1)))?
            .trim();
        let (subject, rest) = split_token(body);
        let (predicate, rest) = split_token(rest);
        let object = rest.trim();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(invalid(format!("line {}: malformed N-Quad {line:?}", i + 1)));
        }
        out.push(NQuad {
            subject: strip_angle(subject).to_string(),
            predicate: strip_angle(predicate).to_string(),
            object: object.to_string(),
        });
    }
    Ok(out)
}

/// Parse schema statements, one `pred: definition .` per line
pub fn parse_schema(text: &str) -> Result<Vec<SchemaUpdate>> {
    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("type ") || line.starts_with('}') {
            return Err(invalid(format!("line {}: type definitions are not supported", i + 1)));
        }
        if !line.ends_with('.') {
            return Err(invalid(format!("line {}: schema statement must end with '.'", i + 1)));
        }
        let (predicate, definition) = line
            .split_once(':')
            .ok_or_else(|| invalid(format!("line {}: expected `predicate: type .`", i + 1)))?;
        let predicate = strip_angle(predicate.trim()).to_string();
        let definition = normalize_schema(definition);
        if predicate.is_empty() || definition.is_empty() {
            return Err(invalid(format!("line {}: expected `predicate: type .`", i + 1)));
        }
        out.push(SchemaUpdate { predicate, definition });
    }
    if out.is_empty() {
        return Err(invalid("schema alter contains no statements"));
    }
    Ok(out)
}
