//! Syntax units for intermediate source.
//!
//! Intermediate source is what the translator produces for component files and
//! what plain-code files are written in. Each fragment parses into one
//! [`SyntaxUnit`] tagged with its originating file path. Parsing stops at the
//! first syntax error; everything completed before it is kept.

use crate::image::{TypeKind, Value};
use crate::validate::{Diagnostic, LineIndex, SourceSpan, SB_SYNTAX};

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Default)]
pub struct SyntaxUnit {
    pub file_path: String,
    pub namespace: Option<Spanned<String>>,
    pub uses: Vec<Spanned<String>>,
    pub types: Vec<TypeDecl>,
}

impl SyntaxUnit {
    pub fn namespace_name(&self) -> &str {
        self.namespace.as_ref().map(|n| n.value.as_str()).unwrap_or("")
    }

    pub fn imports(&self) -> Vec<String> {
        self.uses.iter().map(|u| u.value.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub kind: TypeKind,
    pub name: String,
    pub span: SourceSpan,
    pub base: Option<Spanned<String>>,
    pub params: Vec<MemberDecl>,
    pub fields: Vec<MemberDecl>,
    pub render: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub name: String,
    pub ty: Spanned<String>,
    pub default: Option<Value>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Open(String),
    Close,
    Attr(String, Value),
    Text(String),
    Expr(Vec<String>),
    Child { component: String, sets: Vec<SetStmt> },
}

#[derive(Debug, Clone)]
pub struct SetStmt {
    pub name: String,
    pub value: Value,
    pub span: SourceSpan,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Semi,
    Colon,
    LBrace,
    RBrace,
    Eq,
    Dot,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("'{}'", s),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Int(_) => "integer literal".to_string(),
            Tok::Semi => "';'".to_string(),
            Tok::Colon => "':'".to_string(),
            Tok::LBrace => "'{'".to_string(),
            Tok::RBrace => "'}'".to_string(),
            Tok::Eq => "'='".to_string(),
            Tok::Dot => "'.'".to_string(),
            Tok::Eof => "end of file".to_string(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(source: &str, file_path: &str) -> Result<Vec<(Tok, SourceSpan)>, Diagnostic> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let lines = LineIndex::new(source);

    let err = |offset: usize, message: String| {
        Diagnostic::error(SB_SYNTAX, message, file_path, lines.span(offset))
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let span = lines.span(offset);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Line comments
        if c == '/' && chars.get(i + 1).map(|(_, n)| *n) == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        let single = match c {
            ';' => Some(Tok::Semi),
            ':' => Some(Tok::Colon),
            '{' => Some(Tok::LBrace),
            '}' => Some(Tok::RBrace),
            '=' => Some(Tok::Eq),
            '.' => Some(Tok::Dot),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push((tok, span));
            i += 1;
            continue;
        }

        if c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&(_, ch)) = chars.get(i) else {
                    return Err(err(offset, "unterminated string literal".to_string()));
                };
                match ch {
                    '"' => {
                        i += 1;
                        break;
                    }
                    '\\' => {
                        let escaped = match chars.get(i + 1).map(|(_, e)| *e) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('"') => '"',
                            Some('\\') => '\\',
                            _ => {
                                return Err(err(chars[i].0, "invalid escape sequence".to_string()))
                            }
                        };
                        value.push(escaped);
                        i += 2;
                    }
                    '\n' => return Err(err(offset, "newline in string literal".to_string())),
                    _ => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push((Tok::Str(value), span));
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, ch)| *ch).collect();
            let value = text
                .parse::<i64>()
                .map_err(|_| err(offset, format!("integer literal '{}' is out of range", text)))?;
            tokens.push((Tok::Int(value), span));
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i].1) {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, ch)| *ch).collect();
            tokens.push((Tok::Ident(text), span));
            continue;
        }

        return Err(err(offset, format!("unexpected character '{}'", c)));
    }

    tokens.push((Tok::Eof, lines.span(source.len())));
    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser<'a> {
    tokens: Vec<(Tok, SourceSpan)>,
    pos: usize,
    file_path: &'a str,
    unit: SyntaxUnit,
}

type PResult<T> = Result<T, Diagnostic>;

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].0
    }

    fn span(&self) -> SourceSpan {
        self.tokens[self.pos].1
    }

    fn bump(&mut self) -> (Tok, SourceSpan) {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, expected: &str) -> PResult<T> {
        Err(Diagnostic::error(
            SB_SYNTAX,
            format!("expected {}, found {}", expected, self.peek().describe()),
            self.file_path,
            self.span(),
        ))
    }

    fn expect(&mut self, tok: Tok) -> PResult<SourceSpan> {
        if *self.peek() == tok {
            Ok(self.bump().1)
        } else {
            self.error(&tok.describe())
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == keyword)
    }

    fn ident(&mut self) -> PResult<Spanned<String>> {
        match self.peek().clone() {
            Tok::Ident(value) => {
                let span = self.bump().1;
                Ok(Spanned { value, span })
            }
            _ => self.error("identifier"),
        }
    }

    fn path(&mut self) -> PResult<Spanned<String>> {
        let first = self.ident()?;
        let mut value = first.value;
        while *self.peek() == Tok::Dot {
            self.bump();
            value.push('.');
            value.push_str(&self.ident()?.value);
        }
        Ok(Spanned {
            value,
            span: first.span,
        })
    }

    fn string(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Str(value) => {
                self.bump();
                Ok(value)
            }
            _ => self.error("string literal"),
        }
    }

    fn value(&mut self) -> PResult<Value> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.bump();
                Ok(Value::Str(s))
            }
            Tok::Int(n) => {
                self.bump();
                Ok(Value::Int(n))
            }
            Tok::Ident(s) if s == "true" || s == "false" => {
                self.bump();
                Ok(Value::Bool(s == "true"))
            }
            Tok::Ident(_) => {
                let path = self.path()?;
                Ok(Value::Member(path.value.split('.').map(String::from).collect()))
            }
            _ => self.error("value"),
        }
    }

    fn parse_unit(&mut self) -> PResult<()> {
        if self.is_keyword("namespace") {
            self.bump();
            let ns = self.path()?;
            self.expect(Tok::Semi)?;
            self.unit.namespace = Some(ns);
        }

        loop {
            match self.peek().clone() {
                Tok::Eof => return Ok(()),
                Tok::Ident(k) if k == "use" => {
                    self.bump();
                    let path = self.path()?;
                    self.expect(Tok::Semi)?;
                    self.unit.uses.push(path);
                }
                Tok::Ident(k) if k == "component" || k == "record" => {
                    let decl = self.parse_type()?;
                    self.unit.types.push(decl);
                }
                Tok::Ident(k) if k == "namespace" => {
                    return self.error("'use', 'component' or 'record' (namespace must come first)")
                }
                _ => return self.error("'use', 'component' or 'record'"),
            }
        }
    }

    fn parse_type(&mut self) -> PResult<TypeDecl> {
        let (keyword, _) = self.bump();
        let kind = match keyword {
            Tok::Ident(k) if k == "record" => TypeKind::Record,
            _ => TypeKind::Component,
        };
        let name = self.ident()?;
        let base = if *self.peek() == Tok::Colon {
            self.bump();
            Some(self.path()?)
        } else {
            None
        };
        self.expect(Tok::LBrace)?;

        let mut decl = TypeDecl {
            kind,
            name: name.value,
            span: name.span,
            base,
            params: Vec::new(),
            fields: Vec::new(),
            render: None,
        };

        loop {
            match self.peek().clone() {
                Tok::RBrace => {
                    self.bump();
                    return Ok(decl);
                }
                Tok::Ident(k) if k == "param" || k == "field" => {
                    self.bump();
                    let member = self.parse_member()?;
                    if k == "param" {
                        decl.params.push(member);
                    } else {
                        decl.fields.push(member);
                    }
                }
                Tok::Ident(k) if k == "render" && kind == TypeKind::Component => {
                    self.bump();
                    let body = self.parse_render()?;
                    decl.render = Some(body);
                }
                _ => return self.error("'param', 'field', 'render' or '}'"),
            }
        }
    }

    fn parse_member(&mut self) -> PResult<MemberDecl> {
        let name = self.ident()?;
        self.expect(Tok::Colon)?;
        let ty = self.path()?;
        let default = if *self.peek() == Tok::Eq {
            self.bump();
            Some(self.value()?)
        } else {
            None
        };
        self.expect(Tok::Semi)?;
        Ok(MemberDecl {
            name: name.value,
            ty,
            default,
            span: name.span,
        })
    }

    fn parse_render(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Tok::LBrace)?;
        let mut body = Vec::new();
        loop {
            let span = self.span();
            let keyword = match self.peek().clone() {
                Tok::RBrace => {
                    self.bump();
                    return Ok(body);
                }
                Tok::Ident(k) => k,
                _ => return self.error("render statement"),
            };
            self.bump();

            let kind = match keyword.as_str() {
                "open" => StmtKind::Open(self.string()?),
                "close" => StmtKind::Close,
                "text" => StmtKind::Text(self.string()?),
                "attr" => {
                    let name = self.string()?;
                    self.expect(Tok::Eq)?;
                    StmtKind::Attr(name, self.value()?)
                }
                "expr" => match self.value()? {
                    Value::Member(path) => StmtKind::Expr(path),
                    literal => StmtKind::Text(literal_text(&literal)),
                },
                "child" => {
                    let component = self.path()?.value;
                    let sets = self.parse_sets()?;
                    body.push(Stmt {
                        kind: StmtKind::Child { component, sets },
                        span,
                    });
                    continue;
                }
                _ => {
                    return Err(Diagnostic::error(
                        SB_SYNTAX,
                        format!("unknown render statement '{}'", keyword),
                        self.file_path,
                        span,
                    ))
                }
            };
            self.expect(Tok::Semi)?;
            body.push(Stmt { kind, span });
        }
    }

    fn parse_sets(&mut self) -> PResult<Vec<SetStmt>> {
        self.expect(Tok::LBrace)?;
        let mut sets = Vec::new();
        while *self.peek() != Tok::RBrace {
            if !self.is_keyword("set") {
                return self.error("'set' or '}'");
            }
            let span = self.bump().1;
            let name = self.ident()?.value;
            self.expect(Tok::Eq)?;
            let value = self.value()?;
            self.expect(Tok::Semi)?;
            sets.push(SetStmt { name, value, span });
        }
        self.bump();
        Ok(sets)
    }
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Member(path) => path.join("."),
    }
}

/// Parse one fragment. Returns the unit (possibly partial) and any syntax error.
pub fn parse_unit(source: &str, file_path: &str) -> (SyntaxUnit, Vec<Diagnostic>) {
    let mut unit = SyntaxUnit {
        file_path: file_path.to_string(),
        ..Default::default()
    };

    let tokens = match lex(source, file_path) {
        Ok(tokens) => tokens,
        Err(diagnostic) => return (unit, vec![diagnostic]),
    };

    let mut parser = Parser {
        tokens,
        pos: 0,
        file_path,
        unit: std::mem::take(&mut unit),
    };
    let result = parser.parse_unit();
    let diagnostics = match result {
        Ok(()) => Vec::new(),
        Err(diagnostic) => vec![diagnostic],
    };
    (parser.unit, diagnostics)
}

/// Quote a string as an intermediate-source literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
