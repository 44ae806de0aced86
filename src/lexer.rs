use crate::source::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Eof,

    Ident(String),
    Int(i64),
    Float(f64),
    Rune(char),
    Str(String),

    // Keywords.
    KwPackage,
    KwImport,
    KwType,
    KwConst,
    KwVar,
    KwFunc,
    KwReturn,
    KwIf,
    KwElse,
    KwFor,
    KwRange,
    KwSwitch,
    KwSelect,
    KwCase,
    KwDefault,
    KwFallthrough,
    KwBreak,
    KwContinue,
    KwGoto,
    KwGo,
    KwDefer,
    KwChan,
    KwMap,
    KwStruct,
    KwInterface,

    // Delimiters.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    Ellipsis,

    // Operators.
    Assign,
    Define,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    AmpCaret,
    Shl,
    Shr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    AmpCaretAssign,
    ShlAssign,
    ShrAssign,
    Inc,
    Dec,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Arrow,
}

impl TokenKind {
    /// True when a newline after this token terminates the statement, per
    /// the language's automatic semicolon rule.
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Rune(_)
                | TokenKind::Str(_)
                | TokenKind::KwReturn
                | TokenKind::KwBreak
                | TokenKind::KwContinue
                | TokenKind::KwFallthrough
                | TokenKind::RParen
                | TokenKind::RBrace
                | TokenKind::RBracket
                | TokenKind::Inc
                | TokenKind::Dec
        )
    }

    pub fn describe(&self) -> String {
        match self {
            TokenKind::Eof => "'EOF'".to_string(),
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Int(v) => format!("'{v}'"),
            TokenKind::Float(v) => format!("'{v}'"),
            TokenKind::Rune(c) => format!("{c:?}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Semi => "';'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            other => format!("'{}'", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            TokenKind::KwPackage => "package",
            TokenKind::KwImport => "import",
            TokenKind::KwType => "type",
            TokenKind::KwConst => "const",
            TokenKind::KwVar => "var",
            TokenKind::KwFunc => "func",
            TokenKind::KwReturn => "return",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwFor => "for",
            TokenKind::KwRange => "range",
            TokenKind::KwSwitch => "switch",
            TokenKind::KwSelect => "select",
            TokenKind::KwCase => "case",
            TokenKind::KwDefault => "default",
            TokenKind::KwFallthrough => "fallthrough",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwGoto => "goto",
            TokenKind::KwGo => "go",
            TokenKind::KwDefer => "defer",
            TokenKind::KwChan => "chan",
            TokenKind::KwMap => "map",
            TokenKind::KwStruct => "struct",
            TokenKind::KwInterface => "interface",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::Assign => "=",
            TokenKind::Define => ":=",
            TokenKind::Semi => ";",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::AmpCaret => "&^",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::PercentAssign => "%=",
            TokenKind::AmpAssign => "&=",
            TokenKind::PipeAssign => "|=",
            TokenKind::CaretAssign => "^=",
            TokenKind::AmpCaretAssign => "&^=",
            TokenKind::ShlAssign => "<<=",
            TokenKind::ShrAssign => ">>=",
            TokenKind::Inc => "++",
            TokenKind::Dec => "--",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Arrow => "<-",
            _ => "?",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for LexError {}

#[derive(Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    base: usize,
    last: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, base: usize) -> Self {
        // A leading shebang line reads as a comment so script files are
        // accepted verbatim.
        let pos = if src.starts_with("#!") {
            src.find('\n').unwrap_or(src.len())
        } else {
            0
        };
        Self {
            src,
            pos,
            base,
            last: None,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(semi) = self.skip_blanks()? {
            self.last = Some(TokenKind::Semi);
            return Ok(semi);
        }

        let start = self.pos;
        let Some(ch) = self.peek() else {
            // A file that stops mid-statement still gets its closing
            // semicolon, so the parser sees complete statements.
            if self.last.as_ref().is_some_and(|t| t.ends_statement()) {
                self.last = Some(TokenKind::Semi);
                return Ok(self.token(TokenKind::Semi, start, start));
            }
            return Ok(self.token(TokenKind::Eof, start, start));
        };

        let tok = if is_ident_start(ch) {
            self.lex_ident()
        } else if ch.is_ascii_digit() {
            self.lex_number()?
        } else if ch == '"' {
            self.lex_string()?
        } else if ch == '`' {
            self.lex_raw_string()?
        } else if ch == '\'' {
            self.lex_rune()?
        } else {
            self.lex_operator()?
        };

        self.last = Some(tok.kind.clone());
        Ok(tok)
    }

    /// Skips whitespace and comments. Returns a synthetic semicolon when a
    /// newline follows a statement-ending token.
    fn skip_blanks(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            match self.peek() {
                Some('\n') => {
                    let at = self.pos;
                    self.bump();
                    if self.last.as_ref().is_some_and(|t| t.ends_statement()) {
                        return Ok(Some(self.token(TokenKind::Semi, at, at + 1)));
                    }
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(self.error("comment not terminated", start));
                            }
                        }
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_part(c) {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        let kind = match text {
            "package" => TokenKind::KwPackage,
            "import" => TokenKind::KwImport,
            "type" => TokenKind::KwType,
            "const" => TokenKind::KwConst,
            "var" => TokenKind::KwVar,
            "func" => TokenKind::KwFunc,
            "return" => TokenKind::KwReturn,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "for" => TokenKind::KwFor,
            "range" => TokenKind::KwRange,
            "switch" => TokenKind::KwSwitch,
            "select" => TokenKind::KwSelect,
            "case" => TokenKind::KwCase,
            "default" => TokenKind::KwDefault,
            "fallthrough" => TokenKind::KwFallthrough,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "goto" => TokenKind::KwGoto,
            "go" => TokenKind::KwGo,
            "defer" => TokenKind::KwDefer,
            "chan" => TokenKind::KwChan,
            "map" => TokenKind::KwMap,
            "struct" => TokenKind::KwStruct,
            "interface" => TokenKind::KwInterface,
            _ => TokenKind::Ident(text.to_string()),
        };
        self.token(kind, start, self.pos)
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let digits = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits {
                return Err(self.error("malformed hexadecimal literal", start));
            }
            let value = i64::from_str_radix(&self.src[digits..self.pos], 16)
                .map_err(|_| self.error("integer literal out of range", start))?;
            return Ok(self.token(TokenKind::Int(value), start, self.pos));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..=ahead {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = &self.src[start..self.pos];
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("malformed float literal", start))?;
            Ok(self.token(TokenKind::Float(value), start, self.pos))
        } else {
            // An integer literal wider than i64 still reads as a float so
            // untyped constant contexts can hold it.
            match text.parse::<i64>() {
                Ok(value) => Ok(self.token(TokenKind::Int(value), start, self.pos)),
                Err(_) => match text.parse::<f64>() {
                    Ok(value) => Ok(self.token(TokenKind::Float(value), start, self.pos)),
                    Err(_) => Err(self.error("integer literal out of range", start)),
                },
            }
        }
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self.error("string literal not terminated", start));
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let esc = self
                        .peek()
                        .ok_or_else(|| self.error("string literal not terminated", start))?;
                    self.bump();
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        '0' => out.push('\0'),
                        other => {
                            return Err(
                                self.error(&format!("unknown escape '\\{other}'"), self.pos - 1)
                            );
                        }
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.bump();
                }
            }
        }
        Ok(self.token(TokenKind::Str(out), start, self.pos))
    }

    fn lex_raw_string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.bump();
        let body = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error("raw string literal not terminated", start)),
                Some('`') => {
                    let text = self.src[body..self.pos].to_string();
                    self.bump();
                    return Ok(self.token(TokenKind::Str(text), start, self.pos));
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn lex_rune(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.bump();
        let ch = match self.peek() {
            None | Some('\n') => return Err(self.error("rune literal not terminated", start)),
            Some('\\') => {
                self.bump();
                let esc = self
                    .peek()
                    .ok_or_else(|| self.error("rune literal not terminated", start))?;
                self.bump();
                match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    '0' => '\0',
                    other => {
                        return Err(self.error(&format!("unknown escape '\\{other}'"), self.pos - 1))
                    }
                }
            }
            Some(c) => {
                self.bump();
                c
            }
        };
        if self.peek() != Some('\'') {
            return Err(self.error("rune literal not terminated", start));
        }
        self.bump();
        Ok(self.token(TokenKind::Rune(ch), start, self.pos))
    }

    fn lex_operator(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let ch = self.peek().expect("caller checked non-empty");
        self.bump();

        macro_rules! two {
            ($next:literal, $long:expr, $short:expr) => {
                if self.peek() == Some($next) {
                    self.bump();
                    $long
                } else {
                    $short
                }
            };
        }

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => two!('=', TokenKind::Define, TokenKind::Colon),
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            '+' => {
                if self.peek() == Some('+') {
                    self.bump();
                    TokenKind::Inc
                } else {
                    two!('=', TokenKind::PlusAssign, TokenKind::Plus)
                }
            }
            '-' => {
                if self.peek() == Some('-') {
                    self.bump();
                    TokenKind::Dec
                } else {
                    two!('=', TokenKind::MinusAssign, TokenKind::Minus)
                }
            }
            '*' => two!('=', TokenKind::StarAssign, TokenKind::Star),
            '/' => two!('=', TokenKind::SlashAssign, TokenKind::Slash),
            '%' => two!('=', TokenKind::PercentAssign, TokenKind::Percent),
            '^' => two!('=', TokenKind::CaretAssign, TokenKind::Caret),
            '=' => two!('=', TokenKind::EqEq, TokenKind::Assign),
            '!' => two!('=', TokenKind::NotEq, TokenKind::Bang),
            '&' => match self.peek() {
                Some('&') => {
                    self.bump();
                    TokenKind::AndAnd
                }
                Some('^') => {
                    self.bump();
                    two!('=', TokenKind::AmpCaretAssign, TokenKind::AmpCaret)
                }
                Some('=') => {
                    self.bump();
                    TokenKind::AmpAssign
                }
                _ => TokenKind::Amp,
            },
            '|' => match self.peek() {
                Some('|') => {
                    self.bump();
                    TokenKind::OrOr
                }
                Some('=') => {
                    self.bump();
                    TokenKind::PipeAssign
                }
                _ => TokenKind::Pipe,
            },
            '<' => match self.peek() {
                Some('-') => {
                    self.bump();
                    TokenKind::Arrow
                }
                Some('<') => {
                    self.bump();
                    two!('=', TokenKind::ShlAssign, TokenKind::Shl)
                }
                Some('=') => {
                    self.bump();
                    TokenKind::LtEq
                }
                _ => TokenKind::Lt,
            },
            '>' => match self.peek() {
                Some('>') => {
                    self.bump();
                    two!('=', TokenKind::ShrAssign, TokenKind::Shr)
                }
                Some('=') => {
                    self.bump();
                    TokenKind::GtEq
                }
                _ => TokenKind::Gt,
            },
            other => {
                return Err(self.error(&format!("unexpected character {other:?}"), start));
            }
        };
        Ok(self.token(kind, start, self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn token(&self, kind: TokenKind, start: usize, end: usize) -> Token {
        Token {
            kind,
            span: Span::new(self.base + start, self.base + end),
        }
    }

    fn error(&self, message: &str, at: usize) -> LexError {
        LexError {
            message: message.to_string(),
            span: Span::new(self.base + at, self.base + self.pos),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, 0);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().expect("token");
            if tok.kind == TokenKind::Eof {
                return out;
            }
            out.push(tok.kind);
        }
    }

    #[test]
    fn semicolons_are_inserted_at_newlines() {
        let got = kinds("x := 1\ny := 2\n");
        assert_eq!(
            got,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Define,
                TokenKind::Int(1),
                TokenKind::Semi,
                TokenKind::Ident("y".into()),
                TokenKind::Define,
                TokenKind::Int(2),
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn no_semicolon_after_operators() {
        let got = kinds("x := 1 +\n2\n");
        assert!(!got.contains(&TokenKind::Semi) || got.iter().filter(|k| **k == TokenKind::Semi).count() == 1);
        assert_eq!(got.last(), Some(&TokenKind::Semi));
    }

    #[test]
    fn channel_arrow_and_comparison_disambiguate() {
        assert_eq!(
            kinds("a <- b < c <= d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Arrow,
                TokenKind::Ident("b".into()),
                TokenKind::Lt,
                TokenKind::Ident("c".into()),
                TokenKind::LtEq,
                TokenKind::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn raw_strings_keep_newlines() {
        let got = kinds("`a\nb`");
        assert_eq!(got[0], TokenKind::Str("a\nb".into()));
    }

    #[test]
    fn unterminated_raw_string_reports_the_repl_signature() {
        let mut lexer = Lexer::new("`abc", 0);
        let err = lexer.next_token().expect_err("error");
        assert_eq!(err.message, "raw string literal not terminated");
    }
}
