use strum::Display;

use super::SourceFile;

/// Byte range within a single source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Index of a token within a [`TokenBuffer`]
pub type TokenIndex = u32;

/// The pre-tokenized form of a source file consumed by the parser: one kind
/// byte per token plus a parallel table of start offsets. Token end positions
/// are recovered on demand by re-scanning a single token, which keeps the
/// buffer at five bytes per token.
#[derive(Debug, Default)]
pub struct TokenBuffer {
    pub kinds: Vec<TokenKind>,
    pub offsets: Vec<u32>,
}

impl TokenBuffer {
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kind(&self, token: TokenIndex) -> TokenKind {
        self.kinds[token as usize]
    }

    pub fn start(&self, token: TokenIndex) -> u32 {
        self.offsets[token as usize]
    }

    /// Recomputes the full span of `token` by re-scanning it
    pub fn span(&self, source: &SourceFile, token: TokenIndex) -> Span {
        let mut lexer = Lexer::new_at(source, self.start(token));
        let (_, span) = lexer.next_token();
        span
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum TokenKind {
    /* Words */
    Identifier, // main

    /* Keywords */
    KwModule,
    KwImport,
    KwAlias,
    KwStruct,
    KwUnion,
    KwEnum,
    KwFunction,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwReturn,
    KwBreak,
    KwContinue,
    KwCast,
    KwNull,

    /* Hash directives */
    HashIf,      // #if
    HashVersion, // #version
    HashForeach, // #foreach
    HashAssert,  // #assert
    HashInline,  // #inline

    /* Literals */
    BooleanLiteral, // true
    IntegerLiteral, // 1 or 0x1F
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,
    Colon,        // :
    Dot,          // .
    Ellipsis,     // ...
    At,           // @

    /* Unary Ops */
    Bang,  // !
    Tilde, // ~

    /* Unary + Binary Ops */
    Asterisk,  // *
    Minus,     // -
    Ampersand, // &

    /* Binary Ops */
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseXor,           // ^
    BitwiseOr,            // |
    ShiftLeft,            // <<
    ShiftRight,           // >>
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals,          // =
    PlusEquals,      // +=
    MinusEquals,     // -=
    MultiplyEquals,  // *=
    DivideEquals,    // /=
    ModulusEquals,   // %=
    BitwiseXorEquals,// ^=
    BitwiseAndEquals,// &=
    BitwiseOrEquals, // |=
    ShiftLeftEquals, // <<=
    ShiftRightEquals,// >>=

    /* Trivia & termination */
    Error, // unexpected byte or unterminated literal
    Eof,
}

impl TokenKind {
    pub fn is_assignment_operator(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::PlusEquals
                | Self::MinusEquals
                | Self::MultiplyEquals
                | Self::DivideEquals
                | Self::ModulusEquals
                | Self::BitwiseXorEquals
                | Self::BitwiseAndEquals
                | Self::BitwiseOrEquals
                | Self::ShiftLeftEquals
                | Self::ShiftRightEquals
        )
    }

    /// Tokens which, appearing to the right of a `*`, force the star to be
    /// read as a postfix pointer-type constructor rather than multiplication
    pub fn ends_type_position(&self) -> bool {
        matches!(
            self,
            Self::Comma
                | Self::CloseParen
                | Self::CloseBracket
                | Self::OpenBracket
                | Self::Semicolon
                | Self::KwFunction
        )
    }
}

/// Keyword spellings, matched after an identifier has been scanned
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("module", TokenKind::KwModule),
    ("import", TokenKind::KwImport),
    ("alias", TokenKind::KwAlias),
    ("struct", TokenKind::KwStruct),
    ("union", TokenKind::KwUnion),
    ("enum", TokenKind::KwEnum),
    ("function", TokenKind::KwFunction),
    ("if", TokenKind::KwIf),
    ("else", TokenKind::KwElse),
    ("while", TokenKind::KwWhile),
    ("for", TokenKind::KwFor),
    ("return", TokenKind::KwReturn),
    ("break", TokenKind::KwBreak),
    ("continue", TokenKind::KwContinue),
    ("cast", TokenKind::KwCast),
    ("null", TokenKind::KwNull),
];

/// Hash-directive spellings (the `#` has already been consumed)
const HASH_DIRECTIVES: &[(&str, TokenKind)] = &[
    ("if", TokenKind::HashIf),
    ("version", TokenKind::HashVersion),
    ("foreach", TokenKind::HashForeach),
    ("assert", TokenKind::HashAssert),
    ("inline", TokenKind::HashInline),
];

#[derive(Debug)]
pub struct Lexer<'source> {
    bytes: &'source [u8],
    position: u32,
}

/// Tokenizes an entire source file. The buffer always ends with an `Eof`
/// token whose offset is the file length.
pub fn tokenize(source: &SourceFile) -> TokenBuffer {
    let mut lexer = Lexer::new_at(source, 0);
    let mut buffer = TokenBuffer::default();

    loop {
        let (kind, span) = lexer.next_token();
        buffer.kinds.push(kind);
        buffer.offsets.push(span.start);

        if kind == TokenKind::Eof {
            return buffer;
        }
    }
}

impl<'source> Lexer<'source> {
    pub fn new_at(source: &'source SourceFile, position: u32) -> Self {
        Self {
            bytes: source.contents.as_bytes(),
            position,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position as usize).copied()
    }

    fn peek_at(&self, ahead: u32) -> Option<u8> {
        self.bytes.get((self.position + ahead) as usize).copied()
    }

    fn bump(&mut self) {
        self.position += 1;
    }

    fn ignore_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.bump(),
                // Line comment
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.bump();
                    }
                }
                // Block comment
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    while let Some(b) = self.peek() {
                        if b == b'*' && self.peek_at(1) == Some(b'/') {
                            self.bump();
                            self.bump();
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    /// Scans the next token, skipping leading whitespace and comments
    pub fn next_token(&mut self) -> (TokenKind, Span) {
        self.ignore_trivia();

        let start = self.position;

        let Some(byte) = self.peek() else {
            return (TokenKind::Eof, Span::new(start, start));
        };

        let kind = match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => return self.read_word(),
            b'0'..=b'9' => return self.read_number(),
            b'"' => return self.read_string(),
            b'#' => return self.read_hash_directive(),

            b'(' => self.single(TokenKind::OpenParen),
            b')' => self.single(TokenKind::CloseParen),
            b'[' => self.single(TokenKind::OpenBracket),
            b']' => self.single(TokenKind::CloseBracket),
            b'{' => self.single(TokenKind::OpenBrace),
            b'}' => self.single(TokenKind::CloseBrace),
            b';' => self.single(TokenKind::Semicolon),
            b',' => self.single(TokenKind::Comma),
            b':' => self.single(TokenKind::Colon),
            b'.' => match (self.peek_at(1), self.peek_at(2)) {
                (Some(b'.'), Some(b'.')) => self.triple(TokenKind::Ellipsis),
                _ => self.single(TokenKind::Dot),
            },
            b'@' => self.single(TokenKind::At),
            b'~' => self.single(TokenKind::Tilde),

            b'+' => self.with_equals(TokenKind::Plus, TokenKind::PlusEquals),
            b'-' => self.with_equals(TokenKind::Minus, TokenKind::MinusEquals),
            b'*' => self.with_equals(TokenKind::Asterisk, TokenKind::MultiplyEquals),
            b'/' => self.with_equals(TokenKind::Divide, TokenKind::DivideEquals),
            b'%' => self.with_equals(TokenKind::Modulus, TokenKind::ModulusEquals),
            b'^' => self.with_equals(TokenKind::BitwiseXor, TokenKind::BitwiseXorEquals),
            b'!' => self.with_equals(TokenKind::Bang, TokenKind::NotEquals),
            b'=' => self.with_equals(TokenKind::Equals, TokenKind::DoubleEquals),

            b'&' => match self.peek_at(1) {
                Some(b'&') => self.double(TokenKind::LogicalAnd),
                Some(b'=') => self.double(TokenKind::BitwiseAndEquals),
                _ => self.single(TokenKind::Ampersand),
            },
            b'|' => match self.peek_at(1) {
                Some(b'|') => self.double(TokenKind::LogicalOr),
                Some(b'=') => self.double(TokenKind::BitwiseOrEquals),
                _ => self.single(TokenKind::BitwiseOr),
            },
            b'<' => match (self.peek_at(1), self.peek_at(2)) {
                (Some(b'<'), Some(b'=')) => self.triple(TokenKind::ShiftLeftEquals),
                (Some(b'<'), _) => self.double(TokenKind::ShiftLeft),
                (Some(b'='), _) => self.double(TokenKind::LessThanOrEqualTo),
                _ => self.single(TokenKind::LessThan),
            },
            b'>' => match (self.peek_at(1), self.peek_at(2)) {
                (Some(b'>'), Some(b'=')) => self.triple(TokenKind::ShiftRightEquals),
                (Some(b'>'), _) => self.double(TokenKind::ShiftRight),
                (Some(b'='), _) => self.double(TokenKind::GreaterThanOrEqualTo),
                _ => self.single(TokenKind::GreaterThan),
            },

            _ => self.single(TokenKind::Error),
        };

        (kind, Span::new(start, self.position))
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        self.bump();
        kind
    }

    fn triple(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        self.bump();
        self.bump();
        kind
    }

    fn with_equals(&mut self, plain: TokenKind, with_equals: TokenKind) -> TokenKind {
        self.bump();
        if self.peek() == Some(b'=') {
            self.bump();
            with_equals
        } else {
            plain
        }
    }

    fn read_word(&mut self) -> (TokenKind, Span) {
        let start = self.position;

        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
        {
            self.bump();
        }

        let text = &self.bytes[start as usize..self.position as usize];
        let span = Span::new(start, self.position);

        if text == b"true" || text == b"false" {
            return (TokenKind::BooleanLiteral, span);
        }

        for (spelling, kind) in KEYWORDS {
            if spelling.as_bytes() == text {
                return (*kind, span);
            }
        }

        (TokenKind::Identifier, span)
    }

    fn read_number(&mut self) -> (TokenKind, Span) {
        let start = self.position;

        // 0x prefix switches to hex digits
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            while self
                .peek()
                .is_some_and(|b| b.is_ascii_hexdigit() || b == b'_')
            {
                self.bump();
            }
        } else {
            while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                self.bump();
            }
        }

        (TokenKind::IntegerLiteral, Span::new(start, self.position))
    }

    fn read_string(&mut self) -> (TokenKind, Span) {
        let start = self.position;

        // Consume the opening quote
        self.bump();

        while let Some(b) = self.peek() {
            match b {
                b'"' => {
                    self.bump();
                    return (TokenKind::StringLiteral, Span::new(start, self.position));
                }
                b'\\' => {
                    self.bump();
                    if self.peek().is_some() {
                        self.bump();
                    }
                }
                b'\n' => break,
                _ => self.bump(),
            }
        }

        // Unterminated literal; reported by the parser when consumed
        (TokenKind::Error, Span::new(start, self.position))
    }

    fn read_hash_directive(&mut self) -> (TokenKind, Span) {
        let start = self.position;

        // Consume the `#`
        self.bump();

        let word_start = self.position;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
            self.bump();
        }

        let text = &self.bytes[word_start as usize..self.position as usize];
        let span = Span::new(start, self.position);

        for (spelling, kind) in HASH_DIRECTIVES {
            if spelling.as_bytes() == text {
                return (*kind, span);
            }
        }

        (TokenKind::Error, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_of(source: &str) -> Vec<TokenKind> {
        let file = SourceFile::in_memory(source);
        tokenize(&file).kinds
    }

    #[test]
    fn tokenizes_declaration_heads() {
        assert_eq!(
            kinds_of("module a.b;"),
            vec![
                TokenKind::KwModule,
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_hash_directives_and_attributes() {
        assert_eq!(
            kinds_of("#version(linux) @extern(syscall, 60)"),
            vec![
                TokenKind::HashVersion,
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::CloseParen,
                TokenKind::At,
                TokenKind::Identifier,
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::IntegerLiteral,
                TokenKind::CloseParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn longest_match_for_shift_operators() {
        assert_eq!(
            kinds_of("a <<= b >> c <= d"),
            vec![
                TokenKind::Identifier,
                TokenKind::ShiftLeftEquals,
                TokenKind::Identifier,
                TokenKind::ShiftRight,
                TokenKind::Identifier,
                TokenKind::LessThanOrEqualTo,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recovers_token_spans_from_offsets() {
        let file = SourceFile::in_memory("alias  foo = 0xFF;");
        let buffer = tokenize(&file);

        let foo = buffer.span(&file, 1);
        assert_eq!(file.value_of_span(foo), "foo");

        let literal = buffer.span(&file, 3);
        assert_eq!(file.value_of_span(literal), "0xFF");
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let kinds = kinds_of("\"abc");
        assert_eq!(kinds[0], TokenKind::Error);
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            kinds_of("a // line\n /* block */ b"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }
}
