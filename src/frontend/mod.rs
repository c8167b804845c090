use std::path::PathBuf;

use self::lexer::Span;

pub mod ast;
pub mod expr;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod print;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn in_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start as usize..span.end as usize]
    }

    /// 1-based line number of a byte offset
    pub fn row_for_position(&self, position: u32) -> usize {
        self.contents[..position as usize]
            .bytes()
            .filter(|b| *b == b'\n')
            .count()
            + 1
    }

    /// 1-based column of a byte offset within its line
    pub fn column_for_position(&self, position: u32) -> usize {
        let before = &self.contents[..position as usize];
        position as usize - before.rfind('\n').map(|n| n + 1).unwrap_or(0) + 1
    }

    pub fn format_span_position(&self, span: Span) -> String {
        format!(
            "{}:{}:{}",
            self.origin,
            self.row_for_position(span.start),
            self.column_for_position(span.start)
        )
    }

    /// Prints the source line containing `span` with a caret marker under the
    /// offending range
    pub fn highlight_span(&self, span: Span) {
        let line_start = self.contents[..span.start as usize]
            .rfind('\n')
            .map(|n| n + 1)
            .unwrap_or(0);
        let line_end = self.contents[span.start as usize..]
            .find('\n')
            .map(|n| n + span.start as usize)
            .unwrap_or(self.contents.len());

        let line = &self.contents[line_start..line_end];
        let caret_offset = span.start as usize - line_start;
        let caret_width = (span.end as usize).min(line_end).saturating_sub(span.start as usize);

        eprintln!("  | {line}");
        eprintln!(
            "  | {}{}",
            " ".repeat(caret_offset),
            "^".repeat(caret_width.max(1))
        );
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}
