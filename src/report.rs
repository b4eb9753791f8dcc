//! Rendering of diagnostics against their source text.

use std::fmt::Write;

use quill_codegen::{CompileError, ErrorLocation};
use text_lines::TextLines;
use unicode_width::UnicodeWidthStr;

/// Render a compile error followed by the offending source line, with a caret under the
/// offending token:
///
/// ```text
/// [line 1] Error at ';': Expect expression.
///   |
/// 1 | print 1 +;
///   |          ^
/// ```
pub fn render_compile_error(source: &str, error: &CompileError) -> String {
    let mut out = error.to_string();
    if source.is_empty() {
        return out;
    }

    let lines = TextLines::new(source);
    let start = error.span().start.min(source.len());
    let line_index = lines.line_index(start);
    let line_start = lines.line_start(line_index);
    let line = source[line_start..]
        .lines()
        .next()
        .unwrap_or_default();

    // a token spanning lines is only marked on its first one
    let before = &source[line_start..start.max(line_start)];
    let marked = match error.location() {
        ErrorLocation::End => "",
        _ => &source[start..error.span().end.min(line_start + line.len()).max(start)],
    };
    let indent = before.width();
    let carets = marked.width().max(1);

    let line_no = (line_index + 1).to_string();
    let gutter = " ".repeat(line_no.len());
    let _ = write!(
        out,
        "\n{gutter} |\n{line_no} | {line}\n{gutter} | {pad}{carets}",
        gutter = gutter,
        line_no = line_no,
        line = line,
        pad = " ".repeat(indent),
        carets = "^".repeat(carets),
    );
    out
}

/// Render every error of a failed compilation, one after another.
pub fn render_compile_errors(source: &str, errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| render_compile_error(source, e))
        .collect::<Vec<_>>()
        .join("\n\n")
}
