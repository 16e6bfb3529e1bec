//! Validator output to LSP diagnostics.
//!
//! Every line of the validator's output that looks like
//! `SEVERITY: <string>:<line>: '<snippet>' : <description>` becomes at most
//! one diagnostic. The validator does not report usable columns, so the
//! range is re-derived from the quoted snippet by searching the source line
//! with comments blanked out. When the snippet is missing, not found or
//! found more than once, the whole trimmed line is marked instead.

use lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};
use regex::Regex;
use std::sync::LazyLock;

/// Source tag attached to every diagnostic.
pub const DIAGNOSTIC_SOURCE: &str = "glslang";

/// Descriptions containing any of these are validator noise and dropped.
pub const IGNORED_MESSAGES: &[&str] = &[
    "No code generated",
    "compilation terminated",
    "Missing entry point",
];

static OUTPUT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<severity>(?i:[a-z]+(?: [a-z]+)*))\s*:\s*(?:\d+:(?P<line>\d+):\s*)?(?:'(?P<snippet>.*?)'\s*:\s*)?(?P<description>.+)$",
    )
    .expect("output line pattern is valid")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*.*?\*/|/\*.*|//.*").expect("comment pattern is valid"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("identifier pattern is valid"));

/// Settings that influence how diagnostics are built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Mark the full source line instead of searching for the snippet.
    pub mark_the_whole_line: bool,
}

/// Split source text into lines, dropping `\r` before each `\n`.
pub fn source_lines(source: &str) -> Vec<&str> {
    source
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Convert one validator run's output into diagnostics.
///
/// This is a pure function of its arguments.
pub fn parse_output(output: &str, source: &str, options: OutputOptions) -> Vec<Diagnostic> {
    let lines = source_lines(source);
    output
        .lines()
        .filter_map(|line| parse_line(line, &lines, options))
        .collect()
}

/// Convert a single output line into a diagnostic, if it is one.
pub fn parse_line(line: &str, source_lines: &[&str], options: OutputOptions) -> Option<Diagnostic> {
    let caps = OUTPUT_LINE.captures(line.trim())?;
    let severity_token = caps.name("severity")?.as_str();
    let description = caps.name("description")?.as_str().trim();
    if is_ignored(description) {
        return None;
    }
    let snippet = caps
        .name("snippet")
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty());

    let line_index = resolve_line(
        caps.name("line").and_then(|m| m.as_str().parse().ok()),
        source_lines.len(),
    );
    let source_line = source_lines.get(line_index).copied().unwrap_or("");

    let (start, end) = if options.mark_the_whole_line {
        (0, utf16_len(source_line))
    } else {
        snippet
            .and_then(|snippet| find_snippet(source_line, snippet))
            .unwrap_or_else(|| trimmed_span(source_line))
    };

    let message = match snippet {
        Some(snippet) => format!("'{snippet}' : {description}"),
        None => description.to_string(),
    };

    let line_index = line_index as u32;
    Some(Diagnostic {
        range: Range::new(
            Position::new(line_index, start),
            Position::new(line_index, end),
        ),
        severity: classify_severity(severity_token),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message,
        ..Default::default()
    })
}

/// Whether a description is validator noise.
pub fn is_ignored(description: &str) -> bool {
    IGNORED_MESSAGES.iter().any(|m| description.contains(m))
}

/// Map the validator's severity token to an LSP severity.
pub fn classify_severity(token: &str) -> Option<DiagnosticSeverity> {
    let token = token.to_uppercase();
    if token.contains("ERROR") {
        Some(DiagnosticSeverity::ERROR)
    } else if token.contains("WARNING") {
        Some(DiagnosticSeverity::WARNING)
    } else if token.contains("UNIMPLEMENTED") {
        Some(DiagnosticSeverity::INFORMATION)
    } else if token.contains("NOTE") {
        Some(DiagnosticSeverity::HINT)
    } else {
        None
    }
}

/// 1-based reported line to a 0-based index; anything unusable maps to 0.
fn resolve_line(reported: Option<usize>, line_count: usize) -> usize {
    match reported {
        Some(line) if line >= 1 && line <= line_count => line - 1,
        _ => 0,
    }
}

/// Blank out comments, keeping every column where it was.
///
/// Each commented character is replaced by as many spaces as it occupies
/// UTF-16 code units, so columns measured on the result match the input.
pub fn strip_comments(line: &str) -> String {
    COMMENT
        .replace_all(line, |caps: &regex::Captures<'_>| {
            " ".repeat(caps[0].encode_utf16().count())
        })
        .into_owned()
}

/// Locate `snippet` on the comment-stripped line.
///
/// Bare identifiers are matched on word boundaries; anything else is used as
/// a regular expression verbatim. Returns the UTF-16 column span only when
/// there is exactly one match.
fn find_snippet(line: &str, snippet: &str) -> Option<(u32, u32)> {
    let stripped = strip_comments(line);
    let pattern = if IDENTIFIER.is_match(snippet) {
        format!(r"\b{}\b", regex::escape(snippet))
    } else {
        snippet.to_string()
    };
    let regex = Regex::new(&pattern).ok()?;

    let mut matches = regex.find_iter(&stripped);
    let found = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some((
        utf16_len(&stripped[..found.start()]),
        utf16_len(&stripped[..found.end()]),
    ))
}

/// Span of the line without leading and trailing whitespace.
fn trimmed_span(line: &str) -> (u32, u32) {
    let trimmed_end = line.trim_end();
    let leading = trimmed_end.len() - trimmed_end.trim_start().len();
    (
        utf16_len(&trimmed_end[..leading]),
        utf16_len(trimmed_end),
    )
}

fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(output: &str, source: &str) -> Vec<Diagnostic> {
        parse_output(output, source, OutputOptions::default())
    }

    fn span(d: &Diagnostic) -> (u32, u32, u32) {
        (d.range.start.line, d.range.start.character, d.range.end.character)
    }

    #[test]
    fn test_undeclared_identifier() {
        let mut source = "void main() {\n".repeat(11);
        source.push_str("  foo();\n}\n");

        let diagnostics = parse("ERROR: 0:12: 'foo' : undeclared identifier", &source);
        assert_eq!(diagnostics.len(), 1);
        let d = &diagnostics[0];
        assert_eq!(span(d), (11, 2, 5));
        assert_eq!(d.severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(d.message, "'foo' : undeclared identifier");
        assert_eq!(d.source.as_deref(), Some(DIAGNOSTIC_SOURCE));
    }

    #[test]
    fn test_snippet_inside_comment_is_skipped() {
        let diagnostics = parse("ERROR: 0:1: 'a' : bad", "int x = /* a */ a;");
        assert_eq!(span(&diagnostics[0]), (0, 16, 17));
    }

    #[test]
    fn test_line_comment_is_skipped() {
        let diagnostics = parse("ERROR: 0:1: 'y' : bad", "float y = 1.0; // y");
        assert_eq!(span(&diagnostics[0]), (0, 6, 7));
    }

    #[test]
    fn test_ambiguous_snippet_marks_trimmed_line() {
        let diagnostics = parse("ERROR: 0:1: 'foo' : redefinition", "  foo foo();  ");
        assert_eq!(span(&diagnostics[0]), (0, 2, 12));
    }

    #[test]
    fn test_missing_snippet_marks_trimmed_line() {
        let diagnostics = parse("ERROR: 0:1: 'bar' : not found", "\tfoo();");
        assert_eq!(span(&diagnostics[0]), (0, 1, 7));
    }

    #[test]
    fn test_whole_line_mode() {
        let diagnostics = parse_output(
            "WARNING: 0:2: 'x' : unused",
            "void main() {}\n  int x;  \n",
            OutputOptions {
                mark_the_whole_line: true,
            },
        );
        assert_eq!(span(&diagnostics[0]), (1, 0, 10));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
    }

    #[test]
    fn test_word_boundary_for_identifiers() {
        let diagnostics = parse("ERROR: 0:1: 'pos' : undeclared identifier", "position = pos;");
        assert_eq!(span(&diagnostics[0]), (0, 11, 14));
    }

    #[test]
    fn test_non_identifier_snippet_used_as_regex() {
        // `=` is not an identifier, so it is searched verbatim.
        let diagnostics = parse("ERROR: 0:1: '=' : cannot convert", "int x = 1.5;");
        assert_eq!(span(&diagnostics[0]), (0, 6, 7));
    }

    #[test]
    fn test_regex_metacharacter_snippet_falls_back() {
        // Known edge case: `.` is used as a regex and matches every character,
        // `(` does not compile. Both end up on the trimmed line.
        let diagnostics = parse("ERROR: 0:1: '.' : bad swizzle", " v.xy;");
        assert_eq!(span(&diagnostics[0]), (0, 1, 6));
        let diagnostics = parse("ERROR: 0:1: '(' : syntax error", " f(;");
        assert_eq!(span(&diagnostics[0]), (0, 1, 4));
    }

    #[test]
    fn test_ignored_messages_are_dropped() {
        let output = "ERROR: 0:3: 'x' : undeclared identifier\n\
                      ERROR: 1 compilation errors.  No code generated.\n\
                      WARNING: No code generated\n\
                      ERROR: Linking fragment stage: Missing entry point: Each stage requires one entry point";
        let diagnostics = parse(output, "a\nb\nx;");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics
            .iter()
            .all(|d| !d.message.contains("No code generated")));
    }

    #[test]
    fn test_unparseable_lines_are_ignored() {
        let output = "stdin\nWarning, version 450 is not yet complete\n\nLinked fragment stage:\n";
        assert!(parse(output, "void main() {}").is_empty());
    }

    #[test]
    fn test_line_resolution_defaults_to_first_line() {
        let source = "first();\nsecond();";
        let out_of_range = parse("ERROR: 0:40: 'first' : oops", source);
        assert_eq!(out_of_range[0].range.start.line, 0);
        let zero = parse("ERROR: 0:0: 'first' : oops", source);
        assert_eq!(zero[0].range.start.line, 0);
        let missing = parse("ERROR: something is wrong", source);
        assert_eq!(missing[0].range.start.line, 0);
        assert_eq!(missing[0].message, "something is wrong");
    }

    #[test]
    fn test_severity_classification() {
        assert_eq!(classify_severity("ERROR"), Some(DiagnosticSeverity::ERROR));
        assert_eq!(
            classify_severity("INTERNAL ERROR"),
            Some(DiagnosticSeverity::ERROR)
        );
        assert_eq!(classify_severity("WARNING"), Some(DiagnosticSeverity::WARNING));
        assert_eq!(
            classify_severity("UNIMPLEMENTED"),
            Some(DiagnosticSeverity::INFORMATION)
        );
        assert_eq!(classify_severity("NOTE"), Some(DiagnosticSeverity::HINT));
        assert_eq!(classify_severity("INFO"), None);

        let diagnostics = parse("INFO: 0:1: 'a' : something", "a;");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, None);
    }

    #[test]
    fn test_mixed_case_severity() {
        let source = "float x;\nint y;\nuint z;";
        let diagnostics = parse(
            "Warning: 0:3: 'z' : unused variable\nerror: 0:2: 'y' : redefinition",
            source,
        );
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(span(&diagnostics[0]), (2, 5, 6));
        assert_eq!(diagnostics[1].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(span(&diagnostics[1]), (1, 4, 5));
    }

    #[test]
    fn test_empty_snippet_is_treated_as_absent() {
        let diagnostics = parse("ERROR: 0:1: '' : syntax error", "  int;");
        assert_eq!(diagnostics[0].message, "syntax error");
        assert_eq!(span(&diagnostics[0]), (0, 2, 6));
    }

    #[test]
    fn test_columns_are_utf16() {
        // The comment holds a character outside the BMP (two UTF-16 units).
        let diagnostics = parse("ERROR: 0:1: 'z' : bad", "/*\u{1F600}*/ z;");
        assert_eq!(span(&diagnostics[0]), (0, 7, 8));
    }

    #[test]
    fn test_strip_comments_preserves_width() {
        let line = "a /* b */ c // d";
        let stripped = strip_comments(line);
        assert_eq!(stripped.len(), line.len());
        assert_eq!(stripped.trim_end(), "a         c");
    }

    #[test]
    fn test_crlf_source() {
        let diagnostics = parse("ERROR: 0:2: 'b' : bad", "a;\r\n  b;\r\n");
        assert_eq!(span(&diagnostics[0]), (1, 2, 3));
    }
}
