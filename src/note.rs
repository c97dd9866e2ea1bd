//! Diagnostic notes
//!
//! A `Note` is created where a problem is detected, collected into the
//! owning module's note list, and only flattened or rendered at
//! presentation time.

use std::collections::BTreeSet;
use std::fmt;

use colored::Colorize;

use crate::token::Span;

/// Severity of a note. Ordered so that `max` picks the more severe level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    /// The tag every note of this level carries.
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Line/column range, 1-based, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: (usize, usize),
    pub end: (usize, usize),
}

impl From<Span> for Range {
    fn from(span: Span) -> Self {
        Range {
            start: (span.line, span.column),
            end: (span.end_line, span.end_column),
        }
    }
}

/// Where a note points: a file, and optionally a range within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pos {
    pub file: String,
    pub range: Option<Range>,
}

impl Pos {
    pub fn new(file: impl Into<String>, span: Span) -> Self {
        Pos {
            file: file.into(),
            range: Some(span.into()),
        }
    }

    /// A position covering a whole file.
    pub fn file(file: impl Into<String>) -> Self {
        Pos {
            file: file.into(),
            range: None,
        }
    }

    pub fn line(&self) -> Option<usize> {
        self.range.map(|r| r.start.0)
    }

    /// Same file and same starting line.
    pub fn same_line(&self, other: &Pos) -> bool {
        self.file == other.file && self.line() == other.line()
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_location(self))
    }
}

/// `file`, `file:L:C`, `file:L:C1-C2`, or `file:L1:C1-L2:C2`.
pub fn format_location(pos: &Pos) -> String {
    let Some(range) = pos.range else {
        return pos.file.clone();
    };

    let ((l1, c1), (l2, c2)) = (range.start, range.end);

    if (l1, c1) == (l2, c2) {
        format!("{}:{}:{}", pos.file, l1, c1)
    } else if l1 == l2 {
        format!("{}:{}:{}-{}", pos.file, l1, c1, c2)
    } else {
        format!("{}:{}:{}-{}:{}", pos.file, l1, c1, l2, c2)
    }
}

pub type Tags = BTreeSet<&'static str>;

/// A diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub pos: Pos,
    pub level: Level,
    pub tags: Tags,
    pub message: String,
    pub subnotes: Vec<Note>,
}

impl Note {
    /// Create a note. The level's own tag is always included.
    pub fn new(pos: Pos, level: Level, tags: &[&'static str], message: impl Into<String>) -> Self {
        let mut all: Tags = tags.iter().copied().collect();
        all.insert(level.tag());
        Note {
            pos,
            level,
            tags: all,
            message: message.into(),
            subnotes: Vec::new(),
        }
    }

    pub fn with_subnote(mut self, subnote: Note) -> Self {
        self.subnotes.push(subnote);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_tags(&mut self, tags: impl IntoIterator<Item = &'static str>) {
        self.tags.extend(tags);
    }

    /// Render for a terminal, with a source excerpt when available.
    pub fn render(&self, source: Option<&str>) -> String {
        let mut out = String::new();
        self.render_into(&mut out, source, 0);
        out
    }

    fn render_into(&self, out: &mut String, source: Option<&str>, depth: usize) {
        let indent = "  ".repeat(depth);
        let level = match self.level {
            Level::Error => "error".red().bold(),
            Level::Warn => "warning".yellow().bold(),
            Level::Info => "info".cyan().bold(),
        };

        out.push_str(&format!(
            "{}{} {}: {}\n",
            indent,
            format!("[{}]", format_location(&self.pos)).dimmed(),
            level,
            self.message
        ));

        if let (Some(source), Some(range)) = (source, self.pos.range) {
            let (line, column) = range.start;
            if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
                let width = if range.end.0 == line {
                    range.end.1.saturating_sub(column) + 1
                } else {
                    text.chars().count().saturating_sub(column.saturating_sub(1)).max(1)
                };
                out.push_str(&format!("{}  | {}\n", indent, text));
                out.push_str(&format!(
                    "{}  | {}{}\n",
                    indent,
                    " ".repeat(column.saturating_sub(1)),
                    "^".repeat(width).red()
                ));
            }
        }

        for subnote in &self.subnotes {
            // Subnotes from other files have no excerpt.
            let sub_source = source.filter(|_| subnote.pos.file == self.pos.file);
            subnote.render_into(out, sub_source, depth + 1);
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", format_location(&self.pos), self.level, self.message)
    }
}

/// Depth-first, parent before children.
pub fn flatten(notes: &[Note]) -> Vec<&Note> {
    let mut out = Vec::new();
    for note in notes {
        push_flat(note, &mut out);
    }
    out
}

fn push_flat<'a>(note: &'a Note, out: &mut Vec<&'a Note>) {
    out.push(note);
    for subnote in &note.subnotes {
        push_flat(subnote, out);
    }
}

/// Whether any note (including subnotes) is an error.
pub fn has_errors(notes: &[Note]) -> bool {
    flatten(notes).iter().any(|n| n.level == Level::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, c1: usize, l2: usize, c2: usize) -> Pos {
        Pos {
            file: "@/main.vx".into(),
            range: Some(Range {
                start: (line, c1),
                end: (l2, c2),
            }),
        }
    }

    #[test]
    fn test_format_location_forms() {
        assert_eq!(format_location(&Pos::file("@/a.vx")), "@/a.vx");
        assert_eq!(format_location(&pos(3, 5, 3, 5)), "@/main.vx:3:5");
        assert_eq!(format_location(&pos(3, 5, 3, 9)), "@/main.vx:3:5-9");
        assert_eq!(format_location(&pos(3, 5, 4, 2)), "@/main.vx:3:5-4:2");
    }

    #[test]
    fn test_level_tag_is_added() {
        let note = Note::new(Pos::file("@/a.vx"), Level::Warn, &["unused"], "x");
        assert!(note.has_tag("warn"));
        assert!(note.has_tag("unused"));
        assert!(!note.has_tag("error"));
    }

    #[test]
    fn test_flatten_is_parent_first() {
        let leaf = Note::new(pos(3, 1, 3, 1), Level::Info, &[], "leaf");
        let mid = Note::new(pos(2, 1, 2, 1), Level::Info, &[], "mid").with_subnote(leaf);
        let root = Note::new(pos(1, 1, 1, 1), Level::Error, &[], "root").with_subnote(mid);
        let other = Note::new(pos(4, 1, 4, 1), Level::Warn, &[], "other");
        let notes = vec![root, other];

        let messages: Vec<_> = flatten(&notes).iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["root", "mid", "leaf", "other"]);
        assert!(has_errors(&notes));
    }

    #[test]
    fn test_same_line_ignores_columns() {
        assert!(pos(7, 2, 7, 3).same_line(&pos(7, 9, 8, 1)));
        assert!(!pos(7, 2, 7, 3).same_line(&pos(8, 2, 8, 3)));
        assert!(!pos(7, 2, 7, 3).same_line(&Pos::file("@/main.vx")));
    }

    #[test]
    fn test_render_has_excerpt() {
        colored::control::set_override(false);
        let note = Note::new(pos(2, 3, 2, 5), Level::Error, &[], "bad");
        let out = note.render(Some("first\nx = abc;\n"));
        assert_eq!(out, "[@/main.vx:2:3-5] error: bad\n  | x = abc;\n  |   ^^^\n");
    }
}
