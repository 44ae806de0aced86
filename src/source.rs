use std::fmt;
use std::sync::Arc;

/// A half-open byte span `[start, end)` within the interpreter's file set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A resolved source position, used for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub name: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.col)
    }
}

#[derive(Clone, Debug)]
struct File {
    name: String,
    base: usize,
    src: Arc<str>,
    line_starts: Vec<usize>,
}

impl File {
    fn end(&self) -> usize {
        self.base + self.src.len()
    }

    fn line_col(&self, offset: usize) -> (usize, usize) {
        let local = offset.saturating_sub(self.base).min(self.src.len());
        let line_idx = self
            .line_starts
            .partition_point(|&start| start <= local)
            .saturating_sub(1);
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let col = match self.src.get(line_start..local) {
            Some(prefix) => prefix.chars().count() + 1,
            None => local - line_start + 1,
        };
        (line_idx + 1, col)
    }
}

/// The set of source files known to one interpreter, assigning each file a
/// disjoint range of global byte offsets so a bare [`Span`] identifies both
/// the file and the location inside it.
#[derive(Clone, Debug, Default)]
pub struct FileSet {
    files: Vec<File>,
    next_base: usize,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `src` under `name` and returns the global offset of its
    /// first byte. Offsets in spans produced while parsing `src` must be
    /// shifted by the returned base.
    pub fn add(&mut self, name: &str, src: &str) -> usize {
        let base = self.next_base;
        self.next_base = base + src.len() + 1;
        self.files.push(File {
            name: name.to_string(),
            base,
            src: Arc::from(src),
            line_starts: line_starts(src),
        });
        base
    }

    /// Resolves the start of `span` to a file/line/column position.
    pub fn position(&self, span: Span) -> Option<Position> {
        let idx = self
            .files
            .partition_point(|file| file.base <= span.start)
            .checked_sub(1)?;
        let file = self.files.get(idx)?;
        if span.start > file.end() {
            return None;
        }
        let (line, col) = file.line_col(span.start);
        Some(Position {
            name: file.name.clone(),
            line,
            col,
        })
    }

    /// Renders the start of `span` as `name:line:col`, falling back to raw
    /// byte offsets when the span belongs to no registered file.
    pub fn describe(&self, span: Span) -> String {
        match self.position(span) {
            Some(pos) => pos.to_string(),
            None => format!("{}..{}", span.start, span.end),
        }
    }
}

fn line_starts(src: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (idx, byte) in src.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(idx + 1);
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_map_lines_and_columns() {
        let mut fset = FileSet::new();
        let base = fset.add("a.skf", "x := 1\ny := 2\n");
        let pos = fset.position(Span::new(base + 7, base + 8)).expect("pos");
        assert_eq!(pos.line, 2);
        assert_eq!(pos.col, 1);
        assert_eq!(pos.name, "a.skf");
    }

    #[test]
    fn files_get_disjoint_offset_ranges() {
        let mut fset = FileSet::new();
        let a = fset.add("a.skf", "one");
        let b = fset.add("b.skf", "two");
        assert!(b > a + 2);
        let pos = fset.position(Span::new(b, b + 3)).expect("pos");
        assert_eq!(pos.name, "b.skf");
    }

    #[test]
    fn columns_count_unicode_scalars() {
        let mut fset = FileSet::new();
        let base = fset.add("u.skf", "αβ := 0");
        let beta = "α".len();
        let pos = fset
            .position(Span::new(base + beta, base + beta + "β".len()))
            .expect("pos");
        assert_eq!(pos.col, 2);
    }
}
