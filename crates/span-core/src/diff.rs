use serde::{Deserialize, Serialize};

/// One line inside a hunk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Context,
    Addition,
    Deletion,
    NoNewline,
}

impl LineKind {
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Self::Context),
            '+' => Some(Self::Addition),
            '-' => Some(Self::Deletion),
            '\\' => Some(Self::NoNewline),
            _ => None,
        }
    }

    pub fn prefix_char(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Addition => '+',
            Self::Deletion => '-',
            Self::NoNewline => '\\',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line content, not including the leading prefix character.
    pub text: String,
}

/// One `@@ -old_start,old_len +new_start,new_len @@` header plus its body
/// lines. `old_start`/`new_start` are 1-based per unified-diff convention;
/// a file-creation hunk uses `old_start == 0, old_len == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u64,
    pub old_len: u64,
    pub new_start: u64,
    pub new_len: u64,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    pub fn is_file_creation(&self) -> bool {
        self.old_start == 0 && self.old_len == 0
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }
}

/// A unified-diff document: a sequence of hunks, plus the optional `---`/
/// `+++` file headers the engine synthesizes when the model omits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub old_file: Option<String>,
    pub new_file: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}
