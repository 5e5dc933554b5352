//! Line-level model of the pooling proxy's registry files.
//!
//! Only the lines this service owns are interpreted; everything else,
//! comments and unrelated sections included, is carried through verbatim.

/// Which registry file a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    /// `pgbouncer.ini`, tenant lines live in the `[databases]` section.
    Databases,
    /// `userlist.txt`, one `"user" "password"` pair per line.
    Credentials,
}

pub const DATABASES_MARKER: &str = "[databases]";

impl RegistryKind {
    /// Key of `line`, if it is an entry line.
    fn key_of(self, line: &str) -> Option<&str> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            return None;
        }
        match self {
            Self::Databases => {
                let (key, _) = trimmed.split_once('=')?;
                Some(key.trim())
            }
            Self::Credentials => {
                let rest = trimmed.strip_prefix('"')?;
                let (key, _) = rest.split_once('"')?;
                Some(key)
            }
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Unchanged,
}

impl Upsert {
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// A registry file held as lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDocument {
    kind: RegistryKind,
    lines: Vec<String>,
    trailing_newline: bool,
}

/// The `[databases]` marker is missing, so there is nowhere to insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingMarker;

impl RegistryDocument {
    #[must_use]
    pub fn parse(text: &str, kind: RegistryKind) -> Self {
        Self {
            kind,
            lines: text.lines().map(str::to_owned).collect(),
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Range of line indices that may hold entries.
    ///
    /// For the ini file this is the body of the `[databases]` section, for
    /// the userlist the whole file.
    fn entry_range(&self) -> Option<(usize, usize)> {
        match self.kind {
            RegistryKind::Credentials => Some((0, self.lines.len())),
            RegistryKind::Databases => {
                let marker = self
                    .lines
                    .iter()
                    .position(|line| line.trim() == DATABASES_MARKER)?;
                let body_start = marker + 1;
                let body_end = self
                    .lines
                    .iter()
                    .skip(body_start)
                    .position(|line| line.trim_start().starts_with('['))
                    .map_or(self.lines.len(), |offset| body_start + offset);
                Some((body_start, body_end))
            }
        }
    }

    /// Whether an entry with exactly `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entry_range().is_some_and(|(start, end)| {
            self.lines
                .iter()
                .take(end)
                .skip(start)
                .any(|line| self.kind.key_of(line) == Some(key))
        })
    }

    /// Makes `line` the only entry for `key`.
    ///
    /// New database lines go directly after the section marker, new
    /// credential lines at the end of the file. An existing line with the
    /// same key but different text is replaced in place.
    ///
    /// # Errors
    ///
    /// Returns [`MissingMarker`] for an ini file without a `[databases]` section.
    pub fn upsert(&mut self, key: &str, line: &str) -> Result<Upsert, MissingMarker> {
        let (start, end) = self.entry_range().ok_or(MissingMarker)?;
        let kind = self.kind;
        let existing = self
            .lines
            .iter()
            .enumerate()
            .take(end)
            .skip(start)
            .find(|&(_, candidate)| kind.key_of(candidate) == Some(key))
            .map(|(index, candidate)| (index, candidate == line));

        match existing {
            Some((_, true)) => Ok(Upsert::Unchanged),
            Some((index, false)) => {
                if let Some(slot) = self.lines.get_mut(index) {
                    line.clone_into(slot);
                }
                Ok(Upsert::Replaced)
            }
            None => {
                match kind {
                    RegistryKind::Databases => self.lines.insert(start, line.to_owned()),
                    RegistryKind::Credentials => self.lines.push(line.to_owned()),
                }
                self.trailing_newline = true;
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Deletes every entry whose key is exactly `key`. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some((start, end)) = self.entry_range() else {
            return false;
        };
        let kind = self.kind;
        let before = self.lines.len();
        let mut index = 0;
        self.lines.retain(|line| {
            let in_range = (start..end).contains(&index);
            index += 1;
            !(in_range && kind.key_of(line) == Some(key))
        });
        self.lines.len() != before
    }
}
