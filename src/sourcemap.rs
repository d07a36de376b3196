use crate::ast::UntypedNode;
use crate::parser::{parse_program, ParseError};
use codespan::{FileId, Files};
use std::{fs, io, path::Path};

pub type ParseResult = Result<UntypedNode, Vec<ParseError>>;

/// Owns every source buffer seen during a run, so spans stay resolvable
/// for diagnostics after parsing.
#[derive(Clone)]
pub struct Sourcemap {
    files: Files<String>,
}

impl Sourcemap {
    pub fn new() -> Sourcemap {
        Sourcemap {
            files: Files::new(),
        }
    }

    pub fn files(&self) -> &Files<String> {
        &self.files
    }

    /// Register a buffer without parsing it. Synthetic spans (test nodes,
    /// desugared code) point into a buffer interned this way.
    pub fn intern(&mut self, name: impl Into<String>, source: impl Into<String>) -> FileId {
        self.files.add(name.into(), source.into())
    }

    /// Register a buffer and parse it; the parser reads the interned copy,
    /// so the returned tree's spans index into this sourcemap.
    pub fn add_file(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> (FileId, ParseResult) {
        let file_id = self.intern(name, source);
        (file_id, parse_program(file_id, self.files.source(file_id)))
    }

    pub fn add_file_from_disk<P: AsRef<Path>>(
        &mut self,
        path: P,
    ) -> io::Result<(FileId, ParseResult)> {
        let source = fs::read_to_string(path.as_ref())?;
        Ok(self.add_file(path.as_ref().to_string_lossy(), source))
    }
}

impl Default for Sourcemap {
    fn default() -> Sourcemap {
        Sourcemap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_parses_the_interned_copy() {
        let mut sourcemap = Sourcemap::default();
        let (file_id, result) = sourcemap.add_file("test.hyg", "let x = 1; println(x)");
        result.expect("failed to parse");
        assert_eq!(sourcemap.files().source(file_id), "let x = 1; println(x)");
    }

    #[test]
    fn intern_does_not_parse() {
        let mut sourcemap = Sourcemap::default();
        // Not valid Hygge, but interning never runs the parser.
        sourcemap.intern("scratch", "%%%");
    }
}
