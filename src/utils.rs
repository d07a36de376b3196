use crate::ast::FileSpan;
use crate::sourcemap::Sourcemap;
use codespan::FileId;
use lazy_static::lazy_static;

lazy_static! {
    pub static ref EMPTY_SOURCEMAP: (Sourcemap, FileId) = {
        let mut sourcemap = Sourcemap::default();
        let file_id = sourcemap.intern("<builtin>", "");
        (sourcemap, file_id)
    };
}

pub fn empty_file_span() -> FileSpan {
    FileSpan::new(EMPTY_SOURCEMAP.1, codespan::Span::initial())
}

/// A `Spanned` whose span points at the shared empty file.
macro_rules! zspan {
    ( $e:expr ) => {
        crate::ast::Spanned::new($e, crate::utils::empty_file_span())
    };
}

/// An untyped node whose span points at the shared empty file.
macro_rules! enode {
    ( $e:expr ) => {
        crate::ast::Node::untyped($e, crate::utils::empty_file_span())
    };
}
