use crate::ast::FileSpan;
use codespan::FileId;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use std::fmt::Debug;

/// Uniform view of span-carrying pipeline errors, so the driver can render
/// any of them as a codespan diagnostic.
pub trait Error: Debug {
    fn span(&self) -> FileSpan;
    fn message(&self) -> String;

    fn diagnostic(&self) -> Diagnostic<FileId> {
        let span = self.span();
        Diagnostic::error()
            .with_message(self.message())
            .with_labels(vec![Label::primary(span.file_id, span.span)
                .with_message(self.message())])
    }
}

impl Error for crate::parser::ParseError {
    fn span(&self) -> FileSpan {
        self.span
    }

    fn message(&self) -> String {
        self.msg.clone()
    }
}

impl Error for crate::typecheck::TypeError {
    fn span(&self) -> FileSpan {
        self.span
    }

    fn message(&self) -> String {
        self.kind.to_string()
    }
}
