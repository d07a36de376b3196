//! The assembly document: three ordered segments (data directives, text,
//! post-text) under segment-wise concatenation. Concatenation and
//! single-item construction are the only operations the code generator
//! needs; function bodies are spliced to the end of post-text so they are
//! rendered after the main program.

use crate::rv::Instr;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Word(i32),
    Float(f32),
    Asciz(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub label: String,
    pub data: Data,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextItem {
    Label(String),
    Instr(Instr, String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Asm {
    pub data: Vec<DataItem>,
    pub text: Vec<TextItem>,
    pub post_text: Vec<TextItem>,
}

impl Asm {
    pub fn new() -> Asm {
        Asm::default()
    }

    pub fn instr(mut self, instr: Instr, comment: &str) -> Asm {
        self.text.push(TextItem::Instr(instr, comment.to_owned()));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Asm {
        self.text.push(TextItem::Label(label.into()));
        self
    }

    pub fn data(mut self, label: impl Into<String>, data: Data) -> Asm {
        self.data.push(DataItem {
            label: label.into(),
            data,
        });
        self
    }

    pub fn post_instr(mut self, instr: Instr, comment: &str) -> Asm {
        self.post_text.push(TextItem::Instr(instr, comment.to_owned()));
        self
    }

    /// Segment-wise concatenation; the monoid operation.
    pub fn concat(mut self, other: Asm) -> Asm {
        self.data.extend(other.data);
        self.text.extend(other.text);
        self.post_text.extend(other.post_text);
        self
    }

    /// Splice the entire current text onto the end of post-text, preserving
    /// relative order. Used when a compiled function body becomes a
    /// fragment to be emitted after the main program.
    pub fn text_to_post_text(mut self) -> Asm {
        let text = std::mem::replace(&mut self.text, vec![]);
        self.post_text.extend(text);
        self
    }

    /// Every text item in emission order: text, then post-text.
    pub fn all_text(&self) -> impl Iterator<Item = &TextItem> {
        self.text.iter().chain(self.post_text.iter())
    }
}

fn escape(s: &str) -> String {
    s.chars()
        .flat_map(|ch| match ch {
            '\\' => vec!['\\', '\\'],
            '"' => vec!['\\', '"'],
            '\n' => vec!['\\', 'n'],
            '\t' => vec!['\\', 't'],
            ch => vec![ch],
        })
        .collect()
}

impl fmt::Display for Asm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.data.is_empty() {
            writeln!(f, ".data")?;
            for item in &self.data {
                writeln!(f, "{}:", item.label)?;
                match &item.data {
                    Data::Word(n) => writeln!(f, "    .word {}", n)?,
                    Data::Float(x) => writeln!(f, "    .float {:?}", x)?,
                    Data::Asciz(s) => writeln!(f, "    .string \"{}\"", escape(s))?,
                }
            }
        }
        writeln!(f, ".text")?;
        for item in self.all_text() {
            match item {
                TextItem::Label(label) => writeln!(f, "{}:", label)?,
                TextItem::Instr(instr, comment) => {
                    if comment.is_empty() {
                        writeln!(f, "    {}", instr)?;
                    } else {
                        writeln!(f, "    {} # {}", instr, comment)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rv::Reg;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concat_is_segment_wise_and_ordered() {
        let a = Asm::new()
            .data("s1", Data::Asciz("a".to_owned()))
            .instr(Instr::Li(Reg::T(0), 1), "");
        let b = Asm::new()
            .data("s2", Data::Asciz("b".to_owned()))
            .instr(Instr::Li(Reg::T(0), 2), "")
            .post_instr(Instr::Ecall, "");
        let joined = a.clone().concat(b);
        assert_eq!(joined.data.len(), 2);
        assert_eq!(joined.data[0].label, "s1");
        assert_eq!(joined.text.len(), 2);
        assert_eq!(joined.post_text.len(), 1);
        // Left identity.
        assert_eq!(Asm::new().concat(a.clone()), a);
    }

    #[test]
    fn test_text_to_post_text_preserves_order() {
        let doc = Asm::new()
            .label("f")
            .instr(Instr::Li(Reg::T(0), 1), "")
            .instr(Instr::Jr(Reg::Ra), "")
            .post_instr(Instr::Ecall, "")
            .text_to_post_text();
        assert!(doc.text.is_empty());
        assert_eq!(
            doc.post_text,
            vec![
                TextItem::Instr(Instr::Ecall, "".to_owned()),
                TextItem::Label("f".to_owned()),
                TextItem::Instr(Instr::Li(Reg::T(0), 1), "".to_owned()),
                TextItem::Instr(Instr::Jr(Reg::Ra), "".to_owned()),
            ]
        );
    }

    #[test]
    fn test_display() {
        let doc = Asm::new()
            .data("hello", Data::Asciz("hi\n".to_owned()))
            .data("pi", Data::Float(2.0))
            .instr(Instr::Mv(Reg::Fp, Reg::Sp), "initialise frame pointer")
            .label("done")
            .instr(Instr::Ecall, "");
        let rendered = doc.to_string();
        let expected = ".data\n\
                        hello:\n    .string \"hi\\n\"\n\
                        pi:\n    .float 2.0\n\
                        .text\n    mv fp, sp # initialise frame pointer\n\
                        done:\n    ecall\n";
        assert_eq!(rendered, expected);
    }
}
