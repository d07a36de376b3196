//! The RARS environment-call registry. The type checker and the code
//! generator both consult this table; the numbers and signatures are frozen
//! by the simulator.

use crate::ty::Type;
use lazy_static::lazy_static;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syscall {
    pub name: &'static str,
    pub number: i32,
    pub args: Vec<Type>,
    pub ret: Type,
}

impl Syscall {
    fn new(name: &'static str, number: i32, args: Vec<Type>, ret: Type) -> Syscall {
        Syscall {
            name,
            number,
            args,
            ret,
        }
    }
}

lazy_static! {
    pub static ref SYSCALLS: Vec<Syscall> = {
        use crate::ty::Type::*;
        vec![
            Syscall::new("PrintInt", 1, vec![Int], Unit),
            Syscall::new("PrintFloat", 2, vec![Float], Unit),
            Syscall::new("PrintString", 4, vec![String], Unit),
            Syscall::new("ReadInt", 5, vec![], Int),
            Syscall::new("ReadFloat", 6, vec![], Float),
            Syscall::new("Sbrk", 9, vec![Int], Int),
            Syscall::new("Exit", 10, vec![], Unit),
            Syscall::new("PrintChar", 11, vec![Int], Unit),
            Syscall::new("GetCwd", 17, vec![String, Int], Unit),
            Syscall::new("Time", 30, vec![], Int),
            Syscall::new("MidiOut", 31, vec![Int, Int, Int, Int], Unit),
            Syscall::new("Sleep", 32, vec![Int], Unit),
            Syscall::new("MidiOutSync", 33, vec![Int, Int, Int, Int], Unit),
            Syscall::new("PrintIntHex", 34, vec![Int], Unit),
            Syscall::new("PrintIntBinary", 35, vec![Int], Unit),
            Syscall::new("PrintIntUnsigned", 36, vec![Int], Unit),
            Syscall::new("SetSeed", 40, vec![Int, Int], Unit),
            Syscall::new("RandomInt", 41, vec![Int], Int),
            Syscall::new("RandomIntRange", 42, vec![Int, Int], Int),
            Syscall::new("RandomFloat", 43, vec![Int], Float),
            Syscall::new("RandomDouble", 44, vec![Int], Float),
            Syscall::new("ConfirmDialog", 50, vec![String], Int),
            Syscall::new("InputDialogInt", 51, vec![String], Int),
            Syscall::new("InputDialogFloat", 52, vec![String], Float),
            Syscall::new("InputDialogDouble", 53, vec![String], Float),
            Syscall::new("InputDialogString", 54, vec![String, String, Int], Unit),
            Syscall::new("MessageDialog", 55, vec![String, Int], Unit),
            Syscall::new("MessageDialogInt", 56, vec![String, Int], Unit),
            Syscall::new("Close", 57, vec![Int], Unit),
            Syscall::new("MessageDialogDouble", 58, vec![String, Float], Unit),
            Syscall::new("MessageDialogString", 59, vec![String, String], Unit),
            Syscall::new("MessageDialogFloat", 60, vec![String, Float], Unit),
            Syscall::new("LSeek", 62, vec![Int, Int, Int], Int),
            Syscall::new("Read", 63, vec![Int, String, Int], Int),
            Syscall::new("Write", 64, vec![Int, String, Int], Int),
            Syscall::new("Exit2", 93, vec![Int], Unit),
            Syscall::new("Open", 1024, vec![String, Int], Int),
        ]
    };
}

pub fn lookup(number: i32) -> Option<&'static Syscall> {
    SYSCALLS.iter().find(|syscall| syscall.number == number)
}

/// A printable name for a syscall number, falling back to `syscall_<n>`.
pub fn name(number: i32) -> String {
    match lookup(number) {
        Some(syscall) => syscall.name.to_owned(),
        None => format!("syscall_{}", number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup() {
        let sbrk = lookup(9).unwrap();
        assert_eq!(sbrk.name, "Sbrk");
        assert_eq!(sbrk.args, vec![Type::Int]);
        assert_eq!(sbrk.ret, Type::Int);
        assert!(lookup(3).is_none());
    }

    #[test]
    fn test_name_fallback() {
        assert_eq!(name(93), "Exit2");
        assert_eq!(name(7777), "syscall_7777");
    }

    #[test]
    fn test_numbers_are_unique() {
        for (i, a) in SYSCALLS.iter().enumerate() {
            for b in &SYSCALLS[i + 1..] {
                assert_ne!(a.number, b.number, "{} and {}", a.name, b.name);
            }
        }
    }
}
