//! RV32IMF registers and the instruction subset the code generator emits,
//! with RARS-compatible rendering.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Zero,
    Ra,
    Sp,
    Gp,
    Tp,
    Fp,
    A(u8),
    T(u8),
    S(u8),
}

impl Reg {
    /// The integer target bank: t0-t6 first, then the callee-saved s1-s11
    /// (s0 is the frame pointer and stays out of the bank).
    pub fn target(index: u8) -> Reg {
        match index {
            0..=6 => Reg::T(index),
            7..=17 => Reg::S(index - 6),
            _ => panic!("integer target bank exhausted: {}", index),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reg::Zero => write!(f, "zero"),
            Reg::Ra => write!(f, "ra"),
            Reg::Sp => write!(f, "sp"),
            Reg::Gp => write!(f, "gp"),
            Reg::Tp => write!(f, "tp"),
            Reg::Fp => write!(f, "fp"),
            Reg::A(n) => write!(f, "a{}", n),
            Reg::T(n) => write!(f, "t{}", n),
            Reg::S(n) => write!(f, "s{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FReg {
    Fa(u8),
    Ft(u8),
    Fs(u8),
}

impl FReg {
    /// The float target bank: ft0-ft11, then fs0-fs11.
    pub fn target(index: u8) -> FReg {
        match index {
            0..=11 => FReg::Ft(index),
            12..=23 => FReg::Fs(index - 12),
            _ => panic!("float target bank exhausted: {}", index),
        }
    }
}

impl fmt::Display for FReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FReg::Fa(n) => write!(f, "fa{}", n),
            FReg::Ft(n) => write!(f, "ft{}", n),
            FReg::Fs(n) => write!(f, "fs{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Li(Reg, i32),
    La(Reg, String),
    Mv(Reg, Reg),
    Neg(Reg, Reg),
    Not(Reg, Reg),
    Seqz(Reg, Reg),
    Add(Reg, Reg, Reg),
    Addi(Reg, Reg, i32),
    Sub(Reg, Reg, Reg),
    Mul(Reg, Reg, Reg),
    Div(Reg, Reg, Reg),
    Rem(Reg, Reg, Reg),
    And(Reg, Reg, Reg),
    Or(Reg, Reg, Reg),
    Xor(Reg, Reg, Reg),
    Xori(Reg, Reg, i32),
    Sll(Reg, Reg, Reg),
    Srl(Reg, Reg, Reg),
    Slli(Reg, Reg, i32),
    Lw(Reg, i32, Reg),
    Sw(Reg, i32, Reg),
    Flw(FReg, i32, Reg),
    Fsw(FReg, i32, Reg),
    Beq(Reg, Reg, String),
    Bne(Reg, Reg, String),
    Blt(Reg, Reg, String),
    Ble(Reg, Reg, String),
    Bgt(Reg, Reg, String),
    Bge(Reg, Reg, String),
    Beqz(Reg, String),
    Bnez(Reg, String),
    J(String),
    Jr(Reg),
    Jalr(Reg),
    Ecall,
    FaddS(FReg, FReg, FReg),
    FsubS(FReg, FReg, FReg),
    FmulS(FReg, FReg, FReg),
    FdivS(FReg, FReg, FReg),
    FsqrtS(FReg, FReg),
    FmvS(FReg, FReg),
    FcvtSW(FReg, Reg),
    FeqS(Reg, FReg, FReg),
    FltS(Reg, FReg, FReg),
    FleS(Reg, FReg, FReg),
}

impl Instr {
    /// The integer register this instruction writes, if any. Used to audit
    /// the target-register discipline.
    pub fn int_dest(&self) -> Option<Reg> {
        match self {
            Instr::Li(rd, _)
            | Instr::La(rd, _)
            | Instr::Mv(rd, _)
            | Instr::Neg(rd, _)
            | Instr::Not(rd, _)
            | Instr::Seqz(rd, _)
            | Instr::Add(rd, ..)
            | Instr::Addi(rd, ..)
            | Instr::Sub(rd, ..)
            | Instr::Mul(rd, ..)
            | Instr::Div(rd, ..)
            | Instr::Rem(rd, ..)
            | Instr::And(rd, ..)
            | Instr::Or(rd, ..)
            | Instr::Xor(rd, ..)
            | Instr::Xori(rd, ..)
            | Instr::Sll(rd, ..)
            | Instr::Srl(rd, ..)
            | Instr::Slli(rd, ..)
            | Instr::Lw(rd, ..)
            | Instr::FeqS(rd, ..)
            | Instr::FltS(rd, ..)
            | Instr::FleS(rd, ..) => Some(*rd),
            Instr::Jalr(_) => Some(Reg::Ra),
            _ => None,
        }
    }

    /// The float register this instruction writes, if any.
    pub fn float_dest(&self) -> Option<FReg> {
        match self {
            Instr::Flw(fd, ..)
            | Instr::FaddS(fd, ..)
            | Instr::FsubS(fd, ..)
            | Instr::FmulS(fd, ..)
            | Instr::FdivS(fd, ..)
            | Instr::FsqrtS(fd, ..)
            | Instr::FmvS(fd, ..)
            | Instr::FcvtSW(fd, ..) => Some(*fd),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instr::Li(rd, imm) => write!(f, "li {}, {}", rd, imm),
            Instr::La(rd, label) => write!(f, "la {}, {}", rd, label),
            Instr::Mv(rd, rs) => write!(f, "mv {}, {}", rd, rs),
            Instr::Neg(rd, rs) => write!(f, "neg {}, {}", rd, rs),
            Instr::Not(rd, rs) => write!(f, "not {}, {}", rd, rs),
            Instr::Seqz(rd, rs) => write!(f, "seqz {}, {}", rd, rs),
            Instr::Add(rd, rs1, rs2) => write!(f, "add {}, {}, {}", rd, rs1, rs2),
            Instr::Addi(rd, rs, imm) => write!(f, "addi {}, {}, {}", rd, rs, imm),
            Instr::Sub(rd, rs1, rs2) => write!(f, "sub {}, {}, {}", rd, rs1, rs2),
            Instr::Mul(rd, rs1, rs2) => write!(f, "mul {}, {}, {}", rd, rs1, rs2),
            Instr::Div(rd, rs1, rs2) => write!(f, "div {}, {}, {}", rd, rs1, rs2),
            Instr::Rem(rd, rs1, rs2) => write!(f, "rem {}, {}, {}", rd, rs1, rs2),
            Instr::And(rd, rs1, rs2) => write!(f, "and {}, {}, {}", rd, rs1, rs2),
            Instr::Or(rd, rs1, rs2) => write!(f, "or {}, {}, {}", rd, rs1, rs2),
            Instr::Xor(rd, rs1, rs2) => write!(f, "xor {}, {}, {}", rd, rs1, rs2),
            Instr::Xori(rd, rs, imm) => write!(f, "xori {}, {}, {}", rd, rs, imm),
            Instr::Sll(rd, rs1, rs2) => write!(f, "sll {}, {}, {}", rd, rs1, rs2),
            Instr::Srl(rd, rs1, rs2) => write!(f, "srl {}, {}, {}", rd, rs1, rs2),
            Instr::Slli(rd, rs, imm) => write!(f, "slli {}, {}, {}", rd, rs, imm),
            Instr::Lw(rd, offset, base) => write!(f, "lw {}, {}({})", rd, offset, base),
            Instr::Sw(rs, offset, base) => write!(f, "sw {}, {}({})", rs, offset, base),
            Instr::Flw(fd, offset, base) => write!(f, "flw {}, {}({})", fd, offset, base),
            Instr::Fsw(fs, offset, base) => write!(f, "fsw {}, {}({})", fs, offset, base),
            Instr::Beq(rs1, rs2, label) => write!(f, "beq {}, {}, {}", rs1, rs2, label),
            Instr::Bne(rs1, rs2, label) => write!(f, "bne {}, {}, {}", rs1, rs2, label),
            Instr::Blt(rs1, rs2, label) => write!(f, "blt {}, {}, {}", rs1, rs2, label),
            Instr::Ble(rs1, rs2, label) => write!(f, "ble {}, {}, {}", rs1, rs2, label),
            Instr::Bgt(rs1, rs2, label) => write!(f, "bgt {}, {}, {}", rs1, rs2, label),
            Instr::Bge(rs1, rs2, label) => write!(f, "bge {}, {}, {}", rs1, rs2, label),
            Instr::Beqz(rs, label) => write!(f, "beqz {}, {}", rs, label),
            Instr::Bnez(rs, label) => write!(f, "bnez {}, {}", rs, label),
            Instr::J(label) => write!(f, "j {}", label),
            Instr::Jr(rs) => write!(f, "jr {}", rs),
            Instr::Jalr(rs) => write!(f, "jalr {}", rs),
            Instr::Ecall => write!(f, "ecall"),
            Instr::FaddS(fd, fs1, fs2) => write!(f, "fadd.s {}, {}, {}", fd, fs1, fs2),
            Instr::FsubS(fd, fs1, fs2) => write!(f, "fsub.s {}, {}, {}", fd, fs1, fs2),
            Instr::FmulS(fd, fs1, fs2) => write!(f, "fmul.s {}, {}, {}", fd, fs1, fs2),
            Instr::FdivS(fd, fs1, fs2) => write!(f, "fdiv.s {}, {}, {}", fd, fs1, fs2),
            Instr::FsqrtS(fd, fs) => write!(f, "fsqrt.s {}, {}", fd, fs),
            Instr::FmvS(fd, fs) => write!(f, "fmv.s {}, {}", fd, fs),
            Instr::FcvtSW(fd, rs) => write!(f, "fcvt.s.w {}, {}", fd, rs),
            Instr::FeqS(rd, fs1, fs2) => write!(f, "feq.s {}, {}, {}", rd, fs1, fs2),
            Instr::FltS(rd, fs1, fs2) => write!(f, "flt.s {}, {}, {}", rd, fs1, fs2),
            Instr::FleS(rd, fs1, fs2) => write!(f, "fle.s {}, {}, {}", rd, fs1, fs2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_banks() {
        assert_eq!(Reg::target(0), Reg::T(0));
        assert_eq!(Reg::target(6), Reg::T(6));
        assert_eq!(Reg::target(7), Reg::S(1));
        assert_eq!(Reg::target(17), Reg::S(11));
        assert_eq!(FReg::target(0), FReg::Ft(0));
        assert_eq!(FReg::target(12), FReg::Fs(0));
    }

    #[test]
    #[should_panic(expected = "target bank exhausted")]
    fn test_target_bank_overflow_panics() {
        Reg::target(18);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instr::Li(Reg::T(0), 42).to_string(), "li t0, 42");
        assert_eq!(
            Instr::Lw(Reg::T(1), 4, Reg::T(0)).to_string(),
            "lw t1, 4(t0)"
        );
        assert_eq!(
            Instr::FaddS(FReg::Ft(0), FReg::Ft(0), FReg::Ft(1)).to_string(),
            "fadd.s ft0, ft0, ft1"
        );
        assert_eq!(
            Instr::Beq(Reg::T(0), Reg::T(1), "l1".to_owned()).to_string(),
            "beq t0, t1, l1"
        );
        assert_eq!(Instr::Jalr(Reg::T(2)).to_string(), "jalr t2");
    }

    #[test]
    fn test_dest_tracking() {
        assert_eq!(Instr::Li(Reg::T(3), 1).int_dest(), Some(Reg::T(3)));
        assert_eq!(Instr::Sw(Reg::T(3), 0, Reg::Sp).int_dest(), None);
        assert_eq!(
            Instr::FsqrtS(FReg::Ft(2), FReg::Ft(2)).float_dest(),
            Some(FReg::Ft(2))
        );
        assert_eq!(Instr::Ecall.int_dest(), None);
    }
}
