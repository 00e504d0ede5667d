//! Packed 64-bit instruction words and the opcode/flag enumerations.

use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{EnumCount, EnumIter};

/// Operation codes for the agora stack VM.
///
/// Discriminants are part of the binary format and must stay stable; any
/// byte at or above `Opcode::COUNT` fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
#[repr(u8)]
pub enum Opcode {
    Ret = 0,
    Push,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Unm,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Test,
    Jmp,
    New,
    Sfld,
    Gfld,
    Cfld,
    Call,
    Yld,
    Rngs,
    Rngp,
    Rnge,
    Dump,
}

impl Opcode {
    /// Decode a raw byte, rejecting anything outside the enumeration.
    pub fn from_byte(b: u8) -> Option<Opcode> {
        Opcode::iter().find(|op| *op as u8 == b)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Ret => "RET",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Not => "NOT",
            Opcode::Unm => "UNM",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::Lt => "LT",
            Opcode::Lte => "LTE",
            Opcode::Gt => "GT",
            Opcode::Gte => "GTE",
            Opcode::Test => "TEST",
            Opcode::Jmp => "JMP",
            Opcode::New => "NEW",
            Opcode::Sfld => "SFLD",
            Opcode::Gfld => "GFLD",
            Opcode::Cfld => "CFLD",
            Opcode::Call => "CALL",
            Opcode::Yld => "YLD",
            Opcode::Rngs => "RNGS",
            Opcode::Rngp => "RNGP",
            Opcode::Rnge => "RNGE",
            Opcode::Dump => "DUMP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Addressing flags qualifying an instruction's index operand.
///
/// `K` names a constant, `V` a variable, `N` nil, `T` the call's `this`,
/// `F` a function prototype, `A` the call's `args` object. `Jf`/`Jb` select
/// the jump direction, `An` carries an argument count, `Sn` a stack count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
#[repr(u8)]
pub enum Flag {
    None = 0,
    K,
    V,
    N,
    T,
    F,
    A,
    Jf,
    Jb,
    An,
    Sn,
}

impl Flag {
    pub fn from_byte(b: u8) -> Option<Flag> {
        Flag::iter().find(|flg| *flg as u8 == b)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Flag::None => "_",
            Flag::K => "K",
            Flag::V => "V",
            Flag::N => "N",
            Flag::T => "T",
            Flag::F => "F",
            Flag::A => "A",
            Flag::Jf => "Jf",
            Flag::Jb => "Jb",
            Flag::An => "An",
            Flag::Sn => "Sn",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A packed instruction word.
///
/// Bit layout, low to high: index in bits 0–31 (opcodes use the low 24 or
/// 32 bits of it), bits 32–47 reserved, flag in bits 48–55, opcode in bits
/// 56–63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr(u64);

impl Instr {
    pub fn new(op: Opcode, flg: Flag, ix: u64) -> Instr {
        Instr((op as u64) << 56 | (flg as u64) << 48 | (ix & 0xffff_ffff))
    }

    /// Wrap a raw word read from a bytecode stream. The opcode byte is not
    /// validated here; the decoder rejects unknown opcodes.
    pub fn from_word(w: u64) -> Instr {
        Instr(w)
    }

    pub fn word(self) -> u64 {
        self.0
    }

    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_byte((self.0 >> 56) as u8)
    }

    pub fn flag(self) -> Option<Flag> {
        Flag::from_byte((self.0 >> 48) as u8)
    }

    pub fn index(self) -> u64 {
        self.0 & 0xffff_ffff
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.opcode() {
            Some(op) => op.mnemonic(),
            None => "???",
        };
        let flg = match self.flag() {
            Some(flg) => flg.mnemonic(),
            None => "???",
        };
        write!(f, "{} {} {}", op, flg, self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;

    #[test]
    fn test_pack_unpack() {
        let i = Instr::new(Opcode::Push, Flag::K, 12);
        assert_eq!(i.opcode(), Some(Opcode::Push));
        assert_eq!(i.flag(), Some(Flag::K));
        assert_eq!(i.index(), 12);
    }

    #[test]
    fn test_index_masked_to_32_bits() {
        let i = Instr::new(Opcode::Jmp, Flag::Jf, u64::MAX);
        assert_eq!(i.index(), 0xffff_ffff);
        assert_eq!(i.opcode(), Some(Opcode::Jmp));
    }

    #[test]
    fn test_ret_is_the_zero_word() {
        let i = Instr::new(Opcode::Ret, Flag::None, 0);
        assert_eq!(i.word(), 0);
    }

    #[test]
    fn test_opcode_byte_roundtrip() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_byte(Opcode::COUNT as u8), None);
        assert_eq!(Opcode::from_byte(0xff), None);
    }

    #[test]
    fn test_flag_byte_roundtrip() {
        for flg in Flag::iter() {
            assert_eq!(Flag::from_byte(flg as u8), Some(flg));
        }
        assert_eq!(Flag::from_byte(Flag::COUNT as u8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instr::new(Opcode::Push, Flag::K, 1).to_string(), "PUSH K 1");
        assert_eq!(Instr::new(Opcode::Ret, Flag::None, 0).to_string(), "RET _ 0");
        assert_eq!(Instr::new(Opcode::Call, Flag::An, 2).to_string(), "CALL An 2");
    }

    #[test]
    fn test_display_unknown_opcode() {
        let i = Instr::from_word(0xff << 56);
        assert_eq!(i.opcode(), None);
        assert_eq!(i.to_string(), "??? ??? 0");
    }
}
