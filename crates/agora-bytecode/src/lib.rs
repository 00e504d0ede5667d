//! Binary bytecode format for the agora scripting language.
//!
//! A compiled module is stored as a [`File`]: a signed header followed by one
//! record per function. This crate owns the data model ([`File`], [`Fn`],
//! [`K`]), the packed 64-bit instruction word ([`Instr`] with its [`Opcode`]
//! and [`Flag`] enumerations), and the binary codec ([`encode`] / [`decode`]).
//! Producing bytecode (the compiler) and executing it (the VM) live in
//! separate crates.

mod codec;
mod file;
mod instr;

pub use codec::{decode, encode, CodecError};
pub use file::{version_byte, File, Fn, Header, K, MAJOR_VERSION, MINOR_VERSION, SIGNATURE};
pub use instr::{Flag, Instr, Opcode};
