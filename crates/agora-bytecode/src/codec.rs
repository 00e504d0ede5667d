//! Binary encoder/decoder for bytecode files.
//!
//! Wire layout: the 4-byte signature, one packed version byte, the module
//! name, then one record per function. The first record has no name of its
//! own — it inherits the module name; every later record starts with one.
//! All integers are signed 64-bit little-endian, strings are length-prefixed
//! bytes, booleans are written as int64 0/1, floats as the 8 little-endian
//! bytes of their IEEE-754 representation, instructions as 8-byte words.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::file::{version_byte, File, Fn, Header, K, MAJOR_VERSION, MINOR_VERSION, SIGNATURE};
use crate::instr::{Instr, Opcode};

#[derive(Debug, Error)]
pub enum CodecError {
    /// A short read, a negative length, or a malformed structure.
    #[error("invalid data")]
    InvalidData,
    /// The file's packed version byte differs from the codec's.
    #[error("version mismatch")]
    VersionMismatch,
    /// A constant entry carries an unrecognized kind tag.
    #[error("invalid constant type")]
    InvalidKType,
    /// An instruction's opcode byte is outside the known set.
    #[error("unknown opcode")]
    UnknownOpcode,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Truncated input inside a record is a format error, not an I/O failure.
fn eof_is_invalid(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::InvalidData
    } else {
        CodecError::Io(e)
    }
}

fn read_u8(r: &mut impl Read) -> Result<u8, CodecError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(eof_is_invalid)?;
    Ok(b[0])
}

fn read_i64(r: &mut impl Read) -> Result<i64, CodecError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(eof_is_invalid)?;
    Ok(i64::from_le_bytes(b))
}

fn read_u64(r: &mut impl Read) -> Result<u64, CodecError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(eof_is_invalid)?;
    Ok(u64::from_le_bytes(b))
}

/// Read an int64, distinguishing a clean end of stream (`None`) from a
/// truncated value (`invalid data`).
fn read_i64_or_eof(r: &mut impl Read) -> Result<Option<i64>, CodecError> {
    let mut b = [0u8; 8];
    let mut filled = 0;
    while filled < b.len() {
        match r.read(&mut b[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(CodecError::InvalidData),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(Some(i64::from_le_bytes(b)))
}

fn read_len(r: &mut impl Read) -> Result<usize, CodecError> {
    let n = read_i64(r)?;
    usize::try_from(n).map_err(|_| CodecError::InvalidData)
}

fn read_string_of_len(r: &mut impl Read, len: usize) -> Result<String, CodecError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(eof_is_invalid)?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidData)
}

fn read_string(r: &mut impl Read) -> Result<String, CodecError> {
    let len = read_len(r)?;
    read_string_of_len(r, len)
}

fn write_i64(w: &mut impl Write, v: i64) -> Result<(), CodecError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_string(w: &mut impl Write, s: &str) -> Result<(), CodecError> {
    write_i64(w, s.len() as i64)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Decode a bytecode stream into a [`File`].
///
/// The version byte is checked before anything else is built, so a
/// `version mismatch` has no partial output. A stream that ends cleanly
/// right after the header decodes to an empty file, and a clean end before
/// a subsequent function name ends the function list; any other truncation
/// is `invalid data`.
pub fn decode(r: &mut impl Read) -> Result<File, CodecError> {
    let mut sig = [0u8; 4];
    r.read_exact(&mut sig).map_err(eof_is_invalid)?;
    if sig != SIGNATURE {
        return Err(CodecError::InvalidData);
    }
    if read_u8(r)? != version_byte() {
        return Err(CodecError::VersionMismatch);
    }

    let mut file = File {
        name: String::new(),
        major_version: MAJOR_VERSION,
        minor_version: MINOR_VERSION,
        fns: Vec::new(),
    };

    // The module name doubles as the first function's name; its absence is a
    // legal empty file.
    match read_i64_or_eof(r)? {
        None => return Ok(file),
        Some(n) => {
            let len = usize::try_from(n).map_err(|_| CodecError::InvalidData)?;
            file.name = read_string_of_len(r, len)?;
        }
    }

    // First record: no name of its own, and a clean end of stream here means
    // a named but empty module.
    match read_i64_or_eof(r)? {
        None => return Ok(file),
        Some(stack_sz) => {
            let name = file.name.clone();
            file.fns.push(read_fn(r, name, stack_sz)?);
        }
    }

    // Subsequent records each start with their name.
    loop {
        let name = match read_i64_or_eof(r)? {
            None => break,
            Some(n) => {
                let len = usize::try_from(n).map_err(|_| CodecError::InvalidData)?;
                read_string_of_len(r, len)?
            }
        };
        let stack_sz = read_i64(r)?;
        file.fns.push(read_fn(r, name, stack_sz)?);
    }
    Ok(file)
}

fn read_fn(r: &mut impl Read, name: String, stack_sz: i64) -> Result<Fn, CodecError> {
    let header = Header {
        name,
        stack_sz,
        exp_args: read_i64(r)?,
        parent_fn_ix: read_i64(r)?,
        line_start: read_i64(r)?,
        line_end: read_i64(r)?,
    };

    let mut ks = Vec::new();
    for _ in 0..read_len(r)? {
        ks.push(read_k(r)?);
    }

    let mut ls = Vec::new();
    for _ in 0..read_len(r)? {
        ls.push(read_i64(r)?);
    }

    let mut is = Vec::new();
    for _ in 0..read_len(r)? {
        let word = read_u64(r)?;
        let instr = Instr::from_word(word);
        if instr.opcode().is_none() {
            return Err(CodecError::UnknownOpcode);
        }
        is.push(instr);
    }

    Ok(Fn { header, ks, ls, is })
}

fn read_k(r: &mut impl Read) -> Result<K, CodecError> {
    match read_u8(r)? {
        b'B' => Ok(K::Bool(read_i64(r)? != 0)),
        b'i' => Ok(K::Int(read_i64(r)?)),
        b'f' => Ok(K::Float(f64::from_bits(read_u64(r)?))),
        b's' => Ok(K::Str(read_string(r)?)),
        _ => Err(CodecError::InvalidKType),
    }
}

/// Encode a [`File`] to its binary form, stamped with the current codec
/// version. The inverse of [`decode`] for well-formed files (those whose
/// first function carries the module name).
pub fn encode(f: &File, w: &mut impl Write) -> Result<(), CodecError> {
    w.write_all(&SIGNATURE)?;
    w.write_all(&[version_byte()])?;
    write_string(w, &f.name)?;
    for (i, func) in f.fns.iter().enumerate() {
        if i > 0 {
            write_string(w, &func.header.name)?;
        }
        write_fn(w, func)?;
    }
    Ok(())
}

fn write_fn(w: &mut impl Write, f: &Fn) -> Result<(), CodecError> {
    write_i64(w, f.header.stack_sz)?;
    write_i64(w, f.header.exp_args)?;
    write_i64(w, f.header.parent_fn_ix)?;
    write_i64(w, f.header.line_start)?;
    write_i64(w, f.header.line_end)?;

    write_i64(w, f.ks.len() as i64)?;
    for k in &f.ks {
        w.write_all(&[k.tag()])?;
        match k {
            K::Bool(b) => write_i64(w, *b as i64)?,
            K::Int(n) => write_i64(w, *n)?,
            K::Float(n) => w.write_all(&n.to_bits().to_le_bytes())?,
            K::Str(s) => write_string(w, s)?,
        }
    }

    write_i64(w, f.ls.len() as i64)?;
    for l in &f.ls {
        write_i64(w, *l)?;
    }

    write_i64(w, f.is.len() as i64)?;
    for i in &f.is {
        w.write_all(&i.word().to_le_bytes())?;
    }
    Ok(())
}
