//! Seekable byte I/O abstraction used by every codec (§4.A).
//!
//! Codecs never touch `std::fs` directly: they read and write through a
//! [`Handle`], so a caller can hand in a file, an in-memory cursor, or any
//! other seekable stream. `Handle` is a thin marker trait, blanket-
//! implemented for anything `Read + Write + Seek`.

use std::{
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom, Write},
};

/// The I/O surface every codec needs: seekable read and write.
///
/// `open`/`close` from the distilled spec's handle contract are realised as
/// ordinary `Handle` construction/drop in Rust — there is no separate slot
/// for them on the trait. The one place the distilled spec calls out `open`
/// being nullable (inhibiting sidecar `.mtl` emission on save) is modelled
/// explicitly in [`crate::formats::obj`] via an `Option<&mut dyn Handle>`
/// parameter for the sidecar, not via this trait.
pub trait Handle: Read + Write + Seek {}

impl<T: Read + Write + Seek + ?Sized> Handle for T {}

/// Reads one byte, returning `None` at EOF (the distilled spec's `fgetc`).
pub fn getc(handle: &mut dyn Handle) -> std::io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match handle.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Reads a single line (newline retained), or `None` on immediate EOF with
/// nothing read (the distilled spec's `fgets`).
pub fn gets(handle: &mut dyn Handle) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();

    loop {
        match getc(handle)? {
            None => break,
            Some(byte) => {
                line.push(byte);
                if byte == b'\n' {
                    break;
                }
            }
        }
    }

    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Writes a string with no added newline (the distilled spec's `fputs`).
pub fn puts(handle: &mut dyn Handle, s: &str) -> std::io::Result<()> {
    handle.write_all(s.as_bytes())
}

// --- little-endian numeric helpers (distilled spec §4.A endian discipline) ---

macro_rules! le_rw {
    ($read_name:ident, $write_name:ident, $ty:ty) => {
        pub fn $read_name(handle: &mut dyn Handle) -> std::io::Result<$ty> {
            let mut buf = [0u8; size_of::<$ty>()];
            handle.read_exact(&mut buf)?;
            Ok(<$ty>::from_le_bytes(buf))
        }

        pub fn $write_name(handle: &mut dyn Handle, value: $ty) -> std::io::Result<()> {
            handle.write_all(&value.to_le_bytes())
        }
    };
}

le_rw!(read_u16_le, write_u16_le, u16);
le_rw!(read_u32_le, write_u32_le, u32);
le_rw!(read_i32_le, write_i32_le, i32);
le_rw!(read_f32_le, write_f32_le, f32);

/// Reads a single byte (endianness irrelevant).
pub fn read_u8(handle: &mut dyn Handle) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    handle.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u8(handle: &mut dyn Handle, value: u8) -> std::io::Result<()> {
    handle.write_all(&[value])
}

/// Reads `count` consecutive little-endian `f32`s.
pub fn read_f32_array_le(handle: &mut dyn Handle, count: usize) -> std::io::Result<Vec<f32>> {
    (0..count).map(|_| read_f32_le(handle)).collect()
}

/// Reads a NUL-terminated ASCII string (3DS object/material names).
pub fn read_cstr(handle: &mut dyn Handle) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(handle)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_cstr(handle: &mut dyn Handle, s: &str) -> std::io::Result<()> {
    handle.write_all(s.as_bytes())?;
    write_u8(handle, 0)
}

/// Returns the current stream position.
pub fn tell(handle: &mut dyn Handle) -> std::io::Result<u64> {
    handle.stream_position()
}

pub fn seek_set(handle: &mut dyn Handle, pos: u64) -> std::io::Result<u64> {
    handle.seek(SeekFrom::Start(pos))
}

/// A named, seekable in-memory handle useful as a save target or test
/// fixture; also usable as a load source via [`Cursor::new`].
pub fn memory_handle(bytes: Vec<u8>) -> Cursor<Vec<u8>> {
    Cursor::new(bytes)
}

pub(crate) fn open_read(path: &std::path::Path) -> std::io::Result<File> {
    File::open(path)
}

pub(crate) fn open_write(path: &std::path::Path) -> std::io::Result<File> {
    File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_le_u32() {
        let mut buf = memory_handle(Vec::new());
        write_u32_le(&mut buf, 0xdead_beef).unwrap();
        buf.set_position(0);
        assert_eq!(read_u32_le(&mut buf).unwrap(), 0xdead_beef);
    }

    #[test]
    fn roundtrip_le_f32() {
        let mut buf = memory_handle(Vec::new());
        write_f32_le(&mut buf, 1.5).unwrap();
        buf.set_position(0);
        assert_eq!(read_f32_le(&mut buf).unwrap(), 1.5);
    }

    #[test]
    fn gets_retains_newline_and_signals_eof() {
        let mut buf = memory_handle(b"line one\nline two".to_vec());
        assert_eq!(gets(&mut buf).unwrap().as_deref(), Some("line one\n"));
        assert_eq!(gets(&mut buf).unwrap().as_deref(), Some("line two"));
        assert_eq!(gets(&mut buf).unwrap(), None);
    }

    #[test]
    fn cstr_roundtrip() {
        let mut buf = memory_handle(Vec::new());
        write_cstr(&mut buf, "hello").unwrap();
        buf.set_position(0);
        assert_eq!(read_cstr(&mut buf).unwrap(), "hello");
    }
}
