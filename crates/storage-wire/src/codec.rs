//! Framed read/write of the storage protocol over anything `Read`/`Write`.
//!
//! Every multi-byte integer is native-endian: the protocol is meant for a
//! single host (client and server always run on the same machine, talking
//! over a Unix-domain socket), so there is no cross-host compatibility goal
//! to pay byte-swapping for.
//!
//! All reads and writes here are short-read/short-write safe: they loop
//! until the exact requested count has been transferred, retry on
//! `Interrupted`, and turn EOF-before-completion (on read) or a broken pipe
//! (on write) into [`WireError::Disconnected`].

use std::io::{ErrorKind, Read, Write};

use crate::error::{WireError, WireResult};
use crate::message::{FileBlob, OkBody, Request};
use crate::opcode::Opcode;
use crate::response::ResponseCode;

/// Upper bound on any single size-prefixed field, independent of the
/// storage engine's own capacity policy. See [`WireError::FrameTooLarge`].
pub const MAX_FRAME_LEN: u64 = 1 << 30;

fn read_exact_retry<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> WireResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(WireError::Disconnected),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(())
}

fn write_all_retry<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> WireResult<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => return Err(WireError::Disconnected),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(WireError::Disconnected),
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(())
}

pub fn read_opcode<R: Read + ?Sized>(reader: &mut R) -> WireResult<Opcode> {
    let mut byte = [0u8; 1];
    read_exact_retry(reader, &mut byte)?;
    Opcode::try_from(byte[0])
}

pub fn write_opcode<W: Write + ?Sized>(writer: &mut W, opcode: Opcode) -> WireResult<()> {
    write_all_retry(writer, &[opcode.as_u8()])
}

pub fn read_response_code<R: Read + ?Sized>(reader: &mut R) -> WireResult<ResponseCode> {
    let mut byte = [0u8; 1];
    read_exact_retry(reader, &mut byte)?;
    ResponseCode::try_from(byte[0])
}

pub fn write_response_code<W: Write + ?Sized>(writer: &mut W, code: ResponseCode) -> WireResult<()> {
    write_all_retry(writer, &[code.as_u8()])
}

pub fn read_size<R: Read + ?Sized>(reader: &mut R) -> WireResult<u64> {
    let mut bytes = [0u8; 8];
    read_exact_retry(reader, &mut bytes)?;
    Ok(u64::from_ne_bytes(bytes))
}

pub fn write_size<W: Write + ?Sized>(writer: &mut W, size: u64) -> WireResult<()> {
    write_all_retry(writer, &size.to_ne_bytes())
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> WireResult<i32> {
    let mut bytes = [0u8; 4];
    read_exact_retry(reader, &mut bytes)?;
    Ok(i32::from_ne_bytes(bytes))
}

pub fn write_i32<W: Write + ?Sized>(writer: &mut W, value: i32) -> WireResult<()> {
    write_all_retry(writer, &value.to_ne_bytes())
}

/// Reads a size-prefixed, NUL-terminated path. The size prefix counts the
/// terminator, so a one-byte path `"a"` is transmitted as size `2`.
pub fn read_path<R: Read + ?Sized>(reader: &mut R) -> WireResult<String> {
    let size = read_size(reader)?;
    if size == 0 {
        return Err(WireError::MissingPathTerminator);
    }
    if size > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(size));
    }
    #[expect(clippy::cast_possible_truncation, reason = "size already bounded by MAX_FRAME_LEN")]
    let mut buf = vec![0u8; size as usize];
    read_exact_retry(reader, &mut buf)?;
    if buf.pop() != Some(0) {
        return Err(WireError::MissingPathTerminator);
    }
    String::from_utf8(buf).map_err(|_| WireError::InvalidPathEncoding)
}

/// Writes `path` size-prefixed and NUL-terminated.
pub fn write_path<W: Write + ?Sized>(writer: &mut W, path: &str) -> WireResult<()> {
    let size = path.len() as u64 + 1;
    write_size(writer, size)?;
    write_all_retry(writer, path.as_bytes())?;
    write_all_retry(writer, &[0u8])
}

/// Reads a size-prefixed blob. Size may be `0`, in which case no bytes follow.
pub fn read_blob<R: Read + ?Sized>(reader: &mut R) -> WireResult<Vec<u8>> {
    let size = read_size(reader)?;
    if size > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(size));
    }
    #[expect(clippy::cast_possible_truncation, reason = "size already bounded by MAX_FRAME_LEN")]
    let mut buf = vec![0u8; size as usize];
    read_exact_retry(reader, &mut buf)?;
    Ok(buf)
}

/// Writes `content` size-prefixed; an empty slice writes only the zero size.
pub fn write_blob<W: Write + ?Sized>(writer: &mut W, content: &[u8]) -> WireResult<()> {
    write_size(writer, content.len() as u64)?;
    write_all_retry(writer, content)
}

fn read_file_blob<R: Read + ?Sized>(reader: &mut R) -> WireResult<FileBlob> {
    let path = read_path(reader)?;
    let content = read_blob(reader)?;
    Ok(FileBlob { path, content })
}

fn write_file_blob<W: Write + ?Sized>(writer: &mut W, blob: &FileBlob) -> WireResult<()> {
    write_path(writer, &blob.path)?;
    write_blob(writer, &blob.content)
}

/// Reads one full request frame: opcode plus whatever fields that opcode carries.
pub fn read_request<R: Read + ?Sized>(reader: &mut R) -> WireResult<(Opcode, Request)> {
    let opcode = read_opcode(reader)?;
    let request = match opcode {
        Opcode::OpenNoFlags | Opcode::OpenCreate | Opcode::OpenLock | Opcode::OpenCreateLock => {
            let path = read_path(reader)?;
            Request::Open {
                path,
                create: opcode.opens_with_create(),
                lock: opcode.opens_with_lock(),
            }
        }
        Opcode::Write => {
            let path = read_path(reader)?;
            let content = read_blob(reader)?;
            Request::Write { path, content }
        }
        Opcode::Append => {
            let path = read_path(reader)?;
            let content = read_blob(reader)?;
            Request::Append { path, content }
        }
        Opcode::Read => Request::Read { path: read_path(reader)? },
        Opcode::ReadMany => Request::ReadMany { count: read_i32(reader)? },
        Opcode::Lock => Request::Lock { path: read_path(reader)? },
        Opcode::Unlock => Request::Unlock { path: read_path(reader)? },
        Opcode::Remove => Request::Remove { path: read_path(reader)? },
        Opcode::Close => Request::Close { path: read_path(reader)? },
    };
    Ok((opcode, request))
}

/// Writes one full request frame. Used by test harnesses and any future
/// client-side tooling that needs to drive the protocol directly.
pub fn write_request<W: Write + ?Sized>(writer: &mut W, opcode: Opcode, request: &Request) -> WireResult<()> {
    write_opcode(writer, opcode)?;
    match request {
        Request::Open { path, .. } => write_path(writer, path),
        Request::Write { path, content } | Request::Append { path, content } => {
            write_path(writer, path)?;
            write_blob(writer, content)
        }
        Request::Read { path } | Request::Lock { path } | Request::Unlock { path } | Request::Remove { path } | Request::Close { path } => {
            write_path(writer, path)
        }
        Request::ReadMany { count } => write_i32(writer, *count),
    }
}

/// Writes a full response frame: response code, plus the `Ok` payload if any.
pub fn write_response<W: Write + ?Sized>(writer: &mut W, code: ResponseCode, body: &OkBody) -> WireResult<()> {
    write_response_code(writer, code)?;
    if !code.is_ok() {
        return Ok(());
    }
    match body {
        OkBody::Empty => Ok(()),
        OkBody::Content(bytes) => write_blob(writer, bytes),
        OkBody::Many(files) => {
            write_size(writer, files.len() as u64)?;
            for file in files {
                write_file_blob(writer, file)?;
            }
            Ok(())
        }
        OkBody::Evicted(files) => {
            write_size(writer, files.len() as u64)?;
            for file in files {
                write_file_blob(writer, file)?;
            }
            Ok(())
        }
    }
}

/// Reads a response frame produced for `opcode`'s request. The caller must
/// supply the originating opcode because the payload shape of a successful
/// response depends on it (e.g. `read` carries content, `lock` carries
/// nothing).
pub fn read_response<R: Read + ?Sized>(reader: &mut R, opcode: Opcode) -> WireResult<(ResponseCode, OkBody)> {
    let code = read_response_code(reader)?;
    if !code.is_ok() {
        return Ok((code, OkBody::Empty));
    }
    let body = match opcode {
        Opcode::Read => OkBody::Content(read_blob(reader)?),
        Opcode::ReadMany => {
            let count = read_size(reader)?;
            if count > MAX_FRAME_LEN {
                return Err(WireError::FrameTooLarge(count));
            }
            let mut files = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                files.push(read_file_blob(reader)?);
            }
            OkBody::Many(files)
        }
        Opcode::Write | Opcode::Append => {
            let count = read_size(reader)?;
            if count > MAX_FRAME_LEN {
                return Err(WireError::FrameTooLarge(count));
            }
            let mut files = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                files.push(read_file_blob(reader)?);
            }
            OkBody::Evicted(files)
        }
        _ => OkBody::Empty,
    };
    Ok((code, body))
}
