use std::io::Read;

/// Read from `src` until `buf` is full or the source runs dry.
///
/// Returns `(eof, filled)` where `eof` is true when the source returned a
/// zero-length read before `buf` was full. A full buffer with `eof == false`
/// says nothing about whether more data follows.
pub fn fill_buf<R: Read>(src: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut filled = 0;

    while filled < buf.len() {
        match src.read(&mut buf[filled..])? {
            0 => return Ok((true, filled)),
            n => filled += n,
        }
    }
    Ok((false, filled))
}
