//! Buffered line I/O over worker pipes.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

const BUFFER_SIZE: usize = 64 * 1024;

/// Newline-delimited reader.
pub struct LineReader<R: Read> {
    reader: BufReader<R>,
    line: String,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, inner),
            line: String::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF. Blank lines are
    /// skipped.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if self.line.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(self.line.trim_end_matches(['\n', '\r'])));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Newline-delimited writer; every line is flushed immediately.
pub struct LineWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, inner),
        }
    }

    /// Write `line` (which should already end in `\n`) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}

/// Broken pipes mean the other side went away, which workers tolerate.
pub fn is_broken_pipe(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_lines_and_skips_blanks() {
        let mut reader = LineReader::new(Cursor::new("one\n\n  \ntwo\r\nthree"));
        assert_eq!(reader.read_line().unwrap(), Some("one"));
        assert_eq!(reader.read_line().unwrap(), Some("two"));
        assert_eq!(reader.read_line().unwrap(), Some("three"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_writer_flushes_each_line() {
        let mut buffer = Vec::new();
        {
            let mut writer = LineWriter::new(&mut buffer);
            writer.write_line("a\n").unwrap();
            writer.write_line("b\n").unwrap();
        }
        assert_eq!(buffer, b"a\nb\n");
    }

    #[test]
    fn test_broken_pipe_detection() {
        assert!(is_broken_pipe(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_broken_pipe(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
