//! Line stream reader.

use std::io::{self, prelude::*};

/// Reads `\n`-terminated lines from a buffered reader.
///
/// Unlike [`BufRead::lines`] only the `\n` terminator is removed: a trailing `\r` stays part of the line,
/// so CRLF input is written back unchanged once every line is terminated with `\n` again.
/// A last line without a terminator is yielded as well.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader { reader, buf: Vec::new() }
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                Some(
                    String::from_utf8(std::mem::take(&mut self.buf))
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
                )
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::LineReader;

    #[rstest]
    #[case(b"", vec![])]
    #[case(b"\n", vec![""])]
    #[case(b"f2\nf1\n", vec!["f2", "f1"])]
    #[case(b"f2\nf1", vec!["f2", "f1"])]
    #[case(b"a\r\nb\r\n", vec!["a\r", "b\r"])]
    #[case(b"a\n\nb\n", vec!["a", "", "b"])]
    fn test_line_reader(#[case] input: &[u8], #[case] expected: Vec<&str>) {
        let lines: Vec<String> = LineReader::new(input).collect::<io::Result<_>>().unwrap();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_line_reader_invalid_utf8() {
        let input: &[u8] = b"ok\n\xff\xfe\n";
        let mut reader = LineReader::new(input);

        assert_eq!(reader.next().unwrap().unwrap(), "ok");
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
