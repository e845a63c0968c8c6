//! Sorted chunks spilled to the scratch directory.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use log;
use tempfile;

use crate::line::LineReader;

const SPILL_PREFIX: &str = ".disk-sort-";
const SPILL_SUFFIX: &str = ".spill";

/// External chunk error.
#[derive(Debug)]
pub enum ExternalChunkError<S: Error> {
    /// Spill file creation error.
    TempFile(io::Error),
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(S),
}

impl<S: Error + 'static> Error for ExternalChunkError<S> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            ExternalChunkError::TempFile(err) => err,
            ExternalChunkError::IO(err) => err,
            ExternalChunkError::SerializationError(err) => err,
        })
    }
}

impl<S: Error> Display for ExternalChunkError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ExternalChunkError::TempFile(err) => write!(f, "spill file not created: {}", err),
            ExternalChunkError::IO(err) => write!(f, "spill file I/O failed: {}", err),
            ExternalChunkError::SerializationError(err) => write!(f, "data serialization error: {}", err),
        }
    }
}

impl<S: Error> From<io::Error> for ExternalChunkError<S> {
    fn from(err: io::Error) -> Self {
        ExternalChunkError::IO(err)
    }
}

/// Text spill serialization error: the line holds a `\n` and would be split on read back.
#[derive(Debug)]
pub struct EmbeddedTerminatorError {
    /// Byte offset of the first `\n` inside the line.
    pub position: usize,
}

impl Error for EmbeddedTerminatorError {}

impl Display for EmbeddedTerminatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line contains a line terminator at byte {}", self.position)
    }
}

/// Uniquely named temporary file owned by a single sort invocation.
/// The file is removed from the scratch directory when the handle is dropped.
pub struct SpillFile {
    file: tempfile::NamedTempFile,
}

impl SpillFile {
    /// Creates a new empty spill file inside `dir`.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(SPILL_PREFIX)
            .suffix(SPILL_SUFFIX)
            .tempfile_in(dir)?;
        log::trace!("spill file {} created", file.path().display());

        Ok(SpillFile { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn as_file(&self) -> &fs::File {
        self.file.as_file()
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        log::trace!("spill file {} released", self.file.path().display());
    }
}

/// External chunk interface. Provides methods for creating a chunk stored on file system and reading lines from it.
pub trait ExternalChunk: Sized + Iterator<Item = Result<String, Self::DeserializationError>> {
    type SerializationError: Error;
    type DeserializationError: Error;

    /// Builds an instance of an external chunk: creates a spill file in `dir`, dumps `lines` to it
    /// and rewinds it so it can be read right away.
    ///
    /// Lines are expected to be sorted already.
    fn build(
        dir: &Path,
        lines: impl IntoIterator<Item = String>,
        buf_size: Option<usize>,
    ) -> Result<Self, ExternalChunkError<Self::SerializationError>> {
        let spill = SpillFile::create_in(dir).map_err(ExternalChunkError::TempFile)?;

        let mut chunk_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, spill.as_file().try_clone()?),
            None => io::BufWriter::new(spill.as_file().try_clone()?),
        };

        Self::dump(&mut chunk_writer, lines)?;

        chunk_writer.flush()?;

        let mut chunk_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, spill.as_file().try_clone()?),
            None => io::BufReader::new(spill.as_file().try_clone()?),
        };

        chunk_reader.rewind()?;
        let file_len = spill.as_file().metadata()?.len();

        return Ok(Self::new(spill, chunk_reader.take(file_len)));
    }

    /// Creates an instance of an external chunk reading from a rewound spill file.
    fn new(spill: SpillFile, reader: io::Take<io::BufReader<fs::File>>) -> Self;

    /// Dumps lines to an external file.
    fn dump(
        chunk_writer: &mut io::BufWriter<fs::File>,
        lines: impl IntoIterator<Item = String>,
    ) -> Result<(), ExternalChunkError<Self::SerializationError>>;

    /// Hands back a read error as a plain I/O failure if it is one, or as is if the stored data could not be decoded.
    fn io_error(err: Self::DeserializationError) -> Result<io::Error, Self::DeserializationError> {
        Err(err)
    }
}

/// Plain text external chunk: one `\n`-terminated line per record.
/// Lines containing `\n` are rejected with [`EmbeddedTerminatorError`], use [`RmpExternalChunk`] for those.
pub struct TextExternalChunk {
    lines: LineReader<io::Take<io::BufReader<fs::File>>>,
    spill: SpillFile,
}

impl TextExternalChunk {
    pub fn path(&self) -> &Path {
        self.spill.path()
    }
}

impl ExternalChunk for TextExternalChunk {
    type SerializationError = EmbeddedTerminatorError;
    type DeserializationError = io::Error;

    fn new(spill: SpillFile, reader: io::Take<io::BufReader<fs::File>>) -> Self {
        TextExternalChunk {
            lines: LineReader::new(reader),
            spill,
        }
    }

    fn dump(
        chunk_writer: &mut io::BufWriter<fs::File>,
        lines: impl IntoIterator<Item = String>,
    ) -> Result<(), ExternalChunkError<Self::SerializationError>> {
        for line in lines.into_iter() {
            if let Some(position) = line.find('\n') {
                return Err(ExternalChunkError::SerializationError(EmbeddedTerminatorError { position }));
            }
            chunk_writer.write_all(line.as_bytes())?;
            chunk_writer.write_all(b"\n")?;
        }

        return Ok(());
    }

    fn io_error(err: io::Error) -> Result<io::Error, io::Error> {
        // invalid UTF-8 is the only decoding failure of a text spill
        match err.kind() {
            io::ErrorKind::InvalidData => Err(err),
            _ => Ok(err),
        }
    }
}

impl Iterator for TextExternalChunk {
    type Item = Result<String, io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

/// RMP (Rust MessagePack) external chunk implementation.
/// Every line is stored as a MessagePack string. For more information see https://msgpack.org/.
pub struct RmpExternalChunk {
    reader: io::Take<io::BufReader<fs::File>>,
    spill: SpillFile,
}

impl RmpExternalChunk {
    pub fn path(&self) -> &Path {
        self.spill.path()
    }
}

impl ExternalChunk for RmpExternalChunk {
    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn new(spill: SpillFile, reader: io::Take<io::BufReader<fs::File>>) -> Self {
        RmpExternalChunk { reader, spill }
    }

    fn dump(
        chunk_writer: &mut io::BufWriter<fs::File>,
        lines: impl IntoIterator<Item = String>,
    ) -> Result<(), ExternalChunkError<Self::SerializationError>> {
        for line in lines.into_iter() {
            rmp_serde::encode::write(&mut *chunk_writer, &line).map_err(ExternalChunkError::SerializationError)?;
        }

        return Ok(());
    }
}

impl Iterator for RmpExternalChunk {
    type Item = Result<String, rmp_serde::decode::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            None
        } else {
            Some(rmp_serde::decode::from_read(&mut self.reader))
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use std::io;

    use super::{ExternalChunk, ExternalChunkError, RmpExternalChunk, SpillFile, TextExternalChunk};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn dir_entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    fn lines() -> Vec<String> {
        vec!["", "a\r", "f1", "f1", "f2", "ü"].into_iter().map(String::from).collect()
    }

    #[rstest]
    fn test_text_chunk(tmp_dir: tempfile::TempDir) {
        let chunk = TextExternalChunk::build(tmp_dir.path(), lines(), None).unwrap();
        assert!(chunk.path().starts_with(tmp_dir.path()));
        assert_eq!(fs::read_to_string(chunk.path()).unwrap(), "\na\r\nf1\nf1\nf2\nü\n");

        let restored: Result<Vec<String>, _> = chunk.collect();
        assert_eq!(restored.unwrap(), lines());
    }

    #[rstest]
    fn test_rmp_chunk(tmp_dir: tempfile::TempDir) {
        let chunk = RmpExternalChunk::build(tmp_dir.path(), lines(), Some(16)).unwrap();

        let restored: Result<Vec<String>, _> = chunk.collect();
        assert_eq!(restored.unwrap(), lines());
    }

    #[rstest]
    fn test_empty_chunk(tmp_dir: tempfile::TempDir) {
        let mut chunk = TextExternalChunk::build(tmp_dir.path(), Vec::new(), None).unwrap();
        assert!(chunk.next().is_none());
    }

    #[rstest]
    fn test_spill_removed_on_drop(tmp_dir: tempfile::TempDir) {
        let text = TextExternalChunk::build(tmp_dir.path(), lines(), None).unwrap();
        let rmp = RmpExternalChunk::build(tmp_dir.path(), lines(), None).unwrap();
        assert_eq!(dir_entries(tmp_dir.path()), 2);
        assert_ne!(text.path(), rmp.path());

        drop(text);
        assert_eq!(dir_entries(tmp_dir.path()), 1);
        drop(rmp);
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_text_chunk_rejects_embedded_terminator(tmp_dir: tempfile::TempDir) {
        let lines = vec!["a".to_string(), "b\nc".to_string()];

        match TextExternalChunk::build(tmp_dir.path(), lines, None) {
            Err(ExternalChunkError::SerializationError(err)) => assert_eq!(err.position, 1),
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("line with a terminator must be rejected"),
        }
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_rmp_chunk_keeps_embedded_terminator(tmp_dir: tempfile::TempDir) {
        let lines = vec!["b\nc".to_string()];
        let chunk = RmpExternalChunk::build(tmp_dir.path(), lines.clone(), None).unwrap();

        let restored: Result<Vec<String>, _> = chunk.collect();
        assert_eq!(restored.unwrap(), lines);
    }

    #[test]
    fn test_text_chunk_read_errors() {
        let read_failure = TextExternalChunk::io_error(io::Error::new(io::ErrorKind::Other, "device gone"));
        assert_eq!(read_failure.unwrap().to_string(), "device gone");

        let decode_failure = TextExternalChunk::io_error(io::Error::new(io::ErrorKind::InvalidData, "bad utf-8"));
        assert_eq!(decode_failure.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_spill_in_missing_dir() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let missing = tmp_dir.path().join("missing");

        assert!(SpillFile::create_in(&missing).is_err());
    }
}
