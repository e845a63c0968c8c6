//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rayon::slice::ParallelSliceMut;

use crate::chunk::{EmbeddedTerminatorError, ExternalChunk, ExternalChunkError, TextExternalChunk};
use crate::line::LineReader;
use crate::merger::BinaryHeapMerger;
use crate::{ChunkBuffer, ChunkBufferBuilder, LimitedBufferBuilder};

/// Sorting error.
#[derive(Debug)]
pub enum SortError<S: Error = EmbeddedTerminatorError, D: Error = io::Error, I: Error = io::Error> {
    /// Scratch directory missing or unusable, or a temporary file could not be created.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Spill data serialization error.
    SerializationError(S),
    /// Spill data deserialization error.
    DeserializationError(D),
    /// Input data stream error
    InputError(I),
    /// Chunk buffer limit is zero.
    InvalidBlockSize,
}

impl<S, D, I> Error for SortError<S, D, I>
where
    S: Error + 'static,
    D: Error + 'static,
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::SerializationError(err) => Some(err),
            SortError::DeserializationError(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::InvalidBlockSize => None,
        }
    }
}

impl<S: Error, D: Error, I: Error> Display for SortError<S, D, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "scratch directory or temporary file not usable: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::InvalidBlockSize => write!(f, "chunk buffer limit must be positive"),
        }
    }
}

/// Sorting error produced by a sorter spilling chunks of type `C` and reading input failing with `E`.
pub type ChunkSortError<C, E> =
    SortError<<C as ExternalChunk>::SerializationError, <C as ExternalChunk>::DeserializationError, E>;

/// Sorted output stream backed by an anonymous temporary file, positioned at its beginning.
/// The file is released when the stream is dropped.
pub struct SortedOutput {
    reader: io::BufReader<fs::File>,
    lines: usize,
}

impl SortedOutput {
    fn new(file: fs::File, lines: usize) -> Self {
        SortedOutput {
            reader: io::BufReader::new(file),
            lines,
        }
    }

    /// Number of lines written to the output.
    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Returns an iterator over the sorted lines with their `\n` terminator stripped.
    /// Unlike [`BufRead::lines`] a `\r` preceding the terminator is kept as part of the line.
    pub fn sorted_lines(self) -> LineReader<io::BufReader<fs::File>> {
        LineReader::new(self.reader)
    }

    /// Returns the underlying file. Data already buffered by reads through this stream is lost.
    pub fn into_inner(self) -> fs::File {
        self.reader.into_inner()
    }
}

impl Read for SortedOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for SortedOutput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<E = io::Error, B = LimitedBufferBuilder, C = TextExternalChunk>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: ExternalChunk,
{
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Emit each distinct line once.
    unique: bool,

    /// External chunk type.
    external_chunk_type: PhantomData<C>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B, C> ExternalSorterBuilder<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: ExternalChunk,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<E, B, C>, ChunkSortError<C, E>> {
        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            self.rw_buf_size,
            self.unique,
        )
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<E, B, C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<E, B, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<E, B, C> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<E, B, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Drops repeated lines from the output. Disabled by default: every input line is kept.
    pub fn with_unique(mut self, unique: bool) -> ExternalSorterBuilder<E, B, C> {
        self.unique = unique;
        return self;
    }
}

impl<E, B, C> Default for ExternalSorterBuilder<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: ExternalChunk,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            buffer_builder: B::default(),
            unique: false,
            external_chunk_type: PhantomData,
            input_error_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<E = io::Error, B = LimitedBufferBuilder, C = TextExternalChunk>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: ExternalChunk,
{
    /// Sorting thread pool, chunks are sorted on the calling thread if absent.
    thread_pool: Option<rayon::ThreadPool>,
    /// Directory to be used to store temporary data.
    tmp_dir: PathBuf,
    /// Chunk buffer builder.
    buffer_builder: B,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Emit each distinct line once.
    unique: bool,

    /// External chunk type.
    external_chunk_type: PhantomData<C>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E, B, C> ExternalSorter<E, B, C>
where
    E: Error,
    B: ChunkBufferBuilder,
    C: ExternalChunk,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel. If the parameter is [`None`]
    ///   or less than two chunks are sorted sequentially on the calling thread.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used. The directory must exist and be writable.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `rw_buf_size` - Chunks file read/write buffer size.
    /// * `unique` - Emit each distinct line once instead of once per occurrence.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        buffer_builder: B,
        rw_buf_size: Option<usize>,
        unique: bool,
    ) -> Result<Self, ChunkSortError<C, E>> {
        if !buffer_builder.is_valid() {
            return Err(SortError::InvalidBlockSize);
        }

        return Ok(ExternalSorter {
            rw_buf_size,
            buffer_builder,
            unique,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            external_chunk_type: PhantomData,
            input_error_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<Option<rayon::ThreadPool>, ChunkSortError<C, E>> {
        let threads_number = match threads_number {
            Some(threads_number) if threads_number > 1 => threads_number,
            _ => {
                log::info!("sorting chunks sequentially");
                return Ok(None);
            }
        };

        log::info!("initializing thread-pool (threads: {})", threads_number);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(Some(thread_pool));
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<PathBuf, ChunkSortError<C, E>> {
        let tmp_dir = match tmp_path {
            Some(tmp_path) => tmp_path.to_path_buf(),
            None => std::env::temp_dir(),
        };

        let metadata = fs::metadata(&tmp_dir).map_err(|err| SortError::TempDir(err))?;
        if !metadata.is_dir() {
            return Err(SortError::TempDir(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", tmp_dir.display()),
            )));
        }
        // the directory must accept new files
        tempfile::tempfile_in(&tmp_dir).map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.display());

        return Ok(tmp_dir);
    }

    /// Directory spill files are created in.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Sorts lines from the input.
    /// Returns an iterator that can be used to get sorted line stream. The iterator owns the spill files,
    /// each one is removed once it is exhausted and all remaining ones when the iterator is dropped.
    ///
    /// With the default [`TextExternalChunk`] spills, lines must not contain `\n`: such a line fails the sort
    /// with [`SortError::SerializationError`].
    ///
    /// # Arguments
    /// * `input` - Input stream lines to be fetched from, read once from its current position
    pub fn sort<I>(&self, input: I) -> Result<BinaryHeapMerger<C::DeserializationError, C>, ChunkSortError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        let mut chunk_buf = self.buffer_builder.build();
        let mut external_chunks = Vec::new();

        for line in input.into_iter() {
            match line {
                Ok(line) => chunk_buf.push(line),
                Err(err) => return Err(SortError::InputError(err)),
            }

            if chunk_buf.is_full() {
                external_chunks.push(self.create_chunk(chunk_buf)?);
                chunk_buf = self.buffer_builder.build();
            }
        }

        if !chunk_buf.is_empty() {
            external_chunks.push(self.create_chunk(chunk_buf)?);
        }

        log::debug!("external sort preparation done (chunks: {})", external_chunks.len());

        return Ok(BinaryHeapMerger::new(external_chunks).unique(self.unique));
    }

    /// Sorts lines from the input and writes them to `output`, each one terminated by `\n`.
    /// Returns the number of lines written.
    pub fn sort_into<I, W>(&self, input: I, output: W) -> Result<usize, ChunkSortError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
        W: Write,
    {
        let merged = self.sort(input)?;

        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output),
            None => io::BufWriter::new(output),
        };

        log::debug!("merging chunks ...");
        let mut lines = 0;
        for line in merged {
            let line = line.map_err(|err| match C::io_error(err) {
                Ok(err) => SortError::IO(err),
                Err(err) => SortError::DeserializationError(err),
            })?;
            writer.write_all(line.as_bytes()).map_err(|err| SortError::IO(err))?;
            writer.write_all(b"\n").map_err(|err| SortError::IO(err))?;
            lines += 1;
        }
        writer.flush().map_err(|err| SortError::IO(err))?;

        log::info!("sorted {} lines", lines);

        return Ok(lines);
    }

    /// Sorts lines from the input into a fresh temporary file inside the scratch directory.
    /// Returns the file rewound to its beginning.
    pub fn sort_to_file<I>(&self, input: I) -> Result<SortedOutput, ChunkSortError<C, E>>
    where
        I: IntoIterator<Item = Result<String, E>>,
    {
        let mut output = tempfile::tempfile_in(&self.tmp_dir).map_err(|err| SortError::TempDir(err))?;

        let lines = self.sort_into(input, &mut output)?;
        output.rewind().map_err(|err| SortError::IO(err))?;

        return Ok(SortedOutput::new(output, lines));
    }

    fn create_chunk(&self, mut buffer: B::Buffer) -> Result<C, ChunkSortError<C, E>> {
        log::debug!("sorting chunk data (lines: {}) ...", buffer.len());
        match &self.thread_pool {
            Some(thread_pool) => thread_pool.install(|| buffer.par_sort_unstable()),
            None => buffer.sort(),
        }

        log::debug!("saving chunk data");
        let external_chunk = C::build(&self.tmp_dir, buffer, self.rw_buf_size).map_err(|err| match err {
            ExternalChunkError::TempFile(err) => SortError::TempDir(err),
            ExternalChunkError::IO(err) => SortError::IO(err),
            ExternalChunkError::SerializationError(err) => SortError::SerializationError(err),
        })?;

        return Ok(external_chunk);
    }
}

/// Sorts the lines of `input` using `scratch_dir` for temporary data, holding at most `block_size` lines in memory.
/// Returns the sorted lines as a stream positioned at its beginning.
///
/// `input` is read once, from its current position. Lines keep any `\r` preceding their `\n` terminator.
/// Duplicate lines are preserved.
pub fn sort_on_disk<R: BufRead>(input: R, scratch_dir: &Path, block_size: usize) -> Result<SortedOutput, SortError> {
    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_tmp_dir(scratch_dir)
        .with_buffer(LimitedBufferBuilder::new(block_size, false))
        .build()?;

    sorter.sort_to_file(LineReader::new(input))
}
