//! Chunk buffers accumulating input lines before they are sorted and spilled.

use rayon;

/// Default number of lines held in memory per chunk.
pub const DEFAULT_BLOCK_SIZE: usize = 5000;

/// Buffer builder.
pub trait ChunkBufferBuilder: Default {
    type Buffer: ChunkBuffer;

    /// Creates a new empty buffer.
    fn build(&self) -> Self::Buffer;

    /// Checks that the configured limit can hold at least one line.
    fn is_valid(&self) -> bool;
}

/// Base limited buffer interface.
pub trait ChunkBuffer: IntoIterator<Item = String> + rayon::slice::ParallelSliceMut<String> + Send {
    /// Adds a new line to the buffer.
    fn push(&mut self, line: String);

    /// Returns buffer length in lines.
    fn len(&self) -> usize;

    /// Checks if the buffer holds no lines.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if the buffer reached the limit.
    fn is_full(&self) -> bool;

    /// Sorts buffered lines in place, lexicographically.
    fn sort(&mut self) {
        rayon::slice::ParallelSliceMut::as_parallel_slice_mut(self).sort_unstable();
    }
}

/// Builds [`LimitedBuffer`]s holding at most `block_size` lines.
#[derive(Clone)]
pub struct LimitedBufferBuilder {
    block_size: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    /// # Arguments
    /// * `block_size` - Maximum number of lines per chunk, must be positive
    /// * `preallocate` - Reserve room for `block_size` lines up front
    pub fn new(block_size: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            block_size,
            preallocate,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl ChunkBufferBuilder for LimitedBufferBuilder {
    type Buffer = LimitedBuffer;

    fn build(&self) -> Self::Buffer {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.block_size)
        } else {
            LimitedBuffer::new(self.block_size)
        }
    }

    fn is_valid(&self) -> bool {
        self.block_size > 0
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder {
            block_size: DEFAULT_BLOCK_SIZE,
            preallocate: false,
        }
    }
}

/// Buffer limited by lines count.
pub struct LimitedBuffer {
    limit: usize,
    inner: Vec<String>,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }
}

impl ChunkBuffer for LimitedBuffer {
    fn push(&mut self, line: String) {
        self.inner.push(line);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }
}

impl IntoIterator for LimitedBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for LimitedBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.inner.as_mut_slice()
    }
}


#[cfg(feature = "memory-limit")]
pub mod mem {
    use deepsize::DeepSizeOf;
    use rayon;

    use super::{ChunkBuffer, ChunkBufferBuilder};

    /// Builds [`MemoryLimitedBuffer`]s bounded by estimated heap usage in bytes.
    #[derive(Clone)]
    pub struct MemoryLimitedBufferBuilder {
        buffer_limit: u64,
    }

    impl MemoryLimitedBufferBuilder {
        pub fn new(buffer_limit: u64) -> Self {
            MemoryLimitedBufferBuilder { buffer_limit }
        }
    }

    impl ChunkBufferBuilder for MemoryLimitedBufferBuilder {
        type Buffer = MemoryLimitedBuffer;

        fn build(&self) -> Self::Buffer {
            MemoryLimitedBuffer::new(self.buffer_limit)
        }

        fn is_valid(&self) -> bool {
            self.buffer_limit > 0
        }
    }

    impl Default for MemoryLimitedBufferBuilder {
        fn default() -> Self {
            MemoryLimitedBufferBuilder { buffer_limit: u64::MAX }
        }
    }

    /// Buffer limited by consumed memory.
    pub struct MemoryLimitedBuffer {
        limit: u64,
        current_size: u64,
        inner: Vec<String>,
    }

    impl MemoryLimitedBuffer {
        pub fn new(limit: u64) -> Self {
            MemoryLimitedBuffer {
                limit,
                current_size: 0,
                inner: Vec::new(),
            }
        }

        pub fn mem_size(&self) -> u64 {
            self.current_size
        }
    }

    impl ChunkBuffer for MemoryLimitedBuffer {
        fn push(&mut self, line: String) {
            self.current_size += line.deep_size_of() as u64;
            self.inner.push(line);
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn is_full(&self) -> bool {
            self.current_size >= self.limit
        }
    }

    impl IntoIterator for MemoryLimitedBuffer {
        type Item = String;
        type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

        fn into_iter(self) -> Self::IntoIter {
            self.inner.into_iter()
        }
    }

    impl rayon::slice::ParallelSliceMut<String> for MemoryLimitedBuffer {
        fn as_parallel_slice_mut(&mut self) -> &mut [String] {
            self.inner.as_mut_slice()
        }
    }

    #[cfg(test)]
    mod test {
        use super::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBufferBuilder};

        #[test]
        fn test_memory_limited_buffer() {
            // a String costs its 24 byte header plus its heap capacity
            let builder = MemoryLimitedBufferBuilder::new(60);
            let mut buffer = builder.build();

            buffer.push(String::from("hello!"));
            assert_eq!(buffer.mem_size(), 30);
            assert_eq!(buffer.is_full(), false);

            buffer.push(String::from("world!"));
            assert_eq!(buffer.mem_size(), 60);
            assert_eq!(buffer.is_full(), true);

            let actual_data = Vec::from_iter(buffer);
            assert_eq!(actual_data, vec!["hello!", "world!"]);
        }
    }
}
