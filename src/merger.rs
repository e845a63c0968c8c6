//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;

/// Binary heap merger implementation.
/// Merges multiple sorted line sources into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of lines,
/// *n* is the number of chunks (inputs).
///
/// Equal lines coming from different sources are all emitted, the one from the source with the lower index first.
/// A source is dropped as soon as it is exhausted, which for spilled chunks removes the spill file.
/// The first error returned by a source is yielded once, after every line already taken from the sources,
/// then the merger releases every source and stops.
pub struct BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<String, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<(String, usize)>>,
    chunks: Vec<Option<C::IntoIter>>,
    // source error raised while advancing past a line that is still to be emitted
    pending: Option<E>,
    unique: bool,
    initiated: bool,
}

impl<E, C> BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<String, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk lines should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| Some(c.into_iter())));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            pending: None,
            unique: false,
            initiated: false,
        };
    }

    /// Emits each distinct line once instead of once per occurrence.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        return self;
    }

    /// Returns the number of sources that are not exhausted yet.
    pub fn open_sources(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    fn advance(&mut self, idx: usize) -> Result<(), E> {
        let chunk = match self.chunks[idx].as_mut() {
            Some(chunk) => chunk,
            None => return Ok(()),
        };

        match chunk.next() {
            Some(Ok(line)) => self.items.push(Reverse((line, idx))),
            Some(Err(err)) => {
                self.chunks.clear();
                self.items.clear();
                return Err(err);
            }
            None => self.chunks[idx] = None,
        }

        return Ok(());
    }
}

impl<E, C> Iterator for BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<String, E>>,
{
    type Item = Result<String, E>;

    /// Returns the next line from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.advance(idx) {
                    return Some(Err(err));
                }
            }
        }

        let Reverse((result, idx)) = self.items.pop()?;
        if let Err(err) = self.advance(idx) {
            self.pending = Some(err);
            return Some(Ok(result));
        }

        if self.unique {
            while let Some(Reverse((line, _))) = self.items.peek() {
                if line != &result {
                    break;
                }
                if let Some(Reverse((_, idx))) = self.items.pop() {
                    if let Err(err) = self.advance(idx) {
                        self.pending = Some(err);
                        break;
                    }
                }
            }
        }

        return Some(Ok(result));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::error::Error;
    use std::fs;
    use std::io::{self, ErrorKind};

    use super::BinaryHeapMerger;
    use crate::chunk::{ExternalChunk, TextExternalChunk};

    fn lines(items: &[&str]) -> Vec<Result<String, io::Error>> {
        items.iter().map(|item| Ok(item.to_string())).collect()
    }

    fn test_error() -> io::Error {
        io::Error::new(ErrorKind::Other, "test error")
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            lines(&["d", "e", "g"]),
            lines(&["a", "f"]),
            lines(&["c"]),
            vec![],
        ],
        lines(&["a", "c", "d", "e", "f", "g"]),
    )]
    #[case(
        vec![
            lines(&["f1", "f2"]),
            lines(&["f1", "f3"]),
        ],
        lines(&["f1", "f1", "f2", "f3"]),
    )]
    #[case(
        vec![
            vec![Err(test_error())]
        ],
        vec![Err(test_error())],
    )]
    #[case(
        vec![
            vec![Ok("c".to_string()), Err(test_error())],
            lines(&["a", "b"]),
        ],
        vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
            Ok("c".to_string()),
            Err(test_error()),
        ],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<Result<String, io::Error>>>,
        #[case] expected_result: Vec<Result<String, io::Error>>,
    ) {
        let merger = BinaryHeapMerger::new(chunks);
        let actual_result = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_stops_after_error() {
        let chunks = vec![vec![Ok("a".to_string()), Err(test_error())], lines(&["b", "c"])];
        let mut merger = BinaryHeapMerger::new(chunks);

        assert_eq!(merger.next().unwrap().unwrap(), "a");
        assert!(merger.next().unwrap().is_err());
        assert!(merger.next().is_none());
        assert_eq!(merger.open_sources(), 0);
    }

    #[test]
    fn test_unique_merger_keeps_line_before_error() {
        let chunks = vec![lines(&["a", "b"]), vec![Ok("a".to_string()), Err(test_error())]];
        let mut merger = BinaryHeapMerger::new(chunks).unique(true);

        assert_eq!(merger.next().unwrap().unwrap(), "a");
        assert!(merger.next().unwrap().is_err());
        assert!(merger.next().is_none());
    }

    #[rstest]
    #[case(vec![lines(&["a", "a", "b"]), lines(&["a", "c", "c"])], vec!["a", "b", "c"])]
    #[case(vec![lines(&["x"]), lines(&["x"]), lines(&["x"])], vec!["x"])]
    #[case(vec![lines(&["a", "b"]), vec![]], vec!["a", "b"])]
    fn test_unique_merger(#[case] chunks: Vec<Vec<Result<String, io::Error>>>, #[case] expected: Vec<&str>) {
        let merger = BinaryHeapMerger::new(chunks).unique(true);
        let actual: Vec<String> = merger.collect::<Result<_, _>>().unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_merger_releases_exhausted_chunks() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let first = TextExternalChunk::build(tmp_dir.path(), vec!["a".to_string()], None).unwrap();
        let second = TextExternalChunk::build(tmp_dir.path(), vec!["b".to_string(), "c".to_string()], None).unwrap();

        let mut merger = BinaryHeapMerger::new(vec![first, second]);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 2);

        assert_eq!(merger.next().unwrap().unwrap(), "a");
        assert_eq!(merger.open_sources(), 1);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 1);

        assert_eq!(merger.next().unwrap().unwrap(), "b");
        assert_eq!(merger.next().unwrap().unwrap(), "c");
        assert!(merger.next().is_none());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
