//! Batching for long ordered lists.
//!
//! Remote calls that take a list of names (file ids, tag names) are cheaper
//! and safer in bounded batches. [`ChunkedList`] walks a list front to back,
//! handing out contiguous chunks of at most `max_chunk_size` items.

/// An ordered list plus a forward-only cursor over fixed-size chunks.
///
/// Concatenating every chunk yields the original list, in order. Each chunk
/// holds at most `max_chunk_size` items and only the last may be shorter.
/// A `max_chunk_size` of zero yields nothing at all.
///
/// # Examples
///
/// ```
/// use siphon_batch::ChunkedList;
///
/// let mut tags = ChunkedList::new(vec!["t1", "t2", "t3", "t4", "t5"], 2);
/// assert_eq!(tags.next_chunk(), ["t1", "t2"]);
/// assert_eq!(tags.next_chunk(), ["t3", "t4"]);
/// assert_eq!(tags.next_chunk(), ["t5"]);
/// assert!(!tags.has_more());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedList<T> {
    items: Vec<T>,
    max_chunk_size: usize,
    cursor: usize,
}

impl<T> ChunkedList<T> {
    pub fn new(items: Vec<T>, max_chunk_size: usize) -> Self {
        Self { items, max_chunk_size, cursor: 0 }
    }

    /// Total number of items, consumed or not.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// `true` while at least one unconsumed item remains (and chunks can be
    /// non-empty at all).
    pub fn has_more(&self) -> bool {
        self.max_chunk_size > 0 && self.cursor < self.items.len()
    }

    /// Return the next chunk and advance the cursor by `max_chunk_size`.
    ///
    /// Once exhausted this keeps returning an empty slice; it never panics.
    pub fn next_chunk(&mut self) -> &[T] {
        if !self.has_more() {
            return &[];
        }
        let from = self.cursor;
        self.cursor = self.cursor.saturating_add(self.max_chunk_size);
        self.slice(from, self.cursor)
    }

    /// Items in `[from, to)`, with both bounds clamped to the list.
    ///
    /// Doesn't touch the cursor.
    pub fn slice(&self, from: usize, to: usize) -> &[T] {
        let to = to.min(self.items.len());
        let from = from.min(to);
        &self.items[from..to]
    }

    /// Items not yet handed out by [`next_chunk()`](Self::next_chunk).
    pub fn remaining(&self) -> &[T] {
        self.slice(self.cursor, self.items.len())
    }
}

/// Yields owned chunks, consuming the cursor the same way
/// [`next_chunk()`](ChunkedList::next_chunk) does.
impl<T: Clone> Iterator for ChunkedList<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.has_more().then(|| self.next_chunk().to_vec())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = match self.max_chunk_size {
            0 => 0,
            max => self.remaining().len().div_ceil(max),
        };
        (chunks, Some(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_tag_scenario() {
        let mut list = ChunkedList::new(vec!["t1", "t2", "t3", "t4", "t5"], 2);
        assert!(list.has_more());
        assert_eq!(list.next_chunk(), ["t1", "t2"]);
        assert!(list.has_more());
        assert_eq!(list.next_chunk(), ["t3", "t4"]);
        assert!(list.has_more());
        assert_eq!(list.next_chunk(), ["t5"]);
        assert!(!list.has_more());
        assert!(list.next_chunk().is_empty());
        assert!(list.next_chunk().is_empty());
    }

    #[rstest]
    #[case(0, 3)]
    #[case(1, 0)]
    #[case(7, 1)]
    #[case(10, 10)]
    #[case(10, 3)]
    #[case(3, 10)]
    fn test_partition(#[case] len: usize, #[case] max: usize) {
        let items: Vec<usize> = (0..len).collect();
        let mut list = ChunkedList::new(items.clone(), max);
        let mut joined = Vec::new();
        let mut chunks = Vec::new();
        while list.has_more() {
            let chunk = list.next_chunk().to_vec();
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= max);
            chunks.push(chunk.len());
            joined.extend(chunk);
        }
        assert_eq!(joined, items);
        // Only the last chunk may be short.
        if let Some((_last, full)) = chunks.split_last() {
            assert!(full.iter().all(|n| *n == max));
        }
    }

    #[rstest]
    #[case(vec![], 5)]
    #[case(vec![1, 2, 3], 0)]
    fn test_nothing_to_yield(#[case] items: Vec<u8>, #[case] max: usize) {
        let mut list = ChunkedList::new(items, max);
        assert!(!list.has_more());
        assert!(list.next_chunk().is_empty());
        assert_eq!(list.next(), None);
    }

    #[rstest]
    #[case(0, 2, &[1, 2])]
    #[case(3, 99, &[4, 5])]
    #[case(4, 2, &[])]
    #[case(99, 100, &[])]
    #[case(usize::MAX, usize::MAX, &[])]
    fn test_slice_clamps(#[case] from: usize, #[case] to: usize, #[case] expected: &[u8]) {
        let list = ChunkedList::new(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(list.slice(from, to), expected);
    }

    #[test]
    fn test_cursor_saturates() {
        let mut list = ChunkedList::new(vec![1, 2, 3], usize::MAX);
        assert_eq!(list.next_chunk(), [1, 2, 3]);
        assert!(!list.has_more());
        assert!(list.next_chunk().is_empty());
    }

    #[test]
    fn test_iterator() {
        let list = ChunkedList::new(vec!["t1", "t2", "t3", "t4", "t5"], 2);
        assert_eq!(list.size_hint(), (3, Some(3)));
        let chunks: Vec<Vec<&str>> = list.collect();
        assert_eq!(chunks, vec![vec!["t1", "t2"], vec!["t3", "t4"], vec!["t5"]]);
    }

    #[test]
    fn test_remaining() {
        let mut list = ChunkedList::new(vec![1, 2, 3], 2);
        list.next_chunk();
        assert_eq!(list.remaining(), [3]);
        assert_eq!(list.len(), 3);
    }
}
