use crate::utils::{byte_at, split_fields};

/// Boundary type.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u8)]
pub enum BoundaryType {
    /// Inner of a word.
    NotWordBoundary = 0,

    /// The byte is the last one of a word.
    WordBoundary = 1,
}

impl BoundaryType {
    /// Returns `+1.0` for a word boundary and `-1.0` otherwise.
    pub const fn sign(self) -> f64 {
        match self {
            Self::WordBoundary => 1.0,
            Self::NotWordBoundary => -1.0,
        }
    }
}

impl From<bool> for BoundaryType {
    fn from(is_end: bool) -> Self {
        if is_end {
            Self::WordBoundary
        } else {
            Self::NotWordBoundary
        }
    }
}

/// Whitespace-stripped document with a boundary flag for every byte.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Run {
    pub(crate) text: Vec<u8>,
    pub(crate) boundaries: Vec<BoundaryType>,
}

impl Run {
    /// Creates a new [`Run`] from a document whose words are separated by whitespaces.
    ///
    /// # Arguments
    ///
    /// * `document` - Raw bytes of a document.
    ///
    /// # Returns
    ///
    /// A new [`Run`]. The last byte of every word is flagged as a word boundary.
    ///
    /// # Examples
    ///
    /// ```
    /// use wordsplice::{BoundaryType, Run};
    ///
    /// let r = Run::from_document(b"hello world");
    /// assert_eq!(b"helloworld", r.as_bytes());
    /// assert_eq!(BoundaryType::WordBoundary, r.boundaries()[4]);
    /// ```
    pub fn from_document<D>(document: D) -> Self
    where
        D: AsRef<[u8]>,
    {
        let document = document.as_ref();
        let mut text = Vec::with_capacity(document.len());
        let mut boundaries = Vec::with_capacity(document.len());
        for word in split_fields(document) {
            text.extend_from_slice(word);
            boundaries.resize(text.len() - 1, BoundaryType::NotWordBoundary);
            boundaries.push(BoundaryType::WordBoundary);
        }
        Self { text, boundaries }
    }

    /// Gets the concatenated bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// Gets the boundary flags, one per byte.
    pub fn boundaries(&self) -> &[BoundaryType] {
        &self.boundaries
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Checks whether a word ends at `pos`. Positions past the end are not word ends.
    pub fn is_word_end(&self, pos: usize) -> bool {
        self.boundaries.get(pos) == Some(&BoundaryType::WordBoundary)
    }

    /// Reads the byte at `pos + offset`, or the 0 sentinel outside the run.
    #[inline(always)]
    pub fn byte_at(&self, pos: usize, offset: isize) -> u8 {
        byte_at(&self.text, pos, offset)
    }

    /// Iterates over the words recorded in the run.
    pub fn iter_words(&self) -> impl Iterator<Item = &[u8]> {
        let mut start = 0;
        self.boundaries
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == BoundaryType::WordBoundary)
            .map(move |(i, _)| {
                let word = &self.text[start..i + 1];
                start = i + 1;
                word
            })
    }

    /// Generates a string with whitespaces for word boundaries.
    ///
    /// Bytes that are not valid UTF-8 are replaced with `U+FFFD`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wordsplice::Run;
    ///
    /// let r = Run::from_document("the  cat\nsat");
    /// assert_eq!("the cat sat", r.to_tokenized_string());
    /// ```
    pub fn to_tokenized_string(&self) -> String {
        let mut result = Vec::with_capacity(self.text.len() * 2);
        for (&c, &b) in self.text.iter().zip(&self.boundaries) {
            result.push(c);
            if b == BoundaryType::WordBoundary {
                result.push(b' ');
            }
        }
        if result.last() == Some(&b' ') {
            result.pop();
        }
        String::from_utf8_lossy(&result).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use BoundaryType::*;

    #[test]
    fn test_run_from_document_empty() {
        let r = Run::from_document("");
        assert!(r.is_empty());
        assert!(r.boundaries().is_empty());

        let r = Run::from_document(" \n\t");
        assert!(r.is_empty());
    }

    #[test]
    fn test_run_from_document_one() {
        let r = Run::from_document("a");

        let expected = Run {
            text: b"a".to_vec(),
            boundaries: vec![WordBoundary],
        };
        assert_eq!(expected, r);
    }

    #[test]
    fn test_run_from_document() {
        let r = Run::from_document("  the cat\tsat\n\non  ");

        let expected = Run {
            text: b"thecatsaton".to_vec(),
            boundaries: vec![
                NotWordBoundary,
                NotWordBoundary,
                WordBoundary,
                NotWordBoundary,
                NotWordBoundary,
                WordBoundary,
                NotWordBoundary,
                NotWordBoundary,
                WordBoundary,
                NotWordBoundary,
                WordBoundary,
            ],
        };
        assert_eq!(expected, r);
    }

    #[test]
    fn test_run_is_word_end() {
        let r = Run::from_document("ab c");
        assert!(!r.is_word_end(0));
        assert!(r.is_word_end(1));
        assert!(r.is_word_end(2));
        assert!(!r.is_word_end(3));
    }

    #[test]
    fn test_run_byte_at() {
        let r = Run::from_document("ab c");
        assert_eq!(b'a', r.byte_at(1, -1));
        assert_eq!(b'c', r.byte_at(1, 1));
        assert_eq!(0, r.byte_at(0, -1));
        assert_eq!(0, r.byte_at(2, 1));
    }

    #[test]
    fn test_run_iter_words() {
        let r = Run::from_document("the cat sat");
        let words: Vec<&[u8]> = r.iter_words().collect();
        assert_eq!(vec![&b"the"[..], b"cat", b"sat"], words);
    }

    #[test]
    fn test_run_to_tokenized_string() {
        let r = Run::from_document("\tthe cat  sat\n");
        assert_eq!("the cat sat", r.to_tokenized_string());
        assert_eq!("", Run::from_document("").to_tokenized_string());
    }

    #[test]
    fn test_boundary_type_sign() {
        assert_eq!(1.0, WordBoundary.sign());
        assert_eq!(-1.0, NotWordBoundary.sign());
        assert_eq!(WordBoundary, BoundaryType::from(true));
    }
}
