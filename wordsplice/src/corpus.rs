use std::fs;
use std::path::Path;

use crate::errors::{Result, WordspliceError};
use crate::run::Run;

/// Ordered collection of training documents.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<Vec<u8>>,
}

impl Corpus {
    /// Reads every entry of a directory as a document.
    ///
    /// Entries are visited in name order. Names starting with `.` are skipped.
    ///
    /// # Errors
    ///
    /// Any failure to list the directory or read an entry aborts the whole read with
    /// [`WordspliceError::Corpus`].
    pub fn from_dir<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref();
        let mut paths = vec![];
        for entry in fs::read_dir(dir).map_err(|e| WordspliceError::corpus(dir, e))? {
            let entry = entry.map_err(|e| WordspliceError::corpus(dir, e))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let body = fs::read(&path).map_err(|e| WordspliceError::corpus(&path, e))?;
            log::debug!("Loaded {path:?} ({} bytes)", body.len());
            documents.push(body);
        }
        log::info!("# of documents: {}", documents.len());
        Ok(Self { documents })
    }

    /// Creates a corpus from in-memory documents.
    pub fn from_documents<I, D>(documents: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Vec<u8>>,
    {
        Self {
            documents: documents.into_iter().map(Into::into).collect(),
        }
    }

    pub fn documents(&self) -> impl Iterator<Item = &[u8]> {
        self.documents.iter().map(Vec::as_slice)
    }

    /// Extracts one [`Run`] per document, skipping documents without any word.
    pub fn runs(&self) -> Vec<Run> {
        self.documents()
            .map(Run::from_document)
            .filter(|run| !run.is_empty())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::env;
    use std::process;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("wordsplice-{}-{name}", process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_corpus_from_dir() {
        let dir = temp_dir("from-dir");
        fs::write(dir.join("b.txt"), "sat on the mat").unwrap();
        fs::write(dir.join("a.txt"), "the cat").unwrap();
        fs::write(dir.join(".hidden"), "ignored words").unwrap();

        let corpus = Corpus::from_dir(&dir).unwrap();
        let docs: Vec<&[u8]> = corpus.documents().collect();
        assert_eq!(vec![&b"the cat"[..], b"sat on the mat"], docs);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corpus_from_dir_missing() {
        let dir = env::temp_dir().join(format!("wordsplice-{}-missing", process::id()));
        let result = Corpus::from_dir(&dir);
        assert!(matches!(result, Err(WordspliceError::Corpus { .. })));
    }

    #[test]
    fn test_corpus_from_dir_unreadable_entry() {
        let dir = temp_dir("unreadable");
        fs::write(dir.join("a.txt"), "the cat").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();

        let result = Corpus::from_dir(&dir);
        assert!(matches!(result, Err(WordspliceError::Corpus { .. })));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corpus_runs() {
        let corpus = Corpus::from_documents(["the cat", "   ", "on"]);
        let runs = corpus.runs();
        assert_eq!(2, runs.len());
        assert_eq!(b"thecat", runs[0].as_bytes());
        assert_eq!(b"on", runs[1].as_bytes());
    }
}
