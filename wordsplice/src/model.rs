use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::dictionary::Dictionary;
use crate::errors::{Result, WordspliceError};
use crate::forest::Forest;
use crate::markov::Markov;
use crate::stumps::BoostedStumps;
use crate::tagger::Tagger;
use crate::utils::split_fields;

/// Leading bytes of every model file.
pub const MODEL_MAGIC: &[u8; 4] = b"WSPL";

/// Inference contract shared by every model.
pub trait Segmenter {
    /// Splits a whitespace-free run into words. Concatenating the result gives back `run`.
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]>;

    /// Splits `text` on ASCII whitespace and segments every run independently.
    fn fields<'a>(&self, text: &'a [u8]) -> Vec<&'a [u8]> {
        split_fields(text)
            .flat_map(|run| self.split_run(run))
            .collect()
    }
}

/// Model kinds, identified by a name and by a tag byte in model files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModelType {
    Dictionary = 0,
    Markov = 1,
    BoostedStumps = 2,
    Forest = 3,
    Tagger = 4,
}

impl ModelType {
    pub const ALL: [Self; 5] = [
        Self::Dictionary,
        Self::Markov,
        Self::BoostedStumps,
        Self::Forest,
        Self::Tagger,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dictionary => "dict",
            Self::Markov => "markov",
            Self::BoostedStumps => "stumps",
            Self::Forest => "forest",
            Self::Tagger => "rnn",
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = WordspliceError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| WordspliceError::UnknownModelType(name.to_string()))
    }
}

impl TryFrom<u8> for ModelType {
    type Error = WordspliceError;

    fn try_from(tag: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(tag))
            .copied()
            .ok_or_else(|| WordspliceError::UnknownModelType(format!("tag {tag}")))
    }
}

/// Any trained model.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    Dictionary(Dictionary),
    Markov(Markov),
    BoostedStumps(BoostedStumps),
    Forest(Forest),
    Tagger(Tagger),
}

impl Model {
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Dictionary(_) => ModelType::Dictionary,
            Self::Markov(_) => ModelType::Markov,
            Self::BoostedStumps(_) => ModelType::BoostedStumps,
            Self::Forest(_) => ModelType::Forest,
            Self::Tagger(_) => ModelType::Tagger,
        }
    }

    /// Segments `text` and converts every word to a string.
    ///
    /// Words are cut at byte positions, so a multi-byte character split in two is replaced with
    /// U+FFFD.
    pub fn fields_str(&self, text: &str) -> Vec<String> {
        self.fields(text.as_bytes())
            .into_iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Serializes the model payload, without the file header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Dictionary(m) => Ok(m.to_bytes()),
            Self::Markov(m) => m.to_bytes(),
            Self::BoostedStumps(m) => m.to_bytes(),
            Self::Forest(m) => m.to_bytes(),
            Self::Tagger(m) => m.to_bytes(),
        }
    }

    /// Reconstructs a model of the given type from a payload written by [`Model::to_bytes()`].
    ///
    /// # Errors
    ///
    /// [`WordspliceError::InvalidModel`] or [`WordspliceError::Decode`] is returned when the
    /// payload is not a valid model of `model_type`.
    pub fn from_bytes(model_type: ModelType, data: &[u8]) -> Result<Self> {
        Ok(match model_type {
            ModelType::Dictionary => Self::Dictionary(Dictionary::from_bytes(data)?),
            ModelType::Markov => Self::Markov(Markov::from_bytes(data)?),
            ModelType::BoostedStumps => Self::BoostedStumps(BoostedStumps::from_bytes(data)?),
            ModelType::Forest => Self::Forest(Forest::from_bytes(data)?),
            ModelType::Tagger => Self::Tagger(Tagger::from_bytes(data)?),
        })
    }

    /// Exports the model with a header naming its type.
    ///
    /// # Errors
    ///
    /// When `wtr` generates an error, it will be returned as is.
    pub fn write<W>(&self, wtr: &mut W) -> Result<()>
    where
        W: Write,
    {
        let payload = self.to_bytes()?;
        wtr.write_all(MODEL_MAGIC)?;
        wtr.write_all(&[self.model_type().tag()])?;
        wtr.write_all(&payload)?;
        Ok(())
    }

    /// Creates a model from a reader, resolving its type from the header.
    ///
    /// # Errors
    ///
    /// [`WordspliceError::UnknownModelType`] is returned for an unregistered tag byte.
    pub fn read<R>(rdr: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let mut data = vec![];
        rdr.read_to_end(&mut data)?;
        let Some(rest) = data.strip_prefix(MODEL_MAGIC) else {
            return Err(WordspliceError::invalid_model("not a model file"));
        };
        let Some((&tag, payload)) = rest.split_first() else {
            return Err(WordspliceError::invalid_model("missing model type"));
        };
        Self::from_bytes(ModelType::try_from(tag)?, payload)
    }
}

impl Segmenter for Model {
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]> {
        match self {
            Self::Dictionary(m) => m.split_run(run),
            Self::Markov(m) => m.split_run(run),
            Self::BoostedStumps(m) => m.split_run(run),
            Self::Forest(m) => m.split_run(run),
            Self::Tagger(m) => m.split_run(run),
        }
    }
}

impl From<Dictionary> for Model {
    fn from(m: Dictionary) -> Self {
        Self::Dictionary(m)
    }
}

impl From<Markov> for Model {
    fn from(m: Markov) -> Self {
        Self::Markov(m)
    }
}

impl From<BoostedStumps> for Model {
    fn from(m: BoostedStumps) -> Self {
        Self::BoostedStumps(m)
    }
}

impl From<Forest> for Model {
    fn from(m: Forest) -> Self {
        Self::Forest(m)
    }
}

impl From<Tagger> for Model {
    fn from(m: Tagger) -> Self {
        Self::Tagger(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::corpus::Corpus;
    use crate::markov::MarkovConfig;

    fn dictionary() -> Model {
        Dictionary::train(&Corpus::from_documents(["the cat sat on the mat"])).into()
    }

    #[test]
    fn test_model_type_names() {
        for t in ModelType::ALL {
            assert_eq!(t, t.as_str().parse().unwrap());
            assert_eq!(t, ModelType::try_from(t.tag()).unwrap());
        }
        assert_eq!("rnn", ModelType::Tagger.to_string());
    }

    #[test]
    fn test_model_type_unknown() {
        assert!(matches!(
            "crf".parse::<ModelType>(),
            Err(WordspliceError::UnknownModelType(_))
        ));
        assert!(matches!(
            ModelType::try_from(5),
            Err(WordspliceError::UnknownModelType(_))
        ));
    }

    #[test]
    fn test_model_fields_str() {
        let model = dictionary();
        assert_eq!(
            vec!["the", "cat", "sat", "on", "the", "mat"],
            model.fields_str("thecat saton themat"),
        );
    }

    #[test]
    fn test_model_write_read() {
        let model = dictionary();
        let mut data = vec![];
        model.write(&mut data).unwrap();
        assert_eq!(b"WSPL\x00", &data[..5]);
        let model2 = Model::read(&mut data.as_slice()).unwrap();
        assert_eq!(model, model2);
    }

    #[test]
    fn test_model_read_markov() {
        let corpus = Corpus::from_documents(["the cat sat on the mat"]);
        let model: Model = Markov::train(&corpus, &MarkovConfig::default())
            .unwrap()
            .into();
        let mut data = vec![];
        model.write(&mut data).unwrap();
        let model2 = Model::read(&mut data.as_slice()).unwrap();
        assert_eq!(ModelType::Markov, model2.model_type());
        assert_eq!(model.fields(b"thecatsat"), model2.fields(b"thecatsat"));
    }

    #[test]
    fn test_model_read_bad_header() {
        assert!(matches!(
            Model::read(&mut &b"ABCD\x00cat"[..]),
            Err(WordspliceError::InvalidModel(_))
        ));
        assert!(matches!(
            Model::read(&mut &b"WSPL"[..]),
            Err(WordspliceError::InvalidModel(_))
        ));
        assert!(matches!(
            Model::read(&mut &b"WSPL\x09cat"[..]),
            Err(WordspliceError::UnknownModelType(_))
        ));
    }

    #[test]
    fn test_model_read_mismatched_payload() {
        // A dictionary payload is not a valid Markov table.
        assert!(Model::from_bytes(ModelType::Markov, b"cat\nmat\nthe").is_err());
    }
}
