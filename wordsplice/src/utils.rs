use bincode::{config, Decode, Encode};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::errors::{Result, WordspliceError};

/// Splits text into runs on ASCII whitespace, skipping empty runs.
pub fn split_fields(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    text.split(u8::is_ascii_whitespace)
        .filter(|run| !run.is_empty())
}

/// Reads the byte at `pos + offset`, or 0 past either end of `text`.
#[inline(always)]
pub fn byte_at(text: &[u8], pos: usize, offset: isize) -> u8 {
    pos.checked_add_signed(offset)
        .and_then(|idx| text.get(idx))
        .copied()
        .unwrap_or(0)
}

/// Cuts `run` after every position flagged by `is_end`. A trailing partial word is kept.
pub fn cut_run<F>(run: &[u8], mut is_end: F) -> Vec<&[u8]>
where
    F: FnMut(usize) -> bool,
{
    let mut words = vec![];
    let mut start = 0;
    for i in 0..run.len() {
        if is_end(i) {
            words.push(&run[start..i + 1]);
            start = i + 1;
        }
    }
    if start < run.len() {
        words.push(&run[start..]);
    }
    words
}

/// Moves a uniform sample of `amount` items to the front of `items` and drops the rest.
///
/// This is a partial Fisher-Yates pass: only the first `amount` slots are visited.
pub fn subsample<T, R>(items: &mut Vec<T>, amount: usize, rng: &mut R)
where
    R: Rng + ?Sized,
{
    if items.len() <= amount {
        return;
    }
    for i in 0..amount {
        let j = rng.gen_range(i..items.len());
        items.swap(i, j);
    }
    items.truncate(amount);
}

pub fn shuffle<T, R>(items: &mut [T], rng: &mut R)
where
    R: Rng + ?Sized,
{
    for i in 0..items.len() {
        let j = rng.gen_range(i..items.len());
        items.swap(i, j);
    }
}

pub fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

pub fn encode<T>(value: &T) -> Result<Vec<u8>>
where
    T: Encode,
{
    Ok(bincode::encode_to_vec(value, config::standard())?)
}

/// Decodes a whole buffer. Trailing bytes are an error.
pub fn decode<T>(data: &[u8]) -> Result<T>
where
    T: Decode<()>,
{
    let (value, read) = bincode::decode_from_slice(data, config::standard())?;
    if read != data.len() {
        return Err(WordspliceError::invalid_model(format!(
            "{} trailing bytes after model data",
            data.len() - read
        )));
    }
    Ok(value)
}
