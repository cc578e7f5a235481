use indexmap::IndexSet;

use std::iter::FromIterator;

use crate::error::{LdaError, Result};

/// Bijection between token strings and dense type ids `0..V`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: IndexSet<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self {
            words: IndexSet::new(),
        }
    }

    /// Returns the id of `word`, assigning the next free id if it is new.
    pub fn insert(&mut self, word: &str) -> usize {
        if let Some(id) = self.words.get_index_of(word) {
            return id;
        }
        self.words.insert_full(word.to_owned()).0
    }

    pub fn id(&self, word: &str) -> Option<usize> {
        self.words.get_index_of(word)
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get_index(id).map(|w| w.as_str())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Maps tokens to ids, growing the vocabulary as needed.
    pub fn encode<'a, I>(&mut self, tokens: I) -> Vec<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens.into_iter().map(|t| self.insert(t)).collect()
    }

    /// Maps tokens to ids, dropping the ones the vocabulary does not know.
    pub fn encode_known<'a, I>(&self, tokens: I) -> Vec<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens.into_iter().filter_map(|t| self.id(t)).collect()
    }
}

impl<'a> FromIterator<&'a str> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut vocab = Self::new();
        for word in iter {
            vocab.insert(word);
        }
        vocab
    }
}

/// An immutable, validated collection of integer-coded documents.
#[derive(Debug, Clone)]
pub struct Corpus {
    docs: Vec<Vec<usize>>,
    num_types: usize,
}

impl Corpus {
    /// Checks that the corpus is non-empty and every id is below `num_types`.
    pub fn new(docs: Vec<Vec<usize>>, num_types: usize) -> Result<Self> {
        if docs.is_empty() {
            return Err(LdaError::EmptyCorpus);
        }
        if num_types == 0 {
            return Err(LdaError::EmptyVocabulary);
        }

        for (doc, tokens) in docs.iter().enumerate() {
            if let Some(position) = tokens.iter().position(|&w| w >= num_types) {
                return Err(LdaError::TypeOutOfRange {
                    doc,
                    position,
                    word: tokens[position],
                    num_types,
                });
            }
        }

        Ok(Self { docs, num_types })
    }

    /// Builds a corpus and its vocabulary from tokenized documents.
    pub fn from_tokens<'a, I, D>(docs: I) -> Result<(Self, Vocabulary)>
    where
        I: IntoIterator<Item = D>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut vocab = Vocabulary::new();
        let docs: Vec<Vec<usize>> = docs.into_iter().map(|d| vocab.encode(d)).collect();
        let corpus = Self::new(docs, vocab.len())?;

        Ok((corpus, vocab))
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn num_types(&self) -> usize {
        self.num_types
    }

    pub fn document(&self, idx: usize) -> &[usize] {
        &self.docs[idx]
    }

    pub fn documents(&self) -> impl Iterator<Item = &[usize]> {
        self.docs.iter().map(|d| d.as_slice())
    }

    pub fn num_tokens(&self) -> usize {
        self.docs.iter().map(|d| d.len()).sum()
    }
}
