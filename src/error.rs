use std::io;

/// Errors reported by the trainer and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum LdaError {
    /// A hyperparameter is outside its valid range.
    #[error("invalid {name} = {value}: {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("corpus contains no documents")]
    EmptyCorpus,

    #[error("vocabulary is empty")]
    EmptyVocabulary,

    /// A token id does not belong to the vocabulary.
    #[error("document {doc}, position {position}: type id {word} is out of range for a vocabulary of {num_types}")]
    TypeOutOfRange {
        doc: usize,
        position: usize,
        word: usize,
        num_types: usize,
    },

    /// Cross-validation exclusion leaves nothing to train on.
    #[error("fold {held_out_fold} of {total_folds} holds out every document")]
    NoTrainingDocuments {
        total_folds: usize,
        held_out_fold: usize,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LdaError {
    pub(crate) fn invalid<V: ToString>(
        name: &'static str,
        value: V,
        expected: &'static str,
    ) -> Self {
        LdaError::InvalidParameter {
            name,
            value: value.to_string(),
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, LdaError>;
