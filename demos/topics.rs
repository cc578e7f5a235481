extern crate sampled_lda;
extern crate stderrlog;

use std::env;
use std::fmt::{Display, Error as FmtError, Formatter};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

use sampled_lda::{Corpus, GzipCheckpointWriter, SampledOnlineLDABuilder, Vocabulary};

struct Topic<'a>(Vec<(&'a str, f64)>);

impl<'a> Display for Topic<'a> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), FmtError> {
        for &(word, p) in self.0.iter() {
            writeln!(f, "  {0: <20}  \t---\t  {1:.4}", word, p)?;
        }
        Ok(())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_lowercase())
        .collect()
}

fn read_dir(path: &str) -> Result<Vec<PathBuf>, io::Error> {
    let mut result = Vec::new();
    for entry in fs::read_dir(path)? {
        result.push(entry?.path());
    }
    result.sort();
    Ok(result)
}

fn main() {
    stderrlog::new()
        .verbosity(stderrlog::LogLevelNum::Info)
        .init()
        .expect("logger");

    let args: Vec<String> = env::args().collect();
    let data = match args.get(1) {
        Some(path) => path.as_str(),
        None => {
            eprintln!("usage: topics <directory of text files>");
            process::exit(2);
        }
    };
    let k = 10; // The number of topics

    // feed data
    let texts: Vec<Vec<String>> = read_dir(data)
        .expect("readable data directory")
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|text| tokenize(&text))
        .collect();

    let mut vocab = Vocabulary::new();
    let docs = texts
        .iter()
        .map(|doc| vocab.encode(doc.iter().map(|s| s.as_str())))
        .collect();
    let corpus = Corpus::new(docs, vocab.len()).expect("non-empty corpus");

    let mut olda = SampledOnlineLDABuilder::new(k)
        .batch_size(50)
        .output_prefix("demo")
        .build()
        .expect("valid settings");

    let mut checkpoints = GzipCheckpointWriter::new(env::temp_dir().join("sampled-lda"));
    let model = olda
        .train(&corpus, 20 * corpus.len(), 5 * corpus.len(), &mut checkpoints)
        .expect("training");

    println!("acceptance rate {:.4}", model.stats().acceptance_rate());

    // print topics
    for idx in 0..k {
        let words = model
            .top_words(idx, 10)
            .into_iter()
            .filter_map(|(w, p)| vocab.word(w).map(|word| (word, p)))
            .collect();
        println!("topic {}:\n{}", idx, Topic(words));
    }
}
