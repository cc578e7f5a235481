use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Receives periodic snapshots of the effective type-topic weights.
///
/// `weights` is a dense `topics x types` matrix. Errors are reported back to
/// the trainer, which logs them and carries on.
pub trait CheckpointSink {
    fn write_checkpoint(&mut self, name: &str, weights: &Array2<f64>) -> Result<()>;
}

/// Discards every checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoints;

impl CheckpointSink for NoCheckpoints {
    fn write_checkpoint(&mut self, _name: &str, _weights: &Array2<f64>) -> Result<()> {
        Ok(())
    }
}

/// Keeps every checkpoint in memory.
impl CheckpointSink for Vec<(String, Array2<f64>)> {
    fn write_checkpoint(&mut self, name: &str, weights: &Array2<f64>) -> Result<()> {
        self.push((name.to_owned(), weights.clone()));
        Ok(())
    }
}

/// Writes gzip-compressed checkpoints under a directory.
///
/// Each type gets one line holding its per-topic weights separated by spaces.
#[derive(Debug, Clone)]
pub struct GzipCheckpointWriter {
    dir: PathBuf,
}

impl GzipCheckpointWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl CheckpointSink for GzipCheckpointWriter {
    fn write_checkpoint(&mut self, name: &str, weights: &Array2<f64>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(self.path_for(name))?;
        let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());

        for column in weights.columns() {
            let mut first = true;
            for weight in column.iter() {
                if !first {
                    out.write_all(b" ")?;
                }
                write!(out, "{}", weight)?;
                first = false;
            }
            out.write_all(b"\n")?;
        }

        out.finish()?.flush()?;
        Ok(())
    }
}
