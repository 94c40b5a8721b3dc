use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::GameState;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use super::player::format_time;

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(writer) => writer,
            Sink::Gzip(encoder) => encoder,
        }
    }
}

/// Writes snapshots of a live session in the log format the replay reader
/// parses. Paths ending in `.gz` are gzip compressed.
pub struct ReplayRecorder {
    path: PathBuf,
    sink: Sink,
    entries: usize,
}

impl ReplayRecorder {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create replay output directory")?;
        }
        let file = File::create(path).with_context(|| format!("Failed to create replay file {:?}", path))?;
        let writer = BufWriter::new(file);
        let sink = if path.extension() == Some(OsStr::new("gz")) {
            Sink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            Sink::Plain(writer)
        };
        info!("Recording game states to {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            sink,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn record(&mut self, state: &GameState) -> Result<()> {
        self.record_at(Utc::now(), state)
    }

    pub fn record_at(&mut self, time: DateTime<Utc>, state: &GameState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to serialize game state")?;
        writeln!(self.sink.writer(), "{}, {}", format_time(time), json).context("Failed to write replay entry")?;
        self.entries += 1;
        debug!("Recorded game state #{} with {} trains", self.entries, state.trains.len());
        Ok(())
    }

    /// Flush everything to disk and return the file written.
    pub fn finish(self) -> Result<PathBuf> {
        match self.sink {
            Sink::Plain(mut writer) => writer.flush().context("Failed to flush replay file")?,
            Sink::Gzip(encoder) => {
                encoder
                    .finish()
                    .context("Failed to finish compressed replay")?
                    .flush()
                    .context("Failed to flush replay file")?;
            }
        }
        info!("Saved {} replay entries to {:?}", self.entries, self.path);
        Ok(self.path)
    }
}
