// ========================================================================================
//
//                               THE CHECKPOINT STORE
//
// ========================================================================================
//
// One directory per search run. Every completed iteration k leaves an immutable
// `scores_<k>.txt`; the feature universe the run was started with is pinned in
// `genes.txt`. Records are written to a temporary sibling, synced and renamed, so a
// record file either exists completely or not at all. Readers validate structure and
// fail loudly on anything they cannot trust.

use crate::seed::resolve_base_seed;
use crate::types::{FeatureUniverse, IterationRecord, ScoredSubset, Subset};
use ahash::AHashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORD_PREFIX: &str = "scores_";
const RECORD_SUFFIX: &str = ".txt";
const SKIPPED_PREFIX: &str = "skipped_";
const UNIVERSE_FILE: &str = "genes.txt";
const TEMP_SUFFIX: &str = ".tmp";
const SEED_FILE: &str = "seed.txt";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint '{path}' is corrupt at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("refusing to overwrite the existing record '{path}'")]
    AlreadyExists { path: PathBuf },
    #[error(
        "'{path}' lists {recorded} genes that differ from the {current} genes of this run; use a fresh run directory"
    )]
    UniverseMismatch {
        path: PathBuf,
        recorded: usize,
        current: usize,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable per-run storage of iteration records.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (creating if needed) the run directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, iteration: usize) -> PathBuf {
        self.dir
            .join(format!("{RECORD_PREFIX}{iteration:03}{RECORD_SUFFIX}"))
    }

    pub fn skipped_path(&self, iteration: usize) -> PathBuf {
        self.dir
            .join(format!("{SKIPPED_PREFIX}{iteration:03}{RECORD_SUFFIX}"))
    }

    pub fn universe_path(&self) -> PathBuf {
        self.dir.join(UNIVERSE_FILE)
    }

    pub fn has_record(&self, iteration: usize) -> bool {
        self.record_path(iteration).is_file()
    }

    /// Iterations with a record file on disk, ascending. Presence only; nothing is validated.
    pub fn completed_iterations(&self) -> Result<Vec<usize>, CheckpointError> {
        let mut iterations: Vec<usize> = fs::read_dir(&self.dir)
            .map_err(io_error(&self.dir))?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix(RECORD_PREFIX)?
                    .strip_suffix(RECORD_SUFFIX)?
                    .parse()
                    .ok()
            })
            .collect();
        iterations.sort_unstable();
        Ok(iterations)
    }

    /// Persists a completed iteration. Records are append-once.
    pub fn write_record(&self, record: &IterationRecord) -> Result<PathBuf, CheckpointError> {
        let path = self.record_path(record.iteration());
        if path.exists() {
            return Err(CheckpointError::AlreadyExists { path });
        }
        write_atomically(&path, |writer| {
            for entry in record.entries() {
                writeln!(writer, "{}", format_line(entry))?;
            }
            Ok(())
        })?;
        log::debug!(
            "wrote {} entries for iteration {} to '{}'",
            record.len(),
            record.iteration(),
            path.display()
        );
        Ok(path)
    }

    /// Loads and validates the record of `iteration`.
    ///
    /// Returns `Ok(None)` when no record exists. Any structural problem, a subset
    /// of the wrong size, or an identifier outside `universe` is reported as
    /// [`CheckpointError::Corrupt`].
    pub fn read_record(
        &self,
        iteration: usize,
        universe: &FeatureUniverse,
    ) -> Result<Option<IterationRecord>, CheckpointError> {
        let path = self.record_path(iteration);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };

        let corrupt = |line: usize, reason: String| CheckpointError::Corrupt {
            path: path.clone(),
            line,
            reason,
        };

        let mut seen = AHashSet::new();
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_error(&path))?;
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            let entry = parse_line(&line).map_err(|reason| corrupt(line_no, reason))?;
            if entry.subset.len() != iteration {
                return Err(corrupt(
                    line_no,
                    format!(
                        "subset '{}' has {} features, expected {iteration}",
                        entry.subset,
                        entry.subset.len()
                    ),
                ));
            }
            if let Some(unknown) = entry.subset.iter().find(|f| !universe.contains(f)) {
                return Err(corrupt(
                    line_no,
                    format!("feature '{unknown}' is not part of this run's universe"),
                ));
            }
            if !seen.insert(entry.subset.clone()) {
                return Err(corrupt(
                    line_no,
                    format!("subset '{}' appears more than once", entry.subset),
                ));
            }
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(corrupt(0, "the record holds no subsets".to_string()));
        }
        Ok(Some(IterationRecord::new(iteration, entries)))
    }

    /// Lists the candidates the skip policy dropped from `iteration`, one
    /// `subset<TAB>reason` line each.
    pub fn write_skipped(
        &self,
        iteration: usize,
        skipped: &[(Subset, String)],
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.skipped_path(iteration);
        write_atomically(&path, |writer| {
            for (subset, reason) in skipped {
                let reason: String = reason
                    .chars()
                    .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
                    .collect();
                writeln!(writer, "{subset}\t{reason}")?;
            }
            Ok(())
        })?;
        Ok(path)
    }

    pub fn write_universe(&self, universe: &FeatureUniverse) -> Result<(), CheckpointError> {
        write_atomically(&self.universe_path(), |writer| {
            for feature in universe.iter() {
                writeln!(writer, "{feature}")?;
            }
            Ok(())
        })
    }

    /// The identifiers pinned in `genes.txt`, sorted and de-duplicated, or `None`.
    pub fn read_universe(&self) -> Result<Option<Vec<String>>, CheckpointError> {
        let path = self.universe_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };
        let mut genes: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        genes.sort_unstable();
        genes.dedup();
        Ok(Some(genes))
    }

    /// Pins `universe` on a fresh run, or checks it against the pinned one on resume.
    pub fn ensure_universe(&self, universe: &FeatureUniverse) -> Result<(), CheckpointError> {
        match self.read_universe()? {
            None => self.write_universe(universe),
            Some(recorded) if recorded == universe.features() => Ok(()),
            Some(recorded) => Err(CheckpointError::UniverseMismatch {
                path: self.universe_path(),
                recorded: recorded.len(),
                current: universe.len(),
            }),
        }
    }

    /// Removes temporary files left behind by an interrupted write. Returns how many were removed.
    pub fn clear_stale_temp_files(&self) -> Result<usize, CheckpointError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let path = entry.map_err(io_error(&self.dir))?.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(TEMP_SUFFIX));
            if is_temp && path.is_file() {
                fs::remove_file(&path).map_err(io_error(&path))?;
                log::warn!("removed stale temporary file '{}'", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Returns the base seed for every run under `dir`.
///
/// A requested seed is always used. Otherwise the seed pinned in `seed.txt` is
/// reused, and a fresh one is drawn and pinned when there is none, so re-running
/// the same command resumes instead of starting over with different random sets.
pub fn pin_seed(dir: &Path, requested: Option<u64>) -> Result<u64, CheckpointError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let path = dir.join(SEED_FILE);
    let pinned = match fs::read_to_string(&path) {
        Ok(text) => Some(
            lexical_core::parse::<u64>(text.trim().as_bytes()).map_err(|_| {
                CheckpointError::Corrupt {
                    path: path.clone(),
                    line: 1,
                    reason: format!("'{}' is not a seed", text.trim()),
                }
            })?,
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(io_error(&path)(e)),
    };

    match (requested, pinned) {
        (Some(seed), Some(previous)) => {
            if seed != previous {
                log::warn!(
                    "using seed {seed} although '{}' pins {previous}; random gene sets will differ",
                    path.display()
                );
            }
            Ok(seed)
        }
        (None, Some(previous)) => Ok(previous),
        (requested, None) => {
            let seed = resolve_base_seed(requested);
            write_atomically(&path, |writer| writeln!(writer, "{seed}"))?;
            Ok(seed)
        }
    }
}

/// `f1,f2,...,fk<TAB>score`, score to three decimals.
pub fn format_line(entry: &ScoredSubset) -> String {
    format!("{}\t{:.3}", entry.subset, entry.score)
}

/// Parses one record line. The error is a human-readable reason.
pub fn parse_line(line: &str) -> Result<ScoredSubset, String> {
    let line = line.trim_end_matches('\r');
    let fields: Vec<&str> = line.split('\t').collect();
    let [features, score] = fields.as_slice() else {
        return Err(format!(
            "expected 2 tab-separated columns, found {}",
            fields.len()
        ));
    };

    let identifiers: Vec<&str> = features.split(',').map(str::trim).collect();
    if identifiers.iter().any(|id| id.is_empty()) {
        return Err(format!("empty feature identifier in '{features}'"));
    }
    let subset = Subset::canonical(identifiers.iter().copied());
    if subset.len() != identifiers.len() {
        return Err(format!("repeated feature identifier in '{features}'"));
    }

    let score: f64 = lexical_core::parse(score.trim().as_bytes())
        .map_err(|_| format!("'{score}' is not a number"))?;
    if !score.is_finite() {
        return Err(format!("score '{score}' is not finite"));
    }

    Ok(ScoredSubset { subset, score })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Write to `<path>.tmp`, flush, sync, then rename over `path`. The temporary
/// file is removed on any failure.
fn write_atomically<F>(path: &Path, fill: F) -> Result<(), CheckpointError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let temp_path = temp_path_for(path);

    let write_result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        fill(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(path)(err));
    }

    fs::rename(&temp_path, path)
        .inspect_err(|_| {
            let _ = fs::remove_file(&temp_path);
        })
        .map_err(io_error(path))
}
