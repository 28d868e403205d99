//! MK-012: Built-in parameter sources.
//!
//! Every source here produces a [`ParameterStream`]; see that type for the
//! replay rules.

use crate::core::error::EngineError;
use crate::core::parameter::{ParameterStream, ReusePolicy, ValueIter};
use crate::core::types::Value;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

type SharedReader = Arc<Mutex<Box<dyn BufRead + Send>>>;

static STDIN: OnceLock<SharedReader> = OnceLock::new();

/// One buffered stdin reader for the whole process, so interactive
/// parameters never lose each other's buffered input.
fn shared_stdin() -> SharedReader {
    Arc::clone(STDIN.get_or_init(|| {
        let reader: Box<dyn BufRead + Send> = Box::new(std::io::BufReader::new(std::io::stdin()));
        Arc::new(Mutex::new(reader))
    }))
}

/// A fixed list of values.
pub fn values<I, V>(values: I) -> ParameterStream
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    ParameterStream::values(values)
}

/// Values typed on stdin, one line each.
///
/// Prompts with `Enter <name>: ` when stdin is a terminal. Input ends the
/// stream on end-of-file.
pub fn stdin(name: &str, policy: ReusePolicy) -> ParameterStream {
    let prompt = std::io::stdin()
        .is_terminal()
        .then(|| format!("Enter {}: ", name));
    shared_lines(prompt, shared_stdin(), policy)
}

/// Lines read from any reader, regenerated on each traversal.
///
/// The reader is shared between traversals, so a later traversal reads on
/// from where the previous one stopped.
pub fn lines<R>(prompt: Option<&str>, reader: R) -> ParameterStream
where
    R: BufRead + Send + 'static,
{
    let reader: Box<dyn BufRead + Send> = Box::new(reader);
    shared_lines(
        prompt.map(str::to_string),
        Arc::new(Mutex::new(reader)),
        ReusePolicy::Regenerate,
    )
}

fn shared_lines(prompt: Option<String>, reader: SharedReader, policy: ReusePolicy) -> ParameterStream {
    ParameterStream::live(
        move || -> ValueIter {
            Box::new(LineIter {
                prompt: prompt.clone(),
                reader: Arc::clone(&reader),
                finished: false,
            })
        },
        policy,
    )
}

struct LineIter {
    prompt: Option<String>,
    reader: SharedReader,
    finished: bool,
}

impl Iterator for LineIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.finished {
            return None;
        }
        if let Some(prompt) = &self.prompt {
            let mut err = std::io::stderr();
            let _ = write!(err, "{}", prompt);
            let _ = err.flush();
        }
        let mut line = String::new();
        let read = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_line(&mut line);
        match read {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(_) => {
                let trimmed = line.strip_suffix('\n').unwrap_or(&line);
                let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
                Some(Value::String(trimmed.to_string()))
            }
            Err(e) => {
                tracing::debug!(error = %e, "parameter input ended");
                self.finished = true;
                None
            }
        }
    }
}

/// Extra filter applied to directory entries.
pub type EntryFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Which entries [`list_dir`] yields.
#[derive(Clone, Default)]
pub struct ListDirOptions {
    /// Only directories.
    pub directories: bool,
    /// Only regular files.
    pub files: bool,
    /// Skip names starting with `.`.
    pub skip_hidden: bool,
    pub filter: Option<EntryFilter>,
}

impl std::fmt::Debug for ListDirOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListDirOptions")
            .field("directories", &self.directories)
            .field("files", &self.files)
            .field("skip_hidden", &self.skip_hidden)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Entries of a directory, sorted by path; re-read on every traversal.
pub fn list_dir(path: impl Into<PathBuf>, options: ListDirOptions) -> ParameterStream {
    let path = path.into();
    ParameterStream::regenerate(move || -> ValueIter {
        let entries = read_entries(&path, &options);
        Box::new(entries.into_iter())
    })
}

fn read_entries(dir: &Path, options: &ListDirOptions) -> Vec<Value> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot list directory");
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| keep_entry(p, options))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .map(|p| Value::String(p.display().to_string()))
        .collect()
}

fn keep_entry(path: &Path, options: &ListDirOptions) -> bool {
    if options.directories && !path.is_dir() {
        return false;
    }
    if options.files && !path.is_file() {
        return false;
    }
    if options.skip_hidden
        && path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
    {
        return false;
    }
    options.filter.as_ref().is_none_or(|f| f(path))
}

/// Paths matching a glob pattern, sorted; re-evaluated on every traversal.
pub fn glob(pattern: &str) -> Result<ParameterStream, EngineError> {
    glob::Pattern::new(pattern)
        .map_err(|e| EngineError::Recipe(format!("invalid glob '{}': {}", pattern, e)))?;
    let pattern = pattern.to_string();
    Ok(ParameterStream::regenerate(move || -> ValueIter {
        let mut found: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "glob failed");
                Vec::new()
            }
        };
        found.sort();
        Box::new(
            found
                .into_iter()
                .map(|p| Value::String(p.display().to_string())),
        )
    }))
}
