// Optional scratch file holding the latest full dump; rewritten on each refresh, never a durability log.
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::gateway::Snapshot;

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    state: Mutex<ScratchState>,
}

#[derive(Debug)]
struct ScratchState {
    file: Option<File>,
    written_seq: Option<u64>,
}

impl ScratchFile {
    /// Creates (or truncates) the file and takes an exclusive advisory lock on it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| io_failure(err, &path))?;

        file.try_lock_exclusive().map_err(|err| {
            let kind = io_error_kind(&err);
            let mut out = Error::new(kind).with_path(&path).with_source(err);
            if kind == ErrorKind::Busy {
                out = out
                    .with_message("scratch file is locked by another server")
                    .with_hint("Stop the other server or choose a different --data-file.");
            }
            out
        })?;
        file.set_len(0).map_err(|err| io_failure(err, &path))?;

        Ok(Self {
            path,
            state: Mutex::new(ScratchState {
                file: Some(file),
                written_seq: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file with `snapshot` unless a newer one was already written.
    /// Returns whether the file changed.
    pub fn refresh(&self, snapshot: &Snapshot) -> Result<bool, Error> {
        let mut state = self.lock()?;
        if state.written_seq.is_some_and(|seq| seq >= snapshot.seq) {
            return Ok(false);
        }
        let Some(file) = state.file.as_mut() else {
            return Ok(false);
        };
        file.set_len(0).map_err(|err| io_failure(err, &self.path))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|err| io_failure(err, &self.path))?;
        file.write_all(&snapshot.bytes)
            .map_err(|err| io_failure(err, &self.path))?;
        file.flush().map_err(|err| io_failure(err, &self.path))?;
        state.written_seq = Some(snapshot.seq);
        Ok(true)
    }

    /// Unlocks and deletes the file. Later refreshes become no-ops.
    pub fn remove(&self) -> Result<(), Error> {
        let mut state = self.lock()?;
        let Some(file) = state.file.take() else {
            return Ok(());
        };
        let _ = file.unlock();
        drop(file);
        fs::remove_file(&self.path).map_err(|err| io_failure(err, &self.path))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ScratchState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("scratch lock poisoned"))
    }
}

fn io_failure(err: std::io::Error, path: &Path) -> Error {
    Error::new(io_error_kind(&err)).with_path(path).with_source(err)
}
