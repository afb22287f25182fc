//! Payload sink: where received payloads end up.
//!
//! The sink stands where a viewer would render a frame. It either keeps
//! only the newest payload (`latest.bin`, replaced atomically through a
//! temporary file) or every payload as `payload-000001.bin`, ...

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

const LATEST: &str = "latest.bin";

/// Writes payloads into a directory.
#[derive(Debug)]
pub struct PayloadSink {
    dir: PathBuf,
    keep_all: bool,
    written: u64,
}

impl PayloadSink {
    /// Create the directory if needed.
    pub fn create(dir: impl Into<PathBuf>, keep_all: bool) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            keep_all,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of payloads written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Store one payload and return the file it landed in.
    pub fn write(&mut self, payload: &[u8]) -> io::Result<PathBuf> {
        self.written += 1;
        let path = if self.keep_all {
            let path = self.dir.join(format!("payload-{:06}.bin", self.written));
            std::fs::write(&path, payload)?;
            path
        } else {
            let tmp = self.dir.join(format!("{LATEST}.tmp"));
            let path = self.dir.join(LATEST);
            std::fs::write(&tmp, payload)?;
            std::fs::rename(&tmp, &path)?;
            path
        };
        debug!(path = %path.display(), len = payload.len(), "payload written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PayloadSink::create(dir.path().join("out"), false).unwrap();

        let first = sink.write(b"one").unwrap();
        let second = sink.write(b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert_eq!(sink.written(), 2);
        assert_eq!(std::fs::read_dir(sink.dir()).unwrap().count(), 1);
    }

    #[test]
    fn keep_all_numbers_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PayloadSink::create(dir.path(), true).unwrap();

        let a = sink.write(b"a").unwrap();
        let b = sink.write(b"b").unwrap();
        assert!(a.ends_with("payload-000001.bin"));
        assert!(b.ends_with("payload-000002.bin"));
        assert_eq!(std::fs::read(&a).unwrap(), b"a");
    }
}
