use super::ReadAt;
use crate::error::{Result, ZipError};
use std::path::Path;

/// Local file reader with random access support
pub struct LocalFileReader {
    #[cfg(any(unix, windows))]
    file: std::fs::File,
    #[cfg(not(any(unix, windows)))]
    file: std::sync::Mutex<std::fs::File>,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file =
            std::fs::File::open(path).map_err(|e| ZipError::source_unreadable(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| ZipError::source_unreadable(path, e))?
            .len();

        #[cfg(not(any(unix, windows)))]
        let file = std::sync::Mutex::new(file);

        Ok(Self { file, size })
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(windows)]
        {
            // seek_read moves the handle's cursor; nothing else relies on it
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, offset)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self
                .file
                .lock()
                .map_err(|_| std::io::Error::other("file lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_at_arbitrary_offsets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let reader = LocalFileReader::new(&path).unwrap();
        assert_eq!(reader.size(), 11);

        let mut buf = [0u8; 5];
        reader.read_exact_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn missing_file_is_source_unreadable() {
        let temp = TempDir::new().unwrap();
        let err = LocalFileReader::new(&temp.path().join("nope.zip")).err().unwrap();
        assert!(matches!(err, ZipError::SourceUnreadable { .. }));
    }
}
