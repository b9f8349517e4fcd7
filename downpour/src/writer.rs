//! Positional writes into the shared output file.
//!
//! Every worker owns a disjoint byte range of the file, so concurrent
//! writers never conflict. All writes go through the OS positional write
//! (`pwrite`): the shared handle has a single file position, so seeking
//! before writing would race between workers.

use std::fs::File;
use std::io;

use crate::progress::ProgressCounter;

/// Writes a stream of slices at a running absolute offset.
///
/// Each successful write advances the offset and credits the shared byte
/// counter, so observers see progress per buffered write rather than per
/// chunk.
#[derive(Debug)]
pub struct PositionalWriter<'a> {
    file: &'a File,
    offset: u64,
    progress: &'a ProgressCounter,
}

impl<'a> PositionalWriter<'a> {
    /// Create a writer starting at `offset` bytes into `file`.
    pub fn new(file: &'a File, offset: u64, progress: &'a ProgressCounter) -> Self {
        Self {
            file,
            offset,
            progress,
        }
    }

    /// Write the whole slice at the current offset, retrying partial writes
    /// until the slice is drained or a fatal error surfaces.
    pub fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let written = write_at(self.file, buf, self.offset)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "file accepted zero bytes",
                ));
            }
            self.offset += written as u64;
            self.progress.add(written as u64);
            buf = &buf[written..];
        }
        Ok(())
    }

    /// Absolute offset the next write will land at.
    pub fn position(&self) -> u64 {
        self.offset
    }
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_writes_land_at_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        file.set_len(10).unwrap();

        let progress = ProgressCounter::new();
        let mut writer = PositionalWriter::new(&file, 5, &progress);
        writer.write_all(b"World").unwrap();

        let mut writer = PositionalWriter::new(&file, 0, &progress);
        writer.write_all(b"Hello").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"HelloWorld");
    }

    #[test]
    fn test_offset_advances_across_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        file.set_len(6).unwrap();

        let progress = ProgressCounter::new();
        let mut writer = PositionalWriter::new(&file, 0, &progress);
        writer.write_all(b"abc").unwrap();
        assert_eq!(writer.position(), 3);
        writer.write_all(b"def").unwrap();
        assert_eq!(writer.position(), 6);

        assert_eq!(fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_progress_credited_per_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        file.set_len(8).unwrap();

        let progress = ProgressCounter::new();
        let mut writer = PositionalWriter::new(&file, 0, &progress);
        writer.write_all(b"12345678").unwrap();
        assert_eq!(progress.bytes(), 8);
    }

    #[test]
    fn test_concurrent_disjoint_ranges() {
        use std::thread;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let file = File::create(&path).unwrap();
        file.set_len(40).unwrap();

        let progress = ProgressCounter::new();
        thread::scope(|s| {
            for i in 0..4u64 {
                let file = &file;
                let progress = &progress;
                s.spawn(move || {
                    let mut writer = PositionalWriter::new(file, i * 10, progress);
                    let byte = b'a' + i as u8;
                    writer.write_all(&[byte; 10]).unwrap();
                });
            }
        });

        let content = fs::read(&path).unwrap();
        assert_eq!(&content[..10], &[b'a'; 10]);
        assert_eq!(&content[30..], &[b'd'; 10]);
        assert_eq!(progress.bytes(), 40);
    }
}
