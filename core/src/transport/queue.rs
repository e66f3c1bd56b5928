use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

const RECORD_HEADER_LEN: u64 = 8;
const MAX_RECORD_LEN: u64 = 256 * 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt queue record: {0}")]
    Corrupt(String),
    #[error("malformed multi-part message: {0}")]
    Malformed(String),
    #[error("queue opened for {0} only")]
    WrongMode(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub msg_type: i32,
    pub bytes: Vec<u8>,
}

pub trait MessageQueue {
    /// Non-blocking read; `Ok(None)` when nothing new is available.
    fn read(&mut self) -> Result<Option<QueueMessage>, QueueError>;

    fn read_blocking(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;

    fn write(&mut self, msg_type: i32, bytes: &[u8]) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Start,
    End,
}

enum Mode {
    Writer(File),
    Reader { file: Option<File>, offset: u64 },
}

/// Queue stored as an append-only file of `msg_type:i32, len:u32, bytes` records.
pub struct FileQueue {
    path: PathBuf,
    mode: Mode,
}

impl FileQueue {
    pub fn open_writer(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| QueueError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| QueueError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            mode: Mode::Writer(file),
        })
    }

    /// Opens a reader. A missing file is not an error: the reader waits for it
    /// to appear and then reads it from the beginning.
    pub fn open_reader(path: impl AsRef<Path>, position: QueuePosition) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let (file, offset) = match File::open(&path) {
            Ok(file) => {
                let offset = match position {
                    QueuePosition::Start => 0,
                    QueuePosition::End => file
                        .metadata()
                        .map_err(|source| QueueError::Io {
                            path: path.clone(),
                            source,
                        })?
                        .len(),
                };
                (Some(file), offset)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("queue {} not there yet, will open lazily", path.display());
                (None, 0)
            }
            Err(source) => return Err(QueueError::Io { path, source }),
        };
        Ok(Self {
            path,
            mode: Mode::Reader { file, offset },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> QueueError {
        QueueError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl MessageQueue for FileQueue {
    fn read(&mut self) -> Result<Option<QueueMessage>, QueueError> {
        let path = self.path.clone();
        let io_err = |source| QueueError::Io {
            path: path.clone(),
            source,
        };
        let Mode::Reader { file, offset } = &mut self.mode else {
            return Err(QueueError::WrongMode("writing"));
        };
        if file.is_none() {
            match File::open(&path) {
                Ok(opened) => *file = Some(opened),
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(io_err(err)),
            }
        }
        let Some(file) = file.as_mut() else {
            return Ok(None);
        };

        let available = file.metadata().map_err(io_err)?.len();
        if available < *offset + RECORD_HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        file.seek(SeekFrom::Start(*offset)).map_err(io_err)?;
        file.read_exact(&mut header).map_err(io_err)?;
        let msg_type = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        if len > MAX_RECORD_LEN {
            let bad_offset = *offset;
            // resync on the next header
            *offset += RECORD_HEADER_LEN;
            return Err(QueueError::Corrupt(format!(
                "record at offset {} claims {} bytes",
                bad_offset, len
            )));
        }
        if available < *offset + RECORD_HEADER_LEN + len {
            // writer has not finished this record
            return Ok(None);
        }
        let mut bytes = vec![0u8; len as usize];
        file.read_exact(&mut bytes).map_err(io_err)?;
        *offset += RECORD_HEADER_LEN + len;
        Ok(Some(QueueMessage { msg_type, bytes }))
    }

    fn read_blocking(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.read()? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn write(&mut self, msg_type: i32, bytes: &[u8]) -> Result<(), QueueError> {
        let Mode::Writer(file) = &mut self.mode else {
            return Err(QueueError::WrongMode("reading"));
        };
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN as usize + bytes.len());
        record.extend_from_slice(&msg_type.to_le_bytes());
        record.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(bytes);
        let result = file.write_all(&record).and_then(|_| file.flush());
        result.map_err(|source| self.io_err(source))
    }
}

/// In-process FIFO. Clones share the same queue, so a test can keep one
/// handle and give another to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    messages: VecDeque<QueueMessage>,
    fail_writes: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<QueueMessage> {
        self.inner
            .lock()
            .map(|mut q| q.messages.drain(..).collect())
            .unwrap_or_default()
    }

    /// Makes subsequent writes fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut q) = self.inner.lock() {
            q.fail_writes = fail;
        }
    }

    fn poisoned() -> QueueError {
        QueueError::Corrupt("memory queue lock poisoned".to_string())
    }
}

impl MessageQueue for MemoryQueue {
    fn read(&mut self) -> Result<Option<QueueMessage>, QueueError> {
        let mut q = self.inner.lock().map_err(|_| Self::poisoned())?;
        Ok(q.messages.pop_front())
    }

    /// Never waits: nothing else can write while the caller is blocked.
    fn read_blocking(&mut self, _timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        self.read()
    }

    fn write(&mut self, msg_type: i32, bytes: &[u8]) -> Result<(), QueueError> {
        let mut q = self.inner.lock().map_err(|_| Self::poisoned())?;
        if q.fail_writes {
            return Err(QueueError::Io {
                path: PathBuf::from("memory"),
                source: io::Error::new(ErrorKind::Other, "write rejected"),
            });
        }
        q.messages.push_back(QueueMessage {
            msg_type,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn drain(reader: &mut FileQueue) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(message) = reader.read().unwrap() {
            out.push(message.bytes);
        }
        out
    }

    #[test]
    fn reader_at_start_sees_every_record_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.fmq");
        let mut writer = FileQueue::open_writer(&path).unwrap();
        writer.write(1, b"first").unwrap();
        writer.write(2, b"second").unwrap();

        let mut reader = FileQueue::open_reader(&path, QueuePosition::Start).unwrap();
        let first = reader.read().unwrap().unwrap();
        assert_eq!(first.msg_type, 1);
        assert_eq!(first.bytes, b"first");
        assert_eq!(drain(&mut reader), vec![b"second".to_vec()]);
    }

    #[test]
    fn reader_at_end_sees_only_new_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.fmq");
        let mut writer = FileQueue::open_writer(&path).unwrap();
        writer.write(1, b"old").unwrap();

        let mut reader = FileQueue::open_reader(&path, QueuePosition::End).unwrap();
        assert!(reader.read().unwrap().is_none());
        writer.write(1, b"new").unwrap();
        assert_eq!(drain(&mut reader), vec![b"new".to_vec()]);
    }

    #[test]
    fn missing_file_yields_nothing_until_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.fmq");
        let mut reader = FileQueue::open_reader(&path, QueuePosition::End).unwrap();
        assert!(reader.read().unwrap().is_none());
        assert!(reader
            .read_blocking(Duration::from_millis(20))
            .unwrap()
            .is_none());

        let mut writer = FileQueue::open_writer(&path).unwrap();
        writer.write(3, b"hello").unwrap();
        assert_eq!(drain(&mut reader), vec![b"hello".to_vec()]);
    }

    #[test]
    fn partial_record_is_left_for_later() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.fmq");
        let mut raw = File::create(&path).unwrap();
        raw.write_all(&5i32.to_le_bytes()).unwrap();
        raw.write_all(&4u32.to_le_bytes()).unwrap();
        raw.write_all(b"ab").unwrap();
        raw.flush().unwrap();

        let mut reader = FileQueue::open_reader(&path, QueuePosition::Start).unwrap();
        assert!(reader.read().unwrap().is_none());
        raw.write_all(b"cd").unwrap();
        raw.flush().unwrap();
        assert_eq!(reader.read().unwrap().unwrap().bytes, b"abcd");
    }

    #[test]
    fn oversized_record_header_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.fmq");
        let mut raw = File::create(&path).unwrap();
        raw.write_all(&9i32.to_le_bytes()).unwrap();
        raw.write_all(&u32::MAX.to_le_bytes()).unwrap();
        raw.flush().unwrap();
        let mut writer = FileQueue::open_writer(&path).unwrap();
        writer.write(6, b"after").unwrap();

        let mut reader = FileQueue::open_reader(&path, QueuePosition::Start).unwrap();
        assert!(matches!(reader.read(), Err(QueueError::Corrupt(_))));
        let message = reader.read().unwrap().unwrap();
        assert_eq!((message.msg_type, message.bytes), (6, b"after".to_vec()));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn memory_queue_handles_share_messages() {
        let queue = MemoryQueue::new();
        let mut writer = queue.clone();
        writer.write(4, &[1, 2]).unwrap();
        assert_eq!(queue.len(), 1);
        queue.set_fail_writes(true);
        assert!(writer.write(4, &[3]).is_err());
        assert_eq!(queue.drain()[0].bytes, vec![1, 2]);
    }
}
