//! This is implementation of KVStoreEngine by a log-structured store
//!
//! Every mutation is appended as a JSON command to `<n>.log` in the store
//! directory. An in-memory index points at the newest `Set` for each key,
//! and stale commands are dropped by compaction once they pass
//! `COMPACTION_THRESHOLD` bytes.
use super::KVStoreEngine;
use crate::error::{KVStoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use std::{
    collections::{BTreeMap, HashMap},
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    mem,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

const COMPACTION_THRESHOLD: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct KVStore(Arc<Mutex<KVStoreInner>>);

struct KVStoreInner {
    // path to database
    db_path: PathBuf,
    // file readers cache
    readers: HashMap<u64, BufferReaderWithPosition<File>>,
    // current file writer
    writer: BufferWriterWithPosition<File>,
    // current data file number
    current_file_num: u64,
    // newest `Set` command of every live key
    index_map: BTreeMap<String, CommandMetaData>,
    // size of stale data in bytes
    uncompacted: u64,
}

impl KVStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<KVStore> {
        let path = path.into();
        fs::create_dir_all(&path)?;

        let mut readers = HashMap::new();
        let mut index_map = BTreeMap::new();

        let existing_file_num_list = sort_file_by_number(&path)?;
        let mut uncompacted = 0_u64;
        for &file_num in &existing_file_num_list {
            let file_path = build_file_path_by_number(&path, file_num);
            let mut reader = BufferReaderWithPosition::new(File::open(&file_path)?)?;
            uncompacted += load_uncompacted_data(file_num, &file_path, &mut reader, &mut index_map)?;
            readers.insert(file_num, reader);
        }
        let current_file_num = existing_file_num_list.last().unwrap_or(&0) + 1;
        let writer = new_file(&path, current_file_num, &mut readers)?;
        log::debug!(
            "loaded {} keys from {} log files, {} stale bytes",
            index_map.len(),
            existing_file_num_list.len(),
            uncompacted
        );

        Ok(KVStore(Arc::new(Mutex::new(KVStoreInner {
            db_path: path,
            readers,
            writer,
            current_file_num,
            index_map,
            uncompacted,
        }))))
    }

    fn lock(&self) -> MutexGuard<'_, KVStoreInner> {
        // a failed append is rolled back before the lock is released
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KVStoreEngine for KVStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let (offset, length) = inner.writer.append(&Command::set(key.clone(), value))?;
        let file_number = inner.current_file_num;
        if let Some(old) = inner.index_map.insert(
            key,
            CommandMetaData {
                file_number,
                offset,
                length,
            },
        ) {
            inner.uncompacted += old.length;
        }
        inner.maybe_compact()
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let meta = match inner.index_map.get(&key) {
            Some(meta) => meta,
            None => return Ok(None),
        };
        let reader = inner
            .readers
            .get_mut(&meta.file_number)
            .ok_or(KVStoreError::MissingLogFile(meta.file_number))?;
        reader.seek(SeekFrom::Start(meta.offset))?;
        match serde_json::from_reader::<_, Command>(reader.take(meta.length))? {
            Command::Set(_, value) => Ok(Some(value)),
            _ => Err(KVStoreError::UnexpectedCommandType),
        }
    }

    fn remove(&self, key: String) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !inner.index_map.contains_key(&key) {
            return Ok(());
        }
        let (_, length) = inner.writer.append(&Command::remove(key.clone()))?;
        if let Some(old) = inner.index_map.remove(&key) {
            inner.uncompacted += old.length + length;
        }
        inner.maybe_compact()
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.index_map.is_empty() {
            return Ok(());
        }
        let (_, length) = inner.writer.append(&Command::Clear)?;
        let dropped: u64 = inner.index_map.values().map(|md| md.length).sum();
        inner.index_map.clear();
        inner.uncompacted += dropped + length;
        inner.maybe_compact()
    }
}

impl KVStoreInner {
    fn maybe_compact(&mut self) -> Result<()> {
        if self.uncompacted > COMPACTION_THRESHOLD {
            self.compact()?;
        }
        Ok(())
    }

    /// Copy every live `Set` into a fresh log and delete the older ones.
    fn compact(&mut self) -> Result<()> {
        log::debug!(
            "compacting {} keys, {} stale bytes",
            self.index_map.len(),
            self.uncompacted
        );
        let compaction_file_num = self.current_file_num + 1;
        self.current_file_num += 2;
        self.writer = new_file(&self.db_path, self.current_file_num, &mut self.readers)?;
        let mut compaction_writer = new_file(&self.db_path, compaction_file_num, &mut self.readers)?;

        let mut new_position = 0_u64;
        for meta in self.index_map.values_mut() {
            let reader = self
                .readers
                .get_mut(&meta.file_number)
                .ok_or(KVStoreError::MissingLogFile(meta.file_number))?;
            reader.seek(SeekFrom::Start(meta.offset))?;
            let length = io::copy(&mut reader.take(meta.length), &mut compaction_writer)?;
            *meta = CommandMetaData {
                file_number: compaction_file_num,
                offset: new_position,
                length,
            };
            new_position += length;
        }
        compaction_writer.flush()?;

        let stale_file_nums: Vec<u64> = self
            .readers
            .keys()
            .filter(|&&file_num| file_num < compaction_file_num)
            .copied()
            .collect();
        for file_num in stale_file_nums {
            self.readers.remove(&file_num);
            fs::remove_file(build_file_path_by_number(&self.db_path, file_num))?;
        }
        self.uncompacted = 0;
        Ok(())
    }
}

/// Go through the log file
///
/// replace old `Set` metadata with the newest `Set` in index_map; a
/// `Remove` drops its key and a `Clear` drops every key. Everything
/// dropped, plus the `Remove`/`Clear` records themselves, is stale.
///
/// A record cut short by a crash can only sit at the end of a log; the
/// file is truncated back to the last whole record.
///
/// return data in bytes that can be compacted in next compact process
fn load_uncompacted_data(
    file_num: u64,
    file_path: &Path,
    reader: &mut BufferReaderWithPosition<File>,
    index_map: &mut BTreeMap<String, CommandMetaData>,
) -> Result<u64> {
    let mut old_position = reader.seek(SeekFrom::Start(0))?;
    let mut stream = Deserializer::from_reader(reader).into_iter::<Command>();
    let mut uncompacted = 0_u64;

    while let Some(cmd) = stream.next() {
        let cmd = match cmd {
            Ok(cmd) => cmd,
            Err(err) if err.is_eof() || err.is_syntax() => {
                log::warn!(
                    "dropping torn record at {}:{}: {}",
                    file_path.display(),
                    old_position,
                    err
                );
                OpenOptions::new()
                    .write(true)
                    .open(file_path)?
                    .set_len(old_position)?;
                break;
            }
            Err(err) => return Err(err.into()),
        };
        let new_position = stream.byte_offset() as u64;
        match cmd {
            Command::Set(key, _) => {
                uncompacted += index_map
                    .insert(
                        key,
                        CommandMetaData {
                            file_number: file_num,
                            offset: old_position,
                            length: new_position - old_position,
                        },
                    )
                    .map(|md| md.length)
                    .unwrap_or(0);
            }
            Command::Remove(key) => {
                uncompacted += index_map.remove(&key).map(|md| md.length).unwrap_or(0);
                uncompacted += new_position - old_position;
            }
            Command::Clear => {
                uncompacted += index_map.values().map(|md| md.length).sum::<u64>();
                index_map.clear();
                uncompacted += new_position - old_position;
            }
        }
        old_position = new_position;
    }
    Ok(uncompacted)
}

fn new_file(
    path: &Path,
    file_num: u64,
    readers: &mut HashMap<u64, BufferReaderWithPosition<File>>,
) -> Result<BufferWriterWithPosition<File>> {
    let file_path = build_file_path_by_number(path, file_num);
    let writer = BufferWriterWithPosition::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?,
    )?;
    readers.insert(file_num, BufferReaderWithPosition::new(File::open(&file_path)?)?);
    Ok(writer)
}

fn build_file_path_by_number(path: &Path, file_num: u64) -> PathBuf {
    path.join(format!("{}.log", file_num))
}

fn sort_file_by_number(path: &Path) -> Result<Vec<u64>> {
    let mut file_num_list: Vec<u64> = fs::read_dir(path)?
        .flat_map(|res| -> Result<_> { Ok(res?.path()) })
        .filter(|path| path.is_file() && path.extension() == Some("log".as_ref()))
        .flat_map(|path| {
            path.file_name()
                .and_then(OsStr::to_str)
                .map(|name| name.trim_end_matches(".log"))
                .map(str::parse::<u64>)
        })
        .flatten()
        .collect();
    file_num_list.sort_unstable();
    Ok(file_num_list)
}

/// Where a command lives: log file number, byte offset and length
struct CommandMetaData {
    file_number: u64,
    offset: u64,
    length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
enum Command {
    Set(String, String),
    Remove(String),
    Clear,
}

impl Command {
    fn set(key: String, value: String) -> Command {
        Command::Set(key, value)
    }

    fn remove(key: String) -> Command {
        Command::Remove(key)
    }
}

/// Reader with buffer
struct BufferReaderWithPosition<R: Read + Seek> {
    reader: BufReader<R>,
    position: u64,
}

impl<R: Read + Seek> Read for BufferReaderWithPosition<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.reader.read(buf)?;
        self.position += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for BufferReaderWithPosition<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.reader.seek(pos)?;
        Ok(self.position)
    }
}

impl<R: Read + Seek> BufferReaderWithPosition<R> {
    fn new(mut inner: R) -> Result<Self> {
        let position = inner.stream_position()?;
        Ok(Self {
            reader: BufReader::new(inner),
            position,
        })
    }
}

/// Writer with buffer
struct BufferWriterWithPosition<W: Write + Seek> {
    writer: BufWriter<W>,
    position: u64,
}

impl<W: Write + Seek> Write for BufferWriterWithPosition<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.position += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write + Seek> BufferWriterWithPosition<W> {
    fn new(mut inner: W) -> Result<Self> {
        let position = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            writer: BufWriter::new(inner),
            position,
        })
    }
}

/// A log file opened for appending
trait LogFile: Write + Seek + Sized {
    /// Second handle on the same file
    fn try_clone(&self) -> io::Result<Self>;

    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn try_clone(&self) -> io::Result<Self> {
        File::try_clone(self)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl<W: LogFile> BufferWriterWithPosition<W> {
    /// Write `cmd` and commit it, returning its offset and length.
    ///
    /// On failure nothing of `cmd` is left in the file or the buffer.
    fn append(&mut self, cmd: &Command) -> Result<(u64, u64)> {
        let offset = self.position;
        if let Err(err) = self.write_command(cmd) {
            log::warn!("rolling back failed append at offset {}: {}", offset, err);
            self.rollback(offset)?;
            return Err(err);
        }
        Ok((offset, self.position - offset))
    }

    fn write_command(&mut self, cmd: &Command) -> Result<()> {
        serde_json::to_writer(&mut *self, cmd)?;
        self.flush()?;
        Ok(())
    }

    /// Discard buffered bytes unwritten and cut the file back to `offset`.
    fn rollback(&mut self, offset: u64) -> Result<()> {
        let fresh = BufWriter::new(self.writer.get_ref().try_clone()?);
        // into_parts hands back the buffer instead of flushing it
        let (_, _unwritten) = mem::replace(&mut self.writer, fresh).into_parts();
        let file = self.writer.get_mut();
        file.truncate(offset)?;
        self.position = file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FlakyState {
        bytes: Vec<u8>,
        // bytes the file still accepts before every write fails
        budget: Option<usize>,
    }

    /// In-memory append-only log whose writes can be made to fail.
    #[derive(Clone, Default)]
    struct FlakyLog(Arc<Mutex<FlakyState>>);

    impl FlakyLog {
        fn fail_after(&self, budget: usize) {
            self.0.lock().unwrap().budget = Some(budget);
        }

        fn heal(&self) {
            self.0.lock().unwrap().budget = None;
        }

        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().bytes.clone()
        }
    }

    impl Write for FlakyLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.0.lock().unwrap();
            let len = match state.budget {
                None => buf.len(),
                Some(0) => return Err(io::Error::new(io::ErrorKind::Other, "disk full")),
                Some(budget) => buf.len().min(budget),
            };
            state.bytes.extend_from_slice(&buf[..len]);
            if let Some(budget) = state.budget.as_mut() {
                *budget -= len;
            }
            Ok(len)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyLog {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            let len = self.0.lock().unwrap().bytes.len() as u64;
            Ok(match pos {
                SeekFrom::Start(offset) => offset,
                SeekFrom::End(delta) | SeekFrom::Current(delta) => (len as i64 + delta) as u64,
            })
        }
    }

    impl LogFile for FlakyLog {
        fn try_clone(&self) -> io::Result<Self> {
            Ok(self.clone())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.0.lock().unwrap().bytes.truncate(len as usize);
            Ok(())
        }
    }

    fn replay(bytes: &[u8]) -> Vec<String> {
        Deserializer::from_slice(bytes)
            .into_iter::<Command>()
            .map(|cmd| format!("{:?}", cmd.unwrap()))
            .collect()
    }

    #[test]
    fn failed_append_leaves_no_trace() {
        let log = FlakyLog::default();
        let mut writer = BufferWriterWithPosition::new(log.clone()).unwrap();

        let (offset, first_len) = writer.append(&Command::set("a".into(), "1".into())).unwrap();
        assert_eq!(offset, 0);

        // half a record reaches the file, the rest stays buffered
        log.fail_after(5);
        assert!(writer
            .append(&Command::set("b".into(), "2".into()))
            .is_err());
        assert_eq!(writer.position, first_len);
        assert_eq!(log.bytes().len() as u64, first_len);

        log.heal();
        let (offset, _) = writer.append(&Command::remove("a".into())).unwrap();
        assert_eq!(offset, first_len);
        assert_eq!(
            replay(&log.bytes()),
            vec![
                format!("{:?}", Command::set("a".into(), "1".into())),
                format!("{:?}", Command::remove("a".into())),
            ]
        );
    }

    #[test]
    fn failed_append_with_nothing_written() {
        let log = FlakyLog::default();
        let mut writer = BufferWriterWithPosition::new(log.clone()).unwrap();
        log.fail_after(0);
        assert!(writer.append(&Command::Clear).is_err());
        assert_eq!(writer.position, 0);

        log.heal();
        writer.append(&Command::Clear).unwrap();
        assert_eq!(replay(&log.bytes()), vec![format!("{:?}", Command::Clear)]);
    }

    #[test]
    fn index_into_closed_log_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = KVStore::open(dir.path()).unwrap();
        store.set("k".to_owned(), "v".to_owned()).unwrap();
        store.lock().readers.clear();
        assert!(matches!(
            store.get("k".to_owned()),
            Err(KVStoreError::MissingLogFile(1))
        ));
    }
}
