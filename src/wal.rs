use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frames claiming more than this are treated as corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode one record as `[u32 len][bincode][u32 crc32]`.
fn encode_frame<E: Serialize>(writer: &mut impl Write, record: &E) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a journal back from disk.
#[derive(Debug)]
pub struct Replay<E> {
    pub records: Vec<E>,
    /// False if a torn or corrupt tail was dropped.
    pub clean: bool,
}

/// Append-only write-ahead journal of `E` records.
///
/// A torn last frame (crash mid-write) is detected by the length prefix
/// and CRC, and dropped on replay. Compaction writes a fresh file next to
/// the live one and renames it over.
pub struct Wal<E> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(E)>,
}

impl<E: Serialize + DeserializeOwned> Wal<E> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &E) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, record: &E) -> io::Result<()> {
        encode_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Replace the journal with `records`, atomically via rename.
    pub fn compact(&mut self, records: &[E]) -> io::Result<()> {
        let tmp_path = self.compact_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                encode_frame(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        // Anything still buffered belongs to the old file.
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact record. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay<E>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay { records: Vec::new(), clean: true });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            if reader.fill_buf()?.is_empty() {
                return Ok(Replay { records, clean: true });
            }
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                return Ok(Replay { records, clean: false });
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                return Ok(Replay { records, clean: false });
            }

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                return Ok(Replay { records, clean: false });
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                return Ok(Replay { records, clean: false });
            }
            match bincode::deserialize::<E>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => return Ok(Replay { records, clean: false }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, Event, Role};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("servify_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn user(name: &str) -> Event {
        Event::UserRegistered {
            id: Ulid::new(),
            name: name.into(),
            role: Role::Customer,
            phone: None,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            user("ana"),
            Event::BookingStatusChanged {
                id: Ulid::new(),
                provider_id: Ulid::new(),
                status: BookingStatus::Confirmed,
                at: 1_000,
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(replay.clean);
        assert_eq!(replay.records, events);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = user("ben");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // zero length prefix, then a short CRC
        }

        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(!replay.clean);
        assert_eq!(replay.records, vec![event]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(replay.clean);
        assert!(replay.records.is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = user("cy");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&user("dee")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::<Event>::replay(&path).unwrap();
        assert!(!replay.clean);
        assert_eq!(replay.records, vec![good]);
    }

    #[test]
    fn compact_shrinks_and_accepts_new_appends() {
        let path = tmp_path("compact.wal");
        let uid = Ulid::new();
        let mut wal = Wal::open(&path).unwrap();
        for i in 0..20 {
            wal.append(&Event::PhoneSaved { user_id: uid, phone: format!("555-{i:04}") })
                .unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 20);
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![Event::UserRegistered {
            id: uid,
            name: "eve".into(),
            role: Role::Provider,
            phone: Some("555-0019".into()),
        }];
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);

        let later = user("fay");
        wal.append(&later).unwrap();
        drop(wal);

        let replay = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replay.records, vec![snapshot[0].clone(), later]);
    }

    #[test]
    fn buffered_appends_need_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| user(&format!("u{i}"))).collect();
        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();

        assert_eq!(Wal::<Event>::replay(&path).unwrap().records, events);
    }
}
