use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const FRAME_OVERHEAD: u64 = 8;

/// Frame layout: `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Event plus its on-disk size. `Ok(None)` on clean EOF, a torn tail, a CRC
/// mismatch, or an undecodable payload.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, payload.len() as u64 + FRAME_OVERHEAD)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Valid events and the byte length of the prefix that holds them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, len)) = read_frame(&mut reader)? {
        events.push(event);
        valid_len += len;
    }
    Ok((events, valid_len))
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only booking log.
///
/// Appends are buffered until `flush_sync`. A batch that fails to append or
/// flush is rolled back with `discard_pending`, so the file only ever holds
/// frames whose callers were told they committed.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful flush.
    committed_len: u64,
    pending: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open for appends, cutting off any torn or corrupt tail first so new
    /// frames are never written behind garbage that replay would stop at.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = scan(path)?;
        let writer = open_append(path)?;
        let file_len = writer.get_ref().metadata()?.len();
        if file_len > valid_len {
            writer.get_ref().set_len(valid_len)?;
            writer.get_ref().sync_all()?;
            tracing::warn!(
                path = %path.display(),
                dropped = file_len - valid_len,
                "truncated unreadable WAL tail"
            );
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            committed_len: valid_len,
            pending: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer only; durable after the next `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending += 1;
        write_frame(&mut self.writer, event)
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.pending;
        self.pending = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful flush, both the
    /// unwritten buffer and any bytes that already reached the file.
    pub fn discard_pending(&mut self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        let (_, _unflushed) = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.writer.get_ref().set_len(self.committed_len)?;
        self.writer.get_ref().sync_all()?;
        self.pending = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Slow phase: write the snapshot next to the live log.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Fast phase: rename the snapshot over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.writer = open_append(&self.path)?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.pending = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingRecord, BookingStatus};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("visitslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn booked(property: &str, time: &str) -> Event {
        Event::VisitBooked {
            record: BookingRecord {
                id: Ulid::new(),
                property_id: property.into(),
                visit_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                visit_time: time.into(),
                visitor_name: "Ana".into(),
                visitor_email: "ana@example.com".into(),
                visitor_phone: "600000000".into(),
                message: Some("second floor?".into()),
                status: BookingStatus::Pending,
                created_at: 1_748_000_000_000,
            },
        }
    }

    #[test]
    fn replay_returns_appended_events_in_order() {
        let path = tmp_path("in_order.wal");
        let first = booked("P1", "10:00");
        let second = Event::VisitStatusChanged {
            id: Ulid::new(),
            property_id: "P1".into(),
            status: BookingStatus::Confirmed,
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn missing_file_replays_empty() {
        assert!(Wal::replay(&tmp_path("never_written.wal")).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn.wal");
        let event = booked("P1", "10:00");
        Wal::open(&path).unwrap().append(&event).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = booked("P1", "10:00");
        Wal::open(&path).unwrap().append(&good).unwrap();
        {
            let payload = bincode::serialize(&booked("P1", "10:30")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compaction_replaces_history_and_accepts_new_appends() {
        let path = tmp_path("compact.wal");
        let keep = booked("P1", "10:00");
        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..20 {
            wal.append(&booked("P2", "11:00")).unwrap();
        }
        wal.append(&keep).unwrap();
        assert_eq!(wal.appends_since_compact(), 21);
        let before = fs::metadata(&path).unwrap().len();

        Wal::write_compact_file(wal.path(), std::slice::from_ref(&keep)).unwrap();
        wal.swap_compact_file().unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);

        let later = booked("P1", "10:30");
        wal.append(&later).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, later]);
    }

    #[test]
    fn buffered_appends_visible_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = ["09:00", "09:30", "10:00"]
            .iter()
            .map(|t| booked("P1", t))
            .collect();
        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn discarded_batch_leaves_no_frames() {
        let path = tmp_path("discard.wal");
        let committed = booked("P1", "09:00");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&committed).unwrap();
        let committed_len = fs::metadata(&path).unwrap().len();

        wal.append_buffered(&booked("P1", "09:30")).unwrap();
        wal.append_buffered(&booked("P1", "10:00")).unwrap();
        // Part of the failed batch already reached the file.
        wal.writer.flush().unwrap();
        assert!(fs::metadata(&path).unwrap().len() > committed_len);

        wal.discard_pending().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
        assert_eq!(wal.appends_since_compact(), 1);

        let later = booked("P1", "10:30");
        wal.append(&later).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![committed, later]);
    }

    #[test]
    fn open_cuts_torn_tail_so_new_appends_replay() {
        let path = tmp_path("torn_then_append.wal");
        let first = booked("P1", "10:00");
        Wal::open(&path).unwrap().append(&first).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        }

        let second = booked("P1", "10:30");
        Wal::open(&path).unwrap().append(&second).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }
}
