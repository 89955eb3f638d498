use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};

fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Reads `buf.len()` bytes, or reports a clean end of log.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only event log for one tenant.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little endian. A torn
/// or corrupt tail (crash mid-write) ends replay at the last good record.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer a record. Nothing is durable until `sync`.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: temp file, fsync, rename, reopen.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact record in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_WAL_RECORD_BYTES {
                break;
            }
            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}

// ── Group commit ─────────────────────────────────────────────────

enum WalRequest {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        done: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Handle to the task that owns a `Wal`. Appends submitted while a flush is
/// in progress are written and fsynced together as one batch.
#[derive(Clone)]
pub struct WalWriter {
    tx: mpsc::Sender<WalRequest>,
}

impl WalWriter {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Resolves once the event is durable.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(WalRequest::Append { event, done }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn rewrite(&self, events: Vec<Event>) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(WalRequest::Rewrite { events, done }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (done, rx) = oneshot::channel();
        if self.send(WalRequest::AppendsSinceCompact { done }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, req: WalRequest) -> io::Result<()> {
        self.tx.send(req).await.map_err(|_| closed())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalRequest>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(req) = rx.recv().await {
        let mut deferred = None;
        match req {
            WalRequest::Append { event, done } => {
                batch.push((event, done));
                // Everything already queued joins this batch.
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalRequest::Append { event, done } => batch.push((event, done)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut wal, &mut batch);
            }
            other => deferred = Some(other),
        }
        if let Some(req) = deferred {
            handle_control(&mut wal, req);
        }
    }
    debug!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.push(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed push so stale bytes never prefix the next batch.
    let synced = wal.sync();
    if result.is_ok() {
        result = synced;
    }

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!(path = %wal.path().display(), error = %e, "WAL batch failed");
    }
    for (_, done) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = done.send(reply);
    }
}

fn handle_control(wal: &mut Wal, req: WalRequest) {
    match req {
        WalRequest::Rewrite { events, done } => {
            let _ = done.send(wal.rewrite(&events));
        }
        WalRequest::AppendsSinceCompact { done } => {
            let _ = done.send(wal.appends_since_compact());
        }
        WalRequest::Append { event, done } => {
            let mut single = vec![(event, done)];
            commit_batch(wal, &mut single);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Capability, ServiceCategory, Staff};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("petsched_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn staff(name: &str) -> Event {
        Event::StaffCreated(Staff {
            id: Ulid::new(),
            name: name.into(),
            capability: Capability::new("GROOMER").unwrap(),
            phone: None,
            email: None,
        })
    }

    #[test]
    fn push_sync_and_replay() {
        let path = tmp_path("push_sync.wal");
        let events = vec![
            staff("Lan"),
            Event::CategoryUpserted(ServiceCategory {
                id: Ulid::new(),
                name: "Grooming".into(),
                capability: Capability::new("groomer"),
            }),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.push(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
            wal.sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = staff("Binh");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.push(&event).unwrap();
            wal.sync().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_oversized_length_prefix() {
        let path = tmp_path("oversized_len.wal");
        let event = staff("Chi");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.push(&event).unwrap();
            wal.sync().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_rejects_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        {
            let payload = bincode::serialize(&Event::StaffDeleted { id: Ulid::new() }).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_shrinks_and_accepts_appends() {
        let path = tmp_path("rewrite.wal");
        let keep = staff("Chi");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.push(&keep).unwrap();
            for _ in 0..20 {
                let id = Ulid::new();
                wal.push(&staff("temp")).unwrap();
                wal.push(&Event::StaffDeleted { id }).unwrap();
            }
            wal.sync().unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = staff("Dung");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.rewrite(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.push(&later).unwrap();
            wal.sync().unwrap();
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "rewritten log should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, later]);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn writer_commits_concurrent_appends() {
        let path = tmp_path("writer_concurrent.wal");
        let writer = WalWriter::spawn(Wal::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let w = writer.clone();
            handles.push(tokio::spawn(async move {
                w.append(staff(&format!("staff-{i}"))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(writer.appends_since_compact().await, 32);
        assert_eq!(Wal::replay(&path).unwrap().len(), 32);

        writer.rewrite(vec![staff("only")]).await.unwrap();
        assert_eq!(writer.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let _ = fs::remove_file(&path);
    }
}
