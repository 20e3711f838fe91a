use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;

const CHANNEL_CAPACITY: usize = 4096;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Read one frame. `Ok(None)` on clean EOF, torn tail, or checksum mismatch.
fn read_frame(input: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    if let Err(e) = input.read_exact(&mut word) {
        return eof_as_none(e);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if let Err(e) = input.read_exact(&mut payload) {
        return eof_as_none(e);
    }
    if let Err(e) = input.read_exact(&mut word) {
        return eof_as_none(e);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

fn eof_as_none(e: io::Error) -> io::Result<Option<Event>> {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Ok(None)
    } else {
        Err(e)
    }
}

/// Append-only log of booking and counter events.
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

    /// Every intact event on disk, in order. A damaged tail ends the replay.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_frame(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }

    /// Buffer without syncing; pair with `sync`.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the log with `events`: write a sibling temp file, fsync, rename over.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for event in events {
                write_frame(&mut out, event)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

// ── Group-commit writer ──────────────────────────────────────────

enum WalCommand {
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

/// Cloneable handle to the task that owns the `Wal`.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Move `wal` onto a background task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Resolves once the event is fsynced, possibly together with other appends.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(WalCommand::Append { event, done }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn rewrite(&self, events: Vec<Event>) -> io::Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(WalCommand::Rewrite { events, done }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (done, rx) = oneshot::channel();
        if self.request(WalCommand::AppendsSinceCompact { done }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn request(&self, cmd: WalCommand) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| closed())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

/// Take the first append, greedily drain whatever else is queued, then fsync once
/// and answer the whole batch. Non-append commands flush the pending batch first.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Event, oneshot::Sender<io::Result<()>>)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            WalCommand::Append { event, done } => {
                batch.push((event, done));
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, done } => batch.push((event, done)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit(&mut wal, &mut batch);
            }
            other => deferred = Some(other),
        }
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let pushed = batch.iter().try_for_each(|(event, _)| wal.push(event));
    // Sync even after a failed push so half-written bytes never leak into the next batch.
    let synced = wal.sync();
    let result = pushed.and(synced);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, done) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = done.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, done } => {
            let _ = done.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { done } => {
            let _ = done.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, done } => {
            let mut batch = vec![(event, done)];
            commit(wal, &mut batch);
        }
    }
}
