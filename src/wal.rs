use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::SessionEvent;

/// File magic plus format version, written once at the start of every journal.
const HEADER: [u8; 8] = *b"OCCJ\x00\x01\x00\x00";

/// Entries larger than this are treated as corruption rather than allocated.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode one record as `[u32 len][bincode SessionEvent][u32 crc32]`.
fn encode_record(writer: &mut impl Write, event: &SessionEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Next {
    Record(SessionEvent),
    End,
    /// Torn or corrupt tail; everything from here on is ignored.
    Damaged,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_next(reader: &mut impl Read) -> io::Result<Next> {
    let mut len_buf = [0u8; 4];
    // A clean end of file lands exactly on a record boundary.
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(Next::End);
    }
    len_buf[0] = first[0];
    if !read_exact_or_eof(reader, &mut len_buf[1..])? {
        return Ok(Next::Damaged);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Next::Damaged);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut payload)? || !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Next::Damaged);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Next::Damaged);
    }
    match bincode::deserialize::<SessionEvent>(&payload) {
        Ok(event) => Ok(Next::Record(event)),
        Err(_) => Ok(Next::Damaged),
    }
}

/// Result of reading a journal back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<SessionEvent>,
    /// True when a torn or corrupt tail was dropped.
    pub truncated_tail: bool,
}

/// Append-only session journal.
///
/// Layout: an 8-byte header, then records of `[u32 len][bincode][u32 crc32]`.
/// A crash mid-append leaves a torn last record, which replay discards.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the journal at `path`, writing the header to a new file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            writer.write_all(&HEADER)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &SessionEvent) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a full snapshot to a side file and fsync it. Slow; runs before the swap.
    pub fn write_compact_file(path: &Path, events: &[SessionEvent]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        writer.write_all(&HEADER)?;
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the journal and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact record. A missing file is an empty journal; a file
    /// with a foreign header is an error rather than silently ignored.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER.len()];
        if !read_exact_or_eof(&mut reader, &mut header)? {
            return Ok(Replay::default());
        }
        if header != HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a session journal", path.display()),
            ));
        }

        let mut replay = Replay::default();
        loop {
            match decode_next(&mut reader)? {
                Next::Record(event) => replay.events.push(event),
                Next::End => break,
                Next::Damaged => {
                    replay.truncated_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
