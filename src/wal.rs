use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Record;

/// Encode one record as `[len][bincode][crc32]`.
fn encode_record<T: Serialize>(writer: &mut impl Write, record: &Record<T>) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Reads exactly `buf.len()` bytes. `Ok(false)` on a clean or truncated end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of store records.
///
/// Format per entry: `[u32: len][bincode: Record<T>][u32: crc32]`, little endian.
/// `len` counts the payload only. A torn trailing entry (crash mid-write) fails
/// the length or CRC check and is dropped on replay, along with anything after it.
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

    /// Buffer a record without flushing. Follow with `flush_sync()` to commit.
    pub fn append_buffered<T: Serialize>(&mut self, record: &Record<T>) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    #[cfg(test)]
    pub fn append<T: Serialize>(&mut self, record: &Record<T>) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
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

    /// Write the compacted log to a sibling temp file and fsync it.
    pub fn write_compact_file<T: Serialize>(path: &Path, records: &[Record<T>]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay every intact record. A missing file is an empty log.
    pub fn replay<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<Record<T>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_WAL_RECORD_BYTES {
                tracing::warn!(
                    "wal {}: oversized record ({len} bytes), stopping replay",
                    path.display()
                );
                break;
            }

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                tracing::warn!("wal {}: truncated tail discarded", path.display());
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("wal {}: checksum mismatch, stopping replay", path.display());
                break;
            }

            match bincode::deserialize::<Record<T>>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "wal {}: undecodable record ({e}), stopping replay",
                        path.display()
                    );
                    break;
                }
            }
        }

        Ok(records)
    }
}
