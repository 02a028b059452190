//! On-disk format for explanations.
//!
//! Layout: a bincode header (magic, format version, payload size, CRC32
//! checksum, record count) followed by the bincode-encoded [`Explanation`].
//! Writes go through a temp file and a rename so a crash never leaves a
//! truncated explanation behind; loads validate magic, version, and checksum
//! before deserializing.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExplainError;
use crate::explain::Explanation;

/// Increment when the file layout changes.
const FORMAT_VERSION: u32 = 1;

const MAGIC: &[u8; 8] = b"APRIEXP1";

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 8],
    version: u32,
    payload_size: u64,
    /// CRC32 of the payload section.
    checksum: u32,
    record_count: u64,
}

impl FileHeader {
    fn validate(&self) -> Result<(), ExplainError> {
        if &self.magic != MAGIC {
            return Err(ExplainError::CorruptFile {
                reason: format!("bad magic {:?}, expected {:?}", self.magic, MAGIC),
            });
        }
        if self.version != FORMAT_VERSION {
            return Err(ExplainError::CorruptFile {
                reason: format!(
                    "unsupported format version {}, expected {}",
                    self.version, FORMAT_VERSION
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn save(explanation: &Explanation, path: &Path) -> Result<(), ExplainError> {
    let payload = bincode::serialize(explanation)?;
    let header = FileHeader {
        magic: *MAGIC,
        version: FORMAT_VERSION,
        payload_size: payload.len() as u64,
        checksum: crc32fast::hash(&payload),
        record_count: explanation.results.len() as u64,
    };

    let tmp_path = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        bincode::serialize_into(&mut writer, &header)?;
        writer.write_all(&payload)?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn load(path: &Path) -> Result<Explanation, ExplainError> {
    let mut reader = BufReader::new(File::open(path)?);

    let header: FileHeader = bincode::deserialize_from(&mut reader)?;
    header.validate()?;

    let mut payload = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != header.checksum {
        return Err(ExplainError::CorruptFile {
            reason: "payload checksum mismatch".to_owned(),
        });
    }

    let explanation: Explanation = bincode::deserialize(&payload)?;
    if explanation.results.len() as u64 != header.record_count {
        return Err(ExplainError::CorruptFile {
            reason: format!(
                "header promises {} records, payload holds {}",
                header.record_count,
                explanation.results.len()
            ),
        });
    }
    Ok(explanation)
}

impl Explanation {
    /// Writes the explanation to `path` in the versioned, checksummed format.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ExplainError> {
        save(self, path.as_ref())
    }

    /// Loads an explanation previously written by
    /// [`save_to_file`](Explanation::save_to_file).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExplainError> {
        load(path.as_ref())
    }
}
