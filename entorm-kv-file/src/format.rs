//! The on-disk record formats from spec §6: the `<prefix>.nosql_db` snapshot file and the
//! `<prefix>.nosql_log` append-only log, both big-endian length-prefixed.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

/// One log record: a `delete` or a `put`, exactly as spec §6 names `op=0`/`op=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Delete(Vec<u8>),
    Put(Vec<u8>, Vec<u8>),
}

const OP_DELETE: u8 = 0;
const OP_PUT: u8 = 1;

fn write_u32(out: &mut impl Write, v: u32) -> io::Result<()> { out.write_all(&v.to_be_bytes()) }

fn read_u32(input: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Append one record to the log. Callers are responsible for calling `sync_all`/`sync_data`
/// themselves (spec §6's `flush()`) — this does a plain buffered write.
pub fn append_log_record(file: &mut File, op: &LogOp) -> io::Result<()> {
    match op {
        LogOp::Delete(key) => {
            file.write_all(&[OP_DELETE])?;
            write_u32(file, key.len() as u32)?;
            file.write_all(key)?;
        }
        LogOp::Put(key, value) => {
            file.write_all(&[OP_PUT])?;
            write_u32(file, key.len() as u32)?;
            write_u32(file, value.len() as u32)?;
            file.write_all(key)?;
            file.write_all(value)?;
        }
    }
    Ok(())
}

/// Read every record from the log at `path`, in append order. A missing file reads as empty (a
/// fresh database has no log yet). A record truncated mid-write (the process crashed while
/// appending) stops replay at the last complete record rather than erroring — the reference
/// store does not promise durability of the last partial write.
pub fn read_log_records(path: &Path) -> io::Result<Vec<LogOp>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut records = Vec::new();
    loop {
        let mut op_byte = [0u8; 1];
        match file.read_exact(&mut op_byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let record = match op_byte[0] {
            OP_DELETE => {
                let Ok(klen) = read_u32(&mut file) else { break };
                let mut key = vec![0u8; klen as usize];
                if file.read_exact(&mut key).is_err() {
                    break;
                }
                LogOp::Delete(key)
            }
            OP_PUT => {
                let (Ok(klen), Ok(vlen)) = (read_u32(&mut file), read_u32(&mut file)) else { break };
                let mut key = vec![0u8; klen as usize];
                let mut value = vec![0u8; vlen as usize];
                if file.read_exact(&mut key).is_err() || file.read_exact(&mut value).is_err() {
                    break;
                }
                LogOp::Put(key, value)
            }
            _ => break, // corrupt op byte; reference store stops rather than guessing a layout
        };
        records.push(record);
    }
    Ok(records)
}

/// Read a snapshot file: `[u32 count]` then `count` `[u32 klen][u32 vlen][klen bytes][vlen bytes]`
/// records. A missing file reads as an empty table.
pub fn read_snapshot(path: &Path) -> io::Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e),
    };
    let count = read_u32(&mut file)?;
    let mut table = BTreeMap::new();
    for _ in 0..count {
        let klen = read_u32(&mut file)?;
        let vlen = read_u32(&mut file)?;
        let mut key = vec![0u8; klen as usize];
        let mut value = vec![0u8; vlen as usize];
        file.read_exact(&mut key)?;
        file.read_exact(&mut value)?;
        table.insert(key, value);
    }
    Ok(table)
}

/// Write `table` to `path` atomically: serialize to a sibling `.tmp` file, `sync_all`, then
/// `rename` over the destination (spec §6: "writes a fresh snapshot file atomically (via
/// rename)").
pub fn write_snapshot_atomic(path: &Path, table: &BTreeMap<Vec<u8>, Vec<u8>>) -> io::Result<()> {
    let tmp_path = path.with_extension("nosql_db.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        write_u32(&mut tmp, table.len() as u32)?;
        for (key, value) in table {
            write_u32(&mut tmp, key.len() as u32)?;
            write_u32(&mut tmp, value.len() as u32)?;
            tmp.write_all(key)?;
            tmp.write_all(value)?;
        }
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    #[test]
    fn log_round_trips_put_and_delete() {
        let dir = std::env::temp_dir().join(format!("entorm-kv-file-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let log_path = dir.join("t.nosql_log");
        let _ = fs::remove_file(&log_path);

        let mut file = File::create(&log_path).unwrap();
        append_log_record(&mut file, &LogOp::Put(b"a".to_vec(), b"1".to_vec())).unwrap();
        append_log_record(&mut file, &LogOp::Delete(b"b".to_vec())).unwrap();
        file.rewind().unwrap();
        drop(file);

        let records = read_log_records(&log_path).unwrap();
        assert_eq!(records, vec![LogOp::Put(b"a".to_vec(), b"1".to_vec()), LogOp::Delete(b"b".to_vec())]);
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let records = read_log_records(Path::new("/nonexistent/path.nosql_log")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = std::env::temp_dir().join(format!("entorm-kv-file-snap-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("t.nosql_db");

        let mut table = BTreeMap::new();
        table.insert(b"a".to_vec(), b"1".to_vec());
        table.insert(b"b".to_vec(), b"2".to_vec());
        write_snapshot_atomic(&path, &table).unwrap();

        let read_back = read_snapshot(&path).unwrap();
        assert_eq!(read_back, table);
    }
}
