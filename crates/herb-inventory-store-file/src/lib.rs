//! File persistence and CSV ingest for the herb inventory.
//!
//! Snapshots use a flat little-endian layout: an `i32` capacity, an `i32`
//! record count, then one fixed-width record per entry. Text fields are
//! NUL-padded UTF-8 buffers, so a snapshot is position-addressable without
//! any framing.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use herb_inventory_core::{
    InventoryError, InventoryStore, MedicineRecord, MAX_MEDICINES, NAME_BUF_LEN, ORIGIN_BUF_LEN,
    SPEC_BUF_LEN, USAGE_DAYS,
};
use serde::{Deserialize, Serialize};

/// Outcome of a CSV ingest pass. `applied` counts rows or cells taken on
/// board, `skipped` counts the ones dropped with a logged reason.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub applied: usize,
    pub skipped: usize,
}

fn write_i32(out: &mut impl Write, value: i32) -> Result<(), InventoryError> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_i64(out: &mut impl Write, value: i64) -> Result<(), InventoryError> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_text(out: &mut impl Write, value: &str, buf_len: usize) -> Result<(), InventoryError> {
    let bytes = value.as_bytes();
    if bytes.len() >= buf_len {
        return Err(InventoryError::InvalidRecord(format!(
            "text field exceeds {} bytes",
            buf_len - 1
        )));
    }
    out.write_all(bytes)?;
    out.write_all(&vec![0_u8; buf_len - bytes.len()])?;
    Ok(())
}

fn read_i32(input: &mut impl Read) -> Result<i32, InventoryError> {
    let mut buf = [0_u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64(input: &mut impl Read) -> Result<i64, InventoryError> {
    let mut buf = [0_u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_text(input: &mut impl Read, buf_len: usize) -> Result<String, InventoryError> {
    let mut buf = vec![0_u8; buf_len];
    input.read_exact(&mut buf)?;
    let end = buf.iter().position(|byte| *byte == 0).unwrap_or(buf_len);
    String::from_utf8(buf[..end].to_vec())
        .map_err(|_| InventoryError::CorruptData("text field is not valid UTF-8".to_string()))
}

fn write_record(out: &mut impl Write, record: &MedicineRecord) -> Result<(), InventoryError> {
    write_i32(out, record.id)?;
    write_text(out, &record.name, NAME_BUF_LEN)?;
    write_text(out, &record.origin, ORIGIN_BUF_LEN)?;
    write_text(out, &record.spec, SPEC_BUF_LEN)?;
    write_i32(out, record.stock)?;
    write_i32(out, record.warning_threshold)?;
    for usage in &record.usage_history {
        write_i32(out, *usage)?;
    }
    write_i32(out, record.last_usage)?;
    write_i32(out, i32::from(record.is_warning))?;
    write_i64(out, record.warning_time)?;
    write_i64(out, record.response_time)?;
    Ok(())
}

fn read_record(input: &mut impl Read) -> Result<MedicineRecord, InventoryError> {
    let id = read_i32(input)?;
    let name = read_text(input, NAME_BUF_LEN)?;
    let origin = read_text(input, ORIGIN_BUF_LEN)?;
    let spec = read_text(input, SPEC_BUF_LEN)?;
    let stock = read_i32(input)?;
    let warning_threshold = read_i32(input)?;
    let mut usage_history = [0_i32; USAGE_DAYS];
    for slot in &mut usage_history {
        *slot = read_i32(input)?;
    }
    let last_usage = read_i32(input)?;
    let is_warning = read_i32(input)? != 0;
    let warning_time = read_i64(input)?;
    let response_time = read_i64(input)?;

    Ok(MedicineRecord {
        id,
        name,
        origin,
        spec,
        stock,
        warning_threshold,
        usage_history,
        last_usage,
        is_warning,
        warning_time,
        response_time,
    })
}

/// Write the whole store to `path`, replacing any existing snapshot.
///
/// # Errors
/// Returns [`InventoryError::Io`] when the file cannot be created or
/// written.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn save_snapshot(store: &InventoryStore, path: &Path) -> Result<(), InventoryError> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    write_i32(&mut out, store.capacity() as i32)?;
    write_i32(&mut out, store.len() as i32)?;
    for record in store.records() {
        write_record(&mut out, record)?;
    }
    out.flush()?;
    tracing::debug!(path = %path.display(), records = store.len(), "snapshot saved");
    Ok(())
}

/// Read a snapshot back into a fresh store, re-checking every invariant.
///
/// # Errors
/// Returns [`InventoryError::Io`] when the file cannot be read and
/// [`InventoryError::CorruptData`] when the header or body violates the
/// store invariants.
pub fn restore_snapshot(path: &Path) -> Result<InventoryStore, InventoryError> {
    let file = File::open(path)?;
    let mut input = BufReader::new(file);

    let capacity = read_i32(&mut input)?;
    let length = read_i32(&mut input)?;
    if capacity <= 0 || capacity > i32::try_from(MAX_MEDICINES).unwrap_or(i32::MAX) {
        return Err(InventoryError::CorruptData(format!(
            "snapshot capacity {capacity} outside 1..={MAX_MEDICINES}"
        )));
    }
    if length < 0 || length > capacity {
        return Err(InventoryError::CorruptData(format!(
            "snapshot length {length} outside 0..={capacity}"
        )));
    }

    let capacity = usize::try_from(capacity)
        .map_err(|_| InventoryError::CorruptData("snapshot capacity unusable".to_string()))?;
    let length = usize::try_from(length)
        .map_err(|_| InventoryError::CorruptData("snapshot length unusable".to_string()))?;

    let mut records = Vec::with_capacity(length);
    for _ in 0..length {
        records.push(read_record(&mut input)?);
    }

    let store = InventoryStore::from_parts(capacity, records)?;
    tracing::debug!(path = %path.display(), records = store.len(), "snapshot restored");
    Ok(store)
}

fn map_csv_err(err: csv::Error) -> InventoryError {
    match err.into_kind() {
        csv::ErrorKind::Io(io_err) => InventoryError::Io(io_err),
        other => InventoryError::Parse(format!("csv: {other:?}")),
    }
}

fn parse_cell<T: std::str::FromStr>(row: &csv::StringRecord, index: usize) -> Option<T> {
    row.get(index).and_then(|cell| cell.trim().parse().ok())
}

/// Load catalog rows `id,name,origin,spec,stock,warning_threshold` (after a
/// header row) into the store. Each row is an independent insert; rows that
/// fail to parse, validate, or insert are skipped with a logged warning.
///
/// # Errors
/// Returns [`InventoryError::Io`] when the file cannot be opened and
/// [`InventoryError::Parse`] when the CSV structure itself is unreadable.
pub fn load_catalog_csv(
    store: &mut InventoryStore,
    path: &Path,
) -> Result<IngestSummary, InventoryError> {
    let mut reader = csv::Reader::from_path(path).map_err(map_csv_err)?;
    let mut summary = IngestSummary::default();

    for (row_number, row) in reader.records().enumerate() {
        let row = row.map_err(map_csv_err)?;
        let parsed = parse_catalog_row(&row);
        match parsed {
            Ok(record) => {
                let id = record.id;
                match store.insert(record) {
                    Ok(()) => summary.applied += 1,
                    Err(err) => {
                        tracing::warn!(row = row_number + 2, id, %err, "catalog row rejected");
                        summary.skipped += 1;
                    }
                }
            }
            Err(reason) => {
                tracing::warn!(row = row_number + 2, reason, "catalog row unreadable");
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        path = %path.display(),
        applied = summary.applied,
        skipped = summary.skipped,
        "catalog loaded"
    );
    Ok(summary)
}

fn parse_catalog_row(row: &csv::StringRecord) -> Result<MedicineRecord, &'static str> {
    let id: i32 = parse_cell(row, 0).ok_or("bad id cell")?;
    let name = row.get(1).ok_or("missing name cell")?;
    let origin = row.get(2).ok_or("missing origin cell")?;
    let spec = row.get(3).ok_or("missing spec cell")?;
    let stock: i32 = parse_cell(row, 4).ok_or("bad stock cell")?;
    let warning_threshold: i32 = parse_cell(row, 5).ok_or("bad threshold cell")?;
    MedicineRecord::new(id, name.trim(), origin.trim(), spec.trim(), stock, warning_threshold)
        .map_err(|_| "record failed validation")
}

/// Load daily-usage rows into existing records. The header names the
/// medicine id for each usage column (`day,<id>,<id>,...`); data rows carry
/// a `D-k` label (k days ago, 0..=6) followed by one usage value per
/// column. Cells for absent ids, malformed cells, and rows with a bad day
/// label are skipped with a logged warning. Writing today's column keeps
/// the record's `last_usage` mirror current.
///
/// # Errors
/// Returns [`InventoryError::Io`] when the file cannot be opened and
/// [`InventoryError::Parse`] when the header row does not name valid
/// medicine ids.
pub fn load_usage_csv(
    store: &mut InventoryStore,
    path: &Path,
) -> Result<IngestSummary, InventoryError> {
    let mut reader = csv::Reader::from_path(path).map_err(map_csv_err)?;

    let headers = reader.headers().map_err(map_csv_err)?.clone();
    let mut column_ids = Vec::with_capacity(headers.len().saturating_sub(1));
    for cell in headers.iter().skip(1) {
        let id: i32 = cell
            .trim()
            .parse()
            .map_err(|_| InventoryError::Parse(format!("usage header cell `{cell}` is not an id")))?;
        column_ids.push(id);
    }

    let mut summary = IngestSummary::default();
    for (row_number, row) in reader.records().enumerate() {
        let row = row.map_err(map_csv_err)?;
        let Some(day_index) = parse_day_label(row.get(0).unwrap_or("")) else {
            tracing::warn!(
                row = row_number + 2,
                label = row.get(0).unwrap_or(""),
                "usage row has a bad day label"
            );
            summary.skipped += 1;
            continue;
        };

        for (column, id) in column_ids.iter().enumerate() {
            let Some(usage) = parse_cell::<i32>(&row, column + 1) else {
                tracing::warn!(row = row_number + 2, id, "usage cell unreadable");
                summary.skipped += 1;
                continue;
            };
            let Some(record) = store.find_mut(*id) else {
                tracing::warn!(row = row_number + 2, id, "usage cell for unknown medicine");
                summary.skipped += 1;
                continue;
            };
            match record.set_usage(day_index, usage) {
                Ok(()) => summary.applied += 1,
                Err(err) => {
                    tracing::warn!(row = row_number + 2, id, %err, "usage cell rejected");
                    summary.skipped += 1;
                }
            }
        }
    }

    tracing::info!(
        path = %path.display(),
        applied = summary.applied,
        skipped = summary.skipped,
        "usage history loaded"
    );
    Ok(summary)
}

/// `D-k` labels count back from today: `D-0` is today (slot 6), `D-6` is
/// six days ago (slot 0).
fn parse_day_label(label: &str) -> Option<usize> {
    let days_ago: usize = label.trim().strip_prefix("D-")?.parse().ok()?;
    if days_ago >= USAGE_DAYS {
        return None;
    }
    Some(USAGE_DAYS - 1 - days_ago)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn unique_temp_dir() -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir()
            .join(format!("herb-inventory-store-{}-{seq}", std::process::id()));
        if let Err(err) = fs::create_dir_all(&dir) {
            panic!("temp dir should be creatable: {err}");
        }
        dir
    }

    fn mk_record(id: i32, stock: i32, threshold: i32) -> MedicineRecord {
        match MedicineRecord::new(id, "licorice", "Inner Mongolia", "1kg/box", stock, threshold) {
            Ok(record) => record,
            Err(err) => panic!("fixture record should validate: {err}"),
        }
    }

    fn mk_store(ids: &[i32]) -> InventoryStore {
        let mut store = match InventoryStore::new(20) {
            Ok(store) => store,
            Err(err) => panic!("store should build: {err}"),
        };
        for id in ids {
            if let Err(err) = store.insert(mk_record(*id, 100, 10)) {
                panic!("insert id {id} should succeed: {err}");
            }
        }
        store
    }

    #[test]
    fn snapshot_round_trip_preserves_every_field() {
        let dir = unique_temp_dir();
        let path = dir.join("inventory.bin");

        let mut store = mk_store(&[3, 7, 12]);
        match store.find_mut(7) {
            Some(record) => {
                record.usage_history = [1, 0, 2, 0, 3, 4, 5];
                record.last_usage = 5;
                record.is_warning = true;
                record.warning_time = 1_700_000_000;
                record.response_time = 1_700_003_600;
            }
            None => panic!("record 7 should exist"),
        }

        if let Err(err) = save_snapshot(&store, &path) {
            panic!("save should succeed: {err}");
        }
        let restored = match restore_snapshot(&path) {
            Ok(restored) => restored,
            Err(err) => panic!("restore should succeed: {err}"),
        };

        assert_eq!(restored.capacity(), store.capacity());
        assert_eq!(restored.records(), store.records());
    }

    #[test]
    fn restore_rejects_corrupt_headers() {
        let dir = unique_temp_dir();

        let cases: [(&str, i32, i32); 3] = [
            ("zero-capacity.bin", 0, 0),
            ("oversized-capacity.bin", 400, 0),
            ("overlong.bin", 10, 11),
        ];
        for (file_name, capacity, length) in cases {
            let path = dir.join(file_name);
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&capacity.to_le_bytes());
            bytes.extend_from_slice(&length.to_le_bytes());
            if let Err(err) = fs::write(&path, &bytes) {
                panic!("fixture write should succeed: {err}");
            }

            match restore_snapshot(&path) {
                Err(InventoryError::CorruptData(_)) => {}
                Err(err) => panic!("{file_name}: wrong error kind: {err}"),
                Ok(_) => panic!("{file_name}: corrupt header should be rejected"),
            }
        }
    }

    #[test]
    fn restore_rejects_truncated_body() {
        let dir = unique_temp_dir();
        let path = dir.join("truncated.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10_i32.to_le_bytes());
        bytes.extend_from_slice(&2_i32.to_le_bytes());
        bytes.extend_from_slice(&[0_u8; 40]);
        if let Err(err) = fs::write(&path, &bytes) {
            panic!("fixture write should succeed: {err}");
        }

        assert!(restore_snapshot(&path).is_err());
    }

    #[test]
    fn catalog_load_skips_bad_rows_and_duplicates() {
        let dir = unique_temp_dir();
        let path = dir.join("catalog.csv");
        let csv = "id,name,origin,spec,stock,warning_threshold\n\
                   1,ephedra,Hebei,500g/bag,120,15\n\
                   not-a-number,cinnamon,Guangxi,250g/bag,80,10\n\
                   1,ephedra again,Hebei,500g/bag,60,5\n\
                   12,licorice,Inner Mongolia,1kg/box,200,20\n\
                   13,,Sichuan,1kg/box,50,5\n";
        if let Err(err) = fs::write(&path, csv) {
            panic!("fixture write should succeed: {err}");
        }

        let mut store = mk_store(&[]);
        let summary = match load_catalog_csv(&mut store, &path) {
            Ok(summary) => summary,
            Err(err) => panic!("catalog load should succeed: {err}"),
        };

        assert_eq!(summary, IngestSummary { applied: 2, skipped: 3 });
        let ids: Vec<i32> = store.records().iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 12]);
        assert_eq!(store.records()[0].stock, 120);
    }

    #[test]
    fn usage_load_maps_day_labels_and_maintains_last_usage() {
        let dir = unique_temp_dir();
        let path = dir.join("usage.csv");
        let csv = "day,3,7\n\
                   D-6,4,9\n\
                   D-0,11,0\n";
        if let Err(err) = fs::write(&path, csv) {
            panic!("fixture write should succeed: {err}");
        }

        let mut store = mk_store(&[3, 7]);
        let summary = match load_usage_csv(&mut store, &path) {
            Ok(summary) => summary,
            Err(err) => panic!("usage load should succeed: {err}"),
        };
        assert_eq!(summary, IngestSummary { applied: 4, skipped: 0 });

        match store.find(3) {
            Some(record) => {
                assert_eq!(record.usage_history[0], 4);
                assert_eq!(record.usage_history[6], 11);
                assert_eq!(record.last_usage, 11);
            }
            None => panic!("record 3 should exist"),
        }
        match store.find(7) {
            Some(record) => {
                assert_eq!(record.usage_history[0], 9);
                assert_eq!(record.last_usage, 0);
            }
            None => panic!("record 7 should exist"),
        }
    }

    #[test]
    fn usage_load_skips_unknown_ids_and_bad_labels() {
        let dir = unique_temp_dir();
        let path = dir.join("usage-partial.csv");
        let csv = "day,3,99\n\
                   D-1,6,6\n\
                   yesterday,1,1\n\
                   D-9,1,1\n";
        if let Err(err) = fs::write(&path, csv) {
            panic!("fixture write should succeed: {err}");
        }

        let mut store = mk_store(&[3]);
        let summary = match load_usage_csv(&mut store, &path) {
            Ok(summary) => summary,
            Err(err) => panic!("usage load should succeed: {err}"),
        };

        // One applied cell (id 3, D-1); the unknown-id cell and the two
        // bad-label rows are skipped.
        assert_eq!(summary, IngestSummary { applied: 1, skipped: 3 });
        match store.find(3) {
            Some(record) => assert_eq!(record.usage_history[5], 6),
            None => panic!("record 3 should exist"),
        }
    }

    #[test]
    fn usage_load_rejects_non_numeric_header() {
        let dir = unique_temp_dir();
        let path = dir.join("usage-bad-header.csv");
        if let Err(err) = fs::write(&path, "day,ephedra\nD-0,5\n") {
            panic!("fixture write should succeed: {err}");
        }

        let mut store = mk_store(&[3]);
        match load_usage_csv(&mut store, &path) {
            Err(InventoryError::Parse(_)) => {}
            Err(err) => panic!("wrong error kind: {err}"),
            Ok(_) => panic!("bad header should be rejected"),
        }
    }
}
