use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Domain maximum for the number of catalog entries a store may hold.
pub const MAX_MEDICINES: usize = 300;

/// Fixed text buffer sizes from the persisted record layout. The usable
/// length is one byte less than the buffer (terminator byte).
pub const NAME_BUF_LEN: usize = 50;
pub const ORIGIN_BUF_LEN: usize = 50;
pub const SPEC_BUF_LEN: usize = 30;

/// Number of tracked daily-usage slots. Index 0 is six days ago, index 6
/// is today (D-0).
pub const USAGE_DAYS: usize = 7;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("invalid capacity {0}: must be between 1 and {MAX_MEDICINES}")]
    InvalidCapacity(usize),
    #[error("inventory is full (capacity {0})")]
    CapacityExceeded(usize),
    #[error("medicine id {0} already exists")]
    DuplicateId(i32),
    #[error("inventory is empty")]
    EmptyStore,
    #[error("medicine id {0} not found")]
    NotFound(i32),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt snapshot: {0}")]
    CorruptData(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// One catalog entry with its consumption history and warning state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicineRecord {
    pub id: i32,
    pub name: String,
    pub origin: String,
    pub spec: String,
    pub stock: i32,
    pub warning_threshold: i32,
    #[serde(default)]
    pub usage_history: [i32; USAGE_DAYS],
    #[serde(default)]
    pub last_usage: i32,
    #[serde(default)]
    pub is_warning: bool,
    #[serde(default)]
    pub warning_time: i64,
    #[serde(default)]
    pub response_time: i64,
}

impl MedicineRecord {
    /// Build a validated catalog record with empty usage history and a
    /// cleared warning state.
    ///
    /// # Errors
    /// Returns [`InventoryError::InvalidRecord`] when any field violates the
    /// record constraints.
    pub fn new(
        id: i32,
        name: &str,
        origin: &str,
        spec: &str,
        stock: i32,
        warning_threshold: i32,
    ) -> Result<Self, InventoryError> {
        let record = Self {
            id,
            name: name.to_string(),
            origin: origin.to_string(),
            spec: spec.to_string(),
            stock,
            warning_threshold,
            usage_history: [0; USAGE_DAYS],
            last_usage: 0,
            is_warning: false,
            warning_time: 0,
            response_time: 0,
        };
        record.validate()?;
        Ok(record)
    }

    /// Validate the record constraints: positive id, non-empty bounded text
    /// fields, non-negative quantities. Over-length text is rejected rather
    /// than truncated so the caller keeps the record it intended to write.
    ///
    /// # Errors
    /// Returns [`InventoryError::InvalidRecord`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.id <= 0 {
            return Err(InventoryError::InvalidRecord(
                "id must be a positive integer".to_string(),
            ));
        }

        for (label, value, buf_len) in [
            ("name", &self.name, NAME_BUF_LEN),
            ("origin", &self.origin, ORIGIN_BUF_LEN),
            ("spec", &self.spec, SPEC_BUF_LEN),
        ] {
            if value.is_empty() {
                return Err(InventoryError::InvalidRecord(format!(
                    "{label} must be non-empty"
                )));
            }
            if value.len() > buf_len - 1 {
                return Err(InventoryError::InvalidRecord(format!(
                    "{label} exceeds {} bytes",
                    buf_len - 1
                )));
            }
        }

        if self.stock < 0 {
            return Err(InventoryError::InvalidRecord(
                "stock must be non-negative".to_string(),
            ));
        }
        if self.warning_threshold < 0 {
            return Err(InventoryError::InvalidRecord(
                "warning threshold must be non-negative".to_string(),
            ));
        }
        if self.last_usage < 0 {
            return Err(InventoryError::InvalidRecord(
                "last usage must be non-negative".to_string(),
            ));
        }
        if self.usage_history.iter().any(|usage| *usage < 0) {
            return Err(InventoryError::InvalidRecord(
                "usage history entries must be non-negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Write one daily-usage slot. Writing today's slot (index 6) also
    /// refreshes the `last_usage` mirror.
    ///
    /// # Errors
    /// Returns [`InventoryError::InvalidRecord`] for an out-of-range day
    /// index or a negative usage value.
    pub fn set_usage(&mut self, day_index: usize, usage: i32) -> Result<(), InventoryError> {
        if day_index >= USAGE_DAYS {
            return Err(InventoryError::InvalidRecord(format!(
                "usage day index {day_index} out of range 0..{USAGE_DAYS}"
            )));
        }
        if usage < 0 {
            return Err(InventoryError::InvalidRecord(
                "usage must be non-negative".to_string(),
            ));
        }

        self.usage_history[day_index] = usage;
        if day_index == USAGE_DAYS - 1 {
            self.last_usage = usage;
        }
        Ok(())
    }
}

/// Capacity-bounded collection of records kept strictly ascending by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryStore {
    capacity: usize,
    records: Vec<MedicineRecord>,
}

impl InventoryStore {
    /// Create an empty store with a fixed capacity.
    ///
    /// # Errors
    /// Returns [`InventoryError::InvalidCapacity`] when `capacity` is zero or
    /// exceeds [`MAX_MEDICINES`].
    pub fn new(capacity: usize) -> Result<Self, InventoryError> {
        if capacity == 0 || capacity > MAX_MEDICINES {
            return Err(InventoryError::InvalidCapacity(capacity));
        }
        Ok(Self { capacity, records: Vec::with_capacity(capacity) })
    }

    /// Rebuild a store from persisted parts, re-checking every invariant the
    /// live store maintains by construction.
    ///
    /// # Errors
    /// Returns [`InventoryError::CorruptData`] when the capacity, length,
    /// ordering, or any record violates the store invariants.
    pub fn from_parts(
        capacity: usize,
        records: Vec<MedicineRecord>,
    ) -> Result<Self, InventoryError> {
        if capacity == 0 || capacity > MAX_MEDICINES {
            return Err(InventoryError::CorruptData(format!(
                "capacity {capacity} outside 1..={MAX_MEDICINES}"
            )));
        }
        if records.len() > capacity {
            return Err(InventoryError::CorruptData(format!(
                "length {} exceeds capacity {capacity}",
                records.len()
            )));
        }
        for pair in records.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(InventoryError::CorruptData(format!(
                    "records not strictly ascending at id {}",
                    pair[1].id
                )));
            }
        }
        for record in &records {
            record.validate().map_err(|err| {
                InventoryError::CorruptData(format!("record id {}: {err}", record.id))
            })?;
        }
        Ok(Self { capacity, records })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn records(&self) -> &[MedicineRecord] {
        &self.records
    }

    /// Mutable iteration for the monitor and loaders. Callers must leave
    /// `id` untouched; everything else is fair game.
    pub fn records_mut(&mut self) -> std::slice::IterMut<'_, MedicineRecord> {
        self.records.iter_mut()
    }

    /// Binary search by id. The sole lookup primitive; every exact-match
    /// path routes through here.
    #[must_use]
    pub fn find(&self, id: i32) -> Option<&MedicineRecord> {
        self.find_index(id).map(|index| &self.records[index])
    }

    /// Mutable variant of [`find`](Self::find) for the usage-history loader
    /// and field updates. Callers must leave `id` untouched.
    pub fn find_mut(&mut self, id: i32) -> Option<&mut MedicineRecord> {
        self.find_index(id).map(move |index| &mut self.records[index])
    }

    fn find_index(&self, id: i32) -> Option<usize> {
        if self.records.is_empty() {
            return None;
        }

        let mut low = 0_usize;
        let mut high = self.records.len() - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            match self.records[mid].id.cmp(&id) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => low = mid + 1,
                Ordering::Greater => {
                    if mid == 0 {
                        return None;
                    }
                    high = mid - 1;
                }
            }
        }
        None
    }

    /// Insert a record at its ordered position.
    ///
    /// # Errors
    /// Returns [`InventoryError::InvalidRecord`] when the record fails
    /// validation, [`InventoryError::CapacityExceeded`] when the store is
    /// full, or [`InventoryError::DuplicateId`] when the id is present.
    pub fn insert(&mut self, record: MedicineRecord) -> Result<(), InventoryError> {
        record.validate()?;
        if self.records.len() >= self.capacity {
            return Err(InventoryError::CapacityExceeded(self.capacity));
        }
        if self.find_index(record.id).is_some() {
            return Err(InventoryError::DuplicateId(record.id));
        }

        let mut insert_idx = 0;
        while insert_idx < self.records.len() && self.records[insert_idx].id < record.id {
            insert_idx += 1;
        }
        self.records.insert(insert_idx, record);
        Ok(())
    }

    /// Remove the record with the given id, shifting later records left.
    ///
    /// # Errors
    /// Returns [`InventoryError::EmptyStore`] when the store holds nothing,
    /// or [`InventoryError::NotFound`] when the id is absent.
    pub fn delete(&mut self, id: i32) -> Result<MedicineRecord, InventoryError> {
        if self.records.is_empty() {
            return Err(InventoryError::EmptyStore);
        }
        let index = self.find_index(id).ok_or(InventoryError::NotFound(id))?;
        Ok(self.records.remove(index))
    }

    /// Insert each record independently in input order, skipping failures.
    /// Returns the number of successful inserts. A later in-batch duplicate
    /// of an already-inserted id counts as a failure.
    pub fn batch_insert(&mut self, records: Vec<MedicineRecord>) -> usize {
        let mut success = 0;
        for record in records {
            let id = record.id;
            match self.insert(record) {
                Ok(()) => success += 1,
                Err(err) => {
                    tracing::warn!(id, %err, "batch insert skipped record");
                }
            }
        }
        success
    }

    /// Delete each id independently in input order, skipping failures.
    /// Returns the number of successful deletes.
    pub fn batch_delete(&mut self, ids: &[i32]) -> usize {
        let mut success = 0;
        for id in ids {
            match self.delete(*id) {
                Ok(_) => success += 1,
                Err(err) => {
                    tracing::warn!(id, %err, "batch delete skipped id");
                }
            }
        }
        success
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MedicineCategory {
    ExteriorRelease,
    HeatClearing,
    Tonifying,
    WarmingInterior,
    QiRegulating,
}

impl MedicineCategory {
    /// Closed partition of the id space into the five fixed bands.
    #[must_use]
    pub fn for_id(id: i32) -> Self {
        match id {
            0..=9 => Self::ExteriorRelease,
            10..=19 => Self::HeatClearing,
            20..=29 => Self::Tonifying,
            30..=39 => Self::WarmingInterior,
            _ => Self::QiRegulating,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExteriorRelease => "exterior-release",
            Self::HeatClearing => "heat-clearing",
            Self::Tonifying => "tonifying",
            Self::WarmingInterior => "warming-interior",
            Self::QiRegulating => "qi-regulating",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::ExteriorRelease => 0,
            Self::HeatClearing => 1,
            Self::Tonifying => 2,
            Self::WarmingInterior => 3,
            Self::QiRegulating => 4,
        }
    }
}

impl Display for MedicineCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Month-to-season mapping: spring 2-4, summer 5-7, autumn 8-10,
    /// winter 11, 12 and 1.
    #[must_use]
    pub fn for_month(month: u8) -> Self {
        match month {
            2..=4 => Self::Spring,
            5..=7 => Self::Summer,
            8..=10 => Self::Autumn,
            _ => Self::Winter,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Autumn => "autumn",
            Self::Winter => "winter",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Spring => 0,
            Self::Summer => 1,
            Self::Autumn => 2,
            Self::Winter => 3,
        }
    }
}

/// Fixed seasonal demand multipliers, rows by category, columns by season
/// (spring, summer, autumn, winter).
const SEASON_COEFFICIENTS: [[f64; 4]; 5] = [
    [1.2, 0.8, 1.0, 1.5], // exterior-release
    [0.9, 1.4, 1.1, 0.7], // heat-clearing
    [1.0, 0.9, 1.3, 1.2], // tonifying
    [0.8, 0.6, 0.9, 1.6], // warming-interior
    [1.1, 1.0, 1.1, 1.0], // qi-regulating
];

#[must_use]
pub fn season_coefficient(category: MedicineCategory, season: Season) -> f64 {
    SEASON_COEFFICIENTS[category.index()][season.index()]
}

/// Average of the last three days of usage (today, yesterday, the day
/// before), excluding zero-valued days from both sum and count. Returns 0
/// when all three days are zero. Integer truncating division.
#[must_use]
pub fn three_day_average(record: &MedicineRecord) -> i32 {
    let mut sum = 0;
    let mut count = 0;
    for usage in &record.usage_history[USAGE_DAYS - 3..] {
        if *usage > 0 {
            sum += *usage;
            count += 1;
        }
    }
    if count == 0 {
        0
    } else {
        sum / count
    }
}

/// Volatility adjustment from the positive-usage days among the last three.
/// Returns 1.0 with no positive sample; otherwise 1 + 0.5 * (sigma / mu)
/// with population standard deviation, clamped to [0.8, 1.5].
#[must_use]
pub fn fluctuation_coefficient(record: &MedicineRecord) -> f64 {
    let samples: Vec<f64> = record.usage_history[USAGE_DAYS - 3..]
        .iter()
        .filter(|usage| **usage > 0)
        .map(|usage| f64::from(*usage))
        .collect();
    if samples.is_empty() {
        return 1.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let count = samples.len() as f64;
    let mu = samples.iter().sum::<f64>() / count;
    let variance = samples.iter().map(|value| (value - mu).powi(2)).sum::<f64>() / count;
    let gamma = 1.0 + (variance.sqrt() / mu) * 0.5;
    gamma.clamp(0.8, 1.5)
}

/// Raise the threshold to 10% of the three-day average (or of the last
/// usage when the average is zero), never lowering it below its current
/// catalog-configured floor.
#[allow(clippy::cast_possible_truncation)]
pub fn apply_base_threshold(record: &mut MedicineRecord) {
    let average = three_day_average(record);
    let candidate = if average > 0 {
        (f64::from(average) * 0.1) as i32
    } else {
        (f64::from(record.last_usage) * 0.1) as i32
    };
    record.warning_threshold = record.warning_threshold.max(candidate);
}

/// Combine a base threshold with the seasonal and volatility multipliers:
/// ceil(base * alpha * gamma), floored at half the base so one
/// recomputation can never drop the threshold by more than 50%.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn dynamic_threshold(base: i32, alpha: f64, gamma: f64) -> i32 {
    let dynamic = (f64::from(base) * alpha * gamma).ceil() as i32;
    let floor = (f64::from(base) * 0.5) as i32;
    dynamic.max(floor)
}

fn parse_month(current_date: &str) -> u8 {
    let month = current_date
        .get(5..7)
        .and_then(|raw| raw.parse::<u8>().ok())
        .unwrap_or(0);
    if (1..=12).contains(&month) {
        month
    } else {
        tracing::warn!(date = current_date, "month outside 1..=12, defaulting to January");
        1
    }
}

/// Recompute the warning threshold from the seasonal coefficient for the
/// given `YYYY-MM-DD` date and the record's volatility. Reads the current
/// threshold as its base, so repeated calls compound rather than converge.
pub fn apply_dynamic_threshold(record: &mut MedicineRecord, current_date: &str) {
    let month = parse_month(current_date);
    let category = MedicineCategory::for_id(record.id);
    let alpha = season_coefficient(category, Season::for_month(month));
    let gamma = fluctuation_coefficient(record);
    let base = record.warning_threshold;
    record.warning_threshold = dynamic_threshold(base, alpha, gamma);
    tracing::debug!(
        id = record.id,
        category = %category,
        month,
        alpha,
        gamma,
        base,
        threshold = record.warning_threshold,
        "dynamic threshold recomputed"
    );
}

/// One warning scan over the whole store. A record enters the warning state
/// when stock drops below its threshold and leaves it when stock is at or
/// above the threshold; each transition is timestamped with `now` (unix
/// seconds). Returns the number of records newly entering the warning state.
pub fn update_all_warnings(store: &mut InventoryStore, now: i64) -> usize {
    let mut triggered = 0;
    for record in store.records_mut() {
        if record.stock < record.warning_threshold && !record.is_warning {
            record.is_warning = true;
            record.warning_time = now;
            triggered += 1;
            tracing::info!(
                id = record.id,
                name = %record.name,
                stock = record.stock,
                threshold = record.warning_threshold,
                "warning raised"
            );
        } else if record.stock >= record.warning_threshold && record.is_warning {
            record.is_warning = false;
            record.response_time = now;
            tracing::info!(
                id = record.id,
                name = %record.name,
                hours = response_time_hours(record),
                "warning cleared"
            );
        }
    }
    triggered
}

/// Elapsed time between warning activation and deactivation, in hours
/// rounded to one decimal place. Returns 0.0 while either timestamp is
/// unset.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn response_time_hours(record: &MedicineRecord) -> f64 {
    if record.warning_time == 0 || record.response_time == 0 {
        return 0.0;
    }
    let seconds = (record.response_time - record.warning_time) as f64;
    (seconds / 3600.0 * 10.0).round() / 10.0
}

/// Full check cycle: recompute every record's dynamic threshold for the
/// given date, then run one warning scan. All thresholds are updated before
/// any transition is evaluated, so transitions see same-cycle thresholds.
/// Returns the number of newly raised warnings.
pub fn auto_check(store: &mut InventoryStore, current_date: &str, now: i64) -> usize {
    for record in store.records_mut() {
        apply_dynamic_threshold(record, current_date);
    }
    update_all_warnings(store, now)
}
