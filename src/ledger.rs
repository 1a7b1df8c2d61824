//! Per-CA issuance ledger.
//!
//! The `index` document is the single source of truth for which serials a CA
//! has issued. It is rewritten as a whole through an atomic rename, so a crash
//! leaves either the previous or the next state on disk. The `serial` file is
//! a hex mirror of the next serial for operators.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{PkiError, Result};
use crate::policy::CaRole;
use crate::storage;

/// Certificate serial number, unique within one CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(u64);

impl Serial {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    fn successor(self) -> Result<Self> {
        self.0
            .checked_add(1)
            .map(Serial)
            .ok_or_else(|| PkiError::InvalidInput("serial space exhausted".to_string()))
    }

    /// Upper-case hex, at least two digits.
    pub fn to_hex(self) -> String {
        let hex = format!("{:X}", self.0);
        if hex.len() % 2 == 1 { format!("0{hex}") } else { hex }
    }

    /// Parses the magnitude of a DER INTEGER.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self> {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let digits = &bytes[start..];
        if digits.len() > 8 {
            return Err(PkiError::DecodingError(format!(
                "serial of {} bytes does not fit this ledger",
                digits.len()
            )));
        }
        Ok(Serial(
            digits.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        ))
    }

    /// Minimal positive DER INTEGER content.
    pub(crate) fn to_x509(self) -> Result<x509_cert::serial_number::SerialNumber> {
        let bytes = self.0.to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        let mut content = Vec::with_capacity(9);
        if bytes[start] & 0x80 != 0 {
            content.push(0);
        }
        content.extend_from_slice(&bytes[start..]);
        Ok(x509_cert::serial_number::SerialNumber::new(&content)?)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Valid,
    Revoked,
}

/// One issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub serial: Serial,
    /// Subject in one-line form, e.g. `/O=ACME/CN=mail.example.com`.
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub status: EntryStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
}

impl LedgerEntry {
    pub fn new(
        serial: Serial,
        subject: impl Into<String>,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            serial,
            subject: subject.into(),
            issued_at,
            expires_at,
            status: EntryStatus::Valid,
            revoked_at: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == EntryStatus::Revoked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDocument {
    ca: CaRole,
    start_serial: Serial,
    next_serial: Serial,
    entries: Vec<LedgerEntry>,
    #[serde(default)]
    voided: Vec<Serial>,
}

#[derive(Debug)]
struct LedgerState {
    start: Serial,
    next: Serial,
    entries: BTreeMap<Serial, LedgerEntry>,
    voided: Vec<Serial>,
}

impl LedgerState {
    fn to_document(&self, ca: CaRole) -> IndexDocument {
        IndexDocument {
            ca,
            start_serial: self.start,
            next_serial: self.next,
            entries: self.entries.values().cloned().collect(),
            voided: self.voided.clone(),
        }
    }

    fn allocate(&mut self) -> Result<Serial> {
        let serial = self.next;
        self.next = serial.successor()?;
        Ok(serial)
    }

    fn check_recordable(&self, ca: CaRole, serial: Serial) -> Result<()> {
        if self.entries.contains_key(&serial) || self.voided.contains(&serial) {
            return Err(PkiError::DuplicateSerial { ca, serial });
        }
        if serial < self.start || serial >= self.next {
            return Err(PkiError::UnknownSerial { ca, serial });
        }
        Ok(())
    }
}

/// Durable issuance record of one CA.
///
/// All mutation goes through an internal mutex, so a ledger shared between
/// threads still hands out each serial exactly once. Different CAs own
/// different ledgers and never contend.
#[derive(Debug)]
pub struct Ledger {
    ca: CaRole,
    dir: PathBuf,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Initializes an empty ledger whose first serial is `start`.
    pub fn create(dir: &Path, ca: CaRole, start: Serial) -> Result<Self> {
        let ledger = Self {
            ca,
            dir: dir.to_path_buf(),
            state: Mutex::new(LedgerState {
                start,
                next: start,
                entries: BTreeMap::new(),
                voided: Vec::new(),
            }),
        };
        ledger.persist(&ledger.state.lock())?;
        info!(%ca, start = %start, "initialized ledger");
        Ok(ledger)
    }

    /// Loads an existing ledger from `dir`.
    pub fn open(dir: &Path, ca: CaRole) -> Result<Self> {
        let path = dir.join("index");
        let text = storage::read_to_string(&path)?;
        let doc: IndexDocument =
            serde_json::from_str(&text).map_err(|e| PkiError::storage(&path, e))?;
        if doc.ca != ca {
            return Err(PkiError::storage(
                &path,
                format!("ledger belongs to {}, expected {ca}", doc.ca),
            ));
        }
        let entries = doc
            .entries
            .into_iter()
            .map(|entry| (entry.serial, entry))
            .collect();
        Ok(Self {
            ca,
            dir: dir.to_path_buf(),
            state: Mutex::new(LedgerState {
                start: doc.start_serial,
                next: doc.next_serial,
                entries,
                voided: doc.voided,
            }),
        })
    }

    pub fn ca(&self) -> CaRole {
        self.ca
    }

    pub fn start_serial(&self) -> Serial {
        self.state.lock().start
    }

    pub fn next_serial(&self) -> Serial {
        self.state.lock().next
    }

    /// Reserves the next serial. The counter advance is persisted immediately.
    pub fn allocate_serial(&self) -> Result<Serial> {
        let mut state = self.state.lock();
        let serial = state.allocate()?;
        if let Err(e) = self.persist(&state) {
            state.next = serial;
            return Err(e);
        }
        debug!(ca = %self.ca, %serial, "allocated serial");
        Ok(serial)
    }

    /// Records an issued certificate under a previously allocated serial.
    pub fn record_issued(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.lock();
        state.check_recordable(self.ca, entry.serial)?;
        let serial = entry.serial;
        state.entries.insert(serial, entry);
        if let Err(e) = self.persist(&state) {
            state.entries.remove(&serial);
            return Err(e);
        }
        info!(ca = %self.ca, %serial, "recorded issued certificate");
        Ok(())
    }

    /// Most recent entry for `subject`, if any.
    pub fn lookup_by_subject(&self, subject: &str) -> Option<LedgerEntry> {
        self.state
            .lock()
            .entries
            .values()
            .rev()
            .find(|entry| entry.subject == subject)
            .cloned()
    }

    pub fn lookup(&self, serial: Serial) -> Option<LedgerEntry> {
        self.state.lock().entries.get(&serial).cloned()
    }

    /// Marks `serial` revoked. Revoking twice is a no-op.
    pub fn mark_revoked(&self, serial: Serial) -> Result<()> {
        let mut state = self.state.lock();
        let ca = self.ca;
        let entry = state
            .entries
            .get_mut(&serial)
            .ok_or(PkiError::UnknownSerial { ca, serial })?;
        if entry.is_revoked() {
            debug!(%ca, %serial, "serial already revoked");
            return Ok(());
        }
        entry.status = EntryStatus::Revoked;
        entry.revoked_at = Some(OffsetDateTime::now_utc());
        if let Err(e) = self.persist(&state) {
            if let Some(entry) = state.entries.get_mut(&serial) {
                entry.status = EntryStatus::Valid;
                entry.revoked_at = None;
            }
            return Err(e);
        }
        info!(%ca, %serial, "revoked certificate");
        Ok(())
    }

    /// All entries in serial order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().entries.values().cloned().collect()
    }

    /// Serials that were allocated but never recorded.
    pub fn voided(&self) -> Vec<Serial> {
        self.state.lock().voided.clone()
    }

    /// Opens an exclusive allocate-and-record scope.
    ///
    /// Other writers to this ledger block until the transaction ends.
    /// Each allocation is persisted as it happens, so a serial handed out
    /// here is never handed out again, even after a crash. Entries the
    /// transaction records reach disk only on [`LedgerTransaction::commit`];
    /// dropping it uncommitted voids every serial it allocated.
    pub fn transaction(&self) -> LedgerTransaction<'_> {
        LedgerTransaction {
            ledger: self,
            state: self.state.lock(),
            allocated: Vec::new(),
            recorded: Vec::new(),
            done: false,
        }
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        self.persist_excluding(state, &[])
    }

    /// Persists `state` without the entries in `staged`.
    fn persist_excluding(&self, state: &LedgerState, staged: &[Serial]) -> Result<()> {
        let mut doc = state.to_document(self.ca);
        doc.entries.retain(|entry| !staged.contains(&entry.serial));
        let json = serde_json::to_vec_pretty(&doc)?;
        storage::write_atomic(&self.dir.join("index"), &json)?;
        storage::write_atomic(
            &self.dir.join("serial"),
            format!("{}\n", state.next.to_hex()).as_bytes(),
        )
    }
}

/// Exclusive scope pairing serial allocation with recording.
pub struct LedgerTransaction<'a> {
    ledger: &'a Ledger,
    state: MutexGuard<'a, LedgerState>,
    allocated: Vec<Serial>,
    recorded: Vec<Serial>,
    done: bool,
}

impl LedgerTransaction<'_> {
    /// Reserves the next serial and persists the counter advance.
    pub fn allocate_serial(&mut self) -> Result<Serial> {
        let serial = self.state.allocate()?;
        if let Err(e) = self.ledger.persist_excluding(&self.state, &self.recorded) {
            self.state.next = serial;
            return Err(e);
        }
        self.allocated.push(serial);
        debug!(ca = %self.ledger.ca, %serial, "allocated serial");
        Ok(serial)
    }

    /// Stages an entry. Only serials allocated by this transaction are accepted.
    pub fn record_issued(&mut self, entry: LedgerEntry) -> Result<()> {
        let ca = self.ledger.ca;
        let serial = entry.serial;
        self.state.check_recordable(ca, serial)?;
        if !self.allocated.contains(&serial) {
            return Err(PkiError::UnknownSerial { ca, serial });
        }
        self.state.entries.insert(serial, entry);
        self.recorded.push(serial);
        Ok(())
    }

    pub fn lookup_by_subject(&self, subject: &str) -> Option<LedgerEntry> {
        self.state
            .entries
            .values()
            .rev()
            .find(|entry| entry.subject == subject)
            .cloned()
    }

    /// Persists recorded entries; allocated but unrecorded serials are voided.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.void_unrecorded();
        if let Err(e) = self.ledger.persist(&self.state) {
            for serial in std::mem::take(&mut self.recorded) {
                self.state.entries.remove(&serial);
                self.state.voided.push(serial);
            }
            return Err(e);
        }
        for serial in &self.recorded {
            info!(ca = %self.ledger.ca, %serial, "recorded issued certificate");
        }
        Ok(())
    }

    fn void_unrecorded(&mut self) {
        let unrecorded: Vec<Serial> = self
            .allocated
            .iter()
            .copied()
            .filter(|serial| !self.recorded.contains(serial))
            .collect();
        for serial in unrecorded {
            warn!(ca = %self.ledger.ca, %serial, "voiding unused serial");
            self.state.voided.push(serial);
        }
    }
}

impl Drop for LedgerTransaction<'_> {
    fn drop(&mut self) {
        if self.done || self.allocated.is_empty() {
            return;
        }
        for serial in std::mem::take(&mut self.recorded) {
            self.state.entries.remove(&serial);
        }
        self.void_unrecorded();
        if let Err(e) = self.ledger.persist(&self.state) {
            warn!(ca = %self.ledger.ca, error = %e, "failed to persist voided serials");
        }
    }
}
