//! Bronze tables: the typed on-disk intermediate representation
//! exchanged between pipeline stages.
//!
//! RULE: Only bronze.rs touches the bronze directory.
//! Stages read and write whole tables through BronzeDir; a missing
//! or malformed table fails here, naming the stage that produces it.

use crate::{
    error::{PipelineError, PipelineResult},
    types::{EntityId, Timestamp},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ── Records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantRecord {
    pub merchant_id: EntityId,
    pub mcc: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: EntityId,
    pub device_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub ip: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub card_hash: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address_hash: EntityId,
    pub postcode: String,
}

/// A transaction as the entity generator writes it, before any
/// infrastructure is attached. Later stages read the full table
/// through this shape too; extra columns are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRecord {
    pub tx_id: EntityId,
    pub ts: Timestamp,
    pub amount: f64,
    pub currency: String,
    pub person_id: EntityId,
    pub merchant_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: EntityId,
    pub ts: Timestamp,
    pub amount: f64,
    pub currency: String,
    pub person_id: EntityId,
    pub merchant_id: EntityId,
    pub device_id: EntityId,
    pub ip: EntityId,
    pub card_hash: EntityId,
    pub address_hash: EntityId,
    pub is_fraud: u8,
}

// ── Table catalog ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BronzeTable {
    People,
    Merchants,
    Devices,
    Ips,
    Cards,
    Addresses,
    Transactions,
}

impl BronzeTable {
    pub const ALL: [BronzeTable; 7] = [
        BronzeTable::People,
        BronzeTable::Merchants,
        BronzeTable::Devices,
        BronzeTable::Ips,
        BronzeTable::Cards,
        BronzeTable::Addresses,
        BronzeTable::Transactions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Merchants => "merchants",
            Self::Devices => "devices",
            Self::Ips => "ips",
            Self::Cards => "cards",
            Self::Addresses => "addresses",
            Self::Transactions => "transactions",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name())
    }

    /// The stage that first writes this table. The transactions table
    /// is rewritten by every later stage but created by the generator.
    pub fn producer(&self) -> &'static str {
        match self {
            Self::People | Self::Merchants | Self::Transactions => "entity_generator",
            Self::Devices | Self::Ips | Self::Cards | Self::Addresses => "reuse_sampler",
        }
    }
}

// ── Directory access ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BronzeDir {
    root: PathBuf,
}

impl BronzeDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, table: BronzeTable) -> PathBuf {
        self.root.join(table.file_name())
    }

    pub fn exists(&self, table: BronzeTable) -> bool {
        self.path_of(table).is_file()
    }

    /// Fail with MissingInput for the first absent table, before any
    /// stage reads or writes anything.
    pub fn require(&self, tables: &[BronzeTable]) -> PipelineResult<()> {
        match tables.iter().find(|t| !self.exists(**t)) {
            Some(&table) => Err(PipelineError::MissingInput {
                table: table.name(),
                path: self.path_of(table),
                producer: table.producer(),
            }),
            None => Ok(()),
        }
    }

    pub fn read<T: DeserializeOwned>(&self, table: BronzeTable) -> PipelineResult<Vec<T>> {
        self.require(&[table])?;
        let path = self.path_of(table);
        let malformed = |source| PipelineError::MalformedTable {
            table: table.name(),
            path: path.clone(),
            producer: table.producer(),
            source,
        };

        let mut reader = csv::Reader::from_path(&path).map_err(malformed)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(malformed)?;
        log::debug!("read {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    /// Write the whole table, replacing any previous version. The rows
    /// go to a sibling temp file first so a failed write never leaves a
    /// truncated table behind.
    pub fn write<T: Serialize>(&self, table: BronzeTable, rows: &[T]) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|source| PipelineError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.path_of(table);
        let tmp = path.with_extension("csv.tmp");
        let malformed = |source| PipelineError::MalformedTable {
            table: table.name(),
            path: tmp.clone(),
            producer: table.producer(),
            source,
        };

        let mut writer = csv::Writer::from_path(&tmp).map_err(malformed)?;
        for row in rows {
            writer.serialize(row).map_err(malformed)?;
        }
        writer.flush().map_err(|source| PipelineError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(writer);

        std::fs::rename(&tmp, &path).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}

// ── Full dataset ───────────────────────────────────────────────────

/// Every bronze table, as the graph loader consumes them.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub people: Vec<PersonRecord>,
    pub merchants: Vec<MerchantRecord>,
    pub devices: Vec<DeviceRecord>,
    pub ips: Vec<IpRecord>,
    pub cards: Vec<CardRecord>,
    pub addresses: Vec<AddressRecord>,
    pub transactions: Vec<TransactionRecord>,
}

impl Dataset {
    /// Read all seven tables. Every table is checked for presence
    /// before the first one is parsed.
    /// Read all seven tables. Labels outside {0, 1} are rejected here so
    /// nothing downstream ever sees one.
    pub fn read(bronze: &BronzeDir) -> PipelineResult<Self> {
        bronze.require(&BronzeTable::ALL)?;
        let dataset = Self {
            people: bronze.read(BronzeTable::People)?,
            merchants: bronze.read(BronzeTable::Merchants)?,
            devices: bronze.read(BronzeTable::Devices)?,
            ips: bronze.read(BronzeTable::Ips)?,
            cards: bronze.read(BronzeTable::Cards)?,
            addresses: bronze.read(BronzeTable::Addresses)?,
            transactions: bronze.read(BronzeTable::Transactions)?,
        };
        dataset.check_labels()?;
        Ok(dataset)
    }

    pub fn write(&self, bronze: &BronzeDir) -> PipelineResult<()> {
        bronze.write(BronzeTable::People, &self.people)?;
        bronze.write(BronzeTable::Merchants, &self.merchants)?;
        bronze.write(BronzeTable::Devices, &self.devices)?;
        bronze.write(BronzeTable::Ips, &self.ips)?;
        bronze.write(BronzeTable::Cards, &self.cards)?;
        bronze.write(BronzeTable::Addresses, &self.addresses)?;
        bronze.write(BronzeTable::Transactions, &self.transactions)?;
        Ok(())
    }

    pub fn fraud_count(&self) -> usize {
        self.transactions.iter().filter(|t| t.is_fraud == 1).count()
    }

    /// First transaction whose `is_fraud` is not 0 or 1.
    pub fn check_labels(&self) -> PipelineResult<()> {
        match self.transactions.iter().enumerate().find(|(_, tx)| tx.is_fraud > 1) {
            Some((row, tx)) => Err(PipelineError::InvalidLabel {
                row,
                tx_id: tx.tx_id.clone(),
                value: tx.is_fraud,
            }),
            None => Ok(()),
        }
    }

    /// Verify every transaction reference resolves to an entity row and
    /// every label is 0 or 1. Returns the first violation in row order.
    pub fn check_integrity(&self) -> PipelineResult<()> {
        let people: HashSet<&str> = self.people.iter().map(|r| r.person_id.as_str()).collect();
        let merchants: HashSet<&str> =
            self.merchants.iter().map(|r| r.merchant_id.as_str()).collect();
        let devices: HashSet<&str> = self.devices.iter().map(|r| r.device_id.as_str()).collect();
        let ips: HashSet<&str> = self.ips.iter().map(|r| r.ip.as_str()).collect();
        let cards: HashSet<&str> = self.cards.iter().map(|r| r.card_hash.as_str()).collect();
        let addresses: HashSet<&str> =
            self.addresses.iter().map(|r| r.address_hash.as_str()).collect();

        for (row, tx) in self.transactions.iter().enumerate() {
            let references = [
                ("person_id", &tx.person_id, &people),
                ("merchant_id", &tx.merchant_id, &merchants),
                ("device_id", &tx.device_id, &devices),
                ("ip", &tx.ip, &ips),
                ("card_hash", &tx.card_hash, &cards),
                ("address_hash", &tx.address_hash, &addresses),
            ];
            for (column, key, known) in references {
                if !known.contains(key.as_str()) {
                    return Err(PipelineError::DanglingReference {
                        row,
                        tx_id: tx.tx_id.clone(),
                        column,
                        key: key.clone(),
                    });
                }
            }
            if tx.is_fraud > 1 {
                return Err(PipelineError::InvalidLabel {
                    row,
                    tx_id: tx.tx_id.clone(),
                    value: tx.is_fraud,
                });
            }
        }
        Ok(())
    }
}
