//! Storage behind the scanner and the API: transfers, scan checkpoints,
//! watch rules, wallet bindings and realizations.

use std::sync::Arc;

use crate::model::{EvmTransaction, Realization, WatchRule};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("internal storage error")]
    Internal,
    #[error("storage codec failure")]
    Codec,
    #[error("unknown rule {0}")]
    UnknownRule(u64),
}

pub type Store = Arc<dyn StoreTrait + Send + Sync + 'static>;

pub trait StoreTrait {
    /// Appends a transfer row, assigning its id. Returns the assigned id.
    fn append_transaction(&self, tx: EvmTransaction) -> Result<u64, StoreError>;
    /// Whether a transfer with this fingerprint was already stored for the
    /// contract on the network.
    fn has_transaction(&self, network_id: u64, contract: &str, fingerprint: &str) -> Result<bool, StoreError>;
    fn transactions_after(&self, contract: &str, network_id: u64, after_id: u64) -> Result<Vec<EvmTransaction>, StoreError>;
    fn transactions_by_from(&self, from_address: &str) -> Result<Vec<EvmTransaction>, StoreError>;
    fn newest_transaction_id(&self, contract: &str, network_id: u64) -> Result<Option<u64>, StoreError>;
    fn recent_transactions(&self, limit: usize) -> Result<Vec<EvmTransaction>, StoreError>;

    fn checkpoint(&self, key: &str) -> Result<Option<u64>, StoreError>;
    fn save_checkpoint(&self, key: &str, block: u64) -> Result<(), StoreError>;

    fn upsert_rule(&self, rule: WatchRule) -> Result<(), StoreError>;
    fn rules(&self) -> Result<Vec<WatchRule>, StoreError>;
    /// Enabled rules that actually name a contract to watch.
    fn enabled_rules(&self) -> Result<Vec<WatchRule>, StoreError>;
    fn save_rule_watermark(&self, rule_id: u64, last_id: u64) -> Result<(), StoreError>;

    fn upsert_wallet(&self, address: &str, earner: &str) -> Result<(), StoreError>;
    fn wallet_earner(&self, address: &str) -> Result<Option<String>, StoreError>;

    fn append_realization(&self, realization: Realization) -> Result<(), StoreError>;
    fn recent_realizations(&self, limit: usize) -> Result<Vec<Realization>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}

#[derive(Default, Clone, Copy)]
pub struct StoreStats {
    pub transactions: usize,
    pub realizations: usize,
    pub rules: usize,
    pub wallets: usize,
}

fn seen_key(network_id: u64, contract: &str, fingerprint: &str) -> String {
    format!("{network_id}#{contract}#{fingerprint}")
}

#[cfg(feature = "mem-store")]
mod mem {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(super) struct MemStore {
        transactions: Mutex<BTreeMap<u64, EvmTransaction>>, // id -> row
        seen: Mutex<HashSet<String>>,                       // network#contract#fingerprint
        checkpoints: Mutex<HashMap<String, u64>>,           // network#contract -> block
        rules: Mutex<BTreeMap<u64, WatchRule>>,             // rule id -> rule
        wallets: Mutex<HashMap<String, String>>,            // lowercased address -> earner
        realizations: Mutex<Vec<Realization>>,              // insertion order
    }

    impl StoreTrait for MemStore {
        fn append_transaction(&self, mut tx: EvmTransaction) -> Result<u64, StoreError> {
            let fingerprint = seen_key(tx.network_id, &tx.contract_address, &tx.fingerprint());
            let mut rows = self.transactions.lock().map_err(|_| StoreError::Internal)?;
            let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
            tx.id = id;
            rows.insert(id, tx);
            self.seen.lock().map_err(|_| StoreError::Internal)?.insert(fingerprint);
            Ok(id)
        }

        fn has_transaction(&self, network_id: u64, contract: &str, fingerprint: &str) -> Result<bool, StoreError> {
            Ok(self.seen.lock().map_err(|_| StoreError::Internal)?.contains(&seen_key(network_id, contract, fingerprint)))
        }

        fn transactions_after(&self, contract: &str, network_id: u64, after_id: u64) -> Result<Vec<EvmTransaction>, StoreError> {
            let rows = self.transactions.lock().map_err(|_| StoreError::Internal)?;
            Ok(rows
                .range(after_id.saturating_add(1)..)
                .map(|(_, tx)| tx)
                .filter(|tx| tx.network_id == network_id && tx.contract_address.eq_ignore_ascii_case(contract))
                .cloned()
                .collect())
        }

        fn transactions_by_from(&self, from_address: &str) -> Result<Vec<EvmTransaction>, StoreError> {
            let rows = self.transactions.lock().map_err(|_| StoreError::Internal)?;
            Ok(rows.values().filter(|tx| tx.from_address.eq_ignore_ascii_case(from_address)).cloned().collect())
        }

        fn newest_transaction_id(&self, contract: &str, network_id: u64) -> Result<Option<u64>, StoreError> {
            let rows = self.transactions.lock().map_err(|_| StoreError::Internal)?;
            Ok(rows
                .values()
                .rev()
                .find(|tx| tx.network_id == network_id && tx.contract_address.eq_ignore_ascii_case(contract))
                .map(|tx| tx.id))
        }

        fn recent_transactions(&self, limit: usize) -> Result<Vec<EvmTransaction>, StoreError> {
            let rows = self.transactions.lock().map_err(|_| StoreError::Internal)?;
            Ok(rows.values().rev().take(limit).cloned().collect())
        }

        fn checkpoint(&self, key: &str) -> Result<Option<u64>, StoreError> {
            Ok(self.checkpoints.lock().map_err(|_| StoreError::Internal)?.get(key).copied())
        }

        fn save_checkpoint(&self, key: &str, block: u64) -> Result<(), StoreError> {
            self.checkpoints.lock().map_err(|_| StoreError::Internal)?.insert(key.to_string(), block);
            Ok(())
        }

        fn upsert_rule(&self, rule: WatchRule) -> Result<(), StoreError> {
            self.rules.lock().map_err(|_| StoreError::Internal)?.insert(rule.id, rule);
            Ok(())
        }

        fn rules(&self) -> Result<Vec<WatchRule>, StoreError> {
            Ok(self.rules.lock().map_err(|_| StoreError::Internal)?.values().cloned().collect())
        }

        fn enabled_rules(&self) -> Result<Vec<WatchRule>, StoreError> {
            Ok(self
                .rules
                .lock()
                .map_err(|_| StoreError::Internal)?
                .values()
                .filter(|rule| rule.enabled && !rule.contract_address.is_empty())
                .cloned()
                .collect())
        }

        fn save_rule_watermark(&self, rule_id: u64, last_id: u64) -> Result<(), StoreError> {
            let mut rules = self.rules.lock().map_err(|_| StoreError::Internal)?;
            let rule = rules.get_mut(&rule_id).ok_or(StoreError::UnknownRule(rule_id))?;
            rule.last_id_processed = Some(last_id);
            Ok(())
        }

        fn upsert_wallet(&self, address: &str, earner: &str) -> Result<(), StoreError> {
            self.wallets.lock().map_err(|_| StoreError::Internal)?.insert(address.to_ascii_lowercase(), earner.to_string());
            Ok(())
        }

        fn wallet_earner(&self, address: &str) -> Result<Option<String>, StoreError> {
            Ok(self.wallets.lock().map_err(|_| StoreError::Internal)?.get(&address.to_ascii_lowercase()).cloned())
        }

        fn append_realization(&self, realization: Realization) -> Result<(), StoreError> {
            self.realizations.lock().map_err(|_| StoreError::Internal)?.push(realization);
            Ok(())
        }

        fn recent_realizations(&self, limit: usize) -> Result<Vec<Realization>, StoreError> {
            let rows = self.realizations.lock().map_err(|_| StoreError::Internal)?;
            Ok(rows.iter().rev().take(limit).cloned().collect())
        }

        fn stats(&self) -> Result<StoreStats, StoreError> {
            let transactions = self.transactions.lock().map_err(|_| StoreError::Internal)?.len();
            let realizations = self.realizations.lock().map_err(|_| StoreError::Internal)?.len();
            let rules = self.rules.lock().map_err(|_| StoreError::Internal)?.len();
            let wallets = self.wallets.lock().map_err(|_| StoreError::Internal)?.len();
            Ok(StoreStats { transactions, realizations, rules, wallets })
        }
    }
}

// ================= sled backend =================
#[cfg(feature = "sled-store")]
mod persistent {
    use super::*;

    pub(super) struct SledStore {
        db: sled::Db,
        transactions: sled::Tree,
        seen: sled::Tree,
        checkpoints: sled::Tree,
        rules: sled::Tree,
        wallets: sled::Tree,
        realizations: sled::Tree,
    }

    impl SledStore {
        pub(super) fn open(path: &str) -> Result<Self, StoreError> {
            let db = sled::open(path).map_err(|_| StoreError::Internal)?;
            let transactions = db.open_tree("transactions").map_err(|_| StoreError::Internal)?;
            let seen = db.open_tree("seen").map_err(|_| StoreError::Internal)?;
            let checkpoints = db.open_tree("checkpoints").map_err(|_| StoreError::Internal)?;
            let rules = db.open_tree("rules").map_err(|_| StoreError::Internal)?;
            let wallets = db.open_tree("wallets").map_err(|_| StoreError::Internal)?;
            let realizations = db.open_tree("realizations").map_err(|_| StoreError::Internal)?;
            Ok(Self { db, transactions, seen, checkpoints, rules, wallets, realizations })
        }

        fn decode_tx(bytes: &[u8]) -> Result<EvmTransaction, StoreError> {
            bincode::deserialize(bytes).map_err(|_| StoreError::Codec)
        }
    }

    impl StoreTrait for SledStore {
        fn append_transaction(&self, mut tx: EvmTransaction) -> Result<u64, StoreError> {
            // Monotonic but not necessarily contiguous; only ordering matters.
            // Ids start at 1 so a zero watermark means "before everything".
            let id = self.db.generate_id().map_err(|_| StoreError::Internal)?.saturating_add(1);
            tx.id = id;
            let fingerprint = seen_key(tx.network_id, &tx.contract_address, &tx.fingerprint());
            let value = bincode::serialize(&tx).map_err(|_| StoreError::Codec)?;
            self.transactions.insert(id.to_be_bytes(), value).map_err(|_| StoreError::Internal)?;
            self.seen.insert(fingerprint.as_bytes(), &[] as &[u8]).map_err(|_| StoreError::Internal)?;
            Ok(id)
        }

        fn has_transaction(&self, network_id: u64, contract: &str, fingerprint: &str) -> Result<bool, StoreError> {
            self.seen.contains_key(seen_key(network_id, contract, fingerprint).as_bytes()).map_err(|_| StoreError::Internal)
        }

        fn transactions_after(&self, contract: &str, network_id: u64, after_id: u64) -> Result<Vec<EvmTransaction>, StoreError> {
            let mut out = Vec::new();
            for kv in self.transactions.range(after_id.saturating_add(1).to_be_bytes()..) {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                let tx = Self::decode_tx(&value)?;
                if tx.network_id == network_id && tx.contract_address.eq_ignore_ascii_case(contract) {
                    out.push(tx);
                }
            }
            Ok(out)
        }

        fn transactions_by_from(&self, from_address: &str) -> Result<Vec<EvmTransaction>, StoreError> {
            let mut out = Vec::new();
            for kv in self.transactions.iter() {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                let tx = Self::decode_tx(&value)?;
                if tx.from_address.eq_ignore_ascii_case(from_address) {
                    out.push(tx);
                }
            }
            Ok(out)
        }

        fn newest_transaction_id(&self, contract: &str, network_id: u64) -> Result<Option<u64>, StoreError> {
            for kv in self.transactions.iter().rev() {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                let tx = Self::decode_tx(&value)?;
                if tx.network_id == network_id && tx.contract_address.eq_ignore_ascii_case(contract) {
                    return Ok(Some(tx.id));
                }
            }
            Ok(None)
        }

        fn recent_transactions(&self, limit: usize) -> Result<Vec<EvmTransaction>, StoreError> {
            let mut out = Vec::new();
            for kv in self.transactions.iter().rev().take(limit) {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                out.push(Self::decode_tx(&value)?);
            }
            Ok(out)
        }

        fn checkpoint(&self, key: &str) -> Result<Option<u64>, StoreError> {
            let Some(value) = self.checkpoints.get(key.as_bytes()).map_err(|_| StoreError::Internal)? else {
                return Ok(None);
            };
            let mut buf = [0u8; 8];
            if value.len() != 8 {
                return Err(StoreError::Codec);
            }
            buf.copy_from_slice(&value);
            Ok(Some(u64::from_be_bytes(buf)))
        }

        fn save_checkpoint(&self, key: &str, block: u64) -> Result<(), StoreError> {
            self.checkpoints.insert(key.as_bytes(), block.to_be_bytes().to_vec()).map_err(|_| StoreError::Internal)?;
            Ok(())
        }

        fn upsert_rule(&self, rule: WatchRule) -> Result<(), StoreError> {
            let value = bincode::serialize(&rule).map_err(|_| StoreError::Codec)?;
            self.rules.insert(rule.id.to_be_bytes(), value).map_err(|_| StoreError::Internal)?;
            Ok(())
        }

        fn rules(&self) -> Result<Vec<WatchRule>, StoreError> {
            let mut out = Vec::new();
            for kv in self.rules.iter() {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                out.push(bincode::deserialize(&value).map_err(|_| StoreError::Codec)?);
            }
            Ok(out)
        }

        fn enabled_rules(&self) -> Result<Vec<WatchRule>, StoreError> {
            Ok(self.rules()?.into_iter().filter(|rule: &WatchRule| rule.enabled && !rule.contract_address.is_empty()).collect())
        }

        fn save_rule_watermark(&self, rule_id: u64, last_id: u64) -> Result<(), StoreError> {
            let Some(value) = self.rules.get(rule_id.to_be_bytes()).map_err(|_| StoreError::Internal)? else {
                return Err(StoreError::UnknownRule(rule_id));
            };
            let mut rule: WatchRule = bincode::deserialize(&value).map_err(|_| StoreError::Codec)?;
            rule.last_id_processed = Some(last_id);
            self.upsert_rule(rule)
        }

        fn upsert_wallet(&self, address: &str, earner: &str) -> Result<(), StoreError> {
            self.wallets
                .insert(address.to_ascii_lowercase().as_bytes(), earner.as_bytes())
                .map_err(|_| StoreError::Internal)?;
            Ok(())
        }

        fn wallet_earner(&self, address: &str) -> Result<Option<String>, StoreError> {
            let Some(value) = self.wallets.get(address.to_ascii_lowercase().as_bytes()).map_err(|_| StoreError::Internal)?
            else {
                return Ok(None);
            };
            String::from_utf8(value.to_vec()).map(Some).map_err(|_| StoreError::Codec)
        }

        fn append_realization(&self, realization: Realization) -> Result<(), StoreError> {
            let id = self.db.generate_id().map_err(|_| StoreError::Internal)?;
            let value = bincode::serialize(&realization).map_err(|_| StoreError::Codec)?;
            self.realizations.insert(id.to_be_bytes(), value).map_err(|_| StoreError::Internal)?;
            Ok(())
        }

        fn recent_realizations(&self, limit: usize) -> Result<Vec<Realization>, StoreError> {
            let mut out = Vec::new();
            for kv in self.realizations.iter().rev().take(limit) {
                let (_k, value) = kv.map_err(|_| StoreError::Internal)?;
                out.push(bincode::deserialize(&value).map_err(|_| StoreError::Codec)?);
            }
            Ok(out)
        }

        fn stats(&self) -> Result<StoreStats, StoreError> {
            Ok(StoreStats {
                transactions: self.transactions.len(),
                realizations: self.realizations.len(),
                rules: self.rules.len(),
                wallets: self.wallets.len(),
            })
        }
    }
}

pub fn new_store(db_path: Option<&str>) -> Result<Store, StoreError> {
    #[cfg(all(feature = "mem-store", not(feature = "sled-store")))]
    {
        let _ = db_path;
        return Ok(Arc::new(mem::MemStore::default()));
    }
    #[cfg(feature = "sled-store")]
    {
        return Ok(Arc::new(persistent::SledStore::open(db_path.unwrap_or(".engage-evm-db"))?));
    }
    #[allow(unreachable_code)]
    Err(StoreError::Internal)
}
