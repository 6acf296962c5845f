//! Persistent block tree with heaviest-work tip selection.

use std::collections::HashMap;
use std::path::Path;

use auxchain_consensus::{
    collect_window, median_time_past, tip_is_better, validate_header_pow, validate_header_time,
    work_from_bits, ChainParams, ConsensusError, HeaderHistory, HeaderInfo,
};
use auxchain_core::{block_header_hash, merkle_root, txid, Block, BlockHash, Hash32, OutPoint};
use borsh::{to_vec, BorshDeserialize, BorshSerialize};
use num_bigint::BigUint;
use sled::transaction::{Transactional, TransactionResult};
use sled::Error as SledError;
use tracing::{debug, info};

use crate::error::{NodeError, NodeResult};
use crate::mempool::ChainView;
use crate::utxo::{Coin, UtxoSet};

// Consensus rules live in auxchain-consensus; this module handles storage, UTXO replay and tip selection.

const TREE_BLOCKS: &str = "blocks";
const TREE_INDEX: &str = "index";
const TREE_META: &str = "meta";
const KEY_BEST: &[u8] = b"best";

/// Per-block metadata persisted alongside the block.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct IndexRecord {
    /// Block height.
    pub height: u64,
    /// Compact target carried by the header.
    pub bits: u32,
    /// Header timestamp.
    pub time: u32,
    /// Parent hash.
    pub prev: Hash32,
    /// Work up to and including this block.
    pub cumulative_work: Vec<u8>, // BigUint BE bytes
}

/// sled trees backing the chain.
pub struct ChainDb {
    blocks: sled::Tree,
    index: sled::Tree,
    meta: sled::Tree,
}

impl ChainDb {
    /// Open or create the trees under `path`.
    pub fn open(path: &Path) -> NodeResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            blocks: db.open_tree(TREE_BLOCKS)?,
            index: db.open_tree(TREE_INDEX)?,
            meta: db.open_tree(TREE_META)?,
        })
    }

    /// Stored block by hash.
    pub fn get_block(&self, hash: &Hash32) -> NodeResult<Option<Block>> {
        match self.blocks.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(Block::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persisted best tip, if any.
    pub fn best_tip(&self) -> NodeResult<Option<Hash32>> {
        match self.meta.get(KEY_BEST)? {
            Some(bytes) => Ok(Some(hash_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub fn clear_best(&self) -> NodeResult<()> {
        self.meta.remove(KEY_BEST)?;
        Ok(())
    }

    /// Store block and index atomically, optionally moving the best tip.
    pub fn upsert_block(
        &self,
        hash: Hash32,
        block: &Block,
        index: &IndexRecord,
        best: Option<Hash32>,
    ) -> NodeResult<()> {
        let blk_bytes = to_vec(block)?;
        let idx_bytes = to_vec(index)?;
        let best_bytes = best.map(|h| h.as_bytes().to_vec());

        let res: TransactionResult<(), SledError> =
            (&self.blocks, &self.index, &self.meta).transaction(|(blocks, index, meta)| {
                blocks.insert(hash.as_bytes(), blk_bytes.clone())?;
                index.insert(hash.as_bytes(), idx_bytes.clone())?;
                if let Some(b) = &best_bytes {
                    meta.insert(KEY_BEST, b.clone())?;
                }
                Ok(())
            });

        res.map_err(|e| match e {
            sled::transaction::TransactionError::Abort(e)
            | sled::transaction::TransactionError::Storage(e) => NodeError::Storage(e),
        })
    }

    /// Every index record.
    pub fn all_indices(&self) -> NodeResult<Vec<(Hash32, IndexRecord)>> {
        let mut out = Vec::new();
        for item in self.index.iter() {
            let (k, v) = item?;
            out.push((hash_from_slice(&k)?, IndexRecord::try_from_slice(&v)?));
        }
        Ok(out)
    }
}

/// A stored block with its position and accumulated work.
pub struct ChainEntry {
    /// The block.
    pub block: Block,
    /// Its height.
    pub height: u64,
    /// Work of the chain ending here.
    pub cumulative_work: BigUint,
}

/// Block tree with heaviest-work tip selection and a UTXO view of the tip.
pub struct ChainStore {
    params: ChainParams,
    entries: HashMap<Hash32, ChainEntry>,
    best: Hash32,
    /// Active chain hashes indexed by height.
    active: Vec<Hash32>,
    utxos: UtxoSet,
    db: ChainDb,
}

impl ChainStore {
    /// Open the store at `path`, seeding it with `genesis` when empty.
    pub fn load_or_init(path: &Path, params: ChainParams, genesis: Block) -> NodeResult<Self> {
        let db = ChainDb::open(path)?;
        let genesis_hash = block_hash(&genesis);

        let indices = db.all_indices()?;
        if indices.is_empty() {
            let work = work_from_bits(genesis.header.header.bits)?;
            let idx = IndexRecord {
                height: 0,
                bits: genesis.header.header.bits,
                time: genesis.header.header.time,
                prev: genesis.header.header.prev,
                cumulative_work: work.to_bytes_be(),
            };
            db.upsert_block(genesis_hash, &genesis, &idx, Some(genesis_hash))?;
        } else if !indices.iter().any(|(h, rec)| *h == genesis_hash && rec.height == 0) {
            return Err(NodeError::GenesisMismatch);
        }

        let mut entries = HashMap::new();
        let mut best: Option<(Hash32, BigUint)> = None;

        for (h, rec) in db.all_indices()? {
            let block = db
                .get_block(&h)?
                .ok_or(NodeError::Corrupt("block missing for index"))?;
            let cum = BigUint::from_bytes_be(&rec.cumulative_work);
            let better = match best.as_ref() {
                Some((best_h, best_cum)) => tip_is_better(&cum, &h, best_cum, best_h),
                None => true,
            };
            if better {
                best = Some((h, cum.clone()));
            }
            entries.insert(
                h,
                ChainEntry {
                    block,
                    height: rec.height,
                    cumulative_work: cum,
                },
            );
        }

        let (best_hash, _) = best.ok_or(NodeError::Corrupt("no tip found after load"))?;
        if db.best_tip()? != Some(best_hash) {
            debug!(best = %best_hash, "Best tip metadata missing or stale; recomputed from index");
        }

        let mut store = Self {
            params,
            entries,
            best: best_hash,
            active: Vec::new(),
            utxos: UtxoSet::new(),
            db,
        };
        store.reindex_active()?;
        info!(height = store.best_height(), best = %store.best, "Chain loaded");
        Ok(store)
    }

    /// Network parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Hash of the best tip.
    pub fn best_hash(&self) -> Hash32 {
        self.best
    }

    /// Height of the best tip.
    pub fn best_height(&self) -> u64 {
        self.active.len().saturating_sub(1) as u64
    }

    /// Entry of the best tip.
    pub fn best_entry(&self) -> Option<&ChainEntry> {
        self.entries.get(&self.best)
    }

    /// Entry for `hash`, on any branch.
    pub fn entry(&self, hash: &Hash32) -> Option<&ChainEntry> {
        self.entries.get(hash)
    }

    /// Unspent outputs of the best chain.
    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    #[cfg(test)]
    pub fn db(&self) -> &ChainDb {
        &self.db
    }

    /// Median time of the up-to-11 blocks ending at `prev`.
    pub fn median_time_past(&self, prev: Hash32) -> Option<u64> {
        let mut ts = Vec::new();
        let mut cursor = prev;
        for _ in 0..11 {
            let entry = self.entries.get(&cursor)?;
            ts.push(entry.block.header.header.time as u64);
            if entry.height == 0 {
                break;
            }
            cursor = entry.block.header.header.prev;
        }
        ts.reverse();
        median_time_past(&ts)
    }

    /// Hashes from genesis to `tip`, inclusive.
    pub fn active_chain_hashes(&self, tip: Hash32) -> NodeResult<Vec<Hash32>> {
        let mut out = Vec::new();
        let mut cursor = tip;
        loop {
            out.push(cursor);
            let entry = self
                .entries
                .get(&cursor)
                .ok_or(NodeError::Corrupt("missing entry"))?;
            if entry.height == 0 {
                break;
            }
            cursor = entry.block.header.header.prev;
        }
        out.reverse();
        Ok(out)
    }

    /// Retarget history for children of `tip`.
    pub fn branch(&self, tip: Hash32) -> Branch<'_> {
        Branch { store: self, tip }
    }

    /// UTXO set after applying the chain ending at `tip`.
    pub fn utxos_at(&self, tip: Hash32) -> NodeResult<UtxoSet> {
        if tip == self.best {
            return Ok(self.utxos.clone());
        }
        let mut utxos = UtxoSet::new();
        for (height, hash) in self.active_chain_hashes(tip)?.into_iter().enumerate() {
            let entry = self
                .entries
                .get(&hash)
                .ok_or(NodeError::Corrupt("missing entry"))?;
            utxos.apply_block(&self.params, height as u64, &entry.block)?;
        }
        Ok(utxos)
    }

    /// Validate `block` against its parent and store it, moving the tip if it is heavier.
    ///
    /// `now` is the local clock used for the future-timestamp bound.
    pub fn insert_block(&mut self, block: Block, now: u64) -> NodeResult<Hash32> {
        let hash = block_hash(&block);
        if self.entries.contains_key(&hash) {
            return Err(NodeError::DuplicateBlock(hash));
        }
        block.validate_sanity()?;

        let header = &block.header.header;
        let prev = header.prev;
        let prev_entry = self
            .entries
            .get(&prev)
            .ok_or(NodeError::UnknownParent(prev))?;
        let height = prev_entry.height + 1;

        validate_header_time(header, self.median_time_past(prev), now)?;
        let window = collect_window(&self.branch(prev), &self.params, height)?;
        validate_header_pow(
            &self.params,
            header,
            block.header.auxpow.as_ref(),
            height,
            &window,
        )?;

        let txids: Vec<Hash32> = block.txs.iter().map(txid).collect();
        if merkle_root(&txids) != header.merkle_root {
            return Err(ConsensusError::InvalidHeader("merkle root mismatch").into());
        }

        let mut utxos = self.utxos_at(prev)?;
        let fees = utxos.apply_block(&self.params, height, &block)?;

        let work = work_from_bits(header.bits)?;
        let cum_work = &prev_entry.cumulative_work + work;
        let idx = IndexRecord {
            height,
            bits: header.bits,
            time: header.time,
            prev,
            cumulative_work: cum_work.to_bytes_be(),
        };

        let best_work = &self
            .entries
            .get(&self.best)
            .ok_or(NodeError::Corrupt("best entry missing"))?
            .cumulative_work;
        let should_update = tip_is_better(&cum_work, &hash, best_work, &self.best);

        self.db
            .upsert_block(hash, &block, &idx, should_update.then_some(hash))?;

        let auxpow = block.header.auxpow.is_some();
        self.entries.insert(
            hash,
            ChainEntry {
                block,
                height,
                cumulative_work: cum_work,
            },
        );
        if should_update {
            let extends_tip = prev == self.best;
            self.best = hash;
            if extends_tip {
                self.active.push(hash);
                self.utxos = utxos;
            } else {
                info!(height, tip = %hash, "Reorganized to heavier branch");
                self.reindex_active()?;
            }
        }
        debug!(height, %hash, auxpow, fees = %fees, best = should_update, "Block stored");
        Ok(hash)
    }

    fn reindex_active(&mut self) -> NodeResult<()> {
        self.active = self.active_chain_hashes(self.best)?;
        let mut utxos = UtxoSet::new();
        for (height, hash) in self.active.iter().enumerate() {
            let entry = self
                .entries
                .get(hash)
                .ok_or(NodeError::Corrupt("missing entry"))?;
            utxos.apply_block(&self.params, height as u64, &entry.block)?;
        }
        self.utxos = utxos;
        Ok(())
    }
}

impl HeaderHistory for ChainStore {
    fn header_info(&self, height: u64) -> Option<HeaderInfo> {
        let hash = self.active.get(height as usize)?;
        self.entries.get(hash).map(header_info)
    }
}

impl ChainView for ChainStore {
    fn lookup_coin(&self, out: &OutPoint) -> Option<Coin> {
        self.utxos.get(out).cloned()
    }

    fn next_height(&self) -> u64 {
        self.best_height() + 1
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }
}

/// Ancestors of one stored block, as retarget history for its children.
pub struct Branch<'a> {
    store: &'a ChainStore,
    tip: Hash32,
}

impl HeaderHistory for Branch<'_> {
    fn header_info(&self, height: u64) -> Option<HeaderInfo> {
        let tip = self.store.entries.get(&self.tip)?;
        if height > tip.height {
            return None;
        }
        if self.store.active.get(tip.height as usize) == Some(&self.tip) {
            return self.store.header_info(height);
        }
        let mut entry = tip;
        while entry.height > height {
            entry = self.store.entries.get(&entry.block.header.header.prev)?;
        }
        Some(header_info(entry))
    }
}

fn header_info(entry: &ChainEntry) -> HeaderInfo {
    HeaderInfo {
        height: entry.height,
        time: entry.block.header.header.time,
        bits: entry.block.header.header.bits,
    }
}

/// Hash identifying a block.
pub fn block_hash(block: &Block) -> BlockHash {
    block_header_hash(&block.header.header)
}

fn hash_from_slice(bytes: &[u8]) -> NodeResult<Hash32> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::Corrupt("stored hash has wrong length"))?;
    Ok(Hash32(arr))
}
