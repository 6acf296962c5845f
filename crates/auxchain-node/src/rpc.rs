use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use auxchain_core::{from_hex, Hash32, Transaction};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auxmining::AuxMiner;
use crate::chain_store::ChainStore;
use crate::error::{NodeError, NodeResult};
use crate::fees::FeePriority;
use crate::mempool::Mempool;
use crate::mining::{current_time, mine_block};

/// Most blocks a single `generate` call may mine.
const MAX_GENERATE: u64 = 1_000;

/// Shared node state behind the RPC server.
///
/// Locks are always taken in the order chain, mempool, aux miner.
pub struct Node {
    /// Block store.
    pub chain: Mutex<ChainStore>,
    /// Transaction pool.
    pub mempool: Mutex<Mempool>,
    /// Outstanding merged-mining templates.
    pub aux: Mutex<AuxMiner>,
    /// Script paid by locally built blocks unless a request names another.
    pub payout_script: Vec<u8>,
    /// Required `auth` value on every request, if set.
    pub auth_token: Option<String>,
}

impl Node {
    /// Bundle the pieces of a running node.
    pub fn new(
        chain: ChainStore,
        mempool: Mempool,
        payout_script: Vec<u8>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            chain: Mutex::new(chain),
            mempool: Mutex::new(mempool),
            aux: Mutex::new(AuxMiner::new()),
            payout_script,
            auth_token,
        }
    }
}

/// Accept JSON-line requests on `addr`, one thread per client.
pub fn serve_rpc(addr: &str, node: Arc<Node>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "RPC listening");
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let node = Arc::clone(&node);
            thread::spawn(move || handle_client(stream, &node));
        }
    });
    Ok(())
}

fn handle_client(stream: TcpStream, node: &Node) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut write_half = stream;
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    while let Ok(n) = reader.read_line(&mut line) {
        if n == 0 {
            break;
        }
        let resp = match serde_json::from_str::<Value>(&line) {
            Ok(v) => handle_request(node, v),
            Err(_) => json!({"ok": false, "error": "invalid json"}),
        };
        line.clear();
        if write_half.write_all(resp.to_string().as_bytes()).is_err()
            || write_half.write_all(b"\n").is_err()
        {
            break;
        }
    }
}

/// Answer one request object.
pub fn handle_request(node: &Node, v: Value) -> Value {
    if let Some(expected) = &node.auth_token {
        match v.get("auth").and_then(|a| a.as_str()) {
            Some(tok) if tok == expected => {}
            _ => return json!({"ok": false, "error": "Unauthorized"}),
        }
    }
    let method = match v.get("method").and_then(|m| m.as_str()) {
        Some(m) => m,
        None => return json!({"ok": false, "error": "missing method"}),
    };

    match dispatch(node, method, &v) {
        Ok(result) => json!({"ok": true, "result": result}),
        Err(e) => {
            debug!(method, error = %e, "RPC error");
            json!({"ok": false, "error": e.to_string()})
        }
    }
}

fn dispatch(node: &Node, method: &str, v: &Value) -> NodeResult<Value> {
    match method {
        "ping" => Ok(Value::Null),
        "getblockcount" => Ok(json!(lock(&node.chain)?.best_height())),
        "getbestblockhash" => Ok(json!(lock(&node.chain)?.best_hash().to_string())),
        "getblockchaininfo" => {
            let chain = lock(&node.chain)?;
            let params = chain.params();
            let next = chain.best_height() + 1;
            Ok(json!({
                "network": serde_json::to_value(params.network)?,
                "blocks": chain.best_height(),
                "bestblockhash": chain.best_hash().to_string(),
                "chainid": params.chain_id.0,
                "activation": serde_json::to_value(params.activation)?,
                "era": serde_json::to_value(params.era(next))?,
                "auxpow": params.auxpow_allowed(next),
            }))
        }
        "createauxblock" => create_aux_block(node, v),
        "submitauxblock" => submit_aux_block(node, v),
        "getauxblock" => {
            if v.get("hash").is_some() || v.get("auxpow").is_some() {
                submit_aux_block(node, v)
            } else {
                create_aux_block(node, v)
            }
        }
        "generate" => generate(node, v),
        "sendrawtransaction" => {
            let tx: Transaction = from_hex(str_param(v, "tx_hex")?)?;
            let chain = lock(&node.chain)?;
            let mut mempool = lock(&node.mempool)?;
            let id = mempool
                .submit_tx(&*chain, tx)
                .map_err(|e| NodeError::InvalidParameter(e.to_string()))?;
            Ok(json!(id.to_string()))
        }
        "prioritisetransaction" => {
            let id: Hash32 = str_param(v, "txid")?.parse()?;
            let delta = v
                .get("fee_delta")
                .and_then(Value::as_i64)
                .ok_or_else(|| missing("fee_delta"))?;
            lock(&node.mempool)?.prioritise(id, delta);
            Ok(json!(true))
        }
        "getfeerate" => {
            let mempool = lock(&node.mempool)?;
            let policy = mempool.policy();
            match v.get("priority").and_then(Value::as_str) {
                Some(name) => {
                    let priority = FeePriority::from_name(name).ok_or_else(|| {
                        NodeError::InvalidParameter(format!("unknown fee priority '{name}'"))
                    })?;
                    Ok(json!({
                        "priority": priority.label(),
                        "feerate": policy.fee_rate_for(priority).fee_per_kb().koinu(),
                    }))
                }
                None => {
                    let presets: Vec<Value> = FeePriority::ALL
                        .into_iter()
                        .map(|p| {
                            json!({
                                "priority": p.label(),
                                "feerate": policy.fee_rate_for(p).fee_per_kb().koinu(),
                            })
                        })
                        .collect();
                    Ok(json!({
                        "feerate": policy.effective_fee_rate().fee_per_kb().koinu(),
                        "presets": presets,
                        "warnings": policy.warnings(),
                    }))
                }
            }
        }
        _ => Err(NodeError::InvalidParameter(format!("unknown method {method}"))),
    }
}

fn create_aux_block(node: &Node, v: &Value) -> NodeResult<Value> {
    let payout = payout_param(node, v)?;
    let chain = lock(&node.chain)?;
    let mempool = lock(&node.mempool)?;
    let mut aux = lock(&node.aux)?;
    let template = aux.create_aux_block(&chain, &mempool, payout, current_time())?;
    Ok(template.to_json())
}

fn submit_aux_block(node: &Node, v: &Value) -> NodeResult<Value> {
    let hash: Hash32 = str_param(v, "hash")?.parse()?;
    let auxpow = str_param(v, "auxpow")?;
    let mut chain = lock(&node.chain)?;
    let mut mempool = lock(&node.mempool)?;
    let mut aux = lock(&node.aux)?;
    let accepted = aux.submit_aux_block(&mut chain, &hash, auxpow, current_time())?;
    if accepted {
        mempool.purge_conflicts(&*chain);
    }
    Ok(json!(accepted))
}

fn generate(node: &Node, v: &Value) -> NodeResult<Value> {
    let blocks = v.get("blocks").and_then(Value::as_u64).unwrap_or(1);
    if blocks > MAX_GENERATE {
        return Err(NodeError::InvalidParameter(format!(
            "at most {MAX_GENERATE} blocks per call"
        )));
    }
    let payout = payout_param(node, v)?;
    let hashes: Vec<String> = generate_blocks(node, blocks, &payout)?
        .iter()
        .map(Hash32::to_string)
        .collect();
    Ok(json!(hashes))
}

/// Mine `blocks` standard blocks on the tip, draining the mempool into them.
pub fn generate_blocks(node: &Node, blocks: u64, payout: &[u8]) -> NodeResult<Vec<Hash32>> {
    let mut chain = lock(&node.chain)?;
    let mut mempool = lock(&node.mempool)?;
    let mut hashes = Vec::new();
    for _ in 0..blocks {
        mempool.purge_conflicts(&*chain);
        let (txs, fees) = mempool.select_for_block();
        hashes.push(mine_block(&mut chain, payout.to_vec(), txs, fees, current_time())?);
    }
    mempool.purge_conflicts(&*chain);
    Ok(hashes)
}

fn payout_param(node: &Node, v: &Value) -> NodeResult<Vec<u8>> {
    match v.get("payout").and_then(Value::as_str) {
        Some(h) => hex::decode(h).map_err(|_| {
            warn!("Rejected malformed payout script");
            NodeError::InvalidParameter("payout must be hex".to_string())
        }),
        None => Ok(node.payout_script.clone()),
    }
}

fn str_param<'a>(v: &'a Value, name: &str) -> NodeResult<&'a str> {
    v.get(name).and_then(Value::as_str).ok_or_else(|| missing(name))
}

fn missing(name: &str) -> NodeError {
    NodeError::InvalidParameter(format!("missing {name}"))
}

fn lock<T>(m: &Mutex<T>) -> NodeResult<MutexGuard<'_, T>> {
    m.lock().map_err(|_| NodeError::LockPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeePolicy;
    use crate::mining::build_genesis;
    use auxchain_consensus::{commitment_script, grind_nonce, ChainParams};
    use auxchain_core::{
        block_header_hash, merkle_root, to_hex, txid, AuxPow, BlockHeader, MerkleBranch,
        OutPoint, TxIn, TxOut,
    };
    use tempfile::{tempdir, TempDir};

    fn node(auth: Option<&str>) -> (Node, TempDir) {
        let dir = tempdir().expect("tempdir");
        let params = ChainParams::regtest();
        let genesis = build_genesis(&params).expect("genesis");
        let chain =
            ChainStore::load_or_init(&dir.path().join("db"), params, genesis).expect("open");
        let node = Node::new(
            chain,
            Mempool::new(FeePolicy::default(), false),
            vec![0x51],
            auth.map(str::to_string),
        );
        (node, dir)
    }

    fn call(node: &Node, req: Value) -> Value {
        handle_request(node, req)
    }

    fn mined_auxpow(hash: &Hash32) -> AuxPow {
        let coinbase_tx = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: commitment_script(hash, 1, 0),
                sequence: u32::MAX,
            }],
            outputs: Vec::new(),
            lock_time: 0,
        };
        let mut parent = BlockHeader {
            version: 2,
            prev: Hash32::zero(),
            merkle_root: merkle_root(&[txid(&coinbase_tx)]),
            time: 1_700_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        assert!(grind_nonce(&mut parent, 0x207f_ffff, 100_000).expect("bits"));
        AuxPow {
            coinbase_tx,
            parent_block_hash: block_header_hash(&parent),
            coinbase_branch: MerkleBranch::default(),
            chain_branch: MerkleBranch::default(),
            parent,
        }
    }

    #[test]
    fn auth_and_unknown_method() {
        let (node, _tmp) = node(Some("secret"));
        let resp = call(&node, json!({"method": "ping"}));
        assert_eq!(resp["error"], "Unauthorized");
        let resp = call(&node, json!({"method": "ping", "auth": "secret"}));
        assert_eq!(resp["ok"], true);
        let resp = call(&node, json!({"method": "nope", "auth": "secret"}));
        assert_eq!(resp["ok"], false);

        let info = call(&node, json!({"method": "getblockchaininfo", "auth": "secret"}));
        assert_eq!(info["result"]["network"], "regtest");
        assert_eq!(info["result"]["blocks"], 0);
        assert_eq!(info["result"]["era"], "PreDigishield");
        assert_eq!(info["result"]["activation"]["auxpow_start"], 20);
        assert_eq!(info["result"]["auxpow"], false);
    }

    #[test]
    fn merged_mining_round_trip() {
        let (node, _tmp) = node(None);

        let resp = call(&node, json!({"method": "createauxblock"}));
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"], "getauxblock method is not yet available");

        let resp = call(&node, json!({"method": "generate", "blocks": 19}));
        assert_eq!(resp["result"].as_array().map(Vec::len), Some(19));
        assert_eq!(call(&node, json!({"method": "getblockcount"}))["result"], 19);

        let resp = call(&node, json!({"method": "getauxblock"}));
        assert_eq!(resp["ok"], true, "{resp}");
        let hash_str = resp["result"]["hash"].as_str().expect("hash").to_string();
        assert_eq!(resp["result"]["height"], 20);
        let hash: Hash32 = hash_str.parse().expect("hash");

        let auxpow = to_hex(&mined_auxpow(&hash));
        let resp = call(
            &node,
            json!({"method": "submitauxblock", "hash": hash_str, "auxpow": auxpow}),
        );
        assert_eq!(resp["result"], true, "{resp}");
        assert_eq!(call(&node, json!({"method": "getblockcount"}))["result"], 20);
        assert_eq!(
            call(&node, json!({"method": "getbestblockhash"}))["result"],
            hash_str
        );

        // The template is consumed.
        let resp = call(
            &node,
            json!({"method": "submitauxblock", "hash": hash_str, "auxpow": auxpow}),
        );
        assert_eq!(resp["error"], "block hash unknown");
    }

    #[test]
    fn transaction_flow_through_generate() {
        let (node, _tmp) = node(None);
        call(&node, json!({"method": "generate", "blocks": 62}));

        let spend = {
            let chain = node.chain.lock().expect("chain");
            let first = chain.active_chain_hashes(chain.best_hash()).expect("chain")[1];
            let coinbase = &chain.entry(&first).expect("entry").block.txs[0];
            Transaction {
                version: 1,
                inputs: vec![TxIn {
                    prevout: OutPoint {
                        txid: txid(coinbase),
                        vout: 0,
                    },
                    script_sig: vec![0x00],
                    sequence: u32::MAX,
                }],
                outputs: vec![TxOut {
                    value: auxchain_core::Amount::from_coins(499_999),
                    script_pubkey: vec![0x51],
                }],
                lock_time: 0,
            }
        };
        let resp = call(
            &node,
            json!({"method": "sendrawtransaction", "tx_hex": to_hex(&spend)}),
        );
        assert_eq!(resp["result"], txid(&spend).to_string(), "{resp}");

        call(&node, json!({"method": "generate"}));
        assert!(node.mempool.lock().expect("mempool").is_empty());
        let chain = node.chain.lock().expect("chain");
        let tip = chain.best_entry().expect("tip");
        assert_eq!(tip.block.txs.len(), 2);
        assert_eq!(
            tip.block.txs[0].outputs[0].value,
            auxchain_core::Amount::from_coins(500_001)
        );
    }

    #[test]
    fn fee_rates() {
        let (node, _tmp) = node(None);
        let resp = call(&node, json!({"method": "getfeerate"}));
        assert_eq!(resp["result"]["feerate"], 1_000_000);
        assert_eq!(resp["result"]["presets"].as_array().map(Vec::len), Some(6));

        let resp = call(
            &node,
            json!({"method": "getfeerate", "priority": "such expensive"}),
        );
        assert_eq!(resp["result"]["feerate"], 521_000_000);
        assert_eq!(resp["result"]["priority"], "Such expensive");
    }
}
