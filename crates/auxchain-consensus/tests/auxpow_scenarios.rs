use auxchain_consensus::{
    check_auxpow, commitment_script, expected_index, meets_target, pow_hash, validate_header_pow,
    ChainParams, ConsensusError, HeaderInfo,
};
use auxchain_core::{
    block_header_hash, merkle_branch, merkle_root, txid, Amount, AuxPow, BlockHeader, ChainId,
    Hash32, MerkleBranch, OutPoint, Transaction, TxIn, TxOut, MERGED_MINING_HEADER,
};
use proptest::prelude::*;

const OUR_BITS: u32 = 0x207f_ffff;
/// Target of nearly the whole hash space; almost any parent meets it.
const PARENT_BITS: u32 = 0x2100_ffff;
const FOREIGN_CHAIN: ChainId = ChainId(0x21);
const OUR_CHAIN: ChainId = ChainId(0x62);

struct Fixture {
    header: BlockHeader,
    chain_root: Hash32,
    chain_branch: MerkleBranch,
    nonce: u32,
}

/// Our header plus a four-leaf chain merkle tree holding its hash at the slot
/// reserved for our chain ID under `nonce`.
fn fixture(nonce: u32) -> Fixture {
    let mut header = BlockHeader {
        version: 0,
        prev: Hash32([0x11; 32]),
        merkle_root: Hash32([0x22; 32]),
        time: 1_700_000_000,
        bits: OUR_BITS,
        nonce: 0,
    };
    header.set_base_version(4, OUR_CHAIN);
    header.set_auxpow_flag(true);
    let aux_hash = block_header_hash(&header);

    let slot = expected_index(nonce, OUR_CHAIN, 2) as usize;
    let mut leaves: Vec<Hash32> = (0..4u8).map(|i| Hash32([0xa0 + i; 32])).collect();
    leaves[slot] = aux_hash;
    let chain_branch = merkle_branch(&leaves, slot).expect("slot in range");
    Fixture {
        header,
        chain_root: merkle_root(&leaves),
        chain_branch,
        nonce,
    }
}

fn standard_script(fx: &Fixture) -> Vec<u8> {
    let mut script = vec![0x03, 0x01, 0x02, 0x03];
    script.extend(commitment_script(&fx.chain_root, 4, fx.nonce));
    script
}

fn coinbase(script: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: script,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: Amount::from_coins(25),
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

#[derive(Clone, Copy)]
enum Grind {
    /// Parent meets its own bits only.
    ParentOnly,
    MeetOurs,
    MissOurs,
}

/// Parent block with the coinbase at index 0 of three transactions.
fn envelope(fx: &Fixture, script: Vec<u8>, parent_chain: ChainId, grind: Grind) -> AuxPow {
    let coinbase_tx = coinbase(script);
    let txids = vec![txid(&coinbase_tx), Hash32([0x31; 32]), Hash32([0x32; 32])];
    let coinbase_branch = merkle_branch(&txids, 0).expect("coinbase leaf");

    let mut parent = BlockHeader {
        version: 0,
        prev: Hash32([0x44; 32]),
        merkle_root: merkle_root(&txids),
        time: 1_700_000_100,
        bits: PARENT_BITS,
        nonce: 0,
    };
    parent.set_base_version(2, parent_chain);

    let wanted = |h: &BlockHeader| {
        let hash = pow_hash(h);
        let ours = meets_target(&hash, OUR_BITS).expect("bits");
        let theirs = meets_target(&hash, PARENT_BITS).expect("bits");
        match grind {
            Grind::ParentOnly => theirs,
            Grind::MeetOurs => ours && theirs,
            Grind::MissOurs => !ours && theirs,
        }
    };
    while !wanted(&parent) {
        parent.nonce += 1;
    }

    AuxPow {
        coinbase_tx,
        parent_block_hash: block_header_hash(&parent),
        coinbase_branch,
        chain_branch: fx.chain_branch.clone(),
        parent,
    }
}

fn window(height: u64) -> Vec<HeaderInfo> {
    if height == 0 {
        return Vec::new();
    }
    vec![HeaderInfo {
        height: height - 1,
        time: 1_699_999_000,
        bits: OUR_BITS,
    }]
}

fn validate(fx: &Fixture, aux: &AuxPow, height: u64) -> Result<(), ConsensusError> {
    validate_header_pow(
        &ChainParams::regtest(),
        &fx.header,
        Some(aux),
        height,
        &window(height),
    )
}

#[test]
fn scenario_a_before_activation() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::MeetOurs);
    assert_eq!(validate(&fx, &aux, 5), Err(ConsensusError::AuxPowNotYetAllowed));
}

#[test]
fn scenario_b_valid_envelope_accepted() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::MeetOurs);
    assert_eq!(validate(&fx, &aux, 25), Ok(()));
}

#[test]
fn scenario_c_parent_above_our_target() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::MissOurs);
    assert_eq!(validate(&fx, &aux, 25), Err(ConsensusError::InsufficientWork));
}

#[test]
fn scenario_d_parent_carries_our_chain_id() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), OUR_CHAIN, Grind::MeetOurs);
    assert_eq!(
        validate(&fx, &aux, 25),
        Err(ConsensusError::SelfMergeMiningForbidden)
    );
}

#[test]
fn activation_gate_is_monotonic() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::MeetOurs);
    for height in 0..40 {
        let result = validate(&fx, &aux, height);
        if height < 20 {
            assert_eq!(result, Err(ConsensusError::AuxPowNotYetAllowed), "height {height}");
        } else {
            assert_eq!(result, Ok(()), "height {height}");
        }
    }
}

#[test]
fn parent_work_policy_rejects_easier_parent() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::MeetOurs);
    let mut params = ChainParams::regtest();
    params.require_parent_work = true;
    assert_eq!(
        validate_header_pow(&params, &fx.header, Some(&aux), 25, &window(25)),
        Err(ConsensusError::InsufficientWork)
    );
}

#[test]
fn tampered_chain_branch_is_not_committed() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::ParentOnly);
    let hash = block_header_hash(&fx.header);
    let params = ChainParams::regtest();

    for level in 0..aux.chain_branch.len() {
        for byte in 0..32 {
            let mut bad = aux.clone();
            bad.chain_branch.hashes[level].0[byte] ^= 0x01;
            assert!(matches!(
                check_auxpow(&params, &bad, &hash, 25),
                Err(ConsensusError::BlockNotCommittedByParent(_))
            ));
        }
    }

    let mut bad = aux.clone();
    bad.chain_branch.index ^= 1;
    assert!(matches!(
        check_auxpow(&params, &bad, &hash, 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));
}

#[test]
fn tampered_coinbase_branch_is_not_in_parent() {
    let fx = fixture(7);
    let aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::ParentOnly);
    let hash = block_header_hash(&fx.header);
    let params = ChainParams::regtest();

    for level in 0..aux.coinbase_branch.len() {
        for byte in 0..32 {
            let mut bad = aux.clone();
            bad.coinbase_branch.hashes[level].0[byte] ^= 0x80;
            assert!(matches!(
                check_auxpow(&params, &bad, &hash, 25),
                Err(ConsensusError::CoinbaseNotInParentBlock(_))
            ));
        }
    }

    let mut bad = aux;
    bad.coinbase_branch.index = 1;
    assert!(matches!(
        check_auxpow(&params, &bad, &hash, 25),
        Err(ConsensusError::CoinbaseNotInParentBlock(_))
    ));
}

#[test]
fn duplicated_root_is_ambiguous() {
    let fx = fixture(7);
    let mut script = standard_script(&fx);
    script.extend_from_slice(&fx.chain_root.to_display_bytes());
    let aux = envelope(&fx, script, FOREIGN_CHAIN, Grind::ParentOnly);
    let err = check_auxpow(
        &ChainParams::regtest(),
        &aux,
        &block_header_hash(&fx.header),
        25,
    )
    .expect_err("duplicate root");
    assert!(matches!(err, ConsensusError::AmbiguousChainCommitment(_)));
    assert!(err.is_adversarial());
}

#[test]
fn duplicated_marker_is_ambiguous() {
    let fx = fixture(7);
    let mut script = MERGED_MINING_HEADER.to_vec();
    script.extend(standard_script(&fx));
    let aux = envelope(&fx, script, FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&ChainParams::regtest(), &aux, &block_header_hash(&fx.header), 25),
        Err(ConsensusError::AmbiguousChainCommitment(_))
    ));
}

#[test]
fn marker_must_precede_root() {
    let fx = fixture(7);
    let mut script = MERGED_MINING_HEADER.to_vec();
    script.push(0x00);
    script.extend_from_slice(&fx.chain_root.to_display_bytes());
    script.extend_from_slice(&4u32.to_le_bytes());
    script.extend_from_slice(&fx.nonce.to_le_bytes());
    let aux = envelope(&fx, script, FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&ChainParams::regtest(), &aux, &block_header_hash(&fx.header), 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));
}

fn markerless_script(fx: &Fixture, offset: usize) -> Vec<u8> {
    let mut script = vec![0x00; offset];
    script.extend_from_slice(&fx.chain_root.to_display_bytes());
    script.extend_from_slice(&4u32.to_le_bytes());
    script.extend_from_slice(&fx.nonce.to_le_bytes());
    script
}

#[test]
fn markerless_root_must_start_early() {
    let fx = fixture(7);
    let hash = block_header_hash(&fx.header);
    let params = ChainParams::regtest();

    let ok = envelope(&fx, markerless_script(&fx, 20), FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(check_auxpow(&params, &ok, &hash, 25).is_ok());

    let late = envelope(&fx, markerless_script(&fx, 21), FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&params, &late, &hash, 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));
}

#[test]
fn tree_size_and_nonce_must_match() {
    let fx = fixture(7);
    let hash = block_header_hash(&fx.header);
    let params = ChainParams::regtest();

    let mut wrong_size = vec![0x01];
    wrong_size.extend(commitment_script(&fx.chain_root, 8, fx.nonce));
    let aux = envelope(&fx, wrong_size, FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&params, &aux, &hash, 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));

    // A nonce whose slot differs from the one the branch proves.
    let slot = expected_index(fx.nonce, OUR_CHAIN, 2);
    let other = (0u32..)
        .find(|n| expected_index(*n, OUR_CHAIN, 2) != slot)
        .expect("some nonce maps elsewhere");
    let mut wrong_nonce = vec![0x01];
    wrong_nonce.extend(commitment_script(&fx.chain_root, 4, other));
    let aux = envelope(&fx, wrong_nonce, FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&params, &aux, &hash, 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));

    let mut truncated = vec![0x01];
    truncated.extend(commitment_script(&fx.chain_root, 4, fx.nonce));
    truncated.truncate(truncated.len() - 1);
    let aux = envelope(&fx, truncated, FOREIGN_CHAIN, Grind::ParentOnly);
    assert!(matches!(
        check_auxpow(&params, &aux, &hash, 25),
        Err(ConsensusError::BlockNotCommittedByParent(_))
    ));
}

#[test]
fn oversized_chain_branch_is_ambiguous() {
    let fx = fixture(7);
    let mut aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::ParentOnly);
    aux.chain_branch.hashes = vec![Hash32::zero(); 31];
    assert!(matches!(
        check_auxpow(&ChainParams::regtest(), &aux, &block_header_hash(&fx.header), 25),
        Err(ConsensusError::AmbiguousChainCommitment(_))
    ));
}

#[test]
fn parent_failing_own_target_is_rejected() {
    let fx = fixture(7);
    let mut aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::ParentOnly);
    aux.parent.bits = 0x0300_0001;
    assert_eq!(
        check_auxpow(&ChainParams::regtest(), &aux, &block_header_hash(&fx.header), 25),
        Err(ConsensusError::ParentPowInvalid)
    );
    aux.parent.bits = 0x0492_3456;
    assert_eq!(
        check_auxpow(&ChainParams::regtest(), &aux, &block_header_hash(&fx.header), 25),
        Err(ConsensusError::ParentPowInvalid)
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn own_chain_id_always_forbidden(nonce in any::<u32>(), base in 1i32..8) {
        let fx = fixture(nonce);
        let mut aux = envelope(&fx, standard_script(&fx), FOREIGN_CHAIN, Grind::ParentOnly);
        aux.parent.set_base_version(base, OUR_CHAIN);
        prop_assert_eq!(
            validate(&fx, &aux, 25),
            Err(ConsensusError::SelfMergeMiningForbidden)
        );
    }
}
