use auxchain_consensus::{
    bits_to_target, collect_window, next_bits, target_to_bits, window_len, ChainParams, Era,
    HeaderHistory, HeaderInfo,
};
use num_bigint::BigUint;

const BASE_BITS: u32 = 0x1d00_ffff;

/// Contiguous window ending at `next_height - 1`, with per-block gaps from `gap`.
fn window(next_height: u64, len: u64, bits: u32, gap: impl Fn(u64) -> u32) -> Vec<HeaderInfo> {
    let mut time = 1_400_000_000u32;
    (next_height - len..next_height)
        .map(|height| {
            time += gap(height);
            HeaderInfo { height, time, bits }
        })
        .collect()
}

fn scaled(bits: u32, num: u32, den: u32) -> u32 {
    let t: BigUint = bits_to_target(bits).expect("target") * num / den;
    target_to_bits(&t).expect("encode")
}

#[test]
fn legacy_clamp_floor_tightens_with_height() {
    let p = ChainParams::mainnet();
    for (height, den) in [(2_400u64, 16u32), (5_040, 8), (10_080, 4), (144_960, 4)] {
        assert_eq!(p.era(height), Era::PreDigishield);
        let w = window(height, 241, BASE_BITS, |_| 0);
        assert_eq!(next_bits(&p, height, &w), Ok(scaled(BASE_BITS, 1, den)), "height {height}");
    }
}

#[test]
fn legacy_clamp_ceiling_is_four_times() {
    let p = ChainParams::mainnet();
    let w = window(2_400, 241, BASE_BITS, |_| 3_600);
    assert_eq!(next_bits(&p, 2_400, &w), Ok(scaled(BASE_BITS, 4, 1)));
}

#[test]
fn legacy_on_schedule_keeps_difficulty() {
    let p = ChainParams::mainnet();
    // 240 gaps of 60s between first and parent: exactly the target timespan.
    let w = window(4_800, 241, BASE_BITS, |_| 60);
    assert_eq!(next_bits(&p, 4_800, &w), Ok(BASE_BITS));
}

#[test]
fn switch_to_digishield_at_activation() {
    let p = ChainParams::mainnet();
    let start = p.activation.digishield_start;
    assert_eq!(p.era(start - 1), Era::PreDigishield);
    assert_eq!(p.era(start), Era::Digishield);
    assert_eq!(window_len(&p, start - 1), 1);
    assert_eq!(window_len(&p, start), 2);

    // Before activation and off-boundary: parent bits carry over.
    let w = window(start - 1, 1, BASE_BITS, |_| 600);
    assert_eq!(next_bits(&p, start - 1, &w), Ok(BASE_BITS));

    // At activation a single 600s block already moves difficulty:
    // modulated = 60 + 540/8 = 127, clamped to 90 (3/2 of spacing).
    let w = window(start, 2, BASE_BITS, |_| 600);
    assert_eq!(next_bits(&p, start, &w), Ok(scaled(BASE_BITS, 90, 60)));
}

#[test]
fn digishield_damping_on_mainnet() {
    let p = ChainParams::mainnet();
    let h = 200_000;
    // 68s block: modulated = 60 + 8/8 = 61.
    let w = window(h, 2, BASE_BITS, |_| 68);
    assert_eq!(next_bits(&p, h, &w), Ok(scaled(BASE_BITS, 61, 60)));

    // Fast block: modulated = 60 + (1 - 60)/8 = 53 (truncated toward zero).
    let w = window(h, 2, BASE_BITS, |_| 1);
    assert_eq!(next_bits(&p, h, &w), Ok(scaled(BASE_BITS, 53, 60)));

    // Negative timespan still clamps at 3/4.
    let mut w = window(h, 2, BASE_BITS, |_| 60);
    w[1].time = w[0].time - 3_000;
    assert_eq!(next_bits(&p, h, &w), Ok(scaled(BASE_BITS, 45, 60)));
}

struct Chain(Vec<HeaderInfo>);

impl HeaderHistory for Chain {
    fn header_info(&self, height: u64) -> Option<HeaderInfo> {
        self.0.get(height as usize).copied()
    }
}

#[test]
fn history_provider_feeds_engine() {
    let p = ChainParams::mainnet();
    let chain = Chain(window(500, 500, BASE_BITS, |_| 60));
    let w = collect_window(&chain, &p, 480).expect("window");
    assert_eq!(w.len(), window_len(&p, 480));
    assert_eq!(next_bits(&p, 480, &w), Ok(BASE_BITS));

    let short = Chain(chain.0[..100].to_vec());
    assert!(collect_window(&short, &p, 480).is_err());
}
