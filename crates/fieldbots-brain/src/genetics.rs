//! Pure recombination and mutation primitives over scalar genes.
//!
//! Every function samples its own mutation event from the RNG it is handed;
//! there is no shared state. Callers pick one of the two probability
//! constants below depending on context. The two rates are intentionally
//! distinct and must stay independently tunable.

use rand::{Rng, RngCore};

/// Mutation probability along the breeding path: offspring color channels,
/// neuron output factors, neuron coordinates, and roster seeding jitter.
pub const BREED_MUTATION_CHANCE: f32 = 1.0 / 15.0;

/// Mutation probability when drifting a neuron field in place, outside of
/// any breeding event.
pub const DRIFT_MUTATION_CHANCE: f32 = 1.0 / 25.0;

const BLEND_SUB_PULL: f32 = 0.003;
const BLEND_MUT_PULL: f32 = 0.005;
const MIDPOINT_SUB_PULL: f32 = 0.2;
const MIDPOINT_MUT_PULL: f32 = 0.5;
const BOUNDED_SUB_PULL: f32 = 0.2;
const BOUNDED_MUT_PULL: f32 = 0.5;
const WRAP_PULL: f32 = 0.02;

/// Nudges `dom` toward `sub`, biased by where `dom` sits inside `[lo, hi]`.
///
/// With probability `chance` the pull instead targets a fresh uniform sample
/// from the range. Otherwise the pull is scaled asymmetrically by
/// `prob_less = (dom - lo) / (hi - lo)`: genes sitting near `lo` are pulled
/// harder from above than from below, and vice versa. The result is clamped
/// to `[lo, hi]`.
pub fn combine_blend(
    rng: &mut dyn RngCore,
    chance: f32,
    dom: f32,
    sub: f32,
    lo: f32,
    hi: f32,
) -> f32 {
    let prob_less = (dom - lo) / (hi - lo);
    let moved = if rng.random::<f32>() <= chance {
        let target = (hi - lo) * rng.random::<f32>() + lo;
        dom + BLEND_MUT_PULL * (target - dom)
    } else {
        let difference = sub - dom;
        if sub < dom {
            dom + BLEND_SUB_PULL * difference * (1.1 - prob_less)
        } else {
            dom + BLEND_SUB_PULL * difference * (prob_less + 0.1)
        }
    };
    moved.clamp(lo, hi)
}

/// Alternative recombination policy: moves `dom` by `sub`'s offset from the
/// half-range point, with a larger jump toward a fresh sample on mutation.
///
/// Kept for parity with the historical policy set; the breeding path does
/// not call it. The offset is measured against `(hi - lo) / 2`, not the
/// true midpoint of the interval.
pub fn combine_midpoint(
    rng: &mut dyn RngCore,
    chance: f32,
    dom: f32,
    sub: f32,
    lo: f32,
    hi: f32,
) -> f32 {
    let midpoint = (hi - lo) / 2.0;
    let moved = if rng.random::<f32>() <= chance {
        let target = (hi - lo) * rng.random::<f32>() + lo;
        dom + MIDPOINT_MUT_PULL * target
    } else {
        dom + MIDPOINT_SUB_PULL * (sub - midpoint)
    };
    moved.clamp(lo, hi)
}

/// Pulls `dom` toward `sub` only when `sub` falls strictly within a
/// half-range window centered on `dom`; otherwise `dom` is returned
/// unchanged. The window edges are clamped to `[lo, hi]` and the movement is
/// the offset normalized by the window side it falls on.
pub fn combine_bounded(
    rng: &mut dyn RngCore,
    chance: f32,
    dom: f32,
    sub: f32,
    lo: f32,
    hi: f32,
) -> f32 {
    if rng.random::<f32>() <= chance {
        let jump = BOUNDED_MUT_PULL * (rng.random::<f32>() * 2.0 - 1.0);
        return (dom + jump).clamp(lo, hi);
    }

    let half_range = (hi - lo) / 2.0;
    let lower_limit = (dom - half_range).max(lo);
    let upper_limit = (dom + half_range).min(hi);
    let difference = sub - dom;

    let movement = if sub < dom && sub >= lower_limit {
        difference / (dom - lower_limit)
    } else if sub > dom && sub <= upper_limit {
        difference / (upper_limit - dom)
    } else {
        return dom;
    };

    (dom + movement * BOUNDED_SUB_PULL).clamp(lo, hi)
}

/// Toroidal pull: treats `[lo, hi]` as a ring, moves `dom` a small fraction
/// along the shorter of the direct and wrap-around paths to `sub`, and wraps
/// the result back into range rather than clamping.
///
/// With probability `chance`, `sub` is replaced by a uniform point on the
/// ring before the move. Without a mutation, `combine_wrap(x, x, lo, hi)`
/// returns `x` for any non-degenerate range.
pub fn combine_wrap(
    rng: &mut dyn RngCore,
    chance: f32,
    dom: f32,
    sub: f32,
    lo: f32,
    hi: f32,
) -> f32 {
    let range = hi - lo;
    let dom_offset = dom - lo;
    let sub_offset = if rng.random::<f32>() <= chance {
        range * rng.random::<f32>()
    } else {
        sub - lo
    };

    let mut distance = sub_offset - dom_offset;
    if distance.abs() > range / 2.0 {
        if distance < 0.0 {
            distance += range;
        } else {
            distance -= range;
        }
    }

    let mut moved = dom_offset + distance * WRAP_PULL;
    if moved > range {
        moved -= range;
    } else if moved < 0.0 {
        moved += range;
    }
    moved + lo
}
