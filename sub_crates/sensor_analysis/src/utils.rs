/// Linearly interpolates a table spanning [0.0, 1.0] at `t`.
///
/// `t` is clamped to [0.0, 1.0].
#[inline(always)]
pub fn lerp_slice(slice: &[f32], t: f32) -> f32 {
    debug_assert!(!slice.is_empty());
    let t = t.max(0.0).min(1.0);
    let i1 = ((slice.len() - 1) as f32 * t) as usize;
    let alpha = ((slice.len() - 1) as f32 * t) - i1 as f32;

    if i1 >= (slice.len() - 1) {
        *slice.last().unwrap()
    } else {
        let v1 = slice[i1];
        let v2 = slice[i1 + 1];
        v1 + ((v2 - v1) * alpha)
    }
}

/// Forces a table to be strictly increasing by at least `min_diff`
/// per entry.
pub fn make_monotonic(table: &mut [f32], min_diff: f32) {
    for i in 1..table.len() {
        if (table[i] - table[i - 1]) < min_diff {
            table[i] = table[i - 1] + min_diff;
        }
    }
}
