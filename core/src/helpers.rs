mod frequencies;
pub use frequencies::*;

mod math;
pub use math::*;

use std::collections::TryReserveError;

/// Take any vec, set its length and fill it with the default value.
///
/// Only grows the allocation, so a vec that is reused every block settles
/// at its largest size and stops allocating.
pub fn prepare_cache_vec<T: Copy>(vec: &mut Vec<T>, len: usize, default: T) {
    vec.clear();
    vec.resize(len, default);
}

/// A zeroed buffer whose allocation failure is reported instead of
/// aborting.
pub fn try_zeroed_vec(len: usize) -> Result<Vec<f32>, TryReserveError> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(len)?;
    vec.resize(len, 0.0);
    Ok(vec)
}

/// Add all of the samples of `src` on top of `dst`.
#[inline(always)]
pub fn sum_into(src: &[f32], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d += *s;
    }
}

/// Split an interleaved stereo buffer into the two given planar buffers.
pub fn deinterleave(src: &[f32], left: &mut [f32], right: &mut [f32]) {
    for (frame, (l, r)) in src
        .chunks_exact(2)
        .zip(left.iter_mut().zip(right.iter_mut()))
    {
        *l = frame[0];
        *r = frame[1];
    }
}

/// Write two planar buffers into an interleaved stereo buffer.
pub fn interleave(left: &[f32], right: &[f32], dst: &mut [f32]) {
    for (frame, (l, r)) in dst
        .chunks_exact_mut(2)
        .zip(left.iter().zip(right.iter()))
    {
        frame[0] = *l;
        frame[1] = *r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_vec_reuse() {
        let mut vec = vec![1.0f32; 8];
        prepare_cache_vec(&mut vec, 4, 0.0);
        assert_eq!(vec, vec![0.0; 4]);
        prepare_cache_vec(&mut vec, 6, 2.0);
        assert_eq!(vec, vec![2.0; 6]);
    }

    #[test]
    fn test_try_zeroed_vec() {
        assert_eq!(try_zeroed_vec(3).unwrap(), vec![0.0; 3]);
        assert!(try_zeroed_vec(usize::MAX).is_err());
    }

    #[test]
    fn test_interleave() {
        let left = [1.0, 2.0, 3.0];
        let right = [-1.0, -2.0, -3.0];
        let mut out = [0.0; 6];
        interleave(&left, &right, &mut out);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);

        let mut l = [0.0; 3];
        let mut r = [0.0; 3];
        deinterleave(&out, &mut l, &mut r);
        assert_eq!(l, left);
        assert_eq!(r, right);
    }
}
