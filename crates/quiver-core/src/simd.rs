//! SIMD-optimized distance kernels
//!
//! Explicit intrinsics for aarch64 (NEON) and x86_64 (AVX2), with a scalar
//! fallback that LLVM auto-vectorizes under `-C target-cpu=native`.
//!
//! The engine ranks by *squared* Euclidean distance; the square root is only
//! taken where an unsquared magnitude is genuinely needed (IVF centroid
//! movement checks).
//!
//! # Architecture Selection
//!
//! | Platform     | ISA      | Width            |
//! |--------------|----------|------------------|
//! | Apple M1+    | NEON     | 128-bit (4×f32)  |
//! | x86_64+AVX2  | AVX2+FMA | 256-bit (8×f32)  |
//! | other        | scalar   | auto-vectorized  |

// ============================================================================
// aarch64 NEON intrinsics
// ============================================================================

/// NEON squared L2 distance: processes 4 floats per iteration
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn l2_squared_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let n = a.len();
    let chunks = n / 4;
    let remainder = n % 4;

    let mut acc = vdupq_n_f32(0.0);

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = vld1q_f32(a_ptr.add(i * 4));
        let vb = vld1q_f32(b_ptr.add(i * 4));
        let diff = vsubq_f32(va, vb);
        acc = vfmaq_f32(acc, diff, diff); // acc += diff * diff
    }

    let mut sum = vaddvq_f32(acc); // horizontal add

    let tail_start = chunks * 4;
    for i in 0..remainder {
        let d = a[tail_start + i] - b[tail_start + i];
        sum += d * d;
    }

    sum
}

// ============================================================================
// x86_64 AVX2 intrinsics (runtime feature detection)
// ============================================================================

/// AVX2+FMA squared L2 distance: processes 8 floats per iteration
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn l2_squared_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 8;
    let remainder = n % 8;

    let mut acc = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a_ptr.add(i * 8));
        let vb = _mm256_loadu_ps(b_ptr.add(i * 8));
        let diff = _mm256_sub_ps(va, vb);
        acc = _mm256_fmadd_ps(diff, diff, acc); // acc += diff * diff
    }

    // Horizontal sum of 8 floats → 1 float
    let hi = _mm256_extractf128_ps(acc, 1);
    let lo = _mm256_castps256_ps128(acc);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    let result = _mm_add_ss(sums, shuf2);
    let mut sum = _mm_cvtss_f32(result);

    let tail_start = chunks * 8;
    for i in 0..remainder {
        let d = a[tail_start + i] - b[tail_start + i];
        sum += d * d;
    }

    sum
}

// ============================================================================
// Scalar fallback
// ============================================================================

#[inline(always)]
fn l2_squared_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

// ============================================================================
// Public dispatch
// ============================================================================

/// Squared Euclidean distance between two vectors.
///
/// Both slices must have the same length; extra elements of the longer slice
/// are ignored by the scalar path and must not be relied upon.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { l2_squared_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { l2_squared_avx2(a, b) };
        }
        return l2_squared_scalar(a, b);
    }

    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    {
        l2_squared_scalar(a, b)
    }
}

/// Unsquared Euclidean distance.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}
