//! Inner product with SIMD optimization

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;
#[cfg(target_arch = "x86_64")]
use std::sync::OnceLock;

/// CPU feature detection cache
#[cfg(target_arch = "x86_64")]
static HAS_AVX2_FMA: OnceLock<bool> = OnceLock::new();

#[cfg(target_arch = "x86_64")]
fn has_avx2_fma() -> bool {
    *HAS_AVX2_FMA.get_or_init(|| is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"))
}

/// Dot product of two equal-length vectors
///
/// # Panics
/// Panics if vectors have different dimensions
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() && a.len() >= 8 {
            // SAFETY: feature presence checked above, lengths are equal
            return unsafe { inner_product_avx2(a, b) };
        }
    }
    inner_product_scalar(a, b)
}

/// AVX2 + FMA，2路展开
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn inner_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / 16;

    let mut sum1 = _mm256_setzero_ps();
    let mut sum2 = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 16;
        let a1 = _mm256_loadu_ps(a.as_ptr().add(offset));
        let b1 = _mm256_loadu_ps(b.as_ptr().add(offset));
        let a2 = _mm256_loadu_ps(a.as_ptr().add(offset + 8));
        let b2 = _mm256_loadu_ps(b.as_ptr().add(offset + 8));
        sum1 = _mm256_fmadd_ps(a1, b1, sum1);
        sum2 = _mm256_fmadd_ps(a2, b2, sum2);
    }

    let mut offset = chunks * 16;
    if n - offset >= 8 {
        let a1 = _mm256_loadu_ps(a.as_ptr().add(offset));
        let b1 = _mm256_loadu_ps(b.as_ptr().add(offset));
        sum1 = _mm256_fmadd_ps(a1, b1, sum1);
        offset += 8;
    }

    let mut total = horizontal_sum_avx2(_mm256_add_ps(sum1, sum2));
    // 剩余元素
    for i in offset..n {
        total += a[i] * b[i];
    }
    total
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn horizontal_sum_avx2(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(high, low);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf = _mm_movehl_ps(shuf, sums);
    let sums = _mm_add_ss(sums, shuf);
    _mm_cvtss_f32(sums)
}

#[inline]
fn inner_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
