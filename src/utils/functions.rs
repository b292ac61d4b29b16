//! Special functions shared by the physics kernels and the kinematics.

/// The interaction radius used by the Blatt-Weisskopf barrier factors, expressed as a momentum
/// scale in GeV (roughly 1 fm).
pub const QR: f64 = 0.1973;

/// The Källén (triangle) function $`\lambda(a, b, c) = a^2 + b^2 + c^2 - 2(ab + bc + ca)`$.
pub fn kallen(a: f64, b: f64, c: f64) -> f64 {
    a.powi(2) + b.powi(2) + c.powi(2) - 2.0 * (a * b + b * c + c * a)
}

/// The breakup momentum of a particle with mass `m0` decaying into two particles with masses `m1`
/// and `m2`, evaluated in the rest frame of the parent.
pub fn breakup_momentum(m0: f64, m1: f64, m2: f64) -> f64 {
    f64::sqrt(f64::abs(kallen(m0.powi(2), m1.powi(2), m2.powi(2)))) / (2.0 * m0)
}

/// The Blatt-Weisskopf barrier factor $`B_\ell(m_0, m_1, m_2)`$ for angular momenta up to
/// $`\ell = 4`$. Higher waves fall back to the $`\ell = 4`$ form.
pub fn blatt_weisskopf(m0: f64, m1: f64, m2: f64, l: usize) -> f64 {
    let q = breakup_momentum(m0, m1, m2);
    let z = q.powi(2) / QR.powi(2);
    match l {
        0 => 1.0,
        1 => f64::sqrt(2.0 * z / (z + 1.0)),
        2 => f64::sqrt(13.0 * z.powi(2) / ((z - 3.0).powi(2) + 9.0 * z)),
        3 => f64::sqrt(
            277.0 * z.powi(3) / (z * (z - 15.0).powi(2) + 9.0 * (2.0 * z - 5.0).powi(2)),
        ),
        _ => f64::sqrt(
            12746.0 * z.powi(4)
                / ((z.powi(2) - 45.0 * z + 105.0).powi(2) + 25.0 * z * (2.0 * z - 21.0).powi(2)),
        ),
    }
}

fn factorial(n: i32) -> f64 {
    (2..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Wigner's small-$`d`$ function $`d^j_{m'm}(\theta)`$.
///
/// Spins and projections are given as *twice* their physical value so that half-integer spins
/// can be represented exactly (`j2 = 1` is spin one-half). Combinations which are not allowed
/// (a projection larger than the spin or a mismatched parity of `j2` and `m2`) evaluate to zero.
pub fn wigner_small_d(j2: i32, m2: i32, n2: i32, theta: f64) -> f64 {
    if m2.abs() > j2 || n2.abs() > j2 || (j2 + m2) % 2 != 0 || (j2 + n2) % 2 != 0 {
        return 0.0;
    }
    let jpm = (j2 + m2) / 2;
    let jmm = (j2 - m2) / 2;
    let jpn = (j2 + n2) / 2;
    let jmn = (j2 - n2) / 2;
    let m_minus_n = (m2 - n2) / 2;
    let prefactor = f64::sqrt(factorial(jpm) * factorial(jmm) * factorial(jpn) * factorial(jmn));
    let (sin_half, cos_half) = (theta / 2.0).sin_cos();
    let k_min = i32::max(0, -m_minus_n);
    let k_max = i32::min(jpn, jmm);
    (k_min..=k_max)
        .map(|k| {
            let sign = if (k + m_minus_n) % 2 == 0 { 1.0 } else { -1.0 };
            let denominator = factorial(jpn - k)
                * factorial(k)
                * factorial(jmm - k)
                * factorial(k + m_minus_n);
            sign * cos_half.powi(j2 - 2 * k - m_minus_n) * sin_half.powi(2 * k + m_minus_n)
                / denominator
        })
        .sum::<f64>()
        * prefactor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_breakup_momentum_at_threshold() {
        assert_relative_eq!(breakup_momentum(1.0, 0.5, 0.5), 0.0);
        assert_relative_eq!(breakup_momentum(2.0, 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_blatt_weisskopf_s_wave() {
        assert_relative_eq!(blatt_weisskopf(1.2, 0.14, 0.14, 0), 1.0);
        let f1 = blatt_weisskopf(1.2, 0.14, 0.14, 1);
        assert!(f1 > 0.0 && f1 < f64::sqrt(2.0));
    }

    #[test]
    fn test_wigner_small_d_known_values() {
        let theta: f64 = 0.7;
        assert_relative_eq!(wigner_small_d(0, 0, 0, theta), 1.0);
        assert_relative_eq!(wigner_small_d(2, 0, 0, theta), theta.cos(), epsilon = 1e-14);
        assert_relative_eq!(
            wigner_small_d(2, 2, 0, theta),
            -theta.sin() / f64::sqrt(2.0),
            epsilon = 1e-14
        );
        assert_relative_eq!(
            wigner_small_d(2, 2, 2, theta),
            (1.0 + theta.cos()) / 2.0,
            epsilon = 1e-14
        );
        assert_relative_eq!(
            wigner_small_d(1, 1, -1, theta),
            -(theta / 2.0).sin(),
            epsilon = 1e-14
        );
        assert_relative_eq!(
            wigner_small_d(4, 0, 0, theta),
            (3.0 * theta.cos().powi(2) - 1.0) / 2.0,
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_wigner_small_d_forbidden_projection() {
        assert_eq!(wigner_small_d(2, 4, 0, 0.3), 0.0);
        assert_eq!(wigner_small_d(2, 1, 0, 0.3), 0.0);
    }
}
