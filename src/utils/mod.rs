/// Standard special functions like Wigner-$`d`$ functions and momentum definitions.
pub mod functions;
/// Plain three- and four-vectors used to describe raw events.
pub mod vectors;

/// Integrate `f` over `[a, b]` with the composite Simpson rule on `intervals` subintervals
/// (rounded up to an even number).
pub fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, intervals: usize) -> f64 {
    let n = (intervals.max(2) + 1) / 2 * 2;
    let h = (b - a) / n as f64;
    let interior: f64 = (1..n)
        .map(|i| {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            weight * f(a + i as f64 * h)
        })
        .sum();
    (f(a) + interior + f(b)) * h / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_simpson_is_exact_for_cubics() {
        let integral = simpson(|x| x.powi(3) - 2.0 * x + 1.0, 0.0, 2.0, 4);
        assert_relative_eq!(integral, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_simpson_rounds_to_even_intervals() {
        let integral = simpson(f64::sin, 0.0, std::f64::consts::PI, 101);
        assert_relative_eq!(integral, 2.0, epsilon = 1e-6);
    }
}
