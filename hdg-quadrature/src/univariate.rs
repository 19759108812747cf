//! Quadrature rules and Legendre polynomials for the reference interval `[-1, 1]`.

use crate::{Error, Rule};
use std::f64::consts::PI;

/// Recurrence relation for a single Legendre polynomial.
///
/// Note: we use a formula for which derivatives are *not* defined at |x| == 1, so it is only
/// suitable for root finding in the open interval (-1, 1).
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // The current value, i.e. p_n(x)
    p1: f64,
    // The previous value in the recurrence, i.e. p_{n - 1}(x)
    p2: f64,
}

impl LegendreRecurrence {
    fn evaluate(n: usize, x: f64) -> Self {
        //  m P_m(x) = (2m - 1) * x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        let mut p3;
        for m in 1..=n {
            let m = m as f64;
            p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2 }
    }

    fn value(&self) -> f64 {
        self.p1
    }

    fn derivative(&self) -> f64 {
        let Self { n, x, p1, p2 } = &self;
        let n = *n as f64;
        // dp_n/dx (x) = n * (x * p_n(x) - p_{n - 1}(x)) / (x^2 - 1)
        n * (x * p1 - p2) / (x * x - 1.0)
    }

    fn second_derivative(&self) -> f64 {
        // From the Legendre differential equation
        //  (1 - x^2) p_n'' - 2 x p_n' + n (n + 1) p_n = 0
        let n = self.n as f64;
        (2.0 * self.x * self.derivative() - n * (n + 1.0) * self.p1) / (1.0 - self.x * self.x)
    }

    fn value_and_derivative(&self) -> (f64, f64) {
        (self.value(), self.derivative())
    }
}

/// Evaluates the Legendre polynomials `P_0, ..., P_{max_degree}` and their derivatives at `x`.
///
/// Unlike the recurrence used for root finding, the derivative recurrence
/// `P_n' = P_{n - 2}' + (2n - 1) P_{n - 1}` is valid on the closed interval, which is needed
/// when element basis functions are traced onto element faces.
///
/// # Panics
///
/// Panics if either output slice has length different from `max_degree + 1`.
pub fn legendre_values_and_derivatives(max_degree: usize, x: f64, values: &mut [f64], derivatives: &mut [f64]) {
    assert_eq!(values.len(), max_degree + 1);
    assert_eq!(derivatives.len(), max_degree + 1);

    values[0] = 1.0;
    derivatives[0] = 0.0;
    if max_degree == 0 {
        return;
    }
    values[1] = x;
    derivatives[1] = 1.0;
    for n in 2..=max_degree {
        let m = n as f64;
        values[n] = ((2.0 * m - 1.0) * x * values[n - 1] - (m - 1.0) * values[n - 2]) / m;
        derivatives[n] = derivatives[n - 2] + (2.0 * m - 1.0) * values[n - 1];
    }
}

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Returns the [Gauss quadrature rule] with the given number of points. Given `n` points,
/// the rule integrates polynomials of order up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
///
/// [Gauss quadrature rule]: https://en.wikipedia.org/wiki/Gaussian_quadrature
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    // Loosely based on the procedure used in
    // Numerical Recipes, The art of Scientific Computing, Third Edition (2007)
    let m = (n + 1) / 2;

    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    // Only find the first m roots. The remaining roots can be found by symmetry
    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let (mut p, mut dp) = LegendreRecurrence::evaluate(n, x).value_and_derivative();

        'newton: loop {
            let dx = -p / dp;
            x += dx;
            let (p_new, dp_new) = LegendreRecurrence::evaluate(n, x).value_and_derivative();
            p = p_new;
            dp = dp_new;
            if dx.abs() <= 1e-15 {
                break 'newton;
            }
        }

        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points.push([x]);
        weights.push(w);
    }

    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push([-points[mirror_idx][0]]);
        weights.push(weights[mirror_idx]);
    }

    assert_eq!(points.len(), n, "Internal error: incorrect number of points produced");

    (weights, points)
}

/// Gauss-Lobatto quadrature for the reference interval [-1, 1].
///
/// The rule contains both endpoints and integrates polynomials of order up to `2 n - 3`
/// exactly. Points are returned in increasing order. The points double as the nodes of the
/// nodal (Lagrange) face basis.
///
/// Returns an error if fewer than two points are requested.
pub fn gauss_lobatto(num_points: usize) -> Result<Rule<1>, Error> {
    if num_points < 2 {
        return Err(Error::NoRuleAvailable);
    }
    // Polynomial degree N such that the interior points are the roots of P_N'
    let degree = num_points - 1;
    let n = degree as f64;

    let mut points = Vec::with_capacity(num_points);
    points.push([-1.0]);
    for i in 1..degree {
        // Chebyshev-Gauss-Lobatto points are a good initial guess
        let mut x = -(PI * i as f64 / n).cos();
        for _ in 0..100 {
            let recurrence = LegendreRecurrence::evaluate(degree, x);
            let dx = -recurrence.derivative() / recurrence.second_derivative();
            x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        points.push([x]);
    }
    points.push([1.0]);

    let weights = points
        .iter()
        .map(|&[x]| {
            let p = LegendreRecurrence::evaluate(degree, x).value();
            2.0 / (n * (n + 1.0) * p * p)
        })
        .collect();

    Ok((weights, points))
}
