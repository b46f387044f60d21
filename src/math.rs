use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    izip!(a, b).fold(0f64, |acc, (&x, &y)| x.mul_add(y, acc))
}

/// `out = y + a * x`
#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(&x, &y, out)| {
        *out = a.mul_add(x, y);
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(&x, &y, out)| {
        *out = x * y;
    });
}

/// Compute `(sum((a - b) * x), sum((a - b) * y))` in one pass.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn scalar_prods_of_diff(a: &[f64], b: &[f64], x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = a.len();
    assert!(b.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(a, b, x, y).fold((0f64, 0f64), |(s1, s2), (&a, &b, &x, &y)| {
        let diff = a - b;
        (diff.mul_add(x, s1), diff.mul_add(y, s2))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn vecs(len: usize) -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
        (
            prop::collection::vec(-100f64..100f64, len),
            prop::collection::vec(-100f64..100f64, len),
        )
    }

    proptest! {
        #[test]
        fn check_vector_dot((a, b) in (0usize..40).prop_flat_map(vecs)) {
            let expected: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
            let actual = vector_dot(&a, &b);
            prop_assert!((expected - actual).abs() < 1e-8 * (1. + expected.abs()));
        }

        #[test]
        fn check_axpy((x, y) in (0usize..40).prop_flat_map(vecs), a in -10f64..10f64) {
            let mut out = vec![0f64; x.len()];
            axpy_out(&x, &y, a, &mut out);
            for i in 0..x.len() {
                let expected = y[i] + a * x[i];
                prop_assert!((out[i] - expected).abs() < 1e-10 * (1. + expected.abs()));
            }
        }
    }

    #[test]
    fn prods_of_diff() {
        let a = [1., 2., 3.];
        let b = [0., 2., 1.];
        let x = [1., 5., -1.];
        let y = [2., 0., 0.5];
        let (s1, s2) = scalar_prods_of_diff(&a, &b, &x, &y);
        assert_abs_diff_eq!(s1, 1. - 2.);
        assert_abs_diff_eq!(s2, 2. + 1.);
    }

    #[test]
    fn multiply_elementwise() {
        let mut out = [0f64; 3];
        multiply(&[1., 2., 3.], &[2., 0.5, -1.], &mut out);
        assert_eq!(out, [2., 1., -3.]);
    }

    #[test]
    fn empty_slices() {
        assert_eq!(vector_dot(&[], &[]), 0.);
        assert_eq!(scalar_prods_of_diff(&[], &[], &[], &[]), (0., 0.));
    }
}
