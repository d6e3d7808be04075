//! Small dense linear algebra on fixed-size arrays.

/// Pivots below this magnitude are treated as singular.
const PIVOT_EPS: f64 = 1e-300;

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` for singular or non-finite systems.
pub fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if !(a[pivot][col].abs() > PIVOT_EPS) {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..N {
            let f = a[row][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for k in col..N {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Inverse of `a`, column by column.
pub fn invert<const N: usize>(a: [[f64; N]; N]) -> Option<[[f64; N]; N]> {
    let mut inv = [[0.0; N]; N];
    for col in 0..N {
        let mut e = [0.0; N];
        e[col] = 1.0;
        let x = solve(a, e)?;
        for row in 0..N {
            inv[row][col] = x[row];
        }
    }
    Some(inv)
}
