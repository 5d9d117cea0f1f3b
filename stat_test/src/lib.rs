// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// P-values for a binary column against a case/control label over the
// training samples.  Two modes: Pearson's chi-squared on the 2x2 table, or,
// when PCA covariates are present, a logistic-GLM likelihood-ratio test of
// case ~ 1 + column + PCA... against the column-free null.  Entries of -1
// (uncalled) are excluded pairwise.  A failed fit returns NaN, which fails
// any < threshold comparison, so the column is dropped.

use statrs::distribution::{ChiSquared, ContinuousCDF};
use tile_types::SampleInfo;

const MAX_ITER: usize = 25;
const TOL: f64 = 1e-8;

// One training sample: matrix row index, label, z-scored covariates.

struct TrainingRow {
    row: usize,
    case: bool,
    pca: Vec<f64>,
}

enum Mode {
    ChiSquare,
    // Carries the null-model log-likelihood over the full training set,
    // fitted once.
    Logistic { null_loglik: f64 },
}

pub struct StatTest {
    mode: Mode,
    rows: Vec<TrainingRow>,
}

impl StatTest {
    /// Choose the mode from the sample metadata: logistic when PCA
    /// components are present, chi-squared otherwise.  Only training
    /// samples with a case/control label participate.
    pub fn new(samples: &[SampleInfo]) -> StatTest {
        let npca = samples.iter().map(|s| s.pca.len()).max().unwrap_or(0);
        let mut rows = Vec::<TrainingRow>::new();
        for (i, s) in samples.iter().enumerate() {
            if !s.is_training {
                continue;
            }
            let case = match s.is_case {
                Some(c) => c,
                None => continue,
            };
            let mut pca = s.pca.clone();
            pca.resize(npca, 0.0);
            rows.push(TrainingRow { row: i, case, pca });
        }
        if npca == 0 {
            return StatTest {
                mode: Mode::ChiSquare,
                rows,
            };
        }

        // Z-score the covariates over the training set.
        for j in 0..npca {
            let n = rows.len() as f64;
            let mean = rows.iter().map(|r| r.pca[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r.pca[j] - mean).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            for r in rows.iter_mut() {
                r.pca[j] = if sd > 0.0 { (r.pca[j] - mean) / sd } else { 0.0 };
            }
        }

        let null_loglik = fit_loglik(&rows, None).unwrap_or(f64::NAN);
        StatTest {
            mode: Mode::Logistic { null_loglik },
            rows,
        }
    }

    pub fn is_logistic(&self) -> bool {
        matches!(self.mode, Mode::Logistic { .. })
    }

    /// P-value for one column (entries 1/0/-1, indexed by matrix row).
    pub fn pvalue(&self, col: &[i8]) -> f64 {
        match self.mode {
            Mode::ChiSquare => chi2_pvalue(&self.rows, col),
            Mode::Logistic { null_loglik } => logistic_pvalue(&self.rows, null_loglik, col),
        }
    }
}

fn chi2_survival(x: f64) -> f64 {
    if !x.is_finite() {
        return f64::NAN;
    }
    let dist = ChiSquared::new(1.0).unwrap();
    1.0 - dist.cdf(x)
}

fn chi2_pvalue(rows: &[TrainingRow], col: &[i8]) -> f64 {
    let (mut a, mut b, mut c, mut d) = (0f64, 0f64, 0f64, 0f64);
    for r in rows {
        match (col[r.row], r.case) {
            (-1, _) => {}
            (v, true) if v > 0 => a += 1.0,
            (v, false) if v > 0 => b += 1.0,
            (_, true) => c += 1.0,
            (_, false) => d += 1.0,
        }
    }
    let n = a + b + c + d;
    let (r1, r2, c1, c2) = (a + b, c + d, a + c, b + d);
    if r1 == 0.0 || r2 == 0.0 || c1 == 0.0 || c2 == 0.0 {
        // Degenerate margin: no information in this column.
        return 1.0;
    }
    let chi2 = n * (a * d - b * c).powi(2) / (r1 * r2 * c1 * c2);
    chi2_survival(chi2)
}

fn logistic_pvalue(rows: &[TrainingRow], null_loglik: f64, col: &[i8]) -> f64 {
    let complete = rows.iter().all(|r| col[r.row] >= 0);
    let null = if complete {
        null_loglik
    } else {
        // Refit the null over the called subset so the likelihoods are
        // comparable.
        match fit_loglik(rows, Some(col)) {
            Some(ll) => ll,
            None => return f64::NAN,
        }
    };
    let alt = match fit_loglik_with_col(rows, col) {
        Some(ll) => ll,
        None => return f64::NAN,
    };
    let lr = -2.0 * (null - alt);
    if lr < -1e-6 {
        // The alternative fit fell short of the null optimum.
        return f64::NAN;
    }
    chi2_survival(lr.max(0.0))
}

// Null model: case ~ 1 + PCA...; restrict may drop rows where a column is
// uncalled.

fn fit_loglik(rows: &[TrainingRow], restrict: Option<&[i8]>) -> Option<f64> {
    let mut x = Vec::<Vec<f64>>::new();
    let mut y = Vec::<bool>::new();
    for r in rows {
        if let Some(col) = restrict {
            if col[r.row] < 0 {
                continue;
            }
        }
        let mut row = Vec::with_capacity(1 + r.pca.len());
        row.push(1.0);
        row.extend_from_slice(&r.pca);
        x.push(row);
        y.push(r.case);
    }
    irls(&x, &y).map(|(_, ll)| ll)
}

// Alternative model: case ~ 1 + column + PCA...

fn fit_loglik_with_col(rows: &[TrainingRow], col: &[i8]) -> Option<f64> {
    let mut x = Vec::<Vec<f64>>::new();
    let mut y = Vec::<bool>::new();
    for r in rows {
        let v = col[r.row];
        if v < 0 {
            continue;
        }
        let mut row = Vec::with_capacity(2 + r.pca.len());
        row.push(1.0);
        row.push(v as f64);
        row.extend_from_slice(&r.pca);
        x.push(row);
        y.push(r.case);
    }
    irls(&x, &y).map(|(_, ll)| ll)
}

// Iteratively reweighted least squares for a logistic fit.  Returns the
// coefficient vector and the maximised log-likelihood, or None on a
// singular system or non-convergence.

fn irls(x: &[Vec<f64>], y: &[bool]) -> Option<(Vec<f64>, f64)> {
    let n = x.len();
    if n == 0 {
        return None;
    }
    let k = x[0].len();
    if n <= k {
        return None;
    }
    let mut beta = vec![0.0f64; k];
    for _ in 0..MAX_ITER {
        // Gradient and Hessian of the log-likelihood.
        let mut grad = vec![0.0f64; k];
        let mut hess = vec![vec![0.0f64; k]; k];
        for i in 0..n {
            let eta: f64 = (0..k).map(|j| x[i][j] * beta[j]).sum();
            let mu = 1.0 / (1.0 + (-eta).exp());
            let w = mu * (1.0 - mu);
            let resid = (y[i] as i32 as f64) - mu;
            for j in 0..k {
                grad[j] += x[i][j] * resid;
                for l in j..k {
                    hess[j][l] += w * x[i][j] * x[i][l];
                }
            }
        }
        for j in 0..k {
            for l in 0..j {
                hess[j][l] = hess[l][j];
            }
        }
        let delta = solve(hess, grad)?;
        let mut max_step = 0.0f64;
        for j in 0..k {
            beta[j] += delta[j];
            max_step = max_step.max(delta[j].abs());
        }
        if max_step < TOL {
            return Some((beta.clone(), loglik(x, y, &beta)));
        }
        if !max_step.is_finite() {
            return None;
        }
    }
    // Quasi-separated data can walk the intercept off to infinity without
    // converging; call that a failed fit.
    None
}

fn loglik(x: &[Vec<f64>], y: &[bool], beta: &[f64]) -> f64 {
    let k = beta.len();
    let mut ll = 0.0f64;
    for i in 0..x.len() {
        let eta: f64 = (0..k).map(|j| x[i][j] * beta[j]).sum();
        // log(sigmoid) forms, stable for large |eta|.
        let log_mu = -ln_1p_exp(-eta);
        let log_1m = -ln_1p_exp(eta);
        ll += if y[i] { log_mu } else { log_1m };
    }
    ll
}

fn ln_1p_exp(z: f64) -> f64 {
    if z > 35.0 {
        z
    } else {
        z.exp().ln_1p()
    }
}

// Gaussian elimination with partial pivoting.  None if the pivot collapses
// (singular normal equations).

fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let k = b.len();
    for col in 0..k {
        let mut piv = col;
        for r in col + 1..k {
            if a[r][col].abs() > a[piv][col].abs() {
                piv = r;
            }
        }
        if a[piv][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, piv);
        b.swap(col, piv);
        for r in col + 1..k {
            let f = a[r][col] / a[col][col];
            for c in col..k {
                a[r][c] -= f * a[col][c];
            }
            b[r] -= f * b[col];
        }
    }
    let mut x = vec![0.0f64; k];
    for col in (0..k).rev() {
        let mut s = b[col];
        for c in col + 1..k {
            s -= a[col][c] * x[c];
        }
        x[col] = s / a[col][col];
    }
    Some(x)
}
