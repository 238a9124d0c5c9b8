//! Синтетические данные для линейной регрессии

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clean_task::FEATURE_COLUMN;
use crate::error::Result;
use crate::types::{Column, Table};

pub const TARGET_COLUMN: &str = "y_target";

/// Box-Muller
fn gauss<R: Rng>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// `x = linspace(0, 10, n) + N(0, 0.5)`, `y = 2x + 1 + N(0, 2)`
pub fn generate_linear(n: usize, seed: u64) -> Result<Table> {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = if n > 1 { 10.0 / (n - 1) as f64 } else { 0.0 };

    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let xi = i as f64 * step + gauss(&mut rng, 0.0, 0.5);
        x.push(Some(xi));
        y.push(Some(2.0 * xi + 1.0 + gauss(&mut rng, 0.0, 2.0)));
    }

    Table::from_columns(vec![
        (FEATURE_COLUMN, Column::Numeric(x)),
        (TARGET_COLUMN, Column::Numeric(y)),
    ])
}
