//! Случайный лес регрессионных деревьев

#![allow(non_snake_case)]

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

/// Узел дерева; потомки хранятся индексами в плоском векторе
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
        }
    }
}

/// Дерево регрессии с разбиением по минимуму суммы квадратов отклонений
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Суммарное уменьшение SSE по признакам
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn sse(sum: f64, sum_sq: f64, n: f64) -> f64 {
    (sum_sq - sum * sum / n).max(0.0)
}

impl RegressionTree {
    pub fn fit(X: &Array2<f64>, y: &Array1<f64>, indices: &[usize], params: TreeParams) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            importances: vec![0.0; X.ncols()],
        };
        tree.build(X, y, indices.to_vec(), 0, params);
        tree
    }

    fn build(
        &mut self,
        X: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        depth: usize,
        params: TreeParams,
    ) -> usize {
        let id = self.nodes.len();
        let n = indices.len() as f64;
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let sum_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let mean = sum / n;
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = params.max_depth.is_some_and(|d| depth >= d);
        let node_sse = sse(sum, sum_sq, n);
        if depth_reached || indices.len() < params.min_samples_split || node_sse <= 1e-12 {
            return id;
        }

        let Some(best) = Self::best_split(X, y, &indices, node_sse) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| X[[i, best.feature]] <= best.threshold);

        self.importances[best.feature] += best.gain;
        let left = self.build(X, y, left_idx, depth + 1, params);
        let right = self.build(X, y, right_idx, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(
        X: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        node_sse: f64,
    ) -> Option<BestSplit> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let mut best: Option<BestSplit> = None;

        let mut order = indices.to_vec();
        for feature in 0..X.ncols() {
            order.sort_by(|&a, &b| X[[a, feature]].total_cmp(&X[[b, feature]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for p in 1..n {
                let prev = order[p - 1];
                left_sum += y[prev];
                left_sq += y[prev] * y[prev];

                let (lo, hi) = (X[[prev, feature]], X[[order[p], feature]]);
                if lo >= hi {
                    continue;
                }

                let left = sse(left_sum, left_sq, p as f64);
                let right = sse(total_sum - left_sum, total_sq - left_sq, (n - p) as f64);
                let gain = node_sse - left - right;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            seed: 42,
        }
    }
}

/// Бэггинг деревьев на бутстрэп-выборках
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(X: &Array2<f64>, y: &Array1<f64>, params: ForestParams) -> Result<Self> {
        let n = X.nrows();
        if n == 0 || X.ncols() == 0 {
            return Err(MlError::InsufficientData("empty dataset".to_string()));
        }
        if n != y.len() {
            return Err(MlError::Model(format!("{n} rows but {} targets", y.len())));
        }
        if params.n_estimators == 0 {
            return Err(MlError::Model("random forest needs at least one tree".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees: Vec<RegressionTree> = (0..params.n_estimators)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(X, y, &sample, params.tree)
            })
            .collect();

        tracing::debug!(
            trees = trees.len(),
            max_depth = trees.iter().map(RegressionTree::depth).max().unwrap_or(0),
            "random forest fitted"
        );

        Ok(Self {
            trees,
            n_features: X.ncols(),
        })
    }

    pub fn predict(&self, X: &Array2<f64>) -> Result<Array1<f64>> {
        if X.ncols() != self.n_features {
            return Err(MlError::SchemaMismatch(format!(
                "model expects {} features, got {}",
                self.n_features,
                X.ncols()
            )));
        }

        let n_trees = self.trees.len() as f64;
        Ok(X.rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }

    /// Важность признаков: нормированное уменьшение SSE, усреднённое по деревьям
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            let sum: f64 = tree.importances.iter().sum();
            if sum > 0.0 {
                for (t, v) in total.iter_mut().zip(&tree.importances) {
                    *t += v / sum;
                }
            }
        }
        let grand: f64 = total.iter().sum();
        if grand > 0.0 {
            total.iter_mut().for_each(|t| *t /= grand);
        }
        total
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
