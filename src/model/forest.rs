//! Isolation forest
//!
//! Trees are grown on random subsamples of the training set by splitting on a
//! random feature at a uniformly drawn threshold. Points that are isolated
//! after few splits are anomalous. Raw scores follow Liu et al.:
//! `s(x) = 2^(-E[h(x)] / c(ψ))`, in (0, 1] with 0.5 as "no distinct anomaly".

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::index;

/// Largest subsample a single tree is grown on
pub const MAX_SUBSAMPLE: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search among `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::grow_node(data, rows, 0, height_limit, rng),
        }
    }

    fn grow_node(
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= height_limit || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }

        let dims = data[rows[0]].len();

        // features that still vary among the rows of this node
        let candidates: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|feature| {
                let (min, max) = rows
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                        let v = data[r][feature];
                        (lo.min(v), hi.max(v))
                    });
                (max > min).then_some((feature, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);

        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow_node(data, left, depth + 1, height_limit, rng)),
            right: Box::new(Self::grow_node(data, right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;

        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// A fitted ensemble of isolation trees
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample: usize,
    dimensions: usize,
}

impl IsolationForest {
    /// Fit `n_trees` trees on `data`
    ///
    /// All rows must have the same, non-zero length and `data` must not be
    /// empty; callers check this before fitting.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, rng: &mut StdRng) -> Self {
        let subsample = data.len().min(MAX_SUBSAMPLE);
        let height_limit = (subsample.max(2) as f64).log2().ceil() as usize;
        let dimensions = data.first().map(Vec::len).unwrap_or_default();

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let rows = index::sample(rng, data.len(), subsample).into_vec();
                IsolationTree::grow(data, rows, height_limit, rng)
            })
            .collect();

        Self {
            trees,
            subsample,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Raw isolation score of a point, higher is more anomalous
    pub fn raw_score(&self, point: &[f64]) -> f64 {
        let normalizer = average_path_length(self.subsample);
        if normalizer <= 0.0 {
            return 0.5;
        }

        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;

        2f64.powf(-mean_path / normalizer)
    }
}
