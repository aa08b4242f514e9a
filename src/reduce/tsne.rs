//! t-SNE: t-distributed stochastic neighbor embedding (van der Maaten & Hinton, 2008).
//!
//! Embeds points into 2-D so that points close in the input space stay close. Global
//! distances are not preserved: the size of and gaps between groups in the output
//! carry little meaning.
//!
//! # Algorithm
//!
//! 1. For each point, binary-search a Gaussian bandwidth so that the conditional
//!    neighbor distribution has the requested perplexity (≈ effective neighbor count).
//! 2. Symmetrize: `p_ij = (p_j|i + p_i|j) / 2n`.
//! 3. Minimize `KL(P || Q)` by gradient descent, where `Q` uses a Student-t kernel
//!    `q_ij ∝ (1 + |y_i - y_j|²)⁻¹` in the embedding.
//!
//! The first 250 iterations multiply `P` by the early exaggeration factor and use
//! momentum 0.5; afterwards momentum rises to 0.8. Per-coordinate adaptive gains follow
//! Jacobs (1988).
//!
//! # Exact and Barnes-Hut gradients
//!
//! The exact gradient touches all pairs every iteration and keeps two `n x n` matrices,
//! which stops being practical beyond a few thousand images. The Barnes-Hut variant
//! keeps only the `3 * perplexity` nearest neighbors of each point in `P` and
//! approximates the repulsive forces with a quadtree over the embedding, for
//! O(n log n) work and O(n * perplexity) memory per iteration. `theta` trades accuracy
//! for speed; 0 visits every leaf. [`TsneMethod::Auto`] switches to Barnes-Hut above
//! 1000 samples.
//!
//! # Determinism
//!
//! The default PCA initialisation makes the embedding a pure function of the input.
//! Random initialisation is stochastic unless a seed is given.

use super::pca::Pca;
use crate::cluster::util::check_rows;
use crate::error::{Error, Result};
use rand::prelude::*;
use rayon::prelude::*;
use tracing::debug;

const EXPLORATION_ITERS: usize = 250;
const PERPLEXITY_STEPS: usize = 100;
const PERPLEXITY_TOL: f64 = 1e-5;
const MIN_GAIN: f64 = 0.01;
const MIN_GRAD_NORM: f64 = 1e-7;
/// Standard deviation of the initial embedding.
const INIT_SCALE: f64 = 1e-4;
/// Largest input [`TsneMethod::Auto`] embeds with the exact gradient.
const EXACT_MAX_SAMPLES: usize = 1000;
/// Quadtree depth at which coincident points share a leaf.
const MAX_TREE_DEPTH: usize = 32;

/// Starting layout for the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsneInit {
    /// First two principal components, rescaled. Deterministic.
    #[default]
    Pca,
    /// Small Gaussian noise.
    Random,
}

/// Gradient computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsneMethod {
    /// Exact up to 1000 samples, Barnes-Hut above.
    #[default]
    Auto,
    /// All pairs, every iteration.
    Exact,
    /// Sparse neighbor affinities and quadtree-approximated repulsion.
    BarnesHut,
}

/// t-SNE into two dimensions.
#[derive(Debug, Clone)]
pub struct Tsne {
    perplexity: f64,
    early_exaggeration: f64,
    max_iter: usize,
    learning_rate: Option<f64>,
    init: TsneInit,
    seed: Option<u64>,
    method: TsneMethod,
    theta: f64,
}

impl Tsne {
    /// Create a t-SNE embedder with default parameters.
    ///
    /// Defaults: `perplexity = 30`, `early_exaggeration = 12`, `max_iter = 1000`,
    /// automatic learning rate, PCA initialisation, automatic method, `theta = 0.5`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target perplexity. Clamped to `(n - 1) / 3` for small inputs.
    pub fn with_perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    /// Set the early exaggeration factor.
    pub fn with_early_exaggeration(mut self, factor: f64) -> Self {
        self.early_exaggeration = factor;
        self
    }

    /// Set the number of gradient steps.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set a fixed learning rate instead of `max(n / early_exaggeration / 4, 50)`.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    /// Choose the initial layout.
    pub fn with_init(mut self, init: TsneInit) -> Self {
        self.init = init;
        self
    }

    /// Fix the RNG seed used by random initialisation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Choose how the gradient is computed.
    pub fn with_method(mut self, method: TsneMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the Barnes-Hut opening angle.
    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    fn uses_barnes_hut(&self, n: usize) -> bool {
        match self.method {
            TsneMethod::Auto => n > EXACT_MAX_SAMPLES,
            TsneMethod::Exact => false,
            TsneMethod::BarnesHut => true,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.perplexity.is_finite() || self.perplexity <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "perplexity",
                message: "must be a positive number",
            });
        }
        if !self.early_exaggeration.is_finite() || self.early_exaggeration < 1.0 {
            return Err(Error::InvalidParameter {
                name: "early_exaggeration",
                message: "must be at least 1",
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        if !self.theta.is_finite() || self.theta < 0.0 {
            return Err(Error::InvalidParameter {
                name: "theta",
                message: "must be a non-negative number",
            });
        }
        if let Some(lr) = self.learning_rate {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(Error::InvalidParameter {
                    name: "learning_rate",
                    message: "must be a positive number",
                });
            }
        }
        Ok(())
    }

    /// Embed `data` into 2-D, one `[x, y]` row per input row.
    pub fn fit_transform(&self, data: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        check_rows(data)?;
        self.validate()?;

        let n = data.len();
        if n == 1 {
            return Ok(vec![vec![0.0, 0.0]]);
        }

        let perplexity = self.perplexity.min((n - 1) as f64 / 3.0).max(1.0);
        let barnes_hut = self.uses_barnes_hut(n);
        let mut affinities = if barnes_hut {
            Affinities::Sparse(sparse_joint_probabilities(data, perplexity))
        } else {
            Affinities::Dense {
                p: joint_probabilities(&pairwise_sq_distances(data), n, perplexity),
                num: vec![0.0f64; n * n],
            }
        };
        let mut y = self.initial_layout(data)?;

        let learning_rate = self
            .learning_rate
            .unwrap_or_else(|| (n as f64 / self.early_exaggeration / 4.0).max(50.0));

        let mut update = vec![0.0f64; 2 * n];
        let mut gains = vec![1.0f64; 2 * n];
        let mut grad = vec![0.0f64; 2 * n];
        let mut iters = 0;

        for iter in 0..self.max_iter {
            iters = iter + 1;
            let exploring = iter < EXPLORATION_ITERS;
            let exaggeration = if exploring { self.early_exaggeration } else { 1.0 };
            let momentum = if exploring { 0.5 } else { 0.8 };

            match &mut affinities {
                Affinities::Dense { p, num } => gradient(p, &y, n, exaggeration, num, &mut grad),
                Affinities::Sparse(p) => {
                    barnes_hut_gradient(p, &y, exaggeration, self.theta, &mut grad)
                }
            }

            for i in 0..2 * n {
                if update[i] * grad[i] < 0.0 {
                    gains[i] += 0.2;
                } else {
                    gains[i] *= 0.8;
                }
                gains[i] = gains[i].max(MIN_GAIN);
                update[i] = momentum * update[i] - learning_rate * gains[i] * grad[i];
                y[i] += update[i];
            }

            if !exploring {
                let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                if norm < MIN_GRAD_NORM {
                    break;
                }
            }
        }

        debug!(
            samples = n,
            perplexity,
            learning_rate,
            barnes_hut,
            iterations = iters,
            "t-SNE embedding"
        );
        Ok(y.chunks_exact(2)
            .map(|c| vec![c[0] as f32, c[1] as f32])
            .collect())
    }

    fn initial_layout(&self, data: &[Vec<f32>]) -> Result<Vec<f64>> {
        let n = data.len();
        let mut y = vec![0.0f64; 2 * n];
        match self.init {
            TsneInit::Pca => {
                let proj = Pca::new(2).fit_transform(data)?;
                for (i, row) in proj.iter().enumerate() {
                    for (c, &v) in row.iter().enumerate() {
                        y[2 * i + c] = f64::from(v);
                    }
                }
                let mean = (0..n).map(|i| y[2 * i]).sum::<f64>() / n as f64;
                let var = (0..n).map(|i| (y[2 * i] - mean).powi(2)).sum::<f64>() / n as f64;
                let std = var.sqrt();
                if std > 0.0 {
                    for v in &mut y {
                        *v *= INIT_SCALE / std;
                    }
                }
            }
            TsneInit::Random => {
                let mut rng: Box<dyn RngCore> = match self.seed {
                    Some(s) => Box::new(StdRng::seed_from_u64(s)),
                    None => Box::new(rand::rng()),
                };
                for v in &mut y {
                    *v = INIT_SCALE * standard_normal(&mut rng);
                }
            }
        }
        Ok(y)
    }
}

impl Default for Tsne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            early_exaggeration: 12.0,
            max_iter: 1000,
            learning_rate: None,
            init: TsneInit::default(),
            seed: None,
            method: TsneMethod::default(),
            theta: 0.5,
        }
    }
}

/// Input affinities with the buffers their gradient needs.
enum Affinities {
    /// Row-major `n x n` `P` plus the Student-t numerators.
    Dense { p: Vec<f64>, num: Vec<f64> },
    /// Per-row `(column, p_ij)` pairs sorted by column.
    Sparse(Vec<Vec<(usize, f64)>>),
}

fn sq_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

fn pairwise_sq_distances(data: &[Vec<f32>]) -> Vec<f64> {
    let n = data.len();
    let mut d = vec![0.0f64; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let v = sq_distance(&data[i], &data[j]);
            d[i * n + j] = v;
            d[j * n + i] = v;
        }
    }
    d
}

/// Gaussian conditional probabilities over `dist` (squared distances from one point to
/// the others) whose entropy matches `ln(perplexity)`, written into `out`.
fn calibrate(dist: &[f64], perplexity: f64, out: &mut [f64]) {
    let target = perplexity.ln();
    // Shift by the nearest distance; the normalised distribution is unchanged.
    let min_d = dist.iter().copied().fold(f64::INFINITY, f64::min);

    let mut beta = 1.0f64;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum = 0.0;
        for (o, &d) in out.iter_mut().zip(dist) {
            *o = (-(d - min_d) * beta).exp();
            sum += *o;
        }
        let mut weighted = 0.0;
        for (o, &d) in out.iter_mut().zip(dist) {
            *o /= sum;
            weighted += (d - min_d) * *o;
        }
        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - target;
        if diff.abs() <= PERPLEXITY_TOL {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
}

/// Symmetric joint probabilities `P` (row-major `n x n`, zero diagonal, sums to 1).
fn joint_probabilities(dist: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let mut cond = vec![0.0f64; n * n];
    let mut others = Vec::with_capacity(n - 1);
    let mut row = vec![0.0f64; n - 1];

    for i in 0..n {
        others.clear();
        others.extend((0..n).filter(|&j| j != i).map(|j| dist[i * n + j]));
        calibrate(&others, perplexity, &mut row);
        for (k, j) in (0..n).filter(|&j| j != i).enumerate() {
            cond[i * n + j] = row[k];
        }
    }

    let mut p = vec![0.0f64; n * n];
    let denom = 2.0 * n as f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                p[i * n + j] = (cond[i * n + j] + cond[j * n + i]) / denom;
            }
        }
    }
    p
}

/// Joint probabilities restricted to the `3 * perplexity` nearest neighbors of each
/// point, symmetrized. Rows are sorted by column and the whole matrix sums to 1.
fn sparse_joint_probabilities(data: &[Vec<f32>], perplexity: f64) -> Vec<Vec<(usize, f64)>> {
    let n = data.len();
    let k = ((3.0 * perplexity) as usize + 1).min(n - 1);

    let cond: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut nearest: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, sq_distance(&data[i], &data[j])))
                .collect();
            if k < nearest.len() {
                nearest.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
                nearest.truncate(k);
            }
            let dist: Vec<f64> = nearest.iter().map(|&(_, d)| d).collect();
            let mut row = vec![0.0f64; dist.len()];
            calibrate(&dist, perplexity, &mut row);
            nearest.iter().map(|&(j, _)| j).zip(row).collect()
        })
        .collect();

    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (i, row) in cond.iter().enumerate() {
        for &(j, p) in row {
            rows[i].push((j, p));
            rows[j].push((i, p));
        }
    }
    let denom = 2.0 * n as f64;
    for row in &mut rows {
        row.sort_unstable_by_key(|&(j, _)| j);
        row.dedup_by(|next, kept| {
            if next.0 == kept.0 {
                kept.1 += next.1;
                true
            } else {
                false
            }
        });
        for entry in row.iter_mut() {
            entry.1 /= denom;
        }
    }
    rows
}

/// KL gradient for the Student-t kernel, written into `grad` (`2n` values).
fn gradient(p: &[f64], y: &[f64], n: usize, exaggeration: f64, num: &mut [f64], grad: &mut [f64]) {
    let mut z = 0.0;
    for i in 0..n {
        num[i * n + i] = 0.0;
        for j in (i + 1)..n {
            let dx = y[2 * i] - y[2 * j];
            let dy = y[2 * i + 1] - y[2 * j + 1];
            let q = 1.0 / (1.0 + dx * dx + dy * dy);
            num[i * n + j] = q;
            num[j * n + i] = q;
            z += 2.0 * q;
        }
    }
    let z = z.max(f64::MIN_POSITIVE);

    for i in 0..n {
        let (mut gx, mut gy) = (0.0, 0.0);
        for j in 0..n {
            if i == j {
                continue;
            }
            let q = num[i * n + j];
            let w = (exaggeration * p[i * n + j] - q / z) * q;
            gx += w * (y[2 * i] - y[2 * j]);
            gy += w * (y[2 * i + 1] - y[2 * j + 1]);
        }
        grad[2 * i] = 4.0 * gx;
        grad[2 * i + 1] = 4.0 * gy;
    }
}

/// Barnes-Hut KL gradient: exact attraction over the sparse `P`, quadtree repulsion.
fn barnes_hut_gradient(
    p: &[Vec<(usize, f64)>],
    y: &[f64],
    exaggeration: f64,
    theta: f64,
    grad: &mut [f64],
) {
    let n = p.len();
    let tree = QuadTree::build(y);
    let theta_sq = theta * theta;
    let repulsion: Vec<([f64; 2], f64)> = (0..n)
        .into_par_iter()
        .map(|i| tree.repulsion(i, y, theta_sq))
        .collect();
    let z = repulsion
        .iter()
        .map(|&(_, z)| z)
        .sum::<f64>()
        .max(f64::MIN_POSITIVE);

    for (i, row) in p.iter().enumerate() {
        let (mut ax, mut ay) = (0.0, 0.0);
        for &(j, pij) in row {
            let dx = y[2 * i] - y[2 * j];
            let dy = y[2 * i + 1] - y[2 * j + 1];
            let q = 1.0 / (1.0 + dx * dx + dy * dy);
            ax += pij * q * dx;
            ay += pij * q * dy;
        }
        let [rx, ry] = repulsion[i].0;
        grad[2 * i] = 4.0 * (exaggeration * ax - rx / z);
        grad[2 * i + 1] = 4.0 * (exaggeration * ay - ry / z);
    }
}

/// One square of the quadtree.
#[derive(Debug, Clone)]
struct Cell {
    center: [f64; 2],
    half: f64,
    /// Sum of the positions below this cell.
    mass: [f64; 2],
    count: usize,
    /// Index of the first of four consecutive children.
    children: Option<usize>,
    /// Points held by a leaf; more than one only at the depth limit.
    points: Vec<usize>,
}

impl Cell {
    fn new(center: [f64; 2], half: f64) -> Self {
        Self {
            center,
            half,
            mass: [0.0, 0.0],
            count: 0,
            children: None,
            points: Vec::new(),
        }
    }

    fn quadrant(&self, p: [f64; 2]) -> usize {
        usize::from(p[0] >= self.center[0]) | (usize::from(p[1] >= self.center[1]) << 1)
    }

    fn add(&mut self, p: [f64; 2]) {
        self.count += 1;
        self.mass[0] += p[0];
        self.mass[1] += p[1];
    }
}

/// Arena quadtree over 2-D points stored as `[x0, y0, x1, y1, ...]`.
#[derive(Debug)]
struct QuadTree {
    cells: Vec<Cell>,
}

impl QuadTree {
    fn build(y: &[f64]) -> Self {
        let (mut lo, mut hi) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
        for p in y.chunks_exact(2) {
            for c in 0..2 {
                lo[c] = lo[c].min(p[c]);
                hi[c] = hi[c].max(p[c]);
            }
        }
        let center = [(lo[0] + hi[0]) / 2.0, (lo[1] + hi[1]) / 2.0];
        let half = ((hi[0] - lo[0]).max(hi[1] - lo[1]) / 2.0).max(f64::MIN_POSITIVE);

        let mut tree = Self {
            cells: vec![Cell::new(center, half)],
        };
        for i in 0..y.len() / 2 {
            tree.insert(i, y);
        }
        tree
    }

    fn point(y: &[f64], i: usize) -> [f64; 2] {
        [y[2 * i], y[2 * i + 1]]
    }

    fn insert(&mut self, i: usize, y: &[f64]) {
        let p = Self::point(y, i);
        let mut node = 0;
        let mut depth = 0;
        loop {
            self.cells[node].add(p);
            if let Some(first) = self.cells[node].children {
                node = first + self.cells[node].quadrant(p);
                depth += 1;
                continue;
            }
            if self.cells[node].points.is_empty() || depth >= MAX_TREE_DEPTH {
                self.cells[node].points.push(i);
                return;
            }
            // Occupied leaf: split and push the resident point one level down.
            let first = self.subdivide(node);
            for resident in std::mem::take(&mut self.cells[node].points) {
                let r = Self::point(y, resident);
                let child = first + self.cells[node].quadrant(r);
                self.cells[child].add(r);
                self.cells[child].points.push(resident);
            }
            node = first + self.cells[node].quadrant(p);
            depth += 1;
        }
    }

    fn subdivide(&mut self, node: usize) -> usize {
        let first = self.cells.len();
        let Cell { center, half, .. } = self.cells[node];
        let quarter = half / 2.0;
        for q in 0..4 {
            let dx = if q & 1 == 1 { quarter } else { -quarter };
            let dy = if q & 2 == 2 { quarter } else { -quarter };
            self.cells
                .push(Cell::new([center[0] + dx, center[1] + dy], quarter));
        }
        self.cells[node].children = Some(first);
        first
    }

    /// Unnormalised repulsive force on point `i` and its share of the normaliser `Z`.
    fn repulsion(&self, i: usize, y: &[f64], theta_sq: f64) -> ([f64; 2], f64) {
        let p = Self::point(y, i);
        let mut force = [0.0f64; 2];
        let mut z = 0.0f64;
        let mut pull = |dx: f64, dy: f64, weight: f64| {
            let q = 1.0 / (1.0 + dx * dx + dy * dy);
            let wq = weight * q;
            z += wq;
            force[0] += wq * q * dx;
            force[1] += wq * q * dy;
        };

        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            let cell = &self.cells[node];
            if cell.count == 0 {
                continue;
            }
            match cell.children {
                None => {
                    for &j in cell.points.iter().filter(|&&j| j != i) {
                        let other = Self::point(y, j);
                        pull(p[0] - other[0], p[1] - other[1], 1.0);
                    }
                }
                Some(first) => {
                    let count = cell.count as f64;
                    let dx = p[0] - cell.mass[0] / count;
                    let dy = p[1] - cell.mass[1] / count;
                    let d2 = dx * dx + dy * dy;
                    let width = 2.0 * cell.half;
                    if d2 > 0.0 && width * width < theta_sq * d2 {
                        pull(dx, dy, count);
                    } else {
                        stack.extend(first..first + 4);
                    }
                }
            }
        }
        (force, z)
    }
}

fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    // Box–Muller; 1 - u keeps the logarithm finite.
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
