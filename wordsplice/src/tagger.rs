use std::sync::atomic::{AtomicBool, Ordering};

use bincode::{Decode, Encode};
use rand::rngs::SmallRng;
use rand::Rng;

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use crate::corpus::Corpus;
use crate::errors::{Result, WordspliceError};
use crate::model::Segmenter;
use crate::run::Run;
use crate::utils::{self, cut_run};

/// Inputs are one-hot vectors over byte values.
pub const ALPHABET_SIZE: usize = 256;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Sequence tagger training parameters.
#[derive(Debug, Clone)]
pub struct TaggerConfig {
    /// Length of the training windows cut from each document.
    pub seq_len: usize,

    /// Hidden state size of each recurrent direction.
    pub state_size: usize,

    /// Width of the hidden layer of the output transform.
    pub hidden_size: usize,

    pub step_size: f64,
    pub batch_size: usize,

    /// Windows beyond this count are dropped after shuffling.
    pub max_samples: usize,

    pub epochs: usize,
    pub seed: Option<u64>,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            seq_len: 128,
            state_size: 128,
            hidden_size: 128,
            step_size: 0.001,
            batch_size: 20,
            max_samples: 1 << 13,
            epochs: 10,
            seed: None,
        }
    }
}

impl TaggerConfig {
    pub fn validate(&self) -> Result<()> {
        for (arg, value) in [
            ("seq_len", self.seq_len),
            ("state_size", self.state_size),
            ("hidden_size", self.hidden_size),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(WordspliceError::invalid_argument(arg, "must be at least 1"));
            }
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(WordspliceError::invalid_argument(
                "step_size",
                "must be a positive number",
            ));
        }
        Ok(())
    }
}

#[inline(always)]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `out += m * v`, where `m` is row-major with `v.len()` columns.
fn mat_vec_add(out: &mut [f64], m: &[f64], v: &[f64]) {
    for (o, row) in out.iter_mut().zip(m.chunks_exact(v.len())) {
        *o += row.iter().zip(v).map(|(a, b)| a * b).sum::<f64>();
    }
}

/// `out += m^T * v`, where `m` is row-major with `out.len()` columns.
fn mat_t_vec_add(out: &mut [f64], m: &[f64], v: &[f64]) {
    for (&vi, row) in v.iter().zip(m.chunks_exact(out.len())) {
        for (o, a) in out.iter_mut().zip(row) {
            *o += a * vi;
        }
    }
}

/// `m += a * b^T`.
fn outer_add(m: &mut [f64], a: &[f64], b: &[f64]) {
    for (&ai, row) in a.iter().zip(m.chunks_exact_mut(b.len())) {
        for (x, bj) in row.iter_mut().zip(b) {
            *x += ai * bj;
        }
    }
}

fn add_assign(out: &mut [f64], v: &[f64]) {
    for (o, x) in out.iter_mut().zip(v) {
        *o += x;
    }
}

fn random_vec(len: usize, scale: f64, rng: &mut SmallRng) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-scale..scale)).collect()
}

/// Gated recurrent unit over one-hot byte inputs.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Gru {
    state_size: usize,

    // One row of `state_size` weights per byte value.
    w_z: Vec<f64>,
    w_r: Vec<f64>,
    w_n: Vec<f64>,

    u_z: Vec<f64>,
    u_r: Vec<f64>,
    u_n: Vec<f64>,

    b_z: Vec<f64>,
    b_r: Vec<f64>,
    b_n: Vec<f64>,
}

/// Result of one recurrent step. The gate activations are kept for backpropagation.
#[derive(Debug, Clone, PartialEq)]
pub struct GruStep {
    pub state: Vec<f64>,
    z: Vec<f64>,
    r: Vec<f64>,
    n: Vec<f64>,
}

impl Gru {
    fn zeros(state_size: usize) -> Self {
        let w = vec![0.0; ALPHABET_SIZE * state_size];
        let u = vec![0.0; state_size * state_size];
        let b = vec![0.0; state_size];
        Self {
            state_size,
            w_z: w.clone(),
            w_r: w.clone(),
            w_n: w,
            u_z: u.clone(),
            u_r: u.clone(),
            u_n: u,
            b_z: b.clone(),
            b_r: b.clone(),
            b_n: b,
        }
    }

    fn random(state_size: usize, rng: &mut SmallRng) -> Self {
        let scale = 1.0 / (state_size as f64).sqrt();
        let mut gru = Self::zeros(state_size);
        for param in [
            &mut gru.w_z,
            &mut gru.w_r,
            &mut gru.w_n,
            &mut gru.u_z,
            &mut gru.u_r,
            &mut gru.u_n,
        ] {
            *param = random_vec(param.len(), scale, rng);
        }
        gru
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    fn params(&self) -> [&[f64]; 9] {
        [
            &self.w_z, &self.w_r, &self.w_n, &self.u_z, &self.u_r, &self.u_n, &self.b_z,
            &self.b_r, &self.b_n,
        ]
    }

    fn params_mut(&mut self) -> [&mut [f64]; 9] {
        [
            &mut self.w_z,
            &mut self.w_r,
            &mut self.w_n,
            &mut self.u_z,
            &mut self.u_r,
            &mut self.u_n,
            &mut self.b_z,
            &mut self.b_r,
            &mut self.b_n,
        ]
    }

    fn row(&self, input: u8) -> std::ops::Range<usize> {
        let start = usize::from(input) * self.state_size;
        start..start + self.state_size
    }

    /// Advances the state by one input byte.
    ///
    /// # Panics
    ///
    /// Panics if `state.len()` differs from [`Gru::state_size()`].
    pub fn step(&self, state: &[f64], input: u8) -> GruStep {
        assert_eq!(self.state_size, state.len(), "state size mismatch");
        let row = self.row(input);

        let mut z = self.b_z.clone();
        add_assign(&mut z, &self.w_z[row.clone()]);
        mat_vec_add(&mut z, &self.u_z, state);
        z.iter_mut().for_each(|x| *x = sigmoid(*x));

        let mut r = self.b_r.clone();
        add_assign(&mut r, &self.w_r[row.clone()]);
        mat_vec_add(&mut r, &self.u_r, state);
        r.iter_mut().for_each(|x| *x = sigmoid(*x));

        let rh: Vec<f64> = r.iter().zip(state).map(|(a, b)| a * b).collect();
        let mut n = self.b_n.clone();
        add_assign(&mut n, &self.w_n[row]);
        mat_vec_add(&mut n, &self.u_n, &rh);
        n.iter_mut().for_each(|x| *x = x.tanh());

        let new_state = z
            .iter()
            .zip(&n)
            .zip(state)
            .map(|((z, n), h)| (1.0 - z) * n + z * h)
            .collect();
        GruStep {
            state: new_state,
            z,
            r,
            n,
        }
    }

    /// Threads the state through `inputs` starting from the zero state.
    pub fn run<I>(&self, inputs: I) -> Vec<GruStep>
    where
        I: IntoIterator<Item = u8>,
    {
        let mut steps: Vec<GruStep> = vec![];
        let zeros = vec![0.0; self.state_size];
        for input in inputs {
            let state = steps.last().map_or(&zeros, |s| &s.state);
            let step = self.step(state, input);
            steps.push(step);
        }
        steps
    }

    /// Backpropagates through time. `d_states[t]` is the loss gradient flowing into the state
    /// after step `t` from outside the recurrence.
    fn backprop(&self, inputs: &[u8], steps: &[GruStep], d_states: &[Vec<f64>], grad: &mut Self) {
        let size = self.state_size;
        let zeros = vec![0.0; size];
        let mut carry = vec![0.0; size];
        for t in (0..steps.len()).rev() {
            let step = &steps[t];
            let prev = if t == 0 { &zeros } else { &steps[t - 1].state };
            let row = self.row(inputs[t]);

            let dh: Vec<f64> = d_states[t].iter().zip(&carry).map(|(a, b)| a + b).collect();
            let mut d_prev: Vec<f64> = dh.iter().zip(&step.z).map(|(d, z)| d * z).collect();

            let d_an: Vec<f64> = (0..size)
                .map(|i| dh[i] * (1.0 - step.z[i]) * (1.0 - step.n[i] * step.n[i]))
                .collect();
            let d_az: Vec<f64> = (0..size)
                .map(|i| dh[i] * (prev[i] - step.n[i]) * step.z[i] * (1.0 - step.z[i]))
                .collect();

            let rh: Vec<f64> = step.r.iter().zip(prev).map(|(r, h)| r * h).collect();
            add_assign(&mut grad.w_n[row.clone()], &d_an);
            add_assign(&mut grad.b_n, &d_an);
            outer_add(&mut grad.u_n, &d_an, &rh);
            let mut d_rh = vec![0.0; size];
            mat_t_vec_add(&mut d_rh, &self.u_n, &d_an);

            let d_ar: Vec<f64> = (0..size)
                .map(|i| d_rh[i] * prev[i] * step.r[i] * (1.0 - step.r[i]))
                .collect();
            for i in 0..size {
                d_prev[i] += d_rh[i] * step.r[i];
            }

            add_assign(&mut grad.w_z[row.clone()], &d_az);
            add_assign(&mut grad.b_z, &d_az);
            outer_add(&mut grad.u_z, &d_az, prev);
            mat_t_vec_add(&mut d_prev, &self.u_z, &d_az);

            add_assign(&mut grad.w_r[row], &d_ar);
            add_assign(&mut grad.b_r, &d_ar);
            outer_add(&mut grad.u_r, &d_ar, prev);
            mat_t_vec_add(&mut d_prev, &self.u_r, &d_ar);

            carry = d_prev;
        }
    }

    fn validate(&self) -> Result<()> {
        let size = self.state_size;
        let overflow = || WordspliceError::invalid_model("recurrent unit shape overflow");
        let input_len = ALPHABET_SIZE.checked_mul(size).ok_or_else(overflow)?;
        let state_len = size.checked_mul(size).ok_or_else(overflow)?;
        let shapes = [
            input_len, input_len, input_len, state_len, state_len, state_len, size, size, size,
        ];
        if size == 0 || self.params().iter().zip(shapes).any(|(p, len)| p.len() != len) {
            return Err(WordspliceError::invalid_model("recurrent unit shape mismatch"));
        }
        Ok(())
    }
}

/// Fully connected layer.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Dense {
    fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            biases: vec![0.0; outputs],
        }
    }

    fn random(inputs: usize, outputs: usize, rng: &mut SmallRng) -> Self {
        let scale = 1.0 / (inputs as f64).sqrt();
        Self {
            weights: random_vec(inputs * outputs, scale, rng),
            ..Self::zeros(inputs, outputs)
        }
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        let mut y = self.biases.clone();
        mat_vec_add(&mut y, &self.weights, x);
        y
    }

    /// Accumulates parameter gradients and returns the gradient with respect to `x`.
    fn backward(&self, x: &[f64], d_y: &[f64], grad: &mut Self) -> Vec<f64> {
        add_assign(&mut grad.biases, d_y);
        outer_add(&mut grad.weights, d_y, x);
        let mut d_x = vec![0.0; self.inputs];
        mat_t_vec_add(&mut d_x, &self.weights, d_y);
        d_x
    }

    fn validate(&self) -> Result<()> {
        let n_weights = self
            .inputs
            .checked_mul(self.outputs)
            .ok_or_else(|| WordspliceError::invalid_model("dense layer shape overflow"))?;
        if self.inputs == 0
            || self.outputs == 0
            || self.weights.len() != n_weights
            || self.biases.len() != self.outputs
        {
            return Err(WordspliceError::invalid_model("dense layer shape mismatch"));
        }
        Ok(())
    }
}

/// Intermediate values of a bidirectional pass.
struct Pass {
    forward: Vec<GruStep>,
    // In processing order, i.e. `backward[k]` belongs to position `len - 1 - k`.
    backward: Vec<GruStep>,
    concat: Vec<Vec<f64>>,
    hidden: Vec<Vec<f64>>,
    scores: Vec<f64>,
}

/// Bidirectional recurrent tagger emitting one boundary score per byte.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Tagger {
    forward: Gru,
    backward: Gru,
    hidden: Dense,
    output: Dense,
}

impl Tagger {
    /// Creates a randomly initialized network.
    pub fn new(state_size: usize, hidden_size: usize, rng: &mut SmallRng) -> Self {
        Self {
            forward: Gru::random(state_size, rng),
            backward: Gru::random(state_size, rng),
            hidden: Dense::random(state_size * 2, hidden_size, rng),
            output: Dense::random(hidden_size, 1, rng),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            forward: Gru::zeros(self.forward.state_size),
            backward: Gru::zeros(self.backward.state_size),
            hidden: Dense::zeros(self.hidden.inputs, self.hidden.outputs),
            output: Dense::zeros(self.output.inputs, self.output.outputs),
        }
    }

    fn params(&self) -> Vec<&[f64]> {
        let mut params = vec![];
        params.extend(self.forward.params());
        params.extend(self.backward.params());
        params.extend([
            &self.hidden.weights[..],
            &self.hidden.biases[..],
            &self.output.weights[..],
            &self.output.biases[..],
        ]);
        params
    }

    fn params_mut(&mut self) -> Vec<&mut [f64]> {
        let mut params = vec![];
        params.extend(self.forward.params_mut());
        params.extend(self.backward.params_mut());
        params.extend([
            &mut self.hidden.weights[..],
            &mut self.hidden.biases[..],
            &mut self.output.weights[..],
            &mut self.output.biases[..],
        ]);
        params
    }

    fn add_assign(&mut self, other: &Self) {
        for (p, q) in self.params_mut().into_iter().zip(other.params()) {
            add_assign(p, q);
        }
    }

    fn pass(&self, seq: &[u8]) -> Pass {
        let forward = self.forward.run(seq.iter().copied());
        let backward = self.backward.run(seq.iter().rev().copied());
        let len = seq.len();
        let mut concat = Vec::with_capacity(len);
        let mut hidden = Vec::with_capacity(len);
        let mut scores = Vec::with_capacity(len);
        for t in 0..len {
            let mut c = forward[t].state.clone();
            c.extend_from_slice(&backward[len - 1 - t].state);
            let mut h = self.hidden.forward(&c);
            h.iter_mut().for_each(|x| *x = x.tanh());
            scores.push(self.output.forward(&h)[0]);
            concat.push(c);
            hidden.push(h);
        }
        Pass {
            forward,
            backward,
            concat,
            hidden,
            scores,
        }
    }

    /// Computes one score per byte of `seq`. Positive scores mark word ends.
    pub fn scores(&self, seq: &[u8]) -> Vec<f64> {
        self.pass(seq).scores
    }

    /// Sigmoid cross-entropy between the scores of `seq` and the boundary labels.
    pub fn loss(&self, seq: &[u8], labels: &[bool]) -> f64 {
        self.scores(seq)
            .iter()
            .zip(labels)
            .map(|(&s, &y)| cross_entropy(s, y))
            .sum()
    }

    /// Accumulates the loss gradient of one sequence into `grad` and returns the loss.
    fn gradient(&self, seq: &[u8], labels: &[bool], grad: &mut Self) -> f64 {
        let pass = self.pass(seq);
        let len = seq.len();
        let size = self.forward.state_size;
        let mut d_forward = vec![vec![0.0; size]; len];
        let mut d_backward = vec![vec![0.0; size]; len];
        let mut loss = 0.0;
        for t in 0..len {
            let s = pass.scores[t];
            let y = labels[t];
            loss += cross_entropy(s, y);
            let d_s = sigmoid(s) - if y { 1.0 } else { 0.0 };
            let d_h = self.output.backward(&pass.hidden[t], &[d_s], &mut grad.output);
            let d_a: Vec<f64> = d_h
                .iter()
                .zip(&pass.hidden[t])
                .map(|(d, h)| d * (1.0 - h * h))
                .collect();
            let d_c = self.hidden.backward(&pass.concat[t], &d_a, &mut grad.hidden);
            add_assign(&mut d_forward[t], &d_c[..size]);
            add_assign(&mut d_backward[len - 1 - t], &d_c[size..]);
        }
        self.forward
            .backprop(seq, &pass.forward, &d_forward, &mut grad.forward);
        let reversed: Vec<u8> = seq.iter().rev().copied().collect();
        self.backward
            .backprop(&reversed, &pass.backward, &d_backward, &mut grad.backward);
        loss
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        utils::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let model: Self = utils::decode(data)?;
        model.forward.validate()?;
        model.backward.validate()?;
        model.hidden.validate()?;
        model.output.validate()?;
        if model.forward.state_size != model.backward.state_size
            || Some(model.hidden.inputs) != model.forward.state_size.checked_mul(2)
            || model.output.inputs != model.hidden.outputs
            || model.output.outputs != 1
        {
            return Err(WordspliceError::invalid_model("layer sizes do not match"));
        }
        if model.params().iter().any(|p| p.iter().any(|x| !x.is_finite())) {
            return Err(WordspliceError::invalid_model("non-finite parameter"));
        }
        Ok(model)
    }

    /// Trains a tagger for `config.epochs` epochs, or until `stop` is raised.
    ///
    /// # Errors
    ///
    /// If invalid parameters are given, an error variant will be returned.
    pub fn train(corpus: &Corpus, config: &TaggerConfig, stop: &AtomicBool) -> Result<Self> {
        let runs = corpus.runs();
        let mut trainer = TaggerTrainer::new(&runs, config)?;
        log::info!("Training on {} samples", trainer.n_samples());
        for epoch in 0..config.epochs {
            match trainer.train_epoch(stop) {
                Some(cost) => log::info!("Epoch {epoch}: cost={cost}"),
                None => {
                    log::warn!("Training stopped during epoch {epoch}");
                    break;
                }
            }
        }
        Ok(trainer.into_model())
    }
}

/// Numerically stable `-(y ln sigmoid(s) + (1 - y) ln(1 - sigmoid(s)))`.
fn cross_entropy(s: f64, y: bool) -> f64 {
    let y = if y { 1.0 } else { 0.0 };
    s.max(0.0) - s * y + (-s.abs()).exp().ln_1p()
}

impl Segmenter for Tagger {
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]> {
        let scores = self.scores(run);
        cut_run(run, |i| scores[i] > 0.0)
    }
}

#[derive(Clone)]
struct Adam {
    step_size: f64,
    t: i32,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    fn new(model: &Tagger, step_size: f64) -> Self {
        let m: Vec<Vec<f64>> = model.params().iter().map(|p| vec![0.0; p.len()]).collect();
        Self {
            step_size,
            t: 0,
            v: m.clone(),
            m,
        }
    }

    fn update(&mut self, model: &mut Tagger, grad: &Tagger) {
        self.t += 1;
        let c1 = 1.0 - ADAM_BETA1.powi(self.t);
        let c2 = 1.0 - ADAM_BETA2.powi(self.t);
        let params = model.params_mut().into_iter().zip(grad.params());
        for ((p, g), (m, v)) in params.zip(self.m.iter_mut().zip(&mut self.v)) {
            for i in 0..p.len() {
                m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g[i];
                v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g[i] * g[i];
                p[i] -= self.step_size * (m[i] / c1) / ((v[i] / c2).sqrt() + ADAM_EPSILON);
            }
        }
    }
}

/// Mini-batch trainer for [`Tagger`].
pub struct TaggerTrainer {
    model: Tagger,
    adam: Adam,
    samples: Vec<(Vec<u8>, Vec<bool>)>,
    batch_size: usize,
    rng: SmallRng,
}

impl TaggerTrainer {
    /// Cuts every run into non-overlapping windows of `config.seq_len` bytes, shuffles them and
    /// keeps at most `config.max_samples`.
    ///
    /// # Errors
    ///
    /// If invalid parameters are given, an error variant will be returned.
    pub fn new(runs: &[Run], config: &TaggerConfig) -> Result<Self> {
        config.validate()?;
        let mut samples = vec![];
        for run in runs {
            let labels: Vec<bool> = (0..run.len()).map(|i| run.is_word_end(i)).collect();
            for (text, labels) in run
                .as_bytes()
                .chunks_exact(config.seq_len)
                .zip(labels.chunks_exact(config.seq_len))
            {
                samples.push((text.to_vec(), labels.to_vec()));
            }
        }
        let mut rng = utils::seeded_rng(config.seed);
        utils::shuffle(&mut samples, &mut rng);
        samples.truncate(config.max_samples);

        let model = Tagger::new(config.state_size, config.hidden_size, &mut rng);
        Ok(Self {
            adam: Adam::new(&model, config.step_size),
            model,
            samples,
            batch_size: config.batch_size,
            rng,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn model(&self) -> &Tagger {
        &self.model
    }

    pub fn into_model(self) -> Tagger {
        self.model
    }

    /// Total loss of the current model over all samples.
    pub fn cost(&self) -> f64 {
        self.samples
            .iter()
            .map(|(text, labels)| self.model.loss(text, labels))
            .sum()
    }

    fn batch_gradient(&self, model: &Tagger, batch: &[usize]) -> Tagger {
        #[cfg(feature = "multithreading")]
        let mut grad = batch
            .par_iter()
            .map(|&i| {
                let (text, labels) = &self.samples[i];
                let mut grad = model.zeros_like();
                model.gradient(text, labels, &mut grad);
                grad
            })
            .reduce(
                || model.zeros_like(),
                |mut a, b| {
                    a.add_assign(&b);
                    a
                },
            );
        #[cfg(not(feature = "multithreading"))]
        let mut grad = {
            let mut grad = model.zeros_like();
            for &i in batch {
                let (text, labels) = &self.samples[i];
                model.gradient(text, labels, &mut grad);
            }
            grad
        };

        let scale = 1.0 / batch.len() as f64;
        for p in grad.params_mut() {
            p.iter_mut().for_each(|x| *x *= scale);
        }
        grad
    }

    /// Runs one pass over the samples and returns the resulting cost.
    ///
    /// The update is made on a copy that replaces the current model only when the epoch
    /// completes. If `stop` is raised in between, `None` is returned and the model of the last
    /// completed epoch is kept.
    pub fn train_epoch(&mut self, stop: &AtomicBool) -> Option<f64> {
        let mut model = self.model.clone();
        let mut adam = self.adam.clone();
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        utils::shuffle(&mut order, &mut self.rng);
        for batch in order.chunks(self.batch_size) {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let grad = self.batch_gradient(&model, batch);
            adam.update(&mut model, &grad);
        }
        self.model = model;
        self.adam = adam;
        Some(self.cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;

    fn tiny() -> Tagger {
        let mut rng = SmallRng::seed_from_u64(11);
        Tagger::new(3, 2, &mut rng)
    }

    #[test]
    fn test_gru_step_zero_weights() {
        let gru = Gru::zeros(4);
        let step = gru.step(&[0.0; 4], b'a');
        assert_eq!(vec![0.0; 4], step.state);
        assert_eq!(vec![0.5; 4], step.z);
    }

    #[test]
    fn test_gru_step_keeps_state_when_update_gate_saturates() {
        let mut gru = Gru::zeros(2);
        gru.b_z = vec![50.0; 2];
        let step = gru.step(&[0.3, -0.7], b'x');
        assert!((step.state[0] - 0.3).abs() < 1e-9);
        assert!((step.state[1] + 0.7).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "state size mismatch")]
    fn test_gru_step_wrong_state_size() {
        Gru::zeros(4).step(&[0.0; 3], b'a');
    }

    #[test]
    #[should_panic(expected = "state size mismatch")]
    fn test_gru_step_empty_state() {
        Gru::zeros(4).step(&[], b'a');
    }

    #[test]
    fn test_gru_run_prefix_independence() {
        let tagger = tiny();
        let a = tagger.forward.run(b"abcdef".iter().copied());
        let b = tagger.forward.run(b"abcxyz".iter().copied());
        assert_eq!(6, a.len());
        assert_eq!(a[..3], b[..3]);
        assert_ne!(a[3], b[3]);
    }

    #[test]
    fn test_tagger_scores_length() {
        let tagger = tiny();
        assert_eq!(5, tagger.scores(b"hello").len());
        assert!(tagger.scores(b"").is_empty());
        assert!(tagger.fields(b"").is_empty());
    }

    #[test]
    fn test_tagger_backward_context() {
        // The first score sees the last byte only through the backward direction.
        let tagger = tiny();
        let a = tagger.scores(b"abcd");
        let b = tagger.scores(b"abcz");
        assert_ne!(a[0], b[0]);
    }

    #[test]
    fn test_tagger_gradient_check() {
        let tagger = tiny();
        let seq = b"abcab";
        let labels = [false, true, false, false, true];
        let mut grad = tagger.zeros_like();
        let loss = tagger.gradient(seq, &labels, &mut grad);
        assert!((loss - tagger.loss(seq, &labels)).abs() < 1e-12);

        let eps = 1e-6;
        let grads: Vec<Vec<f64>> = grad.params().iter().map(|p| p.to_vec()).collect();
        let row_a = usize::from(b'a') * 3;
        for (k, g) in grads.iter().enumerate() {
            let mut indices = vec![0, g.len() - 1];
            if g.len() == ALPHABET_SIZE * 3 {
                indices.extend([row_a, row_a + 2]);
            }
            for i in indices {
                let mut plus = tagger.clone();
                plus.params_mut()[k][i] += eps;
                let mut minus = tagger.clone();
                minus.params_mut()[k][i] -= eps;
                let numeric = (plus.loss(seq, &labels) - minus.loss(seq, &labels)) / (2.0 * eps);
                let analytic = g[i];
                assert!(
                    (numeric - analytic).abs() <= 1e-5 * (1.0 + numeric.abs() + analytic.abs()),
                    "param {k}[{i}]: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    fn corpus() -> Corpus {
        Corpus::from_documents([
            "the cat sat on the mat the dog sat on the log",
            "a cat and a dog ate the food on the mat",
            "the dog and the cat sat on a log",
        ])
    }

    fn config() -> TaggerConfig {
        TaggerConfig {
            seq_len: 8,
            state_size: 6,
            hidden_size: 6,
            step_size: 0.01,
            batch_size: 4,
            epochs: 20,
            seed: Some(5),
            ..TaggerConfig::default()
        }
    }

    #[test]
    fn test_tagger_trainer_samples() {
        let runs = corpus().runs();
        let expected: usize = runs.iter().map(|r| r.len() / 8).sum();
        let trainer = TaggerTrainer::new(&runs, &config()).unwrap();
        assert_eq!(expected, trainer.n_samples());

        let capped = TaggerConfig {
            max_samples: 3,
            ..config()
        };
        let trainer = TaggerTrainer::new(&runs, &capped).unwrap();
        assert_eq!(3, trainer.n_samples());
    }

    #[test]
    fn test_tagger_trainer_reduces_cost() {
        let runs = corpus().runs();
        let mut trainer = TaggerTrainer::new(&runs, &config()).unwrap();
        let initial = trainer.cost();
        let stop = AtomicBool::new(false);
        let mut last = initial;
        for _ in 0..20 {
            last = trainer.train_epoch(&stop).unwrap();
        }
        assert!(last < initial, "{last} >= {initial}");
    }

    #[test]
    fn test_tagger_trainer_stop_keeps_last_epoch() {
        let runs = corpus().runs();
        let mut trainer = TaggerTrainer::new(&runs, &config()).unwrap();
        trainer.train_epoch(&AtomicBool::new(false)).unwrap();
        let snapshot = trainer.model().clone();
        assert!(trainer.train_epoch(&AtomicBool::new(true)).is_none());
        assert_eq!(&snapshot, trainer.model());
    }

    #[test]
    fn test_tagger_invalid_config() {
        let cfg = TaggerConfig {
            batch_size: 0,
            ..config()
        };
        assert!(TaggerTrainer::new(&[], &cfg).is_err());
    }

    #[test]
    fn test_tagger_serialize() {
        let stop = AtomicBool::new(false);
        let cfg = TaggerConfig {
            epochs: 2,
            ..config()
        };
        let tagger = Tagger::train(&corpus(), &cfg, &stop).unwrap();
        let tagger2 = Tagger::from_bytes(&tagger.to_bytes().unwrap()).unwrap();
        assert_eq!(tagger, tagger2);
        for text in ["thecatsat", "adogatealog", "x"] {
            assert_eq!(
                tagger.fields(text.as_bytes()),
                tagger2.fields(text.as_bytes())
            );
        }
    }

    #[test]
    fn test_tagger_deserialize_shape_overflow() {
        let mut tagger = tiny();
        tagger.forward.state_size = usize::MAX / 2;
        assert!(Tagger::from_bytes(&tagger.to_bytes().unwrap()).is_err());

        let mut tagger = tiny();
        tagger.hidden.inputs = usize::MAX;
        assert!(Tagger::from_bytes(&tagger.to_bytes().unwrap()).is_err());
    }

    #[test]
    fn test_tagger_deserialize_shape_mismatch() {
        let mut tagger = tiny();
        tagger.output = Dense::zeros(2, 2);
        assert!(Tagger::from_bytes(&tagger.to_bytes().unwrap()).is_err());
    }
}
