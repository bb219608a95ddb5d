use crate::core::sensor::{SensorReadings, NO_SENSORS};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of policy inputs: the sensor readings, speed ratio, sin and cos of the heading.
pub const FEATURE_LEN: usize = NO_SENSORS + 3;
pub const ACTION_LEN: usize = 2;

/// Number of synthetic samples used to bootstrap a fresh policy.
pub const NO_BOOTSTRAP_SAMPLES: usize = 50;

pub type Features = [f64; FEATURE_LEN];

/// build_features assembles the policy input vector.
pub fn build_features(sensors: &SensorReadings, speed_ratio: f64, heading: f64) -> Features {
    let heading_rad = heading.to_radians();
    let mut features = [0.0; FEATURE_LEN];
    features[..NO_SENSORS].copy_from_slice(sensors);
    features[NO_SENSORS] = speed_ratio;
    features[NO_SENSORS + 1] = heading_rad.sin();
    features[NO_SENSORS + 2] = heading_rad.cos();
    features
}

/// * `throttle` - [0.0, 1.0]
/// * `steering` - [-1.0, 1.0], positive values increase the heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub throttle: f64,
    pub steering: f64,
}

impl Action {
    pub fn new(throttle: f64, steering: f64) -> Action {
        Action { throttle, steering }.clamped()
    }

    /// clamped limits throttle and steering to their valid ranges, NaN becomes 0.0.
    pub fn clamped(self) -> Action {
        let fix = |v: f64| if v.is_nan() { 0.0 } else { v };
        Action {
            throttle: fix(self.throttle).clamp(0.0, 1.0),
            steering: fix(self.steering).clamp(-1.0, 1.0),
        }
    }

    /// random returns a uniformly distributed action, used for exploration.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Action {
        Action {
            throttle: rng.gen_range(0.0..=1.0),
            steering: rng.gen_range(-1.0..=1.0),
        }
    }

    fn as_array(&self) -> [f64; ACTION_LEN] {
        [self.throttle, self.steering]
    }
}

/// A single training sample: the observed features and the action that was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub features: Features,
    pub action: Action,
}

/// Policy is the capability every learning backend has to provide. A car only talks to its
/// policy through this trait, so neural, linear or table based regressors can be swapped.
pub trait Policy: Send + fmt::Debug {
    /// bootstrap discards all learned parameters and trains on a small synthetic data set
    /// encoding "drive straight at moderate throttle when all sensors read clear".
    fn bootstrap(&mut self, rng: &mut dyn RngCore);

    /// predict maps the features to an action. The result is always clamped.
    fn predict(&self, features: &Features) -> Action;

    /// partial_fit performs one incremental update on the given samples.
    fn partial_fit(&mut self, samples: &[Sample]);
}

/// bootstrap_samples generates the synthetic prior: clear sensors, random speed ratio and
/// heading, nearly full throttle and close to zero steering.
pub fn bootstrap_samples(rng: &mut dyn RngCore, no_samples: usize) -> Vec<Sample> {
    (0..no_samples)
        .map(|_| {
            let speed_ratio = rng.gen::<f64>();
            let heading = rng.gen_range(0.0..360.0);
            Sample {
                features: build_features(&[1.0; NO_SENSORS], speed_ratio, heading),
                action: Action {
                    throttle: 0.8 + rng.gen::<f64>() * 0.2,
                    steering: (rng.gen::<f64>() - 0.5) * 0.2,
                },
            }
        })
        .collect()
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Mlp,
    Linear,
}

/// * `kind` - Learning backend
/// * `hidden_layers` - Sizes of the hidden layers (MLP only)
/// * `learning_rate` - SGD step size
/// * `bootstrap_epochs` - Passes over the synthetic data set during bootstrap
/// * `exploration_rate` - Probability of a random action instead of the prediction
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PolicyPars {
    pub kind: PolicyKind,
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub bootstrap_epochs: usize,
    pub exploration_rate: f64,
}

impl Default for PolicyPars {
    fn default() -> Self {
        PolicyPars {
            kind: PolicyKind::Mlp,
            hidden_layers: vec![8, 8],
            learning_rate: 0.01,
            bootstrap_epochs: 200,
            exploration_rate: 0.1,
        }
    }
}

/// create_policy builds an untrained policy of the configured kind. It has to be bootstrapped
/// before use.
pub fn create_policy(policy_pars: &PolicyPars) -> Box<dyn Policy> {
    match policy_pars.kind {
        PolicyKind::Mlp => Box::new(MlpPolicy::new(
            &policy_pars.hidden_layers,
            policy_pars.learning_rate,
            policy_pars.bootstrap_epochs,
        )),
        PolicyKind::Linear => Box::new(LinearPolicy::new(
            policy_pars.learning_rate,
            policy_pars.bootstrap_epochs,
        )),
    }
}

// -------------------------------------------------------------------------------------------------
// MLP ---------------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Activation {
    Tanh,
    Identity,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
        }
    }

    /// derivative in terms of the activation output
    fn derivative(self, out: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - out * out,
            Activation::Identity => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Vec<Vec<f64>>, // [output][input]
    biases: Vec<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn zeros(no_inputs: usize, no_outputs: usize, activation: Activation) -> DenseLayer {
        DenseLayer {
            weights: vec![vec![0.0; no_inputs]; no_outputs],
            biases: vec![0.0; no_outputs],
            activation,
        }
    }

    /// init draws the weights from N(0, 1 / fan_in) and zeroes the biases.
    fn init(&mut self, rng: &mut dyn RngCore) {
        for row in self.weights.iter_mut() {
            let std_dev = (1.0 / row.len().max(1) as f64).sqrt();
            for w in row.iter_mut() {
                let z: f64 = rng.sample(StandardNormal);
                *w = z * std_dev;
            }
        }
        self.biases.iter_mut().for_each(|b| *b = 0.0);
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(self.biases.iter())
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Fully connected network with tanh hidden layers and a linear output layer, trained by
/// per-sample stochastic gradient descent on the squared error.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    layers: Vec<DenseLayer>,
    learning_rate: f64,
    bootstrap_epochs: usize,
}

impl MlpPolicy {
    pub fn new(hidden_layers: &[usize], learning_rate: f64, bootstrap_epochs: usize) -> MlpPolicy {
        let mut sizes = Vec::with_capacity(hidden_layers.len() + 2);
        sizes.push(FEATURE_LEN);
        sizes.extend(hidden_layers.iter().copied().filter(|&n| n > 0));
        sizes.push(ACTION_LEN);

        let no_layers = sizes.len() - 1;
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let activation = if i + 1 == no_layers {
                    Activation::Identity
                } else {
                    Activation::Tanh
                };
                DenseLayer::zeros(w[0], w[1], activation)
            })
            .collect();

        MlpPolicy {
            layers,
            learning_rate,
            bootstrap_epochs,
        }
    }

    /// forward_all returns the input followed by the output of every layer.
    fn forward_all(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input.to_vec());
        for layer in self.layers.iter() {
            let out = layer.forward(&acts[acts.len() - 1]);
            acts.push(out);
        }
        acts
    }

    fn train_sample(&mut self, sample: &Sample) {
        let acts = self.forward_all(&sample.features);
        let target = sample.action.as_array();
        let lr = self.learning_rate;

        // dL/d(output) for L = 0.5 * sum (out - target)^2
        let mut delta: Vec<f64> = acts[acts.len() - 1]
            .iter()
            .zip(target.iter())
            .map(|(out, t)| out - t)
            .collect();

        for (l, layer) in self.layers.iter_mut().enumerate().rev() {
            let input = &acts[l];
            let output = &acts[l + 1];

            for (d, out) in delta.iter_mut().zip(output) {
                *d *= layer.activation.derivative(*out);
            }

            let prev_delta: Vec<f64> = (0..input.len())
                .map(|i| {
                    layer
                        .weights
                        .iter()
                        .zip(delta.iter())
                        .map(|(row, d)| row[i] * d)
                        .sum()
                })
                .collect();

            for (row, d) in layer.weights.iter_mut().zip(delta.iter()) {
                for (w, x) in row.iter_mut().zip(input) {
                    *w -= lr * d * x;
                }
            }
            for (b, d) in layer.biases.iter_mut().zip(delta.iter()) {
                *b -= lr * d;
            }

            delta = prev_delta;
        }
    }
}

impl Policy for MlpPolicy {
    fn bootstrap(&mut self, rng: &mut dyn RngCore) {
        for layer in self.layers.iter_mut() {
            layer.init(rng);
        }

        let samples = bootstrap_samples(rng, NO_BOOTSTRAP_SAMPLES);
        for _ in 0..self.bootstrap_epochs {
            self.partial_fit(&samples);
        }
    }

    fn predict(&self, features: &Features) -> Action {
        let acts = self.forward_all(features);
        let out = &acts[acts.len() - 1];
        Action {
            throttle: out[0],
            steering: out[1],
        }
        .clamped()
    }

    fn partial_fit(&mut self, samples: &[Sample]) {
        for sample in samples {
            self.train_sample(sample);
        }
    }
}

// -------------------------------------------------------------------------------------------------
// LINEAR ------------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// Affine map from features to actions, trained with the same SGD rule as the MLP.
#[derive(Debug, Clone)]
pub struct LinearPolicy {
    weights: [[f64; FEATURE_LEN]; ACTION_LEN],
    biases: [f64; ACTION_LEN],
    learning_rate: f64,
    bootstrap_epochs: usize,
}

impl LinearPolicy {
    pub fn new(learning_rate: f64, bootstrap_epochs: usize) -> LinearPolicy {
        LinearPolicy {
            weights: [[0.0; FEATURE_LEN]; ACTION_LEN],
            biases: [0.0; ACTION_LEN],
            learning_rate,
            bootstrap_epochs,
        }
    }

    fn raw_output(&self, features: &Features) -> [f64; ACTION_LEN] {
        let mut out = self.biases;
        for (o, row) in out.iter_mut().zip(self.weights.iter()) {
            *o += row.iter().zip(features.iter()).map(|(w, x)| w * x).sum::<f64>();
        }
        out
    }
}

impl Policy for LinearPolicy {
    fn bootstrap(&mut self, rng: &mut dyn RngCore) {
        for row in self.weights.iter_mut() {
            for w in row.iter_mut() {
                *w = rng.gen_range(-0.1..0.1);
            }
        }
        self.biases = [0.0; ACTION_LEN];

        let samples = bootstrap_samples(rng, NO_BOOTSTRAP_SAMPLES);
        for _ in 0..self.bootstrap_epochs {
            self.partial_fit(&samples);
        }
    }

    fn predict(&self, features: &Features) -> Action {
        let out = self.raw_output(features);
        Action {
            throttle: out[0],
            steering: out[1],
        }
        .clamped()
    }

    fn partial_fit(&mut self, samples: &[Sample]) {
        for sample in samples {
            let out = self.raw_output(&sample.features);
            let target = sample.action.as_array();
            for k in 0..ACTION_LEN {
                let err = out[k] - target[k];
                for (w, x) in self.weights[k].iter_mut().zip(sample.features.iter()) {
                    *w -= self.learning_rate * err * x;
                }
                self.biases[k] -= self.learning_rate * err;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
// EXPERIENCE BUFFER -------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// ExperienceBuffer keeps the most recent training samples and rewards of a car. Each queue is
/// trimmed to `keep` entries as soon as it grows beyond `cap`.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    samples: VecDeque<Sample>,
    rewards: VecDeque<f64>,
    cap: usize,
    keep: usize,
}

impl ExperienceBuffer {
    pub fn new(cap: usize, keep: usize) -> ExperienceBuffer {
        ExperienceBuffer {
            samples: VecDeque::with_capacity(cap + 1),
            rewards: VecDeque::with_capacity(cap + 1),
            cap,
            keep: keep.min(cap),
        }
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        if self.samples.len() > self.cap {
            let excess = self.samples.len() - self.keep;
            self.samples.drain(..excess);
        }
    }

    pub fn push_reward(&mut self, reward: f64) {
        self.rewards.push_back(reward);
        if self.rewards.len() > self.cap {
            let excess = self.rewards.len() - self.keep;
            self.rewards.drain(..excess);
        }
    }

    /// recent_samples returns up to `n` of the newest samples, oldest first.
    pub fn recent_samples(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn no_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn rewards(&self) -> &VecDeque<f64> {
        &self.rewards
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.rewards.clear();
    }
}
