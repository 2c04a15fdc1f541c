//! Weight store: every trainable parameter of a network, addressed by a typed key.
mod checkpoint;
#[cfg(test)]
mod test;

pub use self::checkpoint::{read_checkpoint, write_checkpoint};
use crate::network::StreamKind;
use crate::{Error, Result, Tensor};
use itertools::Itertools;
use ndarray::{ArrayView1, ArrayView2, ArrayView4, ArrayViewD, Ix1, Ix2, Ix4, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Which batch normalization of a residual block a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BnSlot {
    /// Normalization of the block input (absent in the first block of a run)
    Input,
    /// Normalization between the two convolutions
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BnParam {
    Gamma,
    Beta,
    MovingMean,
    MovingVariance,
}

/// The role a tensor plays within its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightRole {
    Weights,
    Bias,
    Conv1Weights,
    Conv1Bias,
    Conv2Weights,
    Conv2Bias,
    /// Per-input weights of a merge layer, numbered from 1
    InputWeights(u8),
    /// Dense weights reshaped into a convolution kernel
    FullyConvWeights,
    /// Image-input weights of a merge layer reshaped into a convolution kernel
    ImFullyConvWeights,
    BatchNorm(BnSlot, BnParam),
}

impl WeightRole {
    /// The suffix used after the layer name in the short key, eg. `conv1_weights`.
    pub fn suffix(&self) -> String {
        use self::WeightRole::*;
        match self {
            Weights => "weights".to_owned(),
            Bias => "bias".to_owned(),
            Conv1Weights => "conv1_weights".to_owned(),
            Conv1Bias => "conv1_bias".to_owned(),
            Conv2Weights => "conv2_weights".to_owned(),
            Conv2Bias => "conv2_bias".to_owned(),
            InputWeights(i) => format!("input_{}_weights", i),
            FullyConvWeights => "fully_conv_weights".to_owned(),
            ImFullyConvWeights => "im_fully_conv_weights".to_owned(),
            BatchNorm(slot, param) => {
                let slot = match slot {
                    BnSlot::Input => "input",
                    BnSlot::Hidden => "hidden",
                };
                let param = match param {
                    BnParam::Gamma => "gamma",
                    BnParam::Beta => "beta",
                    BnParam::MovingMean => "moving_mean",
                    BnParam::MovingVariance => "moving_variance",
                };
                format!("bn_{}_{}", slot, param)
            }
        }
    }

    fn all() -> Vec<WeightRole> {
        use self::WeightRole::*;
        let mut roles = vec![
            Weights,
            Bias,
            Conv1Weights,
            Conv1Bias,
            Conv2Weights,
            Conv2Bias,
            InputWeights(1),
            InputWeights(2),
            InputWeights(3),
            FullyConvWeights,
            ImFullyConvWeights,
        ];
        for &slot in &[BnSlot::Input, BnSlot::Hidden] {
            for &param in &[
                BnParam::Gamma,
                BnParam::Beta,
                BnParam::MovingMean,
                BnParam::MovingVariance,
            ] {
                roles.push(BatchNorm(slot, param));
            }
        }
        roles
    }
}

lazy_static! {
    /// Role suffixes, longest first so that eg. `conv1_weights` wins over `weights`.
    static ref ROLE_SUFFIXES: Vec<(String, WeightRole)> = WeightRole::all()
        .into_iter()
        .map(|role| (format!("_{}", role.suffix()), role))
        .sorted_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()))
        .collect();
}

/// Identifies one tensor of the store: the stream and layer it belongs to and its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightKey {
    pub stream: StreamKind,
    pub layer: String,
    pub role: WeightRole,
}

impl WeightKey {
    pub fn new<S: Into<String>>(stream: StreamKind, layer: S, role: WeightRole) -> WeightKey {
        WeightKey {
            stream,
            layer: layer.into(),
            role,
        }
    }
    /// The name without its structural prefix, eg. `conv1_1_weights`.
    pub fn short_name(&self) -> String {
        format!("{}_{}", self.layer, self.role.suffix())
    }
    /// The name under which the tensor is persisted, eg. `im_stream/conv1_1/conv1_1_weights`.
    pub fn persisted_name(&self) -> String {
        format!(
            "{}/{}/{}",
            self.stream.scope_name(),
            self.layer,
            self.short_name()
        )
    }
    /// Recovers a key from a short name such as `fc4_input_2_weights`.
    pub fn from_short_name(stream: StreamKind, short_name: &str) -> Result<WeightKey> {
        ROLE_SUFFIXES
            .iter()
            .find(|(suffix, _)| {
                short_name.len() > suffix.len() && short_name.ends_with(suffix.as_str())
            })
            .map(|(suffix, role)| {
                WeightKey::new(stream, &short_name[..short_name.len() - suffix.len()], *role)
            })
            .ok_or_else(|| {
                Error::Checkpoint(format!("'{}' does not end in a known weight role", short_name))
            })
    }
    /// Recovers a key from a persisted name by reading the stream from the first path
    /// component and stripping the rest of the structural prefix.
    pub fn from_persisted_name(name: &str) -> Result<WeightKey> {
        let mut components = name.split('/');
        let stream = components
            .next()
            .and_then(StreamKind::from_scope_name)
            .ok_or_else(|| {
                Error::Checkpoint(format!("'{}' is not prefixed with a known stream scope", name))
            })?;
        let short_name = components
            .last()
            .ok_or_else(|| Error::Checkpoint(format!("'{}' has no variable name", name)))?;
        WeightKey::from_short_name(stream, short_name)
    }
}

impl fmt::Display for WeightKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.stream.scope_name(), self.short_name())
    }
}

/// How a newly created tensor is filled.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// Normal distribution with zero mean, re-drawing samples beyond two deviations.
    TruncatedNormal { std: f32 },
    Zeros,
    Ones,
    Constant(Vec<f32>),
}

impl Initializer {
    /// Fan-in scaled normal initialization with `std = sqrt(2 / fan_in)`.
    pub fn fan_in(fan_in: usize) -> Initializer {
        Initializer::TruncatedNormal {
            std: (2.0 / fan_in.max(1) as f32).sqrt(),
        }
    }

    pub fn generate<R: Rng>(&self, shape: &[usize], rng: &mut R) -> Result<Tensor> {
        let len = shape.iter().product::<usize>();
        let data = match self {
            Initializer::TruncatedNormal { std } => {
                let normal = Normal::new(0f32, *std).map_err(|e| {
                    Error::Config(format!("invalid initializer deviation {}: {}", std, e))
                })?;
                let limit = 2f32 * std;
                (0..len)
                    .map(|_| loop {
                        let v: f32 = rng.sample(normal);
                        if v.abs() <= limit {
                            break v;
                        }
                    })
                    .collect()
            }
            Initializer::Zeros => vec![0f32; len],
            Initializer::Ones => vec![1f32; len],
            Initializer::Constant(values) => {
                if values.len() != len {
                    return Err(Error::Config(format!(
                        "constant initializer has {} values, but shape {:?} holds {}",
                        values.len(),
                        shape,
                        len
                    )));
                }
                values.clone()
            }
        };
        Ok(Tensor::from_shape_vec(IxDyn(shape), data)?)
    }
}

/// Everything needed to (re-)create one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSpec {
    pub key: WeightKey,
    pub shape: Vec<usize>,
    pub init: Initializer,
}

/// Exclusive owner of the network parameters. Layers refer to entries by key.
#[derive(Debug)]
pub struct WeightStore {
    entries: HashMap<WeightKey, Tensor>,
    rng: StdRng,
}

impl Default for WeightStore {
    fn default() -> WeightStore {
        WeightStore::new()
    }
}

impl WeightStore {
    /// Creates an empty store with an entropy-seeded initializer.
    pub fn new() -> WeightStore {
        WeightStore {
            entries: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }
    /// Creates an empty store whose random initialization is reproducible.
    pub fn with_seed(seed: u64) -> WeightStore {
        WeightStore {
            entries: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn contains(&self, key: &WeightKey) -> bool {
        self.entries.contains_key(key)
    }
    pub fn get(&self, key: &WeightKey) -> Option<&Tensor> {
        self.entries.get(key)
    }
    pub fn keys(&self) -> impl Iterator<Item = &WeightKey> {
        self.entries.keys()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&WeightKey, &Tensor)> {
        self.entries.iter()
    }
    /// Inserts or replaces an entry, returning the previous tensor.
    pub fn insert(&mut self, key: WeightKey, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(key, tensor)
    }

    /// Returns the existing tensor for `key` unchanged, or creates it with `init`. An existing
    /// tensor must have the requested shape.
    pub fn get_or_create(
        &mut self,
        key: WeightKey,
        shape: &[usize],
        init: &Initializer,
    ) -> Result<&Tensor> {
        if let Some(existing) = self.entries.get(&key) {
            check_shape(&key, existing, shape)?;
        } else {
            let tensor = init.generate(shape, &mut self.rng)?;
            self.entries.insert(key.clone(), tensor);
        }
        Ok(&self.entries[&key])
    }

    /// Force-replaces the given entries with freshly initialized tensors.
    pub fn reinitialize(&mut self, specs: &[WeightSpec]) -> Result<()> {
        for spec in specs {
            info!("Re-initializing weight {}", spec.key);
            let tensor = spec.init.generate(&spec.shape, &mut self.rng)?;
            self.entries.insert(spec.key.clone(), tensor);
        }
        Ok(())
    }

    /// Starts staging new entries. Nothing reaches the store unless the transaction is
    /// committed.
    pub fn transaction(&mut self) -> WeightTransaction {
        WeightTransaction {
            store: self,
            pending: HashMap::new(),
        }
    }

    pub fn view(&self, key: &WeightKey) -> Result<ArrayViewD<f32>> {
        self.entries
            .get(key)
            .map(|t| t.view())
            .ok_or_else(|| Error::MissingWeight(key.to_string()))
    }
    pub fn view1(&self, key: &WeightKey) -> Result<ArrayView1<f32>> {
        Ok(self.view(key)?.into_dimensionality::<Ix1>()?)
    }
    pub fn view2(&self, key: &WeightKey) -> Result<ArrayView2<f32>> {
        Ok(self.view(key)?.into_dimensionality::<Ix2>()?)
    }
    pub fn view4(&self, key: &WeightKey) -> Result<ArrayView4<f32>> {
        Ok(self.view(key)?.into_dimensionality::<Ix4>()?)
    }

    /// Replaces the contents of the store with the tensors of a checkpoint file.
    pub fn load_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.entries = Self::read_checkpoint_entries(path)?;
        Ok(())
    }

    pub(crate) fn read_checkpoint_entries<P: AsRef<Path>>(
        path: P,
    ) -> Result<HashMap<WeightKey, Tensor>> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mut entries = HashMap::new();
        for (name, tensor) in read_checkpoint(&mut reader)? {
            let key = WeightKey::from_persisted_name(&name)?;
            trace!("Loaded {} with shape {:?}.", key, tensor.shape());
            entries.insert(key, tensor);
        }
        info!(
            "Loaded {} weight tensors from {}",
            entries.len(),
            path.display()
        );
        Ok(entries)
    }

    /// Swaps in a new set of entries, returning the previous ones.
    pub(crate) fn replace_entries(
        &mut self,
        entries: HashMap<WeightKey, Tensor>,
    ) -> HashMap<WeightKey, Tensor> {
        std::mem::replace(&mut self.entries, entries)
    }

    /// Writes every entry into a checkpoint file, ordered by persisted name.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let entries = self
            .entries
            .iter()
            .map(|(key, tensor)| (key.persisted_name(), tensor))
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect::<Vec<_>>();
        let mut writer = BufWriter::new(File::create(path)?);
        write_checkpoint(&mut writer, &entries)?;
        info!(
            "Saved {} weight tensors into {}",
            entries.len(),
            path.display()
        );
        Ok(())
    }
}

/// Staged additions to a [`WeightStore`], used while a network is being built.
pub struct WeightTransaction<'a> {
    store: &'a mut WeightStore,
    pending: HashMap<WeightKey, Tensor>,
}

impl<'a> WeightTransaction<'a> {
    pub fn get(&self, key: &WeightKey) -> Option<&Tensor> {
        self.pending.get(key).or_else(|| self.store.entries.get(key))
    }

    /// Staged counterpart of [`WeightStore::get_or_create`].
    pub fn get_or_create(
        &mut self,
        key: WeightKey,
        shape: &[usize],
        init: &Initializer,
    ) -> Result<()> {
        if let Some(existing) = self.get(&key) {
            check_shape(&key, existing, shape)?;
            trace!("Reusing weight {} {:?}.", key, shape);
            return Ok(());
        }
        trace!("Initializing weight {} {:?} with {:?}.", key, shape, init);
        let tensor = init.generate(shape, &mut self.store.rng)?;
        self.pending.insert(key, tensor);
        Ok(())
    }

    /// Stages a tensor computed from other entries, replacing any previous value.
    pub fn derive(&mut self, key: WeightKey, tensor: Tensor) {
        self.pending.insert(key, tensor);
    }

    /// Moves the staged entries into the store and returns how many there were.
    pub fn commit(self) -> usize {
        let count = self.pending.len();
        self.store.entries.extend(self.pending);
        count
    }
}

fn check_shape(key: &WeightKey, tensor: &Tensor, shape: &[usize]) -> Result<()> {
    if tensor.shape() != shape {
        return Err(Error::Config(format!(
            "weight {} has shape {:?}, but the layer requires {:?}",
            key,
            tensor.shape(),
            shape
        )));
    }
    Ok(())
}
