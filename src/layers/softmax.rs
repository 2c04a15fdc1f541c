use super::{ComputeOnHost, Layer, Runtime};
use crate::math::softmax;
use crate::{Result, Tensor};

/// Softmax over the last axis, appended to classifiers.
#[derive(Debug)]
pub struct SoftmaxLayer {
    name: String,
}

impl SoftmaxLayer {
    pub fn new<S: Into<String>>(name: S) -> SoftmaxLayer {
        SoftmaxLayer { name: name.into() }
    }
}

impl Layer for SoftmaxLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "softmax"
    }
}

impl ComputeOnHost for SoftmaxLayer {
    fn compute(&self, inputs: &[&Tensor], _rt: &mut Runtime) -> Result<Tensor> {
        Ok(softmax(inputs[0].view()))
    }
}
