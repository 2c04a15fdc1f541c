/// A descriptor for input and intermediary image geometry (height, width, channels).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageGeometry {
    height: usize,
    width: usize,
    channels: usize,
}

impl ImageGeometry {
    pub fn new(height: usize, width: usize, channels: usize) -> ImageGeometry {
        ImageGeometry {
            height,
            width,
            channels,
        }
    }
    pub fn height(&self) -> usize {
        self.height
    }
    pub fn width(&self) -> usize {
        self.width
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn num_elems(&self) -> usize {
        self.height * self.width * self.channels
    }
    /// Returns the geometry after a SAME-padded pooling with `stride`, ie. each side becomes
    /// `ceil(side / stride)`.
    pub fn pooled(&self, stride: usize) -> ImageGeometry {
        ImageGeometry {
            height: ceil_div(self.height, stride),
            width: ceil_div(self.width, stride),
            channels: self.channels,
        }
    }
    pub fn with_channels(&self, channels: usize) -> ImageGeometry {
        ImageGeometry {
            height: self.height,
            width: self.width,
            channels,
        }
    }
    /// Returns the geometry of a VALID correlation with a `filter_h` x `filter_w` filter.
    pub fn valid_filtered(
        &self,
        filter_h: usize,
        filter_w: usize,
        channels: usize,
    ) -> ImageGeometry {
        ImageGeometry {
            height: self.height + 1 - filter_h,
            width: self.width + 1 - filter_w,
            channels,
        }
    }
    /// Per-example tensor shape in HWC order.
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }
}

/// Running shape state of a stream while it is being composed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamShape {
    /// A vector of the given length per example.
    Flat(usize),
    /// An image tensor per example. `train` is the geometry the same tensor has for a
    /// training-size input. The two differ only in fully-convolutional networks.
    Spatial {
        actual: ImageGeometry,
        train: ImageGeometry,
    },
}

impl StreamShape {
    pub fn spatial(geometry: ImageGeometry) -> StreamShape {
        StreamShape::Spatial {
            actual: geometry,
            train: geometry,
        }
    }
    /// The flattened input dimensionality a dense layer trained on this stream sees.
    pub fn fan_in(&self) -> usize {
        match *self {
            StreamShape::Flat(len) => len,
            StreamShape::Spatial { train, .. } => train.num_elems(),
        }
    }
    pub fn is_spatial(&self) -> bool {
        match self {
            StreamShape::Spatial { .. } => true,
            StreamShape::Flat(_) => false,
        }
    }
    /// Per-example tensor shape.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            StreamShape::Flat(len) => vec![len],
            StreamShape::Spatial { actual, .. } => actual.shape().to_vec(),
        }
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pooled_rounds_up() {
        let g = ImageGeometry::new(7, 8, 3).pooled(2);
        assert_eq!(g, ImageGeometry::new(4, 4, 3));
        assert_eq!(ImageGeometry::new(32, 32, 1).pooled(1).height(), 32);
    }

    #[test]
    fn fan_in_uses_training_geometry() {
        let shape = StreamShape::Spatial {
            actual: ImageGeometry::new(20, 20, 16),
            train: ImageGeometry::new(8, 8, 16),
        };
        assert_eq!(shape.fan_in(), 8 * 8 * 16);
        assert_eq!(shape.dims(), vec![20, 20, 16]);
        assert_eq!(StreamShape::Flat(5).fan_in(), 5);
    }
}
