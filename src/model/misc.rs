use super::layer_norm::{DataFormat, LayerNorm, LayerNormInit};
use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaddingKind {
    #[serde(rename = "reflect")]
    Reflect,
    #[serde(rename = "replicate")]
    Replicate,
    #[serde(rename = "zero")]
    Zero,
}

impl PaddingKind {
    /// Builds an explicit padding layer, or `None` when the padding is zero
    /// and should be folded into the following convolution.
    pub fn build(self, lrtb: [usize; 4]) -> Option<Pad2D> {
        let [l, r, t, b] = lrtb;
        let lrtb = [l as i64, r as i64, t as i64, b as i64];

        match self {
            Self::Reflect | Self::Replicate => Some(Pad2D { kind: self, lrtb }),
            Self::Zero => None,
        }
    }

    /// Padding the convolution has to apply by itself.
    pub fn conv_padding(self, size: usize) -> i64 {
        match self {
            Self::Zero => size as i64,
            Self::Reflect | Self::Replicate => 0,
        }
    }
}

impl FromStr for PaddingKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "reflect" => Self::Reflect,
            "replicate" => Self::Replicate,
            "zero" => Self::Zero,
            _ => bail!("padding [{}] is not implemented", name),
        };
        Ok(kind)
    }
}

/// Appends a padding layer to `seq` unless the padding is folded into the
/// following convolution.
pub fn add_padding(seq: nn::SequentialT, kind: PaddingKind, size: usize) -> nn::SequentialT {
    match kind.build([size; 4]) {
        Some(pad) => seq.add(pad),
        None => seq,
    }
}

#[derive(Debug)]
pub struct Pad2D {
    kind: PaddingKind,
    lrtb: [i64; 4],
}

impl nn::Module for Pad2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self.kind {
            PaddingKind::Reflect => xs.reflection_pad2d(&self.lrtb),
            PaddingKind::Replicate => xs.replication_pad2d(&self.lrtb),
            PaddingKind::Zero => {
                let [l, r, t, b] = self.lrtb;
                xs.zero_pad2d(l, r, t, b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormKind {
    #[serde(rename = "batch")]
    BatchNorm,
    #[serde(rename = "instance")]
    InstanceNorm,
    #[serde(rename = "layer")]
    LayerNorm,
    #[serde(rename = "none")]
    None,
}

impl NormKind {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, out_dim: i64) -> Norm {
        let path = path.borrow();

        match self {
            Self::BatchNorm => {
                let norm = nn::batch_norm2d(path / "batch_norm", out_dim, Default::default());
                Norm::BatchNorm(norm)
            }
            Self::InstanceNorm => Norm::InstanceNorm(InstanceNorm { eps: 1e-5 }),
            Self::LayerNorm => {
                let norm = LayerNormInit {
                    data_format: DataFormat::ChannelsFirst,
                    ..Default::default()
                }
                .build(path / "layer_norm", out_dim);
                Norm::LayerNorm(norm)
            }
            Self::None => Norm::None,
        }
    }

    /// Convolutions feeding an instance norm keep their bias since the norm
    /// carries no affine parameters of its own.
    pub fn use_bias(self) -> bool {
        self == Self::InstanceNorm
    }
}

impl FromStr for NormKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "batch" => Self::BatchNorm,
            "instance" => Self::InstanceNorm,
            "layer" => Self::LayerNorm,
            "none" => Self::None,
            _ => bail!("normalization layer [{}] is not found", name),
        };
        Ok(kind)
    }
}

#[derive(Debug)]
pub enum Norm {
    BatchNorm(nn::BatchNorm),
    InstanceNorm(InstanceNorm),
    LayerNorm(LayerNorm),
    None,
}

impl nn::ModuleT for Norm {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        match self {
            Self::BatchNorm(norm) => norm.forward_t(input, train),
            Self::InstanceNorm(norm) => norm.forward(input),
            Self::LayerNorm(norm) => norm.forward(input),
            Self::None => input.shallow_clone(),
        }
    }
}

/// Instance normalization without affine parameters or running statistics.
#[derive(Debug)]
pub struct InstanceNorm {
    eps: f64,
}

impl nn::Module for InstanceNorm {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.instance_norm::<Tensor>(None, None, None, None, true, 0.1, self.eps, true)
    }
}

pub fn leaky_relu(xs: &Tensor, negative_slope: f64) -> Tensor {
    xs.relu() - (-xs).relu() * negative_slope
}
