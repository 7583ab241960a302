use super::{
    involution::{Involution, InvolutionInit},
    layer_norm::{LayerNorm, LayerNormInit},
};
use crate::common::*;

/// Spatial mixing operation at the head of a ConvNeXt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenMixing {
    /// Depthwise 3x3 convolution.
    #[serde(rename = "depthwise")]
    Depthwise,
    /// 7x7 involution.
    #[serde(rename = "involution")]
    Involution,
    /// Full 3x3 convolution.
    #[serde(rename = "dense")]
    Dense,
}

impl FromStr for TokenMixing {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let mixing = match name {
            "depthwise" => Self::Depthwise,
            "involution" => Self::Involution,
            "dense" => Self::Dense,
            _ => bail!("token mixing [{}] is not implemented", name),
        };
        Ok(mixing)
    }
}

/// Per-sample stochastic depth.
#[derive(Debug, Clone, Copy)]
pub struct DropPath {
    prob: f64,
}

impl DropPath {
    pub fn new(prob: f64) -> Result<Self> {
        ensure!(
            (0.0..1.0).contains(&prob),
            "drop path probability must be in [0, 1), got {}",
            prob
        );
        Ok(Self { prob })
    }
}

impl nn::ModuleT for DropPath {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        if !train || self.prob == 0.0 {
            return xs.shallow_clone();
        }

        let keep_prob = 1.0 - self.prob;
        let mut shape = vec![xs.size()[0]];
        shape.extend(iter::repeat(1).take(xs.dim() - 1));
        let mask = (Tensor::rand(&shape, (xs.kind(), xs.device())) + keep_prob).floor();

        xs / keep_prob * mask
    }
}

/// Linearly spaced stochastic depth rates, one per block.
pub fn drop_path_rates(max_rate: f64, num_blocks: usize) -> Vec<f64> {
    match num_blocks {
        0 => vec![],
        1 => vec![0.0],
        _ => (0..num_blocks)
            .map(|index| max_rate * index as f64 / (num_blocks - 1) as f64)
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct ConvNextBlockInit {
    pub token_mixing: TokenMixing,
    pub drop_path: f64,
    /// Initial value of the per-channel layer scale, disabled when not positive.
    pub layer_scale: f64,
}

impl Default for ConvNextBlockInit {
    fn default() -> Self {
        Self {
            token_mixing: TokenMixing::Depthwise,
            drop_path: 0.0,
            layer_scale: 1e-6,
        }
    }
}

impl ConvNextBlockInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, dim: usize) -> Result<ConvNextBlock> {
        let path = path.borrow();
        let Self {
            token_mixing,
            drop_path,
            layer_scale,
        } = self;
        let dim = dim as i64;

        let mixer = match token_mixing {
            TokenMixing::Depthwise => TokenMixer::Conv(nn::conv2d(
                path / "dwconv",
                dim,
                dim,
                3,
                nn::ConvConfig {
                    padding: 1,
                    groups: dim,
                    ..Default::default()
                },
            )),
            TokenMixing::Dense => TokenMixer::Conv(nn::conv2d(
                path / "conv",
                dim,
                dim,
                3,
                nn::ConvConfig {
                    padding: 1,
                    ..Default::default()
                },
            )),
            TokenMixing::Involution => {
                let involution = InvolutionInit::default().build(
                    path / "involution",
                    dim as usize,
                    dim as usize,
                )?;
                TokenMixer::Involution(involution)
            }
        };

        let norm = LayerNormInit::default().build(path / "norm", dim);
        let pwconv1 = nn::linear(path / "pwconv1", dim, dim * 4, Default::default());
        let pwconv2 = nn::linear(path / "pwconv2", dim * 4, dim, Default::default());
        let gamma = (layer_scale > 0.0)
            .then(|| path.var("gamma", &[dim], nn::Init::Const(layer_scale)));
        let drop_path = DropPath::new(drop_path)?;

        Ok(ConvNextBlock {
            mixer,
            norm,
            pwconv1,
            pwconv2,
            gamma,
            drop_path,
        })
    }
}

#[derive(Debug)]
enum TokenMixer {
    Conv(nn::Conv2D),
    Involution(Involution),
}

impl nn::ModuleT for TokenMixer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        match self {
            Self::Conv(conv) => conv.forward(xs),
            Self::Involution(involution) => involution.forward_t(xs, train),
        }
    }
}

#[derive(Debug)]
pub struct ConvNextBlock {
    mixer: TokenMixer,
    norm: LayerNorm,
    pwconv1: nn::Linear,
    pwconv2: nn::Linear,
    gamma: Option<Tensor>,
    drop_path: DropPath,
}

impl nn::ModuleT for ConvNextBlock {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            mixer,
            norm,
            pwconv1,
            pwconv2,
            gamma,
            drop_path,
        } = self;

        let xs = mixer
            .forward_t(input, train)
            .permute(&[0, 2, 3, 1])
            .apply(norm)
            .apply(pwconv1)
            .gelu()
            .apply(pwconv2);
        let xs = match gamma {
            Some(gamma) => xs * gamma,
            None => xs,
        };
        let xs = xs.permute(&[0, 3, 1, 2]);

        input + drop_path.forward_t(&xs, train)
    }
}
