use super::{
    init::WeightInit,
    misc::{leaky_relu, NormKind},
};
use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscriminatorKind {
    /// PatchGAN with 3 layers.
    #[serde(rename = "basic")]
    Basic,
    /// PatchGAN with a configurable number of layers.
    #[serde(rename = "n_layers")]
    NLayers,
    #[serde(rename = "pixel")]
    Pixel,
    #[serde(rename = "binary")]
    Binary,
}

impl FromStr for DiscriminatorKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "basic" => Self::Basic,
            "n_layers" => Self::NLayers,
            "pixel" => Self::Pixel,
            "binary" => Self::Binary,
            _ => bail!("Discriminator model name [{}] is not recognized", name),
        };
        Ok(kind)
    }
}

/// Builds any discriminator by kind and re-initializes its weights.
#[derive(Debug, Clone)]
pub struct DiscriminatorInit {
    pub kind: DiscriminatorKind,
    pub input_channels: usize,
    pub base_channels: usize,
    /// Number of stride-2 layers of the `n_layers` PatchGAN.
    pub n_layers: usize,
    pub norm_kind: NormKind,
    /// Side length of the square images fed to the `binary` discriminator.
    pub input_size: usize,
    pub init: WeightInit,
}

impl Default for DiscriminatorInit {
    fn default() -> Self {
        Self {
            kind: DiscriminatorKind::Basic,
            input_channels: 3,
            base_channels: 64,
            n_layers: 3,
            norm_kind: NormKind::InstanceNorm,
            input_size: 224,
            init: WeightInit::default(),
        }
    }
}

impl DiscriminatorInit {
    /// Builds the discriminator under `vs.root() / name`.
    pub fn build(self, vs: &nn::VarStore, name: &str) -> Result<Discriminator> {
        let Self {
            kind,
            input_channels: in_c,
            base_channels: base_c,
            n_layers,
            norm_kind,
            input_size,
            init,
        } = self;
        let root = vs.root();
        let path = &root / name;

        let discriminator: Discriminator = match kind {
            DiscriminatorKind::Basic => NLayerDiscriminatorInit {
                n_layers: 3,
                norm_kind,
            }
            .build(&path, in_c, base_c)?
            .into(),
            DiscriminatorKind::NLayers => NLayerDiscriminatorInit {
                n_layers,
                norm_kind,
            }
            .build(&path, in_c, base_c)?
            .into(),
            DiscriminatorKind::Pixel => PixelDiscriminatorInit { norm_kind }
                .build(&path, in_c, base_c)?
                .into(),
            DiscriminatorKind::Binary => BinaryDiscriminatorInit { input_size }
                .build(&path, in_c, base_c)?
                .into(),
        };

        init.apply(vs, name)?;
        debug!("discriminator {:?} built under '{}'", kind, name);

        Ok(discriminator)
    }
}

#[derive(Debug)]
pub enum Discriminator {
    NLayer(NLayerDiscriminator),
    Pixel(PixelDiscriminator),
    Binary(BinaryDiscriminator),
}

impl From<NLayerDiscriminator> for Discriminator {
    fn from(from: NLayerDiscriminator) -> Self {
        Self::NLayer(from)
    }
}

impl From<PixelDiscriminator> for Discriminator {
    fn from(from: PixelDiscriminator) -> Self {
        Self::Pixel(from)
    }
}

impl From<BinaryDiscriminator> for Discriminator {
    fn from(from: BinaryDiscriminator) -> Self {
        Self::Binary(from)
    }
}

impl nn::ModuleT for Discriminator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        match self {
            Self::NLayer(model) => model.forward_t(input, train),
            Self::Pixel(model) => model.forward_t(input, train),
            Self::Binary(model) => model.forward_t(input, train),
        }
    }
}

fn conv_config(stride: i64, padding: i64, bias: bool) -> nn::ConvConfig {
    nn::ConvConfig {
        stride,
        padding,
        bias,
        ..Default::default()
    }
}

// patch gan

#[derive(Debug, Clone)]
pub struct NLayerDiscriminatorInit {
    pub n_layers: usize,
    pub norm_kind: NormKind,
}

impl Default for NLayerDiscriminatorInit {
    fn default() -> Self {
        Self {
            n_layers: 3,
            norm_kind: NormKind::BatchNorm,
        }
    }
}

impl NLayerDiscriminatorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        inner_c: usize,
    ) -> Result<NLayerDiscriminator> {
        const MAX_MULT: i64 = 8;

        let path = path.borrow();
        let Self {
            n_layers,
            norm_kind,
        } = self;
        ensure!(n_layers >= 1, "n_layers must be at least 1");
        ensure!(in_c > 0 && inner_c > 0, "channel numbers must be positive");

        let bias = norm_kind.use_bias();
        let in_c = in_c as i64;
        let inner_c = inner_c as i64;
        let mult = |layer: usize| (1i64 << layer.min(3)).min(MAX_MULT);

        let seq = nn::seq_t()
            .add(nn::conv2d(
                path / "conv_0",
                in_c,
                inner_c,
                4,
                conv_config(2, 1, true),
            ))
            .add_fn(|xs| leaky_relu(xs, 0.2));

        let seq = (1..=n_layers).fold(seq, |seq, layer| {
            let in_c = inner_c * mult(layer - 1);
            let out_c = inner_c * mult(layer);
            let stride = if layer < n_layers { 2 } else { 1 };

            seq.add(nn::conv2d(
                path / format!("conv_{}", layer),
                in_c,
                out_c,
                4,
                conv_config(stride, 1, bias),
            ))
            .add(norm_kind.build(path / format!("norm_{}", layer), out_c))
            .add_fn(|xs| leaky_relu(xs, 0.2))
        });

        let seq = seq.add(nn::conv2d(
            path / "last_conv",
            inner_c * mult(n_layers),
            1,
            4,
            conv_config(1, 1, true),
        ));

        Ok(NLayerDiscriminator { seq })
    }
}

#[derive(Debug)]
pub struct NLayerDiscriminator {
    seq: nn::SequentialT,
}

impl nn::ModuleT for NLayerDiscriminator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(input, train)
    }
}

// pixel

#[derive(Debug, Clone)]
pub struct PixelDiscriminatorInit {
    pub norm_kind: NormKind,
}

impl Default for PixelDiscriminatorInit {
    fn default() -> Self {
        Self {
            norm_kind: NormKind::BatchNorm,
        }
    }
}

impl PixelDiscriminatorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        inner_c: usize,
    ) -> Result<PixelDiscriminator> {
        let path = path.borrow();
        let Self { norm_kind } = self;
        ensure!(in_c > 0 && inner_c > 0, "channel numbers must be positive");

        let bias = norm_kind.use_bias();
        let in_c = in_c as i64;
        let inner_c = inner_c as i64;

        let seq = nn::seq_t()
            .add(nn::conv2d(
                path / "conv_0",
                in_c,
                inner_c,
                1,
                conv_config(1, 0, true),
            ))
            .add_fn(|xs| leaky_relu(xs, 0.2))
            .add(nn::conv2d(
                path / "conv_1",
                inner_c,
                inner_c * 2,
                1,
                conv_config(1, 0, bias),
            ))
            .add(norm_kind.build(path / "norm_1", inner_c * 2))
            .add_fn(|xs| leaky_relu(xs, 0.2))
            .add(nn::conv2d(
                path / "last_conv",
                inner_c * 2,
                1,
                1,
                conv_config(1, 0, bias),
            ));

        Ok(PixelDiscriminator { seq })
    }
}

#[derive(Debug)]
pub struct PixelDiscriminator {
    seq: nn::SequentialT,
}

impl nn::ModuleT for PixelDiscriminator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(input, train)
    }
}

// binary

/// Whole-image real/fake classifier emitting two logits per sample.
#[derive(Debug, Clone)]
pub struct BinaryDiscriminatorInit {
    pub input_size: usize,
}

impl Default for BinaryDiscriminatorInit {
    fn default() -> Self {
        Self { input_size: 224 }
    }
}

impl BinaryDiscriminatorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        inner_c: usize,
    ) -> Result<BinaryDiscriminator> {
        const NUM_STAGES: usize = 6;

        let path = path.borrow();
        let Self { input_size } = self;
        ensure!(in_c > 0 && inner_c > 0, "channel numbers must be positive");

        // five 4x4 stages halve the size, the last 3x3 stage rounds up
        let feature_size = (0..(NUM_STAGES - 1)).try_fold(input_size, |size, _| -> Result<_> {
            ensure!(
                size >= 2,
                "input size {} is too small for the binary discriminator",
                input_size
            );
            Ok(size / 2)
        })?;
        let feature_size = (feature_size + 1) / 2;

        let in_c = in_c as i64;
        let inner_c = inner_c as i64;

        let seq = (0..NUM_STAGES).fold(nn::seq_t(), |seq, index| {
            let in_c = if index == 0 { in_c } else { inner_c << (index - 1) };
            let out_c = inner_c << index;
            let ksize = if index + 1 < NUM_STAGES { 4 } else { 3 };

            seq.add(nn::conv2d(
                path / format!("conv_{}", index),
                in_c,
                out_c,
                ksize,
                conv_config(2, 1, true),
            ))
            .add(NormKind::BatchNorm.build(path / format!("norm_{}", index), out_c))
            .add_fn(|xs| leaky_relu(xs, 0.2))
        });

        let features = (inner_c << (NUM_STAGES - 1)) * (feature_size * feature_size) as i64;
        let linear = nn::linear(path / "classify", features, 2, Default::default());

        Ok(BinaryDiscriminator { seq, linear })
    }
}

#[derive(Debug)]
pub struct BinaryDiscriminator {
    seq: nn::SequentialT,
    linear: nn::Linear,
}

impl nn::ModuleT for BinaryDiscriminator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let bsize = input.size()[0];
        self.seq
            .forward_t(input, train)
            .view([bsize, -1])
            .apply(&self.linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_patch_gan_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator = DiscriminatorInit {
            kind: DiscriminatorKind::Basic,
            input_channels: 3,
            base_channels: 4,
            ..Default::default()
        }
        .build(&vs, "discriminator")?;

        let input = Tensor::rand(&[2, 3, 256, 256], FLOAT_CPU);
        let output = discriminator.forward_t(&input, true);
        ensure!(
            output.size() == vec![2, 1, 30, 30],
            "incorrect output shape"
        );
        Ok(())
    }

    #[test]
    fn n_layer_discriminator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let input = Tensor::rand(&[2, 3, 128, 128], FLOAT_CPU);

        for n_layers in 1..=5 {
            let discriminator = NLayerDiscriminatorInit {
                n_layers,
                norm_kind: NormKind::BatchNorm,
            }
            .build(&root / format!("n_layers_{}", n_layers), 3, 2)?;

            // each stride-2 layer halves the size, each stride-1 layer shrinks it by one
            let expect = (128 >> n_layers) - 2;
            let output = discriminator.forward_t(&input, true);
            ensure!(
                output.size() == vec![2, 1, expect, expect],
                "incorrect output shape"
            );
        }

        // the width multiplier is capped at 8
        let variables = vs.variables();
        ensure!(
            variables["n_layers_5.last_conv.weight"].size() == vec![1, 16, 4, 4]
        );
        Ok(())
    }

    #[test]
    fn pixel_discriminator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator = PixelDiscriminatorInit {
            norm_kind: NormKind::InstanceNorm,
        }
        .build(&vs.root() / "pixel", 3, 4)?;

        let input = Tensor::rand(&[2, 3, 17, 23], FLOAT_CPU);
        let output = discriminator.forward_t(&input, true);
        ensure!(
            output.size() == vec![2, 1, 17, 23],
            "incorrect output shape"
        );
        Ok(())
    }

    #[test]
    fn binary_discriminator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator =
            BinaryDiscriminatorInit { input_size: 64 }.build(&vs.root() / "binary", 3, 2)?;

        // the batch size follows the input
        for bsize in [2, 3, 5] {
            let input = Tensor::rand(&[bsize, 3, 64, 64], FLOAT_CPU);
            let output = discriminator.forward_t(&input, true);
            ensure!(output.size() == vec![bsize, 2], "incorrect output shape");
        }

        let result = BinaryDiscriminatorInit { input_size: 16 }.build(&vs.root() / "tiny", 3, 2);
        ensure!(result.is_err());
        Ok(())
    }

    #[test]
    fn binary_discriminator_default_size() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _discriminator =
            BinaryDiscriminatorInit::default().build(&vs.root() / "binary", 3, 1)?;

        // 224 -> 112 -> 56 -> 28 -> 14 -> 7 -> 4
        let variables = vs.variables();
        ensure!(
            variables["binary.classify.weight"].size() == vec![2, 32 * 16]
        );
        Ok(())
    }

    #[test]
    fn discriminator_kinds_test() -> Result<()> {
        for name in ["basic", "n_layers", "pixel", "binary"] {
            let vs = nn::VarStore::new(Device::Cpu);
            let discriminator = DiscriminatorInit {
                kind: name.parse()?,
                base_channels: 2,
                n_layers: 2,
                input_size: 64,
                norm_kind: NormKind::BatchNorm,
                ..Default::default()
            }
            .build(&vs, "discriminator")?;

            let input = Tensor::rand(&[2, 3, 64, 64], FLOAT_CPU);
            let output = discriminator.forward_t(&input, true);
            ensure!(output.size()[0] == 2);
        }

        let err = "global".parse::<DiscriminatorKind>().unwrap_err();
        ensure!(err.to_string().contains("[global]"));
        Ok(())
    }
}
