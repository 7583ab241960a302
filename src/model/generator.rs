use super::{
    convnext_block::{drop_path_rates, ConvNextBlockInit, TokenMixing},
    init::WeightInit,
    layer_norm::{DataFormat, LayerNormInit},
    misc::{add_padding, NormKind, PaddingKind},
    resnet_block::ResnetBlockInit,
    unet_block::{UnetBlock, UnetBlockInit, UnetLevel},
};
use crate::common::*;

/// Generator architecture selected by name.
///
/// Every ResNet kind, the 9- and 6-block ones included, uses the configured
/// norm. The classic CycleGAN code pins those two to batch norm and passes the
/// configured norm to the 1-block kind only; select `batch` to reproduce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// ResNet generator with 9 residual blocks.
    #[serde(rename = "resnet_9blocks")]
    Resnet9Blocks,
    /// ResNet generator with 6 residual blocks.
    #[serde(rename = "resnet_6blocks")]
    Resnet6Blocks,
    /// ResNet generator with a single residual block.
    #[serde(rename = "resnet_1blocks")]
    Resnet1Blocks,
    #[serde(rename = "convnext")]
    ConvNext,
    #[serde(rename = "invnext")]
    InvNext,
    #[serde(rename = "convnext_interpolation", alias = "Convnext_Interpolation")]
    ConvNextInterpolation,
    #[serde(rename = "unet_128")]
    Unet128,
    #[serde(rename = "unet_256")]
    Unet256,
}

impl FromStr for GeneratorKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "resnet_9blocks" => Self::Resnet9Blocks,
            "resnet_6blocks" => Self::Resnet6Blocks,
            "resnet_1blocks" => Self::Resnet1Blocks,
            "convnext" => Self::ConvNext,
            "invnext" => Self::InvNext,
            "convnext_interpolation" | "Convnext_Interpolation" => Self::ConvNextInterpolation,
            "unet_128" => Self::Unet128,
            "unet_256" => Self::Unet256,
            _ => bail!("Generator model name [{}] is not recognized", name),
        };
        Ok(kind)
    }
}

/// Builds any generator by kind and re-initializes its weights.
#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub kind: GeneratorKind,
    pub input_channels: usize,
    pub output_channels: usize,
    pub base_channels: usize,
    pub norm_kind: NormKind,
    pub dropout: bool,
    pub init: WeightInit,
}

impl Default for GeneratorInit {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Resnet9Blocks,
            input_channels: 3,
            output_channels: 3,
            base_channels: 64,
            norm_kind: NormKind::InstanceNorm,
            dropout: false,
            init: WeightInit::default(),
        }
    }
}

impl GeneratorInit {
    /// Builds the generator under `vs.root() / name`.
    pub fn build(self, vs: &nn::VarStore, name: &str) -> Result<Generator> {
        let Self {
            kind,
            input_channels: in_c,
            output_channels: out_c,
            base_channels: base_c,
            norm_kind,
            dropout,
            init,
        } = self;
        let root = vs.root();
        let path = &root / name;

        let resnet = |num_blocks| ResnetGeneratorInit {
            num_blocks,
            norm_kind,
            dropout,
            ..Default::default()
        };
        let unet = |depth| UnetGeneratorInit {
            depth,
            norm_kind,
            dropout,
        };
        let convnext = |token_mixing, upsample| ConvNextGeneratorInit {
            dims: [base_c, base_c * 2, base_c * 4, base_c * 8],
            token_mixing,
            upsample,
            ..Default::default()
        };

        let generator: Generator = match kind {
            GeneratorKind::Resnet9Blocks => resnet(9).build(&path, in_c, out_c, base_c)?.into(),
            GeneratorKind::Resnet6Blocks => resnet(6).build(&path, in_c, out_c, base_c)?.into(),
            GeneratorKind::Resnet1Blocks => resnet(1).build(&path, in_c, out_c, base_c)?.into(),
            GeneratorKind::ConvNext => convnext(TokenMixing::Depthwise, UpSampleKind::Transposed)
                .build(&path, in_c, out_c)?
                .into(),
            GeneratorKind::InvNext => convnext(TokenMixing::Involution, UpSampleKind::Transposed)
                .build(&path, in_c, out_c)?
                .into(),
            GeneratorKind::ConvNextInterpolation => {
                convnext(TokenMixing::Depthwise, UpSampleKind::Bicubic)
                    .build(&path, in_c, out_c)?
                    .into()
            }
            GeneratorKind::Unet128 => unet(7).build(&path, in_c, out_c, base_c)?.into(),
            GeneratorKind::Unet256 => unet(8).build(&path, in_c, out_c, base_c)?.into(),
        };

        init.apply(vs, name)?;
        debug!("generator {:?} built under '{}'", kind, name);

        Ok(generator)
    }
}

#[derive(Debug)]
pub enum Generator {
    Resnet(ResnetGenerator),
    Unet(UnetGenerator),
    ConvNext(ConvNextGenerator),
}

impl From<ResnetGenerator> for Generator {
    fn from(from: ResnetGenerator) -> Self {
        Self::Resnet(from)
    }
}

impl From<UnetGenerator> for Generator {
    fn from(from: UnetGenerator) -> Self {
        Self::Unet(from)
    }
}

impl From<ConvNextGenerator> for Generator {
    fn from(from: ConvNextGenerator) -> Self {
        Self::ConvNext(from)
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        match self {
            Self::Resnet(model) => model.forward_t(input, train),
            Self::Unet(model) => model.forward_t(input, train),
            Self::ConvNext(model) => model.forward_t(input, train),
        }
    }
}

// resnet

#[derive(Debug, Clone)]
pub struct ResnetGeneratorInit {
    pub num_blocks: usize,
    pub norm_kind: NormKind,
    pub padding_kind: PaddingKind,
    pub dropout: bool,
}

impl Default for ResnetGeneratorInit {
    fn default() -> Self {
        Self {
            num_blocks: 9,
            norm_kind: NormKind::BatchNorm,
            padding_kind: PaddingKind::Reflect,
            dropout: false,
        }
    }
}

impl ResnetGeneratorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
        inner_c: usize,
    ) -> Result<ResnetGenerator> {
        const NUM_SAMPLING: usize = 2;

        let path = path.borrow();
        let Self {
            num_blocks,
            norm_kind,
            padding_kind,
            dropout,
        } = self;
        ensure!(
            in_c > 0 && out_c > 0 && inner_c > 0,
            "channel numbers must be positive"
        );

        let bias = norm_kind.use_bias();
        let in_c = in_c as i64;
        let out_c = out_c as i64;
        let inner_c = inner_c as i64;
        let bottleneck_c = inner_c << NUM_SAMPLING;

        let seq = add_padding(nn::seq_t(), PaddingKind::Reflect, 3)
            .add(nn::conv2d(
                path / "first_conv",
                in_c,
                inner_c,
                7,
                nn::ConvConfig {
                    bias,
                    ..Default::default()
                },
            ))
            .add(norm_kind.build(path / "first_norm", inner_c))
            .add_fn(|xs| xs.relu());

        let seq = (0..NUM_SAMPLING).fold(seq, |seq, index| {
            let in_c = inner_c << index;
            let out_c = in_c * 2;

            seq.add(nn::conv2d(
                path / format!("down_conv_{}", index),
                in_c,
                out_c,
                3,
                nn::ConvConfig {
                    stride: 2,
                    padding: 1,
                    bias,
                    ..Default::default()
                },
            ))
            .add(norm_kind.build(path / format!("down_norm_{}", index), out_c))
            .add_fn(|xs| xs.relu())
        });

        let seq = (0..num_blocks).fold(seq, |seq, index| {
            seq.add(
                ResnetBlockInit {
                    padding_kind,
                    norm_kind,
                    dropout,
                    bias,
                }
                .build(path / format!("block_{}", index), bottleneck_c as usize),
            )
        });

        let seq = (0..NUM_SAMPLING).fold(seq, |seq, index| {
            let in_c = bottleneck_c >> index;
            let out_c = in_c / 2;

            seq.add(nn::conv_transpose2d(
                path / format!("up_conv_{}", index),
                in_c,
                out_c,
                3,
                nn::ConvTransposeConfig {
                    stride: 2,
                    padding: 1,
                    output_padding: 1,
                    bias,
                    ..Default::default()
                },
            ))
            .add(norm_kind.build(path / format!("up_norm_{}", index), out_c))
            .add_fn(|xs| xs.relu())
        });

        let seq = add_padding(seq, PaddingKind::Reflect, 3)
            .add(nn::conv2d(
                path / "last_conv",
                inner_c,
                out_c,
                7,
                Default::default(),
            ))
            .add_fn(|xs| xs.tanh());

        Ok(ResnetGenerator { seq })
    }
}

#[derive(Debug)]
pub struct ResnetGenerator {
    seq: nn::SequentialT,
}

impl nn::ModuleT for ResnetGenerator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(input, train)
    }
}

// unet

#[derive(Debug, Clone)]
pub struct UnetGeneratorInit {
    /// Number of down-sampling levels. An input of `2^depth` pixels per side
    /// reaches 1x1 at the bottleneck.
    pub depth: usize,
    pub norm_kind: NormKind,
    pub dropout: bool,
}

impl Default for UnetGeneratorInit {
    fn default() -> Self {
        Self {
            depth: 8,
            norm_kind: NormKind::BatchNorm,
            dropout: false,
        }
    }
}

impl UnetGeneratorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
        inner_c: usize,
    ) -> Result<UnetGenerator> {
        let path = path.borrow();
        let Self {
            depth,
            norm_kind,
            dropout,
        } = self;
        ensure!(depth >= 5, "U-Net depth must be at least 5, got {}", depth);
        ensure!(
            in_c > 0 && out_c > 0 && inner_c > 0,
            "channel numbers must be positive"
        );

        let level_path = |level: usize| path / format!("level_{}", level);
        let plain = UnetBlockInit {
            norm_kind,
            dropout: false,
        };
        let widest_c = inner_c * 8;

        let innermost = plain.clone().build(
            level_path(depth - 1),
            widest_c,
            widest_c,
            widest_c,
            UnetLevel::InnerMost,
        );

        let block = (4..(depth - 1)).rev().fold(innermost, |inner, level| {
            UnetBlockInit { norm_kind, dropout }.build(
                level_path(level),
                widest_c,
                widest_c,
                widest_c,
                UnetLevel::standard(inner),
            )
        });

        let block = (1..=3).rev().fold(block, |inner, level| {
            let outer_c = inner_c << (level - 1);
            plain.clone().build(
                level_path(level),
                outer_c,
                outer_c,
                outer_c * 2,
                UnetLevel::standard(inner),
            )
        });

        let root = plain.build(
            level_path(0),
            in_c,
            out_c,
            inner_c,
            UnetLevel::outer_most(block),
        );
        debug_assert_eq!(root.depth(), depth);

        Ok(UnetGenerator { root })
    }
}

#[derive(Debug)]
pub struct UnetGenerator {
    root: UnetBlock,
}

impl UnetGenerator {
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Encoder output at the innermost level.
    pub fn bottleneck_t(&self, input: &Tensor, train: bool) -> Tensor {
        self.root.bottleneck_t(input, train)
    }
}

impl nn::ModuleT for UnetGenerator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        self.root.forward_t(input, train)
    }
}

// convnext

/// How the first two decoder stages of a ConvNeXt generator up-sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpSampleKind {
    #[serde(rename = "transposed")]
    Transposed,
    #[serde(rename = "bicubic")]
    Bicubic,
}

#[derive(Debug, Clone)]
pub struct ConvNextGeneratorInit {
    pub depths: [usize; 4],
    pub dims: [usize; 4],
    pub drop_path_rate: f64,
    pub layer_scale: f64,
    pub token_mixing: TokenMixing,
    pub upsample: UpSampleKind,
}

impl Default for ConvNextGeneratorInit {
    fn default() -> Self {
        Self {
            depths: [3, 3, 9, 3],
            dims: [96, 192, 384, 768],
            drop_path_rate: 0.0,
            layer_scale: 1e-6,
            token_mixing: TokenMixing::Depthwise,
            upsample: UpSampleKind::Transposed,
        }
    }
}

impl ConvNextGeneratorInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<ConvNextGenerator> {
        let path = path.borrow();
        let Self {
            depths,
            dims,
            drop_path_rate,
            layer_scale,
            token_mixing,
            upsample,
        } = self;
        ensure!(
            in_c > 0 && out_c > 0 && dims.iter().all(|&dim| dim > 0),
            "channel numbers must be positive"
        );

        let channels_first = || LayerNormInit {
            data_format: DataFormat::ChannelsFirst,
            eps: 1e-6,
        };
        let dims_i64 = dims.map(|dim| dim as i64);
        let in_c = in_c as i64;
        let out_c = out_c as i64;

        // encoder
        let downs: Vec<_> = izip!(
            iter::once(in_c).chain(dims_i64),
            dims_i64,
            [4, 2, 2, 2]
        )
        .enumerate()
        .map(|(index, (in_c, out_c, ksize))| {
            nn::seq()
                .add(nn::conv2d(
                    path / format!("encoder_{}", index),
                    in_c,
                    out_c,
                    ksize,
                    nn::ConvConfig {
                        stride: ksize,
                        ..Default::default()
                    },
                ))
                .add(channels_first().build(path / format!("encoder_norm_{}", index), out_c))
        })
        .collect();

        let mut rates = drop_path_rates(drop_path_rate, depths.iter().sum()).into_iter();
        let stages: Vec<_> = izip!(depths, dims)
            .enumerate()
            .map(|(stage_index, (depth, dim))| -> Result<_> {
                let stage_path = path / format!("stage_{}", stage_index);
                (0..depth).try_fold(nn::seq_t(), |seq, block_index| -> Result<_> {
                    let block = ConvNextBlockInit {
                        token_mixing,
                        drop_path: rates.next().unwrap_or(0.0),
                        layer_scale,
                    }
                    .build(&stage_path / format!("block_{}", block_index), dim)?;
                    Ok(seq.add(block))
                })
            })
            .try_collect()?;

        // decoder, from the bottleneck back to the first stage
        let ups: Vec<_> = (0..3)
            .rev()
            .map(|index| {
                let in_c = dims_i64[index + 1];
                let out_c = dims_i64[index];
                let norm = channels_first().build(path / format!("decoder_norm_{}", index), out_c);
                let name = format!("decoder_{}", index);

                match (upsample, index) {
                    (UpSampleKind::Bicubic, 1 | 2) => {
                        let conv = nn::conv2d(path / name, in_c, out_c, 1, Default::default());
                        UpSample::Bicubic(nn::seq().add(conv).add(norm))
                    }
                    _ => {
                        let conv = nn::conv_transpose2d(
                            path / name,
                            in_c,
                            out_c,
                            2,
                            nn::ConvTransposeConfig {
                                stride: 2,
                                ..Default::default()
                            },
                        );
                        UpSample::Transposed(nn::seq().add(conv).add(norm))
                    }
                }
            })
            .collect();

        let fuses: Vec<_> = (0..3)
            .rev()
            .map(|index| {
                let in_c = dims_i64[index] * 2;
                let out_c = dims_i64[index];
                let fuse_path = path / format!("upconv_{}", index);
                let norm = channels_first().build(path / format!("upconv_norm_{}", index), out_c);

                match upsample {
                    UpSampleKind::Bicubic => nn::seq()
                        .add(nn::conv2d(
                            fuse_path,
                            in_c,
                            out_c,
                            3,
                            nn::ConvConfig {
                                padding: 1,
                                bias: false,
                                ..Default::default()
                            },
                        ))
                        .add(norm),
                    UpSampleKind::Transposed => nn::seq()
                        .add(nn::conv_transpose2d(
                            fuse_path,
                            in_c,
                            out_c,
                            3,
                            nn::ConvTransposeConfig {
                                padding: 1,
                                bias: false,
                                ..Default::default()
                            },
                        ))
                        .add(norm),
                }
            })
            .collect();

        let head = nn::seq()
            .add(nn::conv_transpose2d(
                path / "head",
                dims_i64[0],
                out_c,
                4,
                nn::ConvTransposeConfig {
                    stride: 4,
                    ..Default::default()
                },
            ))
            .add(channels_first().build(path / "head_norm", out_c));

        let refine = match upsample {
            UpSampleKind::Bicubic => {
                let seq = nn::seq()
                    .add(nn::conv_transpose2d(
                        path / "refine",
                        out_c,
                        out_c,
                        1,
                        Default::default(),
                    ))
                    .add(channels_first().build(path / "refine_norm", out_c));
                Some(UpSample::Bicubic(seq))
            }
            UpSampleKind::Transposed => None,
        };

        Ok(ConvNextGenerator {
            downs,
            stages,
            ups,
            fuses,
            head,
            refine,
        })
    }
}

#[derive(Debug)]
enum UpSample {
    Transposed(nn::Sequential),
    /// Bicubic resize to the target resolution, then the layers.
    Bicubic(nn::Sequential),
}

impl UpSample {
    fn forward(&self, xs: &Tensor, height: i64, width: i64) -> Tensor {
        match self {
            Self::Transposed(seq) => seq.forward(xs),
            Self::Bicubic(seq) => xs
                .upsample_bicubic2d(&[height, width], false, None, None)
                .apply(seq),
        }
    }
}

#[derive(Debug)]
pub struct ConvNextGenerator {
    downs: Vec<nn::Sequential>,
    stages: Vec<nn::SequentialT>,
    ups: Vec<UpSample>,
    fuses: Vec<nn::Sequential>,
    head: nn::Sequential,
    refine: Option<UpSample>,
}

impl nn::ModuleT for ConvNextGenerator {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            downs,
            stages,
            ups,
            fuses,
            head,
            refine,
        } = self;
        let size = input.size();
        let (in_h, in_w) = (size[2], size[3]);

        let mut skips: Vec<Tensor> = izip!(downs, stages)
            .scan(input.shallow_clone(), |xs, (down, stage)| {
                *xs = stage.forward_t(&down.forward(xs), train);
                Some(xs.shallow_clone())
            })
            .collect();
        let bottleneck = skips.pop().unwrap_or_else(|| input.shallow_clone());

        let xs = izip!(ups, fuses, skips.iter().rev()).fold(bottleneck, |xs, (up, fuse, skip)| {
            let skip_size = skip.size();
            let xs = up.forward(&xs, skip_size[2], skip_size[3]);
            Tensor::cat(&[&xs, skip], 1).apply(fuse)
        });

        let xs = xs.apply(head);
        let xs = match refine {
            Some(refine) => refine.forward(&xs, in_h, in_w),
            None => xs,
        };

        xs.tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_image(output: &Tensor, expect: &[i64]) -> Result<()> {
        ensure!(
            output.size() == expect,
            "incorrect output shape {:?}",
            output.size()
        );
        ensure!(f64::from(output.abs().max()) <= 1.0, "output out of range");
        Ok(())
    }

    #[test]
    fn resnet_single_block_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let generator = GeneratorInit {
            kind: GeneratorKind::Resnet1Blocks,
            input_channels: 3,
            output_channels: 3,
            base_channels: 4,
            ..Default::default()
        }
        .build(&vs, "generator")?;

        let input = Tensor::rand(&[2, 3, 64, 64], FLOAT_CPU) * 2.0 - 1.0;
        ensure_image(&generator.forward_t(&input, true), &[2, 3, 64, 64])?;
        ensure_image(&generator.forward_t(&input, false), &[2, 3, 64, 64])?;
        Ok(())
    }

    #[test]
    fn resnet_generator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        for (index, (norm_kind, padding_kind)) in [
            (NormKind::BatchNorm, PaddingKind::Reflect),
            (NormKind::LayerNorm, PaddingKind::Replicate),
            (NormKind::None, PaddingKind::Zero),
        ]
        .into_iter()
        .enumerate()
        {
            let generator = ResnetGeneratorInit {
                num_blocks: 2,
                norm_kind,
                padding_kind,
                dropout: true,
            }
            .build(&root / format!("resnet_{}", index), 1, 2, 4)?;

            let input = Tensor::rand(&[2, 1, 20, 24], FLOAT_CPU);
            ensure_image(&generator.forward_t(&input, true), &[2, 2, 20, 24])?;
        }
        Ok(())
    }

    #[test]
    fn unet_generator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        for depth in [5, 6, 7] {
            let generator = UnetGeneratorInit {
                depth,
                norm_kind: NormKind::BatchNorm,
                dropout: true,
            }
            .build(&root / format!("unet_{}", depth), 3, 2, 2)?;
            ensure!(generator.depth() == depth);

            let side = 1i64 << depth;
            let input = Tensor::rand(&[2, 3, side, side], FLOAT_CPU);
            ensure_image(&generator.forward_t(&input, true), &[2, 2, side, side])?;
        }

        let result = UnetGeneratorInit {
            depth: 4,
            ..Default::default()
        }
        .build(&root / "shallow", 3, 3, 2);
        ensure!(result.is_err());
        Ok(())
    }

    #[test]
    fn unet_bottleneck_is_single_pixel() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        for depth in [5, 6, 7] {
            let generator = UnetGeneratorInit {
                depth,
                norm_kind: NormKind::InstanceNorm,
                ..Default::default()
            }
            .build(&root / format!("unet_{}", depth), 3, 3, 2)?;

            // a side of 2^depth halves once per level down to a single pixel
            let side = 1i64 << depth;
            let input = Tensor::rand(&[2, 3, side, side], FLOAT_CPU);
            let bottleneck = generator.bottleneck_t(&input, false);
            ensure!(bottleneck.size() == vec![2, 16, 1, 1]);

            let output = generator.forward_t(&input, false);
            ensure!(output.size() == vec![2, 3, side, side]);
        }
        Ok(())
    }

    #[test]
    fn convnext_generator_test() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let input = Tensor::rand(&[2, 3, 64, 64], FLOAT_CPU);

        for (index, (token_mixing, upsample)) in [
            (TokenMixing::Depthwise, UpSampleKind::Transposed),
            (TokenMixing::Involution, UpSampleKind::Transposed),
            (TokenMixing::Dense, UpSampleKind::Bicubic),
        ]
        .into_iter()
        .enumerate()
        {
            let generator = ConvNextGeneratorInit {
                depths: [1, 1, 2, 1],
                dims: [4, 8, 16, 32],
                drop_path_rate: 0.2,
                token_mixing,
                upsample,
                ..Default::default()
            }
            .build(&root / format!("convnext_{}", index), 3, 2)?;

            ensure_image(&generator.forward_t(&input, true), &[2, 2, 64, 64])?;
            ensure_image(&generator.forward_t(&input, false), &[2, 2, 64, 64])?;
        }
        Ok(())
    }

    #[test]
    fn convnext_fuses_concatenated_widths() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let dims = [4, 8, 16, 32];
        let init = ConvNextGeneratorInit {
            depths: [1, 1, 1, 1],
            dims,
            ..Default::default()
        };

        let _transposed = init.clone().build(&root / "transposed", 3, 3)?;
        let _bicubic = ConvNextGeneratorInit {
            upsample: UpSampleKind::Bicubic,
            ..init
        }
        .build(&root / "bicubic", 3, 3)?;
        let variables = vs.variables();

        for (index, dim) in dims.iter().take(3).enumerate() {
            let dim = *dim as i64;
            let encoder = &variables[&format!("transposed.encoder_{}.weight", index)];
            ensure!(encoder.size()[0] == dim);

            // transposed weights are laid out as (in, out, k, k)
            let fuse = &variables[&format!("transposed.upconv_{}.weight", index)];
            ensure!(fuse.size() == vec![dim * 2, dim, 3, 3]);
            let fuse = &variables[&format!("bicubic.upconv_{}.weight", index)];
            ensure!(fuse.size() == vec![dim, dim * 2, 3, 3]);
        }
        ensure!(variables.contains_key("bicubic.refine.weight"));
        ensure!(!variables.contains_key("transposed.refine.weight"));
        Ok(())
    }

    #[test]
    fn convnext_bicubic_restores_odd_resolution() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let generator = ConvNextGeneratorInit {
            depths: [1, 1, 1, 1],
            dims: [4, 8, 16, 32],
            upsample: UpSampleKind::Bicubic,
            ..Default::default()
        }
        .build(&vs.root() / "generator", 3, 3)?;

        // 40 -> 10 -> 5 -> 2 -> 1 does not divide evenly
        let input = Tensor::rand(&[1, 3, 40, 40], FLOAT_CPU);
        let output = generator.forward_t(&input, false);
        ensure!(output.size() == vec![1, 3, 40, 40]);
        ensure!(f64::from(output.abs().max()) <= 1.0);
        Ok(())
    }

    #[test]
    fn generator_kinds_test() -> Result<()> {
        let cases = [
            ("resnet_9blocks", 32),
            ("resnet_6blocks", 32),
            ("convnext", 32),
            ("invnext", 32),
            ("convnext_interpolation", 32),
            ("unet_128", 128),
            ("unet_256", 256),
        ];

        for (name, side) in cases {
            let vs = nn::VarStore::new(Device::Cpu);
            let generator = GeneratorInit {
                kind: name.parse()?,
                base_channels: 2,
                norm_kind: NormKind::InstanceNorm,
                ..Default::default()
            }
            .build(&vs, "generator")?;

            let input = Tensor::rand(&[2, 3, side, side], FLOAT_CPU);
            ensure_image(&generator.forward_t(&input, false), &[2, 3, side, side])?;
        }

        let err = "resnet_3blocks".parse::<GeneratorKind>().unwrap_err();
        ensure!(err.to_string().contains("[resnet_3blocks]"));
        Ok(())
    }

    #[test]
    fn resnet_kinds_use_configured_norm() -> Result<()> {
        for kind in [
            GeneratorKind::Resnet9Blocks,
            GeneratorKind::Resnet6Blocks,
            GeneratorKind::Resnet1Blocks,
        ] {
            for norm_kind in [NormKind::InstanceNorm, NormKind::BatchNorm] {
                let vs = nn::VarStore::new(Device::Cpu);
                let _generator = GeneratorInit {
                    kind,
                    base_channels: 2,
                    norm_kind,
                    ..Default::default()
                }
                .build(&vs, "generator")?;

                let variables = vs.variables();
                let has_batch_norm = variables
                    .keys()
                    .any(|name| name.contains(".batch_norm."));
                ensure!(has_batch_norm == (norm_kind == NormKind::BatchNorm));
                if norm_kind == NormKind::BatchNorm {
                    ensure!(
                        variables.contains_key("generator.first_norm.batch_norm.weight")
                    );
                    ensure!(
                        variables.contains_key("generator.block_0.norm1.batch_norm.weight")
                    );
                }
            }
        }
        Ok(())
    }
}
