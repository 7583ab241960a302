use super::misc::{add_padding, NormKind, PaddingKind};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct ResnetBlockInit {
    pub padding_kind: PaddingKind,
    pub norm_kind: NormKind,
    pub dropout: bool,
    pub bias: bool,
}

impl Default for ResnetBlockInit {
    fn default() -> Self {
        Self {
            padding_kind: PaddingKind::Reflect,
            norm_kind: NormKind::BatchNorm,
            dropout: false,
            bias: false,
        }
    }
}

impl ResnetBlockInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, channels: usize) -> ResnetBlock {
        let path = path.borrow();
        let Self {
            padding_kind,
            norm_kind,
            dropout,
            bias,
        } = self;
        let channels = channels as i64;

        let conv = |name: &str| {
            nn::conv2d(
                path / name,
                channels,
                channels,
                3,
                nn::ConvConfig {
                    padding: padding_kind.conv_padding(1),
                    bias,
                    ..Default::default()
                },
            )
        };

        let seq = add_padding(nn::seq_t(), padding_kind, 1)
            .add(conv("conv1"))
            .add(norm_kind.build(path / "norm1", channels))
            .add_fn(|xs| xs.relu());

        let seq = if dropout {
            seq.add_fn_t(|xs, train| xs.dropout(0.5, train))
        } else {
            seq
        };

        let seq = add_padding(seq, padding_kind, 1)
            .add(conv("conv2"))
            .add(norm_kind.build(path / "norm2", channels));

        ResnetBlock { seq }
    }
}

#[derive(Debug)]
pub struct ResnetBlock {
    seq: nn::SequentialT,
}

impl ResnetBlock {
    /// The convolution branch without the skip connection.
    pub fn branch_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(xs, train)
    }
}

impl nn::ModuleT for ResnetBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs + self.branch_t(xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_input_plus_branch() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let input = Tensor::rand(&[2, 8, 9, 11], FLOAT_CPU);

        for (index, padding_kind) in [
            PaddingKind::Reflect,
            PaddingKind::Replicate,
            PaddingKind::Zero,
        ]
        .into_iter()
        .enumerate()
        {
            let block = ResnetBlockInit {
                padding_kind,
                norm_kind: NormKind::InstanceNorm,
                bias: true,
                ..Default::default()
            }
            .build(&root / format!("block_{}", index), 8);

            let output = block.forward_t(&input, false);
            let branch = block.branch_t(&input, false);

            ensure!(output.size() == input.size(), "incorrect output shape");
            ensure!(output.allclose(&(&input + &branch), 1e-6, 1e-6, false));
        }

        Ok(())
    }

    #[test]
    fn dropout_block_keeps_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = ResnetBlockInit {
            padding_kind: PaddingKind::Zero,
            dropout: true,
            ..Default::default()
        }
        .build(&vs.root() / "block", 4);

        let input = Tensor::rand(&[3, 4, 6, 6], FLOAT_CPU);
        let output = block.forward_t(&input, true);
        ensure!(output.size() == vec![3, 4, 6, 6], "incorrect output shape");
        Ok(())
    }
}
