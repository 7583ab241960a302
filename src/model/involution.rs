use crate::common::*;

/// Involution layer, which generates a spatial kernel for every output pixel
/// from the features at that pixel and shares it across channels in a group.
#[derive(Debug, Clone)]
pub struct InvolutionInit {
    pub kernel_size: usize,
    pub groups: usize,
    pub reduce_ratio: usize,
}

impl Default for InvolutionInit {
    fn default() -> Self {
        Self {
            kernel_size: 7,
            groups: 1,
            reduce_ratio: 1,
        }
    }
}

impl InvolutionInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<Involution> {
        let path = path.borrow();
        let Self {
            kernel_size,
            groups,
            reduce_ratio,
        } = self;

        ensure!(
            kernel_size % 2 == 1,
            "involution kernel size must be odd, got {}",
            kernel_size
        );
        ensure!(
            groups > 0 && out_c % groups == 0,
            "output channels {} is not divisible by {} groups",
            out_c,
            groups
        );
        ensure!(
            reduce_ratio > 0 && out_c / reduce_ratio > 0,
            "reduce ratio {} is too large for {} output channels",
            reduce_ratio,
            out_c
        );

        let in_c = in_c as i64;
        let out_c = out_c as i64;
        let reduced_c = out_c / reduce_ratio as i64;
        let groups = groups as i64;
        let kernel_size = kernel_size as i64;
        let pointwise = nn::ConvConfig {
            bias: false,
            ..Default::default()
        };

        let initial = (in_c != out_c)
            .then(|| nn::conv2d(path / "initial_mapping", in_c, out_c, 1, pointwise));

        let kernel_gen = nn::seq_t()
            .add(nn::conv2d(
                path / "reduce_mapping",
                in_c,
                reduced_c,
                1,
                pointwise,
            ))
            .add(nn::batch_norm2d(
                &(path / "sigma_mapping") / "batch_norm",
                reduced_c,
                nn::BatchNormConfig {
                    momentum: 0.3,
                    ..Default::default()
                },
            ))
            .add_fn(|xs| xs.relu())
            .add(nn::conv2d(
                path / "span_mapping",
                reduced_c,
                kernel_size * kernel_size * groups,
                1,
                pointwise,
            ));

        Ok(Involution {
            initial,
            kernel_gen,
            out_c,
            groups,
            kernel_size,
        })
    }
}

#[derive(Debug)]
pub struct Involution {
    initial: Option<nn::Conv2D>,
    kernel_gen: nn::SequentialT,
    out_c: i64,
    groups: i64,
    kernel_size: i64,
}

impl nn::ModuleT for Involution {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            ref initial,
            ref kernel_gen,
            out_c,
            groups,
            kernel_size,
        } = *self;
        let size = input.size();
        let (bsize, height, width) = (size[0], size[2], size[3]);
        let area = kernel_size * kernel_size;
        let padding = kernel_size / 2;

        let values = match initial {
            Some(conv) => conv.forward(input),
            None => input.shallow_clone(),
        };
        // (B, C * K * K, H * W) with the channel axis outermost
        let patches = values
            .im2col(
                &[kernel_size, kernel_size],
                &[1, 1],
                &[padding, padding],
                &[1, 1],
            )
            .view([bsize, groups, out_c / groups, area, height, width]);

        let kernel = kernel_gen
            .forward_t(input, train)
            .view([bsize, groups, 1, area, height, width]);

        (&kernel * &patches)
            .sum_dim_intlist(&[3], false, patches.kind())
            .view([bsize, out_c, height, width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn involution_keeps_resolution() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let same = InvolutionInit::default().build(&root / "same", 8, 8)?;
        let input = Tensor::rand(&[2, 8, 10, 12], FLOAT_CPU);
        ensure!(same.forward_t(&input, true).size() == vec![2, 8, 10, 12]);

        let grouped = InvolutionInit {
            kernel_size: 3,
            groups: 2,
            reduce_ratio: 2,
        }
        .build(&root / "grouped", 8, 4)?;
        ensure!(
            grouped.forward_t(&input, false).size() == vec![2, 4, 10, 12]
        );
        Ok(())
    }

    #[test]
    fn kernel_is_shared_across_group_channels() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = InvolutionInit {
            kernel_size: 3,
            ..Default::default()
        }
        .build(&vs.root() / "inv", 4, 4)?;

        // identical channels see the same generated kernel, so outputs match
        let plane = Tensor::rand(&[1, 1, 6, 6], FLOAT_CPU);
        let input = plane.expand(&[1, 4, 6, 6], false).contiguous();
        let output = layer.forward_t(&input, false);

        let first = output.narrow(1, 0, 1);
        for channel in 1..4 {
            ensure!(output
                .narrow(1, channel, 1)
                .allclose(&first, 1e-5, 1e-5, false));
        }
        Ok(())
    }

    #[test]
    fn invalid_groups_are_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let result = InvolutionInit {
            groups: 3,
            ..Default::default()
        }
        .build(&vs.root() / "inv", 4, 4);
        assert!(result.is_err());
    }
}
