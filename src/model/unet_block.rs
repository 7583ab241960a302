use super::misc::{leaky_relu, NormKind};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct UnetBlockInit {
    pub norm_kind: NormKind,
    pub dropout: bool,
}

impl UnetBlockInit {
    /// Builds one level of the U-Net around an already built inner level.
    ///
    /// The level reads `in_c` channels and its up path emits `outer_c`
    /// channels. Non-outermost levels concatenate their input, so they return
    /// `in_c + outer_c` channels.
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        outer_c: usize,
        inner_c: usize,
        level: UnetLevel,
    ) -> UnetBlock {
        let path = path.borrow();
        let Self { norm_kind, dropout } = self;
        let bias = norm_kind.use_bias();
        let in_c = in_c as i64;
        let inner_c = inner_c as i64;
        let outer_c = outer_c as i64;

        let down_conv = nn::conv2d(
            path / "down_conv",
            in_c,
            inner_c,
            4,
            nn::ConvConfig {
                stride: 2,
                padding: 1,
                bias,
                ..Default::default()
            },
        );
        let up_conv = |in_c: i64, bias: bool| {
            nn::conv_transpose2d(
                path / "up_conv",
                in_c,
                outer_c,
                4,
                nn::ConvTransposeConfig {
                    stride: 2,
                    padding: 1,
                    bias,
                    ..Default::default()
                },
            )
        };

        let (down, up, inner, outermost) = match level {
            UnetLevel::OuterMost(inner) => {
                let down = nn::seq_t().add(down_conv);
                let up = nn::seq_t()
                    .add_fn(|xs| xs.relu())
                    .add(up_conv(inner_c * 2, true))
                    .add_fn(|xs| xs.tanh());
                (down, up, Some(inner), true)
            }
            UnetLevel::Standard(inner) => {
                let down = nn::seq_t()
                    .add_fn(|xs| leaky_relu(xs, 0.2))
                    .add(down_conv)
                    .add(norm_kind.build(path / "down_norm", inner_c));
                let up = nn::seq_t()
                    .add_fn(|xs| xs.relu())
                    .add(up_conv(inner_c * 2, bias))
                    .add(norm_kind.build(path / "up_norm", outer_c));
                let up = if dropout {
                    up.add_fn_t(|xs, train| xs.dropout(0.5, train))
                } else {
                    up
                };
                (down, up, Some(inner), false)
            }
            UnetLevel::InnerMost => {
                let down = nn::seq_t()
                    .add_fn(|xs| leaky_relu(xs, 0.2))
                    .add(down_conv);
                let up = nn::seq_t()
                    .add_fn(|xs| xs.relu())
                    .add(up_conv(inner_c, bias))
                    .add(norm_kind.build(path / "up_norm", outer_c));
                (down, up, None, false)
            }
        };

        UnetBlock {
            down,
            inner,
            up,
            outermost,
        }
    }
}

impl Default for UnetBlockInit {
    fn default() -> Self {
        Self {
            norm_kind: NormKind::BatchNorm,
            dropout: false,
        }
    }
}

/// Position of a level in the U-Net, carrying the inner level when there is one.
#[derive(Debug)]
pub enum UnetLevel {
    Standard(Box<UnetBlock>),
    OuterMost(Box<UnetBlock>),
    InnerMost,
}

impl UnetLevel {
    pub fn standard(inner: UnetBlock) -> Self {
        Self::Standard(Box::new(inner))
    }

    pub fn outer_most(inner: UnetBlock) -> Self {
        Self::OuterMost(Box::new(inner))
    }
}

#[derive(Debug)]
pub struct UnetBlock {
    down: nn::SequentialT,
    inner: Option<Box<UnetBlock>>,
    up: nn::SequentialT,
    outermost: bool,
}

impl UnetBlock {
    /// Number of levels from this one down to the innermost, inclusive.
    pub fn depth(&self) -> usize {
        1 + self.inner.as_ref().map(|inner| inner.depth()).unwrap_or(0)
    }

    /// Runs the down-sampling path through every level and returns the
    /// output of the innermost one.
    pub fn bottleneck_t(&self, input: &Tensor, train: bool) -> Tensor {
        let xs = self.down.forward_t(input, train);
        match &self.inner {
            Some(inner) => inner.bottleneck_t(&xs, train),
            None => xs,
        }
    }
}

impl nn::ModuleT for UnetBlock {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let xs = self.down.forward_t(input, train);
        let xs = match &self.inner {
            Some(inner) => inner.forward_t(&xs, train),
            None => xs,
        };
        let xs = self.up.forward_t(&xs, train);

        if self.outermost {
            xs
        } else {
            Tensor::cat(&[input, &xs], 1)
        }
    }
}
