use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GanMode {
    #[serde(rename = "lsgan")]
    LsGan,
    #[serde(rename = "vanilla")]
    Vanilla,
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "wgangp")]
    WGanGp,
}

impl FromStr for GanMode {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let mode = match name {
            "lsgan" => Self::LsGan,
            "vanilla" => Self::Vanilla,
            "binary" => Self::Binary,
            "wgangp" => Self::WGanGp,
            _ => bail!("gan mode {} not implemented", name),
        };
        Ok(mode)
    }
}

#[derive(Debug, Clone)]
pub struct GanLossInit {
    pub mode: GanMode,
    /// Range the real label is drawn from.
    pub real_label: Range<f64>,
    /// Range the fake label is drawn from.
    pub fake_label: Range<f64>,
}

impl Default for GanLossInit {
    fn default() -> Self {
        Self {
            mode: GanMode::LsGan,
            real_label: 0.7..1.2,
            fake_label: 0.0..0.3,
        }
    }
}

impl GanLossInit {
    pub fn build(self) -> Result<GanLoss> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    /// Draws both labels once from `rng`. They stay fixed for the lifetime of
    /// the returned loss.
    pub fn build_with_rng<R>(self, rng: &mut R) -> Result<GanLoss>
    where
        R: Rng + ?Sized,
    {
        let Self {
            mode,
            real_label,
            fake_label,
        } = self;
        ensure!(
            real_label.start < real_label.end,
            "empty real label range {:?}",
            real_label
        );
        ensure!(
            fake_label.start < fake_label.end,
            "empty fake label range {:?}",
            fake_label
        );

        let real_label = rng.gen_range(real_label);
        let fake_label = rng.gen_range(fake_label);
        debug!(
            "{:?} loss uses real label {:.3} and fake label {:.3}",
            mode, real_label, fake_label
        );

        Ok(GanLoss {
            mode,
            real_label,
            fake_label,
        })
    }
}

/// Adversarial loss for one of the supported objectives.
#[derive(Debug, Clone)]
pub struct GanLoss {
    mode: GanMode,
    real_label: f64,
    fake_label: f64,
}

impl GanLoss {
    pub fn mode(&self) -> GanMode {
        self.mode
    }

    pub fn real_label(&self) -> f64 {
        self.real_label
    }

    pub fn fake_label(&self) -> f64 {
        self.fake_label
    }

    /// Computes the scalar loss of a discriminator output against the real or
    /// fake target.
    ///
    /// The `binary` mode expects `(batch, 2)` logits and uses class 1 for real
    /// and class 0 for fake samples.
    pub fn forward(&self, prediction: &Tensor, is_real: bool) -> Tensor {
        let Self {
            mode,
            real_label,
            fake_label,
        } = *self;
        let label = if is_real { real_label } else { fake_label };

        match mode {
            GanMode::LsGan => {
                let target = prediction.full_like(label);
                prediction.mse_loss(&target, Reduction::Mean)
            }
            GanMode::Vanilla => {
                let target = prediction.full_like(label);
                prediction.binary_cross_entropy_with_logits::<Tensor>(
                    &target,
                    None,
                    None,
                    Reduction::Mean,
                )
            }
            GanMode::Binary => {
                let bsize = prediction.size()[0];
                let class = if is_real { 1i64 } else { 0 };
                let target = Tensor::full(&[bsize], class, (Kind::Int64, prediction.device()));
                prediction.cross_entropy_for_logits(&target)
            }
            GanMode::WGanGp => {
                let mean = prediction.mean(Kind::Float);
                if is_real {
                    -mean
                } else {
                    mean
                }
            }
        }
    }
}

// gradient penalty

/// Samples the gradient penalty is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WGanGpKind {
    #[serde(rename = "real")]
    Real,
    #[serde(rename = "fake")]
    Fake,
    #[serde(rename = "mixed")]
    Mixed,
}

impl FromStr for WGanGpKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "real" => Self::Real,
            "fake" => Self::Fake,
            "mixed" => Self::Mixed,
            _ => bail!("{} not implemented", name),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WGanGpInit {
    pub kind: WGanGpKind,
    pub constant: f64,
    pub lambda: f64,
}

impl WGanGpInit {
    pub fn build(self) -> Result<WGanGp> {
        let Self {
            kind,
            constant,
            lambda,
        } = self;

        ensure!(constant.is_finite() && lambda.is_finite());
        if lambda <= 0.0 {
            warn!("gradient penalty is disabled with lambda = {}", lambda);
        }

        Ok(WGanGp {
            kind,
            c: constant,
            λ: lambda,
        })
    }
}

impl Default for WGanGpInit {
    fn default() -> Self {
        Self {
            kind: WGanGpKind::Mixed,
            constant: 1.0,
            lambda: 10.0,
        }
    }
}

#[derive(Debug)]
pub struct WGanGp {
    kind: WGanGpKind,
    c: f64,
    λ: f64,
}

#[derive(Debug)]
pub struct GradientPenalty {
    /// Scalar penalty, zero when the penalty is disabled.
    pub penalty: Tensor,
    /// Per-sample flattened input gradients, `None` when the penalty is disabled.
    pub gradients: Option<Tensor>,
}

impl WGanGp {
    pub fn forward(
        &self,
        real: &Tensor,
        fake: &Tensor,
        discriminator: impl FnOnce(&Tensor, bool) -> Tensor,
        train: bool,
    ) -> Result<GradientPenalty> {
        let Self { kind, c, λ } = *self;

        if λ <= 0.0 {
            return Ok(GradientPenalty {
                penalty: Tensor::from(0f32).to_device(real.device()),
                gradients: None,
            });
        }

        let mix = interpolate(kind, real, fake)?.set_requires_grad(true);
        let batch_size = mix.size()[0];

        let score = discriminator(&mix, train);
        let grad = &Tensor::run_backward(
            &[&score.sum(Kind::Float)], // outputs
            &[&mix],                    // inputs
            true,                       // keep_graph
            true,                       // create_graph
        )[0];

        let gradients = grad.view([batch_size, -1]);
        let norm = (&gradients + 1e-16)
            .square()
            .sum_dim_intlist(&[1], false, Kind::Float)
            .sqrt();
        let penalty = (norm - c).square().mean(Kind::Float) * λ;

        Ok(GradientPenalty {
            penalty,
            gradients: Some(gradients),
        })
    }
}

/// Builds the samples the gradient penalty is evaluated on, detached from
/// the graphs of `real` and `fake`.
///
/// The mixed kind draws one weight `alpha ~ U[0, 1)` per sample and returns
/// `fake + alpha * (real - fake)`.
pub fn interpolate(kind: WGanGpKind, real: &Tensor, fake: &Tensor) -> Result<Tensor> {
    ensure!(fake.size() == real.size(), "real and fake shapes differ");
    ensure!(fake.kind() == real.kind(), "real and fake kinds differ");
    ensure!(
        fake.device() == real.device(),
        "real and fake devices differ"
    );
    ensure!(fake.dim() > 0, "scalar inputs are not allowed");

    let mix = match kind {
        WGanGpKind::Real => real.detach(),
        WGanGpKind::Fake => fake.detach(),
        WGanGpKind::Mixed => {
            let batch_size = fake.size()[0];
            let mut shape = vec![batch_size];
            shape.extend(iter::repeat(1).take(fake.dim() - 1));
            let alpha = Tensor::rand(&shape, (fake.kind(), fake.device()));

            let real = real.detach();
            let fake = fake.detach();
            &fake + alpha * (&real - &fake)
        }
    };

    Ok(mix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gan_mode_names() -> Result<()> {
        for (name, mode) in [
            ("lsgan", GanMode::LsGan),
            ("vanilla", GanMode::Vanilla),
            ("binary", GanMode::Binary),
            ("wgangp", GanMode::WGanGp),
        ] {
            ensure!(name.parse::<GanMode>()? == mode);
        }
        let err = "hinge".parse::<GanMode>().unwrap_err();
        ensure!(err.to_string() == "gan mode hinge not implemented");
        Ok(())
    }

    #[test]
    fn wgangp_loss_is_signed_mean() -> Result<()> {
        let loss = GanLossInit {
            mode: GanMode::WGanGp,
            ..Default::default()
        }
        .build()?;

        let prediction = Tensor::randn(&[4, 1, 7, 7], FLOAT_CPU);
        let mean = prediction.mean(Kind::Float);
        ensure!(loss.forward(&prediction, true).equal(&(-&mean)));
        ensure!(loss.forward(&prediction, false).equal(&mean));
        Ok(())
    }

    #[test]
    fn labels_are_drawn_once_per_instance() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let loss = GanLossInit::default().build_with_rng(&mut rng)?;

        ensure!((0.7..1.2).contains(&loss.real_label()));
        ensure!((0.0..0.3).contains(&loss.fake_label()));

        let prediction = Tensor::rand(&[2, 1, 5, 5], FLOAT_CPU);
        let first = f64::from(loss.forward(&prediction, true));
        let second = f64::from(loss.forward(&prediction, true));
        ensure!(first == second);

        // the same seed reproduces the same labels
        let mut rng = StdRng::seed_from_u64(1);
        let other = GanLossInit::default().build_with_rng(&mut rng)?;
        ensure!(other.real_label() == loss.real_label());
        ensure!(other.fake_label() == loss.fake_label());
        Ok(())
    }

    #[test]
    fn lsgan_loss_against_label() -> Result<()> {
        let loss = GanLossInit {
            mode: GanMode::LsGan,
            real_label: 1.0..1.0 + 1e-9,
            fake_label: 0.0..1e-9,
        }
        .build()?;

        let ones = Tensor::ones(&[2, 1, 3, 3], FLOAT_CPU);
        approx::assert_abs_diff_eq!(f64::from(loss.forward(&ones, true)), 0.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(f64::from(loss.forward(&ones, false)), 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn vanilla_loss_at_zero_logit() -> Result<()> {
        let loss = GanLossInit {
            mode: GanMode::Vanilla,
            ..Default::default()
        }
        .build()?;

        // a zero logit costs ln 2 whatever the label
        let zeros = Tensor::zeros(&[2, 1, 4, 4], FLOAT_CPU);
        let expect = 2f64.ln();
        approx::assert_abs_diff_eq!(
            f64::from(loss.forward(&zeros, true)),
            expect,
            epsilon = 1e-6
        );
        approx::assert_abs_diff_eq!(
            f64::from(loss.forward(&zeros, false)),
            expect,
            epsilon = 1e-6
        );
        Ok(())
    }

    #[test]
    fn binary_loss_uses_class_indices() -> Result<()> {
        let loss = GanLossInit {
            mode: GanMode::Binary,
            ..Default::default()
        }
        .build()?;

        // every sample confidently predicts class 1
        let prediction = Tensor::of_slice(&[-10f32, 10.0])
            .view([1, 2])
            .expand(&[3, 2], false)
            .contiguous();
        ensure!(f64::from(loss.forward(&prediction, true)) < 1e-6);
        approx::assert_abs_diff_eq!(
            f64::from(loss.forward(&prediction, false)),
            20.0,
            epsilon = 1e-4
        );
        Ok(())
    }

    #[test]
    fn gradient_penalty_disabled() -> Result<()> {
        let gp = WGanGpInit {
            lambda: 0.0,
            ..Default::default()
        }
        .build()?;

        let real = Tensor::rand(&[2, 3, 4, 4], FLOAT_CPU);
        let fake = Tensor::rand(&[2, 3, 4, 4], FLOAT_CPU);
        let mut called = false;
        let GradientPenalty { penalty, gradients } = gp.forward(
            &real,
            &fake,
            |xs, _| {
                called = true;
                xs.sum(Kind::Float)
            },
            true,
        )?;

        ensure!(f64::from(penalty) == 0.0);
        ensure!(gradients.is_none());
        ensure!(!called);
        Ok(())
    }

    #[test]
    fn gradient_penalty_of_linear_critic() -> Result<()> {
        let weight = Tensor::full(&[1, 1, 3, 3], 2.0, FLOAT_CPU);
        let real = Tensor::rand(&[4, 1, 3, 3], FLOAT_CPU);
        let fake = Tensor::rand(&[4, 1, 3, 3], FLOAT_CPU);

        for kind in [WGanGpKind::Real, WGanGpKind::Fake, WGanGpKind::Mixed] {
            let gp = WGanGpInit {
                kind,
                constant: 1.0,
                lambda: 10.0,
            }
            .build()?;

            // the input gradient of each sample is the weight, whose norm is 6
            let critic = |xs: &Tensor, _| {
                (xs * &weight).sum_dim_intlist(&[1, 2, 3], false, Kind::Float)
            };
            let GradientPenalty { penalty, gradients } = gp.forward(&real, &fake, critic, true)?;

            let gradients = gradients.unwrap();
            ensure!(gradients.size() == vec![4, 9]);
            let expect = Tensor::full(&[4, 9], 2.0, FLOAT_CPU);
            ensure!(gradients.allclose(&expect, 1e-6, 1e-6, false));
            approx::assert_abs_diff_eq!(f64::from(penalty), 250.0, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn penalty_keeps_graph_for_backward() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = nn::linear(&vs.root() / "critic", 6, 1, Default::default());
        let gp = WGanGpInit::default().build()?;

        let real = Tensor::rand(&[3, 6], FLOAT_CPU);
        let fake = Tensor::rand(&[3, 6], FLOAT_CPU);
        let GradientPenalty { penalty, .. } =
            gp.forward(&real, &fake, |xs, _| xs.apply(&critic), true)?;

        // the penalty depends on the critic weights through the input gradient
        let grads = Tensor::run_backward(&[&penalty], &[&critic.ws], false, false);
        ensure!(grads[0].size() == vec![1, 6]);
        ensure!(grads[0].abs().sum(Kind::Float).double_value(&[]) > 0.0);
        Ok(())
    }

    #[test]
    fn mixed_interpolation_of_identical_batches() -> Result<()> {
        let batch = Tensor::rand(&[5, 3, 4, 4], FLOAT_CPU);
        for _ in 0..4 {
            let mix = interpolate(WGanGpKind::Mixed, &batch, &batch.copy())?;
            ensure!(mix.equal(&batch));
        }

        let ones = Tensor::ones(&[8, 2], FLOAT_CPU);
        let zeros = Tensor::zeros(&[8, 2], FLOAT_CPU);
        let mix = interpolate(WGanGpKind::Mixed, &ones, &zeros)?;
        // one weight per sample, shared across the other dimensions
        ensure!(mix.select(1, 0).equal(&mix.select(1, 1)));
        ensure!(f64::from(mix.min()) >= 0.0 && f64::from(mix.max()) <= 1.0);
        Ok(())
    }

    #[test]
    fn interpolation_rejects_mismatched_batches() -> Result<()> {
        let real = Tensor::rand(&[2, 3], FLOAT_CPU);
        let fake = Tensor::rand(&[3, 3], FLOAT_CPU);
        ensure!(interpolate(WGanGpKind::Mixed, &real, &fake).is_err());

        let err = "average".parse::<WGanGpKind>().unwrap_err();
        ensure!(err.to_string() == "average not implemented");
        Ok(())
    }
}
