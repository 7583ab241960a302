use crate::common::*;
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LrPolicyKind {
    #[serde(rename = "linear")]
    Linear,
    #[serde(rename = "step")]
    Step,
    #[serde(rename = "plateau")]
    Plateau,
    #[serde(rename = "cosine")]
    Cosine,
}

impl FromStr for LrPolicyKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "linear" => Self::Linear,
            "step" => Self::Step,
            "plateau" => Self::Plateau,
            "cosine" => Self::Cosine,
            _ => bail!("learning rate policy [{}] is not implemented", name),
        };
        Ok(kind)
    }
}

/// Epoch-level options that parameterize a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrPolicyInit {
    pub policy: LrPolicyKind,
    /// Epochs at the initial rate.
    pub n_epochs: usize,
    /// Epochs to linearly decay the rate to zero.
    pub n_epochs_decay: usize,
    /// Starting epoch counter.
    pub epoch_count: usize,
    /// Epochs between step decays.
    pub lr_decay_iters: usize,
}

impl Default for LrPolicyInit {
    fn default() -> Self {
        Self {
            policy: LrPolicyKind::Linear,
            n_epochs: 100,
            n_epochs_decay: 100,
            epoch_count: 1,
            lr_decay_iters: 50,
        }
    }
}

impl LrPolicyInit {
    pub fn build(self) -> Result<LrPolicy> {
        let Self {
            policy,
            n_epochs,
            n_epochs_decay,
            epoch_count,
            lr_decay_iters,
        } = self;

        let policy = match policy {
            LrPolicyKind::Linear => LrPolicy::Linear {
                n_epochs,
                n_epochs_decay,
                epoch_count,
            },
            LrPolicyKind::Step => LrPolicy::Step {
                step_size: lr_decay_iters,
                gamma: 0.1,
            },
            LrPolicyKind::Plateau => LrPolicy::Plateau {
                factor: 0.2,
                threshold: 0.01,
                patience: 5,
            },
            LrPolicyKind::Cosine => LrPolicy::Cosine {
                t_max: n_epochs,
                eta_min: 0.0,
            },
        };

        Ok(policy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrPolicy {
    /// Keeps the rate for `n_epochs`, then decays it linearly to zero over
    /// `n_epochs_decay` epochs.
    Linear {
        n_epochs: usize,
        n_epochs_decay: usize,
        epoch_count: usize,
    },
    /// Multiplies the rate by `gamma` every `step_size` epochs.
    Step { step_size: usize, gamma: f64 },
    /// Multiplies the rate by `factor` once the monitored metric has not
    /// improved by a relative `threshold` for more than `patience` epochs.
    Plateau {
        factor: f64,
        threshold: f64,
        patience: usize,
    },
    /// Anneals the rate to `eta_min` along a cosine over `t_max` epochs.
    Cosine { t_max: usize, eta_min: f64 },
}

#[derive(Debug, Clone)]
pub struct LrScheduler {
    policy: LrPolicy,
    base_lr: f64,
    lr: f64,
    epoch: usize,
    best: f64,
    num_bad_epochs: usize,
}

impl LrScheduler {
    pub fn new(policy: LrPolicy, base_lr: f64) -> Result<Self> {
        ensure!(
            base_lr.is_finite() && base_lr >= 0.0,
            "invalid base learning rate {}",
            base_lr
        );

        match policy {
            LrPolicy::Linear { .. } => {}
            LrPolicy::Step { step_size, gamma } => {
                ensure!(step_size > 0, "step size must be positive");
                ensure!(gamma.is_finite() && gamma >= 0.0, "invalid gamma {}", gamma);
            }
            LrPolicy::Plateau {
                factor, threshold, ..
            } => {
                ensure!(
                    factor > 0.0 && factor < 1.0,
                    "plateau factor must be in (0, 1), got {}",
                    factor
                );
                ensure!(
                    threshold.is_finite() && threshold >= 0.0,
                    "invalid plateau threshold {}",
                    threshold
                );
            }
            LrPolicy::Cosine { t_max, eta_min } => {
                ensure!(t_max > 0, "t_max must be positive");
                ensure!(eta_min.is_finite(), "invalid eta_min {}", eta_min);
            }
        }

        let mut scheduler = Self {
            policy,
            base_lr,
            lr: base_lr,
            epoch: 0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        };
        scheduler.lr = scheduler.epoch_lr(0);

        Ok(scheduler)
    }

    pub fn policy(&self) -> &LrPolicy {
        &self.policy
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Advances one epoch and returns the new rate.
    pub fn step(&mut self) -> Result<f64> {
        ensure!(
            !matches!(self.policy, LrPolicy::Plateau { .. }),
            "the plateau policy is stepped with a metric"
        );

        self.epoch += 1;
        self.update_lr(self.epoch_lr(self.epoch));
        Ok(self.lr)
    }

    /// Advances one epoch with the monitored metric, lower being better, and
    /// returns the new rate.
    pub fn step_metric(&mut self, metric: f64) -> Result<f64> {
        let (factor, threshold, patience) = match self.policy {
            LrPolicy::Plateau {
                factor,
                threshold,
                patience,
            } => (factor, threshold, patience),
            _ => bail!("only the plateau policy is stepped with a metric"),
        };
        ensure!(!metric.is_nan(), "the monitored metric is NaN");

        self.epoch += 1;

        if metric < self.best * (1.0 - threshold) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > patience {
            let lr = self.lr * factor;
            if self.lr - lr > 1e-8 {
                self.update_lr(lr);
            }
            self.num_bad_epochs = 0;
        }

        Ok(self.lr)
    }

    fn update_lr(&mut self, lr: f64) {
        if lr != self.lr {
            debug!(
                "learning rate {:.7} -> {:.7} at epoch {}",
                self.lr, lr, self.epoch
            );
        }
        self.lr = lr;
    }

    fn epoch_lr(&self, epoch: usize) -> f64 {
        let base_lr = self.base_lr;

        match self.policy {
            LrPolicy::Linear {
                n_epochs,
                n_epochs_decay,
                epoch_count,
            } => {
                let elapsed = (epoch + epoch_count).saturating_sub(n_epochs);
                let scale = 1.0 - elapsed as f64 / (n_epochs_decay + 1) as f64;
                base_lr * scale.max(0.0)
            }
            LrPolicy::Step { step_size, gamma } => {
                base_lr * gamma.powi((epoch / step_size) as i32)
            }
            LrPolicy::Plateau { .. } => self.lr,
            LrPolicy::Cosine { t_max, eta_min } => {
                let phase = PI * epoch as f64 / t_max as f64;
                eta_min + (base_lr - eta_min) * (1.0 + phase.cos()) / 2.0
            }
        }
    }
}
