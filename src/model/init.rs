use crate::common::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitKind {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "xavier")]
    Xavier,
    #[serde(rename = "kaiming")]
    Kaiming,
    #[serde(rename = "orthogonal")]
    Orthogonal,
}

impl FromStr for InitKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "normal" => Self::Normal,
            "xavier" => Self::Xavier,
            "kaiming" => Self::Kaiming,
            "orthogonal" => Self::Orthogonal,
            _ => bail!("initialization method [{}] is not implemented", name),
        };
        Ok(kind)
    }
}

impl fmt::Display for InitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Xavier => "xavier",
            Self::Kaiming => "kaiming",
            Self::Orthogonal => "orthogonal",
        };
        write!(f, "{}", name)
    }
}

/// Re-initializes the parameters of a network after it is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightInit {
    pub kind: InitKind,
    pub gain: f64,
}

impl Default for WeightInit {
    fn default() -> Self {
        Self {
            kind: InitKind::Normal,
            gain: 0.02,
        }
    }
}

impl WeightInit {
    /// Overwrites every variable of `vs` whose name starts with `prefix`.
    ///
    /// Convolution and linear weights (two or more dimensions) are drawn from
    /// the configured distribution, batch-norm weights from `N(1, gain)`. The
    /// biases next to either are zeroed. Other variables are left alone.
    /// Returns the number of re-initialized weight tensors.
    pub fn apply(&self, vs: &nn::VarStore, prefix: &str) -> Result<usize> {
        let Self { kind, gain } = *self;
        info!("initialize network with {}", kind);

        // sorted so that seeded draws happen in a stable order
        let variables: BTreeMap<String, Tensor> = vs
            .variables()
            .into_iter()
            .filter(|(name, _)| is_under(name, prefix))
            .collect();

        let count = tch::no_grad(|| -> Result<_> {
            let mut count = 0;

            for (name, weight) in &variables {
                let layer = match name.strip_suffix(".weight") {
                    Some(layer) => layer,
                    None => continue,
                };
                let mut weight = weight.shallow_clone();

                if is_batch_norm(layer) {
                    let _ = weight.normal_(1.0, gain);
                } else if weight.dim() >= 2 {
                    init_tensor(&mut weight, kind, gain)?;
                } else {
                    continue;
                }

                if let Some(bias) = variables.get(&format!("{}.bias", layer)) {
                    let _ = bias.shallow_clone().zero_();
                }
                count += 1;
            }

            Ok(count)
        })?;

        debug!("{} weight tensors initialized under '{}'", count, prefix);
        Ok(count)
    }
}

/// Number of trainable scalars under `prefix`.
pub fn num_parameters(vs: &nn::VarStore, prefix: &str) -> usize {
    vs.variables()
        .into_iter()
        .filter(|(name, var)| is_under(name, prefix) && var.requires_grad())
        .map(|(_, var)| var.numel())
        .sum()
}

fn is_under(name: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || name
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}

fn is_batch_norm(layer: &str) -> bool {
    layer.rsplit('.').next() == Some("batch_norm")
}

fn init_tensor(weight: &mut Tensor, kind: InitKind, gain: f64) -> Result<()> {
    let (fan_in, fan_out) = fans(weight)?;

    match kind {
        InitKind::Normal => {
            let _ = weight.normal_(0.0, gain);
        }
        InitKind::Xavier => {
            let std = gain * (2.0 / (fan_in + fan_out) as f64).sqrt();
            let _ = weight.normal_(0.0, std);
        }
        InitKind::Kaiming => {
            let std = (2.0 / fan_in as f64).sqrt();
            let _ = weight.normal_(0.0, std);
        }
        InitKind::Orthogonal => {
            let orthogonal = orthogonal_matrix(&weight.size(), weight.kind(), weight.device())?;
            weight.copy_(&(orthogonal * gain));
        }
    }

    Ok(())
}

/// Fan-in and fan-out following the `(dim0, dim1, kernel..)` layout.
fn fans(weight: &Tensor) -> Result<(i64, i64)> {
    let size = weight.size();
    ensure!(
        size.len() >= 2,
        "fan-in and fan-out need at least two dimensions, got {:?}",
        size
    );
    let receptive: i64 = size[2..].iter().product();
    Ok((size[1] * receptive, size[0] * receptive))
}

fn orthogonal_matrix(size: &[i64], kind: Kind, device: Device) -> Result<Tensor> {
    let rows = size[0];
    let cols = size[1..].iter().product::<i64>();
    ensure!(rows > 0 && cols > 0, "cannot orthogonalize an empty tensor");

    let flat = Tensor::randn(&[rows, cols], (kind, device));
    let flat = if rows < cols { flat.tr() } else { flat };
    let (q, r) = flat.qr(true);
    let q = q * r.diag(0).sign();
    let q = if rows < cols { q.tr() } else { q };

    Ok(q.reshape(size))
}
