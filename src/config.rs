use crate::{
    common::*,
    model::{
        DiscriminatorInit, DiscriminatorKind, GanLossInit, GanMode, GeneratorInit,
        GeneratorKind, InitKind, NormKind, WGanGpInit, WGanGpKind, WeightInit,
    },
    schedule::LrPolicyInit,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    pub batch_size: NonZeroUsize,
    pub image_size: NonZeroUsize,
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub loss: Loss,
    pub schedule: Schedule,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub kind: GeneratorKind,
    pub input_channels: NonZeroUsize,
    pub output_channels: NonZeroUsize,
    pub base_channels: NonZeroUsize,
    pub norm: NormKind,
    pub dropout: bool,
    pub init: InitKind,
    pub init_gain: R64,
}

impl Generator {
    pub fn to_init(&self) -> GeneratorInit {
        let Self {
            kind,
            input_channels,
            output_channels,
            base_channels,
            norm,
            dropout,
            init,
            init_gain,
        } = *self;

        GeneratorInit {
            kind,
            input_channels: input_channels.get(),
            output_channels: output_channels.get(),
            base_channels: base_channels.get(),
            norm_kind: norm,
            dropout,
            init: WeightInit {
                kind: init,
                gain: init_gain.raw(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discriminator {
    pub kind: DiscriminatorKind,
    pub input_channels: NonZeroUsize,
    pub base_channels: NonZeroUsize,
    pub n_layers: NonZeroUsize,
    pub norm: NormKind,
    pub init: InitKind,
    pub init_gain: R64,
}

impl Discriminator {
    /// The `binary` discriminator is sized for `image_size` inputs.
    pub fn to_init(&self, image_size: NonZeroUsize) -> DiscriminatorInit {
        let Self {
            kind,
            input_channels,
            base_channels,
            n_layers,
            norm,
            init,
            init_gain,
        } = *self;

        DiscriminatorInit {
            kind,
            input_channels: input_channels.get(),
            base_channels: base_channels.get(),
            n_layers: n_layers.get(),
            norm_kind: norm,
            input_size: image_size.get(),
            init: WeightInit {
                kind: init,
                gain: init_gain.raw(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loss {
    pub gan_mode: GanMode,
    pub gradient_penalty: GradientPenalty,
}

impl Loss {
    pub fn gan_loss_init(&self) -> GanLossInit {
        GanLossInit {
            mode: self.gan_mode,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientPenalty {
    pub kind: WGanGpKind,
    pub constant: R64,
    pub lambda: R64,
}

impl GradientPenalty {
    pub fn to_init(&self) -> WGanGpInit {
        let Self {
            kind,
            constant,
            lambda,
        } = *self;

        WGanGpInit {
            kind,
            constant: constant.raw(),
            lambda: lambda.raw(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub learning_rate: R64,
    pub policy: LrPolicyInit,
}
