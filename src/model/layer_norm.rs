use crate::common::*;

/// Position of the channel axis in the normalized tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    /// `(batch, height, width, channels)`
    #[serde(rename = "channels_last")]
    ChannelsLast,
    /// `(batch, channels, height, width)`
    #[serde(rename = "channels_first")]
    ChannelsFirst,
}

#[derive(Debug, Clone)]
pub struct LayerNormInit {
    pub data_format: DataFormat,
    pub eps: f64,
}

impl Default for LayerNormInit {
    fn default() -> Self {
        Self {
            data_format: DataFormat::ChannelsLast,
            eps: 1e-6,
        }
    }
}

impl LayerNormInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, channels: i64) -> LayerNorm {
        let path = path.borrow();
        let Self { data_format, eps } = self;

        LayerNorm {
            ws: path.var("weight", &[channels], nn::Init::Const(1.0)),
            bs: path.var("bias", &[channels], nn::Init::Const(0.0)),
            channels,
            data_format,
            eps,
        }
    }
}

#[derive(Debug)]
pub struct LayerNorm {
    ws: Tensor,
    bs: Tensor,
    channels: i64,
    data_format: DataFormat,
    eps: f64,
}

impl nn::Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref ws,
            ref bs,
            channels,
            data_format,
            eps,
        } = *self;

        match data_format {
            DataFormat::ChannelsLast => xs.layer_norm(&[channels], Some(ws), Some(bs), eps, true),
            DataFormat::ChannelsFirst => {
                let mean = xs.mean_dim(&[1], true, xs.kind());
                let diff = xs - &mean;
                let var = (&diff * &diff).mean_dim(&[1], true, xs.kind());
                let xs = diff / (var + eps).sqrt();
                ws.view([channels, 1, 1]) * xs + bs.view([channels, 1, 1])
            }
        }
    }
}
