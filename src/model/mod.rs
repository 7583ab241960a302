mod convnext_block;
mod discriminator;
mod generator;
mod init;
mod involution;
mod layer_norm;
mod loss;
mod misc;
mod resnet_block;
mod unet_block;

pub use convnext_block::*;
pub use discriminator::*;
pub use generator::*;
pub use init::*;
pub use involution::*;
pub use layer_norm::*;
pub use loss::*;
pub use misc::*;
pub use resnet_block::*;
pub use unet_block::*;
