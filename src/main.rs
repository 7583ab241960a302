use anyhow::Result;
use cyclegan_nets::{
    common::*,
    config,
    model::{num_parameters, GanMode, GradientPenalty},
    schedule::LrScheduler,
};
use std::{env, path::PathBuf};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Builds the configured CycleGAN networks and reports their shapes and losses.
pub struct Args {
    #[structopt(long, default_value = "config.json5")]
    pub config: PathBuf,
}

fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        let filter = if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        };
        filter
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse config
    let Args { config } = Args::from_args();
    let config = config::Config::load(&config)?;
    let config::Config {
        device,
        batch_size,
        image_size,
        ref generator,
        ref discriminator,
        ref loss,
        ref schedule,
    } = config;

    ensure!(
        generator.output_channels == discriminator.input_channels,
        "generator outputs {} channels but the discriminator takes {}",
        generator.output_channels,
        discriminator.input_channels
    );

    let batch = batch_size.get() as i64;
    let size = image_size.get() as i64;

    // build networks
    let generator_vs = nn::VarStore::new(device);
    let discriminator_vs = nn::VarStore::new(device);

    let generator_model = generator.to_init().build(&generator_vs, "generator")?;
    let discriminator_model = discriminator
        .to_init(image_size)
        .build(&discriminator_vs, "discriminator")?;

    info!(
        "generator {:?} has {} parameters",
        generator.kind,
        num_parameters(&generator_vs, "generator")
    );
    info!(
        "discriminator {:?} has {} parameters",
        discriminator.kind,
        num_parameters(&discriminator_vs, "discriminator")
    );

    // one forward pass on random images in [-1, 1]
    let input = Tensor::rand(
        &[batch, generator.input_channels.get() as i64, size, size],
        (Kind::Float, device),
    ) * 2.0
        - 1.0;
    let real = Tensor::rand(
        &[batch, discriminator.input_channels.get() as i64, size, size],
        (Kind::Float, device),
    ) * 2.0
        - 1.0;

    let fake = generator_model.forward_t(&input, true);
    info!("generator maps {:?} to {:?}", input.size(), fake.size());

    let real_score = discriminator_model.forward_t(&real, true);
    let fake_score = discriminator_model.forward_t(&fake.detach(), true);
    info!("discriminator scores have shape {:?}", real_score.size());

    // losses
    let gan_loss = loss.gan_loss_init().build()?;
    let discriminator_loss =
        (gan_loss.forward(&real_score, true) + gan_loss.forward(&fake_score, false)) * 0.5;
    let generator_loss = gan_loss.forward(&discriminator_model.forward_t(&fake, true), true);
    info!(
        "{:?} discriminator loss {:.5}, generator loss {:.5}",
        loss.gan_mode,
        f64::from(&discriminator_loss),
        f64::from(&generator_loss)
    );

    if loss.gan_mode == GanMode::WGanGp {
        let penalty = loss.gradient_penalty.to_init().build()?;
        let GradientPenalty { penalty, gradients } = penalty.forward(
            &real,
            &fake,
            |xs, train| discriminator_model.forward_t(xs, train),
            true,
        )?;
        info!(
            "gradient penalty {:.5}, gradients {:?}",
            f64::from(&penalty),
            gradients.map(|grad| grad.size())
        );
    }

    // learning rate schedule
    let policy = schedule.policy.clone().build()?;
    let scheduler = LrScheduler::new(policy, schedule.learning_rate.raw())?;
    info!("{:?} starts at learning rate {}", policy, scheduler.lr());

    Ok(())
}
