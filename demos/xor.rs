use anyhow::Result;
use vk_mlp::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let context = Context::new()?;
    let catalog = KernelCatalog::initialize(&context, &KernelSource::builtin())?;

    let input = DeviceMatrix::from_host(
        &catalog,
        4,
        2,
        &[
            0., 0., //
            0., 1., //
            1., 0., //
            1., 1., //
        ],
    )?;
    let target = DeviceMatrix::from_host(&catalog, 4, 1, &[0., 1., 1., 0.])?;

    let mut mlp = Mlp::with_topology(
        &catalog,
        &[2, 4, 1],
        &[Activation::Sigmoid, Activation::Sigmoid],
        1.,
        Loss::BinaryCrossEntropy,
        0x5eed,
    )?;

    let trainer = Trainer::new(TrainingConfig {
        steps: 3000,
        learning_rate: 1.,
        schedule: LearningRateSchedule::Constant,
        log_every: 250,
    });
    let report = trainer.fit(&mut mlp, &input, &target)?;
    println!("final loss: {:?}", report.final_loss());

    let output = mlp.evaluate(&input)?.copy_to_host()?;
    for (row, out) in [[0, 0], [0, 1], [1, 0], [1, 1]].iter().zip(&output) {
        println!("{:?} -> {:.4}", row, out);
    }

    Ok(())
}
