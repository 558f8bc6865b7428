use anyhow::Result;
use vk_mlp::*;

fn main() -> Result<()> {
    env_logger::init();

    let context = Context::new()?;
    let catalog = KernelCatalog::initialize(&context, &KernelSource::builtin())?;
    println!("running on {}", context.device_name());

    let a = DeviceMatrix::from_host(
        &catalog,
        3,
        3,
        &[
            1., 2., 3., //
            4., 5., 6., //
            7., 8., 9., //
        ],
    )?;
    let b = DeviceMatrix::from_host(
        &catalog,
        3,
        1,
        &[
            0.1, //
            0.2, //
            0.3, //
        ],
    )?;

    let mut output = a.transpose()?.multiply(&b)?;
    dbg!(output.copy_to_host()?);

    output.apply_activation(Activation::Sigmoid)?;
    dbg!(output.copy_to_host()?);

    Ok(())
}
