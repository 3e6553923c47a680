use clap::Parser;
use sitewatch::cli::Cli;

fn main() {
    let _ = tracing_subscriber::fmt::try_init();
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

#[cfg(feature = "with-opencv")]
fn run() -> anyhow::Result<()> {
    use std::sync::Arc;

    use npu_core::{Detector, ModelRuntime, NpuCore};
    use sitewatch::pipeline::{
        self, Pipeline, config::TaskSpec, display::OpenCvDisplay, worker::ModelFactory,
    };
    use video_ingest::OpenCvCapture;

    let config = Cli::parse().into_config()?;

    let factory = Arc::new(|task: &TaskSpec, core: NpuCore| {
        Detector::load(&task.model_path, core, task.kind.decode_config())
            .map(|detector| Box::new(detector) as Box<dyn ModelRuntime>)
    }) as Arc<dyn ModelFactory>;

    let mut pipeline = Pipeline::build(
        config,
        Box::new(OpenCvCapture::new()),
        Box::new(OpenCvDisplay),
        factory,
    )?;
    pipeline::install_signal_handlers(&pipeline.run_flag());
    println!("sitewatch running; press 'q' in a window or Ctrl-C to stop");
    pipeline.run()
}

#[cfg(not(feature = "with-opencv"))]
fn run() -> anyhow::Result<()> {
    // Validate the invocation anyway so --help and flag errors behave.
    let _ = Cli::parse().into_config()?;
    anyhow::bail!(
        "this build has no camera/display support; rebuild with `--features with-opencv`"
    );
}
