use anyhow::Result;
use clap::Parser;
use payment_reminders::{Backend as _, BackendImpl};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = "payment_reminders")]
    config: Vec<std::path::PathBuf>,

    /// Send today's due reminders once and exit instead of serving.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();
    let args = Cli::parse();

    let backend = BackendImpl::new(args.config).await?;

    if args.once {
        let report = backend.dispatch_now().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    backend.run().await
}
