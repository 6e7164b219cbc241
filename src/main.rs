use clap::Parser;

use control_panel_lib::cli::Cli;
use control_panel_lib::core::platform::panel_paths;
use control_panel_lib::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let paths = panel_paths().clone();
    let guard = init_logging(&paths);

    let code = match cli.execute(paths).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(kind = %err.kind(), "{}", err);
            eprintln!("Error: {err}");
            err.exit_code()
        }
    };

    // Flush the file log before exiting.
    drop(guard);
    std::process::exit(code);
}
