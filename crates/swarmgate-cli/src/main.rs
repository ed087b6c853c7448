//! Thin entrypoint delegating to [`swarmgate_cli::run`].

#[tokio::main]
async fn main() {
    let exit_code = swarmgate_cli::run().await;
    std::process::exit(exit_code);
}
