use gauntlet::run_main;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let exit_code = run_main().await?;

    // Exit with appropriate code
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
