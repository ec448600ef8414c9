use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // usage errors exit 1, --help and --version exit 0
    let cli = hostforge::cli::Cli::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        std::process::exit(code);
    });
    hostforge::logging::init(cli.verbose);
    cli.run()
}
