use clap::Parser;

fn main() {
    let cli = oemwatchctl::Cli::parse();
    if let Err(err) = oemwatchctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
